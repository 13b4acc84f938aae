//! modelpack-store: Model package storage
//!
//! This crate provides the storage side of modelpack:
//! - Content-addressed blob storage in OCI image layout
//! - The reference index mapping tags to manifests
//! - Conversion between model archives and layered packages
//! - The `PackageStore` orchestrating import, export, tag and remove

pub mod blob;
pub mod builder;
pub mod content;
pub mod fsutil;
pub mod index;
pub mod loader;
pub mod oci;
pub mod store;

pub use blob::{BlobStat, BlobStore};
pub use builder::{ManifestBuilder, PackageBlobs};
pub use content::ContentEntry;
pub use index::ReferenceIndex;
pub use loader::ManifestLoader;
pub use oci::OciStore;
pub use store::{ImportSummary, PackageStore, RemoveOutcome, ResolvedPackage};
