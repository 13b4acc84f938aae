//! modelpack-core: Core types for the modelpack store
//!
//! This crate provides the types shared by the store and the CLI:
//! - Content digests and OCI descriptors
//! - Package manifests and their layer invariants
//! - Package descriptions and archive metadata
//! - Configuration types
//! - Error handling

pub mod config;
pub mod digest;
pub mod error;
pub mod manifest;
pub mod package;

pub use config::*;
pub use digest::*;
pub use error::*;
pub use manifest::*;
pub use package::*;
