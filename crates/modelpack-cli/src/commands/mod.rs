//! CLI commands implementation

use anyhow::{Context, Result};
use bytesize::ByteSize;
use chrono::{DateTime, Utc};
use modelpack_core::{PackError, PackageSpec};
use modelpack_store::{ImportSummary, PackageStore, RemoveOutcome};
use std::io::Write;
use std::path::Path;

/// Import a model archive
pub async fn import(store: &PackageStore, reference: &str, archive: &Path) -> Result<()> {
    let summary = store
        .import_file(reference, archive)
        .await
        .with_context(|| format!("importing {}", archive.display()))?;
    print_summary(&summary);
    Ok(())
}

/// Build a package from loose files
pub async fn build(store: &PackageStore, reference: &str, modelfile: &Path) -> Result<()> {
    let spec = PackageSpec::from_file(modelfile)?;
    let summary = store
        .build(reference, &spec)
        .await
        .with_context(|| format!("building {}", spec.model_name))?;
    print_summary(&summary);
    Ok(())
}

/// Export a package to a file or stdout
pub async fn save(store: &PackageStore, reference: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => match store.export_to(reference, path).await {
            Ok(()) => eprintln!("Saved {} to {}", reference, path.display()),
            Err(PackError::RefNotFound(_)) => eprintln!("Ref: {} not found", reference),
            Err(e) => return Err(e.into()),
        },
        None => {
            let archive = match store.export(reference).await {
                Ok(archive) => archive,
                Err(PackError::RefNotFound(_)) => {
                    eprintln!("Ref: {} not found", reference);
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&archive)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

/// Add a reference
pub async fn tag(store: &PackageStore, source: &str, target: &str) -> Result<()> {
    match store.tag(source, target).await {
        Ok(descriptor) => {
            println!("Tagged {} as {} ({})", source, target, descriptor.digest.short())
        }
        Err(e) if e.is_not_found() => println!("Ref: {} not found", source),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Remove a reference
pub async fn rm(store: &PackageStore, reference: &str) -> Result<()> {
    match store.remove(reference).await? {
        RemoveOutcome::Removed(_) => println!("Untagged: {}", reference),
        RemoveOutcome::NotFound => println!("Ref: {} not found", reference),
    }
    Ok(())
}

/// List stored packages
pub async fn models(store: &PackageStore) -> Result<()> {
    let packages = store.list().await?;

    if packages.is_empty() {
        println!("No models found");
        return Ok(());
    }

    println!("{:<40} {:<10} {:<20} {:<10}", "REF", "DIGEST", "CREATED", "SIZE");
    for package in packages {
        println!(
            "{:<40} {:<10} {:<20} {:<10}",
            package.reference,
            package.manifest_descriptor.digest.short(),
            format_created(package.created_at),
            ByteSize(package.size).to_string()
        );
    }
    Ok(())
}

/// Print the manifest and metadata of a package
pub async fn inspect(store: &PackageStore, reference: &str) -> Result<()> {
    let Some(package) = store.resolve(reference).await? else {
        println!("Ref: {} not found", reference);
        return Ok(());
    };

    println!("Ref: {}", package.reference);
    println!("Digest: {}", package.manifest_descriptor.digest);
    println!("Created: {}", format_created(package.created_at));
    println!("Size: {}", ByteSize(package.size));
    println!();
    println!("Manifest:");
    println!("{}", serde_json::to_string_pretty(&package.manifest)?);
    println!();
    println!("Metadata:");
    println!("{}", serde_json::to_string_pretty(&package.metadata)?);
    Ok(())
}

fn print_summary(summary: &ImportSummary) {
    println!("Ref: {}", summary.reference);
    println!("Digest: {}", summary.manifest.digest);
    println!("Model digest: {}", summary.weights.digest);
    println!("Size: {}", ByteSize(summary.size));
}

fn format_created(created_at: DateTime<Utc>) -> String {
    created_at.format("%Y-%m-%d %H:%M:%S").to_string()
}
