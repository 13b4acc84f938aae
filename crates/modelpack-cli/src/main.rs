//! modelpack CLI
//!
//! Command-line interface for the local model package store.

mod commands;

use anyhow::Context;
use clap::{Parser, Subcommand};
use modelpack_core::{Config, LogFormat};
use modelpack_store::PackageStore;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// modelpack - store model archives as layered OCI packages
#[derive(Parser, Debug)]
#[command(name = "modelpack")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Store root, overrides the configured one
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Import a model archive
    Import {
        /// Reference to store it under (e.g., local/resnet:v1)
        reference: String,

        /// Model archive (.mar)
        archive: PathBuf,
    },

    /// Build a package from a model file description
    Build {
        /// Reference to store it under
        reference: String,

        /// Package description (TOML)
        modelfile: PathBuf,
    },

    /// Export a stored package as a model archive
    Save {
        /// Reference to export
        reference: String,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Add a reference pointing at an existing package
    Tag {
        /// Existing reference
        source: String,

        /// New reference
        target: String,
    },

    /// Remove a reference
    Rm {
        /// Reference to remove
        reference: String,
    },

    /// List stored packages
    Models,

    /// Show the manifest and metadata of a package
    Inspect {
        /// Reference to inspect
        reference: String,
    },
}

fn init_logging(verbose: bool, config: &Config) {
    let log_level = if verbose {
        Level::DEBUG
    } else {
        config.logging.level.parse().unwrap_or(Level::WARN)
    };

    let builder = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr);
    let _ = match config.logging.format {
        LogFormat::Text => tracing::subscriber::set_global_default(builder.finish()),
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish()),
    };
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(root) = cli.root {
        config.storage.root = root;
    }

    init_logging(cli.verbose, &config);

    let store = PackageStore::open(config.storage.root.clone())
        .await
        .with_context(|| format!("opening store at {}", config.storage.root.display()))?;

    match cli.command {
        Commands::Import { reference, archive } => {
            commands::import(&store, &reference, &archive).await?;
        }
        Commands::Build {
            reference,
            modelfile,
        } => {
            commands::build(&store, &reference, &modelfile).await?;
        }
        Commands::Save { reference, output } => {
            commands::save(&store, &reference, output.as_deref()).await?;
        }
        Commands::Tag { source, target } => {
            commands::tag(&store, &source, &target).await?;
        }
        Commands::Rm { reference } => {
            commands::rm(&store, &reference).await?;
        }
        Commands::Models => {
            commands::models(&store).await?;
        }
        Commands::Inspect { reference } => {
            commands::inspect(&store, &reference).await?;
        }
    }

    Ok(())
}
