use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use colored::*;
use pages2pdf::{assemble, manifest, AssemblyOptions, AssemblyTask, Scheduler};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::process;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pages2pdf")]
#[command(
    about = "CLI utility to assemble downloaded book pages into one PDF per chapter or page"
)]
#[command(version = "0.1.0")]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Assemble every link listed in a manifest
    Assemble {
        /// JSON manifest of resolved links
        #[arg(short = 'm', long = "manifest")]
        manifest: PathBuf,

        /// Directory the images were downloaded into
        #[arg(short = 'r', long = "root", default_value = "downloads")]
        root: PathBuf,

        /// Number of PDFs assembled in parallel (defaults to the number of CPU cores)
        #[arg(short = 'j', long = "jobs")]
        jobs: Option<NonZeroUsize>,

        /// Delete the page images after their PDF has been written
        #[arg(long = "remove-images")]
        remove_images: bool,
    },
    /// Assemble the images of a single directory
    Directory {
        /// Directory containing the page images
        dir: PathBuf,

        /// Base name of the PDF (defaults to the directory name)
        #[arg(short = 'n', long = "name")]
        name: Option<String>,

        /// Delete the page images after the PDF has been written
        #[arg(long = "remove-images")]
        remove_images: bool,
    },
}

async fn assemble_manifest(
    manifest_path: PathBuf,
    root: PathBuf,
    jobs: Option<NonZeroUsize>,
    options: AssemblyOptions,
) -> Result<()> {
    if !root.is_dir() {
        return Err(anyhow!("Root directory '{}' does not exist", root.display()));
    }

    let units = manifest::load(&manifest_path).await?;
    let report = Scheduler::new(&units, root, jobs)
        .with_options(options)
        .run()
        .await;

    if report.failed > 0 {
        let summary = format!(
            "{} of {} PDFs could not be assembled, see errors above",
            report.failed,
            report.total()
        );
        info!("{}", summary.yellow());
    }

    Ok(())
}

async fn assemble_directory(
    dir: PathBuf,
    name: Option<String>,
    options: AssemblyOptions,
) -> Result<()> {
    let name = match name {
        Some(name) => name,
        None => dir
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| {
                anyhow!("Cannot derive a PDF name from '{}', pass --name", dir.display())
            })?,
    };

    let task = AssemblyTask::new(dir, name);
    assemble(&task, &options)
        .await
        .map_err(|e| anyhow!("{}", e))?;
    Ok(())
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::from_default_env()
        .add_directive("pages2pdf=info".parse().unwrap());

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let args = Args::parse();

    let result = match args.command {
        Commands::Assemble { manifest, root, jobs, remove_images } => {
            assemble_manifest(manifest, root, jobs, AssemblyOptions { remove_images }).await
        }
        Commands::Directory { dir, name, remove_images } => {
            assemble_directory(dir, name, AssemblyOptions { remove_images }).await
        }
    };

    if let Err(e) = result {
        error!("{}", format!("Error: {}", e).red());
        process::exit(1);
    }
}
