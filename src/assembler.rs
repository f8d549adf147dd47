use colored::*;
use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, error, info, warn};

use crate::error::{AssemblyError, CodecError};
use crate::pdf_builder::ImagePdfBuilder;

/// Extension of the assembled document. Any entry with this extension marks
/// a directory as already assembled.
pub const OUTPUT_EXTENSION: &str = "pdf";

/// One directory of page images to be merged into `{directory}/{name}.pdf`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyTask {
    pub directory: PathBuf,
    pub name: String,
    /// Page count reported upstream, if known. Only used for a sanity warning.
    pub expected_pages: Option<u32>,
}

impl AssemblyTask {
    pub fn new(directory: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            name: name.into(),
            expected_pages: None,
        }
    }

    pub fn with_expected_pages(mut self, expected_pages: Option<u32>) -> Self {
        self.expected_pages = expected_pages;
        self
    }

    pub fn target_path(&self) -> PathBuf {
        self.directory
            .join(format!("{}.{}", self.name, OUTPUT_EXTENSION))
    }

    // Hidden and not ending in .pdf, so neither the guard nor the image scan sees it.
    fn partial_path(&self) -> PathBuf {
        self.directory
            .join(format!(".{}.{}.part", self.name, OUTPUT_EXTENSION))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssemblyOptions {
    /// Delete the source images once the PDF has been written.
    pub remove_images: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssemblyOutcome {
    Assembled { path: PathBuf, pages: usize },
    /// The directory already holds a PDF; nothing was written.
    AlreadyAssembled,
    /// The directory holds no images; nothing was written.
    Empty,
}

/// Merges the images of one directory into a single PDF.
///
/// Emits one "starting" event and then either a "completed" or a "failed"
/// event. The error is returned for the caller's bookkeeping only; it has
/// already been logged.
pub async fn assemble(
    task: &AssemblyTask,
    options: &AssemblyOptions,
) -> Result<AssemblyOutcome, AssemblyError> {
    let target = task.target_path();
    info!("Starting assembly of \"{}\"", target.display().to_string().blue());

    let result = assemble_inner(task, options, &target).await;

    match &result {
        Ok(AssemblyOutcome::Assembled { path, pages }) => {
            info!(
                "Assembly completed: \"{}\" ({} pages)",
                path.display().to_string().green(),
                pages
            );
        }
        Ok(AssemblyOutcome::AlreadyAssembled) => {
            info!(
                "Assembly completed: \"{}\" already holds a PDF, skipping",
                task.directory.display()
            );
        }
        Ok(AssemblyOutcome::Empty) => {
            info!(
                "Assembly completed: no images in \"{}\", nothing written",
                task.directory.display()
            );
        }
        Err(e) if e.is_fatal() => {
            error!("{}", format!("Assembly failed: {}: {}", e.kind(), e).red());
        }
        Err(e) => {
            error!("Assembly failed: {}: {}", e.kind(), e);
        }
    }

    result
}

async fn assemble_inner(
    task: &AssemblyTask,
    options: &AssemblyOptions,
    target: &Path,
) -> Result<AssemblyOutcome, AssemblyError> {
    let entries = list_entries(&task.directory).await?;

    if entries.iter().any(|path| has_output_extension(path)) {
        return Ok(AssemblyOutcome::AlreadyAssembled);
    }

    let images = image_files(entries).await;
    if images.is_empty() {
        return Ok(AssemblyOutcome::Empty);
    }

    if let Some(expected) = task.expected_pages {
        if expected as usize != images.len() {
            warn!(
                "Expected {} pages in \"{}\" but found {} images",
                expected,
                task.directory.display(),
                images.len()
            );
        }
    }

    let Some((pages, data)) = render(images.clone(), task.directory.clone()).await? else {
        return Ok(AssemblyOutcome::Empty);
    };

    write_atomically(&task.partial_path(), target, &data).await?;

    if options.remove_images {
        remove_images(&images).await;
    }

    Ok(AssemblyOutcome::Assembled {
        path: target.to_path_buf(),
        pages,
    })
}

async fn list_entries(directory: &Path) -> Result<Vec<PathBuf>, AssemblyError> {
    let mut read_dir = fs::read_dir(directory)
        .await
        .map_err(|e| listing_error(directory, e))?;

    let mut entries = Vec::new();
    while let Some(entry) = read_dir
        .next_entry()
        .await
        .map_err(|e| listing_error(directory, e))?
    {
        entries.push(entry.path());
    }

    Ok(entries)
}

fn listing_error(directory: &Path, source: io::Error) -> AssemblyError {
    if source.kind() == io::ErrorKind::NotFound {
        AssemblyError::DirectoryMissing {
            path: directory.to_path_buf(),
        }
    } else {
        AssemblyError::DirectoryUnreadable {
            path: directory.to_path_buf(),
            source,
        }
    }
}

fn has_output_extension(path: &Path) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .is_some_and(|ext| ext.eq_ignore_ascii_case(OUTPUT_EXTENSION))
}

/// Regular, non-hidden files sorted by name. Page order in the PDF is the
/// lexical order of the file names, so the downloader zero-pads page numbers.
async fn image_files(entries: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut images = Vec::with_capacity(entries.len());

    for path in entries {
        let hidden = path
            .file_name()
            .is_some_and(|name| name.as_encoded_bytes().first() == Some(&b'.'));
        if hidden {
            debug!("Ignoring hidden entry {}", path.display());
            continue;
        }

        match fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => images.push(path),
            Ok(_) => debug!("Ignoring non-file entry {}", path.display()),
            Err(e) => warn!("Cannot stat {}: {}", path.display(), e),
        }
    }

    images.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    images
}

/// Decodes the images and serializes the PDF on the blocking pool.
/// Returns the page count with the document bytes.
async fn render(
    images: Vec<PathBuf>,
    directory: PathBuf,
) -> Result<Option<(usize, Vec<u8>)>, AssemblyError> {
    let worker_directory = directory.clone();
    tokio::task::spawn_blocking(move || {
        let mut builder = ImagePdfBuilder::new();
        for image in &images {
            builder
                .add_image(image)
                .map_err(|source| AssemblyError::CodecFailure {
                    path: image.clone(),
                    source,
                })?;
        }

        let pages = builder.page_count();
        debug!("Rendering {} pages for {}", pages, worker_directory.display());
        let data = builder
            .to_bytes()
            .map_err(|e| AssemblyError::CodecFailure {
                path: worker_directory,
                source: CodecError::from(e),
            })?;
        Ok(data.map(|data| (pages, data)))
    })
    .await
    .map_err(|e| AssemblyError::WorkerFailure {
        path: directory,
        reason: e.to_string(),
    })?
}

async fn write_atomically(
    partial: &Path,
    target: &Path,
    data: &[u8],
) -> Result<(), AssemblyError> {
    let result = match fs::write(partial, data).await {
        Ok(()) => fs::rename(partial, target).await,
        Err(e) => Err(e),
    };

    if let Err(source) = result {
        if let Err(e) = fs::remove_file(partial).await {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Failed to remove partial file {}: {}", partial.display(), e);
            }
        }
        return Err(AssemblyError::WriteFailure {
            path: target.to_path_buf(),
            source,
        });
    }

    Ok(())
}

async fn remove_images(images: &[PathBuf]) {
    info!("Cleaning up {} source images...", images.len());
    for image in images {
        if let Err(e) = fs::remove_file(image).await {
            warn!("Failed to remove {}: {}", image.display(), e);
        }
    }
}
