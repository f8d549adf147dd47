use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Why a single assembly task gave up. None of these abort a scheduler run.
#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("source directory {} does not exist", .path.display())]
    DirectoryMissing { path: PathBuf },

    #[error("failed to list {}: {source}", .path.display())]
    DirectoryUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to convert {}: {source}", .path.display())]
    CodecFailure {
        path: PathBuf,
        #[source]
        source: CodecError,
    },

    #[error("failed to write {}: {source}", .path.display())]
    WriteFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("assembly worker for {} did not finish: {reason}", .path.display())]
    WorkerFailure { path: PathBuf, reason: String },
}

/// Why a page image could not be turned into a PDF page.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("cannot read image: {0}")]
    Read(#[from] io::Error),

    #[error("cannot decode image: {0}")]
    Image(#[from] image::ImageError),

    #[error("cannot build PDF: {0}")]
    Pdf(#[from] lopdf::Error),
}

impl AssemblyError {
    /// Short name used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            AssemblyError::DirectoryMissing { .. } => "DirectoryMissing",
            AssemblyError::DirectoryUnreadable { .. } => "DirectoryUnreadable",
            AssemblyError::CodecFailure { .. } => "CodecFailure",
            AssemblyError::WriteFailure { .. } => "WriteFailure",
            AssemblyError::WorkerFailure { .. } => "WorkerFailure",
        }
    }

    /// Write and worker failures leave the task in an unknown state on disk.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AssemblyError::WriteFailure { .. } | AssemblyError::WorkerFailure { .. }
        )
    }
}
