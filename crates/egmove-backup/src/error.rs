use std::io;
use std::path::PathBuf;

use egmove_relocator::ValidationError;
use thiserror::Error;

/// Failures while writing an archive or preparing one for restore. None of
/// these leave launcher files changed.
#[derive(Debug, Error)]
pub enum BackupError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("archive {} already exists", .0.display())]
    ArchiveExists(PathBuf),
    #[error("failed to read {}: {error}", .path.display())]
    SourceUnreadable { path: PathBuf, error: io::Error },
    #[error("failed to write archive {}: {error}", .path.display())]
    ArchiveWrite { path: PathBuf, error: io::Error },
    #[error("failed to read archive {}: {error}", .path.display())]
    ArchiveRead { path: PathBuf, error: io::Error },
    #[error("archive {} is not an egmove backup: {reason}", .path.display())]
    InvalidArchive { path: PathBuf, reason: String },
    #[error("failed to prepare staging directory {}: {error}", .path.display())]
    Staging { path: PathBuf, error: io::Error },
}

impl BackupError {
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}
