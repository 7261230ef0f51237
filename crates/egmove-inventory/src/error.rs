use std::io;
use std::path::PathBuf;

use egmove_core::DocumentError;
use thiserror::Error;

/// Failures that prevent the catalog from being listed at all. Retrying after
/// the launcher has finished writing its files is usually enough.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("failed to read install registry {}: {error}", .path.display())]
    RegistryUnreadable {
        path: PathBuf,
        error: io::Error,
    },
    #[error("failed to parse install registry {}: {error}", .path.display())]
    RegistryMalformed {
        path: PathBuf,
        error: DocumentError,
    },
    #[error("failed to read manifest directory {}: {error}", .path.display())]
    ManifestDirUnreadable {
        path: PathBuf,
        error: io::Error,
    },
}
