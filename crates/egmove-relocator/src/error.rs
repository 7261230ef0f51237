use std::fmt;
use std::io;
use std::path::PathBuf;

use egmove_core::DocumentError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceIssue {
    Missing,
    NotADirectory,
    NoFinalComponent,
}

impl fmt::Display for SourceIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => f.write_str("it does not exist"),
            Self::NotADirectory => f.write_str("it is not a directory"),
            Self::NoFinalComponent => f.write_str("it has no directory name to carry over"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestinationIssue {
    Missing,
    NotADirectory,
    NotAbsolute,
    NonUnicode,
    SameAsCurrentParent,
    InsideSource,
    TargetExists(PathBuf),
}

impl fmt::Display for DestinationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => f.write_str("it does not exist"),
            Self::NotADirectory => f.write_str("it is not a directory"),
            Self::NotAbsolute => f.write_str("it is not an absolute path"),
            Self::NonUnicode => f.write_str("it is not valid unicode"),
            Self::SameAsCurrentParent => {
                f.write_str("the application is already installed there")
            }
            Self::InsideSource => f.write_str("it lies inside the install location"),
            Self::TargetExists(target) => {
                write!(f, "{} already exists", target.display())
            }
        }
    }
}

/// Planning refusals. Nothing on disk has been touched when one of these is
/// returned; correcting the input and planning again is safe.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("application '{app_id}' has no manifest")]
    NotFound { app_id: String },
    #[error("application '{app_id}' has no entry in the install registry")]
    NotRegistered { app_id: String },
    #[error(
        "install registry places '{app_id}' at {registry_location} but its manifest says {manifest_location}; let the launcher repair the install first"
    )]
    RegistryMismatch {
        app_id: String,
        registry_location: String,
        manifest_location: String,
    },
    #[error(
        "application '{app_id}' expects add-on content ({}); relocating applications with dependents is not supported",
        .dependents.join(", ")
    )]
    UnsupportedDependents {
        app_id: String,
        dependents: Vec<String>,
    },
    #[error(
        "install location {} of '{app_id}' is shared with {}; multi-part installs are not supported",
        .install_location.display(),
        .sharing.join(", ")
    )]
    AmbiguousInstallPath {
        app_id: String,
        install_location: PathBuf,
        sharing: Vec<String>,
    },
    #[error("install location {} of '{app_id}' cannot be moved: {issue}", .path.display())]
    InvalidSource {
        app_id: String,
        path: PathBuf,
        issue: SourceIssue,
    },
    #[error("destination {} is invalid: {issue}", .path.display())]
    InvalidDestination {
        path: PathBuf,
        issue: DestinationIssue,
    },
    #[error(
        "application '{app_id}' is already installed at {}",
        .install_location.display()
    )]
    AlreadyInstalled {
        app_id: String,
        install_location: PathBuf,
    },
    #[error("launcher is running ({}); close it before relocating", .processes.join(", "))]
    LauncherRunning { processes: Vec<String> },
}

#[derive(Debug, Error)]
pub enum WriteFailure {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error("no entry for '{0}' is present any more")]
    EntryMissing(String),
    #[error("install location on disk changed to {0}")]
    Stale(String),
}

/// The step of a relocation that failed. Each message carries its cause inline,
/// so none of these report a separate `source()`.
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("failed to move {} to {}: {error}", .from.display(), .to.display())]
    MoveFailed {
        from: PathBuf,
        to: PathBuf,
        error: io::Error,
    },
    #[error("failed to back up {}: {error}", .path.display())]
    BackupFailed { path: PathBuf, error: io::Error },
    #[error("failed to rewrite install registry {}: {reason}", .path.display())]
    RegistryWriteFailed { path: PathBuf, reason: WriteFailure },
    #[error("failed to rewrite manifest {}: {reason}", .path.display())]
    ManifestWriteFailed { path: PathBuf, reason: WriteFailure },
    #[error("relocation worker stopped without reporting a result")]
    WorkerLost,
}

#[derive(Debug, Error)]
pub enum RelocationError {
    #[error("relocation aborted before anything changed: {0}")]
    Aborted(TransactionError),
    #[error("relocation failed and was rolled back: {0}")]
    RolledBack(TransactionError),
    #[error(
        "relocation failed and could not be rolled back: {cause}; the application is now at {} and was originally at {}",
        .payload_location.display(),
        .original_location.display()
    )]
    ManualRecoveryRequired {
        payload_location: PathBuf,
        original_location: PathBuf,
        cause: TransactionError,
        rollback_failures: Vec<String>,
    },
}

impl RelocationError {
    /// Only manual recovery leaves state the tool cannot repair on its own.
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::ManualRecoveryRequired { .. })
    }

    pub fn cause(&self) -> &TransactionError {
        match self {
            Self::Aborted(cause) | Self::RolledBack(cause) => cause,
            Self::ManualRecoveryRequired { cause, .. } => cause,
        }
    }
}
