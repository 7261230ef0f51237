mod archive;
mod backup;
mod error;
mod restore;

pub use archive::{
    read_backup_metadata, ArchiveCompression, BackupMetadata, EntryKind, ExternalEntry,
    BACKUP_FORMAT_VERSION,
};
pub use backup::{create_backup, BackupOutcome};
pub use error::BackupError;
pub use restore::{prepare_restore, PreparedRestore, RestoreExecutor, RestoreOutcome};
