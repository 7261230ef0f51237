use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use egmove_core::{normalize_lexically, AppManifest, InstallRegistry};
use egmove_inventory::{LauncherPaths, MANIFEST_EXTENSION};
use egmove_relocator::{
    backup_path_for, compute_path_updates, DestinationIssue, LocalFs, LocationField,
    PathUpdate, RelocationError, RelocationState, Reporter, TransactionError, TransactionFs,
    ValidationError, WriteFailure,
};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::archive::{
    open_archive, read_metadata_entry, ArchiveCompression, BackupMetadata, ExternalEntry,
    EXTERNAL_DIR, MANIFEST_DIR, PAYLOAD_DIR,
};
use crate::BackupError;

const APP_NAME: &str = "AppName";
const INSTALL_LOCATION: &str = "InstallLocation";

/// Directory an archive is unpacked into; removed on drop unless kept.
#[derive(Debug)]
struct StagingDir {
    path: PathBuf,
    keep: bool,
}

impl StagingDir {
    fn create(path: PathBuf) -> Result<Self, BackupError> {
        match fs::create_dir(&path) {
            Ok(()) => Ok(Self { path, keep: false }),
            Err(error) => Err(BackupError::Staging { path, error }),
        }
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        if let Err(err) = fs::remove_dir_all(&self.path) {
            if err.kind() != io::ErrorKind::NotFound {
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    "failed to remove staging directory"
                );
            }
        }
    }
}

/// An archive unpacked next to its restore target and checked, ready to be
/// put in place by [`RestoreExecutor`].
#[derive(Debug)]
pub struct PreparedRestore {
    pub metadata: BackupMetadata,
    pub archive: PathBuf,
    pub compression: ArchiveCompression,
    pub target: PathBuf,
    pub manifest_path: PathBuf,
    pub registry_path: PathBuf,
    manifest: AppManifest,
    staging: StagingDir,
}

impl PreparedRestore {
    pub fn app_id(&self) -> &str {
        &self.metadata.app_id
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging.path
    }

    fn staged_payload(&self) -> PathBuf {
        self.staging.path.join(PAYLOAD_DIR)
    }

    fn staged_external(&self, entry: &ExternalEntry) -> PathBuf {
        self.staging.path.join(EXTERNAL_DIR).join(&entry.name)
    }
}

/// Unpacks `archive` into a staging directory inside `destination` and checks
/// that it holds a complete backup whose restore target is free.
///
/// Launcher files are only read.
pub fn prepare_restore(
    archive: &Path,
    destination: &Path,
    launcher: &LauncherPaths,
) -> Result<PreparedRestore, BackupError> {
    let destination_dir = normalize_lexically(destination);
    let invalid_destination = |issue| ValidationError::InvalidDestination {
        path: destination.to_path_buf(),
        issue,
    };
    if !destination.is_absolute() {
        return Err(invalid_destination(DestinationIssue::NotAbsolute).into());
    }
    match fs::metadata(&destination_dir) {
        Ok(metadata) if metadata.is_dir() => {}
        Ok(_) => return Err(invalid_destination(DestinationIssue::NotADirectory).into()),
        Err(_) => return Err(invalid_destination(DestinationIssue::Missing).into()),
    }

    let read_failed = |error| BackupError::ArchiveRead {
        path: archive.to_path_buf(),
        error,
    };
    let invalid = |reason: String| BackupError::InvalidArchive {
        path: archive.to_path_buf(),
        reason,
    };

    let (compression, mut reader) = open_archive(archive)?;
    let mut entries = reader.entries().map_err(read_failed)?;
    let metadata = read_metadata_entry(archive, &mut entries)?;

    if !is_plain_file_name(&metadata.manifest_file)
        || Path::new(&metadata.manifest_file).extension() != Some(OsStr::new(MANIFEST_EXTENSION))
    {
        return Err(invalid(format!(
            "manifest file name {:?} is not a plain .{MANIFEST_EXTENSION} name",
            metadata.manifest_file
        )));
    }
    if let Some(entry) = metadata
        .external
        .iter()
        .find(|entry| !is_plain_file_name(&entry.name))
    {
        return Err(invalid(format!("external entry name {:?} is not plain", entry.name)));
    }
    if metadata.registry_entry.get(APP_NAME).and_then(Value::as_str)
        != Some(metadata.app_id.as_str())
    {
        return Err(invalid(
            "registry entry does not belong to the archived application".to_string(),
        ));
    }
    let Some(dir_name) = normalize_lexically(Path::new(&metadata.install_location))
        .file_name()
        .map(ToOwned::to_owned)
    else {
        return Err(invalid("archived install location has no directory name".to_string()));
    };

    let target = destination_dir.join(dir_name);
    if fs::symlink_metadata(&target).is_ok() {
        return Err(invalid_destination(DestinationIssue::TargetExists(target)).into());
    }
    ensure_not_installed(launcher.registry_path(), &metadata.app_id)?;

    let staging = StagingDir::create(
        destination_dir.join(format!(".egmove-restore-{}", std::process::id())),
    )?;
    info!(
        app_id = %metadata.app_id,
        archive = %archive.display(),
        staging = %staging.path.display(),
        "unpacking backup archive"
    );
    for entry in entries {
        let mut entry = entry.map_err(read_failed)?;
        if !entry.unpack_in(&staging.path).map_err(read_failed)? {
            let name = entry
                .path()
                .map(|path| path.display().to_string())
                .unwrap_or_default();
            return Err(invalid(format!("entry {name} points outside the archive")));
        }
    }

    if !staging.path.join(PAYLOAD_DIR).is_dir() {
        return Err(invalid(format!("missing {PAYLOAD_DIR}/ directory")));
    }
    let staged_manifest = staging
        .path
        .join(MANIFEST_DIR)
        .join(&metadata.manifest_file);
    let raw = fs::read_to_string(&staged_manifest).map_err(|err| {
        invalid(format!(
            "missing {MANIFEST_DIR}/{}: {err}",
            metadata.manifest_file
        ))
    })?;
    let manifest = AppManifest::from_json_str(&raw)
        .map_err(|err| invalid(format!("unreadable manifest: {err}")))?;
    if manifest.app_id() != metadata.app_id {
        return Err(invalid(format!(
            "manifest belongs to '{}', not '{}'",
            manifest.app_id(),
            metadata.app_id
        )));
    }
    for entry in &metadata.external {
        if fs::symlink_metadata(staging.path.join(EXTERNAL_DIR).join(&entry.name)).is_err() {
            return Err(invalid(format!("missing {EXTERNAL_DIR}/{}", entry.name)));
        }
    }

    Ok(PreparedRestore {
        manifest_path: launcher.manifests_dir().join(&metadata.manifest_file),
        registry_path: launcher.registry_path().to_path_buf(),
        metadata,
        archive: archive.to_path_buf(),
        compression,
        target,
        manifest,
        staging,
    })
}

fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

// An entry whose install directory still exists is a live install; restoring
// over it would orphan those files.
fn ensure_not_installed(registry_path: &Path, app_id: &str) -> Result<(), BackupError> {
    let raw = fs::read_to_string(registry_path).map_err(|error| BackupError::SourceUnreadable {
        path: registry_path.to_path_buf(),
        error,
    })?;
    let registry = InstallRegistry::from_json_str(&raw).map_err(|err| {
        BackupError::SourceUnreadable {
            path: registry_path.to_path_buf(),
            error: io::Error::new(io::ErrorKind::InvalidData, err),
        }
    })?;
    match registry.entry(app_id) {
        Some(entry) if Path::new(&entry.install_location).exists() => {
            Err(ValidationError::AlreadyInstalled {
                app_id: app_id.to_string(),
                install_location: PathBuf::from(entry.install_location),
            }
            .into())
        }
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreOutcome {
    pub app_id: String,
    pub install_location: PathBuf,
    pub registry_backup: PathBuf,
    /// `None` when the launcher had no manifest for the application.
    pub manifest_backup: Option<PathBuf>,
    /// True when the registry had no entry and the archived one was added.
    pub registry_entry_added: bool,
    pub restored_external: Vec<PathBuf>,
    /// Out-of-tree paths left alone because something already exists there.
    pub kept_external: Vec<PathBuf>,
}

/// Puts a prepared backup in place as one transaction, mirroring a relocation:
/// payload first, then the install registry, then the manifest.
#[derive(Debug, Clone, Default)]
pub struct RestoreExecutor<F = LocalFs> {
    fs: F,
}

impl RestoreExecutor<LocalFs> {
    pub fn new() -> Self {
        Self { fs: LocalFs }
    }
}

impl<F: TransactionFs> RestoreExecutor<F> {
    pub fn with_fs(fs: F) -> Self {
        Self { fs }
    }

    /// Executes the restore. When rollback cannot complete, the staging
    /// directory is kept so that files moved back into it survive.
    pub fn execute(
        &self,
        mut prepared: PreparedRestore,
        reporter: &mut dyn Reporter,
    ) -> Result<RestoreOutcome, RelocationError> {
        let result = self.run(&prepared, reporter);
        if result.as_ref().is_err_and(RelocationError::is_critical) {
            prepared.staging.keep = true;
        }
        result
    }

    fn run(
        &self,
        prepared: &PreparedRestore,
        reporter: &mut dyn Reporter,
    ) -> Result<RestoreOutcome, RelocationError> {
        reporter.transition(RelocationState::Idle);
        let staged_payload = prepared.staged_payload();
        info!(
            app_id = %prepared.app_id(),
            to = %prepared.target.display(),
            "placing restored application payload"
        );
        if let Err(error) = self.fs.move_dir(&staged_payload, &prepared.target) {
            return Err(RelocationError::Aborted(TransactionError::MoveFailed {
                from: staged_payload,
                to: prepared.target.clone(),
                error,
            }));
        }

        let mut tx = RestoreTransaction {
            fs: &self.fs,
            prepared,
            reporter,
            placed_external: Vec::new(),
            kept_external: Vec::new(),
            registry_touched: false,
            manifest_touched: false,
            manifest_existed: false,
            registry_entry_added: false,
        };
        tx.advance(RelocationState::Moved);

        if let Err(cause) = tx.apply() {
            return Err(tx.roll_back(cause));
        }

        info!(app_id = %prepared.app_id(), to = %prepared.target.display(), "restore committed");
        Ok(RestoreOutcome {
            app_id: prepared.app_id().to_string(),
            install_location: prepared.target.clone(),
            registry_backup: backup_path_for(&prepared.registry_path),
            manifest_backup: tx
                .manifest_existed
                .then(|| backup_path_for(&prepared.manifest_path)),
            registry_entry_added: tx.registry_entry_added,
            restored_external: tx
                .placed_external
                .iter()
                .map(|(path, _)| path.clone())
                .collect(),
            kept_external: tx.kept_external,
        })
    }
}

struct RestoreTransaction<'a, F> {
    fs: &'a F,
    prepared: &'a PreparedRestore,
    reporter: &'a mut dyn Reporter,
    /// Original location and staged location of each placed out-of-tree path.
    placed_external: Vec<(PathBuf, PathBuf)>,
    kept_external: Vec<PathBuf>,
    registry_touched: bool,
    manifest_touched: bool,
    manifest_existed: bool,
    registry_entry_added: bool,
}

impl<F: TransactionFs> RestoreTransaction<'_, F> {
    fn advance(&mut self, state: RelocationState) {
        info!(app_id = %self.prepared.app_id(), state = %state, "restore state");
        self.reporter.transition(state);
    }

    fn apply(&mut self) -> Result<(), TransactionError> {
        let prepared = self.prepared;
        self.place_external()?;

        let registry_path = &prepared.registry_path;
        self.backup(registry_path)?;
        self.advance(RelocationState::RegistryBackedUp);

        self.registry_touched = true;
        self.rewrite_registry()
            .map_err(|reason| TransactionError::RegistryWriteFailed {
                path: registry_path.clone(),
                reason,
            })?;
        self.advance(RelocationState::RegistryUpdated);

        let manifest_path = &prepared.manifest_path;
        self.manifest_existed = fs::symlink_metadata(manifest_path).is_ok();
        if self.manifest_existed {
            self.backup(manifest_path)?;
            self.advance(RelocationState::ManifestBackedUp);
        }

        self.manifest_touched = true;
        self.write_manifest()
            .map_err(|reason| TransactionError::ManifestWriteFailed {
                path: manifest_path.clone(),
                reason,
            })?;
        self.advance(RelocationState::ManifestUpdated);
        Ok(())
    }

    fn place_external(&mut self) -> Result<(), TransactionError> {
        let prepared = self.prepared;
        for entry in &prepared.metadata.external {
            let original = PathBuf::from(&entry.path);
            if fs::symlink_metadata(&original).is_ok() {
                warn!(
                    app_id = %prepared.app_id(),
                    field = %entry.field,
                    path = %original.display(),
                    "path already exists; keeping it instead of the archived copy"
                );
                self.kept_external.push(original);
                continue;
            }

            let staged = prepared.staged_external(entry);
            self.fs
                .move_dir(&staged, &original)
                .map_err(|error| TransactionError::MoveFailed {
                    from: staged.clone(),
                    to: original.clone(),
                    error,
                })?;
            self.placed_external.push((original, staged));
        }
        Ok(())
    }

    fn backup(&self, path: &Path) -> Result<(), TransactionError> {
        self.fs
            .copy_file(path, &backup_path_for(path))
            .map_err(|error| TransactionError::BackupFailed {
                path: path.to_path_buf(),
                error,
            })
    }

    fn rewrite_registry(&mut self) -> Result<(), WriteFailure> {
        let prepared = self.prepared;
        let path = &prepared.registry_path;
        let location = prepared.target.to_string_lossy();
        let mut registry = InstallRegistry::from_json_str(&self.fs.read_to_string(path)?)?;
        if !registry.set_install_location(prepared.app_id(), &location) {
            let mut entry = prepared.metadata.registry_entry.clone();
            if let Some(object) = entry.as_object_mut() {
                object.insert(
                    INSTALL_LOCATION.to_string(),
                    Value::String(location.to_string()),
                );
            }
            registry.push_entry(entry)?;
            self.registry_entry_added = true;
        }
        self.fs
            .write_atomic(path, registry.to_json_string()?.as_bytes())?;
        Ok(())
    }

    fn write_manifest(&self) -> Result<(), WriteFailure> {
        let prepared = self.prepared;
        let mut manifest = prepared.manifest.clone();
        let updates = compute_path_updates(
            &manifest,
            Path::new(&prepared.metadata.install_location),
            &prepared.target,
        );
        manifest.set_install_location(&updates.install_location);
        for (field, update) in updates.fields() {
            let PathUpdate::Rebase { to, .. } = update else {
                continue;
            };
            match field {
                LocationField::ManifestLocation => manifest.set_manifest_location(to),
                LocationField::StagingLocation => manifest.set_staging_location(to),
            }
        }
        self.fs
            .write_atomic(&prepared.manifest_path, manifest.to_json_string()?.as_bytes())?;
        Ok(())
    }

    fn restore(&self, path: &Path) -> io::Result<()> {
        let backup = self.fs.read_to_string(&backup_path_for(path))?;
        self.fs.write_atomic(path, backup.as_bytes())
    }

    fn roll_back(mut self, cause: TransactionError) -> RelocationError {
        let prepared = self.prepared;
        warn!(app_id = %prepared.app_id(), error = %cause, "restore failed; rolling back");
        self.advance(RelocationState::RollingBack);

        let mut failures = Vec::new();
        if self.manifest_touched {
            let undone = if self.manifest_existed {
                self.restore(&prepared.manifest_path)
            } else {
                match self.fs.remove_file(&prepared.manifest_path) {
                    Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
                    other => other,
                }
            };
            if let Err(err) = undone {
                failures.push(format!(
                    "failed to undo manifest {}: {err}",
                    prepared.manifest_path.display()
                ));
            }
        }
        if self.registry_touched {
            if let Err(err) = self.restore(&prepared.registry_path) {
                failures.push(format!(
                    "failed to restore install registry {} from backup: {err}",
                    prepared.registry_path.display()
                ));
            }
        }
        for (original, staged) in self.placed_external.iter().rev() {
            if let Err(err) = self.fs.move_dir(original, staged) {
                failures.push(format!(
                    "failed to move {} back to {}: {err}",
                    original.display(),
                    staged.display()
                ));
            }
        }

        let staged_payload = prepared.staged_payload();
        let payload_location = match self.fs.move_dir(&prepared.target, &staged_payload) {
            Ok(()) => staged_payload.clone(),
            Err(err) => {
                failures.push(format!(
                    "failed to move {} back to {}: {err}",
                    prepared.target.display(),
                    staged_payload.display()
                ));
                prepared.target.clone()
            }
        };

        if failures.is_empty() {
            self.advance(RelocationState::RolledBack);
            return RelocationError::RolledBack(cause);
        }

        error!(
            app_id = %prepared.app_id(),
            payload = %payload_location.display(),
            failures = ?failures,
            "restore rollback incomplete; manual recovery required"
        );
        self.advance(RelocationState::ManualRecoveryRequired);
        RelocationError::ManualRecoveryRequired {
            payload_location,
            original_location: staged_payload,
            cause,
            rollback_failures: failures,
        }
    }
}
