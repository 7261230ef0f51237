use std::fmt;
use std::path::{Path, PathBuf};

use egmove_core::{same_location, AppManifest, InstallRegistry};
use tracing::{error, info, warn};

use crate::fs_ops::backup_path_for;
use crate::planner::{compute_path_updates, LocationField, PathUpdate, PathUpdates};
use crate::{
    LocalFs, RelocationError, RelocationRequest, Reporter, TransactionError, TransactionFs,
    WriteFailure,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocationState {
    Idle,
    Moved,
    RegistryBackedUp,
    RegistryUpdated,
    ManifestBackedUp,
    /// Both documents written; the relocation is committed.
    ManifestUpdated,
    RollingBack,
    RolledBack,
    ManualRecoveryRequired,
}

impl RelocationState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Moved => "moved",
            Self::RegistryBackedUp => "registry_backed_up",
            Self::RegistryUpdated => "registry_updated",
            Self::ManifestBackedUp => "manifest_backed_up",
            Self::ManifestUpdated => "committed",
            Self::RollingBack => "rolling_back",
            Self::RolledBack => "rolled_back",
            Self::ManualRecoveryRequired => "manual_recovery_required",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::ManifestUpdated | Self::RolledBack | Self::ManualRecoveryRequired
        )
    }
}

impl fmt::Display for RelocationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A manifest path outside the install tree, left as it was.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonRelocatablePathWarning {
    pub field: LocationField,
    pub path: String,
    pub install_location: String,
}

impl fmt::Display for NonRelocatablePathWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} is not inside install location {}; left unchanged",
            self.field, self.path, self.install_location
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelocationOutcome {
    pub app_id: String,
    pub previous_location: PathBuf,
    pub new_location: PathBuf,
    pub registry_backup: PathBuf,
    pub manifest_backup: PathBuf,
    pub warnings: Vec<NonRelocatablePathWarning>,
}

/// Runs a planned relocation as one move-and-rewrite transaction.
#[derive(Debug, Clone, Default)]
pub struct RelocationExecutor<F = LocalFs> {
    fs: F,
}

impl RelocationExecutor<LocalFs> {
    pub fn new() -> Self {
        Self { fs: LocalFs }
    }
}

impl<F: TransactionFs> RelocationExecutor<F> {
    pub fn with_fs(fs: F) -> Self {
        Self { fs }
    }

    /// Executes `request`. Confirmation must already have been given: once the
    /// payload starts moving the transaction runs to commit or rollback.
    pub fn execute(
        &self,
        request: RelocationRequest,
        reporter: &mut dyn Reporter,
    ) -> Result<RelocationOutcome, RelocationError> {
        reporter.transition(RelocationState::Idle);
        info!(
            app_id = %request.app_id,
            from = %request.source.display(),
            to = %request.target.display(),
            "moving application payload"
        );

        if let Err(error) = self.fs.move_dir(&request.source, &request.target) {
            return Err(RelocationError::Aborted(TransactionError::MoveFailed {
                from: request.source.clone(),
                to: request.target.clone(),
                error,
            }));
        }

        let mut tx = Transaction {
            fs: &self.fs,
            request: &request,
            reporter,
            registry_touched: false,
            manifest_touched: false,
        };
        tx.advance(RelocationState::Moved);

        let updates = compute_path_updates(&request.manifest, &request.source, &request.target);
        let warnings = updates
            .kept()
            .map(|(field, path)| NonRelocatablePathWarning {
                field,
                path: path.to_string(),
                install_location: request.manifest.install_location().to_string(),
            })
            .collect::<Vec<_>>();
        for warning in &warnings {
            warn!(app_id = %request.app_id, "{warning}");
            tx.reporter.warning(warning);
        }

        if let Err(cause) = tx.apply(&updates) {
            return Err(tx.roll_back(cause));
        }

        info!(app_id = %request.app_id, to = %request.target.display(), "relocation committed");
        Ok(RelocationOutcome {
            app_id: request.app_id.clone(),
            previous_location: request.source.clone(),
            new_location: request.target.clone(),
            registry_backup: backup_path_for(&request.registry_path),
            manifest_backup: backup_path_for(&request.manifest_path),
            warnings,
        })
    }
}

struct Transaction<'a, F> {
    fs: &'a F,
    request: &'a RelocationRequest,
    reporter: &'a mut dyn Reporter,
    registry_touched: bool,
    manifest_touched: bool,
}

impl<F: TransactionFs> Transaction<'_, F> {
    fn advance(&mut self, state: RelocationState) {
        info!(app_id = %self.request.app_id, state = %state, "relocation state");
        self.reporter.transition(state);
    }

    fn apply(&mut self, updates: &PathUpdates) -> Result<(), TransactionError> {
        let request = self.request;
        let registry_path = &request.registry_path;
        let manifest_path = &request.manifest_path;

        self.backup(registry_path)?;
        self.advance(RelocationState::RegistryBackedUp);

        self.registry_touched = true;
        self.rewrite_registry(&updates.install_location)
            .map_err(|reason| TransactionError::RegistryWriteFailed {
                path: registry_path.clone(),
                reason,
            })?;
        self.advance(RelocationState::RegistryUpdated);

        self.backup(manifest_path)?;
        self.advance(RelocationState::ManifestBackedUp);

        self.manifest_touched = true;
        self.rewrite_manifest(updates)
            .map_err(|reason| TransactionError::ManifestWriteFailed {
                path: manifest_path.clone(),
                reason,
            })?;
        self.advance(RelocationState::ManifestUpdated);
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

    // Re-read right before writing: the launcher may have rewritten the file
    // since the catalog was loaded.
    fn rewrite_registry(&self, install_location: &str) -> Result<(), WriteFailure> {
        let path = &self.request.registry_path;
        let mut registry = InstallRegistry::from_json_str(&self.fs.read_to_string(path)?)?;
        if !registry.set_install_location(&self.request.app_id, install_location) {
            return Err(WriteFailure::EntryMissing(self.request.app_id.clone()));
        }
        self.fs
            .write_atomic(path, registry.to_json_string()?.as_bytes())?;
        Ok(())
    }

    fn rewrite_manifest(&self, updates: &PathUpdates) -> Result<(), WriteFailure> {
        let path = &self.request.manifest_path;
        let mut manifest = AppManifest::from_json_str(&self.fs.read_to_string(path)?)?;
        if !same_location(Path::new(manifest.install_location()), &self.request.source) {
            return Err(WriteFailure::Stale(manifest.install_location().to_string()));
        }

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
            .write_atomic(path, manifest.to_json_string()?.as_bytes())?;
        Ok(())
    }

    fn restore(&self, path: &Path) -> std::io::Result<()> {
        let backup = self.fs.read_to_string(&backup_path_for(path))?;
        self.fs.write_atomic(path, backup.as_bytes())
    }

    fn roll_back(mut self, cause: TransactionError) -> RelocationError {
        let request = self.request;
        warn!(app_id = %request.app_id, error = %cause, "relocation failed; rolling back");
        self.advance(RelocationState::RollingBack);

        let mut failures = Vec::new();
        if self.manifest_touched {
            if let Err(err) = self.restore(&request.manifest_path) {
                failures.push(format!(
                    "failed to restore manifest {} from backup: {err}",
                    request.manifest_path.display()
                ));
            }
        }
        if self.registry_touched {
            if let Err(err) = self.restore(&request.registry_path) {
                failures.push(format!(
                    "failed to restore install registry {} from backup: {err}",
                    request.registry_path.display()
                ));
            }
        }

        let payload_location = match self.fs.move_dir(&request.target, &request.source) {
            Ok(()) => request.source.clone(),
            Err(err) => {
                failures.push(format!(
                    "failed to move {} back to {}: {err}",
                    request.target.display(),
                    request.source.display()
                ));
                request.target.clone()
            }
        };

        if failures.is_empty() {
            self.advance(RelocationState::RolledBack);
            return RelocationError::RolledBack(cause);
        }

        error!(
            app_id = %request.app_id,
            payload = %payload_location.display(),
            original = %request.source.display(),
            failures = ?failures,
            "rollback incomplete; manual recovery required"
        );
        self.advance(RelocationState::ManualRecoveryRequired);
        RelocationError::ManualRecoveryRequired {
            payload_location,
            original_location: request.source.clone(),
            cause,
            rollback_failures: failures,
        }
    }
}
