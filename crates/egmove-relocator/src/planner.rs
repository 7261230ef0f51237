use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use egmove_core::{is_sub_path, normalize_lexically, rebase, same_location, AppManifest};
use egmove_inventory::Catalog;
use serde::{Deserialize, Serialize};

use crate::{DestinationIssue, SourceIssue, ValidationError};

/// A validated relocation, bound to the catalog state it was planned from.
#[derive(Debug, Clone, PartialEq)]
pub struct RelocationRequest {
    pub app_id: String,
    pub display_name: String,
    pub source: PathBuf,
    pub destination_dir: PathBuf,
    pub target: PathBuf,
    pub manifest: AppManifest,
    pub manifest_path: PathBuf,
    pub registry_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocationField {
    ManifestLocation,
    StagingLocation,
}

impl LocationField {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ManifestLocation => "ManifestLocation",
            Self::StagingLocation => "StagingLocation",
        }
    }
}

impl fmt::Display for LocationField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathUpdate {
    Rebase { from: String, to: String },
    Keep { path: String },
}

/// New values for the manifest's path fields once the payload sits at the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathUpdates {
    pub install_location: String,
    pub manifest_location: Option<PathUpdate>,
    pub staging_location: Option<PathUpdate>,
}

impl PathUpdates {
    pub fn fields(&self) -> impl Iterator<Item = (LocationField, &PathUpdate)> {
        [
            (LocationField::ManifestLocation, self.manifest_location.as_ref()),
            (LocationField::StagingLocation, self.staging_location.as_ref()),
        ]
        .into_iter()
        .filter_map(|(field, update)| update.map(|update| (field, update)))
    }

    /// Fields left pointing outside the install tree.
    pub fn kept(&self) -> impl Iterator<Item = (LocationField, &str)> {
        self.fields().filter_map(|(field, update)| match update {
            PathUpdate::Keep { path } => Some((field, path.as_str())),
            PathUpdate::Rebase { .. } => None,
        })
    }
}

pub fn compute_path_updates(manifest: &AppManifest, source: &Path, target: &Path) -> PathUpdates {
    let decide = |value: Option<&str>| {
        value.map(|path| match rebase(Path::new(path), source, target) {
            Some(rebased) => PathUpdate::Rebase {
                from: path.to_string(),
                to: rebased.to_string_lossy().into_owned(),
            },
            None => PathUpdate::Keep {
                path: path.to_string(),
            },
        })
    };

    PathUpdates {
        install_location: target.to_string_lossy().into_owned(),
        manifest_location: decide(manifest.manifest_location()),
        staging_location: decide(manifest.staging_location()),
    }
}

/// Validates a relocation of `app_id` into `destination` and binds it to a request.
///
/// Reads filesystem metadata but never writes; the same inputs always plan to
/// the same request.
pub fn plan_relocation(
    catalog: &Catalog,
    app_id: &str,
    destination: &Path,
) -> Result<RelocationRequest, ValidationError> {
    let record = catalog
        .record(app_id)
        .ok_or_else(|| ValidationError::NotFound {
            app_id: app_id.to_string(),
        })?;
    let manifest = &record.manifest;

    let entry = catalog
        .registry_entry(app_id)
        .ok_or_else(|| ValidationError::NotRegistered {
            app_id: app_id.to_string(),
        })?;
    if !same_location(
        Path::new(&entry.install_location),
        Path::new(manifest.install_location()),
    ) {
        return Err(ValidationError::RegistryMismatch {
            app_id: app_id.to_string(),
            registry_location: entry.install_location.clone(),
            manifest_location: manifest.install_location().to_string(),
        });
    }

    if manifest.has_dependents() {
        return Err(ValidationError::UnsupportedDependents {
            app_id: app_id.to_string(),
            dependents: manifest.expecting_dependents().to_vec(),
        });
    }

    let source = PathBuf::from(manifest.install_location());
    let sharing = catalog
        .manifests()
        .iter()
        .filter(|other| !std::ptr::eq(*other, record))
        .filter(|other| same_location(Path::new(other.manifest.install_location()), &source))
        .map(|other| other.manifest.app_id().to_string())
        .collect::<Vec<_>>();
    if !sharing.is_empty() {
        return Err(ValidationError::AmbiguousInstallPath {
            app_id: app_id.to_string(),
            install_location: source,
            sharing,
        });
    }

    let source_issue = |issue| ValidationError::InvalidSource {
        app_id: app_id.to_string(),
        path: source.clone(),
        issue,
    };
    let Some(dir_name) = normalize_lexically(&source).file_name().map(ToOwned::to_owned) else {
        return Err(source_issue(SourceIssue::NoFinalComponent));
    };
    match fs::metadata(&source) {
        Ok(metadata) if metadata.is_dir() => {}
        Ok(_) => return Err(source_issue(SourceIssue::NotADirectory)),
        Err(_) => return Err(source_issue(SourceIssue::Missing)),
    }

    let destination_dir = normalize_lexically(destination);
    let invalid_destination = |issue| ValidationError::InvalidDestination {
        path: destination.to_path_buf(),
        issue,
    };
    if !destination.is_absolute() {
        return Err(invalid_destination(DestinationIssue::NotAbsolute));
    }
    if destination.to_str().is_none() {
        return Err(invalid_destination(DestinationIssue::NonUnicode));
    }
    match fs::metadata(&destination_dir) {
        Ok(metadata) if metadata.is_dir() => {}
        Ok(_) => return Err(invalid_destination(DestinationIssue::NotADirectory)),
        Err(_) => return Err(invalid_destination(DestinationIssue::Missing)),
    }
    if is_sub_path(&source, &destination_dir) {
        return Err(invalid_destination(DestinationIssue::InsideSource));
    }
    if normalize_lexically(&source)
        .parent()
        .is_some_and(|parent| same_location(parent, &destination_dir))
    {
        return Err(invalid_destination(DestinationIssue::SameAsCurrentParent));
    }

    let target = destination_dir.join(dir_name);
    if fs::symlink_metadata(&target).is_ok() {
        return Err(invalid_destination(DestinationIssue::TargetExists(target)));
    }

    Ok(RelocationRequest {
        app_id: app_id.to_string(),
        display_name: manifest.display_name().to_string(),
        source,
        destination_dir,
        target,
        manifest: manifest.clone(),
        manifest_path: record.path.clone(),
        registry_path: catalog.registry_path().to_path_buf(),
    })
}
