use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use egmove_core::{AppManifest, InstallRegistry, RegistryEntry};
use tracing::{debug, warn};

use crate::{DiscoveryError, LauncherPaths, MANIFEST_EXTENSION};

#[derive(Debug, Clone, PartialEq)]
pub struct ManifestRecord {
    pub manifest: AppManifest,
    pub path: PathBuf,
}

/// A manifest file left out of the catalog because it could not be read or parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedManifest {
    pub path: PathBuf,
    pub reason: String,
}

/// In-memory view of the installed applications at load time.
///
/// Built by [`load_catalog`] and passed by reference to planning; nothing in it
/// is refreshed after load.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    registry_path: PathBuf,
    labels: Vec<String>,
    label_to_id: HashMap<String, String>,
    records: Vec<ManifestRecord>,
    by_id: HashMap<String, usize>,
    registry_entries: HashMap<String, RegistryEntry>,
    skipped: Vec<SkippedManifest>,
}

impl Catalog {
    /// Labels offered for selection, in registry order.
    pub fn list_applications(&self) -> &[String] {
        &self.labels
    }

    pub fn select_application(&self, label: &str) -> Option<&str> {
        self.label_to_id.get(label).map(String::as_str)
    }

    /// Accepts either a label or a bare application id.
    pub fn resolve_selector(&self, selector: &str) -> Option<&str> {
        if let Some(app_id) = self.select_application(selector) {
            return Some(app_id);
        }
        self.by_id
            .get_key_value(selector)
            .map(|(app_id, _)| app_id.as_str())
    }

    pub fn label_for(&self, app_id: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|label| self.select_application(label) == Some(app_id))
            .map(String::as_str)
    }

    pub fn manifest(&self, app_id: &str) -> Option<&AppManifest> {
        self.record(app_id).map(|record| &record.manifest)
    }

    pub fn manifest_path(&self, app_id: &str) -> Option<&Path> {
        self.record(app_id).map(|record| record.path.as_path())
    }

    pub fn record(&self, app_id: &str) -> Option<&ManifestRecord> {
        self.by_id.get(app_id).map(|index| &self.records[*index])
    }

    /// Every manifest found on disk, including ones without a registry entry.
    pub fn manifests(&self) -> &[ManifestRecord] {
        &self.records
    }

    /// The install registry's entry for `app_id` as loaded; the first one wins
    /// when the registry repeats an id.
    pub fn registry_entry(&self, app_id: &str) -> Option<&RegistryEntry> {
        self.registry_entries.get(app_id)
    }

    pub fn registry_path(&self) -> &Path {
        &self.registry_path
    }

    pub fn skipped(&self) -> &[SkippedManifest] {
        &self.skipped
    }
}

pub fn load_catalog(paths: &LauncherPaths) -> Result<Catalog, DiscoveryError> {
    let registry_path = paths.registry_path();
    let raw = fs::read_to_string(registry_path).map_err(|error| {
        DiscoveryError::RegistryUnreadable {
            path: registry_path.to_path_buf(),
            error,
        }
    })?;
    let registry = InstallRegistry::from_json_str(&raw).map_err(|error| {
        DiscoveryError::RegistryMalformed {
            path: registry_path.to_path_buf(),
            error,
        }
    })?;

    let (records, skipped) = read_manifest_dir(paths.manifests_dir())?;
    Ok(build_catalog(registry_path, &registry, records, skipped))
}

pub fn build_catalog(
    registry_path: &Path,
    registry: &InstallRegistry,
    records: Vec<ManifestRecord>,
    skipped: Vec<SkippedManifest>,
) -> Catalog {
    let mut by_id = HashMap::new();
    for (index, record) in records.iter().enumerate() {
        let app_id = record.manifest.app_id().to_string();
        if let Some(existing) = by_id.get(&app_id) {
            let existing: &ManifestRecord = &records[*existing];
            warn!(
                app_id = %app_id,
                kept = %existing.path.display(),
                ignored = %record.path.display(),
                "duplicate manifest for application; keeping the first"
            );
            continue;
        }
        by_id.insert(app_id, index);
    }

    let mut labels = Vec::new();
    let mut label_to_id = HashMap::new();
    let mut registry_entries = HashMap::new();
    for entry in registry.entries() {
        registry_entries
            .entry(entry.app_id.clone())
            .or_insert_with(|| entry.clone());
        let Some(index) = by_id.get(&entry.app_id) else {
            debug!(app_id = %entry.app_id, "registry entry has no manifest; not listed");
            continue;
        };
        let label = display_label(records[*index].manifest.display_name(), &entry.app_id);
        if label_to_id.contains_key(&label) {
            warn!(app_id = %entry.app_id, label = %label, "duplicate registry entry; not listed twice");
            continue;
        }
        label_to_id.insert(label.clone(), entry.app_id.clone());
        labels.push(label);
    }

    Catalog {
        registry_path: registry_path.to_path_buf(),
        labels,
        label_to_id,
        records,
        by_id,
        registry_entries,
        skipped,
    }
}

/// The display name alone when it already is the application id, otherwise
/// `"<display name> (<app id>)"`.
pub fn display_label(display_name: &str, app_id: &str) -> String {
    if display_name == app_id {
        display_name.to_string()
    } else {
        format!("{display_name} ({app_id})")
    }
}

fn read_manifest_dir(
    dir: &Path,
) -> Result<(Vec<ManifestRecord>, Vec<SkippedManifest>), DiscoveryError> {
    let unreadable = |error| DiscoveryError::ManifestDirUnreadable {
        path: dir.to_path_buf(),
        error,
    };

    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).map_err(unreadable)? {
        let entry = entry.map_err(unreadable)?;
        let path = entry.path();
        if path.extension().and_then(|value| value.to_str()) != Some(MANIFEST_EXTENSION) {
            continue;
        }
        if !entry.file_type().map_err(unreadable)?.is_file() {
            continue;
        }
        paths.push(path);
    }
    paths.sort();

    let mut records = Vec::new();
    let mut skipped = Vec::new();
    for path in paths {
        match read_manifest(&path) {
            Ok(manifest) => {
                debug!(app_id = %manifest.app_id(), path = %path.display(), "loaded manifest");
                records.push(ManifestRecord { manifest, path });
            }
            Err(reason) => {
                warn!(path = %path.display(), reason = %reason, "skipping unreadable manifest");
                skipped.push(SkippedManifest { path, reason });
            }
        }
    }

    Ok((records, skipped))
}

fn read_manifest(path: &Path) -> Result<AppManifest, String> {
    let raw = fs::read_to_string(path).map_err(|err| format!("read failed: {err}"))?;
    AppManifest::from_json_str(&raw).map_err(|err| err.to_string())
}
