use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use egmove_core::{is_sub_path, normalize_lexically, InstallRegistry};
use egmove_inventory::Catalog;
use egmove_relocator::{
    current_unix_timestamp, part_path_for, DestinationIssue, LocationField, SourceIssue,
    ValidationError,
};
use tracing::{info, warn};

use crate::archive::{
    ArchiveCompression, ArchiveWriter, BackupMetadata, EntryKind, ExternalEntry,
    BACKUP_FORMAT_VERSION, EXTERNAL_DIR, MANIFEST_DIR, METADATA_ENTRY, PAYLOAD_DIR,
};
use crate::BackupError;

#[derive(Debug, Clone, PartialEq)]
pub struct BackupOutcome {
    pub app_id: String,
    pub archive: PathBuf,
    pub compression: ArchiveCompression,
    pub external: Vec<ExternalEntry>,
    /// Out-of-tree paths named by the manifest that did not exist.
    pub missing: Vec<(LocationField, String)>,
}

/// Writes the install directory, the `.item` manifest, the registry entry and
/// any manifest paths outside the install tree to a new archive at `archive`.
///
/// Launcher files are only read. The archive appears under its final name
/// once it is complete.
pub fn create_backup(
    catalog: &Catalog,
    app_id: &str,
    archive: &Path,
    compression: ArchiveCompression,
) -> Result<BackupOutcome, BackupError> {
    let record = catalog
        .record(app_id)
        .ok_or_else(|| ValidationError::NotFound {
            app_id: app_id.to_string(),
        })?;
    let not_registered = || ValidationError::NotRegistered {
        app_id: app_id.to_string(),
    };
    if catalog.registry_entry(app_id).is_none() {
        return Err(not_registered().into());
    }

    let manifest = &record.manifest;
    let source = PathBuf::from(manifest.install_location());
    let source_issue = |issue| ValidationError::InvalidSource {
        app_id: app_id.to_string(),
        path: source.clone(),
        issue,
    };
    if normalize_lexically(&source).file_name().is_none() {
        return Err(source_issue(SourceIssue::NoFinalComponent).into());
    }
    match fs::metadata(&source) {
        Ok(metadata) if metadata.is_dir() => {}
        Ok(_) => return Err(source_issue(SourceIssue::NotADirectory).into()),
        Err(_) => return Err(source_issue(SourceIssue::Missing).into()),
    }

    validate_archive_path(&source, archive)?;

    let registry_path = catalog.registry_path();
    let unreadable = |path: &Path, error| BackupError::SourceUnreadable {
        path: path.to_path_buf(),
        error,
    };
    let raw = fs::read_to_string(registry_path).map_err(|err| unreadable(registry_path, err))?;
    let registry = InstallRegistry::from_json_str(&raw).map_err(|err| {
        unreadable(
            registry_path,
            io::Error::new(io::ErrorKind::InvalidData, err),
        )
    })?;
    let registry_entry = registry
        .entry_document(app_id)
        .cloned()
        .ok_or_else(not_registered)?;

    let manifest_raw =
        fs::read(&record.path).map_err(|err| unreadable(record.path.as_path(), err))?;
    let Some(manifest_file) = record
        .path
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
    else {
        return Err(unreadable(
            record.path.as_path(),
            io::Error::new(io::ErrorKind::InvalidInput, "manifest file name is not unicode"),
        ));
    };

    let mut external = Vec::new();
    let mut missing = Vec::new();
    for (field, value) in [
        (LocationField::ManifestLocation, manifest.manifest_location()),
        (LocationField::StagingLocation, manifest.staging_location()),
    ] {
        let Some(value) = value else {
            continue;
        };
        if is_sub_path(&source, Path::new(value)) {
            continue;
        }
        match fs::symlink_metadata(value) {
            Ok(metadata) => external.push(ExternalEntry {
                field,
                path: value.to_string(),
                name: field.as_str().to_string(),
                kind: if metadata.is_dir() {
                    EntryKind::Directory
                } else {
                    EntryKind::File
                },
            }),
            Err(_) => {
                warn!(
                    app_id = %app_id,
                    field = %field,
                    path = %value,
                    "path outside install tree is missing; not archived"
                );
                missing.push((field, value.to_string()));
            }
        }
    }

    let created_at_unix = current_unix_timestamp().unwrap_or_default();
    let metadata = BackupMetadata {
        version: BACKUP_FORMAT_VERSION,
        app_id: app_id.to_string(),
        display_name: manifest.display_name().to_string(),
        install_location: manifest.install_location().to_string(),
        manifest_file,
        registry_entry,
        external,
        created_at_unix,
    };

    info!(
        app_id = %app_id,
        archive = %archive.display(),
        compression = %compression,
        "writing backup archive"
    );
    let part_path = part_path_for(archive);
    let result = (|| -> io::Result<()> {
        let mut writer = ArchiveWriter::create(&part_path, compression, created_at_unix)?;
        writer.append_bytes(METADATA_ENTRY, &serde_json::to_vec_pretty(&metadata)?)?;
        writer.append_bytes(
            &format!("{MANIFEST_DIR}/{}", metadata.manifest_file),
            &manifest_raw,
        )?;
        writer.append_dir_all(PAYLOAD_DIR, &source)?;
        for entry in &metadata.external {
            let name = format!("{EXTERNAL_DIR}/{}", entry.name);
            match entry.kind {
                EntryKind::Directory => writer.append_dir_all(&name, Path::new(&entry.path))?,
                EntryKind::File => writer.append_file(&name, Path::new(&entry.path))?,
            }
        }
        writer.finish()?;
        fs::rename(&part_path, archive)
    })();

    if let Err(error) = result {
        let _ = fs::remove_file(&part_path);
        return Err(BackupError::ArchiveWrite {
            path: archive.to_path_buf(),
            error,
        });
    }

    Ok(BackupOutcome {
        app_id: app_id.to_string(),
        archive: archive.to_path_buf(),
        compression,
        external: metadata.external,
        missing,
    })
}

fn validate_archive_path(source: &Path, archive: &Path) -> Result<(), BackupError> {
    let invalid = |path: &Path, issue| ValidationError::InvalidDestination {
        path: path.to_path_buf(),
        issue,
    };
    if !archive.is_absolute() {
        return Err(invalid(archive, DestinationIssue::NotAbsolute).into());
    }
    if fs::symlink_metadata(archive).is_ok() {
        return Err(BackupError::ArchiveExists(archive.to_path_buf()));
    }
    if is_sub_path(source, archive) {
        return Err(invalid(archive, DestinationIssue::InsideSource).into());
    }

    let parent = normalize_lexically(archive)
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    match fs::metadata(&parent) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(invalid(&parent, DestinationIssue::NotADirectory).into()),
        Err(_) => Err(invalid(&parent, DestinationIssue::Missing).into()),
    }
}
