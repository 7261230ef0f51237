use std::path::{Path, PathBuf};

pub const MANIFEST_EXTENSION: &str = "item";

const REGISTRY_FILE_NAME: &str = "LauncherInstalled.dat";

/// Where the launcher keeps its install registry and manifest directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LauncherPaths {
    registry_path: PathBuf,
    manifests_dir: PathBuf,
}

impl LauncherPaths {
    pub fn new(registry_path: impl Into<PathBuf>, manifests_dir: impl Into<PathBuf>) -> Self {
        Self {
            registry_path: registry_path.into(),
            manifests_dir: manifests_dir.into(),
        }
    }

    /// Layout used by the launcher under a `ProgramData` root.
    pub fn from_program_data(root: impl AsRef<Path>) -> Self {
        let epic = root.as_ref().join("Epic");
        Self {
            registry_path: epic.join("UnrealEngineLauncher").join(REGISTRY_FILE_NAME),
            manifests_dir: epic.join("EpicGamesLauncher").join("Data").join("Manifests"),
        }
    }

    pub fn registry_path(&self) -> &Path {
        &self.registry_path
    }

    pub fn manifests_dir(&self) -> &Path {
        &self.manifests_dir
    }
}

/// Host default launcher layout. Only Windows hosts have one.
pub fn default_launcher_paths() -> Option<LauncherPaths> {
    if !cfg!(windows) {
        return None;
    }

    let program_data = std::env::var_os("PROGRAMDATA")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(r"C:\ProgramData"));
    Some(LauncherPaths::from_program_data(program_data))
}
