use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use egmove_inventory::{default_launcher_paths, LauncherPaths};
use egmove_relocator::{default_state_root, StateLayout};

pub(crate) const ENV_REGISTRY: &str = "EGMOVE_REGISTRY";
pub(crate) const ENV_MANIFESTS_DIR: &str = "EGMOVE_MANIFESTS_DIR";
pub(crate) const ENV_STATE_DIR: &str = "EGMOVE_STATE_DIR";

/// `<state-dir>/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ConfigFile {
    pub(crate) registry_path: Option<PathBuf>,
    pub(crate) manifests_dir: Option<PathBuf>,
    pub(crate) launcher_check: Option<bool>,
}

/// Paths given on the command line.
#[derive(Debug, Clone, Default)]
pub(crate) struct ConfigOverrides {
    pub(crate) registry: Option<PathBuf>,
    pub(crate) manifests_dir: Option<PathBuf>,
    pub(crate) state_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub(crate) struct ResolvedConfig {
    pub(crate) registry_path: Option<PathBuf>,
    pub(crate) manifests_dir: Option<PathBuf>,
    pub(crate) state: StateLayout,
    pub(crate) launcher_check: bool,
}

impl ResolvedConfig {
    pub(crate) fn launcher_paths(&self) -> Result<LauncherPaths> {
        match (&self.registry_path, &self.manifests_dir) {
            (Some(registry), Some(manifests)) => Ok(LauncherPaths::new(registry, manifests)),
            _ => Err(anyhow!(
                "launcher install data location is unknown on this host; pass --registry and --manifests-dir (or set {ENV_REGISTRY} and {ENV_MANIFESTS_DIR})"
            )),
        }
    }
}

pub(crate) fn resolve_config(overrides: &ConfigOverrides) -> Result<ResolvedConfig> {
    resolve_config_with(
        overrides,
        |key| std::env::var_os(key),
        default_launcher_paths(),
        default_state_root,
    )
}

/// Each setting takes the first of: flag, environment, config file, host default.
pub(crate) fn resolve_config_with<E, S>(
    overrides: &ConfigOverrides,
    env: E,
    host_launcher: Option<LauncherPaths>,
    default_state: S,
) -> Result<ResolvedConfig>
where
    E: Fn(&str) -> Option<OsString>,
    S: FnOnce() -> Result<PathBuf>,
{
    let env_path = |key: &str| env(key).filter(|value| !value.is_empty()).map(PathBuf::from);

    let state_root = match overrides
        .state_dir
        .clone()
        .or_else(|| env_path(ENV_STATE_DIR))
    {
        Some(root) => root,
        None => default_state()?,
    };
    let state = StateLayout::new(state_root);
    let file = read_config_file(&state.config_path())?;

    let registry_path = overrides
        .registry
        .clone()
        .or_else(|| env_path(ENV_REGISTRY))
        .or(file.registry_path)
        .or_else(|| {
            host_launcher
                .as_ref()
                .map(|paths| paths.registry_path().to_path_buf())
        });
    let manifests_dir = overrides
        .manifests_dir
        .clone()
        .or_else(|| env_path(ENV_MANIFESTS_DIR))
        .or(file.manifests_dir)
        .or_else(|| {
            host_launcher
                .as_ref()
                .map(|paths| paths.manifests_dir().to_path_buf())
        });

    Ok(ResolvedConfig {
        registry_path,
        manifests_dir,
        state,
        launcher_check: file.launcher_check.unwrap_or(true),
    })
}

pub(crate) fn read_config_file(path: &Path) -> Result<ConfigFile> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(ConfigFile::default()),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read config file: {}", path.display()));
        }
    };
    toml::from_str(&raw).with_context(|| format!("failed parsing config file: {}", path.display()))
}
