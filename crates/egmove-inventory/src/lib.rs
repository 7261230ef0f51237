mod catalog;
mod error;
mod layout;

pub use catalog::{
    build_catalog, display_label, load_catalog, Catalog, ManifestRecord, SkippedManifest,
};
pub use error::DiscoveryError;
pub use layout::{default_launcher_paths, LauncherPaths, MANIFEST_EXTENSION};

#[cfg(test)]
mod tests;
