mod document;
mod error;
mod manifest;
mod paths;
mod registry;

pub use document::{JsonStyle, LineEnding};
pub use error::DocumentError;
pub use manifest::AppManifest;
pub use paths::{is_sub_path, normalize_lexically, rebase, same_location};
pub use registry::{InstallRegistry, RegistryEntry};

#[cfg(test)]
mod tests;
