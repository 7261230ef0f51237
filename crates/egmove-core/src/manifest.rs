use serde_json::Value;

use crate::document::parse_document;
use crate::{DocumentError, JsonStyle};

const APP_NAME: &str = "AppName";
const DISPLAY_NAME: &str = "DisplayName";
const INSTALL_LOCATION: &str = "InstallLocation";
const MANIFEST_LOCATION: &str = "ManifestLocation";
const STAGING_LOCATION: &str = "StagingLocation";
const EXPECTING_DLC_INSTALLED: &str = "ExpectingDLCInstalled";

/// One per-application `.item` manifest.
///
/// Typed accessors cover the fields relocation reads; the full document is kept
/// for a faithful rewrite.
#[derive(Debug, Clone, PartialEq)]
pub struct AppManifest {
    app_id: String,
    display_name: String,
    install_location: String,
    manifest_location: Option<String>,
    staging_location: Option<String>,
    expecting_dependents: Vec<String>,
    document: Value,
    style: JsonStyle,
}

impl AppManifest {
    pub fn from_json_str(raw: &str) -> Result<Self, DocumentError> {
        let (document, style) = parse_document(raw)?;
        if !document.is_object() {
            return Err(DocumentError::shape("manifest must be a JSON object"));
        }

        let app_id = required_string(&document, APP_NAME)?;
        let install_location = required_string(&document, INSTALL_LOCATION)?;
        let display_name =
            optional_string(&document, DISPLAY_NAME).unwrap_or_else(|| app_id.clone());
        let manifest_location = optional_string(&document, MANIFEST_LOCATION);
        let staging_location = optional_string(&document, STAGING_LOCATION);
        let expecting_dependents = parse_dependents(document.get(EXPECTING_DLC_INSTALLED))?;

        Ok(Self {
            app_id,
            display_name,
            install_location,
            manifest_location,
            staging_location,
            expecting_dependents,
            document,
            style,
        })
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn install_location(&self) -> &str {
        &self.install_location
    }

    pub fn manifest_location(&self) -> Option<&str> {
        self.manifest_location.as_deref()
    }

    pub fn staging_location(&self) -> Option<&str> {
        self.staging_location.as_deref()
    }

    /// Keys of the `ExpectingDLCInstalled` mapping.
    pub fn expecting_dependents(&self) -> &[String] {
        &self.expecting_dependents
    }

    pub fn has_dependents(&self) -> bool {
        !self.expecting_dependents.is_empty()
    }

    pub fn style(&self) -> &JsonStyle {
        &self.style
    }

    pub fn set_install_location(&mut self, location: &str) {
        self.install_location = location.to_string();
        self.set_field(INSTALL_LOCATION, location);
    }

    pub fn set_manifest_location(&mut self, location: &str) {
        self.manifest_location = Some(location.to_string());
        self.set_field(MANIFEST_LOCATION, location);
    }

    pub fn set_staging_location(&mut self, location: &str) {
        self.staging_location = Some(location.to_string());
        self.set_field(STAGING_LOCATION, location);
    }

    pub fn to_json_string(&self) -> Result<String, DocumentError> {
        Ok(self.style.render(&self.document)?)
    }

    fn set_field(&mut self, field: &str, value: &str) {
        if let Some(object) = self.document.as_object_mut() {
            object.insert(field.to_string(), Value::String(value.to_string()));
        }
    }
}

fn required_string(document: &Value, field: &str) -> Result<String, DocumentError> {
    document
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| DocumentError::shape(format!("missing string field '{field}'")))
}

fn optional_string(document: &Value, field: &str) -> Option<String> {
    document
        .get(field)
        .and_then(Value::as_str)
        .filter(|value| !value.trim().is_empty())
        .map(str::to_string)
}

fn parse_dependents(value: Option<&Value>) -> Result<Vec<String>, DocumentError> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Object(map)) => Ok(map.keys().cloned().collect()),
        Some(Value::Array(items)) => Ok(items
            .iter()
            .map(|item| match item {
                Value::String(value) => value.clone(),
                other => other.to_string(),
            })
            .collect()),
        Some(_) => Err(DocumentError::shape(format!(
            "'{EXPECTING_DLC_INSTALLED}' must be a mapping"
        ))),
    }
}
