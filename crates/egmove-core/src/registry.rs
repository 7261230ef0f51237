use serde_json::Value;

use crate::document::parse_document;
use crate::{DocumentError, JsonStyle};

const INSTALLATION_LIST: &str = "InstallationList";
const APP_NAME: &str = "AppName";
const INSTALL_LOCATION: &str = "InstallLocation";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    pub app_id: String,
    pub install_location: String,
}

/// The launcher's central install list (`LauncherInstalled.dat`).
///
/// The whole document is retained so that a rewrite only touches the
/// `InstallLocation` of one entry; unknown fields and array order pass through.
#[derive(Debug, Clone, PartialEq)]
pub struct InstallRegistry {
    document: Value,
    style: JsonStyle,
}

impl InstallRegistry {
    pub fn from_json_str(raw: &str) -> Result<Self, DocumentError> {
        let (document, style) = parse_document(raw)?;
        let list = document
            .get(INSTALLATION_LIST)
            .and_then(Value::as_array)
            .ok_or_else(|| DocumentError::shape("missing 'InstallationList' array"))?;

        for (index, entry) in list.iter().enumerate() {
            for field in [APP_NAME, INSTALL_LOCATION] {
                if entry.get(field).and_then(Value::as_str).is_none() {
                    return Err(DocumentError::shape(format!(
                        "InstallationList[{index}] is missing string field '{field}'"
                    )));
                }
            }
        }

        Ok(Self { document, style })
    }

    pub fn entries(&self) -> Vec<RegistryEntry> {
        self.list().iter().filter_map(entry_from_value).collect()
    }

    pub fn entry(&self, app_id: &str) -> Option<RegistryEntry> {
        self.list()
            .iter()
            .filter_map(entry_from_value)
            .find(|entry| entry.app_id == app_id)
    }

    /// The first entry for `app_id` as stored, unknown fields included.
    pub fn entry_document(&self, app_id: &str) -> Option<&Value> {
        self.list()
            .iter()
            .find(|entry| entry.get(APP_NAME).and_then(Value::as_str) == Some(app_id))
    }

    /// Appends `entry` to the install list. It must be an object carrying string
    /// `AppName` and `InstallLocation` fields.
    pub fn push_entry(&mut self, entry: Value) -> Result<(), DocumentError> {
        if entry_from_value(&entry).is_none() || !entry.is_object() {
            return Err(DocumentError::shape(
                "install entry needs string 'AppName' and 'InstallLocation' fields",
            ));
        }
        self.document
            .get_mut(INSTALLATION_LIST)
            .and_then(Value::as_array_mut)
            .ok_or_else(|| DocumentError::shape("missing 'InstallationList' array"))?
            .push(entry);
        Ok(())
    }

    /// Points the first entry for `app_id` at `location`. Returns `false` when
    /// no entry matches.
    pub fn set_install_location(&mut self, app_id: &str, location: &str) -> bool {
        let Some(list) = self
            .document
            .get_mut(INSTALLATION_LIST)
            .and_then(Value::as_array_mut)
        else {
            return false;
        };

        for entry in list.iter_mut() {
            if entry.get(APP_NAME).and_then(Value::as_str) != Some(app_id) {
                continue;
            }
            if let Some(object) = entry.as_object_mut() {
                object.insert(
                    INSTALL_LOCATION.to_string(),
                    Value::String(location.to_string()),
                );
                return true;
            }
        }
        false
    }

    pub fn style(&self) -> &JsonStyle {
        &self.style
    }

    pub fn to_json_string(&self) -> Result<String, DocumentError> {
        Ok(self.style.render(&self.document)?)
    }

    fn list(&self) -> &[Value] {
        self.document
            .get(INSTALLATION_LIST)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

fn entry_from_value(value: &Value) -> Option<RegistryEntry> {
    Some(RegistryEntry {
        app_id: value.get(APP_NAME)?.as_str()?.to_string(),
        install_location: value.get(INSTALL_LOCATION)?.as_str()?.to_string(),
    })
}
