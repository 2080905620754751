//! Bridge between the settings singleton and the key-value store

use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::model::{GlobalSettings, WorkspaceCredential};
use crate::store::SettingsStore;

/// Settings identifier used when none is configured.
pub const DEFAULT_SETTINGS_KEY: &str = "wpgwsso_settings";

/// Reads and writes the settings blob under one fixed key.
#[derive(Clone)]
pub struct SettingsGateway {
    store: Arc<dyn SettingsStore>,
    key: String,
}

impl SettingsGateway {
    pub fn new(store: Arc<dyn SettingsStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Load the settings blob.
    ///
    /// Each known field is read on its own on top of the defaults, so one
    /// unreadable field never discards the others. Anything that could not
    /// be read is reported as `Loaded::Partial`, and callers must not write
    /// that copy back over the stored blob.
    pub async fn load(&self) -> Loaded {
        match self.store.get(&self.key).await {
            Ok(Some(value)) => {
                let (settings, unreadable) = parse_settings(value);
                if unreadable.is_empty() {
                    Loaded::Intact(settings)
                } else {
                    warn!(
                        key = self.key,
                        fields = ?unreadable,
                        "settings blob has unreadable fields"
                    );
                    Loaded::Partial(settings)
                }
            }
            Ok(None) => Loaded::Intact(GlobalSettings::default()),
            Err(e) => {
                warn!(key = self.key, error = %e, "settings store read failed");
                Loaded::Unavailable
            }
        }
    }

    /// Persist the settings blob. Returns whether the store accepted it.
    pub async fn save(&self, settings: &GlobalSettings) -> bool {
        let value = match serde_json::to_value(settings) {
            Ok(v) => v,
            Err(e) => {
                warn!(key = self.key, error = %e, "failed to serialize settings");
                return false;
            }
        };
        match self.store.set(&self.key, value).await {
            Ok(true) => true,
            Ok(false) => {
                warn!(key = self.key, "settings store declined write");
                false
            }
            Err(e) => {
                warn!(key = self.key, error = %e, "settings store write failed");
                false
            }
        }
    }
}

/// Outcome of reading the settings blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Loaded {
    /// Absent, or every known field parsed
    Intact(GlobalSettings),
    /// Some fields could not be read; the rest are returned
    Partial(GlobalSettings),
    /// The store itself could not be read
    Unavailable,
}

impl Loaded {
    /// The settings read, or defaults when the store was unavailable.
    pub fn into_settings(self) -> GlobalSettings {
        match self {
            Loaded::Intact(settings) | Loaded::Partial(settings) => settings,
            Loaded::Unavailable => GlobalSettings::default(),
        }
    }
}

/// Read a stored blob field by field. Returns the settings and the names of
/// fields that could not be read.
fn parse_settings(value: Value) -> (GlobalSettings, Vec<String>) {
    let mut settings = GlobalSettings::default();
    let mut unreadable = Vec::new();

    let Value::Object(mut fields) = value else {
        unreadable.push("<root>".to_owned());
        return (settings, unreadable);
    };

    if let Some(active) = fields.remove("active") {
        settings.active = truthy(&active);
    }
    for (name, slot) in [
        ("passphrase", &mut settings.passphrase),
        ("hashKey", &mut settings.hash_key),
    ] {
        match fields.remove(name) {
            None | Some(Value::Null) => {}
            Some(Value::String(text)) => *slot = text,
            Some(_) => unreadable.push(name.to_owned()),
        }
    }
    match fields.remove("access") {
        None | Some(Value::Null) => {}
        Some(Value::Object(entries)) => {
            for (domain, entry) in entries {
                match serde_json::from_value::<WorkspaceCredential>(entry) {
                    Ok(credential) => {
                        settings.access.insert(domain, credential);
                    }
                    Err(_) => unreadable.push(format!("access.{domain}")),
                }
            }
        }
        // An empty list is how an emptied map used to be stored
        Some(Value::Array(items)) if items.is_empty() => {}
        Some(_) => unreadable.push("access".to_owned()),
    }

    settings.extra = fields;
    (settings, unreadable)
}

/// Loose truthiness for flags written by older tooling: `1`, `"1"`,
/// `"yes"` and `true` all enable, `0`, `""`, `"0"`, `"false"` and `null`
/// disable.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => {
            let s = s.trim();
            !(s.is_empty()
                || s == "0"
                || s.eq_ignore_ascii_case("false")
                || s.eq_ignore_ascii_case("no")
                || s.eq_ignore_ascii_case("off"))
        }
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
