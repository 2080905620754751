//! Settings blob data model
//!
//! Field names follow the persisted layout so existing settings blobs load
//! unchanged. Missing fields default and unknown fields are carried through
//! to the next write untouched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// OAuth client credentials registered for one workspace domain.
///
/// `id` and `secret` are vault ciphertext blobs (base64). Plaintext never
/// reaches this type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceCredential {
    /// Display name shown in the workspace picker
    #[serde(default)]
    pub name: String,
    /// Encrypted OAuth client id
    #[serde(default)]
    pub id: String,
    /// Encrypted OAuth client secret
    #[serde(default)]
    pub secret: String,
}

/// The process-wide settings singleton.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalSettings {
    /// When false the gateway never overrides the host login
    #[serde(default)]
    pub active: bool,
    /// Base64 cipher passphrase, generated on first vault use
    #[serde(default)]
    pub passphrase: String,
    /// Base64 HMAC key, generated on first vault use
    #[serde(default, rename = "hashKey")]
    pub hash_key: String,
    /// Workspace domain key -> credentials
    #[serde(default)]
    pub access: BTreeMap<String, WorkspaceCredential>,
    /// Fields this gateway does not own
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Partial settings update submitted by the admin API.
///
/// `None` fields leave the cached value untouched. Workspace entries are
/// merged by domain key: entries present replace, entries absent stay.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<BTreeMap<String, WorkspaceCredential>>,
}

impl SettingsUpdate {
    /// True when applying this update would change nothing.
    pub fn is_empty(&self) -> bool {
        self.active.is_none() && self.access.as_ref().is_none_or(|a| a.is_empty())
    }
}

impl GlobalSettings {
    /// Merge a partial update into these settings.
    pub fn apply(&mut self, update: SettingsUpdate) {
        if let Some(active) = update.active {
            self.active = active;
        }
        if let Some(access) = update.access {
            for (domain, credential) in access {
                self.access.insert(domain, credential);
            }
        }
    }

    /// Exact-match lookup of a workspace by domain key.
    pub fn workspace(&self, domain: &str) -> Option<&WorkspaceCredential> {
        self.access.get(domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(tag: &str) -> WorkspaceCredential {
        WorkspaceCredential {
            name: format!("{tag}.com"),
            id: format!("id-{tag}"),
            secret: format!("secret-{tag}"),
        }
    }

    #[test]
    fn deserializes_persisted_layout() {
        let json = r#"{
            "active": true,
            "passphrase": "cGFzcw==",
            "hashKey": "aGFzaA==",
            "loaded": true,
            "access": {
                "example.com": {"name": "Example", "id": "aWQ=", "secret": "c2VjcmV0"}
            }
        }"#;
        let settings: GlobalSettings = serde_json::from_str(json).unwrap();
        assert!(settings.active);
        assert_eq!(settings.hash_key, "aGFzaA==");
        assert_eq!(settings.workspace("example.com").unwrap().name, "Example");
        assert_eq!(settings.extra["loaded"], true);
    }

    #[test]
    fn unknown_fields_survive_serialization() {
        let settings: GlobalSettings =
            serde_json::from_str(r#"{"active": false, "theme": {"color": "blue"}}"#).unwrap();
        let json = serde_json::to_value(&settings).unwrap();
        assert_eq!(json["theme"]["color"], "blue");
        assert_eq!(json["active"], false);
    }

    #[test]
    fn serializes_hash_key_in_camel_case() {
        let settings = GlobalSettings {
            hash_key: "k".into(),
            ..Default::default()
        };
        let json = serde_json::to_value(&settings).unwrap();
        assert_eq!(json["hashKey"], "k");
        assert!(json.get("hash_key").is_none());
    }

    #[test]
    fn empty_blob_yields_defaults() {
        let settings: GlobalSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, GlobalSettings::default());
        assert!(!settings.active);
    }

    #[test]
    fn apply_merges_workspaces_by_key() {
        let mut settings = GlobalSettings::default();
        settings.access.insert("a.com".into(), credential("a"));
        settings.access.insert("b.com".into(), credential("b"));

        let mut access = BTreeMap::new();
        access.insert("a.com".into(), credential("a2"));
        settings.apply(SettingsUpdate {
            active: None,
            access: Some(access),
        });

        assert_eq!(settings.access.len(), 2);
        assert_eq!(settings.access["a.com"], credential("a2"));
        assert_eq!(settings.access["b.com"], credential("b"));
    }

    #[test]
    fn apply_without_access_keeps_workspaces() {
        let mut settings = GlobalSettings::default();
        settings.access.insert("a.com".into(), credential("a"));

        settings.apply(SettingsUpdate {
            active: Some(true),
            access: Some(BTreeMap::new()),
        });
        settings.apply(SettingsUpdate {
            active: Some(true),
            access: None,
        });

        assert!(settings.active);
        assert_eq!(settings.access.len(), 1);
    }

    #[test]
    fn workspace_lookup_is_exact() {
        let mut settings = GlobalSettings::default();
        settings.access.insert("example.com".into(), credential("e"));
        assert!(settings.workspace("example.com").is_some());
        assert!(settings.workspace("Example.com").is_none());
        assert!(settings.workspace("example").is_none());
    }

    #[test]
    fn update_emptiness() {
        assert!(SettingsUpdate::default().is_empty());
        assert!(
            !SettingsUpdate {
                active: Some(false),
                access: None
            }
            .is_empty()
        );
    }
}
