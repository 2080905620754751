//! Key-value settings store
//!
//! The gateway treats persistent configuration as a generic key-value store
//! with structured (JSON) values. `JsonFileStore` keeps every key in one JSON
//! object on disk; all writes use atomic temp-file + rename so a crash never
//! leaves a half-written file, and a tokio Mutex serializes writers.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// External settings store.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn SettingsStore>`).
pub trait SettingsStore: Send + Sync {
    /// Read the structured value stored under `key`.
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Value>>;

    /// Replace the value stored under `key`.
    ///
    /// Returns `Ok(false)` when the store declined the write without an
    /// underlying I/O failure.
    fn set<'a>(&'a self, key: &'a str, value: Value) -> StoreFuture<'a, bool>;
}

/// Settings store backed by a single JSON file.
pub struct JsonFileStore {
    path: PathBuf,
    state: Mutex<Map<String, Value>>,
}

impl JsonFileStore {
    /// Open the store at `path`.
    ///
    /// A missing file is created as `{}` so a fresh deployment starts with
    /// no workspaces and the override inactive.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading settings file: {e}")))?;
            let values: Map<String, Value> = serde_json::from_str(&contents)
                .map_err(|e| Error::Parse(format!("parsing settings file: {e}")))?;
            info!(path = %path.display(), keys = values.len(), "loaded settings store");
            values
        } else {
            info!(path = %path.display(), "settings file not found, starting with empty store");
            let values = Map::new();
            write_atomic(&path, &values).await?;
            values
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for JsonFileStore {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Value>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(state.get(key).cloned())
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: Value) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let previous = state.insert(key.to_owned(), value);
            if let Err(e) = write_atomic(&self.path, &state).await {
                // Keep memory in step with disk
                match previous {
                    Some(v) => state.insert(key.to_owned(), v),
                    None => state.remove(key),
                };
                return Err(e);
            }
            debug!(key, "settings value written");
            Ok(true)
        })
    }
}

/// In-memory settings store for tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<Map<String, Value>>,
    reject_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `set` calls report failure.
    pub fn reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    /// Seed a value without going through `set`.
    pub async fn insert(&self, key: &str, value: Value) {
        self.state.lock().await.insert(key.to_owned(), value);
    }
}

impl SettingsStore for MemoryStore {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Value>> {
        Box::pin(async move { Ok(self.state.lock().await.get(key).cloned()) })
    }

    fn set<'a>(&'a self, key: &'a str, value: Value) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            if self.reject_writes.load(Ordering::SeqCst) {
                return Ok(false);
            }
            self.state.lock().await.insert(key.to_owned(), value);
            Ok(true)
        })
    }
}

/// Write the store contents to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. File permissions are 0600 since the file holds the vault keys.
async fn write_atomic(path: &Path, data: &Map<String, Value>) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::Parse(format!("serializing settings: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("settings path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".settings.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp settings file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting settings file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp settings file: {e}")))?;

    debug!(path = %path.display(), "persisted settings");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn values_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let store = JsonFileStore::load(path.clone()).await.unwrap();
        let written = store
            .set("wpgwsso_settings", json!({"active": true}))
            .await
            .unwrap();
        assert!(written);

        let reopened = JsonFileStore::load(path).await.unwrap();
        let value = reopened.get("wpgwsso_settings").await.unwrap().unwrap();
        assert_eq!(value["active"], true);
    }

    #[tokio::test]
    async fn cold_start_creates_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        assert!(!path.exists());
        let store = JsonFileStore::load(path.clone()).await.unwrap();
        assert!(store.get("anything").await.unwrap().is_none());
        assert!(path.exists());

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: Map<String, Value> = serde_json::from_str(&contents).unwrap();
        assert!(parsed.is_empty());
    }

    #[tokio::test]
    async fn corrupt_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        tokio::fs::write(&path, "not json {{").await.unwrap();

        let result = JsonFileStore::load(path).await;
        assert!(matches!(result, Err(Error::Parse(_))));
    }

    #[tokio::test]
    async fn unrelated_keys_are_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let store = JsonFileStore::load(path.clone()).await.unwrap();
        store.set("other_plugin", json!({"x": 1})).await.unwrap();
        store.set("wpgwsso_settings", json!({})).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: Map<String, Value> = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed["other_plugin"]["x"], 1);
        assert!(parsed.contains_key("wpgwsso_settings"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_permissions_are_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let store = JsonFileStore::load(path.clone()).await.unwrap();
        store.set("k", json!(1)).await.unwrap();

        let metadata = tokio::fs::metadata(&path).await.unwrap();
        let mode = metadata.permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "settings file must be 0600, got {mode:o}");
    }

    #[tokio::test]
    async fn memory_store_can_reject_writes() {
        let store = MemoryStore::new();
        assert!(store.set("k", json!(1)).await.unwrap());

        store.reject_writes(true);
        assert!(!store.set("k", json!(2)).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some(json!(1)));
    }

    #[tokio::test]
    async fn concurrent_writes_dont_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let store = std::sync::Arc::new(JsonFileStore::load(path.clone()).await.unwrap());

        let mut handles = vec![];
        for i in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.set(&format!("key-{i}"), json!(i)).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: Map<String, Value> = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed.len(), 10);
    }
}
