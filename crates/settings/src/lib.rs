//! Persisted gateway settings and the workspace registry
//!
//! The whole gateway state lives in one settings blob inside an external
//! key-value store:
//!
//! ```json
//! { "active": true, "passphrase": "<b64>", "hashKey": "<b64>",
//!   "access": { "example.com": { "name": "...", "id": "<blob>", "secret": "<blob>" } } }
//! ```
//!
//! - `store` abstracts the key-value store (`SettingsStore`) with file and
//!   in-memory implementations.
//! - `gateway` reads and writes the blob under a fixed settings key.
//! - `registry` owns the process-wide cached copy (`SettingsContext`) and
//!   exposes workspace lookups and merges through `WorkspaceRegistry`.

pub mod error;
pub mod gateway;
pub mod model;
pub mod registry;
pub mod store;

pub use error::{Error, Result};
pub use gateway::{DEFAULT_SETTINGS_KEY, Loaded, SettingsGateway};
pub use model::{GlobalSettings, SettingsUpdate, WorkspaceCredential};
pub use registry::{SettingsContext, SettingsGuard, SettingsRegistry, WorkspaceRegistry};
pub use store::{JsonFileStore, MemoryStore, SettingsStore};
