//! Settings singleton and workspace registry
//!
//! `SettingsContext` is the single owner of the cached `GlobalSettings`. It
//! hydrates from the store once per process on first access and writes
//! through on every mutation. Every load-modify-persist sequence runs under
//! one tokio Mutex, so concurrent admin saves and first-use key generation
//! cannot interleave lost updates. A failed write rolls the cache back so it
//! never holds state the store does not. A blob that could only be read in
//! part is never written back, so nothing the gateway failed to understand
//! is overwritten.

use std::collections::BTreeMap;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::gateway::{Loaded, SettingsGateway};
use crate::model::{GlobalSettings, SettingsUpdate, WorkspaceCredential};

struct Cache {
    hydrated: bool,
    writable: bool,
    settings: GlobalSettings,
}

/// Process-wide settings owner, shared via `Arc` by every component.
pub struct SettingsContext {
    gateway: SettingsGateway,
    cache: Mutex<Cache>,
}

/// Exclusive access to the hydrated settings.
///
/// Holding the guard blocks every other reader and writer. Changes made
/// through `DerefMut` stay local to the cache until `persist` succeeds.
pub struct SettingsGuard<'a> {
    cache: MutexGuard<'a, Cache>,
    gateway: &'a SettingsGateway,
}

impl SettingsGuard<'_> {
    /// Write the current cached settings through to the store.
    ///
    /// Refused while the stored blob is unavailable or only partly readable.
    pub async fn persist(&self) -> bool {
        if !self.cache.writable {
            warn!(
                key = self.gateway.key(),
                "stored settings could not be fully read, refusing to overwrite them"
            );
            return false;
        }
        self.gateway.save(&self.cache.settings).await
    }
}

impl Deref for SettingsGuard<'_> {
    type Target = GlobalSettings;

    fn deref(&self) -> &GlobalSettings {
        &self.cache.settings
    }
}

impl DerefMut for SettingsGuard<'_> {
    fn deref_mut(&mut self) -> &mut GlobalSettings {
        &mut self.cache.settings
    }
}

impl SettingsContext {
    pub fn new(gateway: SettingsGateway) -> Self {
        Self {
            gateway,
            cache: Mutex::new(Cache {
                hydrated: false,
                writable: false,
                settings: GlobalSettings::default(),
            }),
        }
    }

    /// Lock the settings, hydrating from the store on first use.
    ///
    /// A failed store read leaves defaults in place and is retried on the
    /// next lock.
    pub async fn lock(&self) -> SettingsGuard<'_> {
        let mut cache = self.cache.lock().await;
        if !cache.hydrated {
            let loaded = self.gateway.load().await;
            cache.hydrated = loaded != Loaded::Unavailable;
            cache.writable = matches!(loaded, Loaded::Intact(_));
            cache.settings = loaded.into_settings();
            info!(
                key = self.gateway.key(),
                active = cache.settings.active,
                workspaces = cache.settings.access.len(),
                writable = cache.writable,
                "settings hydrated"
            );
        }
        SettingsGuard {
            cache,
            gateway: &self.gateway,
        }
    }

    /// Clone of the current settings.
    pub async fn snapshot(&self) -> GlobalSettings {
        self.lock().await.clone()
    }

    /// Apply `change` and write through. On a failed write the cache is
    /// restored and `false` returned.
    pub async fn update(&self, change: impl FnOnce(&mut GlobalSettings)) -> bool {
        let mut guard = self.lock().await;
        let previous = guard.clone();
        change(&mut *guard);
        if guard.persist().await {
            true
        } else {
            *guard = previous;
            false
        }
    }
}

/// Boxed future returned by registry operations.
pub type RegistryFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Read/write access to the registered workspaces.
pub trait WorkspaceRegistry: Send + Sync {
    /// Whether the login override is enabled.
    fn is_active(&self) -> RegistryFuture<'_, bool>;

    /// All registered workspaces keyed by domain.
    fn workspaces(&self) -> RegistryFuture<'_, BTreeMap<String, WorkspaceCredential>>;

    /// Exact-match lookup of one workspace.
    fn workspace<'a>(&'a self, domain: &'a str)
    -> RegistryFuture<'a, Option<WorkspaceCredential>>;

    /// Merge a partial update and persist. Returns the persistence result.
    fn upsert(&self, update: SettingsUpdate) -> RegistryFuture<'_, bool>;

    /// Delete one workspace and persist. Returns false when the domain was
    /// unknown or the write failed.
    fn remove<'a>(&'a self, domain: &'a str) -> RegistryFuture<'a, bool>;
}

/// `WorkspaceRegistry` backed by the shared `SettingsContext`.
#[derive(Clone)]
pub struct SettingsRegistry {
    context: Arc<SettingsContext>,
}

impl SettingsRegistry {
    pub fn new(context: Arc<SettingsContext>) -> Self {
        Self { context }
    }
}

impl WorkspaceRegistry for SettingsRegistry {
    fn is_active(&self) -> RegistryFuture<'_, bool> {
        Box::pin(async move { self.context.lock().await.active })
    }

    fn workspaces(&self) -> RegistryFuture<'_, BTreeMap<String, WorkspaceCredential>> {
        Box::pin(async move { self.context.lock().await.access.clone() })
    }

    fn workspace<'a>(
        &'a self,
        domain: &'a str,
    ) -> RegistryFuture<'a, Option<WorkspaceCredential>> {
        Box::pin(async move { self.context.lock().await.workspace(domain).cloned() })
    }

    fn upsert(&self, update: SettingsUpdate) -> RegistryFuture<'_, bool> {
        Box::pin(async move {
            let workspaces = update.access.as_ref().map_or(0, |a| a.len());
            let saved = self.context.update(|settings| settings.apply(update)).await;
            if saved {
                debug!(workspaces, "settings update persisted");
            } else {
                warn!(workspaces, "settings update not persisted");
            }
            saved
        })
    }

    fn remove<'a>(&'a self, domain: &'a str) -> RegistryFuture<'a, bool> {
        Box::pin(async move {
            let mut guard = self.context.lock().await;
            let Some(removed) = guard.access.remove(domain) else {
                return false;
            };
            if guard.persist().await {
                info!(domain, "workspace removed");
                true
            } else {
                guard.access.insert(domain.to_owned(), removed);
                false
            }
        })
    }
}
