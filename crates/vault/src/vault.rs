//! Vault key lifecycle and the `CredentialVault` seam

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use common::Secret;
use sso_settings::SettingsContext;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::cipher::{self, HMAC_KEY_LEN, PASSPHRASE_LEN, VaultKeys};
use crate::error::{Error, Result};

/// Encrypts credentials for storage and decrypts them for use.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn CredentialVault>`).
pub trait CredentialVault: Send + Sync {
    /// Encrypt a credential string into a storable blob.
    ///
    /// Fails only if vault keys had to be generated and could not be
    /// persisted.
    fn encrypt<'a>(
        &'a self,
        plaintext: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;

    /// Decrypt a stored blob. `None` on any integrity or format failure.
    fn decrypt<'a>(
        &'a self,
        blob: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<Secret<String>>> + Send + 'a>>;
}

/// Vault whose keys live in the shared settings blob.
pub struct CryptoVault {
    context: Arc<SettingsContext>,
    keys: OnceCell<VaultKeys>,
}

impl CryptoVault {
    pub fn new(context: Arc<SettingsContext>) -> Self {
        Self {
            context,
            keys: OnceCell::new(),
        }
    }

    /// Current vault keys, generating and persisting them on first use.
    ///
    /// Keys are cached for the life of the process once the store holds
    /// them. A failed persist caches nothing, so the next call retries.
    pub async fn keys(&self) -> Result<&VaultKeys> {
        self.keys.get_or_try_init(|| self.load_or_generate()).await
    }

    /// The 16-byte cipher passphrase.
    pub async fn passphrase(&self) -> Result<[u8; PASSPHRASE_LEN]> {
        Ok(*self.keys().await?.passphrase())
    }

    /// The 64-byte HMAC key.
    pub async fn hmac_key(&self) -> Result<[u8; HMAC_KEY_LEN]> {
        Ok(*self.keys().await?.hmac_key())
    }

    async fn load_or_generate(&self) -> Result<VaultKeys> {
        let mut settings = self.context.lock().await;

        let passphrase = decode_key::<PASSPHRASE_LEN>(&settings.passphrase)
            .map_err(|()| Error::CorruptKey("passphrase"))?;
        let hmac_key = decode_key::<HMAC_KEY_LEN>(&settings.hash_key)
            .map_err(|()| Error::CorruptKey("hashKey"))?;
        if let (Some(passphrase), Some(hmac_key)) = (passphrase, hmac_key) {
            debug!("vault keys loaded from settings");
            return Ok(VaultKeys::new(passphrase, hmac_key));
        }

        let fresh = VaultKeys::generate();
        let keys = VaultKeys::new(
            passphrase.unwrap_or(*fresh.passphrase()),
            hmac_key.unwrap_or(*fresh.hmac_key()),
        );

        let previous = (settings.passphrase.clone(), settings.hash_key.clone());
        settings.passphrase = STANDARD.encode(keys.passphrase());
        settings.hash_key = STANDARD.encode(keys.hmac_key());

        if !settings.persist().await {
            settings.passphrase = previous.0;
            settings.hash_key = previous.1;
            warn!("generated vault keys could not be persisted, discarding them");
            return Err(Error::KeyPersistence);
        }

        info!(
            passphrase_generated = passphrase.is_none(),
            hmac_key_generated = hmac_key.is_none(),
            "vault keys generated and persisted"
        );
        Ok(keys)
    }
}

/// Decode a base64 key of exactly `N` bytes. Absent is `Ok(None)`; present
/// but malformed is an error so it is never replaced by fresh material.
fn decode_key<const N: usize>(encoded: &str) -> std::result::Result<Option<[u8; N]>, ()> {
    if encoded.is_empty() {
        return Ok(None);
    }
    let bytes = STANDARD.decode(encoded).map_err(|_| ())?;
    bytes.try_into().map(Some).map_err(|_| ())
}

impl CredentialVault for CryptoVault {
    fn encrypt<'a>(
        &'a self,
        plaintext: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(async move {
            let keys = self.keys().await?;
            cipher::seal(keys, plaintext)
        })
    }

    fn decrypt<'a>(
        &'a self,
        blob: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<Secret<String>>> + Send + 'a>> {
        Box::pin(async move {
            let keys = match self.keys().await {
                Ok(keys) => keys,
                Err(e) => {
                    warn!(error = %e, "vault keys unavailable, cannot decrypt");
                    return None;
                }
            };
            let Some(bytes) = cipher::open(keys, blob) else {
                debug!("credential blob failed integrity check");
                return None;
            };
            String::from_utf8(bytes).ok().map(Secret::new)
        })
    }
}
