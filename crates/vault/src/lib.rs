//! Credential vault for per-workspace OAuth client credentials
//!
//! Client ids and secrets are stored as opaque base64 blobs:
//!
//! ```text
//! base64( HMAC-SHA3-512 tag [64] || IV [16] || AES-256-CBC ciphertext )
//! ```
//!
//! The tag covers `IV || ciphertext` and is verified in constant time before
//! any decryption happens. Keys are generated lazily on first use, persisted
//! into the settings blob, and only then handed out, so nothing is ever
//! encrypted under a key the store has not accepted.
//!
//! Decryption is fail-closed: tampered, truncated or foreign blobs decrypt
//! to `None`, never to garbage that could pass as a credential.

pub mod cipher;
pub mod error;
pub mod vault;

pub use cipher::{HMAC_KEY_LEN, PASSPHRASE_LEN, TAG_LEN, VaultKeys, open, seal};
pub use error::{Error, Result};
pub use vault::{CredentialVault, CryptoVault};
