//! Error types for vault operations

/// Errors from vault operations.
///
/// Decryption never produces an error; it yields `None` instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("vault keys could not be persisted")]
    KeyPersistence,

    #[error("stored vault key {0} is not valid key material")]
    CorruptKey(&'static str),

    #[error("cipher failure: {0}")]
    Cipher(String),
}

/// Result alias for vault operations.
pub type Result<T> = std::result::Result<T, Error>;
