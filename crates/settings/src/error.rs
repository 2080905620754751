//! Error types for settings storage

/// Errors from the settings store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("settings parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Result alias for settings operations.
pub type Result<T> = std::result::Result<T, Error>;
