//! Service-specific error types

use thiserror::Error;

/// Gateway startup errors.
///
/// Per-request conditions (rejected logins, bad admin payloads, unreadable
/// credentials) are answered directly as HTTP responses and never propagate
/// as Rust errors. Only these can stop the process from starting.
#[derive(Error, Debug)]
pub enum Error {
    #[error("settings store unavailable: {0}")]
    SettingsStore(#[from] sso_settings::Error),

    #[error("failed to build provider HTTP client: {0}")]
    HttpClient(String),

    #[error("invalid provider configuration: {0}")]
    Provider(String),
}

/// Result alias using service Error
pub type Result<T> = std::result::Result<T, Error>;
