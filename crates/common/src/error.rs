//! Configuration-level error types

use thiserror::Error;

/// Errors raised while loading and validating gateway configuration.
///
/// These are the only conditions allowed to halt startup; request-time
/// failures are reported through typed results instead.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing required secret: {0}")]
    MissingSecret(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result alias using common Error
pub type Result<T> = std::result::Result<T, Error>;
