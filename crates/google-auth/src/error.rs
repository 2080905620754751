//! Error types for Google OAuth operations

/// Errors from Google OAuth operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("identity token rejected: {0}")]
    InvalidIdToken(String),

    #[error("userinfo request failed: {0}")]
    UserInfo(String),

    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
