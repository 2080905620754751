//! Identity seams for the workspace SSO gateway
//!
//! Defines the two external collaborators the auth flow talks to: the
//! `IdentityProvider` (OAuth2 relying-party operations against one IdP) and
//! the `UserDirectory` (local user lookup). The gateway only ever holds
//! `Arc<dyn ...>` handles, so tests swap in fakes without a network.

pub mod directory;

pub use directory::StaticDirectory;

use common::Secret;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Role assigned to ordinary shop customers.
pub const CUSTOMER_ROLE: &str = "customer";

/// A local user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub login: String,
    pub email: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl User {
    /// First assigned role, if any.
    pub fn primary_role(&self) -> Option<&str> {
        self.roles.first().map(String::as_str)
    }

    /// Whether the primary role is the default customer role.
    ///
    /// A user with no roles is not a customer.
    pub fn is_customer(&self) -> bool {
        self.primary_role() == Some(CUSTOMER_ROLE)
    }
}

/// Boxed future returned by the seam traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Local user lookup.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn UserDirectory>`).
pub trait UserDirectory: Send + Sync {
    /// Exact email match.
    fn find_by_email<'a>(&'a self, email: &'a str) -> BoxFuture<'a, Option<User>>;

    /// Exact login-name match.
    fn find_by_login<'a>(&'a self, login: &'a str) -> BoxFuture<'a, Option<User>>;
}

/// Decrypted OAuth client credentials for one workspace.
#[derive(Debug, Clone)]
pub struct ClientCredentials {
    pub client_id: Secret<String>,
    pub client_secret: Secret<String>,
    /// Where the provider sends the browser back with `code`
    pub redirect_uri: String,
}

/// Tokens returned by the authorization-code exchange.
#[derive(Debug)]
pub struct TokenSet {
    pub access_token: Secret<String>,
    /// Absent when the provider did not issue an identity token
    pub id_token: Option<String>,
}

/// Claims of an identity token the provider has confirmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdTokenClaims {
    pub subject: String,
    pub issuer: String,
    pub audience: String,
    pub email: Option<String>,
}

/// Profile data from the provider's userinfo endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UserInfo {
    pub email: Option<String>,
    pub email_verified: bool,
}

/// Errors from identity provider operations.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Transport failure, including timeouts
    #[error("provider request failed: {0}")]
    Request(String),

    /// The provider answered with a non-success status
    #[error("provider rejected request: {0}")]
    Rejected(String),

    /// The provider answered 2xx with a body we could not use
    #[error("malformed provider response: {0}")]
    Malformed(String),

    /// Identity token failed verification
    #[error("invalid identity token: {0}")]
    InvalidToken(String),

    /// Credentials or endpoints unusable before any request was made
    #[error("provider configuration error: {0}")]
    Config(String),
}

/// Result alias for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// OAuth2 relying-party operations against one external identity provider.
///
/// Every call that reaches the network is expected to be bounded by a
/// timeout; a timeout surfaces as `ProviderError::Request`.
pub trait IdentityProvider: Send + Sync {
    /// Identifier for logging (e.g. "google")
    fn id(&self) -> &str;

    /// Browser-facing authorization URL for `credentials`.
    fn authorization_url(&self, credentials: &ClientCredentials) -> Result<String>;

    /// Exchange an authorization code for tokens.
    fn exchange_code<'a>(
        &'a self,
        credentials: &'a ClientCredentials,
        code: &'a str,
    ) -> BoxFuture<'a, Result<TokenSet>>;

    /// Have the provider confirm an identity token's signature and claims.
    fn verify_id_token<'a>(
        &'a self,
        credentials: &'a ClientCredentials,
        id_token: &'a str,
    ) -> BoxFuture<'a, Result<IdTokenClaims>>;

    /// Fetch the authenticated user's profile.
    fn user_info<'a>(&'a self, access_token: &'a str) -> BoxFuture<'a, Result<UserInfo>>;
}
