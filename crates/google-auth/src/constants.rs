//! Google OAuth 2.0 / OpenID Connect constants
//!
//! Public endpoint locations. Per-workspace client ids and secrets are not
//! here; they live encrypted in the settings store.

/// Browser-facing authorization endpoint
pub const AUTHORIZE_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";

/// Token endpoint for authorization-code exchange
pub const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";

/// Provider-side identity token verification
pub const TOKENINFO_ENDPOINT: &str = "https://oauth2.googleapis.com/tokeninfo";

/// OpenID Connect userinfo endpoint
pub const USERINFO_ENDPOINT: &str = "https://openidconnect.googleapis.com/v1/userinfo";

/// Scopes requested for every workspace.
pub const SCOPES: &str = "openid email profile";

/// `iss` values Google puts in identity tokens.
pub const GOOGLE_ISSUERS: [&str; 2] = ["https://accounts.google.com", "accounts.google.com"];
