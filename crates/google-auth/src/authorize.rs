//! Endpoint set and authorization URL construction

use reqwest::Url;

use crate::constants::{
    AUTHORIZE_ENDPOINT, SCOPES, TOKEN_ENDPOINT, TOKENINFO_ENDPOINT, USERINFO_ENDPOINT,
};
use crate::error::{Error, Result};

/// Provider endpoint locations.
///
/// Defaults to Google's production endpoints. Tests point these at an
/// in-process mock server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub authorize: String,
    pub token: String,
    pub tokeninfo: String,
    pub userinfo: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            authorize: AUTHORIZE_ENDPOINT.into(),
            token: TOKEN_ENDPOINT.into(),
            tokeninfo: TOKENINFO_ENDPOINT.into(),
            userinfo: USERINFO_ENDPOINT.into(),
        }
    }
}

impl Endpoints {
    /// All endpoints at `base` (e.g. `http://127.0.0.1:PORT`) under the
    /// same paths a mock provider serves.
    pub fn at(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            authorize: format!("{base}/o/oauth2/v2/auth"),
            token: format!("{base}/token"),
            tokeninfo: format!("{base}/tokeninfo"),
            userinfo: format!("{base}/v1/userinfo"),
        }
    }

    /// Check every endpoint parses as an absolute http(s) URL.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("authorize", &self.authorize),
            ("token", &self.token),
            ("tokeninfo", &self.tokeninfo),
            ("userinfo", &self.userinfo),
        ] {
            let url = Url::parse(value)
                .map_err(|e| Error::InvalidEndpoint(format!("{name} endpoint '{value}': {e}")))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(Error::InvalidEndpoint(format!(
                    "{name} endpoint '{value}' must be http or https"
                )));
            }
        }
        Ok(())
    }
}

/// Build the authorization URL the browser is redirected to.
///
/// Requests an authorization code for `openid email profile`, online access
/// only, and always shows the account chooser so a user signed into several
/// Google accounts can pick the one in the selected workspace.
pub fn build_authorization_url(
    endpoints: &Endpoints,
    client_id: &str,
    redirect_uri: &str,
) -> Result<String> {
    let url = Url::parse_with_params(
        &endpoints.authorize,
        &[
            ("response_type", "code"),
            ("client_id", client_id),
            ("redirect_uri", redirect_uri),
            ("scope", SCOPES),
            ("access_type", "online"),
            ("prompt", "select_account"),
        ],
    )
    .map_err(|e| Error::InvalidEndpoint(format!("authorize endpoint: {e}")))?;
    Ok(url.into())
}
