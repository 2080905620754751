//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The gateway secret (cookie and anti-forgery signing) is loaded from the
//! SSO_GATEWAY_SECRET env var or secret_file, never stored in the TOML
//! directly to avoid leaking secrets.

use common::Secret;
use google_auth::Endpoints;
use identity::User;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Env var holding the gateway signing secret
pub const SECRET_ENV: &str = "SSO_GATEWAY_SECRET";

/// Shortest accepted gateway secret, in bytes
pub const MIN_SECRET_LEN: usize = 32;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub settings: SettingsConfig,
    pub host: HostConfig,
    /// Local user directory
    #[serde(default)]
    pub users: Vec<User>,
}

/// Listener and public-facing settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_admin_listen_addr")]
    pub admin_listen_addr: SocketAddr,
    /// Externally visible base URL, e.g. `https://sso.example.com`
    pub public_url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Path to a file containing the gateway secret (alternative to the env var)
    #[serde(default)]
    pub secret_file: Option<PathBuf>,
    #[serde(skip)]
    pub secret: Option<Secret<String>>,
}

/// Identity provider endpoints and call timeout
#[derive(Debug, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_authorize_endpoint")]
    pub authorize_endpoint: String,
    #[serde(default = "default_token_endpoint")]
    pub token_endpoint: String,
    #[serde(default = "default_tokeninfo_endpoint")]
    pub tokeninfo_endpoint: String,
    #[serde(default = "default_userinfo_endpoint")]
    pub userinfo_endpoint: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Settings store location
#[derive(Debug, Deserialize)]
pub struct SettingsConfig {
    /// JSON settings file. Absent means an in-memory store that does not
    /// survive restarts.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_settings_key")]
    pub key: String,
}

/// Host application integration points
#[derive(Debug, Deserialize)]
pub struct HostConfig {
    /// The host's own login page, used whenever the override steps aside
    pub default_login_url: String,
    /// Landing page after SSO when no redirect target was stashed
    #[serde(default = "default_after_login_url")]
    pub after_login_url: String,
}

fn default_admin_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9090))
}

fn default_max_connections() -> usize {
    1000
}

fn default_timeout() -> u64 {
    10
}

fn default_authorize_endpoint() -> String {
    google_auth::AUTHORIZE_ENDPOINT.into()
}

fn default_token_endpoint() -> String {
    google_auth::TOKEN_ENDPOINT.into()
}

fn default_tokeninfo_endpoint() -> String {
    google_auth::TOKENINFO_ENDPOINT.into()
}

fn default_userinfo_endpoint() -> String {
    google_auth::USERINFO_ENDPOINT.into()
}

fn default_settings_key() -> String {
    sso_settings::DEFAULT_SETTINGS_KEY.into()
}

fn default_after_login_url() -> String {
    "/".into()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            authorize_endpoint: default_authorize_endpoint(),
            token_endpoint: default_token_endpoint(),
            tokeninfo_endpoint: default_tokeninfo_endpoint(),
            userinfo_endpoint: default_userinfo_endpoint(),
            timeout_secs: default_timeout(),
        }
    }
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            path: None,
            key: default_settings_key(),
        }
    }
}

impl ServerConfig {
    /// OAuth redirect URI registered with the provider for every workspace.
    pub fn redirect_uri(&self) -> String {
        format!("{}/login/callback", self.public_url.trim_end_matches('/'))
    }

    /// Whether cookies should carry the `Secure` attribute.
    pub fn secure_cookies(&self) -> bool {
        self.public_url.starts_with("https://")
    }
}

impl ProviderConfig {
    pub fn endpoints(&self) -> Endpoints {
        Endpoints {
            authorize: self.authorize_endpoint.clone(),
            token: self.token_endpoint.clone(),
            tokeninfo: self.tokeninfo_endpoint.clone(),
            userinfo: self.userinfo_endpoint.clone(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Gateway secret resolution order:
    /// 1. SSO_GATEWAY_SECRET env var
    /// 2. secret_file path from config
    ///
    /// A missing or short secret is an error: the gateway cannot sign
    /// cookies or anti-forgery tokens without one.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if !config.server.public_url.starts_with("http://")
            && !config.server.public_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "public_url must start with http:// or https://, got: {}",
                config.server.public_url
            )));
        }

        if config.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if config.provider.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        config
            .provider
            .endpoints()
            .validate()
            .map_err(|e| common::Error::Config(e.to_string()))?;

        if config.settings.key.trim().is_empty() {
            return Err(common::Error::Config("settings key must not be empty".into()));
        }

        if config.host.default_login_url.trim().is_empty() {
            return Err(common::Error::Config(
                "default_login_url must not be empty".into(),
            ));
        }

        // Resolve secret: env var takes precedence over file
        if let Ok(secret) = std::env::var(SECRET_ENV) {
            config.server.secret = Some(Secret::new(secret));
        } else if let Some(ref secret_file) = config.server.secret_file {
            let secret = std::fs::read_to_string(secret_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read secret_file {}: {e}",
                    secret_file.display()
                ))
            })?;
            let secret = secret.trim().to_owned();
            if !secret.is_empty() {
                config.server.secret = Some(Secret::new(secret));
            }
        }

        match config.server.secret {
            None => return Err(common::Error::MissingSecret(SECRET_ENV)),
            Some(ref secret) if secret.expose().len() < MIN_SECRET_LEN => {
                return Err(common::Error::Config(format!(
                    "gateway secret must be at least {MIN_SECRET_LEN} bytes"
                )));
            }
            Some(_) => {}
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("workspace-sso-gateway.toml")
    }
}
