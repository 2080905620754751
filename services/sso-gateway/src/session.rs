//! Signed client-held session cookies
//!
//! The gateway keeps no server-side session. The workspace chosen before
//! the provider redirect and the post-login target both travel in cookies
//! of the form `base64url(json).base64url(hmac)`. The MAC covers the cookie
//! name as well as the payload, so a value minted for one cookie is never
//! accepted as another. Expiry is checked against `issued_at` on every read
//! rather than trusting the browser to honour `Max-Age`.

use std::time::{SystemTime, UNIX_EPOCH};

use axum::http::HeaderMap;
use axum::http::header::COOKIE;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use common::Secret;
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Workspace-binding cookie
pub const WORKSPACE_COOKIE: &str = "workspace";

/// One-shot post-login redirect target cookie
pub const REDIRECT_COOKIE: &str = "wpgwsso_redirect_to";

pub const WORKSPACE_TTL_SECS: u64 = 86_400;
pub const REDIRECT_TTL_SECS: u64 = 120;

/// Tolerated clock skew for `issued_at` in the future
const MAX_FUTURE_SKEW_SECS: u64 = 60;

/// Browser bound to one workspace for the redirect round trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceBinding {
    pub domain: String,
    pub issued_at: u64,
}

/// Where to send the browser after a successful login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectTarget {
    pub target: String,
    pub issued_at: u64,
}

/// Seconds since the unix epoch.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Mints and reads the gateway's signed cookies.
pub struct CookieSigner {
    key: Secret<Vec<u8>>,
    secure: bool,
}

impl CookieSigner {
    pub fn new(secret: &Secret<String>, secure: bool) -> Self {
        Self {
            key: Secret::new(secret.expose().as_bytes().to_vec()),
            secure,
        }
    }

    fn mac(&self, name: &str, payload: &str) -> Option<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.key.expose()).ok()?;
        mac.update(name.as_bytes());
        mac.update(b".");
        mac.update(payload.as_bytes());
        Some(mac)
    }

    fn sign<T: Serialize>(&self, name: &str, payload: &T) -> Option<String> {
        let json = serde_json::to_vec(payload).ok()?;
        let encoded = URL_SAFE_NO_PAD.encode(json);
        let signature = URL_SAFE_NO_PAD.encode(self.mac(name, &encoded)?.finalize().into_bytes());
        Some(format!("{encoded}.{signature}"))
    }

    fn verify<T: DeserializeOwned>(&self, name: &str, value: &str) -> Option<T> {
        let (encoded, signature) = value.split_once('.')?;
        let signature = URL_SAFE_NO_PAD.decode(signature).ok()?;
        self.mac(name, encoded)?.verify_slice(&signature).ok()?;
        let json = URL_SAFE_NO_PAD.decode(encoded).ok()?;
        serde_json::from_slice(&json).ok()
    }

    fn set_cookie(&self, name: &str, value: &str, max_age: u64) -> String {
        let secure = if self.secure { " Secure;" } else { "" };
        format!("{name}={value}; Path=/; HttpOnly;{secure} SameSite=Lax; Max-Age={max_age}")
    }

    /// `Set-Cookie` value binding the browser to `domain`.
    pub fn workspace_cookie(&self, domain: &str, now: u64) -> Option<String> {
        let value = self.sign(
            WORKSPACE_COOKIE,
            &WorkspaceBinding {
                domain: domain.to_owned(),
                issued_at: now,
            },
        )?;
        Some(self.set_cookie(WORKSPACE_COOKIE, &value, WORKSPACE_TTL_SECS))
    }

    /// `Set-Cookie` value stashing a post-login redirect target.
    pub fn redirect_cookie(&self, target: &str, now: u64) -> Option<String> {
        let value = self.sign(
            REDIRECT_COOKIE,
            &RedirectTarget {
                target: target.to_owned(),
                issued_at: now,
            },
        )?;
        Some(self.set_cookie(REDIRECT_COOKIE, &value, REDIRECT_TTL_SECS))
    }

    /// `Set-Cookie` value deleting `name`.
    pub fn clear(&self, name: &str) -> String {
        self.set_cookie(name, "", 0)
    }

    /// Valid, unexpired workspace binding from the request cookies.
    pub fn read_workspace(&self, headers: &HeaderMap, now: u64) -> Option<WorkspaceBinding> {
        let raw = extract_cookie_value(headers, WORKSPACE_COOKIE)?;
        let binding: WorkspaceBinding = self.verify(WORKSPACE_COOKIE, &raw)?;
        fresh(binding.issued_at, WORKSPACE_TTL_SECS, now).then_some(binding)
    }

    /// Valid, unexpired redirect target from the request cookies.
    pub fn read_redirect(&self, headers: &HeaderMap, now: u64) -> Option<RedirectTarget> {
        let raw = extract_cookie_value(headers, REDIRECT_COOKIE)?;
        let target: RedirectTarget = self.verify(REDIRECT_COOKIE, &raw)?;
        fresh(target.issued_at, REDIRECT_TTL_SECS, now).then_some(target)
    }
}

fn fresh(issued_at: u64, ttl: u64, now: u64) -> bool {
    issued_at <= now.saturating_add(MAX_FUTURE_SKEW_SECS) && now < issued_at.saturating_add(ttl)
}

/// Value of cookie `name` from the request's `Cookie` headers.
pub fn extract_cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    for header in headers.get_all(COOKIE) {
        let Ok(raw) = header.to_str() else {
            continue;
        };
        for part in raw.split(';') {
            let Some((key, value)) = part.trim().split_once('=') else {
                continue;
            };
            if key.trim() == name && !value.trim().is_empty() {
                return Some(value.trim().to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const NOW: u64 = 1_760_000_000;

    fn signer() -> CookieSigner {
        CookieSigner::new(&Secret::new("test-secret-test-secret-test-secret".into()), true)
    }

    /// Request headers carrying the value of a `Set-Cookie` string.
    fn request_with(set_cookie: &str) -> HeaderMap {
        let pair = set_cookie.split(';').next().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_str(pair).unwrap());
        headers
    }

    #[test]
    fn workspace_cookie_roundtrips() {
        let signer = signer();
        let cookie = signer.workspace_cookie("example.com", NOW).unwrap();
        assert!(cookie.starts_with("workspace="));
        assert!(cookie.contains("Max-Age=86400"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Secure"));
        assert!(cookie.contains("SameSite=Lax"));

        let binding = signer
            .read_workspace(&request_with(&cookie), NOW + 10)
            .unwrap();
        assert_eq!(binding.domain, "example.com");
        assert_eq!(binding.issued_at, NOW);
    }

    #[test]
    fn expired_cookies_are_ignored() {
        let signer = signer();
        let workspace = signer.workspace_cookie("example.com", NOW).unwrap();
        assert!(
            signer
                .read_workspace(&request_with(&workspace), NOW + WORKSPACE_TTL_SECS)
                .is_none()
        );

        let redirect = signer.redirect_cookie("/wp-admin/", NOW).unwrap();
        assert!(redirect.contains("Max-Age=120"));
        assert!(
            signer
                .read_redirect(&request_with(&redirect), NOW + 119)
                .is_some()
        );
        assert!(
            signer
                .read_redirect(&request_with(&redirect), NOW + 120)
                .is_none()
        );
    }

    #[test]
    fn future_issued_cookie_is_rejected() {
        let signer = signer();
        let cookie = signer.workspace_cookie("example.com", NOW + 3600).unwrap();
        assert!(signer.read_workspace(&request_with(&cookie), NOW).is_none());
    }

    #[test]
    fn tampered_or_foreign_cookie_is_rejected() {
        let signer = signer();
        let cookie = signer.workspace_cookie("example.com", NOW).unwrap();
        let value = cookie
            .split(';')
            .next()
            .unwrap()
            .trim_start_matches("workspace=");
        let (_, signature) = value.split_once('.').unwrap();

        let forged_payload = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(&WorkspaceBinding {
                domain: "evil.com".into(),
                issued_at: NOW,
            })
            .unwrap(),
        );
        let forged = format!("workspace={forged_payload}.{signature}");
        assert!(signer.read_workspace(&request_with(&forged), NOW).is_none());

        // Plain unsigned value as the legacy cookie carried
        assert!(
            signer
                .read_workspace(&request_with("workspace=example.com"), NOW)
                .is_none()
        );

        // Signed with a different secret
        let other = CookieSigner::new(&Secret::new("another-secret".into()), true);
        let cookie = other.workspace_cookie("example.com", NOW).unwrap();
        assert!(signer.read_workspace(&request_with(&cookie), NOW).is_none());
    }

    #[test]
    fn value_is_bound_to_cookie_name() {
        let signer = signer();
        let redirect = signer.redirect_cookie("/x", NOW).unwrap();
        let value = redirect.split(';').next().unwrap().split_once('=').unwrap().1;
        let swapped = format!("workspace={value}");
        assert!(signer.read_workspace(&request_with(&swapped), NOW).is_none());
    }

    #[test]
    fn clear_cookie_expires_immediately() {
        let cleared = signer().clear(REDIRECT_COOKIE);
        assert!(cleared.starts_with("wpgwsso_redirect_to=;"));
        assert!(cleared.contains("Max-Age=0"));
    }

    #[test]
    fn insecure_signer_omits_secure_attribute() {
        let signer = CookieSigner::new(&Secret::new("s".repeat(32)), false);
        let cookie = signer.workspace_cookie("example.com", NOW).unwrap();
        assert!(!cookie.contains("Secure"));
    }

    #[test]
    fn extract_cookie_value_finds_named_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("a=1; workspace=abc.def; b="),
        );
        assert_eq!(
            extract_cookie_value(&headers, "workspace").as_deref(),
            Some("abc.def")
        );
        assert_eq!(extract_cookie_value(&headers, "a").as_deref(), Some("1"));
        assert!(extract_cookie_value(&headers, "b").is_none());
        assert!(extract_cookie_value(&headers, "missing").is_none());
    }
}
