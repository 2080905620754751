//! Anti-forgery tokens for admin writes
//!
//! Token format: `expires_at.base64url(HMAC-SHA256(secret, action ‖ "." ‖ expires_at))`.
//! Tokens are stateless and bound to one action identifier.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use common::Secret;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Action identifier for settings saves
pub const SAVE_ACTION: &str = "wpgwsso_save_ajax_action";

/// Token lifetime
pub const TOKEN_TTL_SECS: u64 = 12 * 60 * 60;

/// Issues and checks anti-forgery tokens.
pub struct CsrfGuard {
    key: Secret<Vec<u8>>,
}

impl CsrfGuard {
    pub fn new(secret: &Secret<String>) -> Self {
        Self {
            key: Secret::new(secret.expose().as_bytes().to_vec()),
        }
    }

    fn mac(&self, action: &str, expires_at: &str) -> Option<HmacSha256> {
        // Separate key space from the session cookies
        let mut mac = HmacSha256::new_from_slice(self.key.expose()).ok()?;
        mac.update(b"csrf:");
        mac.update(action.as_bytes());
        mac.update(b".");
        mac.update(expires_at.as_bytes());
        Some(mac)
    }

    /// Issue a token for `action` valid until `now + TOKEN_TTL_SECS`.
    pub fn issue(&self, action: &str, now: u64) -> Option<String> {
        let expires_at = now.saturating_add(TOKEN_TTL_SECS).to_string();
        let signature = URL_SAFE_NO_PAD.encode(self.mac(action, &expires_at)?.finalize().into_bytes());
        Some(format!("{expires_at}.{signature}"))
    }

    /// Whether `token` was issued for `action` and has not expired.
    pub fn verify(&self, action: &str, token: &str, now: u64) -> bool {
        let Some((expires_raw, signature)) = token.trim().split_once('.') else {
            return false;
        };
        let Ok(expires_at) = expires_raw.parse::<u64>() else {
            return false;
        };
        if expires_at <= now || expires_at > now.saturating_add(TOKEN_TTL_SECS) {
            return false;
        }
        let Ok(signature) = URL_SAFE_NO_PAD.decode(signature) else {
            return false;
        };
        match self.mac(action, expires_raw) {
            Some(mac) => mac.verify_slice(&signature).is_ok(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: u64 = 1_760_000_000;

    fn guard() -> CsrfGuard {
        CsrfGuard::new(&Secret::new("csrf-test-secret-csrf-test-secret".into()))
    }

    #[test]
    fn issued_token_verifies_for_its_action() {
        let guard = guard();
        let token = guard.issue(SAVE_ACTION, NOW).unwrap();
        assert!(guard.verify(SAVE_ACTION, &token, NOW));
        assert!(guard.verify(SAVE_ACTION, &token, NOW + TOKEN_TTL_SECS - 1));
    }

    #[test]
    fn token_is_bound_to_action() {
        let guard = guard();
        let token = guard.issue(SAVE_ACTION, NOW).unwrap();
        assert!(!guard.verify("some_other_action", &token, NOW));
    }

    #[test]
    fn expired_token_is_rejected() {
        let guard = guard();
        let token = guard.issue(SAVE_ACTION, NOW).unwrap();
        assert!(!guard.verify(SAVE_ACTION, &token, NOW + TOKEN_TTL_SECS));
    }

    #[test]
    fn extended_expiry_is_rejected() {
        let guard = guard();
        let token = guard.issue(SAVE_ACTION, NOW).unwrap();
        let (_, signature) = token.split_once('.').unwrap();
        let extended = format!("{}.{signature}", NOW + 10 * TOKEN_TTL_SECS);
        assert!(!guard.verify(SAVE_ACTION, &extended, NOW));
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        let guard = guard();
        for token in ["", "abc", "123.", ".sig", "notanumber.sig", "99999999999.!!!"] {
            assert!(!guard.verify(SAVE_ACTION, token, NOW), "{token:?}");
        }
    }

    #[test]
    fn token_from_another_secret_is_rejected() {
        let other = CsrfGuard::new(&Secret::new("another-secret".into()));
        let token = other.issue(SAVE_ACTION, NOW).unwrap();
        assert!(!guard().verify(SAVE_ACTION, &token, NOW));
    }
}
