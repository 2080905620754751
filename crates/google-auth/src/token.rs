//! Token exchange, identity token verification, and userinfo
//!
//! The three back-channel calls of the authorization-code flow:
//! 1. Authorization code exchange at the token endpoint
//! 2. Identity token verification at the tokeninfo endpoint (Google checks
//!    the signature and expiry; we check audience and issuer)
//! 3. Profile fetch at the userinfo endpoint with the access token
//!
//! Every call goes through the caller's `reqwest::Client`, which carries the
//! request timeout.

use serde::{Deserialize, Deserializer};
use tracing::debug;

use crate::authorize::Endpoints;
use crate::constants::GOOGLE_ISSUERS;
use crate::error::{Error, Result};

/// Response from the token endpoint.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Present when the `openid` scope was granted
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// Verified identity token claims as reported by tokeninfo.
#[derive(Debug, Deserialize)]
pub struct TokenInfo {
    pub aud: String,
    pub iss: String,
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "flexible_bool")]
    pub email_verified: bool,
}

/// Profile returned by the userinfo endpoint.
#[derive(Debug, Deserialize)]
pub struct UserInfoResponse {
    #[serde(default)]
    pub email: Option<String>,
    /// OIDC name; the legacy v2 endpoint calls it `verified_email`
    #[serde(default, alias = "verified_email", deserialize_with = "flexible_bool")]
    pub email_verified: bool,
}

/// Accept `true` as well as `"true"`; tokeninfo reports booleans as strings.
fn flexible_bool<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flexible {
        Bool(bool),
        Text(String),
    }

    Ok(match Flexible::deserialize(deserializer)? {
        Flexible::Bool(b) => b,
        Flexible::Text(s) => s.eq_ignore_ascii_case("true"),
    })
}

/// Exchange an authorization code for tokens.
pub async fn exchange_code(
    client: &reqwest::Client,
    endpoints: &Endpoints,
    client_id: &str,
    client_secret: &str,
    redirect_uri: &str,
    code: &str,
) -> Result<TokenResponse> {
    let response = client
        .post(&endpoints.token)
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("redirect_uri", redirect_uri),
        ])
        .send()
        .await
        .map_err(|e| Error::Http(format!("token exchange request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(Error::TokenExchange(format!(
            "token endpoint returned {status}: {body}"
        )));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::MalformedResponse(format!("invalid token response: {e}")))
}

/// Have the provider verify `id_token`, then check it was issued to
/// `client_id` by Google.
pub async fn verify_id_token(
    client: &reqwest::Client,
    endpoints: &Endpoints,
    client_id: &str,
    id_token: &str,
) -> Result<TokenInfo> {
    let response = client
        .get(&endpoints.tokeninfo)
        .query(&[("id_token", id_token)])
        .send()
        .await
        .map_err(|e| Error::Http(format!("tokeninfo request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::InvalidIdToken(format!(
            "tokeninfo endpoint returned {status}"
        )));
    }

    let info = response
        .json::<TokenInfo>()
        .await
        .map_err(|e| Error::InvalidIdToken(format!("invalid tokeninfo response: {e}")))?;

    if info.aud != client_id {
        return Err(Error::InvalidIdToken(
            "audience does not match client id".into(),
        ));
    }
    if !GOOGLE_ISSUERS.contains(&info.iss.as_str()) {
        return Err(Error::InvalidIdToken(format!(
            "unexpected issuer '{}'",
            info.iss
        )));
    }

    debug!(sub = info.sub, "identity token verified");
    Ok(info)
}

/// Fetch the user's profile with a bearer access token.
pub async fn fetch_userinfo(
    client: &reqwest::Client,
    endpoints: &Endpoints,
    access_token: &str,
) -> Result<UserInfoResponse> {
    let response = client
        .get(&endpoints.userinfo)
        .bearer_auth(access_token)
        .send()
        .await
        .map_err(|e| Error::Http(format!("userinfo request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::UserInfo(format!(
            "userinfo endpoint returned {status}"
        )));
    }

    response
        .json::<UserInfoResponse>()
        .await
        .map_err(|e| Error::MalformedResponse(format!("invalid userinfo response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Form, Query};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::net::TcpListener;

    const CLIENT_ID: &str = "client-123.apps.googleusercontent.com";

    /// Mock provider: `good-code` and `good-token` succeed, everything else fails.
    async fn start_mock_provider() -> (Endpoints, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let app = axum::Router::new()
                .route(
                    "/token",
                    post(|Form(form): Form<HashMap<String, String>>| async move {
                        if form.get("code").map(String::as_str) == Some("truncated-code") {
                            return (
                                StatusCode::OK,
                                axum::Json(serde_json::json!({"token_type": "Bearer"})),
                            );
                        }
                        let ok = form.get("grant_type").map(String::as_str)
                            == Some("authorization_code")
                            && form.get("code").map(String::as_str) == Some("good-code")
                            && form.get("client_secret").map(String::as_str)
                                == Some("the-secret");
                        if ok {
                            (
                                StatusCode::OK,
                                axum::Json(serde_json::json!({
                                    "access_token": "at-1",
                                    "id_token": "good-token",
                                    "expires_in": 3599,
                                    "token_type": "Bearer",
                                })),
                            )
                        } else {
                            (
                                StatusCode::BAD_REQUEST,
                                axum::Json(serde_json::json!({"error": "invalid_grant"})),
                            )
                        }
                    }),
                )
                .route(
                    "/tokeninfo",
                    get(|Query(q): Query<HashMap<String, String>>| async move {
                        match q.get("id_token").map(String::as_str) {
                            Some("good-token") => (
                                StatusCode::OK,
                                axum::Json(serde_json::json!({
                                    "aud": CLIENT_ID,
                                    "iss": "https://accounts.google.com",
                                    "sub": "1001",
                                    "email": "jane@example.com",
                                    "email_verified": "true",
                                })),
                            ),
                            Some("foreign-token") => (
                                StatusCode::OK,
                                axum::Json(serde_json::json!({
                                    "aud": "someone-else",
                                    "iss": "accounts.google.com",
                                    "sub": "1002",
                                })),
                            ),
                            Some("forged-issuer") => (
                                StatusCode::OK,
                                axum::Json(serde_json::json!({
                                    "aud": CLIENT_ID,
                                    "iss": "https://evil.example",
                                    "sub": "1003",
                                })),
                            ),
                            _ => (
                                StatusCode::BAD_REQUEST,
                                axum::Json(serde_json::json!({"error": "invalid_token"})),
                            ),
                        }
                    }),
                )
                .route(
                    "/v1/userinfo",
                    get(|headers: HeaderMap| async move {
                        let auth = headers
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("");
                        if auth == "Bearer at-1" {
                            (
                                StatusCode::OK,
                                axum::Json(serde_json::json!({
                                    "sub": "1001",
                                    "email": "jane@example.com",
                                    "email_verified": true,
                                })),
                            )
                        } else {
                            (
                                StatusCode::UNAUTHORIZED,
                                axum::Json(serde_json::json!({"error": "invalid_token"})),
                            )
                        }
                    }),
                );
            axum::serve(listener, app).await.unwrap();
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        (Endpoints::at(&format!("http://{addr}")), handle)
    }

    #[test]
    fn token_response_without_id_token_deserializes() {
        let json = r#"{"access_token":"at_abc","expires_in":3600}"#;
        let token: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(token.access_token, "at_abc");
        assert!(token.id_token.is_none());
    }

    #[test]
    fn email_verified_accepts_string_and_bool() {
        let info: TokenInfo =
            serde_json::from_str(r#"{"aud":"a","iss":"i","sub":"s","email_verified":"true"}"#)
                .unwrap();
        assert!(info.email_verified);

        let info: UserInfoResponse =
            serde_json::from_str(r#"{"email":"x@y.com","email_verified":false}"#).unwrap();
        assert!(!info.email_verified);

        let legacy: UserInfoResponse =
            serde_json::from_str(r#"{"email":"x@y.com","verified_email":true}"#).unwrap();
        assert!(legacy.email_verified);

        let missing: UserInfoResponse = serde_json::from_str(r#"{}"#).unwrap();
        assert!(!missing.email_verified);
    }

    #[tokio::test]
    async fn exchange_code_returns_tokens() {
        let (endpoints, _server) = start_mock_provider().await;
        let client = reqwest::Client::new();

        let tokens = exchange_code(
            &client,
            &endpoints,
            CLIENT_ID,
            "the-secret",
            "https://sso.example.com/login/callback",
            "good-code",
        )
        .await
        .unwrap();

        assert_eq!(tokens.access_token, "at-1");
        assert_eq!(tokens.id_token.as_deref(), Some("good-token"));
    }

    #[tokio::test]
    async fn exchange_code_rejects_invalid_code() {
        let (endpoints, _server) = start_mock_provider().await;
        let client = reqwest::Client::new();

        let result = exchange_code(
            &client,
            &endpoints,
            CLIENT_ID,
            "the-secret",
            "https://sso.example.com/login/callback",
            "bad-code",
        )
        .await;

        let err = result.unwrap_err();
        assert!(matches!(err, Error::TokenExchange(_)));
        assert!(err.to_string().contains("400"));
    }

    #[tokio::test]
    async fn exchange_code_reports_unusable_success_body() {
        let (endpoints, _server) = start_mock_provider().await;

        let result = exchange_code(
            &reqwest::Client::new(),
            &endpoints,
            CLIENT_ID,
            "the-secret",
            "https://sso.example.com/login/callback",
            "truncated-code",
        )
        .await;

        assert!(matches!(result, Err(Error::MalformedResponse(_))));
    }

    #[tokio::test]
    async fn verify_id_token_accepts_matching_audience() {
        let (endpoints, _server) = start_mock_provider().await;
        let info = verify_id_token(&reqwest::Client::new(), &endpoints, CLIENT_ID, "good-token")
            .await
            .unwrap();
        assert_eq!(info.sub, "1001");
        assert_eq!(info.email.as_deref(), Some("jane@example.com"));
        assert!(info.email_verified);
    }

    #[tokio::test]
    async fn verify_id_token_rejects_foreign_audience_and_issuer() {
        let (endpoints, _server) = start_mock_provider().await;
        let client = reqwest::Client::new();

        for token in ["foreign-token", "forged-issuer", "garbage"] {
            let result = verify_id_token(&client, &endpoints, CLIENT_ID, token).await;
            assert!(
                matches!(result, Err(Error::InvalidIdToken(_))),
                "{token} must be rejected"
            );
        }
    }

    #[tokio::test]
    async fn fetch_userinfo_sends_bearer_token() {
        let (endpoints, _server) = start_mock_provider().await;
        let client = reqwest::Client::new();

        let info = fetch_userinfo(&client, &endpoints, "at-1").await.unwrap();
        assert_eq!(info.email.as_deref(), Some("jane@example.com"));
        assert!(info.email_verified);

        let result = fetch_userinfo(&client, &endpoints, "wrong").await;
        assert!(matches!(result, Err(Error::UserInfo(_))));
    }

    #[tokio::test]
    async fn slow_provider_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            let app = axum::Router::new().fallback(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                StatusCode::OK
            });
            axum::serve(listener, app).await.unwrap();
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .unwrap();
        let endpoints = Endpoints::at(&format!("http://{addr}"));

        let result = fetch_userinfo(&client, &endpoints, "at-1").await;
        assert!(matches!(result, Err(Error::Http(_))));
    }

    #[tokio::test]
    async fn unreachable_provider_is_an_http_error() {
        // Bind then drop to get a port nothing listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let endpoints = Endpoints::at(&format!("http://{addr}"));
        let result = exchange_code(
            &reqwest::Client::new(),
            &endpoints,
            CLIENT_ID,
            "s",
            "https://sso.example.com/login/callback",
            "good-code",
        )
        .await;
        assert!(matches!(result, Err(Error::Http(_))));
    }
}
