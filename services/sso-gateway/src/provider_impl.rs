//! Google identity provider
//!
//! Implements the `IdentityProvider` seam on top of the `google-auth`
//! protocol client. Holds one shared `reqwest::Client` whose timeout bounds
//! every back-channel call.

use std::time::Duration;

use google_auth::Endpoints;
use identity::{
    BoxFuture, ClientCredentials, IdTokenClaims, IdentityProvider, ProviderError, TokenSet,
    UserInfo,
};
use tracing::debug;

use crate::error::{Error, Result};

/// Relying party against Google accounts.
pub struct GoogleIdentityProvider {
    client: reqwest::Client,
    endpoints: Endpoints,
}

impl GoogleIdentityProvider {
    /// Build the provider with a client bounded by `timeout`.
    pub fn new(endpoints: Endpoints, timeout: Duration) -> Result<Self> {
        endpoints
            .validate()
            .map_err(|e| Error::Provider(e.to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| Error::HttpClient(e.to_string()))?;
        Ok(Self { client, endpoints })
    }
}

/// Map protocol errors onto the seam's taxonomy.
fn classify(err: google_auth::Error) -> ProviderError {
    match err {
        google_auth::Error::Http(msg) => ProviderError::Request(msg),
        google_auth::Error::TokenExchange(msg) | google_auth::Error::UserInfo(msg) => {
            ProviderError::Rejected(msg)
        }
        google_auth::Error::InvalidIdToken(msg) => ProviderError::InvalidToken(msg),
        google_auth::Error::MalformedResponse(msg) => ProviderError::Malformed(msg),
        google_auth::Error::InvalidEndpoint(msg) => ProviderError::Config(msg),
    }
}

impl IdentityProvider for GoogleIdentityProvider {
    fn id(&self) -> &str {
        "google"
    }

    fn authorization_url(&self, credentials: &ClientCredentials) -> identity::Result<String> {
        if credentials.client_id.is_empty() {
            return Err(ProviderError::Config("empty client id".into()));
        }
        google_auth::build_authorization_url(
            &self.endpoints,
            credentials.client_id.expose(),
            &credentials.redirect_uri,
        )
        .map_err(classify)
    }

    fn exchange_code<'a>(
        &'a self,
        credentials: &'a ClientCredentials,
        code: &'a str,
    ) -> BoxFuture<'a, identity::Result<TokenSet>> {
        Box::pin(async move {
            if credentials.client_id.is_empty() || credentials.client_secret.is_empty() {
                return Err(ProviderError::Config("empty client credentials".into()));
            }
            let response = google_auth::exchange_code(
                &self.client,
                &self.endpoints,
                credentials.client_id.expose(),
                credentials.client_secret.expose(),
                &credentials.redirect_uri,
                code,
            )
            .await
            .map_err(classify)?;

            debug!(
                has_id_token = response.id_token.is_some(),
                "authorization code exchanged"
            );
            Ok(TokenSet {
                access_token: response.access_token.into(),
                id_token: response.id_token,
            })
        })
    }

    fn verify_id_token<'a>(
        &'a self,
        credentials: &'a ClientCredentials,
        id_token: &'a str,
    ) -> BoxFuture<'a, identity::Result<IdTokenClaims>> {
        Box::pin(async move {
            let info = google_auth::verify_id_token(
                &self.client,
                &self.endpoints,
                credentials.client_id.expose(),
                id_token,
            )
            .await
            .map_err(classify)?;
            Ok(IdTokenClaims {
                subject: info.sub,
                issuer: info.iss,
                audience: info.aud,
                email: info.email,
            })
        })
    }

    fn user_info<'a>(&'a self, access_token: &'a str) -> BoxFuture<'a, identity::Result<UserInfo>> {
        Box::pin(async move {
            let info = google_auth::fetch_userinfo(&self.client, &self.endpoints, access_token)
                .await
                .map_err(classify)?;
            Ok(UserInfo {
                email: info.email,
                email_verified: info.email_verified,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Form, Query};
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use common::Secret;
    use std::collections::HashMap;
    use tokio::net::TcpListener;

    fn credentials(id: &str, secret: &str) -> ClientCredentials {
        ClientCredentials {
            client_id: Secret::new(id.into()),
            client_secret: Secret::new(secret.into()),
            redirect_uri: "https://sso.example.com/login/callback".into(),
        }
    }

    async fn start_provider() -> Endpoints {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let app = axum::Router::new()
                .route(
                    "/token",
                    post(|Form(form): Form<HashMap<String, String>>| async move {
                        match form.get("code").map(String::as_str) {
                            Some("good") => (
                                StatusCode::OK,
                                axum::Json(serde_json::json!({
                                    "access_token": "at",
                                    "id_token": "idt",
                                })),
                            ),
                            Some("empty-body") => (StatusCode::OK, axum::Json(serde_json::json!({}))),
                            _ => (
                                StatusCode::BAD_REQUEST,
                                axum::Json(serde_json::json!({"error": "invalid_grant"})),
                            ),
                        }
                    }),
                )
                .route(
                    "/tokeninfo",
                    get(|Query(q): Query<HashMap<String, String>>| async move {
                        if q.get("id_token").map(String::as_str) == Some("idt") {
                            (
                                StatusCode::OK,
                                axum::Json(serde_json::json!({
                                    "aud": "cid",
                                    "iss": "accounts.google.com",
                                    "sub": "42",
                                    "email": "jane@example.com",
                                })),
                            )
                        } else {
                            (
                                StatusCode::BAD_REQUEST,
                                axum::Json(serde_json::json!({"error": "invalid_token"})),
                            )
                        }
                    }),
                )
                .route(
                    "/v1/userinfo",
                    get(|| async {
                        axum::Json(serde_json::json!({
                            "email": "jane@example.com",
                            "email_verified": true,
                        }))
                    }),
                );
            axum::serve(listener, app).await.unwrap();
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        Endpoints::at(&format!("http://{addr}"))
    }

    #[test]
    fn invalid_endpoints_fail_construction() {
        let endpoints = Endpoints {
            authorize: "nope".into(),
            ..Endpoints::default()
        };
        let result = GoogleIdentityProvider::new(endpoints, Duration::from_secs(1));
        assert!(matches!(result, Err(Error::Provider(_))));
    }

    #[test]
    fn authorization_url_uses_decrypted_client_id() {
        let provider =
            GoogleIdentityProvider::new(Endpoints::default(), Duration::from_secs(1)).unwrap();
        let url = provider
            .authorization_url(&credentials("cid-123", "secret"))
            .unwrap();
        assert!(url.starts_with(google_auth::AUTHORIZE_ENDPOINT));
        assert!(url.contains("client_id=cid-123"));

        let err = provider.authorization_url(&credentials("", "secret"));
        assert!(matches!(err, Err(ProviderError::Config(_))));
    }

    #[tokio::test]
    async fn full_exchange_against_mock_provider() {
        let endpoints = start_provider().await;
        let provider = GoogleIdentityProvider::new(endpoints, Duration::from_secs(2)).unwrap();
        let creds = credentials("cid", "secret");

        let tokens = provider.exchange_code(&creds, "good").await.unwrap();
        assert_eq!(tokens.access_token.expose(), "at");
        assert_eq!(tokens.id_token.as_deref(), Some("idt"));

        let claims = provider.verify_id_token(&creds, "idt").await.unwrap();
        assert_eq!(claims.subject, "42");
        assert_eq!(claims.audience, "cid");

        let info = provider.user_info("at").await.unwrap();
        assert_eq!(info.email.as_deref(), Some("jane@example.com"));
        assert!(info.email_verified);
    }

    #[tokio::test]
    async fn provider_errors_are_classified() {
        let endpoints = start_provider().await;
        let provider = GoogleIdentityProvider::new(endpoints, Duration::from_secs(2)).unwrap();
        let creds = credentials("cid", "secret");

        let err = provider.exchange_code(&creds, "bad").await.unwrap_err();
        assert!(matches!(err, ProviderError::Rejected(_)));

        let err = provider.exchange_code(&creds, "empty-body").await.unwrap_err();
        assert!(matches!(err, ProviderError::Malformed(_)));

        let err = provider.verify_id_token(&creds, "forged").await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidToken(_)));

        // Audience mismatch: token was issued to "cid"
        let other = credentials("other-client", "secret");
        let err = provider.verify_id_token(&other, "idt").await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidToken(_)));
    }

    #[tokio::test]
    async fn empty_credentials_never_reach_the_provider() {
        let provider =
            GoogleIdentityProvider::new(Endpoints::default(), Duration::from_secs(1)).unwrap();
        let err = provider
            .exchange_code(&credentials("", ""), "good")
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Config(_)));
    }
}
