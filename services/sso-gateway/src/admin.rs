//! Admin API for workspace settings
//!
//! Runs on a separate listener (default 127.0.0.1:9090) and is not meant to
//! be exposed publicly. Every write requires an anti-forgery token issued by
//! `GET /admin/settings/token`.
//!
//! Endpoints:
//! - GET    /admin/settings/token       issue an anti-forgery token
//! - GET    /admin/settings             active flag and workspaces (no secrets)
//! - POST   /admin/settings             merge a settings update
//! - DELETE /admin/workspaces/{domain}  remove one workspace (`x-sso-nonce` header)
//!
//! Responses are always JSON `{success, data: {message | error}}`. Nothing
//! fails past this boundary.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderName, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{delete, get};
use serde::Deserialize;
use serde_json::{Value, json};
use sso_settings::{SettingsUpdate, WorkspaceCredential, WorkspaceRegistry};
use sso_vault::CredentialVault;
use tracing::{info, warn};

use crate::csrf::{CsrfGuard, SAVE_ACTION, TOKEN_TTL_SECS};
use crate::metrics;
use crate::picker::escape_attr;
use crate::session::unix_now;

/// Header carrying the anti-forgery token on deletes
pub const NONCE_HEADER: &str = "x-sso-nonce";

/// Shared state for admin API handlers.
#[derive(Clone)]
pub struct AdminState {
    registry: Arc<dyn WorkspaceRegistry>,
    vault: Arc<dyn CredentialVault>,
    csrf: Arc<CsrfGuard>,
}

impl AdminState {
    pub fn new(
        registry: Arc<dyn WorkspaceRegistry>,
        vault: Arc<dyn CredentialVault>,
        csrf: Arc<CsrfGuard>,
    ) -> Self {
        Self {
            registry,
            vault,
            csrf,
        }
    }
}

/// Build the admin router.
pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/settings/token", get(issue_token))
        .route("/admin/settings", get(list_settings).post(save_settings))
        .route("/admin/workspaces/{domain}", delete(delete_workspace))
        .with_state(state)
}

type JsonResponse = (StatusCode, [(HeaderName, &'static str); 1], String);

fn json_response(status: StatusCode, body: Value) -> JsonResponse {
    (status, [(CONTENT_TYPE, "application/json")], body.to_string())
}

fn success(status: StatusCode, message: &str) -> JsonResponse {
    json_response(
        status,
        json!({ "success": true, "data": { "message": message } }),
    )
}

fn failure(status: StatusCode, error: &str) -> JsonResponse {
    json_response(
        status,
        json!({ "success": false, "data": { "error": error } }),
    )
}

/// GET /admin/settings/token
async fn issue_token(State(state): State<AdminState>) -> impl IntoResponse {
    match state.csrf.issue(SAVE_ACTION, unix_now()) {
        Some(token) => json_response(
            StatusCode::OK,
            json!({
                "token": token,
                "action": SAVE_ACTION,
                "expires_in": TOKEN_TTL_SECS,
            }),
        ),
        None => failure(StatusCode::INTERNAL_SERVER_ERROR, "token unavailable"),
    }
}

/// GET /admin/settings
///
/// Reports whether each workspace's stored credentials still decrypt, so an
/// operator can spot entries written under lost vault keys. Neither the
/// plaintext nor the ciphertext leaves the process.
async fn list_settings(State(state): State<AdminState>) -> impl IntoResponse {
    let active = state.registry.is_active().await;
    let mut workspaces = serde_json::Map::new();
    for (domain, workspace) in state.registry.workspaces().await {
        let readable = readable(state.vault.as_ref(), &workspace.id).await
            && readable(state.vault.as_ref(), &workspace.secret).await;
        workspaces.insert(
            domain,
            json!({
                "name": workspace.name,
                "credentials": if readable { "ok" } else { "unreadable" },
            }),
        );
    }
    json_response(
        StatusCode::OK,
        json!({ "active": active, "workspaces": workspaces }),
    )
}

async fn readable(vault: &dyn CredentialVault, blob: &str) -> bool {
    vault.decrypt(blob).await.is_some_and(|s| !s.is_empty())
}

/// Body of a settings save.
///
/// Field names posted by the legacy settings form are accepted as aliases.
#[derive(Debug, Deserialize)]
struct SaveRequest {
    #[serde(default)]
    action: String,
    #[serde(default, alias = "wpgwsso_save_ajax_nonce")]
    nonce: String,
    #[serde(default, alias = "wpgwsso_settings")]
    settings: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct SettingsForm {
    #[serde(default)]
    active: Option<Value>,
    #[serde(default)]
    access: Option<BTreeMap<String, WorkspaceForm>>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkspaceForm {
    #[serde(default)]
    name: String,
    #[serde(default)]
    id: String,
    #[serde(default)]
    secret: String,
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Number(_) => false,
    }
}

/// POST /admin/settings
async fn save_settings(State(state): State<AdminState>, body: Bytes) -> impl IntoResponse {
    let Ok(request) = serde_json::from_slice::<SaveRequest>(&body) else {
        metrics::record_admin_save("rejected");
        return failure(StatusCode::BAD_REQUEST, "Bad Request").into_response();
    };

    if request.action != SAVE_ACTION
        || !state.csrf.verify(SAVE_ACTION, &request.nonce, unix_now())
    {
        warn!("admin save with invalid anti-forgery token");
        metrics::record_admin_save("rejected");
        return failure(StatusCode::BAD_REQUEST, "invalid or expired nonce").into_response();
    }

    let form = match request.settings {
        Some(settings) if !is_blank(&settings) => {
            serde_json::from_value::<SettingsForm>(settings)
        }
        _ => {
            metrics::record_admin_save("rejected");
            return failure(StatusCode::BAD_REQUEST, "Bad Request").into_response();
        }
    };
    let Ok(form) = form else {
        metrics::record_admin_save("rejected");
        return failure(StatusCode::BAD_REQUEST, "Bad Request").into_response();
    };

    // Checkbox semantics: present means on
    let active = form
        .active
        .as_ref()
        .is_some_and(|v| !matches!(v, Value::Null | Value::Bool(false)));

    let mut access = BTreeMap::new();
    for (domain, entry) in form.access.unwrap_or_default() {
        let domain = escape_attr(domain.trim());
        if domain.is_empty() {
            continue;
        }
        let name = match entry.name.trim() {
            "" => domain.clone(),
            name => escape_attr(name),
        };

        // Blank credentials keep what is stored, so a rename needs no secrets
        let existing = state.registry.workspace(&domain).await;
        let id = entry.id.trim();
        let secret = entry.secret.trim();
        let stored = match &existing {
            Some(existing) => (existing.id.clone(), existing.secret.clone()),
            None if id.is_empty() || secret.is_empty() => {
                metrics::record_admin_save("rejected");
                return failure(
                    StatusCode::BAD_REQUEST,
                    "client id and secret are required for a new workspace",
                )
                .into_response();
            }
            None => (String::new(), String::new()),
        };

        let id = encrypt_or_keep(state.vault.as_ref(), id, stored.0).await;
        let secret = encrypt_or_keep(state.vault.as_ref(), secret, stored.1).await;
        let (id, secret) = match (id, secret) {
            (Ok(id), Ok(secret)) => (id, secret),
            (Err(e), _) | (_, Err(e)) => {
                warn!(domain, error = %e, "credential encryption failed");
                metrics::record_admin_save("encrypt_failed");
                return failure(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "credentials could not be encrypted",
                )
                .into_response();
            }
        };
        access.insert(domain, WorkspaceCredential { name, id, secret });
    }

    let workspaces = access.len();
    let update = SettingsUpdate {
        active: Some(active),
        access: (!access.is_empty()).then_some(access),
    };
    if !state.registry.upsert(update).await {
        metrics::record_admin_save("persist_failed");
        return failure(StatusCode::INTERNAL_SERVER_ERROR, "settings could not be saved")
            .into_response();
    }

    info!(active, workspaces, "settings saved");
    metrics::record_admin_save("saved");
    success(StatusCode::ACCEPTED, "settings saved").into_response()
}

async fn encrypt_or_keep(
    vault: &dyn CredentialVault,
    plaintext: &str,
    stored: String,
) -> sso_vault::Result<String> {
    if plaintext.is_empty() {
        Ok(stored)
    } else {
        vault.encrypt(plaintext).await
    }
}

/// DELETE /admin/workspaces/{domain}
async fn delete_workspace(
    State(state): State<AdminState>,
    Path(domain): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let nonce = headers
        .get(NONCE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !state.csrf.verify(SAVE_ACTION, nonce, unix_now()) {
        metrics::record_admin_save("rejected");
        return failure(StatusCode::BAD_REQUEST, "invalid or expired nonce").into_response();
    }

    // Keys are stored in the same escaped form the save path writes
    let domain = escape_attr(domain.trim());
    if state.registry.workspace(&domain).await.is_none() {
        return failure(StatusCode::NOT_FOUND, "unknown workspace").into_response();
    }
    if !state.registry.remove(&domain).await {
        metrics::record_admin_save("persist_failed");
        return failure(StatusCode::INTERNAL_SERVER_ERROR, "settings could not be saved")
            .into_response();
    }

    metrics::record_admin_save("removed");
    success(StatusCode::OK, "workspace removed").into_response()
}
