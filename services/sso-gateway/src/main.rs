//! Workspace SSO Gateway
//!
//! Single-binary service that puts per-workspace Google sign-in in front of
//! a host application's login:
//! 1. `/login` lets the browser pick a workspace and redirects to Google
//! 2. `/login/callback` resolves the Google identity to a local user
//! 3. The admin listener manages workspaces and their encrypted credentials

mod admin;
mod config;
mod csrf;
mod error;
mod flow;
mod login;
mod metrics;
mod picker;
mod provider_impl;
mod session;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::Router;
use axum::body::Bytes;
use axum::extract::{RawQuery, State};
use axum::http::header::{CONTENT_TYPE, LOCATION, SET_COOKIE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use identity::StaticDirectory;
use metrics_exporter_prometheus::PrometheusHandle;
use sso_settings::{
    JsonFileStore, MemoryStore, SettingsContext, SettingsGateway, SettingsRegistry, SettingsStore,
    WorkspaceRegistry,
};
use sso_vault::{CredentialVault, CryptoVault};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{Instrument, error, info, info_span, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::admin::{AdminState, build_admin_router};
use crate::config::Config;
use crate::csrf::CsrfGuard;
use crate::login::{
    AuthCallback, AuthFlowController, CallbackOutcome, CredentialsDecision, HostUrls, LoginQuery,
    LoginRequest, RunOutcome, query_param,
};
use crate::provider_impl::GoogleIdentityProvider;
use crate::session::CookieSigner;

/// How long in-flight requests may run after a shutdown signal
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Response headers carrying the resolved identity to the host
const USER_HEADER: &str = "x-auth-request-user";
const EMAIL_HEADER: &str = "x-auth-request-email";

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    controller: Arc<AuthFlowController>,
    registry: Arc<dyn WorkspaceRegistry>,
    prometheus: PrometheusHandle,
    started_at: Instant,
}

/// Build the public router.
///
/// Applies a concurrency limit layer based on `max_connections`.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/login", get(login_handler))
        .route("/login/callback", get(callback_handler))
        .route("/login/external-credentials", post(external_credentials_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs; LOG_LEVEL wins over RUST_LOG
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting workspace-sso-gateway");

    // Install before any metric is emitted
    let prometheus = metrics::install_recorder().context("failed to install metrics recorder")?;

    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    let secret = config
        .server
        .secret
        .clone()
        .context("gateway secret not resolved")?;

    info!(
        listen_addr = %config.server.listen_addr,
        admin_listen_addr = %config.server.admin_listen_addr,
        public_url = %config.server.public_url,
        users = config.users.len(),
        "configuration loaded"
    );

    let store: Arc<dyn SettingsStore> = match &config.settings.path {
        Some(path) => Arc::new(
            JsonFileStore::load(path.clone())
                .await
                .map_err(error::Error::from)
                .with_context(|| format!("failed to open settings file {}", path.display()))?,
        ),
        None => {
            warn!("no settings path configured, settings will not survive a restart");
            Arc::new(MemoryStore::new())
        }
    };
    let context = Arc::new(SettingsContext::new(SettingsGateway::new(
        store,
        config.settings.key.clone(),
    )));
    let registry: Arc<dyn WorkspaceRegistry> = Arc::new(SettingsRegistry::new(context.clone()));
    let vault: Arc<dyn CredentialVault> = Arc::new(CryptoVault::new(context));

    let provider =
        GoogleIdentityProvider::new(config.provider.endpoints(), config.provider.timeout())?;
    let controller = Arc::new(AuthFlowController::new(
        registry.clone(),
        vault.clone(),
        Arc::new(provider),
        Arc::new(StaticDirectory::new(config.users.clone())),
        Arc::new(CookieSigner::new(&secret, config.server.secure_cookies())),
        HostUrls {
            redirect_uri: config.server.redirect_uri(),
            default_login_url: config.host.default_login_url.clone(),
            after_login_url: config.host.after_login_url.clone(),
        },
    ));

    let app = build_router(
        AppState {
            controller,
            registry: registry.clone(),
            prometheus,
            started_at: Instant::now(),
        },
        config.server.max_connections,
    );
    let admin_app = build_admin_router(AdminState::new(
        registry,
        vault,
        Arc::new(CsrfGuard::new(&secret)),
    ));

    let listener = TcpListener::bind(config.server.listen_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.server.listen_addr))?;
    let admin_listener = TcpListener::bind(config.server.admin_listen_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.server.admin_listen_addr))?;

    info!(
        addr = %config.server.listen_addr,
        admin_addr = %config.server.admin_listen_addr,
        "accepting requests"
    );

    // Drain starts at signal receipt, not at server start
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let server_handle = tokio::spawn(serve(listener, app, shutdown_rx.clone()));
    let admin_handle = tokio::spawn(serve(admin_listener, admin_app, shutdown_rx));

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    let drained = async {
        for (name, handle) in [("public", server_handle), ("admin", admin_handle)] {
            match handle.await {
                Ok(Ok(())) => info!(listener = name, "listener drained"),
                Ok(Err(e)) => error!(listener = name, error = %e, "server error during shutdown"),
                Err(e) => error!(listener = name, error = %e, "server task panicked"),
            }
        }
    };
    if tokio::time::timeout(DRAIN_TIMEOUT, drained).await.is_err() {
        warn!(
            drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "drain timeout exceeded, forcing shutdown"
        );
    }

    info!("shutdown complete");
    Ok(())
}

async fn serve(
    listener: TcpListener,
    app: Router,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
}

fn request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().as_simple())
}

fn append_cookies(response: &mut Response, cookies: &[String]) {
    for cookie in cookies {
        match HeaderValue::from_str(cookie) {
            Ok(value) => {
                response.headers_mut().append(SET_COOKIE, value);
            }
            Err(_) => warn!("dropping unencodable cookie"),
        }
    }
}

fn redirect(status: StatusCode, location: &str, cookies: &[String]) -> Response {
    let Ok(location) = HeaderValue::from_str(location) else {
        error!("redirect target is not a valid header value");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };
    let mut response = (status, [(LOCATION, location)]).into_response();
    append_cookies(&mut response, cookies);
    response
}

/// The host login URL carrying the request's own query string.
fn bypass_location(default_login_url: &str, query: Option<&str>) -> String {
    match query.filter(|q| !q.is_empty()) {
        Some(query) => {
            let separator = if default_login_url.contains('?') { '&' } else { '?' };
            format!("{default_login_url}{separator}{query}")
        }
        None => default_login_url.to_owned(),
    }
}

/// GET /login: workspace picker or redirect to the provider.
async fn login_handler(
    State(state): State<AppState>,
    RawQuery(raw_query): RawQuery,
    headers: HeaderMap,
) -> Response {
    let span = info_span!("login", request_id = %request_id());
    let query = LoginQuery::from_raw(raw_query.as_deref());
    let outcome = state
        .controller
        .run(LoginRequest { query, headers })
        .instrument(span)
        .await;

    match outcome {
        RunOutcome::Bypass => {
            let location = bypass_location(
                &state.controller.urls().default_login_url,
                raw_query.as_deref(),
            );
            redirect(StatusCode::TEMPORARY_REDIRECT, &location, &[])
        }
        RunOutcome::Redirect { location, cookies } => {
            redirect(StatusCode::FOUND, &location, &cookies)
        }
        RunOutcome::Picker { html, cookies } => {
            let mut response = Html(html).into_response();
            append_cookies(&mut response, &cookies);
            response
        }
    }
}

/// GET /login/callback: resolve the provider identity to a local user.
async fn callback_handler(
    State(state): State<AppState>,
    RawQuery(raw_query): RawQuery,
    headers: HeaderMap,
) -> Response {
    let started = Instant::now();
    let span = info_span!("callback", request_id = %request_id());
    let callback = AuthCallback {
        code: query_param(raw_query.as_deref(), "code"),
        headers,
    };
    let outcome = state
        .controller
        .authenticate_detailed(&callback)
        .instrument(span)
        .await;
    let label = outcome.label();
    metrics::record_callback_duration(&label, started.elapsed().as_secs_f64());

    match outcome {
        CallbackOutcome::Resolved(user) => {
            let (target, cookies) = state.controller.post_login_target(&callback.headers);
            let mut response = redirect(StatusCode::SEE_OTHER, &target, &cookies);
            for (name, value) in [(USER_HEADER, &user.login), (EMAIL_HEADER, &user.email)] {
                if let Ok(value) = HeaderValue::from_str(value) {
                    response
                        .headers_mut()
                        .insert(HeaderName::from_static(name), value);
                }
            }
            response
        }
        CallbackOutcome::Unchanged | CallbackOutcome::Rejected(_) => (
            StatusCode::UNAUTHORIZED,
            [(CONTENT_TYPE, "application/json")],
            serde_json::json!({
                "authenticated": false,
                "reason": label,
            })
            .to_string(),
        )
            .into_response(),
    }
}

/// POST /login/external-credentials: commerce login guard.
async fn external_credentials_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let Ok(creds) = serde_json::from_slice::<serde_json::Value>(&body) else {
        return (
            StatusCode::BAD_REQUEST,
            [(CONTENT_TYPE, "application/json")],
            serde_json::json!({ "error": "credentials must be a JSON object" }).to_string(),
        )
            .into_response();
    };

    match state.controller.handle_external_login_credentials(creds).await {
        CredentialsDecision::Redirect(location) => redirect(StatusCode::SEE_OTHER, &location, &[]),
        CredentialsDecision::PassThrough(creds) => (
            StatusCode::OK,
            [(CONTENT_TYPE, "application/json")],
            creds.to_string(),
        )
            .into_response(),
    }
}

/// Health endpoint: status, override flag, workspace count, uptime.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let body = serde_json::json!({
        "status": "healthy",
        "active": state.registry.is_active().await,
        "workspaces": state.registry.workspaces().await.len(),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    });
    (
        StatusCode::OK,
        [(CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
