//! Login orchestration
//!
//! `AuthFlowController` drives the pure machine in `flow` with real I/O:
//! registry lookups, credential decryption, provider calls and user lookups.
//! Nothing here returns an error to the caller. Every failure becomes either
//! "leave the host alone" or "no authenticated user".

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::http::HeaderMap;
use identity::{ClientCredentials, IdentityProvider, User, UserDirectory};
use sso_settings::{WorkspaceCredential, WorkspaceRegistry};
use sso_vault::CredentialVault;
use tracing::{debug, info, warn};
use url::form_urlencoded;

use crate::flow::{FlowAction, FlowEvent, FlowState, RejectReason, handle_event};
use crate::metrics;
use crate::picker;
use crate::session::{CookieSigner, REDIRECT_COOKIE, unix_now};

/// `action` value that bypasses the override (admin email re-confirmation)
pub const EXEMPT_ACTION: &str = "confirm_admin_email";

/// URLs the controller needs from its host.
#[derive(Debug, Clone)]
pub struct HostUrls {
    /// OAuth redirect URI registered for every workspace
    pub redirect_uri: String,
    /// The host's own login page
    pub default_login_url: String,
    /// Landing page after SSO without a stashed target
    pub after_login_url: String,
}

/// Query parameters of the login page.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoginQuery {
    /// Selected workspace domain; `handler` is accepted from older links
    pub workspace: Option<String>,
    pub redirect_to: Option<String>,
    pub action: Option<String>,
}

impl LoginQuery {
    /// Parse a raw query string. Never fails: the first occurrence of each
    /// parameter wins, `workspace` beats `handler`, and anything else is
    /// ignored.
    pub fn from_raw(raw: Option<&str>) -> Self {
        let mut query = Self::default();
        let mut handler = None;
        for (name, value) in form_urlencoded::parse(raw.unwrap_or_default().as_bytes()) {
            let slot = match name.as_ref() {
                "workspace" => &mut query.workspace,
                "handler" => &mut handler,
                "redirect_to" => &mut query.redirect_to,
                "action" => &mut query.action,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.into_owned());
            }
        }
        query.workspace = query.workspace.or(handler);
        query
    }
}

/// First value of one query parameter, if any.
pub fn query_param(raw: Option<&str>, name: &str) -> Option<String> {
    form_urlencoded::parse(raw.unwrap_or_default().as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// A login page request.
#[derive(Debug, Default)]
pub struct LoginRequest {
    pub query: LoginQuery,
    pub headers: HeaderMap,
}

/// A provider callback request.
#[derive(Debug, Default)]
pub struct AuthCallback {
    pub code: Option<String>,
    pub headers: HeaderMap,
}

/// What the login page should do.
#[derive(Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// Override not engaged; serve the host's default login
    Bypass,
    /// Send the browser to the provider
    Redirect {
        location: String,
        cookies: Vec<String>,
    },
    /// Render the workspace picker
    Picker { html: String, cookies: Vec<String> },
}

/// Detailed result of a callback.
#[derive(Debug, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// Callback did not apply (no code, no binding, override off)
    Unchanged,
    Resolved(User),
    Rejected(RejectReason),
}

impl CallbackOutcome {
    /// Metric label for this outcome.
    pub fn label(&self) -> String {
        match self {
            CallbackOutcome::Unchanged => "unchanged".into(),
            CallbackOutcome::Resolved(_) => "resolved".into(),
            CallbackOutcome::Rejected(reason) => format!("rejected_{}", reason.as_str()),
        }
    }
}

/// Outcome of the commerce login guard.
#[derive(Debug, PartialEq)]
pub enum CredentialsDecision {
    /// Let the commerce login proceed with these credentials
    PassThrough(serde_json::Value),
    /// Abort the commerce login and send the browser here
    Redirect(String),
}

/// Workspace sign-in orchestration.
pub struct AuthFlowController {
    registry: Arc<dyn WorkspaceRegistry>,
    vault: Arc<dyn CredentialVault>,
    provider: Arc<dyn IdentityProvider>,
    directory: Arc<dyn UserDirectory>,
    cookies: Arc<CookieSigner>,
    urls: HostUrls,
}

impl AuthFlowController {
    pub fn new(
        registry: Arc<dyn WorkspaceRegistry>,
        vault: Arc<dyn CredentialVault>,
        provider: Arc<dyn IdentityProvider>,
        directory: Arc<dyn UserDirectory>,
        cookies: Arc<CookieSigner>,
        urls: HostUrls,
    ) -> Self {
        Self {
            registry,
            vault,
            provider,
            directory,
            cookies,
            urls,
        }
    }

    pub fn urls(&self) -> &HostUrls {
        &self.urls
    }

    /// Decrypt a workspace's client credentials. `None` if either is unreadable.
    async fn client_credentials(&self, workspace: &WorkspaceCredential) -> Option<ClientCredentials> {
        let client_id = self.vault.decrypt(&workspace.id).await?;
        let client_secret = self.vault.decrypt(&workspace.secret).await?;
        if client_id.is_empty() || client_secret.is_empty() {
            return None;
        }
        Some(ClientCredentials {
            client_id,
            client_secret,
            redirect_uri: self.urls.redirect_uri.clone(),
        })
    }

    /// Handle the login page.
    pub async fn run(&self, request: LoginRequest) -> RunOutcome {
        let LoginRequest { query, headers } = request;
        let now = unix_now();
        let active = self.registry.is_active().await;
        let exempt = query.action.as_deref() == Some(EXEMPT_ACTION);

        let workspaces = if active && !exempt {
            self.registry.workspaces().await
        } else {
            BTreeMap::new()
        };
        let selected = query
            .workspace
            .filter(|domain| workspaces.contains_key(domain.as_str()));
        let bound = self
            .cookies
            .read_workspace(&headers, now)
            .map(|binding| binding.domain);

        let mut cookies = Vec::new();
        if active && !exempt {
            if let Some(target) = query.redirect_to.as_deref().filter(|t| !t.is_empty()) {
                cookies.extend(self.cookies.redirect_cookie(target, now));
            }
        }

        let (mut state, mut action) = handle_event(
            FlowState::Idle,
            FlowEvent::LoginRequested {
                active,
                exempt,
                selected,
                bound,
            },
        );

        loop {
            let event = match action {
                FlowAction::Bypass => {
                    debug!(active, exempt, "login override bypassed");
                    metrics::record_login("bypassed");
                    return RunOutcome::Bypass;
                }
                FlowAction::RedirectToProvider { domain } => {
                    let location = match workspaces.get(&domain) {
                        Some(workspace) => match self.client_credentials(workspace).await {
                            Some(creds) => self.provider.authorization_url(&creds).ok(),
                            None => None,
                        },
                        None => None,
                    };
                    match location {
                        Some(location) => {
                            cookies.extend(self.cookies.workspace_cookie(&domain, now));
                            info!(domain, provider = self.provider.id(), "redirecting to provider");
                            metrics::record_login("redirected");
                            return RunOutcome::Redirect { location, cookies };
                        }
                        None => {
                            warn!(domain, "workspace credentials unreadable");
                            FlowEvent::CredentialsUnavailable
                        }
                    }
                }
                FlowAction::ShowPicker {
                    preselected,
                    unavailable,
                } => {
                    let html =
                        picker::render(&workspaces, preselected.as_deref(), unavailable.as_deref());
                    metrics::record_login("picker");
                    return RunOutcome::Picker { html, cookies };
                }
                other => {
                    warn!(action = ?other, "unexpected action on login page");
                    return RunOutcome::Bypass;
                }
            };
            (state, action) = handle_event(state, event);
        }
    }

    /// Resolve the local user for a provider callback.
    ///
    /// Returns `current_user` unchanged whenever the callback does not apply
    /// or is rejected; the host decides what to do next.
    pub async fn authenticate(
        &self,
        callback: &AuthCallback,
        current_user: Option<User>,
    ) -> Option<User> {
        match self.authenticate_detailed(callback).await {
            CallbackOutcome::Resolved(user) => Some(user),
            CallbackOutcome::Unchanged | CallbackOutcome::Rejected(_) => current_user,
        }
    }

    /// `authenticate` with the reason for the result.
    pub async fn authenticate_detailed(&self, callback: &AuthCallback) -> CallbackOutcome {
        let outcome = self.resolve_callback(callback).await;
        metrics::record_login(&outcome.label());
        match &outcome {
            CallbackOutcome::Resolved(user) => info!(user_id = user.id, "workspace login resolved"),
            CallbackOutcome::Rejected(reason) => {
                info!(reason = reason.as_str(), "workspace login rejected")
            }
            CallbackOutcome::Unchanged => debug!("callback not applicable"),
        }
        outcome
    }

    async fn resolve_callback(&self, callback: &AuthCallback) -> CallbackOutcome {
        let code = callback.code.as_deref().unwrap_or_default();
        let mut workspace = None;

        let entry = if self.registry.is_active().await {
            match self.cookies.read_workspace(&callback.headers, unix_now()) {
                Some(binding) => match self.registry.workspace(&binding.domain).await {
                    Some(found) => {
                        workspace = Some(found);
                        FlowState::RedirectedToProvider {
                            domain: binding.domain,
                        }
                    }
                    None => FlowState::Idle,
                },
                None => FlowState::Idle,
            }
        } else {
            FlowState::Idle
        };

        let (mut state, mut action) = handle_event(
            entry,
            FlowEvent::CallbackReceived {
                has_code: !code.is_empty(),
            },
        );
        let mut credentials = None;

        loop {
            let event = match action {
                FlowAction::KeepCurrentUser => return CallbackOutcome::Unchanged,
                FlowAction::SignIn { user } => return CallbackOutcome::Resolved(user),
                FlowAction::Reject { reason } => return CallbackOutcome::Rejected(reason),

                FlowAction::ExchangeCode { domain } => {
                    let creds = match workspace.as_ref() {
                        Some(w) => self.client_credentials(w).await,
                        None => None,
                    };
                    match creds {
                        None => {
                            warn!(domain, "workspace credentials unreadable");
                            FlowEvent::CredentialsUnavailable
                        }
                        Some(creds) => {
                            let result = self.provider.exchange_code(&creds, code).await;
                            credentials = Some(creds);
                            match result {
                                Ok(tokens) => FlowEvent::TokensIssued {
                                    access_token: tokens.access_token,
                                    id_token: tokens.id_token,
                                },
                                Err(e) => {
                                    warn!(domain, error = %e, "code exchange failed");
                                    FlowEvent::ProviderFailed
                                }
                            }
                        }
                    }
                }

                FlowAction::VerifyIdToken { id_token } => match credentials.as_ref() {
                    Some(creds) => match self.provider.verify_id_token(creds, &id_token).await {
                        Ok(claims) => {
                            debug!(sub = claims.subject, "identity token confirmed");
                            FlowEvent::IdTokenVerified
                        }
                        Err(e) => {
                            warn!(error = %e, "identity token not confirmed");
                            FlowEvent::ProviderFailed
                        }
                    },
                    None => FlowEvent::ProviderFailed,
                },

                FlowAction::FetchProfile { access_token } => {
                    match self.provider.user_info(access_token.expose()).await {
                        Ok(info) => FlowEvent::ProfileFetched {
                            email: info.email,
                            email_verified: info.email_verified,
                        },
                        Err(e) => {
                            warn!(error = %e, "profile fetch failed");
                            FlowEvent::ProviderFailed
                        }
                    }
                }

                FlowAction::LookupUser { email } => {
                    FlowEvent::UserLookedUp(self.directory.find_by_email(&email).await)
                }

                other => {
                    warn!(action = ?other, "unexpected action on callback");
                    return CallbackOutcome::Unchanged;
                }
            };
            (state, action) = handle_event(state, event);
        }
    }

    /// Where to send the browser after a successful login, plus the cookie
    /// updates that go with it.
    ///
    /// A stashed target is consumed once and honoured only if it is a
    /// same-origin path.
    pub fn post_login_target(&self, headers: &HeaderMap) -> (String, Vec<String>) {
        let mut cookies = Vec::new();
        let stashed = self.cookies.read_redirect(headers, unix_now());
        if crate::session::extract_cookie_value(headers, REDIRECT_COOKIE).is_some() {
            cookies.push(self.cookies.clear(REDIRECT_COOKIE));
        }
        let target = stashed
            .map(|r| r.target)
            .filter(|t| is_safe_redirect(t))
            .unwrap_or_else(|| self.urls.after_login_url.clone());
        (target, cookies)
    }

    /// Commerce login guard.
    ///
    /// Privileged accounts must come through workspace sign-in, so a plain
    /// password login for any user whose primary role is not `customer` is
    /// redirected to the host login.
    pub async fn handle_external_login_credentials(
        &self,
        creds: serde_json::Value,
    ) -> CredentialsDecision {
        if !self.registry.is_active().await {
            return CredentialsDecision::PassThrough(creds);
        }

        let Some(login) = creds
            .get("user_login")
            .and_then(serde_json::Value::as_str)
            .map(str::trim)
            .filter(|l| !l.is_empty())
        else {
            return CredentialsDecision::PassThrough(creds);
        };

        // An identifier with '@' past the first character is an email
        let user = if login.find('@').is_some_and(|i| i > 0) {
            self.directory.find_by_email(login).await
        } else {
            self.directory.find_by_login(login).await
        };

        match user {
            Some(user) if !user.is_customer() => {
                info!(
                    user_id = user.id,
                    role = user.primary_role().unwrap_or("none"),
                    "privileged commerce login redirected"
                );
                metrics::record_login("guard_redirected");
                CredentialsDecision::Redirect(self.urls.default_login_url.clone())
            }
            _ => {
                metrics::record_login("guard_passed");
                CredentialsDecision::PassThrough(creds)
            }
        }
    }
}

/// Same-origin absolute path: `/x`, never `//host` or `/\host`.
pub fn is_safe_redirect(target: &str) -> bool {
    target.starts_with('/')
        && !target.starts_with("//")
        && !target.contains('\\')
        && !target.chars().any(char::is_control)
}
