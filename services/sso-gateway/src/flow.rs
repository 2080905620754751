//! Login flow state machine
//!
//! Pure state machine: receives events, returns (new_state, action).
//! The caller (`login::AuthFlowController`) executes the I/O implied by each
//! action and feeds the result back as the next event.
//!
//! The server keeps no session between the redirect and the callback. A
//! callback request re-enters the machine at `RedirectedToProvider` when it
//! carries a valid workspace-binding cookie, and at `Idle` otherwise.

use common::Secret;
use identity::User;

/// Why a callback did not produce an authenticated user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Stored client id/secret failed to decrypt
    CredentialsUnreadable,
    /// Token endpoint refused the code or was unreachable
    ExchangeFailed,
    /// Token response carried no identity token
    MissingIdToken,
    /// Provider did not confirm the identity token
    InvalidIdToken,
    /// Userinfo endpoint failed or was unreachable
    ProfileUnavailable,
    /// Profile had no email or the provider did not verify it
    EmailUnverified,
    /// No local user has this email
    UnknownEmail,
}

impl RejectReason {
    /// Stable label for metrics and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::CredentialsUnreadable => "credentials_unreadable",
            RejectReason::ExchangeFailed => "exchange_failed",
            RejectReason::MissingIdToken => "missing_id_token",
            RejectReason::InvalidIdToken => "invalid_id_token",
            RejectReason::ProfileUnavailable => "profile_unavailable",
            RejectReason::EmailUnverified => "email_unverified",
            RejectReason::UnknownEmail => "unknown_email",
        }
    }
}

/// Progress through the back-channel calls of a callback.
#[derive(Debug)]
pub enum CallbackStage {
    Exchanging,
    Verifying { access_token: Secret<String> },
    FetchingProfile,
    ResolvingUser,
}

/// Flow states.
#[derive(Debug)]
pub enum FlowState {
    /// No flow in progress for this request
    Idle,
    /// Picker shown, waiting for the browser to come back with a selection
    AwaitingWorkspaceSelection { preselected: Option<String> },
    /// Browser sent (or about to be sent) to the provider for `domain`
    RedirectedToProvider { domain: String },
    /// Provider sent the browser back with a code
    AwaitingCallback { domain: String, stage: CallbackStage },
    /// Terminal: local user resolved
    Resolved { user: User },
    /// Terminal: callback rejected
    Rejected { reason: RejectReason },
}

/// Events that drive state transitions.
#[derive(Debug)]
pub enum FlowEvent {
    /// Login page requested. `selected` is set only when the requested
    /// workspace matched a registered domain exactly.
    LoginRequested {
        active: bool,
        exempt: bool,
        selected: Option<String>,
        bound: Option<String>,
    },
    /// Selected workspace's credentials could not be decrypted
    CredentialsUnavailable,
    /// Provider redirected back; `has_code` when `code` was present
    CallbackReceived { has_code: bool },
    /// Token endpoint answered
    TokensIssued {
        access_token: Secret<String>,
        id_token: Option<String>,
    },
    /// Provider confirmed the identity token
    IdTokenVerified,
    /// Userinfo endpoint answered
    ProfileFetched {
        email: Option<String>,
        email_verified: bool,
    },
    /// Local user lookup finished
    UserLookedUp(Option<User>),
    /// The provider call for the current stage failed (error, non-2xx,
    /// timeout, malformed body)
    ProviderFailed,
}

/// Actions the caller should execute after a state transition
#[derive(Debug, PartialEq, Eq)]
pub enum FlowAction {
    /// Leave the host's default login untouched
    Bypass,
    /// Render the workspace picker
    ShowPicker {
        preselected: Option<String>,
        unavailable: Option<String>,
    },
    /// Bind the browser to `domain` and redirect to the provider
    RedirectToProvider { domain: String },
    /// Callback does not apply; return the caller's user unchanged
    KeepCurrentUser,
    /// Decrypt `domain`'s credentials and exchange the code
    ExchangeCode { domain: String },
    /// Ask the provider to confirm the identity token
    VerifyIdToken { id_token: String },
    /// Fetch the profile with the access token
    FetchProfile { access_token: Secret<String> },
    /// Look up a local user by verified email
    LookupUser { email: String },
    /// Hand the resolved user to the host
    SignIn { user: User },
    /// Fall through to the host's default authentication
    Reject { reason: RejectReason },
    /// No-op
    None,
}

fn reject(reason: RejectReason) -> (FlowState, FlowAction) {
    (
        FlowState::Rejected { reason },
        FlowAction::Reject { reason },
    )
}

/// Handle a state transition. Pure function: no I/O.
pub fn handle_event(state: FlowState, event: FlowEvent) -> (FlowState, FlowAction) {
    match (state, event) {
        // --- Idle: login page ---
        (
            FlowState::Idle,
            FlowEvent::LoginRequested {
                active,
                exempt,
                selected,
                bound,
            },
        ) => {
            if !active || exempt {
                return (FlowState::Idle, FlowAction::Bypass);
            }
            match selected {
                Some(domain) => (
                    FlowState::RedirectedToProvider {
                        domain: domain.clone(),
                    },
                    FlowAction::RedirectToProvider { domain },
                ),
                None => (
                    FlowState::AwaitingWorkspaceSelection {
                        preselected: bound.clone(),
                    },
                    FlowAction::ShowPicker {
                        preselected: bound,
                        unavailable: None,
                    },
                ),
            }
        }

        // --- Idle: callback without a usable binding ---
        (FlowState::Idle, FlowEvent::CallbackReceived { .. }) => {
            (FlowState::Idle, FlowAction::KeepCurrentUser)
        }

        // --- RedirectedToProvider ---
        (FlowState::RedirectedToProvider { domain }, FlowEvent::CredentialsUnavailable) => (
            FlowState::AwaitingWorkspaceSelection {
                preselected: Some(domain.clone()),
            },
            FlowAction::ShowPicker {
                preselected: Some(domain.clone()),
                unavailable: Some(domain),
            },
        ),

        (FlowState::RedirectedToProvider { domain }, FlowEvent::CallbackReceived { has_code }) => {
            if has_code {
                (
                    FlowState::AwaitingCallback {
                        domain: domain.clone(),
                        stage: CallbackStage::Exchanging,
                    },
                    FlowAction::ExchangeCode { domain },
                )
            } else {
                (FlowState::RedirectedToProvider { domain }, FlowAction::KeepCurrentUser)
            }
        }

        // --- AwaitingCallback: exchange ---
        (
            FlowState::AwaitingCallback {
                stage: CallbackStage::Exchanging,
                ..
            },
            FlowEvent::CredentialsUnavailable,
        ) => reject(RejectReason::CredentialsUnreadable),

        (
            FlowState::AwaitingCallback {
                domain,
                stage: CallbackStage::Exchanging,
            },
            FlowEvent::TokensIssued {
                access_token,
                id_token,
            },
        ) => match id_token {
            Some(id_token) if !id_token.is_empty() => (
                FlowState::AwaitingCallback {
                    domain,
                    stage: CallbackStage::Verifying { access_token },
                },
                FlowAction::VerifyIdToken { id_token },
            ),
            _ => reject(RejectReason::MissingIdToken),
        },

        (
            FlowState::AwaitingCallback {
                stage: CallbackStage::Exchanging,
                ..
            },
            FlowEvent::ProviderFailed,
        ) => reject(RejectReason::ExchangeFailed),

        // --- AwaitingCallback: identity token ---
        (
            FlowState::AwaitingCallback {
                domain,
                stage: CallbackStage::Verifying { access_token },
            },
            FlowEvent::IdTokenVerified,
        ) => (
            FlowState::AwaitingCallback {
                domain,
                stage: CallbackStage::FetchingProfile,
            },
            FlowAction::FetchProfile { access_token },
        ),

        (
            FlowState::AwaitingCallback {
                stage: CallbackStage::Verifying { .. },
                ..
            },
            FlowEvent::ProviderFailed,
        ) => reject(RejectReason::InvalidIdToken),

        // --- AwaitingCallback: profile ---
        (
            FlowState::AwaitingCallback {
                domain,
                stage: CallbackStage::FetchingProfile,
            },
            FlowEvent::ProfileFetched {
                email,
                email_verified,
            },
        ) => match email {
            Some(email) if email_verified && !email.is_empty() => (
                FlowState::AwaitingCallback {
                    domain,
                    stage: CallbackStage::ResolvingUser,
                },
                FlowAction::LookupUser { email },
            ),
            _ => reject(RejectReason::EmailUnverified),
        },

        (
            FlowState::AwaitingCallback {
                stage: CallbackStage::FetchingProfile,
                ..
            },
            FlowEvent::ProviderFailed,
        ) => reject(RejectReason::ProfileUnavailable),

        // --- AwaitingCallback: local user ---
        (
            FlowState::AwaitingCallback {
                stage: CallbackStage::ResolvingUser,
                ..
            },
            FlowEvent::UserLookedUp(found),
        ) => match found {
            Some(user) => (
                FlowState::Resolved { user: user.clone() },
                FlowAction::SignIn { user },
            ),
            None => reject(RejectReason::UnknownEmail),
        },

        // --- Invalid/unhandled transition: stay in current state ---
        (state, _event) => (state, FlowAction::None),
    }
}
