//! Google OAuth 2.0 relying-party client
//!
//! The protocol half of workspace sign-in, with no knowledge of workspaces,
//! vaults or cookies. Callers pass in decrypted client credentials and a
//! `reqwest::Client` carrying the request timeout.
//!
//! Flow:
//! 1. Browser is sent to `authorize::build_authorization_url()`
//! 2. Callback code goes to `token::exchange_code()`
//! 3. The returned identity token is checked by `token::verify_id_token()`
//! 4. The verified email comes from `token::fetch_userinfo()`

pub mod authorize;
pub mod constants;
pub mod error;
pub mod token;

pub use authorize::{Endpoints, build_authorization_url};
pub use constants::*;
pub use error::{Error, Result};
pub use token::{
    TokenInfo, TokenResponse, UserInfoResponse, exchange_code, fetch_userinfo, verify_id_token,
};
