//! Shared types for the workspace SSO gateway

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
