use miette::Diagnostic;
use thiserror::Error;

use crate::request::TokenExchangeError;
use crate::resolver::DiscoveryError;
use crate::store::{StateError, StoreError};
use marginalia_identity::IdentityError;

/// Errors surfaced by the login flow.
///
/// Interactive steps (resolution, discovery, exchange) propagate as typed
/// failures; passive session lookups never produce these. An absent or
/// expired session is just `None`.
#[derive(Debug, Error, Diagnostic)]
pub enum OAuthError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error(transparent)]
    #[diagnostic(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    #[diagnostic(transparent)]
    TokenExchange(#[from] TokenExchangeError),
    /// The authorization server reported failure on the callback. Final;
    /// never retried.
    #[error("authorization failed: {error}{}", description.as_deref().map(|d| format!(" ({d})")).unwrap_or_default())]
    #[diagnostic(code(marginalia_oauth::provider))]
    Provider {
        error: String,
        description: Option<String>,
    },
    #[error("malformed callback: {0}")]
    #[diagnostic(code(marginalia_oauth::callback))]
    Callback(String),
    #[error("issuer mismatch: expected {expected}, got {got}")]
    #[diagnostic(
        code(marginalia_oauth::issuer_mismatch),
        help("the callback `iss` must match the issuer discovered at login start")
    )]
    IssuerMismatch { expected: String, got: String },
    #[error("session invalid or expired")]
    #[diagnostic(code(marginalia_oauth::session_invalid))]
    SessionInvalid,
    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    #[diagnostic(code(marginalia_oauth::serde_form))]
    SerdeHtmlForm(#[from] serde_html_form::ser::Error),
    #[error(transparent)]
    #[diagnostic(code(marginalia_oauth::parse))]
    Parse(#[from] marginalia_common::error::ParseError),
}

pub type Result<T> = core::result::Result<T, OAuthError>;
