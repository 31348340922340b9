//! Shared error types.

use miette::Diagnostic;
use smol_str::SmolStr;
use thiserror::Error;

/// Validation failure while parsing one of the identifier string types.
///
/// `spec` names the type that rejected the input (`"tid"`, `"did"`, …) so
/// the error stays useful after it has crossed a few layers.
#[derive(Debug, Error, Diagnostic)]
#[error("invalid {spec}: {message}")]
#[diagnostic(code(marginalia_common::parse))]
pub struct ParseError {
    pub spec: SmolStr,
    pub message: SmolStr,
    #[source_code]
    pub input: String,
}

impl ParseError {
    pub fn new(spec: &'static str, input: impl Into<String>, message: impl Into<SmolStr>) -> Self {
        Self {
            spec: SmolStr::new_static(spec),
            message: message.into(),
            input: input.into(),
        }
    }
}

/// Transport-level errors that occur during HTTP communication.
#[derive(Debug, Error, Diagnostic)]
pub enum TransportError {
    /// Failed to establish connection to server
    #[error("connection error: {0}")]
    #[diagnostic(code(marginalia_common::transport::connect))]
    Connect(String),

    /// Request construction failed (malformed URI, headers, etc.)
    #[error("invalid request: {0}")]
    #[diagnostic(code(marginalia_common::transport::invalid_request))]
    InvalidRequest(String),

    /// Other transport error
    #[error("transport error: {0}")]
    #[diagnostic(code(marginalia_common::transport::other))]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl From<http::Error> for TransportError {
    fn from(e: http::Error) -> Self {
        TransportError::InvalidRequest(e.to_string())
    }
}

#[cfg(feature = "reqwest-client")]
impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            TransportError::Connect(e.to_string())
        } else {
            TransportError::Other(Box::new(e))
        }
    }
}
