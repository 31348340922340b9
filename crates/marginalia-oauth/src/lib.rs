//! OAuth over the AT Protocol profile: PKCE-protected authorization-code
//! exchange with DPoP sender-constrained tokens, authorization-server
//! discovery, and session management.
//!
//! The flow is driven by [`client::OAuthClient`]; everything underneath is
//! usable on its own: [`dpop`] for proof construction and the
//! nonce-challenge retry, [`resolver`] for discovery, [`store`] for the
//! single-use login-state and session stores.

pub mod client;
pub mod dpop;
pub mod error;
pub mod jose;
pub mod pkce;
pub mod request;
pub mod resolver;
pub mod session;
pub mod store;
pub mod types;

pub use client::{ClientConfig, OAuthClient};
pub use error::OAuthError;
pub use session::{AuthRequestData, Session};
pub use store::{AuthStore, MemoryAuthStore, StateError, StoreError};

/// Signing algorithm used for DPoP keys when the server does not
/// advertise a preference.
pub const FALLBACK_ALG: &str = "ES256";
