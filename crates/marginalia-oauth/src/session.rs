//! Transient login state and established sessions.

use jose_jwk::Key;
use marginalia_common::{Datetime, Did, Handle};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use url::Url;

/// Everything remembered between starting a login and the callback.
///
/// Keyed by `state` in the auth store; consumed exactly once when the
/// callback arrives, or purged after `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRequestData {
    /// Anti-CSRF state value; also the storage key.
    pub state: SmolStr,
    /// PKCE code verifier, revealed only to the token endpoint.
    pub pkce_verifier: String,
    /// Where to send the user after login completes.
    pub return_url: Option<String>,
    /// Opaque identifier of the browser client that started the login.
    pub client_ref: SmolStr,
    /// Session keypair minted for this login.
    pub dpop_key: Key,
    pub did: Did,
    pub handle: Option<Handle>,
    pub pds: Url,
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub revocation_endpoint: Option<String>,
    pub expires_at: Datetime,
}

impl AuthRequestData {
    pub fn is_expired(&self, now: &Datetime) -> bool {
        self.expires_at < *now
    }
}

/// An established session: the opaque handle the browser holds, plus the
/// tokens and key material needed to act on the account's behalf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Opaque client-facing session handle.
    pub session_id: SmolStr,
    /// The browser client the session belongs to. At most one session per
    /// client per provider; establishing a new provider session revokes
    /// the others first.
    pub client_ref: SmolStr,
    pub did: Did,
    pub handle: Option<Handle>,
    pub pds: Url,
    /// Issuer (provider) the session was established against.
    pub issuer: String,
    pub token_endpoint: String,
    pub revocation_endpoint: Option<String>,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub dpop_key: Key,
    pub scope: Option<String>,
    pub created_at: Datetime,
    pub expires_at: Option<Datetime>,
}

impl Session {
    pub fn is_expired(&self, now: &Datetime) -> bool {
        self.expires_at.as_ref().is_some_and(|exp| *exp < *now)
    }
}
