//! Storage seams for transient login state and established sessions.
//!
//! The one hard requirement: [`AuthStore::consume_auth_request`] is an
//! atomic fetch-and-delete. A state value that has been read once can
//! never be read again, so a replayed callback (or two concurrent
//! callbacks racing on the same state) always fails on the second
//! consume.

use async_trait::async_trait;
use dashmap::DashMap;
use marginalia_common::Datetime;
use miette::Diagnostic;
use smol_str::SmolStr;
use thiserror::Error;

use crate::session::{AuthRequestData, Session};

/// Backend failure in a store implementation.
#[derive(Debug, Error, Diagnostic)]
#[error("session store error: {0}")]
#[diagnostic(code(marginalia_oauth::store))]
pub struct StoreError(pub String);

/// Why a state value could not be consumed. Never a silent no-op: a
/// missing state is indistinguishable from a replay attempt and must
/// surface.
#[derive(Debug, Error, Diagnostic)]
pub enum StateError {
    #[error("invalid or expired state")]
    #[diagnostic(
        code(marginalia_oauth::state::unknown),
        help("the login state was never issued, already used, or purged")
    )]
    Unknown,
    #[error("invalid or expired state")]
    #[diagnostic(code(marginalia_oauth::state::expired))]
    Expired,
    #[error(transparent)]
    #[diagnostic(code(marginalia_oauth::state::store))]
    Store(#[from] StoreError),
}

/// Persistence for login state and sessions.
#[async_trait]
pub trait AuthStore: Send + Sync {
    async fn save_auth_request(&self, data: AuthRequestData) -> Result<(), StoreError>;

    /// Atomically fetch and delete the login state for `state`.
    async fn consume_auth_request(&self, state: &str) -> Result<AuthRequestData, StateError>;

    /// Drop expired login states. Returns how many were purged.
    async fn purge_expired(&self, now: &Datetime) -> Result<usize, StoreError>;

    async fn save_session(&self, session: Session) -> Result<(), StoreError>;

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>, StoreError>;

    async fn delete_session(&self, session_id: &str) -> Result<(), StoreError>;

    /// All sessions held by one browser client.
    async fn sessions_for_client(&self, client_ref: &str) -> Result<Vec<Session>, StoreError>;
}

/// In-memory store. Suitable for a single instance; swap in a shared
/// backend for horizontal scale-out.
#[derive(Debug, Default)]
pub struct MemoryAuthStore {
    requests: DashMap<SmolStr, AuthRequestData>,
    sessions: DashMap<SmolStr, Session>,
}

impl MemoryAuthStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuthStore for MemoryAuthStore {
    async fn save_auth_request(&self, data: AuthRequestData) -> Result<(), StoreError> {
        self.requests.insert(data.state.clone(), data);
        Ok(())
    }

    async fn consume_auth_request(&self, state: &str) -> Result<AuthRequestData, StateError> {
        // DashMap::remove is the atomic fetch-and-delete; of two
        // concurrent consumers exactly one gets the value.
        let (_, data) = self.requests.remove(state).ok_or(StateError::Unknown)?;
        if data.is_expired(&Datetime::now()) {
            return Err(StateError::Expired);
        }
        Ok(data)
    }

    async fn purge_expired(&self, now: &Datetime) -> Result<usize, StoreError> {
        let before = self.requests.len();
        self.requests.retain(|_, data| !data.is_expired(now));
        Ok(before - self.requests.len())
    }

    async fn save_session(&self, session: Session) -> Result<(), StoreError> {
        self.sessions.insert(session.session_id.clone(), session);
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.sessions.get(session_id).map(|s| s.clone()))
    }

    async fn delete_session(&self, session_id: &str) -> Result<(), StoreError> {
        self.sessions.remove(session_id);
        Ok(())
    }

    async fn sessions_for_client(&self, client_ref: &str) -> Result<Vec<Session>, StoreError> {
        Ok(self
            .sessions
            .iter()
            .filter(|s| s.client_ref == client_ref)
            .map(|s| s.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pkce::generate_dpop_key;
    use marginalia_common::Did;
    use url::Url;

    fn request_data(state: &str, expires_at: Datetime) -> AuthRequestData {
        AuthRequestData {
            state: state.into(),
            pkce_verifier: "verifier".into(),
            return_url: None,
            client_ref: "client-1".into(),
            dpop_key: generate_dpop_key(),
            did: Did::new("did:plc:alice123").unwrap(),
            handle: None,
            pds: Url::parse("https://pds.example.com").unwrap(),
            issuer: "https://auth.example.com/".into(),
            authorization_endpoint: "https://auth.example.com/oauth/authorize".into(),
            token_endpoint: "https://auth.example.com/oauth/token".into(),
            revocation_endpoint: None,
            expires_at,
        }
    }

    fn in_ten_minutes() -> Datetime {
        Datetime::new((chrono::Utc::now() + chrono::Duration::minutes(10)).fixed_offset())
    }

    #[tokio::test]
    async fn consume_is_single_use() {
        let store = MemoryAuthStore::new();
        store
            .save_auth_request(request_data("state-a", in_ten_minutes()))
            .await
            .unwrap();

        assert!(store.consume_auth_request("state-a").await.is_ok());
        assert!(matches!(
            store.consume_auth_request("state-a").await,
            Err(StateError::Unknown)
        ));
    }

    #[tokio::test]
    async fn expired_state_fails_consume() {
        let store = MemoryAuthStore::new();
        let past = Datetime::new((chrono::Utc::now() - chrono::Duration::minutes(1)).fixed_offset());
        store
            .save_auth_request(request_data("state-b", past))
            .await
            .unwrap();

        assert!(matches!(
            store.consume_auth_request("state-b").await,
            Err(StateError::Expired)
        ));
        // consumed on the failed attempt as well
        assert!(matches!(
            store.consume_auth_request("state-b").await,
            Err(StateError::Unknown)
        ));
    }

    #[tokio::test]
    async fn purge_drops_only_expired() {
        let store = MemoryAuthStore::new();
        let past = Datetime::new((chrono::Utc::now() - chrono::Duration::minutes(1)).fixed_offset());
        store
            .save_auth_request(request_data("fresh", in_ten_minutes()))
            .await
            .unwrap();
        store.save_auth_request(request_data("stale", past)).await.unwrap();

        let purged = store.purge_expired(&Datetime::now()).await.unwrap();
        assert_eq!(purged, 1);
        assert!(store.consume_auth_request("fresh").await.is_ok());
    }
}
