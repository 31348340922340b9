//! The OAuth exchange engine.
//!
//! Drives a login from handle to established session:
//! resolve identity → discover the authorization server → mint PKCE +
//! state + a session keypair → hand off to the authorization endpoint →
//! resume at the callback → exchange the code (with the single DPoP
//! nonce retry) → establish the session and discard the login state.
//!
//! The redirect itself happens outside this engine; it only builds the
//! authorization URL and picks the flow back up when the browser returns.

use std::sync::Arc;

use bon::Builder;
use chrono::Duration;
use marginalia_common::{Datetime, HttpClient};
use marginalia_identity::{AtIdentifier, IdentityResolver, ResolverOptions};
use smol_str::SmolStr;
use url::Url;

use crate::dpop::NonceCache;
use crate::error::{OAuthError, Result};
use crate::pkce::{generate_challenge, generate_dpop_key, generate_token, generate_verifier};
use crate::request::{TokenExchangeError, exchange_code, refresh_token, revoke_token};
use crate::resolver::{discover_auth_server, issuer_equivalent};
use crate::session::{AuthRequestData, Session};
use crate::store::{AuthStore, StateError, StoreError};
use crate::types::{
    AuthorizeParams, CallbackParams, RefreshRequestParams, RevokeRequestParams, TokenRequestParams,
};

/// Static client configuration.
#[derive(Debug, Clone, Builder)]
pub struct ClientConfig {
    /// OAuth client id (the client metadata URL).
    pub client_id: String,
    /// Redirect URI registered for this client.
    pub redirect_uri: String,
    #[builder(default = String::from("atproto transition:generic"))]
    pub scope: String,
    /// Last-resort authorization server when discovery finds nothing.
    pub default_auth_server: Option<Url>,
    /// Issuer priority for picking a client's active session when it
    /// holds more than one.
    #[builder(default)]
    pub issuer_priority: Vec<String>,
    /// How long a pending login may sit between redirect and callback.
    #[builder(default = 10)]
    pub state_ttl_minutes: i64,
}

/// Where to send the browser, plus the state to correlate the callback.
#[derive(Debug, Clone)]
pub struct AuthorizeRedirect {
    pub url: String,
    pub state: SmolStr,
}

pub struct OAuthClient<S, H> {
    pub store: S,
    http: Arc<H>,
    identity: IdentityResolver<Arc<H>>,
    nonces: Arc<NonceCache>,
    config: ClientConfig,
}

impl<S, H> OAuthClient<S, H>
where
    S: AuthStore,
    H: HttpClient + Send + Sync,
{
    pub fn new(store: S, http: H, resolver_options: ResolverOptions, config: ClientConfig) -> Self {
        let http = Arc::new(http);
        let identity = IdentityResolver::new(http.clone(), resolver_options);
        Self {
            store,
            http,
            identity,
            nonces: Arc::new(NonceCache::new()),
            config,
        }
    }

    /// Starts a login: resolves the identity, discovers the authorization
    /// server, persists the transient state, and returns the
    /// authorization URL to redirect to.
    pub async fn start_login(
        &self,
        input: impl AsRef<str>,
        client_ref: impl Into<SmolStr>,
        return_url: Option<String>,
    ) -> Result<AuthorizeRedirect> {
        let ident = AtIdentifier::new(input.as_ref())?;
        let resolved = self.identity.resolve_identity(&ident).await?;
        let metadata = discover_auth_server(
            self.http.as_ref(),
            &resolved.pds,
            self.config.default_auth_server.as_ref(),
        )
        .await?;

        let state = generate_token();
        let verifier = generate_verifier();
        let challenge = generate_challenge(&verifier);
        let dpop_key = generate_dpop_key();

        let expires_at = Datetime::new(
            (chrono::Utc::now() + Duration::minutes(self.config.state_ttl_minutes)).fixed_offset(),
        );
        self.store
            .save_auth_request(AuthRequestData {
                state: state.clone(),
                pkce_verifier: verifier,
                return_url,
                client_ref: client_ref.into(),
                dpop_key,
                did: resolved.did.clone(),
                handle: resolved.handle.clone(),
                pds: resolved.pds,
                issuer: metadata.issuer.clone(),
                authorization_endpoint: metadata.authorization_endpoint.clone(),
                token_endpoint: metadata.token_endpoint,
                revocation_endpoint: metadata.revocation_endpoint,
                expires_at,
            })
            .await?;
        tracing::debug!(did = %resolved.did, issuer = %metadata.issuer, "login started");

        let params = AuthorizeParams {
            response_type: "code".into(),
            client_id: self.config.client_id.clone(),
            redirect_uri: self.config.redirect_uri.clone(),
            state: state.clone(),
            scope: self.config.scope.clone(),
            code_challenge: challenge,
            code_challenge_method: "S256".into(),
            login_hint: resolved.handle.map(|h| h.to_string()),
        };
        let url = format!(
            "{}?{}",
            metadata.authorization_endpoint,
            serde_html_form::to_string(&params)?
        );
        Ok(AuthorizeRedirect { url, state })
    }

    /// Completes a login from the callback parameters.
    ///
    /// A provider `error` terminates immediately; an unknown or reused
    /// state fails with [`StateError`]; otherwise the state is consumed
    /// (single use) and the code is exchanged.
    pub async fn callback(&self, params: CallbackParams) -> Result<Session> {
        if let Some(error) = params.error {
            return Err(OAuthError::Provider {
                error,
                description: params.error_description,
            });
        }

        let Some(state) = params.state else {
            return Err(StateError::Unknown.into());
        };
        let data = self.store.consume_auth_request(&state).await?;

        if let Some(iss) = &params.iss {
            if !issuer_equivalent(iss, &data.issuer) {
                return Err(OAuthError::IssuerMismatch {
                    expected: data.issuer,
                    got: iss.clone(),
                });
            }
        }
        let Some(code) = params.code else {
            return Err(OAuthError::Callback("missing `code` parameter".into()));
        };

        let token_response = exchange_code(
            self.http.as_ref(),
            &self.nonces,
            &data.dpop_key,
            &data.token_endpoint,
            TokenRequestParams {
                grant_type: "authorization_code",
                code: &code,
                redirect_uri: &self.config.redirect_uri,
                client_id: &self.config.client_id,
                code_verifier: &data.pkce_verifier,
            },
            &data.did,
        )
        .await?;

        // One provider session per client: log the client out of any
        // other sessions before establishing the new one.
        for stale in self.store.sessions_for_client(&data.client_ref).await? {
            tracing::debug!(
                session = %stale.session_id,
                issuer = %stale.issuer,
                "revoking other provider session before establishing new one"
            );
            self.store.delete_session(&stale.session_id).await?;
        }

        let now = chrono::Utc::now();
        let expires_at = token_response
            .expires_in
            .map(|secs| Datetime::new((now + Duration::seconds(secs)).fixed_offset()));
        let session = Session {
            session_id: generate_token(),
            client_ref: data.client_ref,
            did: data.did,
            handle: data.handle,
            pds: data.pds,
            issuer: data.issuer,
            token_endpoint: data.token_endpoint,
            revocation_endpoint: data.revocation_endpoint,
            access_token: token_response.access_token,
            refresh_token: token_response.refresh_token,
            dpop_key: data.dpop_key,
            scope: token_response.scope,
            created_at: Datetime::new(now.fixed_offset()),
            expires_at,
        };
        self.store.save_session(session.clone()).await?;
        tracing::debug!(did = %session.did, "session established");
        Ok(session)
    }

    /// Passive session lookup. Absent and expired sessions are a normal
    /// unauthenticated state, not an error.
    pub async fn get_session(&self, session_id: &str) -> core::result::Result<Option<Session>, StoreError> {
        let Some(session) = self.store.get_session(session_id).await? else {
            return Ok(None);
        };
        if session.is_expired(&Datetime::now()) {
            return Ok(None);
        }
        Ok(Some(session))
    }

    /// The client's active session, picked by configured issuer priority,
    /// falling back to the most recently created.
    pub async fn active_session(
        &self,
        client_ref: &str,
    ) -> core::result::Result<Option<Session>, StoreError> {
        let now = Datetime::now();
        let mut live: Vec<Session> = self
            .store
            .sessions_for_client(client_ref)
            .await?
            .into_iter()
            .filter(|s| !s.is_expired(&now))
            .collect();
        for issuer in &self.config.issuer_priority {
            if let Some(idx) = live.iter().position(|s| issuer_equivalent(&s.issuer, issuer)) {
                return Ok(Some(live.swap_remove(idx)));
            }
        }
        live.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(live.into_iter().next())
    }

    /// Refreshes a session's tokens in place. The DPoP key is retained;
    /// only the tokens rotate.
    pub async fn refresh_session(&self, session_id: &str) -> Result<Session> {
        let Some(mut session) = self.store.get_session(session_id).await? else {
            return Err(OAuthError::SessionInvalid);
        };
        let Some(refresh) = session.refresh_token.clone() else {
            return Err(TokenExchangeError::NoRefreshToken.into());
        };

        let response = refresh_token(
            self.http.as_ref(),
            &self.nonces,
            &session.dpop_key,
            &session.token_endpoint,
            RefreshRequestParams {
                grant_type: "refresh_token",
                refresh_token: &refresh,
                client_id: &self.config.client_id,
            },
        )
        .await?;

        session.access_token = response.access_token;
        if response.refresh_token.is_some() {
            session.refresh_token = response.refresh_token;
        }
        session.expires_at = response
            .expires_in
            .map(|secs| Datetime::new((chrono::Utc::now() + Duration::seconds(secs)).fixed_offset()));
        self.store.save_session(session.clone()).await?;
        Ok(session)
    }

    /// Logs a session out: best-effort remote revocation, then store
    /// deletion. Revocation failures are logged, not surfaced; the
    /// session is gone locally either way.
    pub async fn logout(&self, session_id: &str) -> Result<()> {
        if let Some(session) = self.store.get_session(session_id).await? {
            if let Some(endpoint) = &session.revocation_endpoint {
                let result = revoke_token(
                    self.http.as_ref(),
                    &self.nonces,
                    &session.dpop_key,
                    endpoint,
                    RevokeRequestParams {
                        token: &session.access_token,
                        client_id: &self.config.client_id,
                    },
                )
                .await;
                if let Err(e) = result {
                    tracing::warn!(session = %session_id, error = %e, "token revocation failed");
                }
            }
        }
        self.store.delete_session(session_id).await?;
        Ok(())
    }

    /// Drops expired login states; call periodically.
    pub async fn purge_expired_states(&self) -> core::result::Result<usize, StoreError> {
        self.store.purge_expired(&Datetime::now()).await
    }

    /// Shared nonce cache, for callers that make their own resource-server
    /// requests with this client's sessions.
    pub fn nonce_cache(&self) -> Arc<NonceCache> {
        self.nonces.clone()
    }

    /// The underlying HTTP client.
    pub fn http(&self) -> &Arc<H> {
        &self.http
    }
}
