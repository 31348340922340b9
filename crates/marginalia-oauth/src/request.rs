//! Token-endpoint requests: code exchange, refresh, revocation.
//!
//! All three go out form-encoded with a DPoP proof and inherit the
//! single nonce retry from [`crate::dpop`]. A non-success status after
//! that retry is final and surfaces as [`TokenExchangeError`].

use http::{Method, Request, StatusCode};
use jose_jwk::Key;
use marginalia_common::{Did, HttpClient};
use miette::Diagnostic;
use serde::Serialize;
use thiserror::Error;

use crate::dpop::{NonceCache, ProofError, send_with_dpop};
use crate::types::{RefreshRequestParams, RevokeRequestParams, TokenRequestParams, TokenResponse};

#[derive(Debug, Error, Diagnostic)]
pub enum TokenExchangeError {
    #[error(transparent)]
    #[diagnostic(code(marginalia_oauth::token::dpop))]
    Dpop(#[from] ProofError),
    #[error("token endpoint returned {status}: {body}")]
    #[diagnostic(
        code(marginalia_oauth::token::http_status_body),
        help("inspect `error` and `error_description` in the response body")
    )]
    HttpStatusWithBody {
        status: StatusCode,
        body: serde_json::Value,
    },
    #[error("token endpoint returned {0}")]
    #[diagnostic(code(marginalia_oauth::token::http_status))]
    HttpStatus(StatusCode),
    #[error("token response verification failed: {0}")]
    #[diagnostic(
        code(marginalia_oauth::token::verification),
        help("the token response must carry a `sub` matching the resolved account")
    )]
    TokenVerification(String),
    #[error("no refresh token available")]
    #[diagnostic(code(marginalia_oauth::token::no_refresh_token))]
    NoRefreshToken,
    #[error(transparent)]
    #[diagnostic(code(marginalia_oauth::token::serde_json))]
    SerdeJson(#[from] serde_json::Error),
    #[error(transparent)]
    #[diagnostic(code(marginalia_oauth::token::serde_form))]
    SerdeHtmlForm(#[from] serde_html_form::ser::Error),
}

type Result<T> = core::result::Result<T, TokenExchangeError>;

async fn token_endpoint_post<T, P>(
    client: &T,
    nonces: &NonceCache,
    key: &Key,
    endpoint: &str,
    params: &P,
) -> Result<http::Response<Vec<u8>>>
where
    T: HttpClient + Sync,
    P: Serialize,
{
    let body = serde_html_form::to_string(params)?;
    let req = Request::builder()
        .uri(endpoint)
        .method(Method::POST)
        .header("Content-Type", "application/x-www-form-urlencoded")
        .body(body.into_bytes())
        .map_err(|e| ProofError::Transport(marginalia_common::TransportError::from(e)))?;
    Ok(send_with_dpop(client, key, nonces, true, req).await?)
}

fn parse_token_response(res: http::Response<Vec<u8>>) -> Result<TokenResponse> {
    if res.status() == StatusCode::OK {
        Ok(serde_json::from_slice(res.body())?)
    } else if res.status().is_client_error() {
        Err(TokenExchangeError::HttpStatusWithBody {
            status: res.status(),
            body: serde_json::from_slice(res.body())
                .unwrap_or(serde_json::Value::Null),
        })
    } else {
        Err(TokenExchangeError::HttpStatus(res.status()))
    }
}

/// Exchanges an authorization code for tokens and verifies the response
/// was issued for the expected account.
pub async fn exchange_code<T: HttpClient + Sync>(
    client: &T,
    nonces: &NonceCache,
    key: &Key,
    endpoint: &str,
    params: TokenRequestParams<'_>,
    expected_sub: &Did,
) -> Result<TokenResponse> {
    let response =
        parse_token_response(token_endpoint_post(client, nonces, key, endpoint, &params).await?)?;
    // The response must be checked before its `sub` can be trusted; and
    // the `sub` must be the account we resolved at login start.
    match &response.sub {
        None => Err(TokenExchangeError::TokenVerification(
            "missing `sub` in token response".into(),
        )),
        Some(sub) if sub != expected_sub.as_str() => Err(TokenExchangeError::TokenVerification(
            format!("token issued for {sub}, expected {expected_sub}"),
        )),
        Some(_) => Ok(response),
    }
}

/// Refreshes an access token with the refresh-token grant.
pub async fn refresh_token<T: HttpClient + Sync>(
    client: &T,
    nonces: &NonceCache,
    key: &Key,
    endpoint: &str,
    params: RefreshRequestParams<'_>,
) -> Result<TokenResponse> {
    parse_token_response(token_endpoint_post(client, nonces, key, endpoint, &params).await?)
}

/// Best-effort token revocation; tolerates the 200/204 divergence among
/// server implementations.
pub async fn revoke_token<T: HttpClient + Sync>(
    client: &T,
    nonces: &NonceCache,
    key: &Key,
    endpoint: &str,
    params: RevokeRequestParams<'_>,
) -> Result<()> {
    let res = token_endpoint_post(client, nonces, key, endpoint, &params).await?;
    if res.status().is_success() {
        Ok(())
    } else {
        Err(TokenExchangeError::HttpStatus(res.status()))
    }
}
