//! Authorization-server discovery.
//!
//! Given a resource server (PDS) URL, find the authorization server that
//! issues tokens on its behalf. Three steps, in order:
//!
//! 1. the PDS's protected-resource metadata (`authorization_servers`),
//! 2. the PDS itself, in case it is its own authorization server,
//! 3. a configured default authorization server.
//!
//! [`DiscoveryError`] is returned only when all three are exhausted.

use http::{Request, StatusCode};
use marginalia_common::{HttpClient, TransportError};
use miette::Diagnostic;
use thiserror::Error;
use url::Url;

use crate::types::{AuthServerMetadata, ProtectedResourceMetadata};

#[derive(Debug, Error, Diagnostic)]
pub enum DiscoveryError {
    #[error("no usable authorization server for {pds}")]
    #[diagnostic(
        code(marginalia_oauth::discovery::exhausted),
        help(
            "the PDS advertises no authorization server, is not one itself, and no default is configured"
        )
    )]
    Exhausted { pds: Url },
    #[error("authorization server metadata is invalid: {0}")]
    #[diagnostic(code(marginalia_oauth::discovery::authorization_server_metadata))]
    AuthorizationServerMetadata(String),
    #[error(transparent)]
    #[diagnostic(code(marginalia_oauth::discovery::transport))]
    Transport(#[from] TransportError),
    #[error("http status: {0}")]
    #[diagnostic(code(marginalia_oauth::discovery::http_status))]
    HttpStatus(StatusCode),
    #[error(transparent)]
    #[diagnostic(code(marginalia_oauth::discovery::serde_json))]
    SerdeJson(#[from] serde_json::Error),
    #[error(transparent)]
    #[diagnostic(code(marginalia_oauth::discovery::url))]
    Url(#[from] url::ParseError),
}

type Result<T> = core::result::Result<T, DiscoveryError>;

/// Compare two issuer strings strictly but without spuriously failing on
/// trivial differences.
///
/// Rules:
/// - Schemes must match exactly.
/// - Hostnames and effective ports must match (a missing port equals the
///   scheme default).
/// - Paths must match, except that an empty path and `/` are equivalent.
/// - A query or fragment on either side fails the comparison.
pub(crate) fn issuer_equivalent(a: &str, b: &str) -> bool {
    fn normalize(url: &Url) -> Option<(String, String, u16, String)> {
        if url.query().is_some() || url.fragment().is_some() {
            return None;
        }
        let scheme = url.scheme().to_string();
        let host = url.host_str()?.to_string();
        let port = url.port_or_known_default()?;
        let path = match url.path() {
            "" | "/" => "/".to_string(),
            other => other.to_string(),
        };
        Some((scheme, host, port, path))
    }

    match (Url::parse(a), Url::parse(b)) {
        (Ok(ua), Ok(ub)) => match (normalize(&ua), normalize(&ub)) {
            (Some(na), Some(nb)) => na == nb,
            _ => false,
        },
        _ => a == b,
    }
}

async fn get_json<T: HttpClient + Sync>(client: &T, url: &Url) -> Result<(StatusCode, Vec<u8>)> {
    let req = Request::builder()
        .uri(url.as_str())
        .header("Accept", "application/json")
        .body(Vec::new())
        .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
    let res = client.send_http(req).await?;
    Ok((res.status(), res.into_body()))
}

/// Fetches and validates an authorization server's metadata document.
pub async fn fetch_auth_server_metadata<T: HttpClient + Sync>(
    client: &T,
    issuer: &Url,
) -> Result<AuthServerMetadata> {
    let url = issuer.join("/.well-known/oauth-authorization-server")?;
    let (status, body) = get_json(client, &url).await?;
    if status != StatusCode::OK {
        return Err(DiscoveryError::HttpStatus(status));
    }
    let mut metadata: AuthServerMetadata = serde_json::from_slice(&body)?;
    // https://datatracker.ietf.org/doc/html/rfc8414#section-3.3
    // Accept a semantically equivalent issuer and normalize it to the
    // requested URL form to avoid trailing-slash quirks downstream.
    if issuer_equivalent(&metadata.issuer, issuer.as_str()) {
        metadata.issuer = issuer.as_str().to_string();
        Ok(metadata)
    } else {
        Err(DiscoveryError::AuthorizationServerMetadata(format!(
            "issuer {} does not match metadata URL {issuer}",
            metadata.issuer
        )))
    }
}

/// Fetches a resource server's protected-resource metadata document.
pub async fn fetch_protected_resource<T: HttpClient + Sync>(
    client: &T,
    pds: &Url,
) -> Result<ProtectedResourceMetadata> {
    let url = pds.join("/.well-known/oauth-protected-resource")?;
    let (status, body) = get_json(client, &url).await?;
    if status != StatusCode::OK {
        return Err(DiscoveryError::HttpStatus(status));
    }
    Ok(serde_json::from_slice(&body)?)
}

/// Discovers the authorization server for a PDS, falling back from its
/// protected-resource metadata, to the PDS itself, to the configured
/// default.
pub async fn discover_auth_server<T: HttpClient + Sync>(
    client: &T,
    pds: &Url,
    default_auth_server: Option<&Url>,
) -> Result<AuthServerMetadata> {
    match fetch_protected_resource(client, pds).await {
        Ok(resource) => {
            if let Some(issuer) = resource
                .authorization_servers
                .as_deref()
                .and_then(|servers| servers.first())
            {
                let issuer = Url::parse(issuer)?;
                match fetch_auth_server_metadata(client, &issuer).await {
                    Ok(metadata) => return Ok(metadata),
                    Err(e) => {
                        tracing::debug!(%issuer, error = %e, "advertised authorization server unusable")
                    }
                }
            }
        }
        Err(e) => tracing::debug!(%pds, error = %e, "no protected-resource metadata"),
    }

    // The PDS may be its own authorization server.
    match fetch_auth_server_metadata(client, pds).await {
        Ok(metadata) => return Ok(metadata),
        Err(e) => tracing::debug!(%pds, error = %e, "PDS is not an authorization server"),
    }

    if let Some(default) = default_auth_server {
        match fetch_auth_server_metadata(client, default).await {
            Ok(metadata) => return Ok(metadata),
            Err(e) => {
                tracing::debug!(issuer = %default, error = %e, "default authorization server unusable")
            }
        }
    }

    Err(DiscoveryError::Exhausted { pds: pds.clone() })
}
