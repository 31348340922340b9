//! DPoP proof construction and the nonce-challenge protocol.
//!
//! Every outbound authenticated call gets a one-time proof binding the
//! session keypair to the method and URL. Servers may demand a fresh
//! replay nonce; when they do, the call is retried exactly once with the
//! nonce embedded, and any nonce seen on a response is cached for future
//! calls to that host. The cache is process-local and best-effort: under
//! horizontal scale-out other instances just pay an extra nonce
//! round-trip.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use dashmap::DashMap;
use http::{Request, Response};
use jose_jwa::{Algorithm, Signing};
use jose_jwk::{Jwk, Key, crypto};
use marginalia_common::{HttpClient, TransportError};
use p256::ecdsa::SigningKey;
use rand::RngCore;
use rand::rngs::ThreadRng;
use sha2::Digest;
use smol_str::SmolStr;

use crate::jose::{Claims, Header, create_signed_jwt};

pub const JWT_HEADER_TYP_DPOP: &str = "dpop+jwt";

#[derive(serde::Deserialize)]
struct ErrorResponse {
    error: String,
}

#[derive(thiserror::Error, Debug, miette::Diagnostic)]
pub enum ProofError {
    #[error(transparent)]
    #[diagnostic(code(marginalia_oauth::dpop::header))]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),
    #[error("crypto error: {0:?}")]
    #[diagnostic(
        code(marginalia_oauth::dpop::jwk),
        help("the session key must be an EC P-256 secret JWK")
    )]
    JwkCrypto(crypto::Error),
    #[error("key does not match any alg supported by the server")]
    #[diagnostic(code(marginalia_oauth::dpop::unsupported_key))]
    UnsupportedKey,
    #[error(transparent)]
    #[diagnostic(code(marginalia_oauth::dpop::serde))]
    SerdeJson(#[from] serde_json::Error),
    #[error(transparent)]
    #[diagnostic(code(marginalia_oauth::dpop::transport))]
    Transport(#[from] TransportError),
}

type Result<T> = core::result::Result<T, ProofError>;

/// Process-local cache of the last replay nonce issued by each host.
#[derive(Debug, Default)]
pub struct NonceCache {
    inner: DashMap<SmolStr, SmolStr>,
}

impl NonceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, host: &str) -> Option<SmolStr> {
        self.inner.get(host).map(|v| v.clone())
    }

    pub fn set(&self, host: &str, nonce: SmolStr) {
        self.inner.insert(SmolStr::new(host), nonce);
    }
}

/// Sends a request with a DPoP proof attached, applying the
/// nonce-challenge protocol: at most two sequential attempts, never more.
pub async fn send_with_dpop<T>(
    client: &T,
    key: &Key,
    nonces: &NonceCache,
    is_to_auth_server: bool,
    mut request: Request<Vec<u8>>,
) -> Result<Response<Vec<u8>>>
where
    T: HttpClient + Sync,
{
    let method = SmolStr::new(request.method().as_str());
    let url = request.uri().to_string();
    let host = SmolStr::new(request.uri().host().unwrap_or_default());
    // https://datatracker.ietf.org/doc/html/rfc9449#section-4.2
    let ath = request
        .headers()
        .get("Authorization")
        .filter(|v| v.to_str().is_ok_and(|s| s.starts_with("DPoP ")))
        .map(|auth| {
            SmolStr::new(URL_SAFE_NO_PAD.encode(sha2::Sha256::digest(&auth.as_bytes()[5..])))
        });

    let init_nonce = nonces.get(&host);
    let init_proof = build_dpop_proof(
        key,
        method.clone(),
        url.clone(),
        init_nonce.clone(),
        ath.clone(),
    )?;
    request.headers_mut().insert("DPoP", init_proof.parse()?);
    let response = client.send_http(request.clone()).await?;

    let next_nonce = response
        .headers()
        .get("DPoP-Nonce")
        .and_then(|v| v.to_str().ok())
        .map(SmolStr::new);
    match &next_nonce {
        Some(nonce) if next_nonce != init_nonce => {
            // Cache the fresh nonce for future requests to this host.
            nonces.set(&host, nonce.clone());
        }
        _ => {
            // No nonce was returned or it matches the one we sent; nothing
            // to update and no reason to retry.
            return Ok(response);
        }
    }

    if !is_use_dpop_nonce_error(is_to_auth_server, &response) {
        return Ok(response);
    }
    tracing::debug!(%host, "nonce challenge, retrying once with fresh nonce");
    let next_proof = build_dpop_proof(key, method, url, next_nonce, ath)?;
    request.headers_mut().insert("DPoP", next_proof.parse()?);
    let response = client.send_http(request).await?;
    Ok(response)
}

#[inline]
fn is_use_dpop_nonce_error(is_to_auth_server: bool, response: &Response<Vec<u8>>) -> bool {
    // https://datatracker.ietf.org/doc/html/rfc9449#name-authorization-server-provid
    if is_to_auth_server {
        if response.status() == 400 {
            if let Ok(res) = serde_json::from_slice::<ErrorResponse>(response.body()) {
                return res.error == "use_dpop_nonce";
            }
        }
    }
    // https://datatracker.ietf.org/doc/html/rfc9449#name-resource-server-provided-no
    else if response.status() == 401 {
        if let Some(www_auth) = response
            .headers()
            .get("WWW-Authenticate")
            .and_then(|v| v.to_str().ok())
        {
            return www_auth.starts_with("DPoP") && www_auth.contains(r#"error="use_dpop_nonce""#);
        }
    }
    false
}

#[inline]
pub(crate) fn generate_jti() -> SmolStr {
    let mut bytes = [0u8; 12];
    ThreadRng::default().fill_bytes(&mut bytes);
    SmolStr::new(URL_SAFE_NO_PAD.encode(bytes))
}

/// Build a compact JWS (ES256) for DPoP with the public JWK embedded.
pub fn build_dpop_proof(
    key: &Key,
    method: SmolStr,
    url: String,
    nonce: Option<SmolStr>,
    ath: Option<SmolStr>,
) -> Result<String> {
    let secret = match crypto::Key::try_from(key).map_err(ProofError::JwkCrypto)? {
        crypto::Key::P256(crypto::Kind::Secret(sk)) => sk,
        _ => return Err(ProofError::UnsupportedKey),
    };
    let mut header = Header::from(Algorithm::Signing(Signing::Es256));
    header.typ = Some(JWT_HEADER_TYP_DPOP.into());
    header.jwk = Some(Jwk {
        key: Key::from(&crypto::Key::from(secret.public_key())),
        prm: Default::default(),
    });

    let claims = Claims {
        jti: Some(generate_jti()),
        iat: Some(Utc::now().timestamp()),
        htm: Some(method),
        htu: Some(url),
        ath,
        nonce,
    };
    Ok(create_signed_jwt(
        SigningKey::from(secret.clone()),
        &header,
        &claims,
    )?)
}
