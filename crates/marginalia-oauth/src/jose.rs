//! Just enough JOSE to sign DPoP proofs: a compact JWS header/claims pair
//! signed with ES256.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jose_jwa::Algorithm;
use jose_jwk::Jwk;
use p256::ecdsa::{Signature, SigningKey, signature::Signer};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub alg: Algorithm,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub typ: Option<SmolStr>,
    /// Public half of the signing key, embedded so the receiver can verify
    /// possession without a prior key exchange.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwk: Option<Jwk>,
}

impl From<Algorithm> for Header {
    fn from(alg: Algorithm) -> Self {
        Self {
            alg,
            typ: None,
            jwk: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Claims {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<SmolStr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    /// HTTP method the proof is bound to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub htm: Option<SmolStr>,
    /// Full target URL the proof is bound to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub htu: Option<String>,
    /// Hash of the access token; resource-server proofs only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ath: Option<SmolStr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<SmolStr>,
}

/// Builds a compact JWS from the header and claims, signed with the given
/// ES256 key.
pub fn create_signed_jwt(
    key: SigningKey,
    header: &Header,
    claims: &Claims,
) -> serde_json::Result<String> {
    let header = URL_SAFE_NO_PAD.encode(serde_json::to_string(header)?);
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_string(claims)?);
    let signature: Signature = key.sign(format!("{header}.{payload}").as_bytes());
    Ok(format!(
        "{header}.{payload}.{}",
        URL_SAFE_NO_PAD.encode(signature.to_bytes())
    ))
}
