//! Wire types: server metadata documents, authorize/token request
//! parameters, and token responses.

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Authorization-server metadata, from
/// `/.well-known/oauth-authorization-server`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AuthServerMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revocation_endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scopes_supported: Option<Vec<SmolStr>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dpop_signing_alg_values_supported: Option<Vec<SmolStr>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization_response_iss_parameter_supported: Option<bool>,
}

/// Protected-resource metadata, from
/// `/.well-known/oauth-protected-resource`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProtectedResourceMetadata {
    pub resource: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization_servers: Option<Vec<String>>,
}

/// Query parameters for the authorization redirect.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizeParams {
    pub response_type: SmolStr,
    pub client_id: String,
    pub redirect_uri: String,
    pub state: SmolStr,
    pub scope: String,
    pub code_challenge: String,
    pub code_challenge_method: SmolStr,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login_hint: Option<String>,
}

/// Query parameters the authorization server sends back to the redirect
/// URI. Either `code` + `state`, or `error` (+ optional description).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub iss: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Form body for the authorization-code grant.
#[derive(Debug, Clone, Serialize)]
pub struct TokenRequestParams<'a> {
    pub grant_type: &'static str,
    pub code: &'a str,
    pub redirect_uri: &'a str,
    pub client_id: &'a str,
    pub code_verifier: &'a str,
}

/// Form body for the refresh-token grant.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshRequestParams<'a> {
    pub grant_type: &'static str,
    pub refresh_token: &'a str,
    pub client_id: &'a str,
}

/// Form body for token revocation.
#[derive(Debug, Clone, Serialize)]
pub struct RevokeRequestParams<'a> {
    pub token: &'a str,
    pub client_id: &'a str,
}

/// Token-endpoint success response.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: SmolStr,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    /// The account the tokens were issued for.
    #[serde(default)]
    pub sub: Option<String>,
}
