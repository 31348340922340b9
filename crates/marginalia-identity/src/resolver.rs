//! Resolution pipeline: handle → DID → DID document → PDS endpoint.
//!
//! Handle resolution goes through an XRPC resolution service; documents
//! come from the PLC directory for `did:plc` and from the domain's
//! well-known path for `did:web`. Fetched documents are validated against
//! the DID they were requested for before anything trusts them.

use bon::Builder;
use http::{Request, StatusCode};
use marginalia_common::{Did, Handle, HttpClient, TransportError, error::ParseError};
use miette::Diagnostic;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

/// Errors that can occur during identity resolution.
#[derive(Debug, Error, Diagnostic)]
pub enum IdentityError {
    #[error("handle did not resolve: {0}")]
    #[diagnostic(
        code(marginalia_identity::handle_not_found),
        help("check the handle spelling; the account may have been deleted")
    )]
    HandleNotFound(Handle),
    #[error("unsupported DID method: {0}")]
    #[diagnostic(
        code(marginalia_identity::unsupported_did_method),
        help("supported DID methods: did:web, did:plc")
    )]
    UnsupportedDidMethod(String),
    #[error("missing PDS endpoint in DID document")]
    #[diagnostic(code(marginalia_identity::missing_pds_endpoint))]
    MissingPdsEndpoint,
    #[error("HTTP error: {0}")]
    #[diagnostic(
        code(marginalia_identity::http),
        help("check network connectivity and TLS configuration")
    )]
    Http(#[from] TransportError),
    #[error("HTTP status {0}")]
    #[diagnostic(
        code(marginalia_identity::http_status),
        help("verify the resolution service and directory URLs")
    )]
    HttpStatus(StatusCode),
    #[error("URL parse error: {0}")]
    #[diagnostic(code(marginalia_identity::url))]
    Url(#[from] url::ParseError),
    #[error("serialize/deserialize error: {0}")]
    #[diagnostic(code(marginalia_identity::serde))]
    Serde(#[from] serde_json::Error),
    #[error(transparent)]
    #[diagnostic(code(marginalia_identity::ident))]
    Ident(#[from] ParseError),
    /// Document id did not match the requested DID; carries the fetched
    /// document so callers can inspect it without trusting it.
    #[error("DID document id mismatch (expected {expected})")]
    #[diagnostic(
        code(marginalia_identity::doc_id_mismatch),
        help("the directory returned a document for a different DID; do not trust it")
    )]
    DocIdMismatch {
        expected: Did,
        doc: Box<DidDocument>,
    },
}

/// Login input: either a handle or a DID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AtIdentifier {
    Handle(Handle),
    Did(Did),
}

impl AtIdentifier {
    /// Parses an identifier, preferring the DID shape when the input has
    /// the `did:` prefix.
    pub fn new(input: impl AsRef<str>) -> Result<Self, ParseError> {
        let input = input.as_ref();
        if input.starts_with("did:") {
            Ok(AtIdentifier::Did(Did::new(input)?))
        } else {
            Ok(AtIdentifier::Handle(Handle::new(input)?))
        }
    }
}

/// A service entry in a DID document.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: String,
    #[serde(rename = "type")]
    pub service_type: String,
    pub service_endpoint: String,
}

/// The subset of a DID document the login flow needs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DidDocument {
    pub id: Did,
    #[serde(default)]
    pub also_known_as: Vec<String>,
    #[serde(default)]
    pub service: Vec<Service>,
}

impl DidDocument {
    /// Extracts the personal data server endpoint, if the document
    /// advertises one.
    pub fn pds_endpoint(&self) -> Option<Url> {
        self.service
            .iter()
            .find(|s| {
                s.service_type == "AtprotoPersonalDataServer" || s.id.ends_with("#atproto_pds")
            })
            .and_then(|s| Url::parse(&s.service_endpoint).ok())
    }
}

/// A fully resolved identity: the stable DID and where its data lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub did: Did,
    pub handle: Option<Handle>,
    pub pds: Url,
}

/// Resolver configuration.
#[derive(Debug, Clone, Builder)]
pub struct ResolverOptions {
    /// Base URL of the XRPC service used for handle resolution.
    #[builder(default = Url::parse("https://public.api.bsky.app").expect("valid url"))]
    pub resolution_service: Url,
    /// Base URL of the PLC directory.
    #[builder(default = Url::parse("https://plc.directory").expect("valid url"))]
    pub plc_directory: Url,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Identity resolver over any [`HttpClient`].
pub struct IdentityResolver<H> {
    client: H,
    options: ResolverOptions,
}

#[derive(Deserialize)]
struct ResolveHandleOutput {
    did: Did,
}

impl<H: HttpClient + Sync> IdentityResolver<H> {
    pub fn new(client: H, options: ResolverOptions) -> Self {
        Self { client, options }
    }

    async fn get_json(&self, url: &Url) -> Result<(StatusCode, Vec<u8>), IdentityError> {
        let req = Request::builder()
            .uri(url.as_str())
            .header("Accept", "application/json")
            .body(Vec::new())
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        let res = self.client.send_http(req).await?;
        Ok((res.status(), res.into_body()))
    }

    /// Resolves a handle to its DID through the resolution service.
    pub async fn resolve_handle(&self, handle: &Handle) -> Result<Did, IdentityError> {
        let mut url = self
            .options
            .resolution_service
            .join("/xrpc/com.atproto.identity.resolveHandle")?;
        url.query_pairs_mut().append_pair("handle", handle.as_str());

        let (status, body) = self.get_json(&url).await?;
        match status {
            StatusCode::OK => {
                let output: ResolveHandleOutput = serde_json::from_slice(&body)?;
                Ok(output.did)
            }
            StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND => {
                Err(IdentityError::HandleNotFound(handle.clone()))
            }
            other => Err(IdentityError::HttpStatus(other)),
        }
    }

    /// Fetches and validates the DID document for the given DID.
    pub async fn resolve_did_doc(&self, did: &Did) -> Result<DidDocument, IdentityError> {
        let url = match did.method() {
            "plc" => {
                // Url::join would treat `did:` as a scheme; set the path directly.
                let mut url = self.options.plc_directory.clone();
                url.set_path(did.as_str());
                url
            }
            "web" => {
                let host = did
                    .as_str()
                    .strip_prefix("did:web:")
                    .expect("method checked above")
                    .replace("%3A", ":");
                Url::parse(&format!("https://{host}/.well-known/did.json"))?
            }
            other => return Err(IdentityError::UnsupportedDidMethod(other.to_string())),
        };

        let (status, body) = self.get_json(&url).await?;
        if !status.is_success() {
            return Err(IdentityError::HttpStatus(status));
        }
        let doc: DidDocument = serde_json::from_slice(&body)?;
        if doc.id != *did {
            return Err(IdentityError::DocIdMismatch {
                expected: did.clone(),
                doc: Box::new(doc),
            });
        }
        Ok(doc)
    }

    /// Resolves a login input all the way to a DID plus PDS endpoint.
    pub async fn resolve_identity(
        &self,
        input: &AtIdentifier,
    ) -> Result<ResolvedIdentity, IdentityError> {
        let (did, handle) = match input {
            AtIdentifier::Handle(handle) => {
                let did = self.resolve_handle(handle).await?;
                tracing::debug!(%handle, %did, "resolved handle");
                (did, Some(handle.clone()))
            }
            AtIdentifier::Did(did) => (did.clone(), None),
        };
        let doc = self.resolve_did_doc(&did).await?;
        let pds = doc.pds_endpoint().ok_or(IdentityError::MissingPdsEndpoint)?;
        Ok(ResolvedIdentity { did, handle, pds })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    #[derive(Default, Clone)]
    struct MockHttp {
        responses: Arc<Mutex<Vec<http::Response<Vec<u8>>>>>,
    }

    impl MockHttp {
        async fn push(&self, status: StatusCode, body: serde_json::Value) {
            self.responses.lock().await.push(
                http::Response::builder()
                    .status(status)
                    .body(serde_json::to_vec(&body).unwrap())
                    .unwrap(),
            );
        }
    }

    impl HttpClient for MockHttp {
        async fn send_http(
            &self,
            _request: http::Request<Vec<u8>>,
        ) -> Result<http::Response<Vec<u8>>, TransportError> {
            Ok(self.responses.lock().await.remove(0))
        }
    }

    fn doc_json(did: &str, pds: &str) -> serde_json::Value {
        serde_json::json!({
            "id": did,
            "alsoKnownAs": ["at://alice.example.com"],
            "service": [{
                "id": "#atproto_pds",
                "type": "AtprotoPersonalDataServer",
                "serviceEndpoint": pds
            }]
        })
    }

    #[tokio::test]
    async fn resolves_handle_to_identity() {
        let http = MockHttp::default();
        http.push(StatusCode::OK, serde_json::json!({"did": "did:plc:alice123"}))
            .await;
        http.push(StatusCode::OK, doc_json("did:plc:alice123", "https://pds.example.com"))
            .await;

        let resolver = IdentityResolver::new(http, ResolverOptions::default());
        let ident = resolver
            .resolve_identity(&AtIdentifier::new("alice.example.com").unwrap())
            .await
            .unwrap();
        assert_eq!(ident.did.as_str(), "did:plc:alice123");
        assert_eq!(ident.pds.as_str(), "https://pds.example.com/");
    }

    #[tokio::test]
    async fn unknown_handle_is_typed() {
        let http = MockHttp::default();
        http.push(StatusCode::NOT_FOUND, serde_json::json!({"error": "HandleNotFound"}))
            .await;

        let resolver = IdentityResolver::new(http, ResolverOptions::default());
        let err = resolver
            .resolve_handle(&Handle::new("nobody.example.com").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::HandleNotFound(_)));
    }

    #[tokio::test]
    async fn document_for_wrong_did_is_rejected() {
        let http = MockHttp::default();
        http.push(StatusCode::OK, doc_json("did:plc:mallory", "https://pds.example.com"))
            .await;

        let resolver = IdentityResolver::new(http, ResolverOptions::default());
        let err = resolver
            .resolve_did_doc(&Did::new("did:plc:alice123").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::DocIdMismatch { .. }));
    }

    #[tokio::test]
    async fn document_without_pds_is_typed() {
        let http = MockHttp::default();
        http.push(StatusCode::OK, serde_json::json!({"did": "did:plc:alice123"}))
            .await;
        http.push(
            StatusCode::OK,
            serde_json::json!({"id": "did:plc:alice123", "service": []}),
        )
        .await;

        let resolver = IdentityResolver::new(http, ResolverOptions::default());
        let err = resolver
            .resolve_identity(&AtIdentifier::new("alice.example.com").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::MissingPdsEndpoint));
    }
}
