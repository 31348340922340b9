//! The authenticated request client: XRPC repo calls against the
//! session's PDS with `Authorization: DPoP` plus a proof per request,
//! inheriting the single nonce retry from the OAuth engine.

use std::sync::Arc;

use http::{Method, Request, StatusCode};
use marginalia_common::{Did, HttpClient, RecordUri, StrongRef, Tid, TransportError};
use marginalia_oauth::dpop::{NonceCache, ProofError, send_with_dpop};
use marginalia_oauth::session::Session;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum AgentError {
    /// The PDS no longer accepts the session's tokens. Callers doing a
    /// passive "am I logged in" check should treat this as logged-out,
    /// not as a failure worth surfacing.
    #[error("session invalid or expired")]
    #[diagnostic(
        code(marginalia::agent::session_invalid),
        help("refresh the session or send the user back through login")
    )]
    SessionInvalid,
    #[error(transparent)]
    #[diagnostic(transparent)]
    Dpop(#[from] ProofError),
    #[error("PDS returned {status}: {body}")]
    #[diagnostic(code(marginalia::agent::http_status))]
    HttpStatus {
        status: StatusCode,
        body: serde_json::Value,
    },
    #[error(transparent)]
    #[diagnostic(code(marginalia::agent::transport))]
    Transport(#[from] TransportError),
    #[error(transparent)]
    #[diagnostic(code(marginalia::agent::serde_json))]
    SerdeJson(#[from] serde_json::Error),
    #[error(transparent)]
    #[diagnostic(code(marginalia::agent::serde_form))]
    SerdeHtmlForm(#[from] serde_html_form::ser::Error),
    #[error(transparent)]
    #[diagnostic(code(marginalia::agent::parse))]
    Parse(#[from] marginalia_common::error::ParseError),
}

type Result<T> = core::result::Result<T, AgentError>;

/// Repo-write response: where the record landed and its content hash.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateRecordOutput {
    pub uri: RecordUri,
    pub cid: SmolStr,
}

impl CreateRecordOutput {
    pub fn strong_ref(&self) -> StrongRef {
        StrongRef {
            uri: self.uri.clone(),
            cid: self.cid.clone(),
        }
    }
}

/// One record in a `listRecords` page.
#[derive(Debug, Clone, Deserialize)]
pub struct RecordEnvelope {
    pub uri: RecordUri,
    pub cid: SmolStr,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListRecordsOutput {
    pub records: Vec<RecordEnvelope>,
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateRecordInput<'a, R: Serialize> {
    repo: &'a Did,
    collection: &'a str,
    rkey: &'a str,
    record: &'a R,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteRecordInput<'a> {
    repo: &'a Did,
    collection: &'a str,
    rkey: &'a str,
}

/// An agent bound to one session, sharing the process-wide nonce cache.
pub struct Agent<H> {
    http: Arc<H>,
    nonces: Arc<NonceCache>,
    session: Session,
}

impl<H: HttpClient + Sync> Agent<H> {
    pub fn new(http: Arc<H>, nonces: Arc<NonceCache>, session: Session) -> Self {
        Self {
            http,
            nonces,
            session,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn did(&self) -> &Did {
        &self.session.did
    }

    fn xrpc_url(&self, nsid: &str) -> String {
        format!("{}xrpc/{nsid}", self.session.pds)
    }

    async fn send(&self, request: Request<Vec<u8>>) -> Result<http::Response<Vec<u8>>> {
        let response = send_with_dpop(
            self.http.as_ref(),
            &self.session.dpop_key,
            &self.nonces,
            false,
            request,
        )
        .await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(AgentError::SessionInvalid);
        }
        if !response.status().is_success() {
            return Err(AgentError::HttpStatus {
                status: response.status(),
                body: serde_json::from_slice(response.body()).unwrap_or(serde_json::Value::Null),
            });
        }
        Ok(response)
    }

    async fn procedure<I: Serialize, O: for<'de> Deserialize<'de>>(
        &self,
        nsid: &str,
        input: &I,
    ) -> Result<O> {
        let req = Request::builder()
            .method(Method::POST)
            .uri(self.xrpc_url(nsid))
            .header("Content-Type", "application/json")
            .header(
                "Authorization",
                format!("DPoP {}", self.session.access_token),
            )
            .body(serde_json::to_vec(input)?)
            .map_err(TransportError::from)?;
        let response = self.send(req).await?;
        if response.body().is_empty() {
            Ok(serde_json::from_slice(b"null")?)
        } else {
            Ok(serde_json::from_slice(response.body())?)
        }
    }

    async fn query<P: Serialize, O: for<'de> Deserialize<'de>>(
        &self,
        nsid: &str,
        params: &P,
    ) -> Result<O> {
        let url = format!("{}?{}", self.xrpc_url(nsid), serde_html_form::to_string(params)?);
        let req = Request::builder()
            .method(Method::GET)
            .uri(url)
            .header(
                "Authorization",
                format!("DPoP {}", self.session.access_token),
            )
            .body(Vec::new())
            .map_err(TransportError::from)?;
        let response = self.send(req).await?;
        Ok(serde_json::from_slice(response.body())?)
    }

    /// Writes a record into the session account's repository under the
    /// given key.
    pub async fn create_record<R: Serialize + Sync>(
        &self,
        collection: &str,
        rkey: &Tid,
        record: &R,
    ) -> Result<CreateRecordOutput> {
        self.procedure(
            "com.atproto.repo.createRecord",
            &CreateRecordInput {
                repo: &self.session.did,
                collection,
                rkey: rkey.as_str(),
                record,
            },
        )
        .await
    }

    /// Deletes a record from the session account's repository.
    pub async fn delete_record(&self, collection: &str, rkey: &str) -> Result<()> {
        let _: serde_json::Value = self
            .procedure(
                "com.atproto.repo.deleteRecord",
                &DeleteRecordInput {
                    repo: &self.session.did,
                    collection,
                    rkey,
                },
            )
            .await?;
        Ok(())
    }

    /// One page of the account's records in a collection.
    pub async fn list_records(
        &self,
        collection: &str,
        limit: u32,
        cursor: Option<&str>,
    ) -> Result<ListRecordsOutput> {
        #[derive(Serialize)]
        struct Params<'a> {
            repo: &'a str,
            collection: &'a str,
            limit: u32,
            #[serde(skip_serializing_if = "Option::is_none")]
            cursor: Option<&'a str>,
        }
        self.query(
            "com.atproto.repo.listRecords",
            &Params {
                repo: self.session.did.as_str(),
                collection,
                limit,
                cursor,
            },
        )
        .await
    }
}
