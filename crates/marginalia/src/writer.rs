//! The record writer: dual-write with deliberate asymmetry.
//!
//! The remote repository write is authoritative: if it fails, nothing
//! else happens and the error surfaces. The local index insert afterwards
//! is best effort: a failure there is logged and swallowed, because the
//! record already exists where it matters and a backfill sweep can repair
//! the projection. Callers never see a write rejected because the mirror
//! hiccuped.

use marginalia_common::{HttpClient, RecordUri, StrongRef, Tid};
use miette::Diagnostic;
use thiserror::Error;

use crate::agent::{Agent, AgentError};
use crate::index::LocalIndex;
use crate::records::{
    COMMENT_COLLECTION, CommentRecord, REACTION_COLLECTION, ReactionRecord, ValidationError,
};

/// Failures a write can surface. Index errors are deliberately absent:
/// after a successful remote write they are logged, never returned.
#[derive(Debug, Error, Diagnostic)]
pub enum WriteError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Agent(#[from] AgentError),
}

type Result<T> = core::result::Result<T, WriteError>;

/// A successful write: where the record landed, under which key.
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    pub reference: StrongRef,
    pub rkey: Tid,
}

pub struct RecordWriter<H> {
    agent: Agent<H>,
    index: LocalIndex,
}

impl<H: HttpClient + Sync> RecordWriter<H> {
    pub fn new(agent: Agent<H>, index: LocalIndex) -> Self {
        Self { agent, index }
    }

    pub fn agent(&self) -> &Agent<H> {
        &self.agent
    }

    /// Validates and writes a comment, then mirrors it locally.
    pub async fn write_comment(&self, record: &CommentRecord) -> Result<WriteOutcome> {
        record.validate()?;
        let rkey = Tid::now();
        let created = self
            .agent
            .create_record(COMMENT_COLLECTION, &rkey, record)
            .await?;
        let reference = created.strong_ref();

        if let Err(e) = self
            .index
            .insert_comment(&reference, self.agent.did(), record)
            .await
        {
            tracing::warn!(uri = %reference.uri, error = %e, "local index insert failed; remote write stands");
        }
        Ok(WriteOutcome { reference, rkey })
    }

    /// Validates and writes a reaction, then mirrors it locally.
    pub async fn write_reaction(&self, record: &ReactionRecord) -> Result<WriteOutcome> {
        record.validate()?;
        let rkey = Tid::now();
        let created = self
            .agent
            .create_record(REACTION_COLLECTION, &rkey, record)
            .await?;
        let reference = created.strong_ref();

        if let Err(e) = self
            .index
            .insert_reaction(&reference, self.agent.did(), record)
            .await
        {
            tracing::warn!(uri = %reference.uri, error = %e, "local index insert failed; remote write stands");
        }
        Ok(WriteOutcome { reference, rkey })
    }

    /// Deletes a comment remotely, then best-effort drops the mirror row.
    /// Recreating with fresh content is how an author "edits".
    pub async fn delete_comment(&self, uri: &RecordUri) -> Result<()> {
        self.agent
            .delete_record(COMMENT_COLLECTION, uri.rkey())
            .await?;
        if let Err(e) = self.index.delete_comment(uri).await {
            tracing::warn!(%uri, error = %e, "local index delete failed; remote delete stands");
        }
        Ok(())
    }

    /// Deletes a reaction remotely, then best-effort drops the mirror row.
    pub async fn delete_reaction(&self, uri: &RecordUri) -> Result<()> {
        self.agent
            .delete_record(REACTION_COLLECTION, uri.rkey())
            .await?;
        if let Err(e) = self.index.delete_reaction(uri).await {
            tracing::warn!(%uri, error = %e, "local index delete failed; remote delete stands");
        }
        Ok(())
    }

    /// Re-derives index rows from the author's remote repository,
    /// repairing any staleness the best-effort mirror accumulated.
    /// Returns how many records were replayed.
    pub async fn backfill_author(&self) -> Result<usize> {
        let mut replayed = 0;
        for collection in [COMMENT_COLLECTION, REACTION_COLLECTION] {
            let mut cursor: Option<String> = None;
            loop {
                let page = self
                    .agent
                    .list_records(collection, 100, cursor.as_deref())
                    .await?;
                for envelope in &page.records {
                    let reference = StrongRef {
                        uri: envelope.uri.clone(),
                        cid: envelope.cid.clone(),
                    };
                    let outcome = if collection == COMMENT_COLLECTION {
                        match serde_json::from_value::<CommentRecord>(envelope.value.clone()) {
                            Ok(record) => self
                                .index
                                .insert_comment(&reference, self.agent.did(), &record)
                                .await
                                .err()
                                .map(|e| e.to_string()),
                            Err(e) => Some(e.to_string()),
                        }
                    } else {
                        match serde_json::from_value::<ReactionRecord>(envelope.value.clone()) {
                            Ok(record) => self
                                .index
                                .insert_reaction(&reference, self.agent.did(), &record)
                                .await
                                .err()
                                .map(|e| e.to_string()),
                            Err(e) => Some(e.to_string()),
                        }
                    };
                    match outcome {
                        None => replayed += 1,
                        Some(error) => {
                            tracing::warn!(uri = %envelope.uri, %error, "skipping unreplayable record during backfill")
                        }
                    }
                }
                cursor = page.cursor;
                if cursor.is_none() || page.records.is_empty() {
                    break;
                }
            }
        }
        Ok(replayed)
    }
}
