//! The record model: comment and reaction shapes, their validation rules,
//! and comment scope classification.
//!
//! Validation is pure (no I/O, no clock) and every failure names the
//! invariant it tripped. Records are append-only once written; an "edit"
//! is a delete followed by a fresh record from the same author.

use marginalia_common::{Datetime, StrongRef};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use thiserror::Error;

/// Collection NSID for comment records.
pub const COMMENT_COLLECTION: &str = "site.marginalia.comment";
/// Collection NSID for reaction records.
pub const REACTION_COLLECTION: &str = "site.marginalia.reaction";

/// Longest accepted comment text, in characters.
pub const MAX_TEXT_LEN: usize = 2000;
/// Longest accepted subject field (contract address or deploy tx id).
pub const MAX_SUBJECT_LEN: usize = 512;
/// Longest accepted reaction emoji, in characters.
pub const MAX_EMOJI_LEN: usize = 8;

#[derive(Debug, Error, Diagnostic)]
pub enum ValidationError {
    #[error("subject {field} must not be empty")]
    #[diagnostic(code(marginalia::validation::empty_subject))]
    EmptySubject { field: &'static str },
    #[error("subject {field} too long ({actual} > {max} characters)")]
    #[diagnostic(code(marginalia::validation::subject_too_long))]
    SubjectTooLong {
        field: &'static str,
        max: usize,
        actual: usize,
    },
    #[error("line number must be 1 or greater")]
    #[diagnostic(code(marginalia::validation::line_out_of_range))]
    LineOutOfRange,
    #[error("line range invalid: start {start} must be >= 1 and end {end} >= start")]
    #[diagnostic(code(marginalia::validation::line_range_invalid))]
    LineRangeInvalid { start: u32, end: u32 },
    #[error("line and lineRange are mutually exclusive; supply at most one")]
    #[diagnostic(
        code(marginalia::validation::line_target_conflict),
        help("a comment targets the whole contract, a line, or a range, never more than one")
    )]
    LineTargetConflict,
    #[error("text must not be empty")]
    #[diagnostic(code(marginalia::validation::empty_text))]
    EmptyText,
    /// Oversized text is rejected outright rather than truncated.
    #[error("text too long ({actual} > {max} characters)")]
    #[diagnostic(code(marginalia::validation::text_too_long))]
    TextTooLong { max: usize, actual: usize },
    #[error("emoji must be 1-{MAX_EMOJI_LEN} characters, got {actual}")]
    #[diagnostic(code(marginalia::validation::emoji_invalid))]
    EmojiInvalid { actual: usize },
    #[error("{which} reference is malformed: {reason}")]
    #[diagnostic(code(marginalia::validation::malformed_reference))]
    MalformedReference {
        which: &'static str,
        reason: &'static str,
    },
}

/// What a comment is about: a deployed contract, identified by its
/// address and the transaction that deployed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractSubject {
    pub contract: SmolStr,
    pub deploy_tx: SmolStr,
}

/// An inclusive line range within the contract source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRange {
    pub start: u32,
    pub end: u32,
}

/// Thread placement of a reply: the thread root and the immediate parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyRef {
    pub root: StrongRef,
    pub parent: StrongRef,
}

/// Which granularity a comment targets. Exactly one applies per record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentScope {
    /// The contract as a whole.
    Contract,
    /// A single source line.
    Line(u32),
    /// An inclusive range of source lines.
    Range(LineRange),
}

/// A comment on a contract, optionally anchored to a line or line range,
/// optionally a reply within a thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentRecord {
    #[serde(rename = "$type")]
    pub record_type: SmolStr,
    pub subject: ContractSubject,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_range: Option<LineRange>,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<ReplyRef>,
    pub created_at: Datetime,
}

impl CommentRecord {
    /// A contract-level comment; anchor it with [`Self::at_line`] or
    /// [`Self::at_range`], thread it with [`Self::as_reply`].
    pub fn new(subject: ContractSubject, text: impl Into<String>) -> Self {
        Self {
            record_type: SmolStr::new_static(COMMENT_COLLECTION),
            subject,
            line: None,
            line_range: None,
            text: text.into(),
            reply: None,
            created_at: Datetime::now(),
        }
    }

    pub fn at_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    pub fn at_range(mut self, start: u32, end: u32) -> Self {
        self.line_range = Some(LineRange { start, end });
        self
    }

    pub fn as_reply(mut self, root: StrongRef, parent: StrongRef) -> Self {
        self.reply = Some(ReplyRef { root, parent });
        self
    }

    /// Classifies the comment by which anchor is set. Only meaningful on
    /// a validated record; with both anchors present there is no single
    /// classification, and validation rejects that shape.
    pub fn scope(&self) -> CommentScope {
        match (self.line, self.line_range) {
            (Some(line), None) => CommentScope::Line(line),
            (None, Some(range)) => CommentScope::Range(range),
            _ => CommentScope::Contract,
        }
    }

    /// Checks every structural invariant, naming the first one violated.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_subject(&self.subject)?;
        if self.line.is_some() && self.line_range.is_some() {
            return Err(ValidationError::LineTargetConflict);
        }
        if let Some(line) = self.line {
            if line < 1 {
                return Err(ValidationError::LineOutOfRange);
            }
        }
        if let Some(LineRange { start, end }) = self.line_range {
            if start < 1 || end < start {
                return Err(ValidationError::LineRangeInvalid { start, end });
            }
        }
        validate_text(&self.text)?;
        if let Some(reply) = &self.reply {
            validate_reference("reply.root", &reply.root)?;
            validate_reference("reply.parent", &reply.parent)?;
        }
        Ok(())
    }
}

/// An emoji reaction to a specific version of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionRecord {
    #[serde(rename = "$type")]
    pub record_type: SmolStr,
    pub subject: StrongRef,
    pub emoji: SmolStr,
    pub created_at: Datetime,
}

impl ReactionRecord {
    pub fn new(subject: StrongRef, emoji: impl Into<SmolStr>) -> Self {
        Self {
            record_type: SmolStr::new_static(REACTION_COLLECTION),
            subject,
            emoji: emoji.into(),
            created_at: Datetime::now(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_reference("subject", &self.subject)?;
        let chars = self.emoji.chars().count();
        if chars == 0 || chars > MAX_EMOJI_LEN {
            return Err(ValidationError::EmojiInvalid { actual: chars });
        }
        Ok(())
    }
}

fn validate_subject(subject: &ContractSubject) -> Result<(), ValidationError> {
    for (field, value) in [
        ("contract", &subject.contract),
        ("deployTx", &subject.deploy_tx),
    ] {
        if value.is_empty() {
            return Err(ValidationError::EmptySubject { field });
        }
        if value.len() > MAX_SUBJECT_LEN {
            return Err(ValidationError::SubjectTooLong {
                field,
                max: MAX_SUBJECT_LEN,
                actual: value.len(),
            });
        }
    }
    Ok(())
}

fn validate_text(text: &str) -> Result<(), ValidationError> {
    if text.is_empty() {
        return Err(ValidationError::EmptyText);
    }
    let chars = text.chars().count();
    if chars > MAX_TEXT_LEN {
        return Err(ValidationError::TextTooLong {
            max: MAX_TEXT_LEN,
            actual: chars,
        });
    }
    Ok(())
}

fn validate_reference(which: &'static str, reference: &StrongRef) -> Result<(), ValidationError> {
    // The RecordUri type already guarantees the three-segment shape; the
    // content hash can still arrive empty through a struct literal.
    if reference.cid.is_empty() {
        return Err(ValidationError::MalformedReference {
            which,
            reason: "empty content hash",
        });
    }
    Ok(())
}
