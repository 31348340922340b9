//! Marginalia: comments and reactions on deployed contracts, written as
//! content-addressed records into the author's own repository and
//! mirrored into a local SQLite index for threading and aggregation.
//!
//! The remote repository is always the source of truth; the index is a
//! best-effort projection that a backfill sweep can rebuild at any time.

pub mod agent;
pub mod index;
pub mod ratelimit;
pub mod records;
pub mod writer;

pub use marginalia_common as common;
pub use marginalia_identity as identity;
pub use marginalia_oauth as oauth;

pub use agent::{Agent, AgentError};
pub use index::{CommentRow, IndexError, LocalIndex, ReactionCount};
pub use ratelimit::{FixedWindowLimiter, RateLimitExceeded, RateLimiterConfig};
pub use records::{
    COMMENT_COLLECTION, CommentRecord, CommentScope, ContractSubject, LineRange,
    REACTION_COLLECTION, ReactionRecord, ReplyRef, ValidationError,
};
pub use writer::{RecordWriter, WriteError, WriteOutcome};
