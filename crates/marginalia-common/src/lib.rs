//! Core types shared across the Marginalia crates: identifiers (handles,
//! DIDs, record keys, record URIs), timestamps, and the HTTP client seam
//! the network-facing crates build on.

pub mod error;
pub mod http_client;
pub mod types;

pub use error::{ParseError, TransportError};
pub use http_client::HttpClient;
pub use types::datetime::Datetime;
pub use types::did::Did;
pub use types::handle::Handle;
pub use types::tid::Tid;
pub use types::uri::{RecordUri, StrongRef};
