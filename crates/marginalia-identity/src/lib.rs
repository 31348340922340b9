//! Identity resolution: handle → DID via a resolution service, DID →
//! document via the PLC directory or `did:web` well-known, and PDS
//! service-endpoint extraction from the document.

pub mod resolver;

pub use resolver::{
    AtIdentifier, DidDocument, IdentityError, IdentityResolver, ResolvedIdentity, ResolverOptions,
};
