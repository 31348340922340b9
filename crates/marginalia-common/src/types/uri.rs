use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, de::Error};
use smol_str::SmolStr;

use crate::error::ParseError;

/// A record URI: `at://<authority>/<collection>/<rkey>`.
///
/// Exactly three path segments: the repository authority (a DID or
/// handle), the collection NSID, and the record key. Anything shorter or
/// longer is rejected; this type never holds a bare repository or
/// collection URI.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Hash)]
#[serde(transparent)]
pub struct RecordUri(SmolStr);

impl RecordUri {
    /// Parses a record URI, enforcing the three-segment shape.
    pub fn new(uri: impl AsRef<str>) -> Result<Self, ParseError> {
        let uri = uri.as_ref();
        if uri.len() > 2048 {
            return Err(ParseError::new("record uri", uri, "longer than 2048 characters"));
        }
        let Some(rest) = uri.strip_prefix("at://") else {
            return Err(ParseError::new("record uri", uri, "missing `at://` scheme"));
        };
        let segments: Vec<&str> = rest.split('/').collect();
        if segments.len() != 3 {
            return Err(ParseError::new(
                "record uri",
                uri,
                "expected exactly authority/collection/rkey",
            ));
        }
        if segments.iter().any(|s| s.is_empty()) {
            return Err(ParseError::new("record uri", uri, "empty path segment"));
        }
        Ok(Self(SmolStr::new(uri)))
    }

    /// Assembles a record URI from its parts.
    pub fn from_parts(
        authority: impl AsRef<str>,
        collection: impl AsRef<str>,
        rkey: impl AsRef<str>,
    ) -> Result<Self, ParseError> {
        Self::new(format!(
            "at://{}/{}/{}",
            authority.as_ref(),
            collection.as_ref(),
            rkey.as_ref()
        ))
    }

    fn segment(&self, idx: usize) -> &str {
        self.0
            .strip_prefix("at://")
            .and_then(|rest| rest.split('/').nth(idx))
            .expect("validated at construction")
    }

    /// The repository authority (DID or handle).
    pub fn authority(&self) -> &str {
        self.segment(0)
    }

    /// The collection NSID.
    pub fn collection(&self) -> &str {
        self.segment(1)
    }

    /// The record key.
    pub fn rkey(&self) -> &str {
        self.segment(2)
    }

    /// Returns the URI as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for RecordUri {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for RecordUri {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value: String = Deserialize::deserialize(deserializer)?;
        Self::new(&value).map_err(D::Error::custom)
    }
}

impl fmt::Display for RecordUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RecordUri {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl Deref for RecordUri {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}

/// A content-addressed pointer to an exact record version: the record URI
/// plus the hash of the record body it referred to when created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub struct StrongRef {
    pub uri: RecordUri,
    pub cid: SmolStr,
}

impl StrongRef {
    /// Builds a strong reference, rejecting an empty content hash.
    pub fn new(uri: RecordUri, cid: impl Into<SmolStr>) -> Result<Self, ParseError> {
        let cid = cid.into();
        if cid.is_empty() {
            return Err(ParseError::new(
                "strong ref",
                uri.as_str(),
                "empty content hash",
            ));
        }
        Ok(Self { uri, cid })
    }
}

impl fmt::Display for StrongRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.uri, self.cid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_segments_exactly() {
        assert!(RecordUri::new("at://did:plc:abc/site.marginalia.comment/3jzfcijpj2z2a").is_ok());
        assert!(RecordUri::new("at://did:plc:abc/site.marginalia.comment").is_err());
        assert!(RecordUri::new("at://did:plc:abc/a/b/c").is_err());
        assert!(RecordUri::new("https://example.com/a/b").is_err());
        assert!(RecordUri::new("at://did:plc:abc//rkey").is_err());
    }

    #[test]
    fn rkey_round_trips() {
        let uri = RecordUri::new("at://did:plc:abc/site.marginalia.comment/3jzfcijpj2z2a").unwrap();
        let rebuilt =
            RecordUri::from_parts(uri.authority(), uri.collection(), uri.rkey()).unwrap();
        assert_eq!(uri, rebuilt);
        assert_eq!(rebuilt.rkey(), "3jzfcijpj2z2a");
    }

    #[test]
    fn strong_ref_requires_hash() {
        let uri = RecordUri::new("at://did:plc:abc/site.marginalia.comment/3jzfcijpj2z2a").unwrap();
        assert!(StrongRef::new(uri.clone(), "bafyreib2rxk3rh6kzwq").is_ok());
        assert!(StrongRef::new(uri, "").is_err());
    }
}
