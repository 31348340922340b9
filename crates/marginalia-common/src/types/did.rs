use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, de::Error};
use smol_str::SmolStr;

use crate::error::ParseError;

/// A decentralized identifier: the stable identity key an account keeps
/// across handle changes and server migrations.
///
/// Only the `plc` and `web` methods are accepted, matching what the
/// identity resolver can actually resolve.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Hash)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Did(SmolStr);

impl Did {
    /// Parses a DID from the given string.
    pub fn new(did: impl AsRef<str>) -> Result<Self, ParseError> {
        let did = did.as_ref();
        if did.len() > 2048 {
            return Err(ParseError::new("did", did, "longer than 2048 characters"));
        }
        let Some(rest) = did.strip_prefix("did:") else {
            return Err(ParseError::new("did", did, "missing `did:` prefix"));
        };
        let Some((method, id)) = rest.split_once(':') else {
            return Err(ParseError::new("did", did, "missing method-specific id"));
        };
        if method != "plc" && method != "web" {
            return Err(ParseError::new(
                "did",
                did,
                "unsupported method (expected did:plc or did:web)",
            ));
        }
        if id.is_empty()
            || !id
                .bytes()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, b'.' | b'_' | b'%' | b'-' | b':'))
        {
            return Err(ParseError::new("did", did, "malformed method-specific id"));
        }
        Ok(Self(SmolStr::new(did)))
    }

    /// The DID method, e.g. `plc`.
    pub fn method(&self) -> &str {
        self.0
            .strip_prefix("did:")
            .and_then(|rest| rest.split(':').next())
            .expect("validated at construction")
    }

    /// Returns the DID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Did {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for Did {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value: String = Deserialize::deserialize(deserializer)?;
        Self::new(&value).map_err(D::Error::custom)
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Did {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl Deref for Did {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plc_and_web() {
        assert!(Did::new("did:plc:ewvi7nxzyoun6zhxrhs64oiz").is_ok());
        assert!(Did::new("did:web:example.com").is_ok());
        assert_eq!(Did::new("did:plc:abc").unwrap().method(), "plc");
    }

    #[test]
    fn rejects_other_shapes() {
        assert!(Did::new("plc:abc").is_err());
        assert!(Did::new("did:key:z6Mk").is_err());
        assert!(Did::new("did:plc:").is_err());
        assert!(Did::new("did:plc:has spaces").is_err());
    }
}
