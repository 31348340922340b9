use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, de::Error};
use smol_str::SmolStr;

use crate::error::ParseError;

/// A human-readable account handle, hostname-shaped (`alice.example.com`).
///
/// Normalized to lowercase on parse; at least two dot-separated segments,
/// each a valid DNS label.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Hash)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Handle(SmolStr);

impl Handle {
    /// Parses a handle from the given string.
    pub fn new(handle: impl AsRef<str>) -> Result<Self, ParseError> {
        let raw = handle.as_ref();
        if raw.len() > 253 {
            return Err(ParseError::new(
                "handle",
                raw,
                "longer than 253 characters",
            ));
        }
        let lowered = raw.to_ascii_lowercase();
        let segments: Vec<&str> = lowered.split('.').collect();
        if segments.len() < 2 {
            return Err(ParseError::new(
                "handle",
                raw,
                "must contain at least two dot-separated segments",
            ));
        }
        for segment in &segments {
            if segment.is_empty() || segment.len() > 63 {
                return Err(ParseError::new("handle", raw, "segment length out of range"));
            }
            if !segment
                .bytes()
                .all(|c| c.is_ascii_alphanumeric() || c == b'-')
            {
                return Err(ParseError::new(
                    "handle",
                    raw,
                    "segments may only contain letters, digits, and hyphens",
                ));
            }
            if segment.starts_with('-') || segment.ends_with('-') {
                return Err(ParseError::new(
                    "handle",
                    raw,
                    "segments may not start or end with a hyphen",
                ));
            }
        }
        // The TLD label may not start with a digit.
        if segments
            .last()
            .is_some_and(|tld| tld.starts_with(|c: char| c.is_ascii_digit()))
        {
            return Err(ParseError::new(
                "handle",
                raw,
                "final segment may not start with a digit",
            ));
        }
        Ok(Self(SmolStr::new(&lowered)))
    }

    /// Returns the handle as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Handle {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for Handle {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value: String = Deserialize::deserialize(deserializer)?;
        Self::new(&value).map_err(D::Error::custom)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Handle {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl Deref for Handle {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case() {
        let h = Handle::new("Alice.Example.COM").unwrap();
        assert_eq!(h.as_str(), "alice.example.com");
    }

    #[test]
    fn rejects_invalid() {
        assert!(Handle::new("alice").is_err());
        assert!(Handle::new("alice..example").is_err());
        assert!(Handle::new("-alice.example").is_err());
        assert!(Handle::new("alice.123").is_err());
        assert!(Handle::new("al ice.example").is_err());
    }
}
