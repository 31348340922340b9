use std::cmp;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error};
use smol_str::SmolStr;

use crate::error::ParseError;

/// An RFC 3339 timestamp with required timezone.
///
/// The serialized form is preserved from parsing so records round-trip
/// byte-identically; comparisons use the parsed instant.
#[derive(Clone, Debug, Eq, Hash)]
pub struct Datetime {
    serialized: SmolStr,
    dt: chrono::DateTime<chrono::FixedOffset>,
}

impl Datetime {
    /// The current instant in UTC, microsecond precision.
    pub fn now() -> Self {
        Self::new(chrono::Utc::now().fixed_offset())
    }

    /// Constructs a timestamp, rounding to microsecond precision.
    pub fn new(dt: chrono::DateTime<chrono::FixedOffset>) -> Self {
        use chrono::DurationRound;
        let dt = dt
            .duration_round(chrono::Duration::microseconds(1))
            .expect("microsecond rounding cannot exceed limits");
        let serialized = SmolStr::new(dt.to_rfc3339_opts(chrono::SecondsFormat::Micros, true));
        Self { serialized, dt }
    }

    /// Parses an RFC 3339 timestamp string.
    pub fn parse(s: impl AsRef<str>) -> Result<Self, ParseError> {
        let s = s.as_ref();
        let dt = chrono::DateTime::parse_from_rfc3339(s)
            .map_err(|e| ParseError::new("datetime", s, e.to_string().as_str()))?;
        Ok(Self {
            serialized: SmolStr::new(s),
            dt,
        })
    }

    /// Returns the preserved serialized form.
    pub fn as_str(&self) -> &str {
        &self.serialized
    }

    /// The parsed instant.
    pub fn as_datetime(&self) -> chrono::DateTime<chrono::FixedOffset> {
        self.dt
    }
}

impl PartialEq for Datetime {
    fn eq(&self, other: &Self) -> bool {
        self.dt == other.dt
    }
}

impl Ord for Datetime {
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        self.dt.cmp(&other.dt)
    }
}

impl PartialOrd for Datetime {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for Datetime {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Datetime {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Datetime {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value: String = Deserialize::deserialize(deserializer)?;
        Self::parse(&value).map_err(D::Error::custom)
    }
}

impl fmt::Display for Datetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
