use std::fmt;
use std::ops::Deref;
use std::str::FromStr;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, de::Error};
use smol_str::SmolStr;

use crate::error::ParseError;

const S32_CHAR: &[u8] = b"234567abcdefghijklmnopqrstuvwxyz";

fn s32_encode(mut i: u64) -> SmolStr {
    let mut buf = [0u8; 13];
    for slot in buf.iter_mut().rev() {
        *slot = S32_CHAR[(i & 0x1F) as usize];
        i >>= 5;
    }
    SmolStr::new(core::str::from_utf8(&buf).expect("s32 alphabet is ascii"))
}

fn s32_char_valid(c: u8) -> bool {
    S32_CHAR.contains(&c)
}

/// Last issued raw TID value, used to keep [`Tid::now`] non-decreasing
/// even when the wall clock steps backwards or two calls land in the
/// same microsecond.
static LAST_ISSUED: AtomicU64 = AtomicU64::new(0);

/// Random per-process clock id, so keys minted by different processes
/// against the same repository do not collide on identical timestamps.
static CLOCK_ID: LazyLock<u64> = LazyLock::new(|| rand::thread_rng().gen_range(0..1024));

/// A timestamp identifier: the sortable record key used for every record
/// written to a repository.
///
/// 13 characters of base32-sortable text encoding a 64-bit value laid out
/// as `0TTTTTTT...TTTTCCCCCCCCCC`: a 53-bit microsecond timestamp followed
/// by a 10-bit clock id. Lexicographic order over the encoded form equals
/// numeric order over the raw value, so record keys sort chronologically.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Hash)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Tid(SmolStr);

impl Tid {
    /// Parses a `TID` from the given string.
    pub fn new(tid: impl AsRef<str>) -> Result<Self, ParseError> {
        let tid = tid.as_ref();
        if tid.len() != 13 {
            return Err(ParseError::new(
                "tid",
                tid,
                "must be exactly 13 characters",
            ));
        }
        let bytes = tid.as_bytes();
        // The leading character may not encode a set high bit.
        if !b"234567abcdefghij".contains(&bytes[0]) {
            return Err(ParseError::new("tid", tid, "first character out of range"));
        }
        if !bytes[1..].iter().copied().all(s32_char_valid) {
            return Err(ParseError::new(
                "tid",
                tid,
                "contains non-base32-sortable characters",
            ));
        }
        Ok(Self(SmolStr::new(tid)))
    }

    /// Construct a TID from an explicit timestamp and clock id.
    ///
    /// `clkid` is masked to its low 10 bits.
    pub fn from_datetime(clkid: u16, time: chrono::DateTime<chrono::Utc>) -> Self {
        let micros = time.timestamp_micros() as u64;
        let raw = ((micros << 10) & 0x7FFF_FFFF_FFFF_FC00) | (clkid as u64 & 0x3FF);
        Self(s32_encode(raw))
    }

    /// Construct a TID for the current instant.
    ///
    /// Successive calls are strictly increasing: if the clock reads the
    /// same microsecond twice (or steps backwards), the previous raw value
    /// is bumped by one instead, so keys generated in rapid succession
    /// still sort in generation order.
    pub fn now() -> Self {
        let micros = chrono::Utc::now().timestamp_micros() as u64;
        let candidate = ((micros << 10) & 0x7FFF_FFFF_FFFF_FC00) | *CLOCK_ID;
        let mut prev = LAST_ISSUED.load(Ordering::Relaxed);
        loop {
            let next = if candidate > prev { candidate } else { prev + 1 };
            match LAST_ISSUED.compare_exchange_weak(
                prev,
                next,
                Ordering::SeqCst,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Self(s32_encode(next)),
                Err(actual) => prev = actual,
            }
        }
    }

    /// Returns the TID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Tid {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for Tid {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value: &str = Deserialize::deserialize(deserializer)?;
        Self::new(value).map_err(D::Error::custom)
    }
}

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Tid> for String {
    fn from(value: Tid) -> Self {
        value.0.to_string()
    }
}

impl From<Tid> for SmolStr {
    fn from(value: Tid) -> Self {
        value.0
    }
}

impl AsRef<str> for Tid {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl Deref for Tid {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_length_and_alphabet() {
        let tid = Tid::now();
        assert_eq!(tid.as_str().len(), 13);
        assert!(Tid::new(tid.as_str()).is_ok());
    }

    #[test]
    fn rejects_bad_input() {
        assert!(Tid::new("").is_err());
        assert!(Tid::new("too-short").is_err());
        assert!(Tid::new("0000000000000").is_err());
        // 'z' in the first slot would encode a set high bit
        assert!(Tid::new("zaaaaaaaaaaaa").is_err());
    }

    #[test]
    fn rapid_generation_is_non_decreasing() {
        let mut prev = Tid::now();
        for _ in 0..1000 {
            let next = Tid::now();
            assert!(next >= prev, "{next} < {prev}");
            assert!(next.as_str() >= prev.as_str());
            prev = next;
        }
    }

    #[test]
    fn encoding_sorts_chronologically() {
        let early = chrono::DateTime::from_timestamp_micros(1_700_000_000_000_000).unwrap();
        let late = chrono::DateTime::from_timestamp_micros(1_700_000_000_000_001).unwrap();
        let a = Tid::from_datetime(0, early);
        let b = Tid::from_datetime(0, late);
        assert!(a.as_str() < b.as_str());
    }
}
