use std::{fmt, str::FromStr};

use base64::Engine;
use rand::Rng;

/// A 128 bit session id, represented as a 16 char url-safe base64 string.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sid([u8; 16]);

impl Sid {
    /// A zeroed session id
    pub const ZERO: Self = Self([b'A'; 16]);

    /// Generate a new random session id
    pub fn new() -> Self {
        let mut random = [0u8; 12]; // 12 bytes give exactly 16 base64 chars
        let mut id = [0u8; 16];
        rand::rng().fill(&mut random);
        // 12 random bytes always fit in 16 base64 chars without padding
        let _ = base64::prelude::BASE64_URL_SAFE_NO_PAD.encode_slice(random, &mut id);
        Sid(id)
    }

    /// Get the session id as a str
    pub const fn as_str(&self) -> &str {
        // SAFETY: a Sid only contains url-safe base64 chars
        unsafe { std::str::from_utf8_unchecked(&self.0) }
    }
}

impl Default for Sid {
    fn default() -> Self {
        Self::new()
    }
}

/// Error returned by [`Sid::from_str`]
#[derive(Debug, thiserror::Error)]
pub enum SidDecodeError {
    /// The string contains chars outside of the url-safe base64 alphabet
    #[error("invalid url base64 string")]
    InvalidBase64String,
    /// The string is not 16 chars long
    #[error("invalid sid length")]
    InvalidLength,
}

impl FromStr for Sid {
    type Err = SidDecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes: [u8; 16] = s
            .as_bytes()
            .try_into()
            .map_err(|_| SidDecodeError::InvalidLength)?;
        if bytes
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || *b == b'_' || *b == b'-')
        {
            Ok(Sid(bytes))
        } else {
            Err(SidDecodeError::InvalidBase64String)
        }
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
impl fmt::Debug for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl serde::Serialize for Sid {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

struct SidVisitor;
impl serde::de::Visitor<'_> for SidVisitor {
    type Value = Sid;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("a 16 chars session id")
    }

    fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
        Sid::from_str(v).map_err(serde::de::Error::custom)
    }
}
impl<'de> serde::Deserialize<'de> for Sid {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_str(SidVisitor)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::Sid;

    #[test]
    fn sid_from_str() {
        let id = Sid::new();
        assert_eq!(Sid::from_str(id.as_str()).unwrap(), id);
        let id = Sid::from_str("AA9AAA0AAzAAAAHs").unwrap();
        assert_eq!(id.to_string(), "AA9AAA0AAzAAAAHs");
    }

    #[test]
    fn sid_from_str_invalid() {
        let err = Sid::from_str("*$^ùù!").unwrap_err();
        assert_eq!(err.to_string(), "invalid sid length");
        let err = Sid::from_str("aoassaAZDoin#zd{").unwrap_err();
        assert_eq!(err.to_string(), "invalid url base64 string");
    }

    #[test]
    fn new_sids_are_distinct() {
        assert_ne!(Sid::new(), Sid::new());
    }
}
