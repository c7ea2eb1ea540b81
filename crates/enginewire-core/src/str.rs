use std::{borrow::Cow, fmt, ops::Deref};

use bytes::Bytes;

/// A cheaply clonable utf-8 string backed by [`Bytes`].
///
/// Slicing a [`Str`] never copies, which lets decoded packets borrow
/// from the frame they were read from.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Str(Bytes);

impl Str {
    /// An empty string
    pub const EMPTY: Str = Str(Bytes::from_static(b""));

    /// Slice the string without copying. The range must be on char boundaries.
    ///
    /// # Panics
    /// If the range does not fall on utf-8 char boundaries.
    pub fn slice(&self, range: impl std::ops::RangeBounds<usize>) -> Self {
        let bytes = self.0.slice(range);
        assert!(
            std::str::from_utf8(&bytes).is_ok(),
            "Str slice must be on char boundaries"
        );
        Str(bytes)
    }

    /// Return a &str representation of the string
    pub fn as_str(&self) -> &str {
        // SAFETY: a Str is only ever built from valid utf-8
        unsafe { std::str::from_utf8_unchecked(&self.0) }
    }

    /// Return the underlying bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Build a [`Str`] from bytes, checking they are valid utf-8.
    pub fn from_utf8(bytes: Bytes) -> Result<Self, std::str::Utf8Error> {
        std::str::from_utf8(&bytes)?;
        Ok(Str(bytes))
    }
}

impl Deref for Str {
    type Target = str;
    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}
impl fmt::Display for Str {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
impl fmt::Debug for Str {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}
impl From<&'static str> for Str {
    fn from(s: &'static str) -> Self {
        Str(Bytes::from_static(s.as_bytes()))
    }
}
impl From<String> for Str {
    fn from(s: String) -> Self {
        Str(Bytes::from(s.into_bytes()))
    }
}
impl From<Cow<'static, str>> for Str {
    fn from(s: Cow<'static, str>) -> Self {
        match s {
            Cow::Borrowed(s) => Str::from(s),
            Cow::Owned(s) => Str::from(s),
        }
    }
}
impl From<Str> for Bytes {
    fn from(s: Str) -> Self {
        s.0
    }
}
impl From<Str> for String {
    fn from(s: Str) -> Self {
        s.as_str().to_owned()
    }
}
impl PartialEq<&str> for Str {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}
impl PartialEq<str> for Str {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}
impl PartialEq<Str> for &str {
    fn eq(&self, other: &Str) -> bool {
        *self == other.as_str()
    }
}
impl std::borrow::Borrow<str> for Str {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

impl serde::Serialize for Str {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}
impl<'de> serde::Deserialize<'de> for Str {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Str::from)
    }
}
