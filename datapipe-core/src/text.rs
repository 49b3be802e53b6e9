//! Immutable, reference-shareable UTF-8 text

use std::borrow::Borrow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{Deref, Range};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};
use crate::memory::ByteBuffer;

/// An immutable UTF-8 string sharing its backing storage across views
///
/// Substring and trim operations return views over the same allocation
/// without copying. Equality, ordering, and hashing are defined over the
/// raw bytes; [`char_count`] returns the UTF-8 code-point count rather
/// than the byte count.
///
/// [`char_count`]: ImmutableText::char_count
#[derive(Clone, Default)]
pub struct ImmutableText {
    // Invariant: always valid UTF-8.
    bytes: ByteBuffer,
}

impl ImmutableText {
    /// Create an empty text
    pub fn new() -> Self {
        Self {
            bytes: ByteBuffer::new(),
        }
    }

    /// The text as a string slice
    pub fn as_str(&self) -> &str {
        // Safety: `bytes` is only ever constructed from `str`/`String`
        // input or sliced at char boundaries, so it is valid UTF-8.
        #[allow(unsafe_code)]
        unsafe {
            std::str::from_utf8_unchecked(self.bytes.as_slice())
        }
    }

    /// The underlying bytes
    pub fn as_bytes(&self) -> &[u8] {
        self.bytes.as_slice()
    }

    /// Number of UTF-8 code points (not bytes)
    pub fn char_count(&self) -> usize {
        self.as_str().chars().count()
    }

    /// Number of bytes in the UTF-8 encoding
    pub fn byte_count(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the text is empty
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Create a view of a byte range sharing the backing storage
    ///
    /// The range must fall on UTF-8 character boundaries.
    pub fn substring(&self, range: Range<usize>) -> Result<Self> {
        let s = self.as_str();

        if range.end > s.len()
            || !s.is_char_boundary(range.start)
            || !s.is_char_boundary(range.end)
        {
            return Err(Error::InvalidArgument(format!(
                "The range {}..{} does not fall on character boundaries of the text.",
                range.start, range.end
            )));
        }

        Ok(Self {
            bytes: self.bytes.slice(range)?,
        })
    }

    /// A view with leading whitespace removed, sharing the storage
    pub fn trim_start(&self) -> Self {
        let s = self.as_str();
        let start = s.len() - s.trim_start().len();

        Self {
            bytes: self.bytes.view(start..s.len()),
        }
    }

    /// A view with trailing whitespace removed, sharing the storage
    pub fn trim_end(&self) -> Self {
        let s = self.as_str();
        let end = s.trim_end().len();

        Self {
            bytes: self.bytes.view(0..end),
        }
    }

    /// A view with leading and trailing whitespace removed
    pub fn trim(&self) -> Self {
        self.trim_start().trim_end()
    }
}

impl Deref for ImmutableText {
    type Target = str;

    fn deref(&self) -> &str {
        self.as_str()
    }
}

impl AsRef<str> for ImmutableText {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl Borrow<str> for ImmutableText {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

impl PartialEq for ImmutableText {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for ImmutableText {}

impl PartialEq<str> for ImmutableText {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for ImmutableText {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl PartialOrd for ImmutableText {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ImmutableText {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_bytes().cmp(other.as_bytes())
    }
}

impl Hash for ImmutableText {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_bytes().hash(state);
    }
}

impl fmt::Display for ImmutableText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for ImmutableText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ImmutableText({:?})", self.as_str())
    }
}

impl From<&str> for ImmutableText {
    fn from(s: &str) -> Self {
        Self {
            bytes: ByteBuffer::copy_from_slice(s.as_bytes()),
        }
    }
}

impl From<String> for ImmutableText {
    fn from(s: String) -> Self {
        Self {
            bytes: ByteBuffer::from_vec(s.into_bytes()),
        }
    }
}

impl Serialize for ImmutableText {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ImmutableText {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::from)
    }
}
