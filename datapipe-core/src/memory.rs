//! Immutable byte buffers with reference counting and zero-copy views

use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{Deref, Range};
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// Callback releasing externally owned memory, invoked exactly once
pub type ReleaseFn = Box<dyn FnOnce(*const u8, usize) + Send + Sync>;

/// Backing storage for a buffer: either an owned allocation or a borrowed
/// external range released through a caller-supplied callback.
enum Storage {
    Owned(Box<[u8]>),
    Borrowed {
        ptr: *const u8,
        len: usize,
        release: Option<ReleaseFn>,
    },
}

impl Storage {
    fn as_slice(&self) -> &[u8] {
        match self {
            Storage::Owned(bytes) => bytes,
            // Safety: the `ByteBuffer::borrowed` contract guarantees the
            // range stays valid and unmodified until the release callback
            // runs, and the callback only runs when this storage drops.
            #[allow(unsafe_code)]
            Storage::Borrowed { ptr, len, .. } => unsafe {
                std::slice::from_raw_parts(*ptr, *len)
            },
        }
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        if let Storage::Borrowed { ptr, len, release } = self {
            if let Some(release) = release.take() {
                release(*ptr, *len);
            }
        }
    }
}

// Safety: the storage is immutable after construction and the borrowed
// contract requires the underlying memory to be safe to read from any
// thread; the release callback is itself Send + Sync.
#[allow(unsafe_code)]
unsafe impl Send for Storage {}
#[allow(unsafe_code)]
unsafe impl Sync for Storage {}

/// An immutable, contiguous range of bytes
///
/// A buffer either owns its allocation or borrows external memory that is
/// released exactly once, via the supplied callback, when the last buffer
/// sharing the storage (including views created with [`slice`]) drops.
/// Cloning and slicing never copy; [`to_owned_copy`] materializes an
/// independent owned buffer.
///
/// [`slice`]: ByteBuffer::slice
/// [`to_owned_copy`]: ByteBuffer::to_owned_copy
#[derive(Clone)]
pub struct ByteBuffer {
    storage: Arc<Storage>,
    offset: usize,
    len: usize,
}

impl ByteBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }

    /// Create an owned buffer taking over the given bytes
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        let len = bytes.len();
        Self {
            storage: Arc::new(Storage::Owned(bytes.into_boxed_slice())),
            offset: 0,
            len,
        }
    }

    /// Create an owned buffer by copying the given bytes
    pub fn copy_from_slice(bytes: &[u8]) -> Self {
        Self::from_vec(bytes.to_vec())
    }

    /// Create a buffer borrowing an external memory range
    ///
    /// `release` is invoked exactly once, with the original pointer and
    /// length, when no buffer sharing the storage remains live.
    ///
    /// # Safety
    ///
    /// The caller must ensure that `ptr` points to `len` readable bytes
    /// that stay valid and unmodified until `release` is invoked, and that
    /// the memory may be read from any thread.
    #[allow(unsafe_code)]
    pub unsafe fn borrowed(ptr: *const u8, len: usize, release: ReleaseFn) -> Self {
        Self {
            storage: Arc::new(Storage::Borrowed {
                ptr,
                len,
                release: Some(release),
            }),
            offset: 0,
            len,
        }
    }

    /// Number of bytes in the buffer
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The bytes of the buffer
    pub fn as_slice(&self) -> &[u8] {
        &self.storage.as_slice()[self.offset..self.offset + self.len]
    }

    /// Create a view of a sub-range sharing the backing storage
    pub fn slice(&self, range: Range<usize>) -> Result<Self> {
        if range.start > range.end || range.end > self.len {
            return Err(Error::InvalidArgument(format!(
                "The range {}..{} is out of bounds for a buffer of {} byte(s).",
                range.start, range.end, self.len
            )));
        }

        Ok(Self {
            storage: Arc::clone(&self.storage),
            offset: self.offset + range.start,
            len: range.end - range.start,
        })
    }

    // Callers guarantee the range is in bounds.
    pub(crate) fn view(&self, range: Range<usize>) -> Self {
        debug_assert!(range.start <= range.end && range.end <= self.len);

        Self {
            storage: Arc::clone(&self.storage),
            offset: self.offset + range.start,
            len: range.end - range.start,
        }
    }

    /// Materialize an independent owned copy of the bytes
    pub fn to_owned_copy(&self) -> Self {
        Self::from_vec(self.as_slice().to_vec())
    }

    /// Whether this buffer shares its backing storage with others
    pub fn is_shared(&self) -> bool {
        Arc::strong_count(&self.storage) > 1
    }
}

impl Default for ByteBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for ByteBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl AsRef<[u8]> for ByteBuffer {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl PartialEq for ByteBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for ByteBuffer {}

impl Hash for ByteBuffer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_slice().hash(state);
    }
}

impl fmt::Debug for ByteBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteBuffer")
            .field("len", &self.len)
            .finish()
    }
}

impl From<Vec<u8>> for ByteBuffer {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from_vec(bytes)
    }
}

impl From<&[u8]> for ByteBuffer {
    fn from(bytes: &[u8]) -> Self {
        Self::copy_from_slice(bytes)
    }
}

impl Serialize for ByteBuffer {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_bytes(self.as_slice())
    }
}

impl<'de> Deserialize<'de> for ByteBuffer {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Vec::<u8>::deserialize(deserializer).map(Self::from_vec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_owned_buffer_basic() {
        let buffer = ByteBuffer::from_vec(vec![1, 2, 3, 4, 5]);

        assert_eq!(buffer.len(), 5);
        assert_eq!(buffer.as_slice(), &[1, 2, 3, 4, 5]);
        assert!(!buffer.is_empty());
    }

    #[test]
    fn test_slice_shares_storage() {
        let buffer = ByteBuffer::from_vec(vec![1, 2, 3, 4, 5]);
        let view = buffer.slice(1..4).unwrap();

        assert_eq!(view.as_slice(), &[2, 3, 4]);
        assert!(buffer.is_shared());

        let nested = view.slice(1..2).unwrap();
        assert_eq!(nested.as_slice(), &[3]);
    }

    #[test]
    fn test_slice_out_of_bounds() {
        let buffer = ByteBuffer::from_vec(vec![1, 2, 3]);

        assert!(buffer.slice(1..4).is_err());
        assert!(buffer.slice(2..1).is_err());
    }

    #[test]
    fn test_release_callback_runs_once_after_last_view() {
        static RELEASED: AtomicUsize = AtomicUsize::new(0);

        let bytes: &'static [u8] = b"external memory";

        let buffer = unsafe {
            ByteBuffer::borrowed(
                bytes.as_ptr(),
                bytes.len(),
                Box::new(|_, _| {
                    RELEASED.fetch_add(1, Ordering::SeqCst);
                }),
            )
        };

        let view = buffer.slice(0..8).unwrap();
        let clone = buffer.clone();

        drop(buffer);
        drop(clone);
        assert_eq!(RELEASED.load(Ordering::SeqCst), 0);

        drop(view);
        assert_eq!(RELEASED.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_to_owned_copy_is_independent() {
        let buffer = ByteBuffer::from_vec(vec![7, 8, 9]);
        let copy = buffer.to_owned_copy();

        drop(buffer);
        assert_eq!(copy.as_slice(), &[7, 8, 9]);
        assert!(!copy.is_shared());
    }

    #[test]
    fn test_equality_over_bytes() {
        let a = ByteBuffer::from_vec(vec![1, 2, 3]);
        let b = ByteBuffer::copy_from_slice(&[1, 2, 3]);
        let c = ByteBuffer::from_vec(vec![1, 2]);

        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
