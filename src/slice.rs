//! Framework slices over message bytes.
//!
//! A [`Slice`] is the unit the upper RPC layers consume: a byte range plus
//! an ownership discipline. The variants mirror the three refcount shapes
//! the layer produces:
//!
//! - [`Slice::Inline`] - tiny ranges copied into the slice itself (no
//!   refcount at all)
//! - [`Slice::Static`] - canonical well-known header keys (`'static` data)
//! - [`Slice::Arena`] - ranges copied into a request arena (the arena owns
//!   the bytes, the slice does not)
//! - [`Slice::Borrowed`] - zero-copy ranges pinned inside an incoming
//!   message; dropping the slice releases the message reference
//!
//! # Example
//!
//! ```
//! use homa_grpc::slice::{Slice, INLINE_SLICE_CAPACITY};
//!
//! let slice = Slice::inline(b"hello");
//! assert!(slice.is_inline());
//! assert_eq!(slice.as_bytes(), b"hello");
//! assert!(INLINE_SLICE_CAPACITY >= 5);
//! ```

use bytes::Bytes;

use crate::incoming::MessageSlice;

/// Maximum byte count a slice stores inline.
///
/// Ranges at or below this limit never allocate and never hold a
/// reference to anything.
pub const INLINE_SLICE_CAPACITY: usize = 23;

/// A byte range handed to the upper RPC layers.
#[derive(Debug, Clone)]
pub enum Slice<'a> {
    /// Bytes stored directly in the slice.
    Inline {
        /// Number of meaningful bytes in `bytes`.
        len: u8,
        /// Inline storage; only the first `len` bytes are meaningful.
        bytes: [u8; INLINE_SLICE_CAPACITY],
    },
    /// Bytes with `'static` lifetime (canonical header keys).
    Static(&'static [u8]),
    /// Bytes owned by a request arena.
    Arena(&'a [u8]),
    /// Bytes pinned inside an incoming message.
    Borrowed(MessageSlice),
}

impl<'a> Slice<'a> {
    /// Build an inline slice from `data`.
    ///
    /// # Panics
    ///
    /// Panics if `data` exceeds [`INLINE_SLICE_CAPACITY`].
    pub fn inline(data: &[u8]) -> Self {
        assert!(
            data.len() <= INLINE_SLICE_CAPACITY,
            "inline slice limited to {} bytes, got {}",
            INLINE_SLICE_CAPACITY,
            data.len()
        );
        let mut bytes = [0u8; INLINE_SLICE_CAPACITY];
        bytes[..data.len()].copy_from_slice(data);
        Self::Inline {
            len: data.len() as u8,
            bytes,
        }
    }

    /// Build a slice over `'static` data without copying.
    pub fn from_static(data: &'static [u8]) -> Self {
        Self::Static(data)
    }

    /// The slice contents.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Inline { len, bytes } => &bytes[..*len as usize],
            Self::Static(data) => data,
            Self::Arena(data) => data,
            Self::Borrowed(slice) => slice.as_bytes(),
        }
    }

    /// Number of bytes in the slice.
    pub fn len(&self) -> usize {
        match self {
            Self::Inline { len, .. } => *len as usize,
            Self::Static(data) => data.len(),
            Self::Arena(data) => data.len(),
            Self::Borrowed(slice) => slice.len(),
        }
    }

    /// Whether the slice is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the bytes live inline in the slice.
    #[inline]
    pub fn is_inline(&self) -> bool {
        matches!(self, Self::Inline { .. })
    }

    /// Whether the bytes have `'static` lifetime.
    #[inline]
    pub fn is_static(&self) -> bool {
        matches!(self, Self::Static(_))
    }

    /// Whether the bytes are owned by an arena.
    #[inline]
    pub fn is_arena(&self) -> bool {
        matches!(self, Self::Arena(_))
    }

    /// Whether the slice holds a reference on an incoming message.
    #[inline]
    pub fn is_borrowed(&self) -> bool {
        matches!(self, Self::Borrowed(_))
    }

    /// Convert into [`bytes::Bytes`] for hand-off to byte-stream consumers.
    ///
    /// Borrowed slices convert without copying and keep their message
    /// reference alive inside the returned `Bytes`; inline and arena
    /// slices are copied (arena storage cannot outlive the arena); static
    /// slices convert for free.
    pub fn into_bytes(self) -> Bytes {
        match self {
            Self::Inline { len, bytes } => Bytes::copy_from_slice(&bytes[..len as usize]),
            Self::Static(data) => Bytes::from_static(data),
            Self::Arena(data) => Bytes::copy_from_slice(data),
            Self::Borrowed(slice) => Bytes::from_owner(slice),
        }
    }
}

impl AsRef<[u8]> for Slice<'_> {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

/// Slices compare by contents, not by ownership shape.
impl PartialEq for Slice<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for Slice<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_roundtrip() {
        let slice = Slice::inline(b"abc");
        assert!(slice.is_inline());
        assert_eq!(slice.len(), 3);
        assert_eq!(slice.as_bytes(), b"abc");
    }

    #[test]
    fn test_inline_at_capacity() {
        let data = [0x5au8; INLINE_SLICE_CAPACITY];
        let slice = Slice::inline(&data);
        assert_eq!(slice.as_bytes(), &data);
    }

    #[test]
    #[should_panic(expected = "inline slice limited")]
    fn test_inline_over_capacity_panics() {
        let data = [0u8; INLINE_SLICE_CAPACITY + 1];
        let _ = Slice::inline(&data);
    }

    #[test]
    fn test_static_is_zero_copy() {
        static KEY: &[u8] = b":path";
        let slice = Slice::from_static(KEY);
        assert!(slice.is_static());
        assert_eq!(slice.as_bytes().as_ptr(), KEY.as_ptr());
    }

    #[test]
    fn test_equality_ignores_ownership_shape() {
        let inline = Slice::inline(b"te");
        let stat = Slice::from_static(b"te");
        assert_eq!(inline, stat);
    }

    #[test]
    fn test_into_bytes_static() {
        static KEY: &[u8] = b":method";
        let bytes = Slice::from_static(KEY).into_bytes();
        assert_eq!(bytes.as_ref(), KEY);
    }

    #[test]
    fn test_empty_slice() {
        let slice = Slice::inline(b"");
        assert!(slice.is_empty());
        assert_eq!(slice.len(), 0);
    }
}
