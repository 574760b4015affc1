//! Request-scoped bump allocator.
//!
//! The deserialization path produces many short-lived byte strings (copied
//! metadata keys and values) whose lifetimes all end together when the
//! request completes. The [`Arena`] hands them out from chunked bump
//! storage with no per-allocation bookkeeping; everything is released at
//! once when the arena drops.
//!
//! An arena is single-threaded by construction (`RefCell`, `!Sync`); the
//! receive path creates one arena per request.

use std::cell::RefCell;

/// Default chunk size for arenas created with [`Arena::new`].
pub const DEFAULT_ARENA_CAPACITY: usize = 4 * 1024;

/// A bump allocator with batch-free semantics.
///
/// Allocations borrow from the arena and stay valid until the arena is
/// dropped. There is no way to free an individual allocation.
pub struct Arena {
    /// Filled chunks plus the chunk currently being bumped. Chunk storage
    /// is reserved up front and never reallocated or shrunk.
    chunks: RefCell<Vec<Vec<u8>>>,
    /// Capacity for each new chunk (oversized requests get a dedicated
    /// chunk of their own size).
    chunk_capacity: usize,
}

impl Arena {
    /// Create an arena with the default chunk size.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_ARENA_CAPACITY)
    }

    /// Create an arena whose chunks hold `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            chunks: RefCell::new(Vec::new()),
            chunk_capacity: capacity.max(1),
        }
    }

    /// Allocate `length` zeroed bytes from the arena.
    ///
    /// Each call returns a distinct, non-overlapping range, so handing out
    /// `&mut` through `&self` cannot alias.
    pub fn alloc_slice(&self, length: usize) -> &mut [u8] {
        let mut chunks = self.chunks.borrow_mut();
        if !chunks
            .last()
            .is_some_and(|chunk| chunk.capacity() - chunk.len() >= length)
        {
            chunks.push(Vec::with_capacity(self.chunk_capacity.max(length)));
        }
        let chunk = chunks.last_mut().expect("chunk available after push");
        let start = chunk.len();
        chunk.resize(start + length, 0);
        // The chunk's heap storage is stable: resize stays within the
        // reserved capacity and chunks are never dropped or shrunk while
        // the arena is alive, so the range outlives the RefCell borrow.
        unsafe { std::slice::from_raw_parts_mut(chunk.as_mut_ptr().add(start), length) }
    }

    /// Copy `data` into the arena and return the arena-owned copy.
    pub fn alloc_copy(&self, data: &[u8]) -> &[u8] {
        let dest = self.alloc_slice(data.len());
        dest.copy_from_slice(data);
        dest
    }

    /// Total bytes handed out so far.
    pub fn allocated(&self) -> usize {
        self.chunks.borrow().iter().map(|chunk| chunk.len()).sum()
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_copy_roundtrip() {
        let arena = Arena::with_capacity(64);
        let copied = arena.alloc_copy(b"hello");
        assert_eq!(copied, b"hello");
        assert_eq!(arena.allocated(), 5);
    }

    #[test]
    fn test_allocations_survive_chunk_growth() {
        let arena = Arena::with_capacity(16);
        let first = arena.alloc_copy(b"0123456789");
        // Forces a second chunk; the first allocation must stay put.
        let second = arena.alloc_copy(b"abcdefghij");
        assert_eq!(first, b"0123456789");
        assert_eq!(second, b"abcdefghij");
        assert_eq!(arena.allocated(), 20);
    }

    #[test]
    fn test_oversized_request_gets_own_chunk() {
        let arena = Arena::with_capacity(8);
        let big = arena.alloc_slice(100);
        assert_eq!(big.len(), 100);
        assert!(big.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_zero_length_allocation() {
        let arena = Arena::new();
        let empty = arena.alloc_copy(b"");
        assert!(empty.is_empty());
        assert_eq!(arena.allocated(), 0);
    }

    #[test]
    fn test_distinct_ranges() {
        let arena = Arena::with_capacity(64);
        let a = arena.alloc_slice(4);
        let b = arena.alloc_slice(4);
        a.copy_from_slice(&[1, 2, 3, 4]);
        b.copy_from_slice(&[5, 6, 7, 8]);
        assert_eq!(a, &[1, 2, 3, 4]);
        assert_eq!(b, &[5, 6, 7, 8]);
    }
}
