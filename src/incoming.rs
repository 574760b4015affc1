//! Incoming Homa messages.
//!
//! This is the heart of the layer: [`Receiver::read`] turns one or two
//! transport receives into an immutable [`IncomingMessage`], and the
//! message exposes its bytes to the RPC layers above as metadata batches
//! and reference-counted slices.
//!
//! # The head/tail split
//!
//! The first receive call delivers the wire header plus as much of the
//! body as fits the head buffer; when the message is larger, a second
//! call fetches the remainder (the tail). The split is an artifact of the
//! receive protocol: [`IncomingMessage::copy_out`],
//! [`IncomingMessage::get_bytes`], and the slice factory all present one
//! contiguous byte-addressable message. The head buffer is sized so that
//! in practice all metadata lands in the head and the fast, zero-copy
//! paths dominate.
//!
//! # Ownership
//!
//! A message is immutable once constructed. Borrowed slices produced by
//! [`IncomingMessage::get_slice`] hold strong references to the message
//! body; the body is freed when the owning [`IncomingMessage`] and every
//! borrowed slice have been dropped. The message holds no back-references
//! to its slices.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::arena::Arena;
use crate::error::{HomaError, Result};
use crate::metadata::{self, MetadataBatch};
use crate::protocol::{MessageHeader, MetadataPrefix, HEADER_SIZE, METADATA_PREFIX_SIZE};
use crate::slice::{Slice, INLINE_SLICE_CAPACITY};
use crate::transport::{HomaTransport, RecvFlags};

/// Default head buffer capacity.
///
/// Sized to hold the wire header plus roughly 1 KB of initial data, so
/// the metadata regions of virtually all messages land in the head.
pub const DEFAULT_HEAD_CAPACITY: usize = 1100;

/// Default threshold below which metadata values are materialized as
/// static (arena or inline) slices rather than borrowed ones.
pub const DEFAULT_MAX_STATIC_METADATA_LENGTH: usize = 200;

/// Log the single line a failed receive or metadata walk emits, then
/// hand the error back to the caller.
fn fail<T>(err: HomaError) -> Result<T> {
    tracing::error!("{err}");
    Err(err)
}

/// Reads messages from a Homa transport.
///
/// A receiver is cheap and stateless; production runs one `read` loop per
/// worker thread against a shared transport (the [`HomaTransport`] impl
/// for `&T` makes sharing a socket explicit).
pub struct Receiver<T> {
    transport: T,
    head_capacity: usize,
}

impl<T: HomaTransport> Receiver<T> {
    /// Create a receiver with the default head buffer capacity.
    pub fn new(transport: T) -> Self {
        Self::with_head_capacity(transport, DEFAULT_HEAD_CAPACITY)
    }

    /// Create a receiver with a custom head buffer capacity.
    ///
    /// # Panics
    ///
    /// Panics if `head_capacity` cannot hold a wire header.
    pub fn with_head_capacity(transport: T, head_capacity: usize) -> Self {
        assert!(
            head_capacity >= HEADER_SIZE,
            "head capacity {} below header size {}",
            head_capacity,
            HEADER_SIZE
        );
        Self {
            transport,
            head_capacity,
        }
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Receive one whole message.
    ///
    /// Blocks in the transport until a message matching `flags` arrives,
    /// then issues the follow-up receive for the tail if the message did
    /// not fit the head buffer. Every failure logs one line and returns
    /// the error; no partial message is ever surfaced.
    pub fn read(&self, flags: RecvFlags) -> Result<IncomingMessage> {
        let mut head = vec![0u8; self.head_capacity];
        let first = match self.transport.recv(&mut head, flags, 0) {
            Ok(recv) => recv,
            Err(err) => return fail(HomaError::Recv(err)),
        };
        if first.bytes < HEADER_SIZE {
            return fail(HomaError::ShortMessage(first.bytes));
        }

        let header = MessageHeader::decode(&head).expect("head holds at least a full header");
        if header.total_length() != first.message_length {
            return fail(HomaError::BadLength(first.message_length));
        }

        head.truncate(first.bytes);
        let base_length = head.len();

        let mut tail = Vec::new();
        if base_length < first.message_length {
            tail = vec![0u8; first.message_length - base_length];
            let cont = match self.transport.recv(&mut tail, flags, first.id) {
                Ok(recv) => recv,
                Err(err) => {
                    return fail(HomaError::TailRecv {
                        id: first.id,
                        source: err,
                    })
                }
            };
            if cont.bytes != tail.len() {
                return fail(HomaError::TailLength {
                    expected: tail.len(),
                    actual: cont.bytes,
                });
            }
        }

        tracing::debug!(
            stream_id = header.stream_id,
            length = first.message_length,
            base_length,
            "received Homa message"
        );
        Ok(IncomingMessage {
            body: Arc::new(MessageBody {
                header,
                head,
                tail,
                message_length: first.message_length,
                destroy_counter: None,
            }),
            max_static_md_length: DEFAULT_MAX_STATIC_METADATA_LENGTH,
        })
    }
}

/// The shared storage behind a message; freed when the owner and all
/// borrowed slices are gone.
struct MessageBody {
    header: MessageHeader,
    /// First `base_length` bytes of the message, wire header included.
    head: Vec<u8>,
    /// Remainder of the message, empty when everything fit the head.
    tail: Vec<u8>,
    message_length: usize,
    /// Test-only back-channel: bumped once when the body is freed.
    destroy_counter: Option<Arc<AtomicUsize>>,
}

impl Drop for MessageBody {
    fn drop(&mut self) {
        if let Some(counter) = &self.destroy_counter {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl std::fmt::Debug for MessageBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBody")
            .field("stream_id", &self.header.stream_id)
            .field("message_length", &self.message_length)
            .field("base_length", &self.head.len())
            .field("tail_length", &self.tail.len())
            .finish()
    }
}

/// One reassembled incoming message.
///
/// Immutable after construction; all views span the head/tail split
/// transparently.
#[derive(Debug)]
pub struct IncomingMessage {
    body: Arc<MessageBody>,
    /// Threshold for the static/borrowed decision on metadata values.
    pub max_static_md_length: usize,
}

impl IncomingMessage {
    /// Stream this message belongs to.
    pub fn stream_id(&self) -> u32 {
        self.body.header.stream_id
    }

    /// Sequence number within the stream.
    pub fn sequence(&self) -> u32 {
        self.body.header.sequence
    }

    /// The parsed wire header.
    pub fn header(&self) -> &MessageHeader {
        &self.body.header
    }

    /// Full logical message length, header included.
    pub fn message_length(&self) -> usize {
        self.body.message_length
    }

    /// Bytes delivered by the first receive (header plus initial data).
    pub fn base_length(&self) -> usize {
        self.body.head.len()
    }

    /// Bytes delivered by the follow-up receive.
    pub fn tail_length(&self) -> usize {
        self.body.tail.len()
    }

    /// Offset of the initial-metadata region.
    pub fn init_md_offset(&self) -> usize {
        HEADER_SIZE
    }

    /// Offset of the payload region.
    pub fn payload_offset(&self) -> usize {
        HEADER_SIZE + self.body.header.init_md_bytes as usize
    }

    /// Offset of the trailing-metadata region.
    pub fn trail_md_offset(&self) -> usize {
        self.payload_offset() + self.body.header.message_bytes as usize
    }

    /// The payload region as a borrowed slice.
    pub fn payload(&self) -> Slice<'static> {
        self.get_slice(self.payload_offset(), self.body.header.message_bytes as usize)
    }

    /// Copy `dest.len()` bytes starting at logical `offset` into `dest`,
    /// spanning the head/tail split as needed.
    ///
    /// # Panics
    ///
    /// Panics if the range reaches past the end of the message.
    pub fn copy_out(&self, offset: usize, dest: &mut [u8]) {
        assert!(
            offset + dest.len() <= self.body.message_length,
            "range {}..{} outside message of {} bytes",
            offset,
            offset + dest.len(),
            self.body.message_length
        );
        let head = &self.body.head;
        let mut copied = 0;
        if offset < head.len() {
            let n = dest.len().min(head.len() - offset);
            dest[..n].copy_from_slice(&head[offset..offset + n]);
            copied = n;
        }
        if copied < dest.len() {
            let tail_offset = offset + copied - head.len();
            let n = dest.len() - copied;
            dest[copied..].copy_from_slice(&self.body.tail[tail_offset..tail_offset + n]);
        }
    }

    /// Borrow `N` contiguous bytes starting at logical `offset`.
    ///
    /// Ranges inside the head come back as a direct borrow (no copy);
    /// ranges touching the tail are copied into `scratch` first. The fast
    /// path dominates because the head holds virtually all metadata.
    ///
    /// # Panics
    ///
    /// Panics if the range reaches past the end of the message.
    pub fn get_bytes<'a, const N: usize>(
        &'a self,
        offset: usize,
        scratch: &'a mut [u8; N],
    ) -> &'a [u8; N] {
        let head = &self.body.head;
        if offset + N <= head.len() {
            head[offset..offset + N]
                .try_into()
                .expect("range length matches array length")
        } else {
            self.copy_out(offset, scratch);
            scratch
        }
    }

    /// Carve out a short-lived slice of the message.
    ///
    /// Small ranges come back inline; anything larger is copied into
    /// `arena`, which owns the bytes. Use this for data the caller copies
    /// or consumes before the request completes - typically metadata keys
    /// and values.
    ///
    /// # Panics
    ///
    /// Panics if the range reaches past the end of the message.
    pub fn get_static_slice<'a>(&self, offset: usize, length: usize, arena: &'a Arena) -> Slice<'a> {
        assert!(
            offset + length <= self.body.message_length,
            "range {}..{} outside message of {} bytes",
            offset,
            offset + length,
            self.body.message_length
        );
        if length <= INLINE_SLICE_CAPACITY {
            let mut bytes = [0u8; INLINE_SLICE_CAPACITY];
            self.copy_out(offset, &mut bytes[..length]);
            Slice::Inline {
                len: length as u8,
                bytes,
            }
        } else {
            let dest = arena.alloc_slice(length);
            self.copy_out(offset, dest);
            Slice::Arena(dest)
        }
    }

    /// Carve out a slice whose lifetime may outlive this receive call.
    ///
    /// The slice holds a reference on the message. Ranges wholly inside
    /// the head or the tail are zero-copy views; a range straddling the
    /// split is staged into one contiguous buffer carried by the slice,
    /// which still pins the message.
    ///
    /// # Panics
    ///
    /// Panics if the range reaches past the end of the message.
    pub fn get_slice(&self, offset: usize, length: usize) -> Slice<'static> {
        assert!(
            offset + length <= self.body.message_length,
            "range {}..{} outside message of {} bytes",
            offset,
            offset + length,
            self.body.message_length
        );
        let base = self.body.head.len();
        let backing = if offset + length <= base {
            Backing::Head { offset, length }
        } else if offset >= base {
            Backing::Tail {
                offset: offset - base,
                length,
            }
        } else {
            let mut staged = vec![0u8; length];
            self.copy_out(offset, &mut staged);
            Backing::Staged(staged.into_boxed_slice())
        };
        Slice::Borrowed(MessageSlice {
            body: Arc::clone(&self.body),
            backing,
        })
    }

    /// Deserialize the metadata region at `[offset, offset + length)`,
    /// appending each entry to `batch`.
    ///
    /// Keys are either substituted from the well-known-header table (the
    /// entry's callout index, no allocation) or materialized as static
    /// slices. Values at or below [`max_static_md_length`] become static
    /// slices; larger values become borrowed slices that keep this
    /// message alive for as long as the batch references them.
    ///
    /// On a format error the walk stops: the error is logged and
    /// returned, and `batch` keeps whatever was appended before it. The
    /// caller is expected to discard the batch.
    ///
    /// [`max_static_md_length`]: Self::max_static_md_length
    ///
    /// # Panics
    ///
    /// Panics if the region reaches past the end of the message.
    pub fn deserialize_metadata<'a>(
        &self,
        offset: usize,
        length: usize,
        batch: &mut MetadataBatch<'a>,
        arena: &'a Arena,
    ) -> Result<()> {
        assert!(
            offset + length <= self.body.message_length,
            "metadata region {}..{} outside message of {} bytes",
            offset,
            offset + length,
            self.body.message_length
        );
        let end = offset + length;
        let mut cursor = offset;
        let mut scratch = [0u8; METADATA_PREFIX_SIZE];
        while cursor < end {
            let remaining = end - cursor;
            if remaining < METADATA_PREFIX_SIZE {
                return fail(HomaError::TruncatedPrefix(remaining));
            }
            let prefix = MetadataPrefix::from_bytes(self.get_bytes(cursor, &mut scratch));
            let key_length = prefix.key_length as usize;
            let value_length = prefix.value_length as usize;
            let body_remaining = remaining - METADATA_PREFIX_SIZE;
            if key_length + value_length > body_remaining {
                return fail(HomaError::MetadataOverrun {
                    key_bytes: key_length,
                    value_bytes: value_length,
                    remaining: body_remaining,
                });
            }
            cursor += METADATA_PREFIX_SIZE;

            // The literal key bytes are present on the wire either way;
            // a well-known callout just means we ignore them.
            let key = match metadata::canonical_key(prefix.callout_index) {
                Some(canonical) => Slice::from_static(canonical),
                None => self.get_static_slice(cursor, key_length, arena),
            };
            cursor += key_length;

            let value = if value_length <= self.max_static_md_length {
                self.get_static_slice(cursor, value_length, arena)
            } else {
                self.get_slice(cursor, value_length)
            };
            cursor += value_length;

            batch.push(key, value);
        }
        Ok(())
    }

    /// Write a metadata region into the head buffer at `offset`, in the
    /// wire's length-prefixed format, and return the region's length.
    ///
    /// Test helper for exercising [`deserialize_metadata`] against known
    /// content. Only possible while this handle holds the sole reference
    /// to the message and the region fits the head; returns `None`
    /// otherwise.
    ///
    /// [`deserialize_metadata`]: Self::deserialize_metadata
    pub fn add_metadata(&mut self, offset: usize, entries: &[(&[u8], &[u8], u32)]) -> Option<usize> {
        let encoded = crate::protocol::encode_metadata(entries);
        let body = Arc::get_mut(&mut self.body)?;
        if offset + encoded.len() > body.head.len() {
            return None;
        }
        body.head[offset..offset + encoded.len()].copy_from_slice(&encoded);
        Some(encoded.len())
    }

    /// Install a counter bumped once when the message storage is freed.
    ///
    /// Test helper; only possible while this handle holds the sole
    /// reference to the message.
    pub fn set_destroy_counter(&mut self, counter: Arc<AtomicUsize>) -> bool {
        match Arc::get_mut(&mut self.body) {
            Some(body) => {
                body.destroy_counter = Some(counter);
                true
            }
            None => false,
        }
    }
}

/// A byte range pinned inside an incoming message.
///
/// Holds a strong reference to the message body; the body is freed when
/// the owning [`IncomingMessage`] and every `MessageSlice` are gone.
#[derive(Debug, Clone)]
pub struct MessageSlice {
    body: Arc<MessageBody>,
    backing: Backing,
}

#[derive(Debug, Clone)]
enum Backing {
    /// View into the head buffer.
    Head { offset: usize, length: usize },
    /// View into the tail buffer.
    Tail { offset: usize, length: usize },
    /// Range that straddled the head/tail split, staged contiguously.
    Staged(Box<[u8]>),
}

impl MessageSlice {
    /// The slice contents.
    pub fn as_bytes(&self) -> &[u8] {
        match &self.backing {
            Backing::Head { offset, length } => &self.body.head[*offset..*offset + *length],
            Backing::Tail { offset, length } => &self.body.tail[*offset..*offset + *length],
            Backing::Staged(bytes) => bytes,
        }
    }

    /// Number of bytes in the slice.
    pub fn len(&self) -> usize {
        match &self.backing {
            Backing::Head { length, .. } | Backing::Tail { length, .. } => *length,
            Backing::Staged(bytes) => bytes.len(),
        }
    }

    /// Whether the slice is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AsRef<[u8]> for MessageSlice {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;

    fn read_default() -> IncomingMessage {
        let receiver = Receiver::new(MockTransport::new());
        receiver.read(RecvFlags::REQUEST).expect("default read")
    }

    #[test]
    fn test_read_default_message() {
        let msg = read_default();
        assert_eq!(msg.stream_id(), 44);
        assert_eq!(msg.message_length(), 1050);
        assert_eq!(msg.base_length(), 1050);
        assert_eq!(msg.tail_length(), 0);
    }

    #[test]
    fn test_region_offsets() {
        let msg = read_default();
        assert_eq!(msg.init_md_offset(), HEADER_SIZE);
        assert_eq!(msg.payload_offset(), HEADER_SIZE + 10);
        assert_eq!(msg.trail_md_offset(), HEADER_SIZE + 10 + 20);
    }

    #[test]
    fn test_payload_slice_matches_copy_out() {
        let msg = read_default();
        let payload = msg.payload();
        let mut expected = vec![0u8; 20];
        msg.copy_out(msg.payload_offset(), &mut expected);
        assert_eq!(payload.as_bytes(), &expected[..]);
    }

    #[test]
    fn test_short_message_error_text() {
        let mock = MockTransport::new();
        mock.push_return(4);
        let receiver = Receiver::new(mock);
        let err = receiver.read(RecvFlags::REQUEST).unwrap_err();
        assert_eq!(err.to_string(), "Homa message contained only 4 bytes");
    }

    #[test]
    fn test_bad_length_error_text() {
        let mock = MockTransport::new();
        mock.push_msg_length(1000);
        let receiver = Receiver::new(mock);
        let err = receiver.read(RecvFlags::REQUEST).unwrap_err();
        assert_eq!(err.to_string(), "Bad message length 1000");
    }

    #[test]
    fn test_tail_length_error_text() {
        let mock = MockTransport::new();
        mock.push_return(500);
        mock.push_return(400);
        let receiver = Receiver::new(mock);
        let err = receiver.read(RecvFlags::REQUEST).unwrap_err();
        assert!(err
            .to_string()
            .starts_with("Tail of Homa message has wrong length"));
    }

    #[test]
    fn test_get_static_slice_inline_boundary() {
        let msg = read_default();
        let arena = Arena::with_capacity(2000);

        let at_limit = msg.get_static_slice(40, INLINE_SLICE_CAPACITY, &arena);
        assert!(at_limit.is_inline());

        let over_limit = msg.get_static_slice(40, INLINE_SLICE_CAPACITY + 1, &arena);
        assert!(over_limit.is_arena());
    }

    #[test]
    fn test_empty_metadata_region() {
        let msg = read_default();
        let arena = Arena::new();
        let mut batch = MetadataBatch::new();
        msg.deserialize_metadata(75, 0, &mut batch, &arena).unwrap();
        assert!(batch.is_empty());
    }

    #[test]
    fn test_add_metadata_requires_sole_reference() {
        let mut msg = read_default();
        let slice = msg.get_slice(40, 10);
        assert!(msg.add_metadata(75, &[(b"k", b"v", 100)]).is_none());
        drop(slice);
        assert!(msg.add_metadata(75, &[(b"k", b"v", 100)]).is_some());
    }

    #[test]
    fn test_add_metadata_rejects_region_past_head() {
        let mut msg = read_default();
        let value = vec![b'x'; 64];
        assert!(msg.add_metadata(1040, &[(b"k", &value, 100)]).is_none());
    }

    #[test]
    fn test_set_destroy_counter_requires_sole_reference() {
        let mut msg = read_default();
        let counter = Arc::new(AtomicUsize::new(0));
        assert!(msg.set_destroy_counter(Arc::clone(&counter)));

        let slice = msg.get_slice(40, 10);
        assert!(!msg.set_destroy_counter(Arc::clone(&counter)));
        drop(slice);
        drop(msg);
        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_head_capacity_below_header_panics() {
        let result = std::panic::catch_unwind(|| {
            Receiver::with_head_capacity(MockTransport::new(), HEADER_SIZE - 1)
        });
        assert!(result.is_err());
    }
}
