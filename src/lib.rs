//! # homa-grpc
//!
//! Incoming-message layer for running gRPC over the Homa transport.
//!
//! Homa is a message-oriented protocol: each receive yields a whole
//! (possibly truncated) RPC message rather than a byte stream. This crate
//! owns the receive side of that exchange - it reassembles a message from
//! one or two transport calls and exposes the contained metadata and
//! payload to the RPC layers above as reference-counted slices, zero-copy
//! wherever the bytes already sit in message storage.
//!
//! ## Architecture
//!
//! ```text
//! transport bytes ─► Receiver ─► IncomingMessage ─┬─► slice factory ─► payload slices
//!                                                 └─► deserializer  ─► metadata batch
//! ```
//!
//! - **Wire format** ([`protocol`]): the fixed 20-byte message header and
//!   the length-prefixed metadata region layout, Big Endian throughout.
//! - **Transport** ([`transport`]): the blocking receive/send contract,
//!   the production `IPPROTO_HOMA` socket, and a scripted mock.
//! - **Incoming message** ([`incoming`]): the two-call receive protocol,
//!   the unified byte-addressable view over the head/tail split, the
//!   slice factory, and the metadata deserializer.
//! - **Slices and arenas** ([`slice`], [`arena`]): how carved-out byte
//!   ranges are owned - inline, arena-backed, or refcounted back to the
//!   message.
//!
//! ## Example
//!
//! ```no_run
//! use homa_grpc::{Arena, MetadataBatch, Receiver, RecvFlags};
//! use homa_grpc::transport::mock::MockTransport;
//!
//! let receiver = Receiver::new(MockTransport::new());
//! let msg = receiver.read(RecvFlags::REQUEST)?;
//!
//! let arena = Arena::new();
//! let mut initial_md = MetadataBatch::new();
//! msg.deserialize_metadata(
//!     msg.init_md_offset(),
//!     msg.header().init_md_bytes as usize,
//!     &mut initial_md,
//!     &arena,
//! )?;
//! let payload = msg.payload();
//! # let _ = payload;
//! # Ok::<(), homa_grpc::HomaError>(())
//! ```

pub mod arena;
pub mod error;
pub mod incoming;
pub mod metadata;
pub mod protocol;
pub mod slice;
pub mod transport;

pub use arena::Arena;
pub use error::{HomaError, Result};
pub use incoming::{
    IncomingMessage, MessageSlice, Receiver, DEFAULT_HEAD_CAPACITY,
    DEFAULT_MAX_STATIC_METADATA_LENGTH,
};
pub use metadata::{Metadata, MetadataBatch};
pub use protocol::{MessageHeader, HEADER_SIZE};
pub use slice::{Slice, INLINE_SLICE_CAPACITY};
pub use transport::{HomaTransport, RecvFlags, RecvMsg};
