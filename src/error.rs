//! Error types for homa-grpc.

use thiserror::Error;

/// Main error type for the incoming-message layer.
///
/// Every variant is fatal to the single receive (or metadata walk) that
/// produced it and non-fatal to the process; the display text of each
/// variant is the single log line the failure emits.
#[derive(Debug, Error)]
pub enum HomaError {
    /// The first receive call failed at the transport.
    #[error("Error in homa_recv: {0}")]
    Recv(#[source] std::io::Error),

    /// The follow-up receive for a message tail failed at the transport.
    #[error("Error in homa_recv for tail of id {id}: {source}")]
    TailRecv {
        /// Transport id of the message whose tail was requested.
        id: u64,
        /// Underlying transport error.
        #[source]
        source: std::io::Error,
    },

    /// Fewer bytes arrived than a wire header requires.
    #[error("Homa message contained only {0} bytes")]
    ShortMessage(usize),

    /// The header's length fields disagree with the transport-reported
    /// message length.
    #[error("Bad message length {0}")]
    BadLength(usize),

    /// The tail receive returned a different byte count than the head
    /// left outstanding.
    #[error("Tail of Homa message has wrong length: expected {expected}, got {actual}")]
    TailLength {
        /// Bytes the tail had to contain.
        expected: usize,
        /// Bytes the transport actually delivered.
        actual: usize,
    },

    /// A metadata entry's key and value overrun the region.
    #[error(
        "Metadata format error: key ({key_bytes} bytes) and value ({value_bytes} bytes) \
         exceed remaining space ({remaining} bytes)"
    )]
    MetadataOverrun {
        /// Key length announced by the entry prefix.
        key_bytes: usize,
        /// Value length announced by the entry prefix.
        value_bytes: usize,
        /// Region bytes left after the prefix.
        remaining: usize,
    },

    /// A metadata region ended in the middle of an entry prefix.
    #[error("Metadata format error: entry prefix truncated, only {0} bytes available")]
    TruncatedPrefix(usize),
}

/// Result type alias using HomaError.
pub type Result<T> = std::result::Result<T, HomaError>;
