//! Wire format encoding and decoding.
//!
//! Every Homa message begins with a fixed 20-byte header:
//! ```text
//! ┌───────────┬───────────┬───────────┬───────────┬───────────┐
//! │ Stream ID │ Sequence  │ Init MD   │ Message   │ Trail MD  │
//! │ 4 bytes   │ 4 bytes   │ 4 bytes   │ 4 bytes   │ 4 bytes   │
//! │ uint32 BE │ uint32 BE │ uint32 BE │ uint32 BE │ uint32 BE │
//! └───────────┴───────────┴───────────┴───────────┴───────────┘
//! ```
//! followed contiguously by the initial-metadata region, the payload, and
//! the trailing-metadata region.
//!
//! A metadata region holds zero or more entries packed end to end, each
//! introduced by a fixed 12-byte prefix (`keyLength`, `valueLength`,
//! `calloutIndex`, all uint32 BE) and followed by the key bytes and the
//! value bytes.
//!
//! All multi-byte integers are Big Endian; there is no alignment padding.

/// Message header size in bytes (fixed, exactly 20).
pub const HEADER_SIZE: usize = 20;

/// Metadata entry prefix size in bytes (fixed, exactly 12).
pub const METADATA_PREFIX_SIZE: usize = 12;

/// Decoded message header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// RPC stream identifier.
    pub stream_id: u32,
    /// Message sequence number within the stream (opaque to this layer).
    pub sequence: u32,
    /// Length of the initial-metadata region in bytes.
    pub init_md_bytes: u32,
    /// Length of the payload region in bytes.
    pub message_bytes: u32,
    /// Length of the trailing-metadata region in bytes.
    pub trail_md_bytes: u32,
}

impl MessageHeader {
    /// Create a new header.
    pub fn new(
        stream_id: u32,
        sequence: u32,
        init_md_bytes: u32,
        message_bytes: u32,
        trail_md_bytes: u32,
    ) -> Self {
        Self {
            stream_id,
            sequence,
            init_md_bytes,
            message_bytes,
            trail_md_bytes,
        }
    }

    /// Total length of the message this header describes, including the
    /// header itself.
    pub fn total_length(&self) -> usize {
        HEADER_SIZE
            + self.init_md_bytes as usize
            + self.message_bytes as usize
            + self.trail_md_bytes as usize
    }

    /// Encode header to bytes (Big Endian).
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (20 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0..4].copy_from_slice(&self.stream_id.to_be_bytes());
        buf[4..8].copy_from_slice(&self.sequence.to_be_bytes());
        buf[8..12].copy_from_slice(&self.init_md_bytes.to_be_bytes());
        buf[12..16].copy_from_slice(&self.message_bytes.to_be_bytes());
        buf[16..20].copy_from_slice(&self.trail_md_bytes.to_be_bytes());
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            stream_id: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            sequence: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            init_md_bytes: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
            message_bytes: u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]),
            trail_md_bytes: u32::from_be_bytes([buf[16], buf[17], buf[18], buf[19]]),
        })
    }
}

/// Decoded metadata entry prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetadataPrefix {
    /// Number of key bytes following the prefix.
    pub key_length: u32,
    /// Number of value bytes following the key.
    pub value_length: u32,
    /// Well-known-header index, or any larger value for a literal key.
    pub callout_index: u32,
}

impl MetadataPrefix {
    /// Decode a prefix from exactly `METADATA_PREFIX_SIZE` bytes.
    pub fn from_bytes(buf: &[u8; METADATA_PREFIX_SIZE]) -> Self {
        Self {
            key_length: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            value_length: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            callout_index: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
        }
    }

    /// Encode the prefix into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `METADATA_PREFIX_SIZE` (12 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= METADATA_PREFIX_SIZE);
        buf[0..4].copy_from_slice(&self.key_length.to_be_bytes());
        buf[4..8].copy_from_slice(&self.value_length.to_be_bytes());
        buf[8..12].copy_from_slice(&self.callout_index.to_be_bytes());
    }
}

/// Encode a metadata region from `(key, value, callout_index)` triples.
///
/// Entries are packed end to end in the region format described in the
/// module docs. The result can be placed anywhere inside a message body;
/// its length is what a receiver passes to the metadata deserializer.
pub fn encode_metadata(entries: &[(&[u8], &[u8], u32)]) -> Vec<u8> {
    let total: usize = entries
        .iter()
        .map(|(k, v, _)| METADATA_PREFIX_SIZE + k.len() + v.len())
        .sum();
    let mut buf = Vec::with_capacity(total);
    for (key, value, callout_index) in entries {
        let prefix = MetadataPrefix {
            key_length: key.len() as u32,
            value_length: value.len() as u32,
            callout_index: *callout_index,
        };
        let mut encoded = [0u8; METADATA_PREFIX_SIZE];
        prefix.encode_into(&mut encoded);
        buf.extend_from_slice(&encoded);
        buf.extend_from_slice(key);
        buf.extend_from_slice(value);
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encode_decode_roundtrip() {
        let original = MessageHeader::new(44, 7, 100, 2000, 30);
        let encoded = original.encode();
        let decoded = MessageHeader::decode(&encoded).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_header_big_endian_byte_order() {
        let header = MessageHeader::new(0x01020304, 0x05060708, 0x090A0B0C, 0x0D0E0F10, 0x11121314);
        let bytes = header.encode();

        assert_eq!(&bytes[0..4], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&bytes[4..8], &[0x05, 0x06, 0x07, 0x08]);
        assert_eq!(&bytes[8..12], &[0x09, 0x0A, 0x0B, 0x0C]);
        assert_eq!(&bytes[12..16], &[0x0D, 0x0E, 0x0F, 0x10]);
        assert_eq!(&bytes[16..20], &[0x11, 0x12, 0x13, 0x14]);
    }

    #[test]
    fn test_header_size_is_exactly_20() {
        assert_eq!(HEADER_SIZE, 20);
        let header = MessageHeader::new(1, 0, 0, 0, 0);
        assert_eq!(header.encode().len(), 20);
    }

    #[test]
    fn test_decode_too_short_buffer() {
        let buf = [0u8; HEADER_SIZE - 1];
        assert!(MessageHeader::decode(&buf).is_none());
    }

    #[test]
    fn test_total_length_sums_all_regions() {
        let header = MessageHeader::new(44, 0, 10, 20, 1000);
        assert_eq!(header.total_length(), HEADER_SIZE + 10 + 20 + 1000);
    }

    #[test]
    fn test_metadata_prefix_roundtrip() {
        let prefix = MetadataPrefix {
            key_length: 5,
            value_length: 6,
            callout_index: 100,
        };
        let mut buf = [0u8; METADATA_PREFIX_SIZE];
        prefix.encode_into(&mut buf);
        assert_eq!(MetadataPrefix::from_bytes(&buf), prefix);
    }

    #[test]
    fn test_encode_metadata_layout() {
        let region = encode_metadata(&[(b"name1", b"value1", 100)]);
        assert_eq!(region.len(), METADATA_PREFIX_SIZE + 5 + 6);

        let prefix = MetadataPrefix::from_bytes(region[..METADATA_PREFIX_SIZE].try_into().unwrap());
        assert_eq!(prefix.key_length, 5);
        assert_eq!(prefix.value_length, 6);
        assert_eq!(prefix.callout_index, 100);
        assert_eq!(&region[12..17], b"name1");
        assert_eq!(&region[17..23], b"value1");
    }

    #[test]
    fn test_encode_metadata_packs_entries_end_to_end() {
        let region = encode_metadata(&[(b"a", b"bb", 0), (b"ccc", b"", 7)]);
        assert_eq!(region.len(), (12 + 1 + 2) + (12 + 3));

        let second = MetadataPrefix::from_bytes(region[15..27].try_into().unwrap());
        assert_eq!(second.key_length, 3);
        assert_eq!(second.value_length, 0);
        assert_eq!(second.callout_index, 7);
        assert_eq!(&region[27..30], b"ccc");
    }
}
