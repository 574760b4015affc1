//! Protocol module - wire header and metadata region layout.
//!
//! This module implements the binary layout shared by both ends of a
//! Homa-carried RPC:
//! - 20-byte message header encoding/decoding
//! - 12-byte metadata entry prefix and region encoding

mod wire_format;

pub use wire_format::{
    encode_metadata, MessageHeader, MetadataPrefix, HEADER_SIZE, METADATA_PREFIX_SIZE,
};
