//! Mock transport for unit and integration tests.
//!
//! [`MockTransport`] replays scripted receive results instead of touching
//! a socket. Tests queue override headers, reported message lengths, and
//! return counts; anything not overridden falls back to a default message
//! (stream 44, 10 initial-metadata bytes, 20 payload bytes, 1000
//! trailing-metadata bytes). Injected failures come from a bitmask, one
//! bit per upcoming call.
//!
//! Delivered bytes follow a deterministic pattern so tests can assert
//! where every byte came from: each 4-byte word in the head carries its
//! own logical offset, and continuation (tail) bytes count from
//! [`TAIL_FILL_VALUE`]. [`data_ranges`] compresses a patterned buffer back
//! into a human-readable string such as `"484-499 1000-1023"`.

use std::collections::VecDeque;
use std::io::{self, IoSlice};
use std::net::SocketAddr;
use std::sync::Mutex;

use super::homa::{HomaTransport, RecvFlags, RecvMsg};
use crate::protocol::{MessageHeader, HEADER_SIZE};

/// Message id the mock reports for every receive.
pub const MOCK_RECV_ID: u64 = 333;

/// First pattern value used for continuation (tail) bytes.
pub const TAIL_FILL_VALUE: u32 = 1000;

/// Peer address the mock reports for every receive.
fn mock_peer() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 40000))
}

#[derive(Default)]
struct MockState {
    recv_errors: u32,
    send_errors: u32,
    reply_errors: u32,
    recv_headers: VecDeque<MessageHeader>,
    recv_msg_lengths: VecDeque<usize>,
    recv_returns: VecDeque<usize>,
    outgoing: Vec<String>,
}

/// Scripted stand-in for a Homa socket.
pub struct MockTransport {
    state: Mutex<MockState>,
}

impl MockTransport {
    /// Create a mock with no overrides queued.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
        }
    }

    /// Fail upcoming `recv` calls: bit N of `mask` fails call N.
    pub fn fail_recv(&self, mask: u32) {
        self.lock().recv_errors = mask;
    }

    /// Fail upcoming `sendv` calls: bit N of `mask` fails call N.
    pub fn fail_sendv(&self, mask: u32) {
        self.lock().send_errors = mask;
    }

    /// Fail upcoming `replyv` calls: bit N of `mask` fails call N.
    pub fn fail_replyv(&self, mask: u32) {
        self.lock().reply_errors = mask;
    }

    /// Queue a header for the next first-call receive.
    pub fn push_header(&self, header: MessageHeader) {
        self.lock().recv_headers.push_back(header);
    }

    /// Queue an override for the reported full message length.
    pub fn push_msg_length(&self, length: usize) {
        self.lock().recv_msg_lengths.push_back(length);
    }

    /// Queue an override for the byte count a receive returns.
    pub fn push_return(&self, count: usize) {
        self.lock().recv_returns.push_back(count);
    }

    /// Accounting lines recorded for `sendv`/`replyv` calls.
    pub fn outgoing(&self) -> Vec<String> {
        self.lock().outgoing.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("mock state lock")
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Pop the low bit of an error mask; a set bit means "fail this call".
fn take_error(mask: &mut u32) -> bool {
    let fail = *mask & 1 != 0;
    *mask >>= 1;
    fail
}

impl HomaTransport for MockTransport {
    fn recv(&self, buf: &mut [u8], _flags: RecvFlags, id: u64) -> io::Result<RecvMsg> {
        let mut state = self.lock();
        if take_error(&mut state.recv_errors) {
            return Err(io::Error::from_raw_os_error(libc::EIO));
        }

        let header = state
            .recv_headers
            .pop_front()
            .unwrap_or_else(|| MessageHeader::new(44, 0, 10, 20, 1000));
        let message_length = state
            .recv_msg_lengths
            .pop_front()
            .unwrap_or_else(|| header.total_length());
        let bytes = state
            .recv_returns
            .pop_front()
            .unwrap_or(message_length)
            .min(buf.len());

        if id == 0 {
            // First call on a message: header, then offset-patterned data.
            if bytes >= HEADER_SIZE {
                header.encode_into(buf);
                fill_data(&mut buf[HEADER_SIZE..bytes], HEADER_SIZE as u32);
            } else {
                let encoded = header.encode();
                buf[..bytes].copy_from_slice(&encoded[..bytes]);
            }
        } else {
            // Continuation: tail bytes carry their own counter.
            fill_data(&mut buf[..bytes], TAIL_FILL_VALUE);
        }

        Ok(RecvMsg {
            id: MOCK_RECV_ID,
            peer: mock_peer(),
            message_length,
            bytes,
        })
    }

    fn sendv(&self, bufs: &[IoSlice<'_>], _dest: SocketAddr) -> io::Result<u64> {
        let total: usize = bufs.iter().map(|buf| buf.len()).sum();
        let mut state = self.lock();
        state
            .outgoing
            .push(format!("sendv: {} iovecs, {} bytes", bufs.len(), total));
        if take_error(&mut state.send_errors) {
            return Err(io::Error::from_raw_os_error(libc::EIO));
        }
        Ok(MOCK_RECV_ID)
    }

    fn replyv(&self, bufs: &[IoSlice<'_>], _dest: SocketAddr, _id: u64) -> io::Result<usize> {
        let total: usize = bufs.iter().map(|buf| buf.len()).sum();
        let mut state = self.lock();
        state
            .outgoing
            .push(format!("replyv: {} iovecs, {} bytes", bufs.len(), total));
        if take_error(&mut state.reply_errors) {
            return Err(io::Error::from_raw_os_error(libc::EIO));
        }
        Ok(total)
    }
}

/// Fill `data` with a checkable pattern: each aligned 4-byte word holds
/// `first_value` plus its byte offset into `data` (little endian); any
/// trailing bytes get `0xaa`.
pub fn fill_data(data: &mut [u8], first_value: u32) {
    let mut offset = 0;
    while offset + 4 <= data.len() {
        data[offset..offset + 4].copy_from_slice(&(first_value + offset as u32).to_le_bytes());
        offset += 4;
    }
    for byte in &mut data[offset..] {
        *byte = 0xaa;
    }
}

/// Describe a block previously patterned with [`fill_data`] as a list of
/// value ranges, e.g. `"484-499 1000-1023"`; trailing unpatterned bytes
/// are appended in hex.
pub fn data_ranges(data: &[u8]) -> String {
    if data.is_empty() {
        return "empty block".to_string();
    }
    let mut out = String::new();
    let mut offset = 0;
    if data.len() >= 4 {
        let word = |at: usize| u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]);
        let mut range_start = word(0);
        let mut expected = range_start;
        while offset + 4 <= data.len() {
            let current = word(offset);
            if current != expected {
                push_range(&mut out, range_start, expected);
                range_start = current;
            }
            expected = current + 4;
            offset += 4;
        }
        push_range(&mut out, range_start, expected);
    }
    for byte in &data[offset..] {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(&format!("0x{byte:x}"));
    }
    out
}

fn push_range(out: &mut String, start: u32, next: u32) {
    if !out.is_empty() {
        out.push(' ');
    }
    out.push_str(&format!("{}-{}", start, next - 1));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_and_ranges_roundtrip() {
        let mut buf = [0u8; 40];
        fill_data(&mut buf, 460);
        assert_eq!(data_ranges(&buf), "460-499");
    }

    #[test]
    fn test_ranges_detect_discontinuity() {
        let mut buf = [0u8; 40];
        fill_data(&mut buf[..16], 484);
        fill_data(&mut buf[16..], 1000);
        assert_eq!(data_ranges(&buf), "484-499 1000-1023");
    }

    #[test]
    fn test_ranges_empty_block() {
        assert_eq!(data_ranges(&[]), "empty block");
    }

    #[test]
    fn test_fill_marks_trailing_bytes() {
        let mut buf = [0u8; 6];
        fill_data(&mut buf, 0);
        assert_eq!(&buf[4..], &[0xaa, 0xaa]);
        assert_eq!(data_ranges(&buf), "0-3 0xaa 0xaa");
    }

    #[test]
    fn test_default_recv_reports_computed_length() {
        let mock = MockTransport::new();
        let mut buf = vec![0u8; 2000];
        let recv = mock.recv(&mut buf, RecvFlags::REQUEST, 0).unwrap();

        assert_eq!(recv.id, MOCK_RECV_ID);
        assert_eq!(recv.message_length, HEADER_SIZE + 10 + 20 + 1000);
        assert_eq!(recv.bytes, recv.message_length);

        let header = MessageHeader::decode(&buf).unwrap();
        assert_eq!(header.stream_id, 44);
    }

    #[test]
    fn test_recv_clamps_to_buffer_capacity() {
        let mock = MockTransport::new();
        let mut buf = vec![0u8; 500];
        let recv = mock.recv(&mut buf, RecvFlags::REQUEST, 0).unwrap();
        assert_eq!(recv.bytes, 500);
        assert_eq!(recv.message_length, 1050);
    }

    #[test]
    fn test_error_mask_consumed_per_call() {
        let mock = MockTransport::new();
        mock.fail_recv(0b10);
        let mut buf = vec![0u8; 2000];
        assert!(mock.recv(&mut buf, RecvFlags::REQUEST, 0).is_ok());
        assert!(mock.recv(&mut buf, RecvFlags::REQUEST, 0).is_err());
        assert!(mock.recv(&mut buf, RecvFlags::REQUEST, 0).is_ok());
    }

    #[test]
    fn test_continuation_uses_tail_pattern() {
        let mock = MockTransport::new();
        mock.push_return(100);
        let mut buf = vec![0u8; 100];
        let recv = mock.recv(&mut buf, RecvFlags::REQUEST, MOCK_RECV_ID).unwrap();
        assert_eq!(recv.bytes, 100);
        assert_eq!(data_ranges(&buf), "1000-1099");
    }

    #[test]
    fn test_outgoing_accounting() {
        let mock = MockTransport::new();
        let dest = mock_peer();
        let first = [1u8; 10];
        let second = [2u8; 30];
        let bufs = [IoSlice::new(&first), IoSlice::new(&second)];

        mock.sendv(&bufs, dest).unwrap();
        mock.replyv(&bufs[..1], dest, MOCK_RECV_ID).unwrap();

        assert_eq!(
            mock.outgoing(),
            vec![
                "sendv: 2 iovecs, 40 bytes".to_string(),
                "replyv: 1 iovecs, 10 bytes".to_string(),
            ]
        );
    }
}
