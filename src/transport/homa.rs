//! Homa transport primitives.
//!
//! [`HomaTransport`] is the receive/send contract the incoming-message
//! layer is written against. The production implementation is
//! [`HomaSocket`] (Linux only), a datagram socket speaking `IPPROTO_HOMA`;
//! tests use [`MockTransport`](super::mock::MockTransport).
//!
//! Homa delivers whole messages, not byte streams. A receive call with a
//! buffer of capacity `C` blocks until a message is available, writes up
//! to `C` bytes, and reports both the full message length and the number
//! of bytes actually written. When the buffer was too small, a follow-up
//! call targeting the same message id returns the remainder (the "tail").

use std::io::{self, IoSlice};
use std::net::SocketAddr;

bitflags::bitflags! {
    /// Receive-direction flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RecvFlags: u32 {
        /// Accept incoming requests.
        const REQUEST = 0x01;
        /// Accept responses to requests sent from this socket.
        const RESPONSE = 0x02;
        /// Fail with `EAGAIN` instead of blocking.
        const NONBLOCKING = 0x04;
    }
}

/// Result of one successful receive call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecvMsg {
    /// Per-message identifier; pass it back to fetch the message tail.
    pub id: u64,
    /// Address of the peer that sent the message.
    pub peer: SocketAddr,
    /// Full length of the message, which may exceed the caller's buffer.
    pub message_length: usize,
    /// Bytes actually written into the caller's buffer
    /// (`min(buf.len(), message_length)` for the first call on a message).
    pub bytes: usize,
}

/// Blocking message transport with Homa's receive contract.
pub trait HomaTransport {
    /// Receive (part of) a message into `buf`.
    ///
    /// `id == 0` accepts any message matching `flags`; a non-zero `id`
    /// targets the continuation of the message that id was reported for.
    /// Blocks until data is available unless `flags` says otherwise.
    fn recv(&self, buf: &mut [u8], flags: RecvFlags, id: u64) -> io::Result<RecvMsg>;

    /// Send a request message assembled from `bufs`; returns the id Homa
    /// assigned to the new RPC.
    fn sendv(&self, bufs: &[IoSlice<'_>], dest: SocketAddr) -> io::Result<u64>;

    /// Send the response for RPC `id` assembled from `bufs`; returns the
    /// number of bytes sent.
    fn replyv(&self, bufs: &[IoSlice<'_>], dest: SocketAddr, id: u64) -> io::Result<usize>;
}

impl<T: HomaTransport + ?Sized> HomaTransport for &T {
    fn recv(&self, buf: &mut [u8], flags: RecvFlags, id: u64) -> io::Result<RecvMsg> {
        (**self).recv(buf, flags, id)
    }

    fn sendv(&self, bufs: &[IoSlice<'_>], dest: SocketAddr) -> io::Result<u64> {
        (**self).sendv(bufs, dest)
    }

    fn replyv(&self, bufs: &[IoSlice<'_>], dest: SocketAddr, id: u64) -> io::Result<usize> {
        (**self).replyv(bufs, dest, id)
    }
}

#[cfg(target_os = "linux")]
pub use linux::{
    HomaSocket, HOMA_BPAGE_SIZE, HOMA_MAX_BPAGES, HOMA_MAX_MESSAGE_LENGTH, IPPROTO_HOMA,
};

#[cfg(target_os = "linux")]
mod linux {
    use std::collections::HashMap;
    use std::mem;
    use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
    use std::ptr;
    use std::sync::Mutex;

    use super::*;

    /// Homa's protocol number within the IP protocol space.
    pub const IPPROTO_HOMA: libc::c_int = 0xFD;

    /// Maximum bytes of payload in a Homa request or response message.
    pub const HOMA_MAX_MESSAGE_LENGTH: usize = 1_000_000;

    /// Size of the pages Homa uses for receive buffers.
    pub const HOMA_BPAGE_SIZE: usize = 1 << 16;

    /// Largest number of buffer pages one incoming message can occupy.
    pub const HOMA_MAX_BPAGES: usize = HOMA_MAX_MESSAGE_LENGTH.div_ceil(HOMA_BPAGE_SIZE);

    /// setsockopt option for registering the receive buffer region.
    const SO_HOMA_SET_BUF: libc::c_int = 10;

    /// Buffer pages to reserve for the receive region.
    const RECV_REGION_BPAGES: usize = 64;

    /// Control block passed to `recvmsg`; the kernel fills in the id and
    /// the buffer pages holding the message.
    #[repr(C)]
    struct HomaRecvmsgArgs {
        id: u64,
        completion_cookie: u64,
        flags: u32,
        num_bpages: u32,
        bpage_offsets: [u32; HOMA_MAX_BPAGES],
    }

    /// Control block passed to `sendmsg`; the kernel writes the assigned
    /// RPC id back for requests.
    #[repr(C)]
    struct HomaSendmsgArgs {
        id: u64,
        completion_cookie: u64,
    }

    /// Argument block for `SO_HOMA_SET_BUF`.
    #[repr(C)]
    struct HomaSetBufArgs {
        start: *mut libc::c_void,
        length: libc::size_t,
    }

    /// The mmap'd region Homa delivers message pages into.
    struct RecvRegion {
        base: *mut u8,
        length: usize,
    }

    // The region pointer is only dereferenced under the socket's state
    // lock and stays mapped for the socket's lifetime.
    unsafe impl Send for RecvRegion {}
    unsafe impl Sync for RecvRegion {}

    impl Drop for RecvRegion {
        fn drop(&mut self) {
            unsafe {
                libc::munmap(self.base.cast(), self.length);
            }
        }
    }

    /// A message remainder that did not fit the caller's buffer, parked
    /// until the follow-up receive targets its id.
    struct PendingTail {
        data: Vec<u8>,
        message_length: usize,
        peer: SocketAddr,
    }

    #[derive(Default)]
    struct SocketState {
        pending: HashMap<u64, PendingTail>,
        /// Buffer pages consumed by the previous receive, handed back to
        /// the kernel on the next one.
        release: Vec<u32>,
    }

    /// A Homa datagram socket.
    ///
    /// The kernel delivers each message into pages of the registered
    /// buffer region; `recv` copies those pages into the caller's buffer
    /// and parks any overflow so a follow-up call with the reported id
    /// returns the tail, matching the [`HomaTransport`] contract.
    pub struct HomaSocket {
        fd: OwnedFd,
        region: RecvRegion,
        state: Mutex<SocketState>,
    }

    impl HomaSocket {
        /// Create a Homa socket bound to `port` on all interfaces.
        pub fn bind(port: u16) -> io::Result<Self> {
            let raw = unsafe {
                libc::socket(
                    libc::AF_INET6,
                    libc::SOCK_DGRAM | libc::SOCK_CLOEXEC,
                    IPPROTO_HOMA,
                )
            };
            if raw < 0 {
                return Err(io::Error::last_os_error());
            }
            let fd = unsafe { OwnedFd::from_raw_fd(raw) };

            let local = SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, port, 0, 0));
            let (storage, addr_len) = sockaddr_from(&local);
            let rc = unsafe {
                libc::bind(
                    fd.as_raw_fd(),
                    (&storage as *const libc::sockaddr_storage).cast(),
                    addr_len,
                )
            };
            if rc < 0 {
                return Err(io::Error::last_os_error());
            }

            let length = RECV_REGION_BPAGES * HOMA_BPAGE_SIZE;
            let base = unsafe {
                libc::mmap(
                    ptr::null_mut(),
                    length,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                    -1,
                    0,
                )
            };
            if base == libc::MAP_FAILED {
                return Err(io::Error::last_os_error());
            }
            let region = RecvRegion {
                base: base.cast(),
                length,
            };

            let args = HomaSetBufArgs {
                start: region.base.cast(),
                length,
            };
            let rc = unsafe {
                libc::setsockopt(
                    fd.as_raw_fd(),
                    IPPROTO_HOMA,
                    SO_HOMA_SET_BUF,
                    (&args as *const HomaSetBufArgs).cast(),
                    mem::size_of::<HomaSetBufArgs>() as libc::socklen_t,
                )
            };
            if rc < 0 {
                return Err(io::Error::last_os_error());
            }

            Ok(Self {
                fd,
                region,
                state: Mutex::new(SocketState::default()),
            })
        }

        fn send_with_args(
            &self,
            bufs: &[IoSlice<'_>],
            dest: SocketAddr,
            args: &mut HomaSendmsgArgs,
        ) -> io::Result<usize> {
            let (mut storage, addr_len) = sockaddr_from(&dest);
            let mut hdr: libc::msghdr = unsafe { mem::zeroed() };
            hdr.msg_name = (&mut storage as *mut libc::sockaddr_storage).cast();
            hdr.msg_namelen = addr_len;
            // std guarantees IoSlice is ABI-compatible with iovec.
            hdr.msg_iov = bufs.as_ptr() as *mut libc::iovec;
            hdr.msg_iovlen = bufs.len() as _;
            hdr.msg_control = (args as *mut HomaSendmsgArgs).cast();
            hdr.msg_controllen = mem::size_of::<HomaSendmsgArgs>() as _;

            let sent = unsafe { libc::sendmsg(self.fd.as_raw_fd(), &hdr, 0) };
            if sent < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(sent as usize)
        }
    }

    impl AsRawFd for HomaSocket {
        fn as_raw_fd(&self) -> RawFd {
            self.fd.as_raw_fd()
        }
    }

    impl HomaTransport for HomaSocket {
        fn recv(&self, buf: &mut [u8], flags: RecvFlags, id: u64) -> io::Result<RecvMsg> {
            if id != 0 {
                let mut state = self.state.lock().expect("socket state lock");
                if let Some(tail) = state.pending.remove(&id) {
                    let n = buf.len().min(tail.data.len());
                    buf[..n].copy_from_slice(&tail.data[..n]);
                    if n < tail.data.len() {
                        state.pending.insert(
                            id,
                            PendingTail {
                                data: tail.data[n..].to_vec(),
                                message_length: tail.message_length,
                                peer: tail.peer,
                            },
                        );
                    }
                    return Ok(RecvMsg {
                        id,
                        peer: tail.peer,
                        message_length: tail.message_length,
                        bytes: n,
                    });
                }
            }

            let mut args = HomaRecvmsgArgs {
                id,
                completion_cookie: 0,
                flags: flags.bits(),
                num_bpages: 0,
                bpage_offsets: [0; HOMA_MAX_BPAGES],
            };
            // Hand consumed pages back without holding the lock across the
            // blocking syscall; parallel readers share this socket.
            let release = {
                let mut state = self.state.lock().expect("socket state lock");
                mem::take(&mut state.release)
            };
            let returned = release.len().min(HOMA_MAX_BPAGES);
            args.bpage_offsets[..returned].copy_from_slice(&release[..returned]);
            args.num_bpages = returned as u32;

            let mut src: libc::sockaddr_storage = unsafe { mem::zeroed() };
            let mut hdr: libc::msghdr = unsafe { mem::zeroed() };
            hdr.msg_name = (&mut src as *mut libc::sockaddr_storage).cast();
            hdr.msg_namelen = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
            hdr.msg_control = (&mut args as *mut HomaRecvmsgArgs).cast();
            hdr.msg_controllen = mem::size_of::<HomaRecvmsgArgs>() as _;

            let received = unsafe { libc::recvmsg(self.fd.as_raw_fd(), &mut hdr, 0) };
            if received < 0 {
                let err = io::Error::last_os_error();
                let mut state = self.state.lock().expect("socket state lock");
                state.release.extend_from_slice(&release[..returned]);
                return Err(err);
            }

            let message_length = received as usize;
            let peer = sockaddr_to_addr(&src)?;

            // Gather the message pages into the caller's buffer, parking
            // anything past its capacity for the follow-up call.
            let mut copied = 0;
            let mut overflow = Vec::new();
            let mut remaining = message_length;
            let consumed = &args.bpage_offsets[..args.num_bpages as usize];
            for &offset in consumed {
                let chunk = remaining.min(HOMA_BPAGE_SIZE);
                let page = unsafe {
                    std::slice::from_raw_parts(self.region.base.add(offset as usize), chunk)
                };
                let n = (buf.len() - copied).min(chunk);
                buf[copied..copied + n].copy_from_slice(&page[..n]);
                copied += n;
                if n < chunk {
                    overflow.extend_from_slice(&page[n..]);
                }
                remaining -= chunk;
            }

            let mut state = self.state.lock().expect("socket state lock");
            state.release.extend_from_slice(consumed);
            if !overflow.is_empty() {
                state.pending.insert(
                    args.id,
                    PendingTail {
                        data: overflow,
                        message_length,
                        peer,
                    },
                );
            }

            Ok(RecvMsg {
                id: args.id,
                peer,
                message_length,
                bytes: copied,
            })
        }

        fn sendv(&self, bufs: &[IoSlice<'_>], dest: SocketAddr) -> io::Result<u64> {
            let mut args = HomaSendmsgArgs {
                id: 0,
                completion_cookie: 0,
            };
            self.send_with_args(bufs, dest, &mut args)?;
            Ok(args.id)
        }

        fn replyv(&self, bufs: &[IoSlice<'_>], dest: SocketAddr, id: u64) -> io::Result<usize> {
            let mut args = HomaSendmsgArgs {
                id,
                completion_cookie: 0,
            };
            self.send_with_args(bufs, dest, &mut args)
        }
    }

    fn sockaddr_from(addr: &SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        match addr {
            SocketAddr::V4(v4) => {
                let sin = libc::sockaddr_in {
                    sin_family: libc::AF_INET as libc::sa_family_t,
                    sin_port: v4.port().to_be(),
                    sin_addr: libc::in_addr {
                        s_addr: u32::from_ne_bytes(v4.ip().octets()),
                    },
                    sin_zero: [0; 8],
                };
                unsafe {
                    ptr::write((&mut storage as *mut libc::sockaddr_storage).cast(), sin);
                }
                (storage, mem::size_of::<libc::sockaddr_in>() as libc::socklen_t)
            }
            SocketAddr::V6(v6) => {
                let sin6 = libc::sockaddr_in6 {
                    sin6_family: libc::AF_INET6 as libc::sa_family_t,
                    sin6_port: v6.port().to_be(),
                    sin6_flowinfo: v6.flowinfo(),
                    sin6_addr: libc::in6_addr {
                        s6_addr: v6.ip().octets(),
                    },
                    sin6_scope_id: v6.scope_id(),
                };
                unsafe {
                    ptr::write((&mut storage as *mut libc::sockaddr_storage).cast(), sin6);
                }
                (storage, mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t)
            }
        }
    }

    fn sockaddr_to_addr(storage: &libc::sockaddr_storage) -> io::Result<SocketAddr> {
        match storage.ss_family as libc::c_int {
            libc::AF_INET => {
                let sin =
                    unsafe { &*(storage as *const libc::sockaddr_storage).cast::<libc::sockaddr_in>() };
                Ok(SocketAddr::V4(SocketAddrV4::new(
                    Ipv4Addr::from(sin.sin_addr.s_addr.to_ne_bytes()),
                    u16::from_be(sin.sin_port),
                )))
            }
            libc::AF_INET6 => {
                let sin6 = unsafe {
                    &*(storage as *const libc::sockaddr_storage).cast::<libc::sockaddr_in6>()
                };
                Ok(SocketAddr::V6(SocketAddrV6::new(
                    Ipv6Addr::from(sin6.sin6_addr.s6_addr),
                    u16::from_be(sin6.sin6_port),
                    sin6.sin6_flowinfo,
                    sin6.sin6_scope_id,
                )))
            }
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "unsupported address family",
            )),
        }
    }

}
