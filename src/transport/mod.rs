//! Transport module - Homa socket handling.
//!
//! Provides:
//! - [`HomaTransport`] - the blocking message-transport contract
//! - [`HomaSocket`] - the production `IPPROTO_HOMA` socket (Linux)
//! - [`mock`] - a scripted transport for tests

mod homa;
pub mod mock;

pub use homa::{HomaTransport, RecvFlags, RecvMsg};

#[cfg(target_os = "linux")]
pub use homa::{HomaSocket, HOMA_BPAGE_SIZE, HOMA_MAX_BPAGES, HOMA_MAX_MESSAGE_LENGTH, IPPROTO_HOMA};
