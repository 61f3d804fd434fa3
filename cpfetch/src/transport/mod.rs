//! SSH transport layer wrapping russh.
//!
//! This module provides the low-level SSH connection management and the
//! [`Channel`] abstraction the rest of the crate polls.

mod channel;
pub mod config;
#[cfg(test)]
pub(crate) mod mock;
mod ssh;

pub use channel::Channel;
pub use config::{AuthMethod, HostKeyVerification, SshConfig};
pub use ssh::{SshChannel, SshTransport};
