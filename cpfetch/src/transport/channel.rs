//! Byte-stream abstraction over an interactive remote shell.

use std::future::Future;

use bytes::Bytes;

use crate::error::Result;

/// A duplex byte stream to a remote command interpreter.
///
/// This is the only surface the session, dialogue and collector layers
/// see, so they can be driven by a real SSH channel or a scripted one.
pub trait Channel: Send {
    /// Write raw bytes to the remote side.
    fn send(&mut self, data: &[u8]) -> impl Future<Output = Result<()>> + Send;

    /// Whether a `receive` call would return data without waiting.
    fn data_available(&mut self) -> impl Future<Output = Result<bool>> + Send;

    /// Read up to `max_bytes`. Waits at most the channel's read timeout and
    /// returns an empty buffer if nothing arrived.
    fn receive(&mut self, max_bytes: usize) -> impl Future<Output = Result<Bytes>> + Send;

    /// Close the channel. Closing twice is a no-op.
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;
}

impl<C: Channel> Channel for &mut C {
    fn send(&mut self, data: &[u8]) -> impl Future<Output = Result<()>> + Send {
        C::send(&mut **self, data)
    }

    fn data_available(&mut self) -> impl Future<Output = Result<bool>> + Send {
        C::data_available(&mut **self)
    }

    fn receive(&mut self, max_bytes: usize) -> impl Future<Output = Result<Bytes>> + Send {
        C::receive(&mut **self, max_bytes)
    }

    fn close(&mut self) -> impl Future<Output = Result<()>> + Send {
        C::close(&mut **self)
    }
}
