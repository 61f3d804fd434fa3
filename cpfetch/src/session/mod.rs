//! Interactive session over a [`Channel`].
//!
//! A session owns the channel and the accumulated output. The dialogue
//! engine and the stream collector both work through it.

mod buffer;

pub use buffer::SessionBuffer;

use log::{debug, trace};

use crate::error::Result;
use crate::transport::Channel;

/// Largest read issued while draining leftovers.
const DRAIN_CHUNK: usize = 16 * 1024;

/// One interactive shell and everything it has printed so far.
pub struct Session<C: Channel> {
    channel: C,
    buffer: SessionBuffer,
    line_terminator: String,
    raw_bytes: u64,
    is_open: bool,
}

impl<C: Channel> Session<C> {
    /// Wrap an open channel.
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            buffer: SessionBuffer::default(),
            line_terminator: "\n".to_string(),
            raw_bytes: 0,
            is_open: true,
        }
    }

    /// Override the line terminator appended by [`send_line`](Self::send_line).
    pub fn with_line_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.line_terminator = terminator.into();
        self
    }

    /// Send `line` followed by the line terminator.
    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        let mut data = Vec::with_capacity(line.len() + self.line_terminator.len());
        data.extend_from_slice(line.as_bytes());
        data.extend_from_slice(self.line_terminator.as_bytes());
        self.channel.send(&data).await
    }

    /// Read one chunk of up to `max_bytes` if the channel has data ready.
    ///
    /// Returns the number of raw bytes appended, 0 when nothing was ready.
    pub async fn read_available(&mut self, max_bytes: usize) -> Result<usize> {
        if !self.channel.data_available().await? {
            return Ok(0);
        }

        let chunk = self.channel.receive(max_bytes).await?;
        self.raw_bytes += chunk.len() as u64;
        self.buffer.extend(&chunk);
        trace!("read {} bytes, buffer now {} bytes", chunk.len(), self.buffer.len());
        Ok(chunk.len())
    }

    /// Read everything already waiting on the channel, then empty the buffer.
    pub async fn discard_pending(&mut self) -> Result<usize> {
        let mut discarded = 0;
        loop {
            let n = self.read_available(DRAIN_CHUNK).await?;
            if n == 0 {
                break;
            }
            discarded += n;
        }
        self.buffer.clear();
        debug!("discarded {} pending bytes", discarded);
        Ok(discarded)
    }

    /// Close the channel. Safe to call on every exit path.
    pub async fn close(&mut self) -> Result<()> {
        if !self.is_open {
            return Ok(());
        }
        self.is_open = false;
        self.channel.close().await
    }

    /// Check if the session has not been closed yet.
    pub fn is_open(&self) -> bool {
        self.is_open
    }

    /// Get a reference to the buffer.
    pub fn buffer(&self) -> &SessionBuffer {
        &self.buffer
    }

    /// Take the buffered text, leaving the buffer empty.
    pub fn take_text(&mut self) -> String {
        self.buffer.take()
    }

    /// Raw bytes received over the lifetime of the session.
    pub fn raw_bytes(&self) -> u64 {
        self.raw_bytes
    }

    /// Get a reference to the underlying channel.
    pub fn channel(&self) -> &C {
        &self.channel
    }
}
