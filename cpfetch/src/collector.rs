//! Idle-terminated collection of streamed command output.
//!
//! The dump command gives no end-of-transfer signal, and its output can be
//! anything from a few kilobytes to several gigabytes, so a fixed overall
//! timeout is wrong. The collector instead reads for as long as data keeps
//! arriving and stops after `max_idle_polls` consecutive empty polls.
//!
//! A remote pause longer than that window cannot be told apart from the end
//! of the transfer and truncates the output. The caller detects this only
//! indirectly, when the truncated base64 fails to decode.

use std::time::Duration;

use log::{debug, info};
use tokio::time::Instant;

use crate::error::Result;
use crate::session::Session;
use crate::transport::Channel;

/// Polling parameters for [`collect_until_idle`].
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Sleep between polls that found no data.
    pub poll_interval: Duration,

    /// Consecutive empty polls that end the collection.
    pub max_idle_polls: u32,

    /// Largest single read.
    pub chunk_size: usize,

    /// Report progress every this many chunks (0 disables it).
    pub progress_every: u64,
}

impl CollectorConfig {
    /// How long the remote side may stay silent before the transfer is
    /// considered finished.
    pub fn idle_window(&self) -> Duration {
        self.poll_interval * self.max_idle_polls
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            max_idle_polls: 60,
            chunk_size: 128 * 1024,
            progress_every: 100,
        }
    }
}

/// Counters threaded through each poll iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamState {
    /// Raw bytes received since collection started.
    pub total_bytes: u64,

    /// Polls in a row that found nothing.
    pub idle_polls: u32,

    /// Non-empty reads so far.
    pub chunks: u64,
}

impl StreamState {
    /// Fold the result of one poll into the state. `received == 0` is an
    /// idle poll; anything else resets the idle counter.
    pub fn observe(self, received: usize) -> Self {
        if received == 0 {
            Self {
                idle_polls: self.idle_polls + 1,
                ..self
            }
        } else {
            Self {
                total_bytes: self.total_bytes + received as u64,
                idle_polls: 0,
                chunks: self.chunks + 1,
            }
        }
    }

    /// Whether collection should stop.
    pub fn is_idle(&self, max_idle_polls: u32) -> bool {
        self.idle_polls >= max_idle_polls
    }

    /// Received volume in mebibytes, for progress output.
    pub fn megabytes(&self) -> f64 {
        self.total_bytes as f64 / (1024.0 * 1024.0)
    }
}

/// Everything collected after the dump command.
#[derive(Debug)]
pub struct StreamOutput {
    /// Collected text, control sequences stripped.
    pub text: String,

    /// Final counters.
    pub state: StreamState,

    /// Time spent collecting, including the trailing idle window.
    pub elapsed: Duration,
}

/// Read from the session until it has been idle for
/// `config.max_idle_polls` consecutive polls.
///
/// `on_progress` is called every `config.progress_every` chunks. A channel
/// error aborts the collection; the partially collected text is dropped.
pub async fn collect_until_idle<C, F>(
    session: &mut Session<C>,
    config: &CollectorConfig,
    mut on_progress: F,
) -> Result<StreamOutput>
where
    C: Channel,
    F: FnMut(&StreamState),
{
    let start = Instant::now();
    let mut state = StreamState::default();

    debug!(
        "collecting until idle for {:?} ({} polls of {:?})",
        config.idle_window(),
        config.max_idle_polls,
        config.poll_interval
    );

    while !state.is_idle(config.max_idle_polls) {
        let received = session.read_available(config.chunk_size).await?;
        state = state.observe(received);

        if received == 0 {
            tokio::time::sleep(config.poll_interval).await;
        } else if config.progress_every > 0 && state.chunks % config.progress_every == 0 {
            on_progress(&state);
        }
    }

    let elapsed = start.elapsed();
    info!(
        "stream idle after {} bytes in {} chunks ({:?})",
        state.total_bytes, state.chunks, elapsed
    );

    Ok(StreamOutput {
        text: session.take_text(),
        state,
        elapsed,
    })
}
