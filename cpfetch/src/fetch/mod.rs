//! End-to-end fetch: connect, escalate, dump, collect, decode, write.

mod builder;
mod report;

pub use builder::{DEFAULT_REMOTE_DIR, FetchBuilder};
pub use report::FetchReport;

use std::path::PathBuf;
use std::time::Duration;

use log::{info, warn};
use tokio::time::Instant;

use crate::collector::{CollectorConfig, StreamOutput, StreamState, collect_until_idle};
use crate::dialogue::{DialogueConfig, DialogueReport, DialogueStep, run_dialogue};
use crate::error::Result;
use crate::payload;
use crate::session::Session;
use crate::transport::{Channel, SshConfig, SshTransport};

/// Leaves the privileged shell once streaming is over.
const EXIT_COMMAND: &str = "exit";

/// Pause after `exit` before the channel is closed.
const EXIT_SETTLE: Duration = Duration::from_millis(500);

/// Progress notifications passed to the caller of a fetch.
#[derive(Debug, Clone, Copy)]
pub enum FetchEvent<'a> {
    /// Periodic update while the dump streams in.
    Receiving(&'a StreamState),
    /// Streaming finished; extraction and decoding come next.
    Collected(&'a StreamState),
}

/// Everything about a fetch except how to reach the host.
#[derive(Debug)]
pub struct FetchJob {
    /// Dialogue that reaches the privileged shell.
    pub steps: Vec<DialogueStep>,

    /// Remote directory holding the file.
    pub remote_dir: String,

    /// File name inside `remote_dir`.
    pub backup_file: String,

    /// Local destination.
    pub output_path: PathBuf,

    /// Dialogue timing and policy.
    pub dialogue: DialogueConfig,

    /// Stream polling parameters.
    pub collector: CollectorConfig,
}

impl FetchJob {
    /// Absolute path of the file on the remote side.
    pub fn remote_path(&self) -> String {
        format!("{}/{}", self.remote_dir, self.backup_file)
    }

    /// Command that prints the file as base64.
    pub fn dump_command(&self) -> String {
        format!("base64 {}", self.remote_path())
    }

    /// Run the job over an already open channel.
    ///
    /// The channel is closed before decoding starts, whether streaming
    /// succeeded or not. Nothing is written unless the whole payload
    /// decodes. [`FetchEvent::Collected`] is emitted once streaming ends,
    /// before extraction can fail.
    pub async fn run_on<C, F>(&self, channel: C, mut on_event: F) -> Result<FetchReport>
    where
        C: Channel,
        F: FnMut(FetchEvent<'_>),
    {
        let start = Instant::now();
        let mut session = Session::new(channel);

        let streamed = self.stream(&mut session, &mut on_event).await;
        if let Err(e) = session.close().await {
            warn!("closing session: {}", e);
        }
        let (dialogue, output) = streamed?;

        info!("received {:.1} MB of output", output.state.megabytes());
        on_event(FetchEvent::Collected(&output.state));

        let payload = payload::require_payload(&output.text)?;
        info!(
            "found {} base64 lines ({} bytes encoded)",
            payload.len(),
            payload.encoded_len()
        );

        let bytes_written = payload::decode_and_persist(&payload, &self.output_path).await?;

        Ok(FetchReport {
            remote_path: self.remote_path(),
            output_path: self.output_path.clone(),
            raw_bytes: output.state.total_bytes,
            candidate_lines: payload.len(),
            encoded_len: payload.encoded_len(),
            bytes_written,
            dialogue_timeouts: dialogue.timeouts(),
            elapsed: start.elapsed(),
        })
    }

    /// Everything that needs the channel: dialogue, dump, collection, exit.
    async fn stream<C, F>(
        &self,
        session: &mut Session<C>,
        on_event: &mut F,
    ) -> Result<(DialogueReport, StreamOutput)>
    where
        C: Channel,
        F: FnMut(FetchEvent<'_>),
    {
        let dialogue = run_dialogue(session, &self.steps, &self.dialogue).await?;
        if !dialogue.state.is_authenticated() {
            warn!("dialogue ended in state {}, dumping anyway", dialogue.state);
        }

        let command = self.dump_command();
        info!("running '{}'", command);
        session.send_line(&command).await?;

        let output = collect_until_idle(session, &self.collector, |state| {
            on_event(FetchEvent::Receiving(state))
        })
        .await?;

        if let Err(e) = session.send_line(EXIT_COMMAND).await {
            warn!("leaving privileged shell: {}", e);
        }
        tokio::time::sleep(EXIT_SETTLE).await;

        Ok((dialogue, output))
    }
}

/// Connects to a host and runs a [`FetchJob`] there.
pub struct Fetcher {
    ssh: SshConfig,
    job: FetchJob,
}

impl Fetcher {
    /// Create a fetcher from its parts. Prefer [`FetchBuilder`].
    pub fn new(ssh: SshConfig, job: FetchJob) -> Self {
        Self { ssh, job }
    }

    /// Get the SSH configuration.
    pub fn ssh(&self) -> &SshConfig {
        &self.ssh
    }

    /// Get the job.
    pub fn job(&self) -> &FetchJob {
        &self.job
    }

    /// Connect, open a shell and run the job.
    ///
    /// `on_event` is called periodically while the dump streams in and
    /// once when streaming is over.
    pub async fn run<F>(self, on_event: F) -> Result<FetchReport>
    where
        F: FnMut(FetchEvent<'_>),
    {
        info!("connecting to {}", self.ssh.socket_addr());
        let channel = SshTransport::connect(self.ssh).await?.open_channel().await?;
        self.job.run_on(channel, on_event).await
    }
}
