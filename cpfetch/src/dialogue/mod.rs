//! Send/expect dialogue that walks a remote shell into privileged mode.
//!
//! Prompts on the remote side are not perfectly predictable, so the
//! engine is best-effort: each step waits a bounded time for its expected
//! text and then moves on whether or not it showed up. The progression is
//! tracked by [`DialogueState`].

mod state;
mod step;

pub use state::{DialogueState, StepOutcome, TimeoutPolicy};
pub use step::{
    DEFAULT_STEP_WAIT, DialogueBuilder, DialogueBuilderWithInput, DialogueStep,
    EXPERT_COMMAND, EXPERT_PASSWORD_PROMPT, EXPERT_SHELL_PROMPT, StepInput, mark_privileged_step,
};

use std::time::Duration;

use log::{debug, info};
use tokio::time::Instant;

use crate::error::Result;
use crate::session::Session;
use crate::transport::Channel;

/// Largest single read during the dialogue.
const DIALOGUE_CHUNK: usize = 8 * 1024;

/// Timing and policy for [`run_dialogue`].
#[derive(Debug, Clone)]
pub struct DialogueConfig {
    /// Delay between channel polls while waiting on a step.
    pub poll_interval: Duration,

    /// Pause after each step so the remote side can flush its output.
    pub settle: Duration,

    /// What to do when a step times out.
    pub policy: TimeoutPolicy,
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            settle: Duration::from_millis(500),
            policy: TimeoutPolicy::BestEffort,
        }
    }
}

/// Record of one executed step.
#[derive(Debug, Clone)]
pub struct StepRecord {
    /// Step name (hidden inputs never appear here).
    pub name: String,

    /// How the step ended.
    pub outcome: StepOutcome,

    /// Output received while the step ran.
    pub output: String,
}

/// Result of a dialogue run.
#[derive(Debug, Clone)]
pub struct DialogueReport {
    /// State the machine ended in.
    pub state: DialogueState,

    /// Per-step records, in execution order.
    pub steps: Vec<StepRecord>,

    /// Total time for the whole dialogue.
    pub elapsed: Duration,
}

impl DialogueReport {
    /// Number of steps whose expectation was not met.
    pub fn timeouts(&self) -> usize {
        self.steps.iter().filter(|s| s.outcome.is_timeout()).count()
    }

    /// Get all step outputs concatenated.
    pub fn full_output(&self) -> String {
        self.steps.iter().map(|s| s.output.as_str()).collect()
    }
}

/// Run `steps` in order against the session.
///
/// Once the machine reaches [`DialogueState::Authenticated`], everything
/// still pending on the channel is read and the session buffer is cleared,
/// so the next reader only sees output of the next command.
pub async fn run_dialogue<C: Channel>(
    session: &mut Session<C>,
    steps: &[DialogueStep],
    config: &DialogueConfig,
) -> Result<DialogueReport> {
    let start = Instant::now();
    let mut state = DialogueState::Connected;
    let mut records = Vec::with_capacity(steps.len());

    for step in steps {
        let mark = session.buffer().len();
        let outcome = run_step(session, step, config.poll_interval).await?;
        let output = session.buffer().text_since(mark).to_string();

        state = state.advance(step, &outcome, config.policy)?;
        debug!("step '{}' -> {:?}, now {}", step.name, outcome, state);

        records.push(StepRecord {
            name: step.name.clone(),
            outcome,
            output,
        });

        tokio::time::sleep(config.settle).await;
    }

    if state.is_authenticated() {
        session.discard_pending().await?;
        info!("privileged shell ready");
    }

    Ok(DialogueReport {
        state,
        steps: records,
        elapsed: start.elapsed(),
    })
}

/// Send the step's input and poll until its expectation appears or its
/// budget runs out.
async fn run_step<C: Channel>(
    session: &mut Session<C>,
    step: &DialogueStep,
    poll_interval: Duration,
) -> Result<StepOutcome> {
    let mark = session.buffer().len();

    if let Some(ref input) = step.input {
        debug!("step '{}': sending {:?}", step.name, input.display());
        session.send_line(input.expose()).await?;
    }

    let start = Instant::now();
    let deadline = start + step.max_wait;

    loop {
        while session.read_available(DIALOGUE_CHUNK).await? > 0 {}

        if let Some(ref expect) = step.expect {
            if session.buffer().contains_since(mark, expect) {
                return Ok(StepOutcome::Matched {
                    elapsed: start.elapsed(),
                });
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return Ok(match step.expect {
                Some(_) => StepOutcome::TimedOut {
                    waited: step.max_wait,
                },
                None => StepOutcome::Settled,
            });
        }

        tokio::time::sleep(poll_interval.min(deadline - now)).await;
    }
}
