//! Dialogue state machine.

use std::fmt;
use std::time::Duration;

use log::warn;

use super::step::DialogueStep;
use crate::error::{DialogueError, Result};

/// Where the privilege-escalation dialogue stands.
///
/// Ordinary steps move the machine forward but stop short of
/// `Authenticated`; only a step that enters the privileged shell gets
/// there. Once `Authenticated` it stays there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogueState {
    /// Shell opened, login banner still arriving.
    Connected,
    /// `expert` sent, waiting for the password prompt.
    AwaitingExpertPrompt,
    /// Password sent, waiting for the privileged prompt.
    Authenticating,
    /// Privileged shell reached (or assumed reached).
    Authenticated,
}

impl DialogueState {
    /// The state that follows this one.
    pub fn next(self) -> Self {
        match self {
            DialogueState::Connected => DialogueState::AwaitingExpertPrompt,
            DialogueState::AwaitingExpertPrompt => DialogueState::Authenticating,
            DialogueState::Authenticating | DialogueState::Authenticated => {
                DialogueState::Authenticated
            }
        }
    }

    /// Transition after `step` finished with `outcome`.
    ///
    /// A privileged step lands in `Authenticated` whatever the state
    /// before it. A timed out step still advances under
    /// [`TimeoutPolicy::BestEffort`]; under [`TimeoutPolicy::Strict`] it is
    /// a [`DialogueError::Timeout`].
    pub fn advance(
        self,
        step: &DialogueStep,
        outcome: &StepOutcome,
        policy: TimeoutPolicy,
    ) -> Result<Self> {
        if let StepOutcome::TimedOut { waited } = *outcome {
            let expected = step.expect.clone().unwrap_or_default();
            match policy {
                TimeoutPolicy::Strict => {
                    return Err(DialogueError::Timeout {
                        step: step.name.clone(),
                        expected,
                        waited,
                    }
                    .into());
                }
                TimeoutPolicy::BestEffort => {
                    warn!(
                        "step '{}' did not see {:?} within {:?}, continuing",
                        step.name, expected, waited
                    );
                }
            }
        }

        if step.privileged {
            return Ok(DialogueState::Authenticated);
        }
        Ok(match self {
            DialogueState::Authenticating => DialogueState::Authenticating,
            other => other.next(),
        })
    }

    /// Whether the privileged shell has been reached.
    pub fn is_authenticated(self) -> bool {
        self == DialogueState::Authenticated
    }
}

impl fmt::Display for DialogueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DialogueState::Connected => "connected",
            DialogueState::AwaitingExpertPrompt => "awaiting-expert-prompt",
            DialogueState::Authenticating => "authenticating",
            DialogueState::Authenticated => "authenticated",
        };
        f.write_str(name)
    }
}

/// How a single step ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The expected text showed up.
    Matched { elapsed: Duration },
    /// The wait budget ran out first.
    TimedOut { waited: Duration },
    /// The step had nothing to expect and waited out its budget.
    Settled,
}

impl StepOutcome {
    /// Check if the step's expectation was not met.
    pub fn is_timeout(&self) -> bool {
        matches!(self, StepOutcome::TimedOut { .. })
    }
}

/// What to do when a step's expectation is not met in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TimeoutPolicy {
    /// Log a warning and move on. Remote prompt text is not fully
    /// predictable, so this is the default.
    #[default]
    BestEffort,
    /// Abort the dialogue.
    Strict,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step() -> DialogueStep {
        DialogueStep::new("expert", "Enter expert password:")
    }

    #[test]
    fn test_next_walks_to_authenticated() {
        let mut state = DialogueState::Connected;
        let mut seen = vec![state];
        for _ in 0..4 {
            state = state.next();
            seen.push(state);
        }
        assert_eq!(
            seen,
            vec![
                DialogueState::Connected,
                DialogueState::AwaitingExpertPrompt,
                DialogueState::Authenticating,
                DialogueState::Authenticated,
                DialogueState::Authenticated,
            ]
        );
    }

    #[test]
    fn test_match_advances() {
        let outcome = StepOutcome::Matched {
            elapsed: Duration::from_millis(500),
        };
        let state = DialogueState::AwaitingExpertPrompt
            .advance(&step(), &outcome, TimeoutPolicy::Strict)
            .unwrap();
        assert_eq!(state, DialogueState::Authenticating);
    }

    #[test]
    fn test_timeout_advances_best_effort() {
        let outcome = StepOutcome::TimedOut {
            waited: Duration::from_secs(2),
        };
        let state = DialogueState::AwaitingExpertPrompt
            .advance(&step(), &outcome, TimeoutPolicy::BestEffort)
            .unwrap();
        assert_eq!(state, DialogueState::Authenticating);
    }

    #[test]
    fn test_timeout_fails_strict() {
        let outcome = StepOutcome::TimedOut {
            waited: Duration::from_secs(2),
        };
        let err = DialogueState::AwaitingExpertPrompt
            .advance(&step(), &outcome, TimeoutPolicy::Strict)
            .unwrap_err();
        assert!(err.to_string().contains("Enter expert password:"));
    }

    #[test]
    fn test_settled_advances_under_strict() {
        let state = DialogueState::Connected
            .advance(&step(), &StepOutcome::Settled, TimeoutPolicy::Strict)
            .unwrap();
        assert_eq!(state, DialogueState::AwaitingExpertPrompt);
        assert!(!StepOutcome::Settled.is_timeout());
    }

    #[test]
    fn test_privileged_step_authenticates_from_any_state() {
        let sudo = DialogueStep::new("sudo -i", "#").enters_privileged_shell();
        let outcome = StepOutcome::Matched {
            elapsed: Duration::from_millis(100),
        };
        for state in [
            DialogueState::Connected,
            DialogueState::AwaitingExpertPrompt,
            DialogueState::Authenticating,
        ] {
            let next = state.advance(&sudo, &outcome, TimeoutPolicy::Strict).unwrap();
            assert_eq!(next, DialogueState::Authenticated);
        }
    }

    #[test]
    fn test_ordinary_steps_stop_short_of_authenticated() {
        let mut state = DialogueState::Connected;
        for _ in 0..5 {
            state = state
                .advance(&step(), &StepOutcome::Settled, TimeoutPolicy::Strict)
                .unwrap();
        }
        assert_eq!(state, DialogueState::Authenticating);

        let state = DialogueState::Authenticated
            .advance(&step(), &StepOutcome::Settled, TimeoutPolicy::Strict)
            .unwrap();
        assert_eq!(state, DialogueState::Authenticated);
    }
}
