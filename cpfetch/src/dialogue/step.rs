//! Dialogue steps and the builder used to assemble them.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

/// Wait budget used when a step does not set its own.
pub const DEFAULT_STEP_WAIT: Duration = Duration::from_secs(2);

/// Command that enters the privileged shell.
pub const EXPERT_COMMAND: &str = "expert";

/// Text the remote side prints when it wants the expert password.
pub const EXPERT_PASSWORD_PROMPT: &str = "Enter expert password:";

/// Marker of the privileged shell prompt, e.g. `[Expert@gw:0]# `.
pub const EXPERT_SHELL_PROMPT: &str = "#";

/// What a step writes to the channel.
#[derive(Debug)]
pub enum StepInput {
    /// Plain text, safe to log.
    Line(String),
    /// Secret text (passwords). Never logged.
    Secret(SecretString),
}

impl StepInput {
    /// The text to actually send.
    pub fn expose(&self) -> &str {
        match self {
            StepInput::Line(line) => line,
            StepInput::Secret(secret) => secret.expose_secret(),
        }
    }

    /// The text to show in logs.
    pub fn display(&self) -> &str {
        match self {
            StepInput::Line(line) => line,
            StepInput::Secret(_) => "********",
        }
    }

    /// Whether this input is hidden from logs.
    pub fn is_hidden(&self) -> bool {
        matches!(self, StepInput::Secret(_))
    }
}

/// One send/expect interaction.
///
/// The step is satisfied once `expect` shows up in output received after
/// the step started, or when `max_wait` runs out. A step without an
/// expectation just collects output for its whole budget.
///
/// A step marked with [`enters_privileged_shell`](Self::enters_privileged_shell)
/// is the one whose completion puts the remote side in the privileged
/// shell.
#[derive(Debug)]
pub struct DialogueStep {
    /// Name used in logs and reports.
    pub name: String,

    /// Input to send before waiting, if any.
    pub input: Option<StepInput>,

    /// Substring to wait for.
    pub expect: Option<String>,

    /// How long to wait for `expect`.
    pub max_wait: Duration,

    /// Completing this step reaches the privileged shell.
    pub privileged: bool,
}

impl DialogueStep {
    /// A step that sends `input` and waits for `expect`.
    pub fn new(input: impl Into<String>, expect: impl Into<String>) -> Self {
        let input = input.into();
        Self {
            name: input.clone(),
            input: Some(StepInput::Line(input)),
            expect: Some(expect.into()),
            max_wait: DEFAULT_STEP_WAIT,
            privileged: false,
        }
    }

    /// A step that sends nothing and just lets output arrive.
    pub fn wait(name: impl Into<String>, max_wait: Duration) -> Self {
        Self {
            name: name.into(),
            input: None,
            expect: None,
            max_wait,
            privileged: false,
        }
    }

    /// Set a custom wait budget for this step.
    pub fn with_timeout(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    /// Rename the step.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Mark this step as the one that enters the privileged shell.
    pub fn enters_privileged_shell(mut self) -> Self {
        self.privileged = true;
        self
    }
}

/// Make sure some step of the plan enters the privileged shell.
///
/// Plans that mark no step get their last step marked.
pub fn mark_privileged_step(steps: &mut [DialogueStep]) {
    if steps.iter().any(|s| s.privileged) {
        return;
    }
    if let Some(last) = steps.last_mut() {
        last.privileged = true;
    }
}

/// Builder for dialogue step sequences.
///
/// # Example
///
/// ```rust
/// use cpfetch::dialogue::DialogueBuilder;
/// use std::time::Duration;
///
/// let steps = DialogueBuilder::new()
///     .wait("banner", Duration::from_secs(2))
///     .send("expert")
///     .expect("Enter expert password:")
///     .send_hidden("secret".to_string())
///     .expect("#")
///     .build();
/// assert_eq!(steps.len(), 3);
/// ```
#[derive(Debug, Default)]
pub struct DialogueBuilder {
    steps: Vec<DialogueStep>,
    default_timeout: Option<Duration>,
}

impl DialogueBuilder {
    /// Create a new dialogue builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// The privilege-escalation dialogue for an expert-mode shell:
    /// let the banner settle, run `expert`, answer the password prompt.
    pub fn expert_mode(expert_password: SecretString) -> Vec<DialogueStep> {
        Self::new()
            .wait("banner", Duration::from_secs(2))
            .send(EXPERT_COMMAND)
            .with_timeout(Duration::from_millis(2500))
            .expect(EXPERT_PASSWORD_PROMPT)
            .send_secret(expert_password)
            .named("expert password")
            .privileged()
            .expect(EXPERT_SHELL_PROMPT)
            .build()
    }

    /// Add an input to send. Must be followed by `expect()` or `no_expect()`.
    pub fn send(self, input: impl Into<String>) -> DialogueBuilderWithInput {
        let input = input.into();
        DialogueBuilderWithInput {
            builder: self,
            name: input.clone(),
            input: StepInput::Line(input),
            timeout: None,
            privileged: false,
        }
    }

    /// Add a hidden input (like a password).
    pub fn send_hidden(self, input: String) -> DialogueBuilderWithInput {
        self.send_secret(SecretString::from(input))
    }

    /// Add a hidden input that is already wrapped as a secret.
    pub fn send_secret(self, input: SecretString) -> DialogueBuilderWithInput {
        DialogueBuilderWithInput {
            builder: self,
            name: "hidden input".to_string(),
            input: StepInput::Secret(input),
            timeout: None,
            privileged: false,
        }
    }

    /// Add a step that sends nothing and collects output for `max_wait`.
    pub fn wait(mut self, name: impl Into<String>, max_wait: Duration) -> Self {
        self.steps.push(DialogueStep::wait(name, max_wait));
        self
    }

    /// Set the default wait budget for steps added after this call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Build the list of steps. Unless a step was marked with
    /// [`DialogueBuilderWithInput::privileged`], the last one is taken to
    /// enter the privileged shell.
    pub fn build(mut self) -> Vec<DialogueStep> {
        mark_privileged_step(&mut self.steps);
        self.steps
    }
}

/// Intermediate state for the builder after `send()` is called.
#[derive(Debug)]
pub struct DialogueBuilderWithInput {
    builder: DialogueBuilder,
    name: String,
    input: StepInput,
    timeout: Option<Duration>,
    privileged: bool,
}

impl DialogueBuilderWithInput {
    /// Specify the substring to wait for after sending the input.
    pub fn expect(self, expect: impl Into<String>) -> DialogueBuilder {
        self.finish(Some(expect.into()))
    }

    /// Send the input and wait out the budget without expecting anything.
    pub fn no_expect(self) -> DialogueBuilder {
        self.finish(None)
    }

    /// Set a custom wait budget for this specific step.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Name the step for logs and reports.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// This step enters the privileged shell.
    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }

    fn finish(mut self, expect: Option<String>) -> DialogueBuilder {
        let max_wait = self
            .timeout
            .or(self.builder.default_timeout)
            .unwrap_or(DEFAULT_STEP_WAIT);

        self.builder.steps.push(DialogueStep {
            name: self.name,
            input: Some(self.input),
            expect,
            max_wait,
            privileged: self.privileged,
        });
        self.builder
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_new() {
        let step = DialogueStep::new("expert", "password:");
        assert_eq!(step.name, "expert");
        assert_eq!(step.expect.as_deref(), Some("password:"));
        assert_eq!(step.max_wait, DEFAULT_STEP_WAIT);
        assert!(!step.input.as_ref().unwrap().is_hidden());
    }

    #[test]
    fn test_hidden_input_masked() {
        let input = StepInput::Secret(SecretString::from("s3cret".to_string()));
        assert_eq!(input.expose(), "s3cret");
        assert_eq!(input.display(), "********");
        assert!(!format!("{:?}", input).contains("s3cret"));
    }

    #[test]
    fn test_builder() {
        let steps = DialogueBuilder::new()
            .send("expert")
            .expect("password:")
            .send_hidden("pw".to_string())
            .expect("#")
            .build();

        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].input.as_ref().unwrap().expose(), "expert");
        assert!(steps[1].input.as_ref().unwrap().is_hidden());
        assert_eq!(steps[1].name, "hidden input");
    }

    #[test]
    fn test_builder_timeouts() {
        let steps = DialogueBuilder::new()
            .with_timeout(Duration::from_secs(5))
            .send("a")
            .expect("x")
            .send("b")
            .with_timeout(Duration::from_secs(1))
            .no_expect()
            .build();

        assert_eq!(steps[0].max_wait, Duration::from_secs(5));
        assert_eq!(steps[1].max_wait, Duration::from_secs(1));
        assert!(steps[1].expect.is_none());
    }

    #[test]
    fn test_expert_mode_plan() {
        let steps = DialogueBuilder::expert_mode(SecretString::from("pw".to_string()));

        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].name, "banner");
        assert!(steps[0].input.is_none());
        assert_eq!(steps[1].input.as_ref().unwrap().expose(), EXPERT_COMMAND);
        assert_eq!(steps[1].expect.as_deref(), Some(EXPERT_PASSWORD_PROMPT));
        assert_eq!(steps[1].max_wait, Duration::from_millis(2500));
        assert_eq!(steps[2].name, "expert password");
        assert!(steps[2].input.as_ref().unwrap().is_hidden());
        assert_eq!(steps[2].expect.as_deref(), Some(EXPERT_SHELL_PROMPT));
        assert!(!steps[0].privileged && !steps[1].privileged);
        assert!(steps[2].privileged);
    }

    #[test]
    fn test_last_step_privileged_by_default() {
        let steps = DialogueBuilder::new().send("sudo -i").expect("#").build();
        assert!(steps[0].privileged);

        let steps = DialogueBuilder::new()
            .send("su -")
            .privileged()
            .expect("#")
            .send("cd /tmp")
            .no_expect()
            .build();
        assert!(steps[0].privileged);
        assert!(!steps[1].privileged);
    }

    #[test]
    fn test_mark_privileged_step_on_hand_built_plan() {
        let mut steps = vec![
            DialogueStep::wait("banner", Duration::from_secs(1)),
            DialogueStep::new("sudo -i", "#"),
        ];
        mark_privileged_step(&mut steps);
        assert!(!steps[0].privileged);
        assert!(steps[1].privileged);

        mark_privileged_step(&mut []);
    }
}
