//! Builder for creating fetchers.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use super::{FetchJob, Fetcher};
use crate::collector::CollectorConfig;
use crate::dialogue::{
    DialogueBuilder, DialogueConfig, DialogueStep, TimeoutPolicy, mark_privileged_step,
};
use crate::error::{ConfigError, Result};
use crate::transport::config::{AuthMethod, HostKeyVerification, SshConfig};

/// Where Gaia keeps backups created with `add backup local`.
pub const DEFAULT_REMOTE_DIR: &str = "/var/log/CPbackup/backups";

/// Narrowest terminal that does not wrap 76-column `base64` output.
const MIN_TERMINAL_WIDTH: u32 = 80;

/// Builder for constructing a [`Fetcher`].
///
/// # Example
///
/// ```rust,no_run
/// use cpfetch::FetchBuilder;
///
/// # async fn example() -> Result<(), cpfetch::Error> {
/// let fetcher = FetchBuilder::new("192.168.1.1")
///     .username("admin")
///     .password("secret")
///     .expert_password("expert-secret")
///     .backup_file("backup_gw1_10_Oct_2024.tgz")
///     .output("gw1.tgz")
///     .build()?;
///
/// let report = fetcher.run(|_| {}).await?;
/// println!("{}", report);
/// # Ok(())
/// # }
/// ```
pub struct FetchBuilder {
    host: String,
    port: u16,
    username: Option<String>,
    auth: Option<AuthMethod>,
    expert_password: Option<SecretString>,
    steps: Option<Vec<DialogueStep>>,
    remote_dir: String,
    backup_file: Option<String>,
    output: Option<PathBuf>,
    timeout: Duration,
    read_timeout: Duration,
    terminal_width: u32,
    terminal_height: u32,
    host_key_verification: HostKeyVerification,
    known_hosts_path: Option<PathBuf>,
    dialogue: DialogueConfig,
    collector: CollectorConfig,
}

impl FetchBuilder {
    /// Create a new fetch builder for the specified host.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            username: None,
            auth: None,
            expert_password: None,
            steps: None,
            remote_dir: DEFAULT_REMOTE_DIR.to_string(),
            backup_file: None,
            output: None,
            timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(300),
            terminal_width: 200,
            terminal_height: 50,
            host_key_verification: HostKeyVerification::default(),
            known_hosts_path: None,
            dialogue: DialogueConfig::default(),
            collector: CollectorConfig::default(),
        }
    }

    /// Set the SSH port (default: 22).
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the username for authentication.
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Set password authentication.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.auth = Some(AuthMethod::Password(SecretString::from(password.into())));
        self
    }

    /// Set private key authentication.
    pub fn private_key(mut self, key_path: impl Into<PathBuf>) -> Self {
        self.auth = Some(AuthMethod::PrivateKey {
            path: key_path.into(),
            passphrase: None,
        });
        self
    }

    /// Set private key authentication with passphrase.
    pub fn private_key_with_passphrase(
        mut self,
        key_path: impl Into<PathBuf>,
        passphrase: impl Into<String>,
    ) -> Self {
        self.auth = Some(AuthMethod::PrivateKey {
            path: key_path.into(),
            passphrase: Some(SecretString::from(passphrase.into())),
        });
        self
    }

    /// Set the password for the privileged (expert) shell.
    pub fn expert_password(mut self, password: impl Into<String>) -> Self {
        self.expert_password = Some(SecretString::from(password.into()));
        self
    }

    /// Replace the expert-mode dialogue with custom steps. If no step is
    /// marked as entering the privileged shell, the last one is.
    pub fn dialogue_steps(mut self, mut steps: Vec<DialogueStep>) -> Self {
        mark_privileged_step(&mut steps);
        self.steps = Some(steps);
        self
    }

    /// Set the remote directory holding the backup.
    pub fn remote_dir(mut self, dir: impl Into<String>) -> Self {
        self.remote_dir = dir.into();
        self
    }

    /// Set the name of the backup file inside the remote directory.
    pub fn backup_file(mut self, name: impl Into<String>) -> Self {
        self.backup_file = Some(name.into());
        self
    }

    /// Set the local destination.
    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }

    /// Set the connection timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the upper bound for a single channel read.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set terminal dimensions.
    pub fn terminal_size(mut self, width: u32, height: u32) -> Self {
        self.terminal_width = width;
        self.terminal_height = height;
        self
    }

    /// Set the host key verification mode.
    pub fn host_key_verification(mut self, mode: HostKeyVerification) -> Self {
        self.host_key_verification = mode;
        self
    }

    /// Use a specific known_hosts file.
    pub fn known_hosts_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts_path = Some(path.into());
        self
    }

    /// Set what happens when a dialogue step times out.
    pub fn timeout_policy(mut self, policy: TimeoutPolicy) -> Self {
        self.dialogue.policy = policy;
        self
    }

    /// Set the delay between polls, for both the dialogue and the stream.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.dialogue.poll_interval = interval;
        self.collector.poll_interval = interval;
        self
    }

    /// Set how many consecutive empty polls end the transfer.
    pub fn max_idle_polls(mut self, polls: u32) -> Self {
        self.collector.max_idle_polls = polls;
        self
    }

    /// Set the largest single read while streaming.
    pub fn chunk_size(mut self, bytes: usize) -> Self {
        self.collector.chunk_size = bytes;
        self
    }

    /// Report progress every `chunks` chunks (0 disables it).
    pub fn progress_every(mut self, chunks: u64) -> Self {
        self.collector.progress_every = chunks;
        self
    }

    /// Validate the settings and build the fetcher.
    ///
    /// This does not connect; call [`Fetcher::run`] for that.
    pub fn build(self) -> Result<Fetcher> {
        let username = self.username.ok_or_else(|| invalid("Username is required"))?;
        let auth = self
            .auth
            .ok_or_else(|| invalid("A password or private key is required"))?;

        let steps = match (self.steps, self.expert_password) {
            (Some(steps), _) => steps,
            (None, Some(password)) => DialogueBuilder::expert_mode(password),
            (None, None) => return Err(invalid("Expert password is required")),
        };

        let backup_file = self
            .backup_file
            .ok_or_else(|| invalid("Backup file name is required"))?;
        validate_file_name(&backup_file)?;

        let output_path = self
            .output
            .ok_or_else(|| invalid("Output path is required"))?;

        if self.remote_dir.trim().is_empty() || self.remote_dir.chars().any(char::is_whitespace) {
            return Err(invalid(format!("Invalid remote directory '{}'", self.remote_dir)));
        }
        if self.collector.chunk_size == 0 {
            return Err(invalid("Chunk size must be greater than zero"));
        }
        if self.collector.max_idle_polls == 0 {
            return Err(invalid("Idle poll count must be greater than zero"));
        }
        if self.terminal_width < MIN_TERMINAL_WIDTH {
            return Err(invalid(format!(
                "Terminal width {} would wrap base64 lines (minimum {})",
                self.terminal_width, MIN_TERMINAL_WIDTH
            )));
        }

        let ssh = SshConfig {
            host: self.host,
            port: self.port,
            username,
            auth,
            timeout: self.timeout,
            read_timeout: self.read_timeout,
            terminal_width: self.terminal_width,
            terminal_height: self.terminal_height,
            host_key_verification: self.host_key_verification,
            known_hosts_path: self.known_hosts_path,
        };

        let job = FetchJob {
            steps,
            remote_dir: self.remote_dir.trim_end_matches('/').to_string(),
            backup_file,
            output_path,
            dialogue: self.dialogue,
            collector: self.collector,
        };

        Ok(Fetcher::new(ssh, job))
    }
}

/// The file name ends up in a remote shell command line, so only allow
/// characters that cannot change its meaning.
fn validate_file_name(name: &str) -> Result<()> {
    let allowed = |c: char| c.is_ascii_alphanumeric() || "._-+:@,".contains(c);

    if name.is_empty() || name == "." || name == ".." || !name.chars().all(allowed) {
        return Err(invalid(format!("Invalid backup file name '{}'", name)));
    }
    Ok(())
}

fn invalid(message: impl Into<String>) -> crate::Error {
    ConfigError::Invalid {
        message: message.into(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn builder() -> FetchBuilder {
        FetchBuilder::new("gw1")
            .username("admin")
            .password("pw")
            .expert_password("expw")
            .backup_file("backup_gw1_10_Oct_2024_12_00.tgz")
            .output("out.tgz")
    }

    fn message(result: Result<Fetcher>) -> String {
        match result {
            Err(Error::Config(ConfigError::Invalid { message })) => message,
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("expected a config error"),
        }
    }

    #[test]
    fn test_build_defaults() {
        let fetcher = builder().build().unwrap();
        assert_eq!(fetcher.ssh().port, 22);
        assert_eq!(fetcher.ssh().terminal_width, 200);
        assert_eq!(
            fetcher.job().remote_path(),
            "/var/log/CPbackup/backups/backup_gw1_10_Oct_2024_12_00.tgz"
        );
        assert_eq!(fetcher.job().steps.len(), 3);
        assert_eq!(fetcher.job().collector.max_idle_polls, 60);
    }

    #[test]
    fn test_remote_dir_trailing_slash() {
        let fetcher = builder().remote_dir("/home/admin/").build().unwrap();
        assert_eq!(
            fetcher.job().remote_path(),
            "/home/admin/backup_gw1_10_Oct_2024_12_00.tgz"
        );
    }

    #[test]
    fn test_missing_fields() {
        assert!(message(FetchBuilder::new("gw1").build()).contains("Username"));
        assert!(message(FetchBuilder::new("gw1").username("a").build()).contains("password or private key"));
        assert!(
            message(FetchBuilder::new("gw1").username("a").password("b").build())
                .contains("Expert password")
        );
    }

    #[test]
    fn test_rejects_unsafe_file_names() {
        for name in ["", "..", "a b.tgz", "x;rm -rf /", "../etc/shadow", "$(id)"] {
            let msg = message(builder().backup_file(name).build());
            assert!(msg.contains("Invalid backup file name"), "{name}: {msg}");
        }
    }

    #[test]
    fn test_rejects_bad_tuning() {
        assert!(message(builder().chunk_size(0).build()).contains("Chunk size"));
        assert!(message(builder().max_idle_polls(0).build()).contains("Idle poll"));
        assert!(message(builder().terminal_size(60, 24).build()).contains("Terminal width"));
        assert!(message(builder().remote_dir("/a b").build()).contains("remote directory"));
    }

    #[test]
    fn test_custom_steps_replace_expert_dialogue() {
        let steps = DialogueBuilder::new().send("sudo -i").expect("#").build();
        let fetcher = FetchBuilder::new("gw1")
            .username("admin")
            .private_key("/tmp/id_ed25519")
            .dialogue_steps(steps)
            .backup_file("a.tgz")
            .output("a.tgz")
            .build()
            .unwrap();
        assert_eq!(fetcher.job().steps.len(), 1);
        assert!(fetcher.job().steps[0].privileged);
    }

    #[test]
    fn test_hand_built_steps_get_privileged_marker() {
        let steps = vec![
            DialogueStep::wait("banner", Duration::from_secs(1)),
            DialogueStep::new("sudo -i", "#"),
        ];
        let fetcher = builder().dialogue_steps(steps).build().unwrap();
        let steps = &fetcher.job().steps;
        assert!(!steps[0].privileged);
        assert!(steps[1].privileged);
    }

    #[test]
    fn test_poll_interval_applies_to_both_stages() {
        let fetcher = builder()
            .poll_interval(Duration::from_millis(100))
            .build()
            .unwrap();
        assert_eq!(fetcher.job().dialogue.poll_interval, Duration::from_millis(100));
        assert_eq!(fetcher.job().collector.poll_interval, Duration::from_millis(100));
    }
}
