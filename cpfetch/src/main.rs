//! `cpfetch` - download a backup from an expert-mode shell over SSH.
//!
//! ```bash
//! cpfetch <host> <username> <password> <expert_password> <backup_file> <output_file>
//! ```
//!
//! Set `RUST_LOG=debug` (or pass `-vv`) for a trace of the dialogue.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use cpfetch::error::PayloadError;
use cpfetch::fetch::DEFAULT_REMOTE_DIR;
use cpfetch::{Error, FetchBuilder, FetchEvent, FetchReport, HostKeyVerification, TimeoutPolicy};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum HostKeyMode {
    Strict,
    AcceptNew,
    Disabled,
}

impl From<HostKeyMode> for HostKeyVerification {
    fn from(mode: HostKeyMode) -> Self {
        match mode {
            HostKeyMode::Strict => HostKeyVerification::Strict,
            HostKeyMode::AcceptNew => HostKeyVerification::AcceptNew,
            HostKeyMode::Disabled => HostKeyVerification::Disabled,
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "cpfetch",
    about = "Download a backup through an expert-mode SSH shell",
    version,
    long_about = None
)]
struct Cli {
    /// Appliance hostname or IP address.
    host: String,

    /// SSH login user.
    username: String,

    /// SSH login password.
    password: String,

    /// Expert mode password.
    expert_password: String,

    /// Backup file name inside the remote directory.
    backup_file: String,

    /// Local file to write.
    output_file: PathBuf,

    /// SSH port.
    #[arg(long, default_value_t = 22)]
    port: u16,

    /// Log in with this private key instead of the password.
    #[arg(long)]
    identity: Option<PathBuf>,

    /// Passphrase for an encrypted private key.
    #[arg(long, requires = "identity")]
    identity_passphrase: Option<String>,

    /// Remote directory holding the backup.
    #[arg(long, default_value = DEFAULT_REMOTE_DIR)]
    remote_dir: String,

    /// Connection timeout in seconds.
    #[arg(long, default_value_t = 30)]
    connect_timeout: u64,

    /// Upper bound for a single read, in seconds.
    #[arg(long, default_value_t = 300)]
    read_timeout: u64,

    /// Delay between polls, in milliseconds.
    #[arg(long, default_value_t = 500)]
    poll_interval_ms: u64,

    /// Consecutive empty polls that mark the end of the transfer.
    #[arg(long, default_value_t = 60)]
    idle_polls: u32,

    /// Largest single read while streaming, in bytes.
    #[arg(long, default_value_t = 128 * 1024)]
    chunk_size: usize,

    /// Print a progress line every this many chunks (0 disables it).
    #[arg(long, default_value_t = 100)]
    progress_every: u64,

    /// Host key verification mode.
    #[arg(long, value_enum, default_value_t = HostKeyMode::AcceptNew)]
    host_key: HostKeyMode,

    /// known_hosts file to check against (default: ~/.ssh/known_hosts).
    #[arg(long)]
    known_hosts: Option<PathBuf>,

    /// Abort if a dialogue prompt does not show up in time.
    #[arg(long)]
    strict_dialogue: bool,

    /// More log output (repeatable).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn into_builder(self) -> FetchBuilder {
        let mut builder = FetchBuilder::new(self.host)
            .port(self.port)
            .username(self.username)
            .expert_password(self.expert_password)
            .remote_dir(self.remote_dir)
            .backup_file(self.backup_file)
            .output(self.output_file)
            .timeout(Duration::from_secs(self.connect_timeout))
            .read_timeout(Duration::from_secs(self.read_timeout))
            .poll_interval(Duration::from_millis(self.poll_interval_ms))
            .max_idle_polls(self.idle_polls)
            .chunk_size(self.chunk_size)
            .progress_every(self.progress_every)
            .host_key_verification(self.host_key.into());

        builder = match (self.identity, self.identity_passphrase) {
            (Some(key), Some(passphrase)) => builder.private_key_with_passphrase(key, passphrase),
            (Some(key), None) => builder.private_key(key),
            (None, _) => builder.password(self.password),
        };

        if let Some(path) = self.known_hosts {
            builder = builder.known_hosts_path(path);
        }
        if self.strict_dialogue {
            builder = builder.timeout_policy(TimeoutPolicy::Strict);
        }
        builder
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    println!("Connecting to {}...", cli.host);

    match run(cli).await {
        Ok(report) => {
            println!("Found {} base64 lines", report.candidate_lines);
            println!("{} in {:.0?}", report, report.elapsed);
            ExitCode::SUCCESS
        }
        Err(e) => {
            report_error(&e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<FetchReport, Error> {
    let fetcher = cli.into_builder().build()?;

    println!(
        "Collecting base64 output of {} (large backups can take several minutes)...",
        fetcher.job().remote_path()
    );

    fetcher
        .run(|event| match event {
            FetchEvent::Receiving(state) => {
                println!("  Received {:.1} MB so far...", state.megabytes())
            }
            FetchEvent::Collected(state) => {
                println!("Received {:.1} MB of output", state.megabytes())
            }
        })
        .await
}

fn report_error(err: &Error) {
    match err {
        Error::Payload(PayloadError::NoPayloadFound { sample, .. }) => {
            eprintln!("No base64 data found in output");
            eprintln!("Output sample (first 2000 chars):");
            eprintln!("{}", sample);
        }
        Error::Payload(PayloadError::Decode {
            source,
            first_line,
            last_line,
        }) => {
            eprintln!("Failed to decode base64: {}", source);
            eprintln!("First base64 line: {}", first_line);
            eprintln!("Last base64 line: {}", last_line);
        }
        other => eprintln!("Error: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["cpfetch"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_positional_arguments() {
        let cli = parse(&["gw1", "admin", "pw", "expw", "b.tgz", "out.tgz"]);
        assert_eq!(cli.host, "gw1");
        assert_eq!(cli.expert_password, "expw");
        assert_eq!(cli.output_file, PathBuf::from("out.tgz"));
        assert_eq!(cli.remote_dir, DEFAULT_REMOTE_DIR);
        assert_eq!(cli.idle_polls, 60);
        assert_eq!(cli.progress_every, 100);
        assert_eq!(cli.host_key, HostKeyMode::AcceptNew);

        let fetcher = cli.into_builder().build().unwrap();
        assert_eq!(fetcher.job().remote_path(), "/var/log/CPbackup/backups/b.tgz");
    }

    #[test]
    fn test_missing_arguments_rejected() {
        let err = Cli::try_parse_from(["cpfetch", "gw1", "admin"]).unwrap_err();
        assert!(err.use_stderr());
    }

    #[test]
    fn test_tuning_flags() {
        let cli = parse(&[
            "gw1",
            "admin",
            "pw",
            "expw",
            "b.tgz",
            "out.tgz",
            "--idle-polls",
            "10",
            "--poll-interval-ms",
            "250",
            "--progress-every",
            "7",
            "--host-key",
            "strict",
            "--strict-dialogue",
            "-vv",
        ]);
        assert_eq!(cli.verbose, 2);
        assert!(cli.strict_dialogue);

        let fetcher = cli.into_builder().build().unwrap();
        let job = fetcher.job();
        assert_eq!(job.collector.max_idle_polls, 10);
        assert_eq!(job.collector.progress_every, 7);
        assert_eq!(job.collector.poll_interval, Duration::from_millis(250));
        assert_eq!(job.dialogue.policy, TimeoutPolicy::Strict);
        assert_eq!(fetcher.ssh().host_key_verification, HostKeyVerification::Strict);
    }

    #[test]
    fn test_passphrase_requires_identity() {
        let result = Cli::try_parse_from([
            "cpfetch",
            "gw1",
            "admin",
            "pw",
            "expw",
            "b.tgz",
            "out.tgz",
            "--identity-passphrase",
            "x",
        ]);
        assert!(result.is_err());
    }
}
