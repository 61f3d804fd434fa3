//! Error types for cpfetch.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Main error type for cpfetch operations.
#[derive(Error, Debug)]
pub enum Error {
    /// SSH transport-level errors (cannot establish the channel)
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Channel read/write errors
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Dialogue errors (only raised under a strict timeout policy)
    #[error("Dialogue error: {0}")]
    Dialogue(#[from] DialogueError),

    /// Payload extraction, decoding and persistence errors
    #[error("Payload error: {0}")]
    Payload(#[from] PayloadError),

    /// Invalid configuration
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Transport layer errors (SSH connection, authentication).
#[derive(Error, Debug)]
pub enum TransportError {
    /// Failed to connect to host
    #[error("Connection failed to {host}:{port}: {source}")]
    ConnectionFailed {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    /// SSH handshake or protocol error
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    /// Authentication failed
    #[error("Authentication failed for user '{user}'")]
    AuthenticationFailed { user: String },

    /// SSH key error
    #[error("SSH key error: {0}")]
    Key(String),

    /// Host is not present in known_hosts (strict verification)
    #[error("Host key for {host}:{port} is not known")]
    HostKeyUnknown { host: String, port: u16 },

    /// Host key differs from the known_hosts entry
    #[error("Host key for {host}:{port} changed (known_hosts line {line})")]
    HostKeyChanged { host: String, port: u16, line: usize },

    /// known_hosts could not be read or written
    #[error("known_hosts error: {0}")]
    KnownHosts(String),

    /// Operation timed out
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Channel layer errors.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// Failed to open PTY channel
    #[error("Failed to open PTY channel: {0}")]
    PtyOpenFailed(russh::Error),

    /// Channel closed by the remote side while data was expected
    #[error("Channel closed")]
    Closed,

    /// SSH protocol error on the channel
    #[error("Channel SSH error: {0}")]
    Ssh(russh::Error),

    /// Read failed for a reason outside the SSH protocol
    #[error("Read failed: {0}")]
    ReadFailed(String),
}

/// Dialogue errors.
#[derive(Error, Debug)]
pub enum DialogueError {
    /// Expected output never appeared within the step's wait budget
    #[error("Step '{step}' did not see {expected:?} within {waited:?}")]
    Timeout {
        step: String,
        expected: String,
        waited: Duration,
    },
}

/// Payload errors.
#[derive(Error, Debug)]
pub enum PayloadError {
    /// Streaming finished but no line looked like base64
    #[error("No base64 data found in output ({raw_len} bytes received)")]
    NoPayloadFound { raw_len: usize, sample: String },

    /// Concatenated candidate lines are not valid base64
    #[error("Failed to decode base64: {source}")]
    Decode {
        #[source]
        source: base64::DecodeError,
        first_line: String,
        last_line: String,
    },

    /// Destination could not be written
    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid configuration in the fetch builder
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// Result type alias using cpfetch's Error.
pub type Result<T> = std::result::Result<T, Error>;
