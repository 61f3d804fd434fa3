//! Summary of a completed fetch.

use std::path::PathBuf;
use std::time::Duration;

/// Result of a successful fetch.
#[derive(Debug, Clone)]
pub struct FetchReport {
    /// Remote file that was dumped.
    pub remote_path: String,

    /// Local file that was written.
    pub output_path: PathBuf,

    /// Raw bytes received while streaming.
    pub raw_bytes: u64,

    /// Lines accepted as base64 payload.
    pub candidate_lines: usize,

    /// Length of the concatenated base64 text.
    pub encoded_len: usize,

    /// Decoded bytes written to `output_path`.
    pub bytes_written: u64,

    /// Dialogue steps that timed out but were tolerated.
    pub dialogue_timeouts: usize,

    /// Wall time from connect to file written.
    pub elapsed: Duration,
}

impl FetchReport {
    /// Written size in mebibytes.
    pub fn megabytes_written(&self) -> f64 {
        self.bytes_written as f64 / (1024.0 * 1024.0)
    }
}

impl std::fmt::Display for FetchReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Successfully downloaded {:.1} MB to {}",
            self.megabytes_written(),
            self.output_path.display()
        )
    }
}
