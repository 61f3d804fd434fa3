//! # cpfetch
//!
//! Pull a file out of a remote appliance through nothing but its
//! interactive shell.
//!
//! Some appliances (Check Point Gaia among them) offer SSH but no usable
//! file transfer. cpfetch logs in, walks the shell into its privileged
//! "expert" mode, runs `base64` on the file and recovers the binary from
//! the streamed text, ignoring prompts, echoes and control sequences.
//!
//! ## Pipeline
//!
//! 1. [`transport`]: russh connection and PTY shell behind the
//!    [`Channel`](transport::Channel) trait
//! 2. [`dialogue`]: best-effort send/expect state machine
//! 3. [`collector`]: reads until the channel has been idle long enough
//! 4. [`payload`]: keeps base64-shaped lines, decodes them, writes the file
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cpfetch::{FetchBuilder, FetchEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), cpfetch::Error> {
//!     let report = FetchBuilder::new("192.168.1.1")
//!         .username("admin")
//!         .password("secret")
//!         .expert_password("expert-secret")
//!         .backup_file("backup_gw1_10_Oct_2024.tgz")
//!         .output("gw1.tgz")
//!         .build()?
//!         .run(|event| {
//!             if let FetchEvent::Receiving(state) = event {
//!                 println!("{:.1} MB", state.megabytes());
//!             }
//!         })
//!         .await?;
//!
//!     println!("{}", report);
//!     Ok(())
//! }
//! ```

pub mod collector;
pub mod dialogue;
pub mod error;
pub mod fetch;
pub mod payload;
pub mod session;
pub mod transport;

// Re-export main types for convenience
pub use collector::{CollectorConfig, StreamState};
pub use dialogue::{DialogueBuilder, DialogueConfig, DialogueState, TimeoutPolicy};
pub use error::Error;
pub use fetch::{FetchBuilder, FetchEvent, FetchJob, FetchReport, Fetcher};
pub use session::Session;
pub use transport::{AuthMethod, Channel, HostKeyVerification, SshConfig};
