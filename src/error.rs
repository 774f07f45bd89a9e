//! Error taxonomy for provisioning runs.
//!
//! Every failure is fatal to the run: nothing is retried, and all of these
//! unwind to the `Session` drop so cleanup always completes before the
//! process exits.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProvisionError {
    /// A required boot artifact is missing. The VM was never started.
    #[error("missing {what}: {path}")]
    MissingArtifact { what: &'static str, path: PathBuf },

    /// The VM process could not be started or configured.
    #[error("failed to launch VM: {reason}")]
    Launch {
        reason: String,
        #[source]
        source: Option<io::Error>,
    },

    /// An await saw no console byte within its deadline.
    ///
    /// The deadline bounds the wait for the next byte, so this means the
    /// guest stopped producing output entirely - either it hung, or its
    /// error trap powered it off without the console closing yet. The
    /// mirrored console output is the only diagnostic; the tail is
    /// repeated here for convenience.
    #[error("timed out after {seconds}s of console silence waiting for {pattern:?}\nlast console output:\n{tail}")]
    Timeout {
        pattern: String,
        seconds: u64,
        tail: String,
    },

    /// The console stream ended while awaiting a pattern.
    ///
    /// This is what a guest-side failure looks like from the host: the
    /// remote error trap powers the machine off and the serial pipe closes.
    #[error("console closed while waiting for {pattern:?}\nlast console output:\n{tail}")]
    ConsoleClosed { pattern: String, tail: String },

    /// The artifact tree could not be copied into the output directory.
    #[error("artifact copy failed at {path}")]
    ArtifactCopy {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The run configuration could not be read or parsed.
    #[error("invalid config {path}: {message}")]
    Config { path: PathBuf, message: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, ProvisionError>;
