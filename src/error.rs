//! Errors that abort a discovery cycle

use std::process::ExitStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    Enumeration {
        program: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("probe task failed: {0}")]
    ProbeTask(#[from] tokio::task::JoinError),
}
