//! Domain error taxonomy for the orchestrator.
//!
//! Component code returns [`Error`] so the orchestrator can match on
//! category; `anyhow::Error` is still used at the binary boundary and for
//! ad hoc `.context(...)` chains within a component.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("checksum mismatch for {keyspace}/{service}/{file}: stored {stored}, current {current}")]
    ChecksumMismatch {
        keyspace: String,
        service: String,
        file: String,
        stored: String,
        current: String,
    },

    #[error("failed migration found at {keyspace}/{service}/{file}, manual intervention required")]
    FailedMigrationExists {
        keyspace: String,
        service: String,
        file: String,
    },

    #[error("round failed: {0} migration(s) failed in this round")]
    RoundFailed(usize),

    #[error("bootstrap failed for keyspace {keyspace}: {source}")]
    BootstrapFailed {
        keyspace: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to read script at {path}")]
    ScriptRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("database driver error")]
    Driver(#[from] anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
