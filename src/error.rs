//! Error types
//!
//! Per-file failures ([`FileError`]) are always local to one file: the orchestrator
//! reports them and moves on. Store and ledger errors surface to the session, which
//! turns the non-fatal ones into [`crate::events::Event`]s.

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure of the external text generator.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("generation timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("generator exited unsuccessfully: {0}")]
    ProcessFailure(String),
    #[error("could not start generator: {0}")]
    Spawn(String),
    #[error("generation cancelled")]
    Cancelled,
}

/// Which part of the apply step failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStage {
    /// Copying the original into the vault (or verifying the copy).
    Backup,
    /// Overwriting the original with new content.
    Overwrite,
}

impl WriteStage {
    pub fn label(&self) -> &'static str {
        match self {
            WriteStage::Backup => "backup",
            WriteStage::Overwrite => "write",
        }
    }
}

/// Per-file failure taxonomy.
#[derive(Debug, Error)]
pub enum FileError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("generation failed for {} after {attempts} attempt(s): {source}", path.display())]
    Generation {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: GenerateError,
    },
    #[error("{} failed for {}: {source}", stage.label(), path.display())]
    Write {
        path: PathBuf,
        stage: WriteStage,
        #[source]
        source: io::Error,
    },
    #[error(
        "backup slot {} already used by {} in this run",
        backup.display(),
        existing_original.display()
    )]
    BackupCollision {
        path: PathBuf,
        backup: PathBuf,
        existing_original: PathBuf,
    },
}

impl FileError {
    pub fn path(&self) -> &PathBuf {
        match self {
            FileError::Read { path, .. }
            | FileError::Generation { path, .. }
            | FileError::Write { path, .. }
            | FileError::BackupCollision { path, .. } => path,
        }
    }
}

/// Durable store (manifest or cache) could not be written.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to serialize {}: {source}", path.display())]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("timed out waiting for state lock ({0}s)")]
    LockTimeout(u64),
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("no run with id {0}")]
    UnknownRun(String),
    #[error("cannot create backup directory {}: {source}", path.display())]
    VaultRoot {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
