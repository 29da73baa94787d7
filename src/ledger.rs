//! Run ledger
//!
//! Durable manifest of edit runs. Each run owns an ordered list of
//! (original path → vault backup path) records, which is what `--undo-run` replays.
//! The manifest is append-mostly: runs are registered once and only the active run
//! ever gains records.

use crate::content::copy_preserving;
use crate::error::{LedgerError, StoreError};
use crate::events::{Event, EventLog, StoreKind};
use crate::store::{self, StatePaths};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// One file preserved within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub original_path: PathBuf,
    pub backup_path: PathBuf,
}

/// One edit session: a single instruction applied to a set of files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub instruction: String,
    #[serde(default)]
    pub entries: Vec<BackupRecord>,
}

/// On-disk manifest layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Root the most recent run relativized backups against
    #[serde(default)]
    pub repo_root: Option<PathBuf>,
    /// Instruction of the most recent run
    #[serde(default)]
    pub instruction: Option<String>,
    #[serde(default)]
    pub runs: BTreeMap<String, Run>,
}

/// Row of `--list-runs` output.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub instruction: String,
    pub file_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UndoReport {
    pub restored: usize,
    pub total: usize,
}

pub struct Ledger {
    paths: StatePaths,
    manifest: Manifest,
}

impl Ledger {
    /// Load the manifest, falling back to an empty one if it is missing or corrupt.
    pub fn load(paths: &StatePaths, events: &mut EventLog) -> Self {
        let manifest = store::load_json(&paths.manifest, StoreKind::Manifest, events);
        Self {
            paths: paths.clone(),
            manifest,
        }
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Register a fresh, empty run and stamp the convenience fields.
    pub fn start_run(&mut self, instruction: &str, repo_root: &Path) -> Result<String, LedgerError> {
        store::ensure_state_dir(&self.paths).map_err(|source| LedgerError::VaultRoot {
            path: self.paths.state_dir.clone(),
            source,
        })?;
        fs::create_dir_all(&self.paths.vault_dir).map_err(|source| LedgerError::VaultRoot {
            path: self.paths.vault_dir.clone(),
            source,
        })?;

        let now = Utc::now();
        let mut id = new_run_id(now);
        while self.manifest.runs.contains_key(&id) {
            id = new_run_id(now);
        }

        self.manifest.repo_root = Some(repo_root.to_path_buf());
        self.manifest.instruction = Some(instruction.to_string());
        self.manifest.runs.insert(
            id.clone(),
            Run {
                timestamp: now,
                instruction: instruction.to_string(),
                entries: Vec::new(),
            },
        );
        tracing::debug!("started run {}", id);
        Ok(id)
    }

    /// Append a record to `run_id`. Without an active run this is a no-op.
    pub fn record_backup(&mut self, run_id: Option<&str>, original: &Path, backup: &Path) {
        let Some(run_id) = run_id else {
            return;
        };
        match self.manifest.runs.get_mut(run_id) {
            Some(run) => run.entries.push(BackupRecord {
                original_path: original.to_path_buf(),
                backup_path: backup.to_path_buf(),
            }),
            None => tracing::warn!("record for unknown run {} dropped", run_id),
        }
    }

    /// Original already backed up at `backup` within `run_id`, if any.
    pub fn backup_owner(&self, run_id: &str, backup: &Path) -> Option<&Path> {
        self.manifest
            .runs
            .get(run_id)?
            .entries
            .iter()
            .find(|record| record.backup_path == backup)
            .map(|record| record.original_path.as_path())
    }

    /// Write the whole manifest, every run included.
    pub fn persist(&self) -> Result<(), StoreError> {
        store::save_json(&self.paths, &self.paths.manifest, &self.manifest, true)
    }

    pub fn run(&self, run_id: &str) -> Option<&Run> {
        self.manifest.runs.get(run_id)
    }

    /// Runs ordered by creation time, oldest first.
    pub fn list_runs(&self) -> Vec<RunSummary> {
        let mut runs: Vec<RunSummary> = self
            .manifest
            .runs
            .iter()
            .map(|(id, run)| RunSummary {
                id: id.clone(),
                timestamp: run.timestamp,
                instruction: run.instruction.clone(),
                file_count: run.entries.len(),
            })
            .collect();
        runs.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        runs
    }

    /// Copy every surviving backup of `run_id` back over its original.
    ///
    /// Missing backups and failed copies are counted in `total` only; the remaining
    /// records are still attempted.
    pub fn undo_run(&self, run_id: &str, events: &mut EventLog) -> Result<UndoReport, LedgerError> {
        let run = self
            .manifest
            .runs
            .get(run_id)
            .ok_or_else(|| LedgerError::UnknownRun(run_id.to_string()))?;

        let mut report = UndoReport {
            restored: 0,
            total: 0,
        };
        for record in &run.entries {
            report.total += 1;
            if !record.backup_path.is_file() {
                events.push(Event::BackupMissing {
                    original: record.original_path.clone(),
                    backup: record.backup_path.clone(),
                });
                continue;
            }
            if let Some(parent) = record.original_path.parent() {
                let _ = fs::create_dir_all(parent);
            }
            match copy_preserving(&record.backup_path, &record.original_path) {
                Ok(_) => {
                    tracing::debug!("restored {}", record.original_path.display());
                    report.restored += 1;
                }
                Err(err) => events.push(Event::RestoreFailed {
                    original: record.original_path.clone(),
                    backup: record.backup_path.clone(),
                    reason: err.to_string(),
                }),
            }
        }
        Ok(report)
    }
}

/// `YYYYMMDD-HHMMSS-xxxxxx`: sortable by time, random suffix against same-second runs.
fn new_run_id(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", now.format("%Y%m%d-%H%M%S"), &suffix[..6])
}
