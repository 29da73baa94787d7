//! Structured record of non-fatal conditions
//!
//! Backup, persistence and restore problems never abort a batch, but they are not
//! discarded either: each one is logged through `tracing` and kept in the session's
//! [`EventLog`] so the CLI can summarize them and tests can assert on them.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Which durable store an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Manifest,
    Cache,
}

impl StoreKind {
    pub fn label(&self) -> &'static str {
        match self {
            StoreKind::Manifest => "manifest",
            StoreKind::Cache => "cache",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A store file existed but could not be read or parsed; empty state was used.
    StoreCorrupt {
        store: StoreKind,
        path: PathBuf,
        reason: String,
        moved_to: Option<PathBuf>,
    },
    /// Writing a store file failed; the next checkpoint retries.
    PersistFailed {
        store: StoreKind,
        path: PathBuf,
        reason: String,
    },
    /// The unconditional `<file>.bak` copy could not be written.
    SiblingBackupFailed { path: PathBuf, reason: String },
    /// A file outside the repo root was backed up under its bare file name.
    RelativePathFallback { path: PathBuf, backup: PathBuf },
    /// Two originals map to the same vault slot within one run.
    BackupCollision {
        path: PathBuf,
        backup: PathBuf,
        existing_original: PathBuf,
    },
    /// A generation attempt failed and will be retried after `delay`.
    GenerationRetry {
        path: PathBuf,
        attempt: u32,
        delay: Duration,
        reason: String,
    },
    /// Undo found a record whose backup no longer exists.
    BackupMissing { original: PathBuf, backup: PathBuf },
    /// Undo could not copy an existing backup over its original.
    RestoreFailed {
        original: PathBuf,
        backup: PathBuf,
        reason: String,
    },
    /// Cache file removed on request before the batch.
    CacheInvalidated { path: PathBuf },
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::StoreCorrupt {
                store,
                path,
                reason,
                moved_to,
            } => {
                write!(f, "{} at {} unreadable ({})", store.label(), path.display(), reason)?;
                if let Some(moved) = moved_to {
                    write!(f, "; kept as {}", moved.display())?;
                }
                write!(f, "; starting empty")
            }
            Event::PersistFailed {
                store,
                path,
                reason,
            } => write!(
                f,
                "failed to save {} to {}: {}",
                store.label(),
                path.display(),
                reason
            ),
            Event::SiblingBackupFailed { path, reason } => {
                write!(f, "could not write .bak for {}: {}", path.display(), reason)
            }
            Event::RelativePathFallback { path, backup } => write!(
                f,
                "{} is outside the repo root; backed up by file name as {}",
                path.display(),
                backup.display()
            ),
            Event::BackupCollision {
                path,
                backup,
                existing_original,
            } => write!(
                f,
                "backup slot {} already holds {}; refusing to overwrite it for {}",
                backup.display(),
                existing_original.display(),
                path.display()
            ),
            Event::GenerationRetry {
                path,
                attempt,
                delay,
                reason,
            } => write!(
                f,
                "generation for {} failed on attempt {} ({}); retrying in {:.1}s",
                path.display(),
                attempt,
                reason,
                delay.as_secs_f64()
            ),
            Event::BackupMissing { original, backup } => write!(
                f,
                "backup {} for {} is missing",
                backup.display(),
                original.display()
            ),
            Event::RestoreFailed {
                original,
                backup,
                reason,
            } => write!(
                f,
                "failed to restore {} from {}: {}",
                original.display(),
                backup.display(),
                reason
            ),
            Event::CacheInvalidated { path } => {
                write!(f, "memory invalidated: removed {}", path.display())
            }
        }
    }
}

/// Append-only list of events for one invocation.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Vec<Event>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: Event) {
        match &event {
            Event::GenerationRetry { .. } | Event::CacheInvalidated { .. } => {
                tracing::debug!("{}", event)
            }
            _ => tracing::warn!("{}", event),
        }
        self.events.push(event);
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_keeps_order() {
        let mut log = EventLog::new();
        log.push(Event::CacheInvalidated {
            path: PathBuf::from("memory.json"),
        });
        log.push(Event::SiblingBackupFailed {
            path: PathBuf::from("a.py"),
            reason: "denied".to_string(),
        });
        assert_eq!(log.len(), 2);
        assert!(matches!(log.events()[0], Event::CacheInvalidated { .. }));
        assert!(matches!(log.events()[1], Event::SiblingBackupFailed { .. }));
    }

    #[test]
    fn store_corrupt_message_mentions_preserved_copy() {
        let event = Event::StoreCorrupt {
            store: StoreKind::Manifest,
            path: PathBuf::from("manifest.json"),
            reason: "expected value".to_string(),
            moved_to: Some(PathBuf::from("manifest.json.corrupt")),
        };
        let text = event.to_string();
        assert!(text.contains("manifest.json.corrupt"));
        assert!(text.contains("starting empty"));
    }
}
