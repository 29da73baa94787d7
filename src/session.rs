//! Session state for one invocation
//!
//! Owns the ledger, the change cache, the active run id and the event log, and decides
//! when they reach disk. Every persistence failure becomes an [`Event`]; nothing here
//! aborts a batch.

use crate::cache::{self, CacheEntry, CacheKey, CachedResult, ChangeCache};
use crate::error::{LedgerError, StoreError};
use crate::events::{Event, EventLog, StoreKind};
use crate::ledger::Ledger;
use crate::store::StatePaths;
use crate::vault::Vault;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Load and save the change cache
    pub use_cache: bool,
    /// Delete the cache file before loading it
    pub invalidate_cache: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            invalidate_cache: false,
        }
    }
}

/// What a closed session leaves behind.
#[derive(Debug)]
pub struct SessionSummary {
    pub run_id: Option<String>,
    pub records: usize,
    pub events: EventLog,
}

pub struct Session {
    paths: StatePaths,
    repo_root: PathBuf,
    ledger: Ledger,
    vault: Vault,
    cache: Option<ChangeCache>,
    active_run: Option<String>,
    events: EventLog,
    ledger_dirty: bool,
}

impl Session {
    /// Load ledger and cache for `repo_root`. Missing or corrupt stores start empty.
    pub fn open(repo_root: &Path, paths: StatePaths, options: SessionOptions) -> Self {
        let mut events = EventLog::new();
        let ledger = Ledger::load(&paths, &mut events);

        let cache = if options.use_cache {
            if options.invalidate_cache {
                if let Err(err) = cache::invalidate(&paths.cache, &mut events) {
                    events.push(Event::PersistFailed {
                        store: StoreKind::Cache,
                        path: paths.cache.clone(),
                        reason: format!("could not remove cache: {}", err),
                    });
                }
            }
            let cache = ChangeCache::load(&paths.cache, &mut events);
            tracing::debug!("loaded {} cache entries from {}", cache.len(), paths.cache.display());
            Some(cache)
        } else {
            None
        };

        Self {
            vault: Vault::new(paths.vault_dir.clone()),
            repo_root: repo_root.to_path_buf(),
            paths,
            ledger,
            cache,
            active_run: None,
            events,
            ledger_dirty: false,
        }
    }

    /// Start the run every backup of this session is recorded under.
    pub fn begin_run(&mut self, instruction: &str) -> Result<&str, LedgerError> {
        let id = self.ledger.start_run(instruction, &self.repo_root)?;
        self.ledger_dirty = true;
        Ok(self.active_run.insert(id).as_str())
    }

    pub fn active_run(&self) -> Option<&str> {
        self.active_run.as_deref()
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn paths(&self) -> &StatePaths {
        &self.paths
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn push_event(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn cache_enabled(&self) -> bool {
        self.cache.is_some()
    }

    pub fn cache_get(&self, key: &CacheKey) -> Option<&CacheEntry> {
        self.cache.as_ref()?.get(key)
    }

    pub fn cache_put(&mut self, key: &CacheKey, result: CachedResult) {
        if let Some(cache) = self.cache.as_mut() {
            cache.put(key, result);
        }
    }

    /// Original already holding `backup` in the active run.
    pub fn backup_owner(&self, backup: &Path) -> Option<&Path> {
        let run_id = self.active_run.as_deref()?;
        self.ledger.backup_owner(run_id, backup)
    }

    pub fn record_backup(&mut self, original: &Path, backup: &Path) {
        if self.active_run.is_none() {
            return;
        }
        self.ledger
            .record_backup(self.active_run.as_deref(), original, backup);
        self.ledger_dirty = true;
    }

    /// Write whatever changed since the last checkpoint.
    pub fn checkpoint(&mut self) {
        if self.ledger_dirty {
            match self.ledger.persist() {
                Ok(()) => self.ledger_dirty = false,
                Err(err) => self.persist_failed(StoreKind::Manifest, &err),
            }
        }

        let cache_path = self.paths.cache.clone();
        let result = match self.cache.as_mut() {
            Some(cache) if cache.is_dirty() => cache.save(&self.paths, &cache_path),
            _ => Ok(()),
        };
        if let Err(err) = result {
            self.persist_failed(StoreKind::Cache, &err);
        }
    }

    fn persist_failed(&mut self, store: StoreKind, err: &StoreError) {
        let path = match store {
            StoreKind::Manifest => self.paths.manifest.clone(),
            StoreKind::Cache => self.paths.cache.clone(),
        };
        self.events.push(Event::PersistFailed {
            store,
            path,
            reason: err.to_string(),
        });
    }

    /// Final checkpoint; hands back the event log.
    pub fn close(mut self) -> SessionSummary {
        self.checkpoint();
        let records = self
            .active_run
            .as_deref()
            .and_then(|id| self.ledger.run(id))
            .map(|run| run.entries.len())
            .unwrap_or(0);
        SessionSummary {
            run_id: self.active_run,
            records,
            events: self.events,
        }
    }
}
