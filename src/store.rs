//! State directory for redline
//!
//! Everything durable lives under `<root>/.redline/`:
//!
//! ```text
//! .redline/
//!   backups/manifest.json          run ledger
//!   backups/<run-id>/...           backup vault
//!   memory.json                    change cache
//!   .lock                          held while a store file is rewritten
//! ```
//!
//! # Error Handling
//!
//! Loading is tolerant: a missing file yields the default value and a corrupt one
//! is moved aside to `<name>.corrupt` and reported as an event. Saving returns a
//! [`StoreError`]; the session downgrades it to an event so the batch continues.
//!
//! The lock only serialises individual rewrites. Two invocations against the same
//! state directory still race on their read-modify-write cycles.

use crate::error::StoreError;
use crate::events::{Event, EventLog, StoreKind};
use crate::util::write_atomic;
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

pub const STATE_DIR: &str = ".redline";
const VAULT_DIR: &str = "backups";
const MANIFEST_FILE: &str = "manifest.json";
const CACHE_FILE: &str = "memory.json";
const LOCK_FILE: &str = ".lock";
const LOCK_TIMEOUT_SECS: u64 = 5;
const LOCK_RETRY_MS: u64 = 50;

/// Resolved locations of every durable artifact for one repo root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePaths {
    pub state_dir: PathBuf,
    pub vault_dir: PathBuf,
    pub manifest: PathBuf,
    pub cache: PathBuf,
}

impl StatePaths {
    pub fn new(root: &Path) -> Self {
        let state_dir = root.join(STATE_DIR);
        let vault_dir = state_dir.join(VAULT_DIR);
        Self {
            manifest: vault_dir.join(MANIFEST_FILE),
            cache: state_dir.join(CACHE_FILE),
            vault_dir,
            state_dir,
        }
    }

    pub fn with_cache_file(mut self, cache: PathBuf) -> Self {
        self.cache = cache;
        self
    }
}

struct StateLock {
    file: fs::File,
}

impl Drop for StateLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Create the state directory and keep it out of version control.
pub fn ensure_state_dir(paths: &StatePaths) -> std::io::Result<()> {
    if !paths.state_dir.exists() {
        fs::create_dir_all(&paths.state_dir)?;
        ensure_ignored(&paths.state_dir)?;
    }
    Ok(())
}

fn ensure_ignored(state_dir: &Path) -> std::io::Result<()> {
    let Some(repo_root) = state_dir.parent() else {
        return Ok(());
    };
    let entry = format!("{}/", STATE_DIR);

    let gitignore_path = repo_root.join(".gitignore");
    if gitignore_path.exists() {
        return append_ignore_entry(&gitignore_path, &entry);
    }

    let git_dir = repo_root.join(".git");
    if git_dir.is_dir() {
        let info_exclude_path = git_dir.join("info").join("exclude");
        if let Some(parent) = info_exclude_path.parent() {
            if fs::create_dir_all(parent).is_ok()
                && append_ignore_entry(&info_exclude_path, &entry).is_ok()
            {
                return Ok(());
            }
        }
    }

    // Not a git checkout: nothing to keep clean.
    Ok(())
}

fn append_ignore_entry(path: &Path, entry: &str) -> std::io::Result<()> {
    let existing = fs::read_to_string(path).unwrap_or_default();
    if existing.lines().any(|line| line.trim() == entry) {
        return Ok(());
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    if !existing.is_empty() && !existing.ends_with('\n') {
        writeln!(file)?;
    }
    writeln!(file, "{}", entry)?;
    Ok(())
}

fn lock(paths: &StatePaths) -> Result<StateLock, StoreError> {
    let lock_path = paths.state_dir.join(LOCK_FILE);
    ensure_state_dir(paths).map_err(|source| StoreError::Io {
        path: paths.state_dir.clone(),
        source,
    })?;
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false) // Lock file content doesn't matter, just the lock
        .open(&lock_path)
        .map_err(|source| StoreError::Io {
            path: lock_path.clone(),
            source,
        })?;

    let start = Instant::now();
    loop {
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => break,
            Err(err) => {
                if err.kind() != ErrorKind::WouldBlock {
                    return Err(StoreError::Io {
                        path: lock_path,
                        source: err,
                    });
                }
                if start.elapsed() >= Duration::from_secs(LOCK_TIMEOUT_SECS) {
                    return Err(StoreError::LockTimeout(LOCK_TIMEOUT_SECS));
                }
                std::thread::sleep(Duration::from_millis(LOCK_RETRY_MS));
            }
        }
    }

    Ok(StateLock { file })
}

/// Load a JSON store, substituting `T::default()` when it is missing or corrupt.
pub fn load_json<T>(path: &Path, store: StoreKind, events: &mut EventLog) -> T
where
    T: DeserializeOwned + Default,
{
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == ErrorKind::NotFound => return T::default(),
        Err(err) => {
            // Moved aside so the next save cannot overwrite data we never read.
            let moved_to = preserve_corrupt(path, None);
            events.push(Event::StoreCorrupt {
                store,
                path: path.to_path_buf(),
                reason: err.to_string(),
                moved_to,
            });
            return T::default();
        }
    };

    match serde_json::from_str(&content) {
        Ok(value) => value,
        Err(err) => {
            let moved_to = preserve_corrupt(path, Some(&content));
            events.push(Event::StoreCorrupt {
                store,
                path: path.to_path_buf(),
                reason: err.to_string(),
                moved_to,
            });
            T::default()
        }
    }
}

/// Serialize `value` and atomically replace `path` while holding the state lock.
pub fn save_json<T: Serialize>(
    paths: &StatePaths,
    path: &Path,
    value: &T,
    pretty: bool,
) -> Result<(), StoreError> {
    let _lock = lock(paths)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| StoreError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let content = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .map_err(|source| StoreError::Serialize {
        path: path.to_path_buf(),
        source,
    })?;
    write_atomic(path, &content).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Move `path` to `<name>.corrupt`, or failing that write `content` there.
fn preserve_corrupt(path: &Path, content: Option<&str>) -> Option<PathBuf> {
    let mut name = path.file_name()?.to_os_string();
    name.push(".corrupt");
    let corrupt_path = path.with_file_name(name);
    let copied = || content.is_some_and(|c| fs::write(&corrupt_path, c).is_ok());
    if fs::rename(path, &corrupt_path).is_ok() || copied() {
        Some(corrupt_path)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Sample {
        values: BTreeMap<String, u32>,
    }

    #[test]
    fn state_paths_layout() {
        let paths = StatePaths::new(Path::new("/repo"));
        assert_eq!(paths.state_dir, Path::new("/repo/.redline"));
        assert_eq!(paths.vault_dir, Path::new("/repo/.redline/backups"));
        assert_eq!(paths.manifest, Path::new("/repo/.redline/backups/manifest.json"));
        assert_eq!(paths.cache, Path::new("/repo/.redline/memory.json"));
    }

    #[test]
    fn missing_store_loads_default_without_events() {
        let tmp = TempDir::new().unwrap();
        let mut events = EventLog::new();
        let loaded: Sample = load_json(&tmp.path().join("nope.json"), StoreKind::Cache, &mut events);
        assert_eq!(loaded, Sample::default());
        assert!(events.is_empty());
    }

    #[test]
    fn corrupt_store_is_moved_aside() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("memory.json");
        fs::write(&path, "{ not json").unwrap();

        let mut events = EventLog::new();
        let loaded: Sample = load_json(&path, StoreKind::Cache, &mut events);
        assert_eq!(loaded, Sample::default());
        assert_eq!(events.len(), 1);
        assert!(!path.exists());
        assert!(tmp.path().join("memory.json.corrupt").exists());
    }

    #[test]
    fn unreadable_store_is_moved_aside_untouched() {
        let tmp = TempDir::new().unwrap();
        let paths = StatePaths::new(tmp.path());
        fs::create_dir_all(&paths.vault_dir).unwrap();
        let bytes = b"{\"runs\": {\"r1\": \xff\xfe}}";
        fs::write(&paths.manifest, bytes).unwrap();

        let mut events = EventLog::new();
        let loaded: Sample = load_json(&paths.manifest, StoreKind::Manifest, &mut events);
        assert_eq!(loaded, Sample::default());

        let corrupt = paths.vault_dir.join("manifest.json.corrupt");
        match events.events() {
            [Event::StoreCorrupt { moved_to, .. }] => assert_eq!(moved_to.as_ref(), Some(&corrupt)),
            other => panic!("expected one StoreCorrupt event, got {:?}", other),
        }
        assert!(!paths.manifest.exists());
        assert_eq!(fs::read(&corrupt).unwrap(), bytes);

        save_json(&paths, &paths.manifest, &Sample::default(), true).unwrap();
        assert_eq!(fs::read(&corrupt).unwrap(), bytes);
    }

    #[test]
    fn save_then_load() {
        let tmp = TempDir::new().unwrap();
        let paths = StatePaths::new(tmp.path());
        let mut sample = Sample::default();
        sample.values.insert("a".to_string(), 1);

        save_json(&paths, &paths.cache, &sample, false).unwrap();

        let mut events = EventLog::new();
        let loaded: Sample = load_json(&paths.cache, StoreKind::Cache, &mut events);
        assert_eq!(loaded, sample);
        assert!(paths.state_dir.join(LOCK_FILE).exists());
    }

    #[test]
    fn state_dir_is_added_to_gitignore_once() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(".gitignore"), "target").unwrap();
        let paths = StatePaths::new(tmp.path());

        ensure_state_dir(&paths).unwrap();
        append_ignore_entry(&tmp.path().join(".gitignore"), ".redline/").unwrap();

        let content = fs::read_to_string(tmp.path().join(".gitignore")).unwrap();
        assert_eq!(content, "target\n.redline/\n");
    }
}
