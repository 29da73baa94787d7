//! Change cache for redline
//!
//! Remembers what the generator produced for an exact (instruction, file, file state)
//! triple so a rerun, or a preview followed by `--apply`, does not pay for a second
//! generation call.
//!
//! # Keys
//!
//! A key is a SHA-256 over length-prefixed fields in fixed order: instruction,
//! absolute path, modification time, size, and (with [`KeyStrategy::Content`], the
//! default) a digest of the file body. Modification time and size alone miss edits
//! that keep both unchanged, which is why the body digest is on by default.
//!
//! # Error Handling
//!
//! Cache operations are best-effort. A missing or corrupt cache file loads as an
//! empty cache, and a failed save is reported by the session as an event; the data
//! will simply be regenerated next time.

use crate::error::StoreError;
use crate::events::{Event, EventLog, StoreKind};
use crate::store::{self, StatePaths};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::{self, Metadata};
use std::io::{self, ErrorKind};
use std::path::Path;
use std::time::UNIX_EPOCH;

const CACHE_FORMAT_VERSION: u32 = 1;
const KEY_DOMAIN: &[u8] = b"redline-change-cache-v1";

/// How much of the file's state goes into the key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStrategy {
    /// Modification time and size only
    Stat,
    /// Modification time, size and a SHA-256 of the body
    #[default]
    Content,
}

/// On-disk state of a file at the moment it was read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFingerprint {
    /// Nanoseconds since the Unix epoch, 0 when the platform cannot tell
    pub modified_ns: u128,
    pub size: u64,
    pub content_digest: Option<String>,
}

impl FileFingerprint {
    pub fn from_metadata(meta: &Metadata) -> Self {
        let modified_ns = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        Self {
            modified_ns,
            size: meta.len(),
            content_digest: None,
        }
    }

    pub fn with_content(mut self, content: &[u8]) -> Self {
        self.content_digest = Some(crate::util::hash_bytes(content));
        self
    }

    /// Stat `path` and, for [`KeyStrategy::Content`], digest `content`.
    pub fn capture(path: &Path, content: &str, strategy: KeyStrategy) -> io::Result<Self> {
        let fingerprint = Self::from_metadata(&fs::metadata(path)?);
        Ok(match strategy {
            KeyStrategy::Stat => fingerprint,
            KeyStrategy::Content => fingerprint.with_content(content.as_bytes()),
        })
    }
}

/// Hex digest identifying one cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn derive(instruction: &str, path: &Path, fingerprint: &FileFingerprint) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(KEY_DOMAIN);
        update_field(&mut hasher, instruction.as_bytes());
        update_field(&mut hasher, path.as_os_str().as_encoded_bytes());
        update_field(&mut hasher, &fingerprint.modified_ns.to_le_bytes());
        update_field(&mut hasher, &fingerprint.size.to_le_bytes());
        match &fingerprint.content_digest {
            Some(digest) => {
                hasher.update([1u8]);
                update_field(&mut hasher, digest.as_bytes());
            }
            None => hasher.update([0u8]),
        }
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn update_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

/// What the generator said last time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CachedResult {
    Unchanged,
    Changed { content: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub result: CachedResult,
    pub produced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeCache {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    entries: HashMap<String, CacheEntry>,
    #[serde(skip)]
    dirty: bool,
}

fn default_version() -> u32 {
    CACHE_FORMAT_VERSION
}

impl Default for ChangeCache {
    fn default() -> Self {
        Self {
            version: CACHE_FORMAT_VERSION,
            entries: HashMap::new(),
            dirty: false,
        }
    }
}

impl ChangeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from `path`; missing or corrupt input yields an empty cache.
    pub fn load(path: &Path, events: &mut EventLog) -> Self {
        let mut cache: ChangeCache = store::load_json(path, StoreKind::Cache, events);
        if cache.version != CACHE_FORMAT_VERSION {
            tracing::debug!(
                "cache format {} != {}, starting empty",
                cache.version,
                CACHE_FORMAT_VERSION
            );
            cache = ChangeCache::default();
        }
        cache
    }

    pub fn save(&mut self, paths: &StatePaths, path: &Path) -> Result<(), StoreError> {
        store::save_json(paths, path, self, false)?;
        self.dirty = false;
        Ok(())
    }

    pub fn get(&self, key: &CacheKey) -> Option<&CacheEntry> {
        self.entries.get(key.as_str())
    }

    pub fn put(&mut self, key: &CacheKey, result: CachedResult) {
        self.entries.insert(
            key.as_str().to_string(),
            CacheEntry {
                result,
                produced_at: Utc::now(),
            },
        );
        self.dirty = true;
    }

    /// True when entries changed since the last load or save.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Delete the cache file. Returns whether anything was removed.
pub fn invalidate(path: &Path, events: &mut EventLog) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => {
            events.push(Event::CacheInvalidated {
                path: path.to_path_buf(),
            });
            Ok(true)
        }
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}
