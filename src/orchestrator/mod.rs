//! Edit orchestration
//!
//! Drives one instruction across a list of files, one file at a time:
//!
//! ```text
//! Pending ─┬─> CacheHit ───┬─> NoChange
//!          └─> Generating ─┴─> Changed ─┬─> Skipped
//!                                       └─> Applied
//! ```
//!
//! Any step may end in `Failed`, which only affects the current file. Applying a change
//! always preserves the original first: a `.bak` sibling, then (when a run is active)
//! a verified vault copy that is recorded in the ledger before the file is overwritten.

use crate::cache::{CacheKey, CachedResult, FileFingerprint, KeyStrategy};
use crate::cancel::CancelToken;
use crate::content::{ContentStore, FsContentStore};
use crate::diff::{self, UnifiedDiff};
use crate::error::{FileError, GenerateError, WriteStage};
use crate::events::Event;
use crate::generator::{build_prompt, RetryPolicy, TextGenerator};
use crate::session::Session;
use crate::vault::{verify_backup, write_sibling_backup};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;


/// Whether and how changes reach the working tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ApplyMode {
    /// Show diffs only
    #[default]
    Preview,
    /// Write every change without asking
    Apply,
    /// Ask before each write
    Confirm,
}

impl ApplyMode {
    /// Modes that may write start a run so the batch can be undone.
    pub fn writes(&self) -> bool {
        !matches!(self, ApplyMode::Preview)
    }
}

#[derive(Debug, Clone)]
pub struct EditOptions {
    pub instruction: String,
    pub mode: ApplyMode,
    pub model: String,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub key_strategy: KeyStrategy,
}

impl EditOptions {
    pub fn new(instruction: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            mode: ApplyMode::default(),
            model: model.into(),
            timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            key_strategy: KeyStrategy::default(),
        }
    }
}

/// Per-file lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Pending,
    CacheHit,
    Generating,
    NoChange,
    Changed,
    Skipped,
    Applied,
    Failed,
}

impl FileState {
    pub fn label(&self) -> &'static str {
        match self {
            FileState::Pending => "pending",
            FileState::CacheHit => "cache hit",
            FileState::Generating => "generating",
            FileState::NoChange => "no change",
            FileState::Changed => "changed",
            FileState::Skipped => "skipped",
            FileState::Applied => "applied",
            FileState::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Preview,
    Declined,
}

/// Terminal result for one file.
#[derive(Debug)]
pub enum FileOutcome {
    NoChange {
        cached: bool,
    },
    Skipped {
        reason: SkipReason,
        diff: UnifiedDiff,
        cached: bool,
    },
    Applied {
        /// Vault copy, when a run was active
        backup: Option<PathBuf>,
        /// `.bak` sibling, when it could be written
        sibling: Option<PathBuf>,
        diff: UnifiedDiff,
        cached: bool,
    },
    Failed(FileError),
}

impl FileOutcome {
    pub fn state(&self) -> FileState {
        match self {
            FileOutcome::NoChange { .. } => FileState::NoChange,
            FileOutcome::Skipped { .. } => FileState::Skipped,
            FileOutcome::Applied { .. } => FileState::Applied,
            FileOutcome::Failed(_) => FileState::Failed,
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, FileOutcome::Failed(_))
    }

    pub fn was_cached(&self) -> bool {
        match self {
            FileOutcome::NoChange { cached }
            | FileOutcome::Skipped { cached, .. }
            | FileOutcome::Applied { cached, .. } => *cached,
            FileOutcome::Failed(_) => false,
        }
    }
}

/// The batch stopped because the cancel token fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupted;

#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<(PathBuf, FileOutcome)>,
    pub interrupted: bool,
}

impl BatchReport {
    pub fn processed(&self) -> usize {
        self.outcomes.len()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.is_success()).count()
    }

    pub fn count(&self, state: FileState) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.state() == state).count()
    }
}

/// Decides whether a changed file is written in [`ApplyMode::Confirm`].
pub trait Confirm {
    fn confirm(&mut self, path: &Path, diff: &UnifiedDiff) -> bool;
}

impl<F> Confirm for F
where
    F: FnMut(&Path, &UnifiedDiff) -> bool,
{
    fn confirm(&mut self, path: &Path, diff: &UnifiedDiff) -> bool {
        self(path, diff)
    }
}

/// Prints the diff and reads `y`/`yes` from stdin.
#[derive(Debug, Default)]
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&mut self, path: &Path, diff: &UnifiedDiff) -> bool {
        print!("{}", diff.render(diff::MAX_DISPLAY_LINES));
        print!("Apply changes to {}? [y/N]: ", path.display());
        let _ = io::stdout().flush();

        let mut answer = String::new();
        match io::stdin().lock().read_line(&mut answer) {
            Ok(_) => is_yes(&answer),
            Err(err) => {
                tracing::debug!("confirmation read failed: {}", err);
                false
            }
        }
    }
}

pub fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

/// Progress callbacks for console output.
pub trait Reporter {
    fn started(&mut self, path: &Path);
    fn finished(&mut self, path: &Path, outcome: &FileOutcome);
}

impl Reporter for () {
    fn started(&mut self, _path: &Path) {}
    fn finished(&mut self, _path: &Path, _outcome: &FileOutcome) {}
}

pub struct Orchestrator<'a> {
    session: &'a mut Session,
    generator: &'a dyn TextGenerator,
    store: Box<dyn ContentStore + 'a>,
    confirm: Box<dyn Confirm + 'a>,
    reporter: Box<dyn Reporter + 'a>,
    cancel: CancelToken,
    options: EditOptions,
}

impl<'a> Orchestrator<'a> {
    pub fn new(session: &'a mut Session, generator: &'a dyn TextGenerator, options: EditOptions) -> Self {
        Self {
            session,
            generator,
            store: Box::new(FsContentStore),
            confirm: Box::new(StdinConfirm),
            reporter: Box::new(()),
            cancel: CancelToken::new(),
            options,
        }
    }

    pub fn with_store(mut self, store: impl ContentStore + 'a) -> Self {
        self.store = Box::new(store);
        self
    }

    pub fn with_confirm(mut self, confirm: impl Confirm + 'a) -> Self {
        self.confirm = Box::new(confirm);
        self
    }

    pub fn with_reporter(mut self, reporter: impl Reporter + 'a) -> Self {
        self.reporter = Box::new(reporter);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Process `files` in order, checkpointing after each one.
    ///
    /// Stops before the next file once the cancel token fires; the file in flight at
    /// that moment is dropped without any write.
    pub fn run(&mut self, files: &[PathBuf]) -> BatchReport {
        let mut report = BatchReport::default();
        for path in files {
            if self.cancel.is_cancelled() {
                report.interrupted = true;
                break;
            }
            self.reporter.started(path);
            match self.process_file(path) {
                Ok(outcome) => {
                    self.session.checkpoint();
                    self.reporter.finished(path, &outcome);
                    report.outcomes.push((path.clone(), outcome));
                }
                Err(Interrupted) => {
                    tracing::info!("interrupted while processing {}", path.display());
                    report.interrupted = true;
                    break;
                }
            }
        }
        self.session.checkpoint();
        report
    }

    /// Carry one file from `Pending` to a terminal state.
    pub fn process_file(&mut self, path: &Path) -> Result<FileOutcome, Interrupted> {
        let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        let mut state = FileState::Pending;

        let original = match self.store.read_text(&path) {
            Ok(text) => text,
            Err(source) => return Ok(self.fail(&path, &mut state, FileError::Read { path: path.clone(), source })),
        };

        let key = if self.session.cache_enabled() {
            match FileFingerprint::capture(&path, &original, self.options.key_strategy) {
                Ok(fp) => Some(CacheKey::derive(&self.options.instruction, &path, &fp)),
                Err(source) => {
                    return Ok(self.fail(&path, &mut state, FileError::Read { path: path.clone(), source }))
                }
            }
        } else {
            None
        };

        let cached = key
            .as_ref()
            .and_then(|k| self.session.cache_get(k))
            .map(|entry| entry.result.clone());
        let (candidate, cached) = match cached {
            Some(result) => {
                transition(&path, &mut state, FileState::CacheHit);
                let candidate = match result {
                    CachedResult::Unchanged => None,
                    CachedResult::Changed { content } => Some(content),
                };
                (candidate, true)
            }
            None => {
                transition(&path, &mut state, FileState::Generating);
                let response = match self.generate(&path, &original)? {
                    Ok(text) => diff::normalize_line_endings(&text),
                    Err(err) => return Ok(self.fail(&path, &mut state, err)),
                };
                let result = if diff::is_no_change(&original, &response) {
                    CachedResult::Unchanged
                } else {
                    CachedResult::Changed {
                        content: response.clone(),
                    }
                };
                if let Some(key) = &key {
                    self.session.cache_put(key, result);
                }
                (Some(response), false)
            }
        };

        let candidate = match candidate {
            Some(text) if !diff::is_no_change(&original, &text) => text,
            _ => {
                transition(&path, &mut state, FileState::NoChange);
                return Ok(FileOutcome::NoChange { cached });
            }
        };

        transition(&path, &mut state, FileState::Changed);
        let diff = diff::unified_diff(&path, &original, &candidate);

        let skip = match self.options.mode {
            ApplyMode::Preview => Some(SkipReason::Preview),
            ApplyMode::Confirm if !self.confirm.confirm(&path, &diff) => Some(SkipReason::Declined),
            _ => None,
        };
        if let Some(reason) = skip {
            transition(&path, &mut state, FileState::Skipped);
            return Ok(FileOutcome::Skipped { reason, diff, cached });
        }
        if self.cancel.is_cancelled() {
            return Err(Interrupted);
        }

        match self.apply(&path, &candidate) {
            Ok((backup, sibling)) => {
                transition(&path, &mut state, FileState::Applied);
                Ok(FileOutcome::Applied {
                    backup,
                    sibling,
                    diff,
                    cached,
                })
            }
            Err(err) => Ok(self.fail(&path, &mut state, err)),
        }
    }

    /// Generation with retries. The outer error means the batch was cancelled.
    fn generate(&mut self, path: &Path, original: &str) -> Result<Result<String, FileError>, Interrupted> {
        let prompt = build_prompt(path, original, &self.options.instruction);
        let policy = self.options.retry;
        let mut attempt = 0;
        loop {
            attempt += 1;
            if self.cancel.is_cancelled() {
                return Err(Interrupted);
            }
            let result = self.generator.generate(
                &prompt,
                self.options.timeout,
                &self.options.model,
                &self.cancel,
            );
            match result {
                Ok(_) | Err(_) if self.cancel.is_cancelled() => return Err(Interrupted),
                Ok(text) => return Ok(Ok(text)),
                Err(GenerateError::Cancelled) => return Err(Interrupted),
                Err(err) if attempt < policy.max_attempts() => {
                    let delay = policy.delay_after(attempt);
                    self.session.push_event(Event::GenerationRetry {
                        path: path.to_path_buf(),
                        attempt,
                        delay,
                        reason: err.to_string(),
                    });
                    if !self.cancel.sleep(delay) {
                        return Err(Interrupted);
                    }
                }
                Err(source) => {
                    return Ok(Err(FileError::Generation {
                        path: path.to_path_buf(),
                        attempts: attempt,
                        source,
                    }))
                }
            }
        }
    }

    /// Preserve `path`, then overwrite it with `content`.
    fn apply(&mut self, path: &Path, content: &str) -> Result<(Option<PathBuf>, Option<PathBuf>), FileError> {
        let backup_err = |source: io::Error| FileError::Write {
            path: path.to_path_buf(),
            stage: WriteStage::Backup,
            source,
        };

        let sibling = match write_sibling_backup(path) {
            Ok(bak) => Some(bak),
            Err(err) if self.session.active_run().is_none() => return Err(backup_err(err)),
            Err(err) => {
                self.session.push_event(Event::SiblingBackupFailed {
                    path: path.to_path_buf(),
                    reason: err.to_string(),
                });
                None
            }
        };

        let backup = match self.session.active_run().map(str::to_string) {
            Some(run_id) => Some(self.preserve_in_vault(path, &run_id)?),
            None => {
                // Without a run the sibling is the only way back.
                if let Some(bak) = &sibling {
                    verify_backup(path, bak).map_err(backup_err)?;
                }
                None
            }
        };

        self.store
            .write_text(path, content)
            .map_err(|source| FileError::Write {
                path: path.to_path_buf(),
                stage: WriteStage::Overwrite,
                source,
            })?;
        tracing::debug!("wrote {}", path.display());
        Ok((backup, sibling))
    }

    /// Vault copy, verified and recorded (and checkpointed) before the overwrite.
    fn preserve_in_vault(&mut self, path: &Path, run_id: &str) -> Result<PathBuf, FileError> {
        let slot = self
            .session
            .vault()
            .slot(path, run_id, self.session.repo_root());

        if let Some(existing) = self.session.backup_owner(&slot.path) {
            if existing == path {
                // Already preserved earlier in this run; keep the first, pristine copy.
                return Ok(slot.path);
            }
            let existing_original = existing.to_path_buf();
            self.session.push_event(Event::BackupCollision {
                path: path.to_path_buf(),
                backup: slot.path.clone(),
                existing_original: existing_original.clone(),
            });
            return Err(FileError::BackupCollision {
                path: path.to_path_buf(),
                backup: slot.path,
                existing_original,
            });
        }
        if slot.relative_fallback {
            self.session.push_event(Event::RelativePathFallback {
                path: path.to_path_buf(),
                backup: slot.path.clone(),
            });
        }

        let backup_err = |source: io::Error| FileError::Write {
            path: path.to_path_buf(),
            stage: WriteStage::Backup,
            source,
        };
        let backup = self
            .session
            .vault()
            .copy_into(path, &slot)
            .map_err(backup_err)?;
        verify_backup(path, &backup).map_err(backup_err)?;

        self.session.record_backup(path, &backup);
        self.session.checkpoint();
        Ok(backup)
    }

    fn fail(&mut self, path: &Path, state: &mut FileState, err: FileError) -> FileOutcome {
        transition(path, state, FileState::Failed);
        tracing::debug!("{}", err);
        FileOutcome::Failed(err)
    }
}

fn transition(path: &Path, state: &mut FileState, next: FileState) {
    tracing::trace!("{}: {} -> {}", path.display(), state.label(), next.label());
    *state = next;
}
