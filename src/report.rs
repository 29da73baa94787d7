//! Console output for batch runs, run listings and undo.

use crate::diff::MAX_DISPLAY_LINES;
use crate::ledger::{RunSummary, UndoReport};
use crate::orchestrator::{BatchReport, FileOutcome, Reporter, SkipReason};
use crate::vault::SiblingRestore;
use std::path::{Path, PathBuf};

/// Prints one status line per file, plus diffs unless a confirmation prompt
/// already showed them.
pub struct ConsoleReporter {
    total: usize,
    index: usize,
    show_diffs: bool,
}

impl ConsoleReporter {
    pub fn new(total: usize, show_diffs: bool) -> Self {
        Self {
            total,
            index: 0,
            show_diffs,
        }
    }
}

impl Reporter for ConsoleReporter {
    fn started(&mut self, path: &Path) {
        self.index += 1;
        println!("[{}/{}] processing {}", self.index, self.total, path.display());
    }

    fn finished(&mut self, path: &Path, outcome: &FileOutcome) {
        if self.show_diffs {
            if let FileOutcome::Skipped { diff, .. } | FileOutcome::Applied { diff, .. } = outcome {
                print!("{}", diff.render(MAX_DISPLAY_LINES));
            }
        }
        println!("{}", outcome_line(path, outcome));
    }
}

/// Status line for a finished file.
pub fn outcome_line(path: &Path, outcome: &FileOutcome) -> String {
    let path = path.display();
    let from_cache = |cached: bool| if cached { " (cached)" } else { "" };
    match outcome {
        FileOutcome::NoChange { cached } => format!("[no change] {}{}", path, from_cache(*cached)),
        FileOutcome::Skipped {
            reason: SkipReason::Preview,
            cached,
            ..
        } => format!(
            "[dry-run] Changes detected for {}{} (not applied). Rerun with --apply to write changes.",
            path,
            from_cache(*cached)
        ),
        FileOutcome::Skipped {
            reason: SkipReason::Declined,
            ..
        } => format!("[refused] {}", path),
        FileOutcome::Applied { backup, sibling, .. } => {
            match backup.as_ref().or(sibling.as_ref()) {
                Some(copy) => format!("[updated] {} (backup: {})", path, copy.display()),
                None => format!("[updated] {}", path),
            }
        }
        FileOutcome::Failed(err) => format!("[error] {}", err),
    }
}

pub fn batch_summary(report: &BatchReport) -> String {
    format!(
        "Done. Processed {} files, successful: {}",
        report.processed(),
        report.succeeded()
    )
}

/// `id: time - N files - instruction`
pub fn run_line(run: &RunSummary) -> String {
    format!(
        "{}: {} - {} files - {}",
        run.id,
        run.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
        run.file_count,
        run.instruction.trim()
    )
}

pub fn undo_line(run_id: &str, report: &UndoReport) -> String {
    format!(
        "Undo run {}: restored {}/{} files",
        run_id, report.restored, report.total
    )
}

/// Print `--revert` results and return how many files came back.
pub fn print_revert(results: &[(PathBuf, SiblingRestore)]) -> usize {
    let mut restored = 0;
    for (file, outcome) in results {
        match outcome {
            SiblingRestore::Restored(bak) => {
                restored += 1;
                println!("[reverted] {} (from {})", file.display(), bak.display());
            }
            SiblingRestore::NoBackup(_) => println!("[no backup] {} (skipping)", file.display()),
            SiblingRestore::Failed(bak, err) => {
                println!("[error] could not restore {} from {}: {}", file.display(), bak.display(), err)
            }
        }
    }
    println!("Revert complete. Restored: {}/{}", restored, results.len());
    restored
}
