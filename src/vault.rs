//! Backup vault
//!
//! Pristine copies of every file a run touches, namespaced by run id and mirroring
//! the file's position under the repo root:
//!
//! ```text
//! <vault>/<run-id>/<relative dir>/<file name>
//! ```
//!
//! Files outside the repo root fall back to their bare file name, so two such files
//! with the same name collide within a run. The orchestrator detects that through the
//! ledger and refuses the second backup instead of overwriting the first.
//!
//! Independently of runs, every write attempt also leaves a `<file>.bak` sibling.

use crate::content::copy_preserving;
use crate::util::normalize_path;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Where a file's backup goes within a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupSlot {
    pub path: PathBuf,
    /// True when the file was outside the repo root and only its name was used
    pub relative_fallback: bool,
}

#[derive(Debug, Clone)]
pub struct Vault {
    root: PathBuf,
}

impl Vault {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Compute the backup location for `path` without touching the filesystem.
    ///
    /// Both paths are normalized lexically first, so `repo/../other/f.py` counts as
    /// outside the repo. The slot always stays inside the run's directory.
    pub fn slot(&self, path: &Path, run_id: &str, repo_root: &Path) -> BackupSlot {
        let run_dir = self.root.join(run_id);
        let path = normalize_path(path);
        let repo_root = normalize_path(repo_root);
        match path.strip_prefix(&repo_root) {
            Ok(rel) if is_plain_relative(rel) => BackupSlot {
                path: run_dir.join(rel),
                relative_fallback: false,
            },
            _ => {
                let name = path.file_name().map(PathBuf::from).unwrap_or_default();
                BackupSlot {
                    path: run_dir.join(name),
                    relative_fallback: true,
                }
            }
        }
    }

    /// Copy `original` into `slot`, creating directories as needed.
    pub fn copy_into(&self, original: &Path, slot: &BackupSlot) -> io::Result<PathBuf> {
        if let Some(parent) = slot.path.parent() {
            fs::create_dir_all(parent)?;
        }
        copy_preserving(original, &slot.path)?;
        Ok(slot.path.clone())
    }

    /// Preserve `path` under `run_id`, returning the backup location.
    pub fn preserve(&self, path: &Path, run_id: &str, repo_root: &Path) -> io::Result<PathBuf> {
        let slot = self.slot(path, run_id, repo_root);
        self.copy_into(path, &slot)
    }
}

/// Non-empty and made only of plain names.
fn is_plain_relative(rel: &Path) -> bool {
    !rel.as_os_str().is_empty() && rel.components().all(|c| matches!(c, Component::Normal(_)))
}

/// Confirm `backup` is a readable file of the same size as `original`.
pub fn verify_backup(original: &Path, backup: &Path) -> io::Result<()> {
    let backup_meta = fs::metadata(backup)?;
    if !backup_meta.is_file() {
        return Err(io::Error::other(format!(
            "{} is not a file",
            backup.display()
        )));
    }
    let original_len = fs::metadata(original)?.len();
    if backup_meta.len() != original_len {
        return Err(io::Error::other(format!(
            "{} has {} bytes, expected {}",
            backup.display(),
            backup_meta.len(),
            original_len
        )));
    }
    fs::File::open(backup)?;
    Ok(())
}

/// `a.py` → `a.py.bak`
pub fn sibling_backup_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".bak");
    path.with_file_name(name)
}

pub fn write_sibling_backup(path: &Path) -> io::Result<PathBuf> {
    let bak = sibling_backup_path(path);
    copy_preserving(path, &bak)?;
    Ok(bak)
}

/// Result of restoring one file from its `.bak` sibling.
#[derive(Debug)]
pub enum SiblingRestore {
    Restored(PathBuf),
    NoBackup(PathBuf),
    Failed(PathBuf, io::Error),
}

/// Restore each file from its `.bak` sibling where one exists.
pub fn restore_siblings(files: &[PathBuf]) -> Vec<(PathBuf, SiblingRestore)> {
    files
        .iter()
        .map(|file| {
            let bak = sibling_backup_path(file);
            let outcome = if !bak.is_file() {
                SiblingRestore::NoBackup(bak)
            } else {
                match copy_preserving(&bak, file) {
                    Ok(_) => SiblingRestore::Restored(bak),
                    Err(err) => SiblingRestore::Failed(bak, err),
                }
            };
            (file.clone(), outcome)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn slot_mirrors_relative_path() {
        let vault = Vault::new("/repo/.redline/backups");
        let slot = vault.slot(Path::new("/repo/src/app/main.js"), "run-1", Path::new("/repo"));
        assert_eq!(
            slot.path,
            Path::new("/repo/.redline/backups/run-1/src/app/main.js")
        );
        assert!(!slot.relative_fallback);
    }

    #[test]
    fn slot_falls_back_to_file_name_outside_root() {
        let vault = Vault::new("/repo/.redline/backups");
        let slot = vault.slot(Path::new("/elsewhere/lib/util.py"), "run-1", Path::new("/repo"));
        assert_eq!(slot.path, Path::new("/repo/.redline/backups/run-1/util.py"));
        assert!(slot.relative_fallback);
    }

    #[test]
    fn slot_never_leaves_run_directory() {
        let vault = Vault::new("/work/repo/.redline/backups");
        let escaped = vault.slot(
            Path::new("/work/repo/../other/f.py"),
            "run-1",
            Path::new("/work/repo"),
        );
        assert_eq!(escaped.path, Path::new("/work/repo/.redline/backups/run-1/f.py"));
        assert!(escaped.relative_fallback);

        let inside = vault.slot(
            Path::new("/work/repo/src/../lib/./g.py"),
            "run-1",
            Path::new("/work/repo/"),
        );
        assert_eq!(inside.path, Path::new("/work/repo/.redline/backups/run-1/lib/g.py"));
        assert!(!inside.relative_fallback);
    }

    #[test]
    fn preserve_copies_content_and_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let repo = tmp.path().join("repo");
        fs::create_dir_all(repo.join("pkg")).unwrap();
        let file = repo.join("pkg/mod.py");
        fs::write(&file, "x = 1\n").unwrap();

        let vault = Vault::new(tmp.path().join("vault"));
        let first = vault.preserve(&file, "run-a", &repo).unwrap();
        let second = vault.preserve(&file, "run-a", &repo).unwrap();

        assert_eq!(first, second);
        assert_eq!(first, tmp.path().join("vault/run-a/pkg/mod.py"));
        assert_eq!(fs::read_to_string(&first).unwrap(), "x = 1\n");
        verify_backup(&file, &first).unwrap();
    }

    #[test]
    fn preserve_missing_file_fails() {
        let tmp = TempDir::new().unwrap();
        let vault = Vault::new(tmp.path().join("vault"));
        let missing = tmp.path().join("gone.py");
        assert!(vault.preserve(&missing, "run-a", tmp.path()).is_err());
    }

    #[test]
    fn verify_backup_rejects_size_mismatch() {
        let tmp = TempDir::new().unwrap();
        let original = tmp.path().join("a.py");
        let backup = tmp.path().join("a.py.copy");
        fs::write(&original, "abcdef").unwrap();
        fs::write(&backup, "abc").unwrap();
        assert!(verify_backup(&original, &backup).is_err());
        assert!(verify_backup(&original, &tmp.path().join("missing")).is_err());
    }

    #[test]
    fn sibling_backup_and_restore() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("b.py");
        let other = tmp.path().join("c.py");
        fs::write(&file, "original").unwrap();
        fs::write(&other, "untracked").unwrap();

        let bak = write_sibling_backup(&file).unwrap();
        assert_eq!(bak, tmp.path().join("b.py.bak"));
        fs::write(&file, "edited").unwrap();

        let results = restore_siblings(&[file.clone(), other.clone()]);
        assert!(matches!(results[0].1, SiblingRestore::Restored(_)));
        assert!(matches!(results[1].1, SiblingRestore::NoBackup(_)));
        assert_eq!(fs::read_to_string(&file).unwrap(), "original");
    }
}
