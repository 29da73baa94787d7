//! Whole-file reads and writes for the files being edited.

use std::fs;
use std::io;
use std::path::Path;

/// Reads and overwrites working-tree files.
///
/// The orchestrator goes through this trait so tests can inject write failures
/// after a backup has already been taken.
pub trait ContentStore {
    fn read_text(&self, path: &Path) -> io::Result<String>;
    fn write_text(&self, path: &Path, content: &str) -> io::Result<()>;
}

/// Local filesystem store.
///
/// Overwrites go through a sibling temp file and a rename, so a failed write leaves
/// the original untouched. The original's permissions are carried over.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsContentStore;

impl ContentStore for FsContentStore {
    fn read_text(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }

    fn write_text(&self, path: &Path, content: &str) -> io::Result<()> {
        let permissions = fs::metadata(path).ok().map(|m| m.permissions());
        let tmp_path = crate::util::tmp_sibling(path);
        fs::write(&tmp_path, content)?;
        if let Some(perms) = permissions {
            let _ = fs::set_permissions(&tmp_path, perms);
        }
        if let Err(err) = replace(&tmp_path, path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(err);
        }
        Ok(())
    }
}

#[cfg(not(windows))]
fn replace(from: &Path, to: &Path) -> io::Result<()> {
    fs::rename(from, to)
}

#[cfg(windows)]
fn replace(from: &Path, to: &Path) -> io::Result<()> {
    if to.exists() {
        fs::remove_file(to)?;
    }
    fs::rename(from, to)
}

/// Copy `from` to `to`, carrying over permissions and modification time.
pub fn copy_preserving(from: &Path, to: &Path) -> io::Result<u64> {
    let bytes = fs::copy(from, to)?;
    let modified = fs::metadata(from)?.modified()?;
    let dest = fs::OpenOptions::new().write(true).open(to)?;
    dest.set_modified(modified)?;
    Ok(bytes)
}
