//! Candidate file discovery
//!
//! Visits files in a stable order (code extensions first, then lexical path) so that
//! repeated runs over an unchanged tree process files identically.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Extensions treated as code: the default filter and the first sort bucket.
pub const CODE_EXTENSIONS: &[&str] = &[
    ".py", ".js", ".ts", ".jsx", ".tsx", ".json", ".css", ".scss", ".html",
];

/// Directory names never descended into.
pub const DEFAULT_EXCLUDES: &[&str] = &[
    ".git",
    "node_modules",
    "dist",
    "build",
    "venv",
    ".venv",
    "__pycache__",
    crate::store::STATE_DIR,
];

#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    pub recursive: bool,
    /// Lowercase extensions with leading dot
    pub extensions: BTreeSet<String>,
    pub excludes: BTreeSet<String>,
}

impl DiscoveryOptions {
    /// Defaults, optionally narrowed to `extensions` and extended with `excludes`.
    pub fn new(recursive: bool, extensions: Option<&[String]>, excludes: &[String]) -> Self {
        let extensions = match extensions {
            Some(exts) if !exts.is_empty() => exts.iter().map(|e| normalize_extension(e)).collect(),
            _ => CODE_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
        };
        let excludes = DEFAULT_EXCLUDES
            .iter()
            .map(|e| e.to_string())
            .chain(excludes.iter().cloned())
            .collect();
        Self {
            recursive,
            extensions,
            excludes,
        }
    }
}

/// `py`, `.py` and `.PY` all become `.py`. An empty string selects files without
/// an extension.
pub fn normalize_extension(ext: &str) -> String {
    let lower = ext.trim().to_lowercase();
    if lower.is_empty() || lower.starts_with('.') {
        lower
    } else {
        format!(".{}", lower)
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_lowercase()))
        .unwrap_or_default()
}

fn is_readme(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| matches!(n.to_lowercase().as_str(), "readme.md" | "readme"))
        .unwrap_or(false)
}

fn is_code(path: &Path) -> bool {
    CODE_EXTENSIONS.contains(&extension_of(path).as_str())
}

/// Files under `target` matching `options`, in processing order.
pub fn gather_files(target: &Path, options: &DiscoveryOptions) -> Vec<PathBuf> {
    let wants = |path: &Path| {
        if !options.extensions.contains(&extension_of(path)) {
            return false;
        }
        !(is_readme(path) && !options.extensions.contains(".md"))
    };

    let mut files = Vec::new();
    if target.is_file() {
        if wants(target) {
            files.push(target.to_path_buf());
        }
    } else {
        let max_depth = if options.recursive { usize::MAX } else { 1 };
        let walker = WalkDir::new(target)
            .max_depth(max_depth)
            .into_iter()
            .filter_entry(|entry| {
                if entry.depth() == 0 || !entry.file_type().is_dir() {
                    return true;
                }
                let name = entry.file_name().to_string_lossy();
                !options.excludes.contains(name.as_ref())
            });
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::debug!("skipping unreadable entry: {}", err);
                    continue;
                }
            };
            if entry.file_type().is_file() && wants(entry.path()) {
                files.push(entry.into_path());
            }
        }
    }

    sort_for_processing(&mut files);
    files
}

/// Code files first, then everything else; lexical path order within each group.
pub fn sort_for_processing(files: &mut [PathBuf]) {
    files.sort_by(|a, b| {
        let rank = |p: &Path| if is_code(p) { 0 } else { 1 };
        rank(a).cmp(&rank(b)).then_with(|| a.cmp(b))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "x").unwrap();
    }

    fn rel(root: &Path, files: &[PathBuf]) -> Vec<String> {
        files
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect()
    }

    #[test]
    fn default_walk_prunes_excludes_and_filters_extensions() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        touch(root, "b.py");
        touch(root, "a.js");
        touch(root, "notes.txt");
        touch(root, "node_modules/dep/index.js");
        touch(root, ".redline/backups/run/a.js");
        touch(root, "src/z.ts");

        let files = gather_files(root, &DiscoveryOptions::new(true, None, &[]));
        assert_eq!(rel(root, &files), ["a.js", "b.py", "src/z.ts"]);
    }

    #[test]
    fn non_recursive_stays_at_top_level() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        touch(root, "a.py");
        touch(root, "pkg/b.py");

        let files = gather_files(root, &DiscoveryOptions::new(false, None, &[]));
        assert_eq!(rel(root, &files), ["a.py"]);
    }

    #[test]
    fn custom_excludes_and_extensions() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        touch(root, "docs/guide.md");
        touch(root, "README.md");
        touch(root, "vendor/lib.py");
        touch(root, "main.py");

        let exts = vec!["md".to_string(), ".PY".to_string()];
        let excludes = vec!["vendor".to_string()];
        let files = gather_files(root, &DiscoveryOptions::new(true, Some(&exts), &excludes));
        assert_eq!(rel(root, &files), ["main.py", "README.md", "docs/guide.md"]);
    }

    #[test]
    fn readme_skipped_unless_md_requested() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        touch(root, "readme");
        touch(root, "LICENSE");
        touch(root, "app.py");

        let exts = vec!["py".to_string(), "".to_string()];
        let files = gather_files(root, &DiscoveryOptions::new(true, Some(&exts), &[]));
        assert_eq!(rel(root, &files), ["app.py", "LICENSE"]);

        let exts = vec!["".to_string(), "md".to_string()];
        let files = gather_files(root, &DiscoveryOptions::new(true, Some(&exts), &[]));
        assert_eq!(rel(root, &files), ["LICENSE", "readme"]);
    }

    #[test]
    fn single_file_target() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "one.py");
        touch(tmp.path(), "two.rb");
        let opts = DiscoveryOptions::new(true, None, &[]);

        assert_eq!(gather_files(&tmp.path().join("one.py"), &opts).len(), 1);
        assert!(gather_files(&tmp.path().join("two.rb"), &opts).is_empty());
    }

    #[test]
    fn code_files_sort_first() {
        let mut files = vec![
            PathBuf::from("/r/a.md"),
            PathBuf::from("/r/z.py"),
            PathBuf::from("/r/b.txt"),
            PathBuf::from("/r/c.css"),
        ];
        sort_for_processing(&mut files);
        assert_eq!(
            files,
            [
                PathBuf::from("/r/c.css"),
                PathBuf::from("/r/z.py"),
                PathBuf::from("/r/a.md"),
                PathBuf::from("/r/b.txt"),
            ]
        );
    }
}
