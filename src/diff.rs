//! Change detection and unified diffs for display

use similar::{ChangeTag, TextDiff};
use std::path::Path;

/// Diff output is cut after this many lines when printed.
pub const MAX_DISPLAY_LINES: usize = 2000;

/// Convert CRLF line endings to LF.
pub fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n")
}

/// True when `candidate` is the same file as `original` once line endings are
/// normalised and surrounding whitespace is ignored.
///
/// This is the single no-change rule; both cached and fresh results go through it.
pub fn is_no_change(original: &str, candidate: &str) -> bool {
    normalize_line_endings(original).trim() == normalize_line_endings(candidate).trim()
}

/// A rendered unified diff plus line counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnifiedDiff {
    pub lines: Vec<String>,
    pub additions: usize,
    pub deletions: usize,
}

impl UnifiedDiff {
    /// Get total additions and deletions
    pub fn stats(&self) -> (usize, usize) {
        (self.additions, self.deletions)
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Diff text capped at `max_lines`, with a marker when lines were dropped.
    pub fn render(&self, max_lines: usize) -> String {
        let mut out = String::new();
        for line in self.lines.iter().take(max_lines) {
            out.push_str(line);
            if !line.ends_with('\n') {
                out.push('\n');
            }
        }
        if self.lines.len() > max_lines {
            out.push_str(&format!(
                "… ({} more diff lines)\n",
                self.lines.len() - max_lines
            ));
        }
        out
    }
}

/// Unified diff of `original` → `modified` with `path` in both headers.
pub fn unified_diff(path: &Path, original: &str, modified: &str) -> UnifiedDiff {
    let diff = TextDiff::from_lines(original, modified);

    let mut additions = 0;
    let mut deletions = 0;
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => additions += 1,
            ChangeTag::Delete => deletions += 1,
            ChangeTag::Equal => {}
        }
    }

    let name = path.display().to_string();
    let text = diff
        .unified_diff()
        .context_radius(3)
        .header(&name, &name)
        .to_string();
    let lines = text.split_inclusive('\n').map(str::to_string).collect();

    UnifiedDiff {
        lines,
        additions,
        deletions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surrounding_whitespace_is_not_a_change() {
        assert!(is_no_change("fn main() {}\n", "\n\nfn main() {}  \n\n"));
        assert!(is_no_change("a\r\nb\r\n", "a\nb\n"));
    }

    #[test]
    fn interior_whitespace_is_a_change() {
        assert!(!is_no_change("a b\n", "a  b\n"));
        assert!(!is_no_change("a\nb\n", "a\n\nb\n"));
    }

    #[test]
    fn unified_diff_counts_lines() {
        let original = "line one\nline two\n";
        let modified = "# header\nline one\nline 2\n";
        let diff = unified_diff(Path::new("b.py"), original, modified);

        assert_eq!(diff.stats(), (2, 1));
        assert_eq!(diff.lines[0], "--- b.py\n");
        assert_eq!(diff.lines[1], "+++ b.py\n");
        assert!(diff.lines.iter().any(|l| l == "+# header\n"));
        assert!(diff.lines.iter().any(|l| l == "-line two\n"));
    }

    #[test]
    fn identical_text_has_no_diff() {
        let diff = unified_diff(Path::new("a.py"), "same\n", "same\n");
        assert!(diff.is_empty());
        assert_eq!(diff.stats(), (0, 0));
    }

    #[test]
    fn render_truncates_long_diffs() {
        let original: String = (0..50).map(|i| format!("{i}\n")).collect();
        let modified: String = (0..50).map(|i| format!("changed {i}\n")).collect();
        let diff = unified_diff(Path::new("long.txt"), &original, &modified);

        let rendered = diff.render(10);
        assert_eq!(rendered.lines().count(), 11);
        assert!(rendered.ends_with("more diff lines)\n"));
    }
}
