use console::style;
use similar::{ChangeTag, TextDiff};

const CONTEXT_LINES: usize = 3;

/// A line-level unified diff of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDiff {
    pub path: String,
    pub unified: String,
    pub added: usize,
    pub removed: usize,
}

impl FileDiff {
    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.removed == 0
    }
}

pub fn unified_diff(path: &str, old: &str, new: &str) -> FileDiff {
    let diff = TextDiff::from_lines(old, new);

    let (mut added, mut removed) = (0, 0);
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => added += 1,
            ChangeTag::Delete => removed += 1,
            ChangeTag::Equal => {}
        }
    }

    let unified = if added == 0 && removed == 0 {
        String::new()
    } else {
        diff.unified_diff()
            .context_radius(CONTEXT_LINES)
            .header(&format!("a/{path}"), &format!("b/{path}"))
            .missing_newline_hint(true)
            .to_string()
    };

    FileDiff {
        path: path.to_string(),
        unified,
        added,
        removed,
    }
}

/// Colors a unified diff for the terminal: removals red, additions green,
/// hunk headers cyan.
pub fn colorize_diff(unified: &str) -> String {
    unified
        .lines()
        .map(|line| {
            if line.starts_with("+++") || line.starts_with("---") {
                style(line).bold().to_string()
            } else if line.starts_with("@@") {
                style(line).cyan().to_string()
            } else if line.starts_with('+') {
                style(line).green().to_string()
            } else if line.starts_with('-') {
                style(line).red().to_string()
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unified_diff_counts_changes() {
        let old = "line 1\nline 2\nline 3\n";
        let new = "line 1\nline two\nline 3\nline 4\n";
        let diff = unified_diff("notes.txt", old, new);

        assert_eq!(diff.added, 2);
        assert_eq!(diff.removed, 1);
        assert!(diff.unified.contains("--- a/notes.txt"));
        assert!(diff.unified.contains("+++ b/notes.txt"));
        assert!(diff.unified.contains("-line 2"));
        assert!(diff.unified.contains("+line two"));
        assert!(diff.unified.contains("+line 4"));
    }

    #[test]
    fn test_no_changes() {
        let diff = unified_diff("same.txt", "a\nb\n", "a\nb\n");
        assert!(diff.is_empty());
        assert!(diff.unified.is_empty());
    }

    #[test]
    fn test_new_file_diff() {
        let diff = unified_diff("new.txt", "", "hello\nworld\n");
        assert_eq!(diff.added, 2);
        assert_eq!(diff.removed, 0);
    }

    #[test]
    fn test_colorize_keeps_text() {
        let diff = unified_diff("f.txt", "a\n", "b\n");
        let colored = colorize_diff(&diff.unified);
        let plain = strip_ansi_escapes::strip_str(&colored);
        assert_eq!(plain, diff.unified.trim_end_matches('\n'));
    }
}
