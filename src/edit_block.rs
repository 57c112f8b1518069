//! # Edit Block Parser
//!
//! Parses the SEARCH/REPLACE format models use to propose edits:
//!
//! ````text
//! src/lib.rs
//! ```rust
//! <<<<<<< SEARCH
//! fn old() {}
//! =======
//! fn new() {}
//! >>>>>>> REPLACE
//! ```
//! ````
//!
//! A fenced block names one file and holds one or more SEARCH/REPLACE
//! sections. Only blank lines may appear between blocks and between
//! sections. Anything else rejects the whole input, so a half-understood
//! edit is never applied.

use crate::error::EditBlockError;

pub const SEARCH_MARKER: &str = "<<<<<<< SEARCH";
pub const DIVIDER_MARKER: &str = "=======";
pub const REPLACE_MARKER: &str = ">>>>>>> REPLACE";
const FENCE: &str = "```";

/// One search/replace pair against one file.
///
/// `search` and `replace` hold the exact text between the marker lines,
/// trailing newlines included. An empty `search` asks for a new file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditBlock {
    pub path: String,
    pub search: String,
    pub replace: String,
}

impl EditBlock {
    pub fn is_creation(&self) -> bool {
        self.search.is_empty()
    }
}

struct Lines<'a> {
    lines: Vec<&'a str>,
    pos: usize,
}

impl<'a> Lines<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            lines: input.split_inclusive('\n').collect(),
            pos: 0,
        }
    }

    fn next(&mut self) -> Option<&'a str> {
        let line = self.lines.get(self.pos).copied();
        if line.is_some() {
            self.pos += 1;
        }
        line
    }

    fn skip_blank(&mut self) {
        while self
            .lines
            .get(self.pos)
            .is_some_and(|l| l.trim().is_empty())
        {
            self.pos += 1;
        }
    }

    /// 1-based number of the line last returned by `next`.
    fn current_line(&self) -> usize {
        self.pos.max(1)
    }

    fn error(&self, message: impl Into<String>) -> EditBlockError {
        EditBlockError {
            line: self.current_line(),
            message: message.into(),
        }
    }
}

fn is_marker(line: &str, marker: &str) -> bool {
    line.trim_end() == marker
}

fn is_fence(line: &str) -> bool {
    line.trim_start().starts_with(FENCE)
}

/// Parses every edit block in `input`, in order.
pub fn parse_edit_blocks(input: &str) -> Result<Vec<EditBlock>, EditBlockError> {
    let mut lines = Lines::new(input);
    let mut blocks = Vec::new();

    loop {
        lines.skip_blank();
        let Some(header) = lines.next() else {
            break;
        };
        let path = header.trim();
        if is_fence(path)
            || is_marker(path, SEARCH_MARKER)
            || is_marker(path, DIVIDER_MARKER)
            || is_marker(path, REPLACE_MARKER)
        {
            return Err(lines.error("expected a file path before the code fence"));
        }

        match lines.next() {
            Some(line) if is_fence(line) => {}
            Some(_) => {
                return Err(lines.error(format!(
                    "expected an opening ``` fence after the path '{path}'"
                )));
            }
            None => {
                return Err(lines.error(format!(
                    "unexpected end of input after the path '{path}'"
                )));
            }
        }

        let mut sections = 0;
        loop {
            lines.skip_blank();
            let Some(line) = lines.next() else {
                return Err(lines.error(format!("unterminated edit block for '{path}'")));
            };
            if is_marker(line, SEARCH_MARKER) {
                let (search, replace) = parse_section(&mut lines, path)?;
                blocks.push(EditBlock {
                    path: path.to_string(),
                    search,
                    replace,
                });
                sections += 1;
            } else if line.trim() == FENCE {
                if sections == 0 {
                    return Err(lines.error(format!(
                        "edit block for '{path}' contains no SEARCH/REPLACE section"
                    )));
                }
                break;
            } else {
                return Err(lines.error(format!(
                    "expected '{SEARCH_MARKER}' or a closing ``` fence"
                )));
            }
        }
    }

    if blocks.is_empty() {
        return Err(EditBlockError {
            line: 1,
            message: "no edit blocks found".to_string(),
        });
    }
    Ok(blocks)
}

/// Reads one section after its `<<<<<<< SEARCH` line.
fn parse_section(lines: &mut Lines<'_>, path: &str) -> Result<(String, String), EditBlockError> {
    let mut search = String::new();
    loop {
        let Some(line) = lines.next() else {
            return Err(lines.error(format!(
                "unexpected end of input in SEARCH section for '{path}'"
            )));
        };
        if is_marker(line, DIVIDER_MARKER) {
            break;
        }
        if is_marker(line, SEARCH_MARKER) || is_marker(line, REPLACE_MARKER) {
            return Err(lines.error(format!(
                "expected '{DIVIDER_MARKER}' before '{}'",
                line.trim_end()
            )));
        }
        search.push_str(line);
    }

    let mut replace = String::new();
    loop {
        let Some(line) = lines.next() else {
            return Err(lines.error(format!(
                "unexpected end of input in REPLACE section for '{path}'"
            )));
        };
        if is_marker(line, REPLACE_MARKER) {
            break;
        }
        if is_marker(line, SEARCH_MARKER) || is_marker(line, DIVIDER_MARKER) {
            return Err(lines.error(format!(
                "expected '{REPLACE_MARKER}' before '{}'",
                line.trim_end()
            )));
        }
        replace.push_str(line);
    }

    Ok((search, replace))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_block() {
        let input = "src/lib.rs\n```rust\n<<<<<<< SEARCH\nfn old() {}\n=======\nfn new() {}\n>>>>>>> REPLACE\n```\n";
        let blocks = parse_edit_blocks(input).unwrap();
        assert_eq!(
            blocks,
            vec![EditBlock {
                path: "src/lib.rs".to_string(),
                search: "fn old() {}\n".to_string(),
                replace: "fn new() {}\n".to_string(),
            }]
        );
    }

    #[test]
    fn test_multiple_sections_and_files() {
        let input = "\
a.txt
```
<<<<<<< SEARCH
one
=======
1
>>>>>>> REPLACE

<<<<<<< SEARCH
two
=======
2
>>>>>>> REPLACE
```

b.txt
```
<<<<<<< SEARCH
=======
new file
>>>>>>> REPLACE
```
";
        let blocks = parse_edit_blocks(input).unwrap();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].path, "a.txt");
        assert_eq!(blocks[1].search, "two\n");
        assert_eq!(blocks[1].replace, "2\n");
        assert_eq!(blocks[2].path, "b.txt");
        assert!(blocks[2].is_creation());
        assert_eq!(blocks[2].replace, "new file\n");
    }

    #[test]
    fn test_fence_inside_content_is_kept() {
        let input = "README.md\n```markdown\n<<<<<<< SEARCH\n```sh\nls\n```\n=======\n```sh\nls -la\n```\n>>>>>>> REPLACE\n```\n";
        let blocks = parse_edit_blocks(input).unwrap();
        assert_eq!(blocks[0].search, "```sh\nls\n```\n");
        assert_eq!(blocks[0].replace, "```sh\nls -la\n```\n");
    }

    #[test]
    fn test_blank_lines_inside_sections_are_content() {
        let input = "a.txt\n```\n<<<<<<< SEARCH\nx\n\ny\n=======\n\n>>>>>>> REPLACE\n```";
        let blocks = parse_edit_blocks(input).unwrap();
        assert_eq!(blocks[0].search, "x\n\ny\n");
        assert_eq!(blocks[0].replace, "\n");
    }

    #[test]
    fn test_missing_path() {
        let input = "```\n<<<<<<< SEARCH\na\n=======\nb\n>>>>>>> REPLACE\n```\n";
        let err = parse_edit_blocks(input).unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.message.contains("expected a file path"));
    }

    #[test]
    fn test_missing_fence() {
        let input = "a.txt\n<<<<<<< SEARCH\na\n=======\nb\n>>>>>>> REPLACE\n";
        let err = parse_edit_blocks(input).unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("opening ``` fence"));
    }

    #[test]
    fn test_missing_divider() {
        let input = "a.txt\n```\n<<<<<<< SEARCH\na\n>>>>>>> REPLACE\n```\n";
        let err = parse_edit_blocks(input).unwrap_err();
        assert_eq!(err.line, 5);
        assert!(err.message.contains("expected '======='"));
    }

    #[test]
    fn test_nested_search_marker() {
        let input = "a.txt\n```\n<<<<<<< SEARCH\na\n=======\n<<<<<<< SEARCH\n>>>>>>> REPLACE\n```\n";
        let err = parse_edit_blocks(input).unwrap_err();
        assert_eq!(err.line, 6);
    }

    #[test]
    fn test_unterminated_block() {
        let input = "a.txt\n```\n<<<<<<< SEARCH\na\n=======\nb\n";
        let err = parse_edit_blocks(input).unwrap_err();
        assert!(err.message.contains("unexpected end of input in REPLACE section"));

        let input = "a.txt\n```\n<<<<<<< SEARCH\na\n=======\nb\n>>>>>>> REPLACE\n";
        let err = parse_edit_blocks(input).unwrap_err();
        assert!(err.message.contains("unterminated edit block"));
    }

    #[test]
    fn test_stray_text_between_sections() {
        let input = "a.txt\n```\n<<<<<<< SEARCH\na\n=======\nb\n>>>>>>> REPLACE\nsome prose\n```\n";
        let err = parse_edit_blocks(input).unwrap_err();
        assert_eq!(err.line, 8);
    }

    #[test]
    fn test_empty_input() {
        let err = parse_edit_blocks("\n\n").unwrap_err();
        assert!(err.message.contains("no edit blocks found"));
    }

    #[test]
    fn test_block_without_sections() {
        let err = parse_edit_blocks("a.txt\n```\n```\n").unwrap_err();
        assert!(err.message.contains("no SEARCH/REPLACE section"));
    }
}
