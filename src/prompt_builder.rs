use crate::config::Config;
use crate::edit_block::{DIVIDER_MARKER, REPLACE_MARKER, SEARCH_MARKER};
use std::path::Path;

/// Builds the system prompt for a session. The result is fixed for the
/// lifetime of the session and is what `:clear` falls back to.
pub fn build_system_prompt(project_root: &Path, config: &Config, tool_names: &[&str]) -> String {
    let mut prompt = format!(
        "\
You are a coding assistant working inside the project at `{root}`.
You can inspect and change the project with these tools: {tools}.

Rules:
- All paths are relative to the project root. Paths outside it are refused.
- Read a file before you edit it, and quote the SEARCH text exactly as it appears.
- Prefer small, targeted edits over rewriting whole files.
- When a tool fails, read its error and fix the call instead of repeating it.
- When the task is done, answer in plain text without calling a tool.

Editing files:
Use `edit_file` with one or more edit blocks. Each block is a file path on its own
line, an opening code fence, one or more SEARCH/REPLACE sections, and a closing fence:

path/to/file.rs
```rust
{search}
exact lines to find
{divider}
lines to put in their place
{replace}
```

- The SEARCH text must occur exactly once in the file. Include enough surrounding
  lines to make it unique.
- An empty SEARCH section creates a new file with the REPLACE text.
- An empty REPLACE section deletes the SEARCH text.
- Blocks are applied in order; a failed block does not undo the blocks before it.",
        root = project_root.display(),
        tools = tool_names.join(", "),
        search = SEARCH_MARKER,
        divider = DIVIDER_MARKER,
        replace = REPLACE_MARKER,
    );

    if let Some(extra) = &config.system_prompt {
        prompt.push_str("\n\nAdditional instructions:\n");
        prompt.push_str(extra.trim());
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edit_block::parse_edit_blocks;

    #[test]
    fn test_prompt_mentions_root_and_tools() {
        let prompt = build_system_prompt(
            Path::new("/work/app"),
            &Config::default(),
            &["edit_file", "read_file"],
        );
        assert!(prompt.contains("`/work/app`"));
        assert!(prompt.contains("edit_file, read_file"));
        assert!(!prompt.contains("Additional instructions"));
    }

    #[test]
    fn test_example_block_is_valid() {
        let prompt = build_system_prompt(Path::new("/p"), &Config::default(), &[]);
        let start = prompt.find("path/to/file.rs").unwrap();
        let end = prompt.rfind("```").unwrap() + 3;
        let blocks = parse_edit_blocks(&format!("{}\n", &prompt[start..end])).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].search, "exact lines to find\n");
    }

    #[test]
    fn test_extra_instructions_are_appended() {
        let config = Config {
            system_prompt: Some("Always write tests.\n".to_string()),
            ..Config::default()
        };
        let prompt = build_system_prompt(Path::new("/p"), &config, &[]);
        assert!(prompt.ends_with("Additional instructions:\nAlways write tests."));
    }
}
