use crate::{
    permissions,
    tools::{
        ParamSpec, ParamType, Tool, ToolContext, ToolOutput, ToolSpec, grep_search::project_files,
        parse_args,
    },
};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Value, json};
use std::fs;

const MAX_FILES: usize = 50;
const MAX_LINES_PER_FILE: usize = 20;

#[derive(Deserialize, Debug)]
pub struct SearchFilesArgs {
    pub pattern: String,
    pub directory: String,
}

pub struct SearchFilesTool;

#[async_trait]
impl Tool for SearchFilesTool {
    fn name(&self) -> &'static str {
        "search_files"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "search_files",
            "Finds files whose name matches a regular expression and shows the lines inside them that match it too. Useful to locate a module, test or config file by name.",
            vec![
                ParamSpec::required(
                    "pattern",
                    ParamType::String,
                    "Regular expression matched against file names and file contents.",
                ),
                ParamSpec::optional(
                    "directory",
                    ParamType::String,
                    "Directory to search in, relative to the project root.",
                )
                .with_default(json!(".")),
            ],
        )
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let args: SearchFilesArgs = parse_args(args)?;
        execute_search_files(&args, ctx).map(ToolOutput::text)
    }
}

pub fn execute_search_files(args: &SearchFilesArgs, ctx: &ToolContext) -> Result<String> {
    let regex =
        Regex::new(&args.pattern).map_err(|e| anyhow!("Invalid regex '{}': {e}", args.pattern))?;
    let start = permissions::resolve_in_project(&ctx.project_root, &args.directory)?;
    if !start.is_dir() {
        return Err(anyhow!(
            "Error: The provided path '{}' is not a directory.",
            args.directory
        ));
    }

    let matching: Vec<_> = project_files(&start, &ctx.config.ignored_dirs)
        .into_iter()
        .filter(|path| {
            path.file_name()
                .is_some_and(|name| regex.is_match(&name.to_string_lossy()))
        })
        .collect();

    if matching.is_empty() {
        return Ok(format!(
            "No files matching '{}' found in '{}'.",
            args.pattern, args.directory
        ));
    }

    let mut out = format!("Found {} matching file(s):\n", matching.len());
    for path in matching.iter().take(MAX_FILES) {
        out.push_str(&permissions::display_relative(&ctx.project_root, path));
        out.push('\n');
        let Ok(content) = fs::read_to_string(path) else {
            continue;
        };
        let hits: Vec<_> = content
            .lines()
            .enumerate()
            .filter(|(_, line)| regex.is_match(line))
            .collect();
        for (i, line) in hits.iter().take(MAX_LINES_PER_FILE) {
            out.push_str(&format!("  {}: {}\n", i + 1, line.trim_end()));
        }
        if hits.len() > MAX_LINES_PER_FILE {
            out.push_str(&format!(
                "  ... {} more matching lines\n",
                hits.len() - MAX_LINES_PER_FILE
            ));
        }
    }
    if matching.len() > MAX_FILES {
        out.push_str(&format!(
            "... {} more files not shown\n",
            matching.len() - MAX_FILES
        ));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::setup_project;

    fn search(ctx: &ToolContext, pattern: &str, directory: &str) -> Result<String> {
        execute_search_files(
            &SearchFilesArgs {
                pattern: pattern.to_string(),
                directory: directory.to_string(),
            },
            ctx,
        )
    }

    #[test]
    fn test_matches_file_names_and_lines() {
        let (_tmp, ctx) = setup_project("test-search-files-");
        let root = &ctx.project_root;
        fs::create_dir_all(root.join("src/config")).unwrap();
        fs::write(root.join("src/config/config.rs"), "// config loader\nfn load() {}\n").unwrap();
        fs::write(root.join("src/main.rs"), "mod config;\n").unwrap();
        fs::create_dir_all(root.join(".hidden")).unwrap();
        fs::write(root.join(".hidden/config.txt"), "config").unwrap();

        let out = search(&ctx, "config", ".").unwrap();
        assert!(out.starts_with("Found 1 matching file(s):"));
        assert!(out.contains("src/config/config.rs\n  1: // config loader\n"));
        assert!(!out.contains("main.rs"));
        assert!(!out.contains(".hidden"));
    }

    #[test]
    fn test_limits_to_directory() {
        let (_tmp, ctx) = setup_project("test-search-files-");
        let root = &ctx.project_root;
        fs::create_dir_all(root.join("a")).unwrap();
        fs::create_dir_all(root.join("b")).unwrap();
        fs::write(root.join("a/test_one.rs"), "").unwrap();
        fs::write(root.join("b/test_two.rs"), "").unwrap();

        let out = search(&ctx, r"^test_", "b").unwrap();
        assert!(out.contains("b/test_two.rs"));
        assert!(!out.contains("a/test_one.rs"));
    }

    #[test]
    fn test_no_match() {
        let (_tmp, ctx) = setup_project("test-search-files-");
        let out = search(&ctx, "zzz", ".").unwrap();
        assert!(out.starts_with("No files matching"));
    }
}
