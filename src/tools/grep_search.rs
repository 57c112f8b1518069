use crate::{
    permissions,
    tools::{ParamSpec, ParamType, Tool, ToolContext, ToolOutput, ToolSpec, parse_args},
};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use ignore::{WalkBuilder, overrides::OverrideBuilder};
use regex::Regex;
use serde::Deserialize;
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};

const MAX_MATCHES: usize = 200;
const MAX_LINE_CHARS: usize = 300;

#[derive(Deserialize, Debug)]
pub struct GrepSearchArgs {
    pub pattern: String,
    pub file_pattern: String,
}

pub struct GrepSearchTool;

#[async_trait]
impl Tool for GrepSearchTool {
    fn name(&self) -> &'static str {
        "grep_search"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "grep_search",
            "Searches file contents across the project with a regular expression. Respects .gitignore and skips hidden and ignored directories. Prints `path:line: text` for each match.",
            vec![
                ParamSpec::required(
                    "pattern",
                    ParamType::String,
                    "Regular expression (Rust regex syntax) to search for.",
                ),
                ParamSpec::optional(
                    "file_pattern",
                    ParamType::String,
                    "Glob restricting which file names are searched, e.g. `*.rs`.",
                )
                .with_default(json!("*")),
            ],
        )
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let args: GrepSearchArgs = parse_args(args)?;
        execute_grep_search(&args, ctx).map(ToolOutput::text)
    }
}

/// Files under `start`, gitignore-aware, without hidden or ignored directories.
/// Sorted by path.
pub(crate) fn project_files(start: &Path, ignored_dirs: &[String]) -> Vec<PathBuf> {
    let ignored = ignored_dirs.to_vec();
    let mut files: Vec<PathBuf> = WalkBuilder::new(start)
        .hidden(true)
        .git_ignore(true)
        .require_git(false)
        .filter_entry(move |entry| {
            let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
            !(is_dir && ignored.iter().any(|d| entry.file_name() == d.as_str()))
        })
        .build()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::debug!(error = %e, "skipping unreadable entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}

fn truncate_line(line: &str) -> String {
    if line.chars().count() > MAX_LINE_CHARS {
        let cut: String = line.chars().take(MAX_LINE_CHARS).collect();
        format!("{cut}...")
    } else {
        line.to_string()
    }
}

pub fn execute_grep_search(args: &GrepSearchArgs, ctx: &ToolContext) -> Result<String> {
    let regex =
        Regex::new(&args.pattern).map_err(|e| anyhow!("Invalid regex '{}': {e}", args.pattern))?;
    let glob = {
        let mut builder = OverrideBuilder::new(&ctx.project_root);
        builder
            .add(&args.file_pattern)
            .map_err(|e| anyhow!("Invalid file pattern '{}': {e}", args.file_pattern))?;
        builder.build()?
    };
    let mut matches = Vec::new();
    let mut truncated = false;
    'files: for path in project_files(&ctx.project_root, &ctx.config.ignored_dirs) {
        if ctx.cancel.is_cancelled() {
            return Err(anyhow!("Search interrupted."));
        }
        let Some(file_name) = path.file_name() else {
            continue;
        };
        if !glob.matched(Path::new(file_name), false).is_whitelist() {
            continue;
        }
        // Binary and non-UTF-8 files are skipped.
        let Ok(content) = fs::read_to_string(&path) else {
            continue;
        };
        let display = permissions::display_relative(&ctx.project_root, &path);
        for (i, line) in content.lines().enumerate() {
            if regex.is_match(line) {
                if matches.len() == MAX_MATCHES {
                    truncated = true;
                    break 'files;
                }
                matches.push(format!("{}:{}: {}", display, i + 1, truncate_line(line)));
            }
        }
    }

    if matches.is_empty() {
        return Ok("No matches found.".to_string());
    }
    let mut out = matches.join("\n");
    if truncated {
        out.push_str(&format!(
            "\n[Stopped after {MAX_MATCHES} matches. Narrow the pattern or file_pattern.]"
        ));
    }
    Ok(out)
}
