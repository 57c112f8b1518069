use crate::{
    permissions,
    tools::{ParamSpec, ParamType, Tool, ToolContext, ToolOutput, ToolSpec, parse_args},
};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::fs;

#[derive(Deserialize, Debug)]
pub struct ReadFileArgs {
    pub filename: String,
    pub start_line: Option<usize>,
    pub end_line: Option<usize>,
}

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &'static str {
        "read_file"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "read_file",
            r#"Reads a text file from the project, optionally a line range.
Each output line is prefixed with its 1-based line number and a tab. The line numbers are for orientation only: never include them in the SEARCH text of an edit.
Do not re-read a file whose current content is already in the conversation."#,
            vec![
                ParamSpec::required(
                    "filename",
                    ParamType::String,
                    "Path of the file, relative to the project root.",
                ),
                ParamSpec::optional(
                    "start_line",
                    ParamType::Integer,
                    "1-based first line to read (inclusive).",
                ),
                ParamSpec::optional(
                    "end_line",
                    ParamType::Integer,
                    "1-based last line to read (inclusive).",
                ),
            ],
        )
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let args: ReadFileArgs = parse_args(args)?;
        execute_read_file(&args, ctx).map(ToolOutput::text)
    }
}

pub fn execute_read_file(args: &ReadFileArgs, ctx: &ToolContext) -> Result<String> {
    let path = permissions::resolve_in_project(&ctx.project_root, &args.filename)?;
    if !path.is_file() {
        return Err(anyhow!(
            "Path '{}' is not a file or does not exist.",
            args.filename
        ));
    }
    let content = fs::read_to_string(&path)
        .map_err(|e| anyhow!("Failed to read '{}': {}", args.filename, e))?;

    let lines: Vec<&str> = content.lines().collect();
    let total = lines.len();
    if total == 0 {
        return Ok(format!("File: {} (empty)", args.filename));
    }

    let start = args.start_line.unwrap_or(1).max(1);
    if start > total {
        return Err(anyhow!(
            "start_line {start} is beyond the end of '{}' ({total} lines).",
            args.filename
        ));
    }
    let requested_end = args.end_line.unwrap_or(total).min(total);
    if requested_end < start {
        return Err(anyhow!(
            "end_line {requested_end} is before start_line {start}."
        ));
    }
    let max_lines = ctx.config.max_read_lines.max(1) as usize;
    let end = requested_end.min(start + max_lines - 1);

    let mut out = format!(
        "File: {} (Lines {}-{} of {})\n",
        args.filename, start, end, total
    );
    for (i, line) in lines[start - 1..end].iter().enumerate() {
        out.push_str(&format!("{}\t{}\n", start + i, line));
    }
    if end < requested_end {
        out.push_str(&format!(
            "[Output truncated at {max_lines} lines. Read from line {} to continue.]\n",
            end + 1
        ));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::tools::test_support::setup_project;
    use std::sync::Arc;

    fn args(filename: &str, start_line: Option<usize>, end_line: Option<usize>) -> ReadFileArgs {
        ReadFileArgs {
            filename: filename.to_string(),
            start_line,
            end_line,
        }
    }

    #[test]
    fn test_read_whole_file() {
        let (_tmp, ctx) = setup_project("test-read-");
        fs::write(ctx.project_root.join("a.txt"), "one\ntwo\nthree\n").unwrap();

        let out = execute_read_file(&args("a.txt", None, None), &ctx).unwrap();
        assert_eq!(out, "File: a.txt (Lines 1-3 of 3)\n1\tone\n2\ttwo\n3\tthree\n");
    }

    #[test]
    fn test_read_range() {
        let (_tmp, ctx) = setup_project("test-read-");
        fs::write(ctx.project_root.join("a.txt"), "one\ntwo\nthree\nfour\n").unwrap();

        let out = execute_read_file(&args("a.txt", Some(2), Some(3)), &ctx).unwrap();
        assert!(out.starts_with("File: a.txt (Lines 2-3 of 4)"));
        assert!(out.contains("2\ttwo\n3\tthree\n"));
        assert!(!out.contains("four"));
    }

    #[test]
    fn test_invalid_ranges() {
        let (_tmp, ctx) = setup_project("test-read-");
        fs::write(ctx.project_root.join("a.txt"), "one\ntwo\n").unwrap();

        let err = execute_read_file(&args("a.txt", Some(5), None), &ctx).unwrap_err();
        assert!(err.to_string().contains("beyond the end"));

        let err = execute_read_file(&args("a.txt", Some(2), Some(1)), &ctx).unwrap_err();
        assert!(err.to_string().contains("before start_line"));
    }

    #[test]
    fn test_truncates_at_max_read_lines() {
        let (_tmp, mut ctx) = setup_project("test-read-");
        ctx.config = Arc::new(Config {
            max_read_lines: 2,
            ..Config::default()
        });
        fs::write(ctx.project_root.join("a.txt"), "1\n2\n3\n4\n").unwrap();

        let out = execute_read_file(&args("a.txt", None, None), &ctx).unwrap();
        assert!(out.starts_with("File: a.txt (Lines 1-2 of 4)"));
        assert!(out.contains("Read from line 3 to continue"));
    }

    #[test]
    fn test_missing_and_outside_files() {
        let (_tmp, ctx) = setup_project("test-read-");
        let err = execute_read_file(&args("nope.txt", None, None), &ctx).unwrap_err();
        assert!(err.to_string().contains("does not exist"));

        let err = execute_read_file(&args("../../etc/passwd", None, None), &ctx).unwrap_err();
        assert!(err.to_string().contains("is not allowed"));
    }
}
