use crate::{
    permissions,
    tools::{ParamSpec, ParamType, Tool, ToolContext, ToolOutput, ToolSpec, parse_args},
};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::fs;

#[derive(Deserialize, Debug)]
pub struct ListFilesArgs {
    pub directory_path: String,
}

pub struct ListFilesTool;

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &'static str {
        "list_files"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "list_files",
            "Lists the direct entries of a project directory (not recursive): directories first, then files, with line counts and sizes. Configured ignored directories such as .git and node_modules are left out.",
            vec![
                ParamSpec::optional(
                    "directory_path",
                    ParamType::String,
                    "Directory to list, relative to the project root.",
                )
                .with_default(json!(".")),
            ],
        )
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let args: ListFilesArgs = parse_args(args)?;
        execute_list_files(&args, ctx).map(ToolOutput::text)
    }
}

struct Entry {
    name: String,
    is_dir: bool,
    lines: Option<usize>,
    size: u64,
}

pub fn execute_list_files(args: &ListFilesArgs, ctx: &ToolContext) -> Result<String> {
    let path = permissions::resolve_in_project(&ctx.project_root, &args.directory_path)?;
    if !path.is_dir() {
        return Err(anyhow!(
            "Error: The provided path '{}' is not a directory.",
            args.directory_path
        ));
    }

    let mut entries = Vec::new();
    for dir_entry in fs::read_dir(&path)? {
        let dir_entry = dir_entry?;
        let name = dir_entry.file_name().to_string_lossy().to_string();
        let metadata = dir_entry.metadata()?;
        let is_dir = metadata.is_dir();
        if is_dir && ctx.config.ignored_dirs.iter().any(|d| *d == name) {
            continue;
        }
        let lines = if is_dir {
            None
        } else {
            fs::read_to_string(dir_entry.path())
                .ok()
                .map(|content| content.lines().count())
        };
        entries.push(Entry {
            name,
            is_dir,
            lines,
            size: metadata.len(),
        });
    }

    if entries.is_empty() {
        return Ok(format!(
            "# No entries found in '{}'. It might be empty or all entries are ignored.",
            args.directory_path
        ));
    }

    entries.sort_by(|a, b| {
        b.is_dir
            .cmp(&a.is_dir)
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
    });

    let dirs = entries.iter().filter(|e| e.is_dir).count();
    let width = entries
        .iter()
        .map(|e| e.name.len() + usize::from(e.is_dir))
        .max()
        .unwrap_or(0)
        .max(4);

    let mut out = format!(
        "Contents of '{}' ({} directories, {} files):\n",
        args.directory_path,
        dirs,
        entries.len() - dirs
    );
    out.push_str(&format!(
        "{:<width$}  {:<4}  {:>7}  {:>9}\n",
        "NAME", "TYPE", "LINES", "SIZE"
    ));
    for entry in &entries {
        let (name, kind, lines, size) = if entry.is_dir {
            (format!("{}/", entry.name), "dir", "-".to_string(), "-".to_string())
        } else {
            (
                entry.name.clone(),
                "file",
                entry
                    .lines
                    .map_or_else(|| "-".to_string(), |n| n.to_string()),
                human_size(entry.size),
            )
        };
        out.push_str(&format!(
            "{name:<width$}  {kind:<4}  {lines:>7}  {size:>9}\n"
        ));
    }
    Ok(out)
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::setup_project;

    fn list(ctx: &ToolContext, dir: &str) -> Result<String> {
        execute_list_files(
            &ListFilesArgs {
                directory_path: dir.to_string(),
            },
            ctx,
        )
    }

    #[test]
    fn test_directories_first_then_files() {
        let (_tmp, ctx) = setup_project("test-list-files-");
        let root = &ctx.project_root;
        fs::write(root.join("b.txt"), "1\n2\n").unwrap();
        fs::write(root.join("A.md"), "x").unwrap();
        fs::create_dir(root.join("src")).unwrap();
        fs::write(root.join("src/nested.rs"), "fn f() {}").unwrap();

        let out = list(&ctx, ".").unwrap();
        let src = out.find("src/").unwrap();
        let a = out.find("A.md").unwrap();
        let b = out.find("b.txt").unwrap();
        assert!(src < a && a < b);
        assert!(out.contains("(1 directories, 2 files)"));
        assert!(!out.contains("nested.rs"), "listing must not recurse");
    }

    #[test]
    fn test_line_counts_and_sizes() {
        let (_tmp, ctx) = setup_project("test-list-files-");
        fs::write(ctx.project_root.join("b.txt"), "1\n2\n").unwrap();

        let out = list(&ctx, ".").unwrap();
        let row = out.lines().find(|l| l.starts_with("b.txt")).unwrap();
        assert!(row.contains("file"));
        assert!(row.contains(" 2 "));
        assert!(row.ends_with("4 B"));
    }

    #[test]
    fn test_skips_ignored_dirs() {
        let (_tmp, ctx) = setup_project("test-list-files-");
        fs::create_dir(ctx.project_root.join(".git")).unwrap();
        fs::create_dir(ctx.project_root.join("node_modules")).unwrap();

        let out = list(&ctx, ".").unwrap();
        assert!(out.contains("No entries found"));
    }

    #[test]
    fn test_not_a_directory() {
        let (_tmp, ctx) = setup_project("test-list-files-");
        fs::write(ctx.project_root.join("file.txt"), "x").unwrap();

        let err = list(&ctx, "file.txt").unwrap_err();
        assert!(err.to_string().contains("is not a directory"));
    }

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(12), "12 B");
        assert_eq!(human_size(2048), "2.0 KB");
        assert_eq!(human_size(5 * 1024 * 1024), "5.0 MB");
    }
}
