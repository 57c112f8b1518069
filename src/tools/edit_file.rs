//! # Edit File Tool
//!
//! Model-facing wrapper around the patch engine. The model sends SEARCH/REPLACE
//! edit blocks as one string; they are parsed strictly, applied in order, and the
//! result lists every block's outcome plus a unified diff per changed file.

use crate::{
    edit_block::{DIVIDER_MARKER, REPLACE_MARKER, SEARCH_MARKER, parse_edit_blocks},
    patch::apply_blocks,
    tools::{ParamSpec, ParamType, Tool, ToolContext, ToolOutput, ToolSpec, parse_args},
};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

#[derive(Deserialize, Debug)]
pub struct EditFileArgs {
    pub edits: String,
}

pub struct EditFileTool;

fn description() -> String {
    format!(
        r#"Edits or creates files with SEARCH/REPLACE blocks. Format:

path/to/file.ext
```language
{SEARCH_MARKER}
exact existing lines
{DIVIDER_MARKER}
replacement lines
{REPLACE_MARKER}
```

Rules:
- The SEARCH text must match the current file exactly, character for character, including indentation and blank lines, and must occur exactly once. Include enough surrounding lines to make it unique.
- Several SEARCH/REPLACE sections may follow each other inside one fence; they apply top to bottom, each to the result of the previous one.
- To create a new file, leave the SEARCH section empty. Creation never overwrites an existing file.
- To delete code, leave the REPLACE section empty.
- Blocks that fail are reported individually; blocks that succeeded stay applied. Only resend the failed ones."#
    )
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &'static str {
        "edit_file"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "edit_file",
            &description(),
            vec![ParamSpec::required(
                "edits",
                ParamType::String,
                "One or more fenced SEARCH/REPLACE edit blocks, each preceded by its file path.",
            )],
        )
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let args: EditFileArgs = parse_args(args)?;
        let blocks = parse_edit_blocks(&args.edits)?;

        let root = ctx.project_root.clone();
        let cancel = ctx.cancel.clone();
        let report =
            tokio::task::spawn_blocking(move || apply_blocks(&root, &blocks, Some(&cancel)))
                .await
                .map_err(|e| anyhow!("Edit task failed: {e}"))?;

        let mut content = report.summary();
        let diff = report.combined_diff();
        if !diff.is_empty() {
            content.push_str("\nDiff of the changes now on disk:\n");
            content.push_str(&diff);
        }

        Ok(ToolOutput {
            content,
            success: report.all_succeeded(),
            data: Some(json!({
                "applied": report.succeeded_count(),
                "failed": report.failures().count(),
                "files_changed": report.diffs.iter().map(|d| d.path.clone()).collect::<Vec<_>>(),
            })),
            side_effect: (!diff.is_empty()).then_some(diff),
        })
    }

    fn is_mutating(&self) -> bool {
        true
    }
}
