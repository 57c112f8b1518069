//! # Edit File Tests

use super::{EditFileTool, Tool, ToolContext, test_support::setup_project};
use std::fs;

// Helper to write a file into the test project and return a context for it.
fn setup_file(content: &str) -> (tempfile::TempDir, ToolContext) {
    let (tmp_dir, ctx) = setup_project("test-edit-");
    fs::write(ctx.project_root.join("test.txt"), content).unwrap();
    (tmp_dir, ctx)
}

fn edit_args(edits: &str) -> serde_json::Value {
    serde_json::json!({ "edits": edits })
}

#[tokio::test]
async fn test_execute_replace_successfully() {
    let (_tmp_dir, ctx) = setup_file("line 1\nline 2\nline 3\nline 4\n");
    let edits = "test.txt\n```\n<<<<<<< SEARCH\nline 2\nline 3\n=======\nnew middle\n>>>>>>> REPLACE\n```\n";

    let output = EditFileTool.execute(&edit_args(edits), &ctx).await.unwrap();

    assert!(output.success);
    assert!(output.content.starts_with("Applied 1 of 1 edit blocks."));
    assert!(output.content.contains("+new middle"));
    let final_content = fs::read_to_string(ctx.project_root.join("test.txt")).unwrap();
    assert_eq!(final_content, "line 1\nnew middle\nline 4\n");
}

#[tokio::test]
async fn test_execute_delete_successfully() {
    let (_tmp_dir, ctx) = setup_file("line 1\nline 2\nline 3\n");
    let edits = "test.txt\n```\n<<<<<<< SEARCH\nline 2\n=======\n>>>>>>> REPLACE\n```\n";

    EditFileTool.execute(&edit_args(edits), &ctx).await.unwrap();

    let final_content = fs::read_to_string(ctx.project_root.join("test.txt")).unwrap();
    assert_eq!(final_content, "line 1\nline 3\n");
}

#[tokio::test]
async fn test_execute_creates_file_in_new_directory() {
    let (_tmp_dir, ctx) = setup_project("test-edit-");
    let edits = "src/bin/tool.rs\n```rust\n<<<<<<< SEARCH\n=======\nfn main() {}\n>>>>>>> REPLACE\n```\n";

    let output = EditFileTool.execute(&edit_args(edits), &ctx).await.unwrap();

    assert!(output.success);
    let created = fs::read_to_string(ctx.project_root.join("src/bin/tool.rs")).unwrap();
    assert_eq!(created, "fn main() {}\n");
    assert_eq!(output.data.unwrap()["files_changed"][0], "src/bin/tool.rs");
}

#[tokio::test]
async fn test_execute_edits_several_files() {
    let (_tmp_dir, ctx) = setup_file("alpha\n");
    fs::write(ctx.project_root.join("other.txt"), "beta\n").unwrap();
    let edits = "\
test.txt
```
<<<<<<< SEARCH
alpha
=======
ALPHA
>>>>>>> REPLACE
```

other.txt
```
<<<<<<< SEARCH
beta
=======
BETA
>>>>>>> REPLACE
```
";

    let output = EditFileTool.execute(&edit_args(edits), &ctx).await.unwrap();

    assert!(output.success);
    assert_eq!(
        fs::read_to_string(ctx.project_root.join("test.txt")).unwrap(),
        "ALPHA\n"
    );
    assert_eq!(
        fs::read_to_string(ctx.project_root.join("other.txt")).unwrap(),
        "BETA\n"
    );
    let side_effect = output.side_effect.unwrap();
    assert!(side_effect.contains("a/test.txt"));
    assert!(side_effect.contains("a/other.txt"));
}

#[tokio::test]
async fn test_partial_failure_is_reported_not_raised() {
    let (_tmp_dir, ctx) = setup_file("one\ntwo\none\n");
    let edits = "\
test.txt
```
<<<<<<< SEARCH
two
=======
2
>>>>>>> REPLACE

<<<<<<< SEARCH
one
=======
1
>>>>>>> REPLACE
```
";

    let output = EditFileTool.execute(&edit_args(edits), &ctx).await.unwrap();

    assert!(!output.success);
    assert!(output.content.contains("Block 1 (test.txt): applied"));
    assert!(output.content.contains("occurs 2 times"));
    let final_content = fs::read_to_string(ctx.project_root.join("test.txt")).unwrap();
    assert_eq!(final_content, "one\n2\none\n");
}

#[tokio::test]
async fn test_malformed_edits_change_nothing() {
    let (_tmp_dir, ctx) = setup_file("line 1\n");
    let edits = "test.txt\n```\n<<<<<<< SEARCH\nline 1\n=======\nline one\n```\n";

    let result = EditFileTool.execute(&edit_args(edits), &ctx).await;

    let error_string = result.unwrap_err().to_string();
    assert!(error_string.contains("malformed edit block"));
    let final_content = fs::read_to_string(ctx.project_root.join("test.txt")).unwrap();
    assert_eq!(final_content, "line 1\n");
}

#[tokio::test]
async fn test_edit_outside_project_is_refused() {
    let (tmp_dir, ctx) = setup_project("test-edit-");
    let edits = "../escape.txt\n```\n<<<<<<< SEARCH\n=======\nnope\n>>>>>>> REPLACE\n```\n";

    let output = EditFileTool.execute(&edit_args(edits), &ctx).await.unwrap();

    assert!(!output.success);
    assert!(output.content.contains("is not allowed"));
    assert!(!tmp_dir.path().parent().unwrap().join("escape.txt").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancelled_edit_skips_every_block() {
    let (_tmp_dir, ctx) = setup_file("line 1\n");
    let ctx = ctx.with_cancel(tokio_util::sync::CancellationToken::new());
    ctx.cancel.cancel();
    let edits = "test.txt\n```\n<<<<<<< SEARCH\nline 1\n=======\nline one\n>>>>>>> REPLACE\n```\n";

    let output = EditFileTool.execute(&edit_args(edits), &ctx).await.unwrap();

    assert!(!output.success);
    assert!(output.content.contains("skipped, the edit was interrupted"));
    let final_content = fs::read_to_string(ctx.project_root.join("test.txt")).unwrap();
    assert_eq!(final_content, "line 1\n");
}
