//! # Patch Engine
//!
//! Applies parsed [`EditBlock`]s to files on disk.
//!
//! Every block is matched against the file as it is right before that block runs,
//! so later blocks for the same file see the effect of earlier ones. A block only
//! applies when its search text occurs exactly once; zero or several occurrences
//! leave the file untouched. A failing block does not undo earlier ones and does
//! not stop later ones. Each write goes to a temporary file in the target's
//! directory that is then renamed over the target.

use crate::diff::{FileDiff, unified_diff};
use crate::edit_block::EditBlock;
use crate::permissions;
use std::fmt::Write as _;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    /// The unique occurrence at byte `offset` was replaced.
    Applied {
        offset: usize,
        removed: usize,
        inserted: usize,
    },
    Created,
    /// The file already looks like the block wants it to.
    NoOp,
    /// `hint` points at a near match that differs only in whitespace.
    NotFound { hint: Option<String> },
    Ambiguous { occurrences: usize },
    /// A creation block targeted a non-empty file with different content.
    AlreadyExists,
    FileError(String),
    /// Cancelled before the block ran.
    Skipped,
}

impl PatchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            PatchOutcome::Applied { .. } | PatchOutcome::Created | PatchOutcome::NoOp
        )
    }

    fn label(&self) -> String {
        match self {
            PatchOutcome::Applied { .. } => "applied".to_string(),
            PatchOutcome::Created => "created".to_string(),
            PatchOutcome::NoOp => "already up to date".to_string(),
            PatchOutcome::NotFound { .. } => "SEARCH text not found".to_string(),
            PatchOutcome::Ambiguous { occurrences } => {
                format!("SEARCH text is ambiguous, it occurs {occurrences} times")
            }
            PatchOutcome::AlreadyExists => {
                "file already exists with different content, creation refused".to_string()
            }
            PatchOutcome::FileError(e) => format!("file error: {e}"),
            PatchOutcome::Skipped => "skipped, the edit was interrupted".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockResult {
    pub block: EditBlock,
    pub outcome: PatchOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchReport {
    pub results: Vec<BlockResult>,
    /// One diff per file that changed, original to final content.
    pub diffs: Vec<FileDiff>,
}

impl PatchReport {
    pub fn failures(&self) -> impl Iterator<Item = (usize, &BlockResult)> {
        self.results
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.outcome.is_success())
    }

    pub fn all_succeeded(&self) -> bool {
        self.failures().next().is_none()
    }

    pub fn succeeded_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.outcome.is_success())
            .count()
    }

    /// Report for the model: one line per block, then the text of every
    /// failed block so it can issue a corrected edit.
    pub fn summary(&self) -> String {
        let mut out = format!(
            "Applied {} of {} edit blocks.\n",
            self.succeeded_count(),
            self.results.len()
        );
        for (i, result) in self.results.iter().enumerate() {
            let _ = writeln!(
                out,
                "Block {} ({}): {}",
                i + 1,
                result.block.path,
                result.outcome.label()
            );
        }

        for (i, result) in self.failures() {
            if matches!(result.outcome, PatchOutcome::Skipped) {
                continue;
            }
            let _ = write!(
                out,
                "\nBlock {} failed for {}: {}.\nSEARCH text:\n```\n{}",
                i + 1,
                result.block.path,
                result.outcome.label(),
                result.block.search
            );
            if !result.block.search.ends_with('\n') {
                out.push('\n');
            }
            out.push_str("```\n");
            if let PatchOutcome::NotFound { hint: Some(hint) } = &result.outcome {
                let _ = writeln!(out, "{hint}");
            }
            if let PatchOutcome::Ambiguous { .. } = result.outcome {
                out.push_str("Add surrounding lines to the SEARCH text so it matches exactly once.\n");
            }
        }

        if !self.all_succeeded() {
            out.push_str("\nBlocks listed as applied are already on disk; do not resend them.\n");
        }
        out
    }

    pub fn combined_diff(&self) -> String {
        self.diffs
            .iter()
            .map(|d| d.unified.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Content of one touched file before the first block and after the last.
struct TouchedFile {
    path: PathBuf,
    display: String,
    original: String,
    current: String,
}

/// Applies `blocks` in order under `project_root`.
pub fn apply_blocks(
    project_root: &Path,
    blocks: &[EditBlock],
    cancel: Option<&CancellationToken>,
) -> PatchReport {
    let mut results = Vec::with_capacity(blocks.len());
    let mut touched: Vec<TouchedFile> = Vec::new();

    for block in blocks {
        if cancel.is_some_and(|c| c.is_cancelled()) {
            results.push(BlockResult {
                block: block.clone(),
                outcome: PatchOutcome::Skipped,
            });
            continue;
        }

        let outcome = match permissions::resolve_in_project(project_root, &block.path) {
            Ok(path) => apply_block(&path, block, &mut touched),
            Err(e) => PatchOutcome::FileError(e.to_string()),
        };

        match &outcome {
            PatchOutcome::Applied { offset, .. } => {
                tracing::debug!(path = %block.path, offset, "edit block applied");
            }
            PatchOutcome::Created => tracing::debug!(path = %block.path, "file created"),
            PatchOutcome::NoOp | PatchOutcome::Skipped => {}
            failure => {
                tracing::warn!(path = %block.path, outcome = %failure.label(), "edit block failed");
            }
        }

        results.push(BlockResult {
            block: block.clone(),
            outcome,
        });
    }

    let diffs = touched
        .iter()
        .map(|f| unified_diff(&f.display, &f.original, &f.current))
        .filter(|d| !d.is_empty())
        .collect();

    PatchReport { results, diffs }
}

fn apply_block(path: &Path, block: &EditBlock, touched: &mut Vec<TouchedFile>) -> PatchOutcome {
    let current = match fs::read_to_string(path) {
        Ok(content) => Some(content),
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => return PatchOutcome::FileError(format!("failed to read file: {e}")),
    };

    if block.is_creation() {
        return match current {
            None => {
                if let Some(parent) = path.parent() {
                    if let Err(e) = fs::create_dir_all(parent) {
                        return PatchOutcome::FileError(format!(
                            "failed to create parent directories: {e}"
                        ));
                    }
                }
                write_and_track(path, block, String::new(), touched, PatchOutcome::Created)
            }
            Some(existing) if existing == block.replace => PatchOutcome::NoOp,
            Some(existing) if existing.is_empty() => write_and_track(
                path,
                block,
                existing,
                touched,
                PatchOutcome::Applied {
                    offset: 0,
                    removed: 0,
                    inserted: block.replace.len(),
                },
            ),
            Some(_) => PatchOutcome::AlreadyExists,
        };
    }

    let Some(content) = current else {
        return PatchOutcome::FileError(
            "file does not exist; use an empty SEARCH section to create it".to_string(),
        );
    };

    let (occurrences, first) = count_occurrences(&content, &block.search);
    let (offset, search, replace) = match (occurrences, first) {
        _ if occurrences > 0 && block.search == block.replace => return PatchOutcome::NoOp,
        (1, Some(offset)) => (offset, block.search.as_str(), block.replace.as_str()),
        (0, _) | (_, None) => match match_at_eof(&content, &block.search, &block.replace) {
            Some(_) if block.search == block.replace => return PatchOutcome::NoOp,
            Some(found) => found,
            None => {
                return PatchOutcome::NotFound {
                    hint: whitespace_insensitive_hint(&content, &block.search),
                };
            }
        },
        (n, _) => return PatchOutcome::Ambiguous { occurrences: n },
    };

    let mut updated = String::with_capacity(content.len() + replace.len());
    updated.push_str(&content[..offset]);
    updated.push_str(replace);
    updated.push_str(&content[offset + search.len()..]);

    let applied = PatchOutcome::Applied {
        offset,
        removed: search.len(),
        inserted: replace.len(),
    };
    track(touched, path, block, content);
    match write_atomic(path, &updated) {
        Ok(()) => {
            set_current(touched, path, updated);
            applied
        }
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "failed to write file");
            PatchOutcome::FileError(format!("failed to write file: {e}"))
        }
    }
}

fn write_and_track(
    path: &Path,
    block: &EditBlock,
    original: String,
    touched: &mut Vec<TouchedFile>,
    outcome: PatchOutcome,
) -> PatchOutcome {
    track(touched, path, block, original);
    match write_atomic(path, &block.replace) {
        Ok(()) => {
            set_current(touched, path, block.replace.clone());
            outcome
        }
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "failed to write file");
            PatchOutcome::FileError(format!("failed to write file: {e}"))
        }
    }
}

/// Remembers a file's content before its first change.
fn track(touched: &mut Vec<TouchedFile>, path: &Path, block: &EditBlock, original: String) {
    if touched.iter().all(|f| f.path != path) {
        touched.push(TouchedFile {
            path: path.to_path_buf(),
            display: block.path.clone(),
            current: original.clone(),
            original,
        });
    }
}

fn set_current(touched: &mut [TouchedFile], path: &Path, content: String) {
    if let Some(file) = touched.iter_mut().find(|f| f.path == path) {
        file.current = content;
    }
}

/// Counts occurrences of `needle`, overlapping ones included, and returns the
/// byte offset of the first.
pub fn count_occurrences(haystack: &str, needle: &str) -> (usize, Option<usize>) {
    if needle.is_empty() {
        return (0, None);
    }
    let mut count = 0;
    let mut first = None;
    let mut start = 0;
    while let Some(pos) = haystack[start..].find(needle) {
        let at = start + pos;
        first.get_or_insert(at);
        count += 1;
        // Step one char past the match start so overlapping matches count.
        let step = haystack[at..].chars().next().map_or(1, char::len_utf8);
        start = at + step;
    }
    (count, first)
}

/// Parsed SEARCH lines always end in a newline, so the last line of a file
/// without one never matches exactly. This retries with the final newline
/// dropped from both texts and accepts a unique match that ends the file.
fn match_at_eof<'a>(
    content: &str,
    search: &'a str,
    replace: &'a str,
) -> Option<(usize, &'a str, &'a str)> {
    if content.ends_with('\n') {
        return None;
    }
    let search = search.strip_suffix('\n').filter(|s| !s.is_empty())?;
    let (occurrences, first) = count_occurrences(content, search);
    let offset = first.filter(|at| occurrences == 1 && at + search.len() == content.len())?;
    Some((offset, search, replace.strip_suffix('\n').unwrap_or(replace)))
}

/// Looks for the search lines in `content` ignoring indentation and trailing
/// whitespace, and describes where they are.
fn whitespace_insensitive_hint(content: &str, search: &str) -> Option<String> {
    let wanted: Vec<&str> = search.lines().map(str::trim).collect();
    if wanted.iter().all(|l| l.is_empty()) {
        return None;
    }
    let lines: Vec<&str> = content.lines().map(str::trim).collect();
    if wanted.len() > lines.len() {
        return None;
    }
    let start = lines
        .windows(wanted.len())
        .position(|window| window == wanted.as_slice())?;
    Some(format!(
        "Lines {}-{} match when whitespace is ignored; copy them exactly, including indentation.",
        start + 1,
        start + wanted.len()
    ))
}

/// Writes `content` to `path` through a temporary file in the same directory,
/// keeping the original permissions.
pub fn write_atomic(path: &Path, content: &str) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file().sync_all()?;
    if let Ok(metadata) = fs::metadata(path) {
        tmp.as_file().set_permissions(metadata.permissions())?;
    }
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
