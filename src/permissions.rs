use anyhow::{Result, anyhow};
use std::path::{Component, Path, PathBuf};

/// Resolves a tool-supplied path against the project root and checks that it
/// stays inside it.
///
/// This function is the single source of truth for all file system permissions.
/// It handles two cases:
/// 1. If the path exists, it is canonicalized (following symlinks) and must lie
///    within the canonical project root.
/// 2. If the path does not exist (e.g., for file creation), its nearest existing
///    ancestor is canonicalized instead and the missing components are appended.
///
/// `.` and `..` are folded lexically before anything is resolved.
///
/// # Arguments
/// * `project_root` - The canonical project root.
/// * `path` - The path to resolve, relative to the root or absolute.
///
/// # Returns
/// * `Ok(PathBuf)` with the resolved absolute path.
/// * `Err(anyhow::Error)` if the path escapes the project root or cannot be resolved.
pub fn resolve_in_project(project_root: &Path, path: &str) -> Result<PathBuf> {
    if path.trim().is_empty() {
        return Err(anyhow!("Path must not be empty."));
    }
    let candidate = normalize_lexically(&project_root.join(path));

    let mut existing = candidate.as_path();
    let mut missing: Vec<&std::ffi::OsStr> = Vec::new();
    while !existing.exists() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name);
                existing = parent;
            }
            _ => {
                return Err(anyhow!(
                    "Failed to resolve path '{path}': no existing ancestor directory."
                ));
            }
        }
    }

    let mut resolved = existing.canonicalize().map_err(|e| {
        anyhow!(
            "Failed to resolve path '{}': {}. It might not exist or there's a permission issue.",
            existing.display(),
            e
        )
    })?;
    for name in missing.iter().rev() {
        resolved.push(name);
    }

    if !resolved.starts_with(project_root) {
        return Err(anyhow!(
            "Operation on path '{path}' is not allowed. It's not within the project directory."
        ));
    }

    Ok(resolved)
}

/// Folds `.` and `..` components without touching the file system.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized
}

/// The path relative to the project root, for display.
pub fn display_relative(project_root: &Path, path: &Path) -> String {
    path.strip_prefix(project_root)
        .unwrap_or(path)
        .display()
        .to_string()
}
