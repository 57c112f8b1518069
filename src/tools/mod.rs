//! # Tool Trait
//!
//! This module defines the core `Tool` trait that all tools in the application must implement,
//! together with the context they run in and the explicit table of built-in tools.
//!
//! Tools never see raw model output: the registry validates arguments against the tool's
//! [`ToolSpec`] first and hands `execute` an object with defaults filled in.

use crate::config::Config;
use anyhow::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub mod edit_file;
pub mod exec_shell;
pub mod grep_search;
pub mod list_files;
pub mod read_file;
pub mod search_files;
pub mod spec;

pub use self::edit_file::EditFileTool;
pub use self::exec_shell::ExecShellTool;
pub use self::grep_search::GrepSearchTool;
pub use self::list_files::ListFilesTool;
pub use self::read_file::ReadFileTool;
pub use self::search_files::SearchFilesTool;
pub use self::spec::{ParamSpec, ParamType, ToolSpec};

/// Everything a tool may touch while it runs.
#[derive(Clone)]
pub struct ToolContext {
    /// Canonical project root. All tool paths resolve inside it.
    pub project_root: PathBuf,
    pub config: Arc<Config>,
    /// Cancelled when the user interrupts the turn.
    pub cancel: CancellationToken,
}

impl ToolContext {
    pub fn new(project_root: PathBuf, config: Arc<Config>) -> Self {
        Self {
            project_root,
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(&self, cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..self.clone()
        }
    }
}

/// What a tool hands back on completion.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    /// Plain text for the model. ANSI codes are stripped by the registry.
    pub content: String,
    /// `false` when the tool ran but did not fully achieve what was asked,
    /// e.g. some edit blocks failed to apply.
    pub success: bool,
    pub data: Option<Value>,
    /// Human-facing summary of side effects, such as a diff.
    pub side_effect: Option<String>,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            success: true,
            data: None,
            side_effect: None,
        }
    }
}

/// A trait representing a self-contained, executable tool.
///
/// This trait is designed to be object-safe, allowing for dynamic dispatch
/// via `Arc<dyn Tool>`.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Returns the unique, static name of the tool. Must match `spec().name`.
    fn name(&self) -> &'static str;

    /// Returns the declarative parameter spec, used for the model-facing schema
    /// and for argument validation.
    fn spec(&self) -> ToolSpec;

    /// Executes the tool's primary function.
    ///
    /// `args` is always a JSON object that already passed `spec().validate_args`.
    /// An `Err` is reported to the model as an unsuccessful tool result; it never
    /// aborts the turn.
    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<ToolOutput>;

    /// Whether the tool changes the project or the machine. Executions of
    /// mutating tools are written to the audit log.
    fn is_mutating(&self) -> bool {
        false
    }
}

/// Deserializes validated arguments into a tool's argument struct.
pub(crate) fn parse_args<T: DeserializeOwned>(args: &Value) -> Result<T> {
    serde_json::from_value(args.clone())
        .map_err(|e| anyhow::anyhow!("Failed to parse arguments: {e}"))
}

/// The explicit registration table of built-in tools.
pub fn builtin_tools() -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(ReadFileTool),
        Arc::new(ListFilesTool),
        Arc::new(GrepSearchTool),
        Arc::new(SearchFilesTool),
        Arc::new(ExecShellTool),
        Arc::new(EditFileTool),
    ]
}

#[cfg(test)]
mod edit_file_tests;
