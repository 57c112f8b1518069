//! # Tool Registry
//!
//! The `ToolRegistry` is the central hub for discovering, validating, and executing tools.
//! It maps tool names to implementations and dispatches model-issued calls to them.
//!
//! Tools are kept in a `BTreeMap`, so [`ToolRegistry::list`] is always in lexicographic
//! order and the tool section of every request is reproducible. The registry is built
//! once at startup and shared read-only (`Arc<ToolRegistry>`) for the rest of the run.

use crate::{
    error::{RegistryError, ToolCallError},
    message::{ToolCallRequest, ToolResult},
    tools::{Tool, ToolContext, ToolSpec},
};
use serde_json::Value;
use std::{collections::BTreeMap, sync::Arc};
use strip_ansi_escapes::strip_str;

struct Registered {
    tool: Arc<dyn Tool>,
    spec: ToolSpec,
}

/// A registry responsible for registering and dispatching tool calls.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Registered>,
}

impl ToolRegistry {
    /// Creates a new, empty `ToolRegistry`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every tool of a registration table. Entries that are rejected are
    /// logged and returned; they do not prevent the others from loading.
    pub fn from_table(table: Vec<Arc<dyn Tool>>) -> (Self, Vec<RegistryError>) {
        let mut registry = Self::new();
        let mut errors = Vec::new();
        for tool in table {
            let name = tool.name();
            if let Err(e) = registry.register(tool) {
                tracing::warn!(tool = name, error = %e, "skipping tool");
                errors.push(e);
            }
        }
        (registry, errors)
    }

    /// Registers a new tool. Its spec is validated once, here.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(RegistryError::DuplicateTool(name));
        }
        let spec = tool.spec();
        if spec.name != name {
            return Err(RegistryError::InvalidSpec {
                tool: name,
                reason: format!("spec is named '{}'", spec.name),
            });
        }
        spec.validate().map_err(|reason| RegistryError::InvalidSpec {
            tool: name.clone(),
            reason,
        })?;

        tracing::debug!(tool = %name, "registered tool");
        self.tools.insert(name, Registered { tool, spec });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<(&dyn Tool, &ToolSpec), RegistryError> {
        self.tools
            .get(name)
            .map(|r| (r.tool.as_ref(), &r.spec))
            .ok_or_else(|| RegistryError::UnknownTool(name.to_string()))
    }

    /// All specs, ordered by tool name.
    pub fn list(&self) -> Vec<ToolSpec> {
        self.tools.values().map(|r| r.spec.clone()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Resolves the tool a call names and checks its arguments. Returns the
    /// arguments with defaults filled in.
    pub fn validate_call(
        &self,
        call: &ToolCallRequest,
    ) -> Result<(&dyn Tool, Value), ToolCallError> {
        let (tool, spec) = self
            .get(&call.name)
            .map_err(|_| ToolCallError::UnknownTool(call.name.clone()))?;
        let args = spec.validate_args(&call.arguments)?;
        Ok((tool, Value::Object(args)))
    }

    /// Executes a tool call and returns its result.
    /// This function is designed to always succeed from the caller's perspective.
    /// Any failures in tool lookup, argument validation, or execution are captured
    /// and returned as an unsuccessful `ToolResult` whose content explains the
    /// problem to the model.
    pub async fn execute_tool_call(&self, call: &ToolCallRequest, ctx: &ToolContext) -> ToolResult {
        let (tool, args) = match self.validate_call(call) {
            Ok(validated) => validated,
            Err(e) => {
                tracing::warn!(tool = %call.name, call_id = %call.id, error = %e, "rejected tool call");
                let mut content = format!("Error: {e}");
                if let ToolCallError::UnknownTool(_) = e {
                    content.push_str(&format!(
                        "\nAvailable tools: {}",
                        self.names().join(", ")
                    ));
                }
                return ToolResult::failure(&call.id, content);
            }
        };

        let result = match tool.execute(&args, ctx).await {
            Ok(output) => ToolResult {
                call_id: call.id.clone(),
                success: output.success,
                content: strip_str(&output.content),
                data: output.data,
                side_effect: output.side_effect,
            },
            Err(e) => {
                tracing::warn!(tool = %call.name, call_id = %call.id, error = %e, "tool failed");
                ToolResult::failure(&call.id, format!("Error executing tool `{}`: {e}", call.name))
            }
        };

        if tool.is_mutating() {
            tracing::info!(
                target: "audit",
                tool = %call.name,
                call_id = %call.id,
                args = %args,
                success = result.success,
                side_effect = result.side_effect.as_deref().unwrap_or(""),
                "tool executed"
            );
        }

        result
    }
}
