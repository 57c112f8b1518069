//! # Conversation Model
//!
//! Provider-neutral messages. Gateways translate these into their own wire
//! formats; nothing in here knows about HTTP.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// An image attached to a user message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAttachment {
    pub mime_type: String,
    /// Base64 encoded bytes.
    pub data: String,
    /// Where the image came from, for display.
    pub source: String,
}

impl ImageAttachment {
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    /// Parsed arguments. Arguments the model sent that were not valid JSON
    /// are kept verbatim as a `Value::String` so validation can report them.
    pub arguments: Value,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// Parses the raw argument string a provider sent.
    pub fn from_raw_arguments(
        id: impl Into<String>,
        name: impl Into<String>,
        raw: &str,
    ) -> Self {
        let arguments = if raw.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
        };
        Self::new(id, name, arguments)
    }

    /// Arguments as the JSON text providers expect to be echoed back.
    pub fn arguments_text(&self) -> String {
        match &self.arguments {
            Value::String(raw) => raw.clone(),
            other => other.to_string(),
        }
    }
}

/// Outcome of one tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub success: bool,
    /// Text handed back to the model.
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Human-facing summary of what changed, e.g. a unified diff.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side_effect: Option<String>,
}

impl ToolResult {
    pub fn success(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            success: true,
            content: content.into(),
            data: None,
            side_effect: None,
        }
    }

    pub fn failure(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            success: false,
            content: content.into(),
            data: None,
            side_effect: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageAttachment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    /// Set on tool messages answering a model call. `None` for output the
    /// user produced directly (the `:e` command).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Set on tool messages whose call failed.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl Message {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            images: Vec::new(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
            is_error: false,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn user_with_images(content: impl Into<String>, images: Vec<ImageAttachment>) -> Self {
        Self {
            images,
            ..Self::plain(Role::User, content)
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn assistant_tool_calls(content: impl Into<String>, calls: Vec<ToolCallRequest>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::plain(Role::Assistant, content)
        }
    }

    pub fn tool_result(tool_name: impl Into<String>, result: &ToolResult) -> Self {
        Self {
            tool_call_id: Some(result.call_id.clone()),
            tool_name: Some(tool_name.into()),
            is_error: !result.success,
            ..Self::plain(Role::Tool, result.content.clone())
        }
    }

    /// Output of a tool the user ran by hand. It answers no model call.
    pub fn tool_output(tool_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_name: Some(tool_name.into()),
            ..Self::plain(Role::Tool, content)
        }
    }
}

/// The ordered message history of one session.
///
/// Messages are only ever appended. The exceptions are [`clear`], which
/// truncates back to the initial system message, and [`compact`], which
/// swaps older history for a summary.
///
/// [`clear`]: Conversation::clear
/// [`compact`]: Conversation::compact
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new(system_prompt: Option<String>) -> Self {
        Self {
            messages: system_prompt.map(Message::system).into_iter().collect(),
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    fn system_prompt_len(&self) -> usize {
        match self.messages.first() {
            Some(first) if first.role == Role::System => 1,
            _ => 0,
        }
    }

    pub fn clear(&mut self) {
        self.messages.truncate(self.system_prompt_len());
    }

    /// Messages between the system prompt and `recent_start(keep_recent)`.
    pub fn older_than(&self, keep_recent: usize) -> &[Message] {
        let start = self.system_prompt_len();
        &self.messages[start..self.recent_start(keep_recent).max(start)]
    }

    /// Index where the last `count` messages begin. It moves back past tool
    /// results so the recent part never starts with an answer to a call it
    /// does not contain.
    pub fn recent_start(&self, count: usize) -> usize {
        let mut start = self.messages.len().saturating_sub(count);
        while start > 0
            && self
                .messages
                .get(start)
                .is_some_and(|m| m.role == Role::Tool && m.tool_call_id.is_some())
        {
            start -= 1;
        }
        start
    }

    /// Replaces the messages between the system prompt and `from` with
    /// `summary`.
    pub fn compact(&mut self, from: usize, summary: Message) {
        let keep = self.system_prompt_len();
        let from = from.clamp(keep, self.messages.len());
        self.messages.splice(keep..from, std::iter::once(summary));
    }

    /// Every tool call id already in the history.
    pub fn call_ids(&self) -> HashSet<&str> {
        self.messages
            .iter()
            .flat_map(|m| &m.tool_calls)
            .map(|call| call.id.as_str())
            .collect()
    }
}
