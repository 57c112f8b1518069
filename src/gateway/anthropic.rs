//! Native Anthropic Messages API client.
//!
//! Leading system messages go into the top-level `system` field. Later ones are
//! notes added mid-conversation and are sent as user text where they occurred.
//! Tool calls and their results travel as `tool_use` / `tool_result` content
//! blocks, and consecutive messages of the same role are merged since the API
//! requires alternation.

use crate::error::{PermanentKind, ProviderError};
use crate::gateway::openai_compat::{truncate, user_tool_output_text};
use crate::gateway::{
    Completion, CompletionRequest, ModelGateway, ModelResponse, TextSink, Usage, into_response,
};
use crate::message::{Message, Role, ToolCallRequest};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;
use std::time::Duration;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 8192;

#[skip_serializing_none]
#[derive(Serialize, Debug)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: Option<String>,
    messages: Vec<WireMessage>,
    tools: Option<Vec<WireTool>>,
}

#[derive(Serialize, Debug, PartialEq)]
struct WireMessage {
    role: &'static str,
    content: Vec<ContentBlock>,
}

#[derive(Serialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        source: ImageSource,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

#[derive(Serialize, Debug, PartialEq)]
struct ImageSource {
    #[serde(rename = "type")]
    kind: &'static str,
    media_type: String,
    data: String,
}

#[derive(Serialize, Debug)]
struct WireTool {
    name: String,
    description: String,
    input_schema: Value,
}

#[derive(Deserialize, Debug)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize, Debug)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

fn leading_system_count(messages: &[Message]) -> usize {
    messages
        .iter()
        .take_while(|m| m.role == Role::System)
        .count()
}

fn system_prompt(messages: &[Message]) -> Option<String> {
    let parts: Vec<&str> = messages[..leading_system_count(messages)]
        .iter()
        .map(|m| m.content.as_str())
        .collect();
    (!parts.is_empty()).then(|| parts.join("\n\n"))
}

fn content_blocks(message: &Message) -> (&'static str, Vec<ContentBlock>) {
    match message.role {
        Role::User => {
            let mut blocks: Vec<ContentBlock> = message
                .images
                .iter()
                .map(|image| ContentBlock::Image {
                    source: ImageSource {
                        kind: "base64",
                        media_type: image.mime_type.clone(),
                        data: image.data.clone(),
                    },
                })
                .collect();
            blocks.push(ContentBlock::Text {
                text: message.content.clone(),
            });
            ("user", blocks)
        }
        Role::Assistant => {
            let mut blocks = Vec::new();
            if !message.content.is_empty() {
                blocks.push(ContentBlock::Text {
                    text: message.content.clone(),
                });
            }
            for call in &message.tool_calls {
                let input = match &call.arguments {
                    Value::Object(_) => call.arguments.clone(),
                    _ => Value::Object(Default::default()),
                };
                blocks.push(ContentBlock::ToolUse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input,
                });
            }
            ("assistant", blocks)
        }
        Role::Tool => match &message.tool_call_id {
            Some(id) => (
                "user",
                vec![ContentBlock::ToolResult {
                    tool_use_id: id.clone(),
                    content: message.content.clone(),
                    is_error: message.is_error,
                }],
            ),
            None => (
                "user",
                vec![ContentBlock::Text {
                    text: user_tool_output_text(message),
                }],
            ),
        },
        Role::System => (
            "user",
            vec![ContentBlock::Text {
                text: message.content.clone(),
            }],
        ),
    }
}

fn to_wire_messages(messages: &[Message]) -> Vec<WireMessage> {
    let mut wire: Vec<WireMessage> = Vec::new();
    for message in &messages[leading_system_count(messages)..] {
        let (role, blocks) = content_blocks(message);
        if blocks.is_empty() {
            continue;
        }
        match wire.last_mut() {
            Some(last) if last.role == role => last.content.extend(blocks),
            _ => wire.push(WireMessage {
                role,
                content: blocks,
            }),
        }
    }
    wire
}

fn parse_response(response: MessagesResponse) -> Completion {
    let mut content = String::new();
    let mut calls = Vec::new();
    for block in response.content {
        match block {
            ResponseBlock::Text { text } => content.push_str(&text),
            ResponseBlock::ToolUse { id, name, input } => {
                calls.push(ToolCallRequest::new(id, name, input))
            }
            ResponseBlock::Other => {}
        }
    }
    Completion {
        response: into_response(content, calls),
        usage: response.usage.map(|u| Usage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
        }),
    }
}

pub struct AnthropicGateway {
    name: String,
    api_base: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicGateway {
    pub fn new(
        name: &str,
        api_base: &str,
        api_key: String,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::permanent(PermanentKind::NotConfigured, e.to_string()))?;
        Ok(Self {
            name: name.to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }
}

#[async_trait]
impl ModelGateway for AnthropicGateway {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
        on_text: TextSink<'_>,
    ) -> Result<Completion, ProviderError> {
        let body = MessagesRequest {
            model: &request.model,
            max_tokens: MAX_TOKENS,
            system: system_prompt(&request.messages),
            messages: to_wire_messages(&request.messages),
            tools: (!request.tools.is_empty()).then(|| {
                request
                    .tools
                    .iter()
                    .map(|spec| WireTool {
                        name: spec.name.clone(),
                        description: spec.description.clone(),
                        input_schema: spec.json_schema(),
                    })
                    .collect()
            }),
        };

        tracing::debug!(provider = %self.name, model = %request.model, messages = body.messages.len(), "sending messages request");

        let response = self
            .client
            .post(format!("{}/messages", self.api_base))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            // 529 is Anthropic's "overloaded".
            return Err(ProviderError::from_status(status.as_u16(), truncate(&text)));
        }

        let parsed: MessagesResponse = response.json().await.map_err(|e| {
            ProviderError::permanent(PermanentKind::Malformed, e.to_string())
        })?;
        let completion = parse_response(parsed);
        match &completion.response {
            ModelResponse::Text(text) | ModelResponse::ToolCalls { content: text, .. }
                if !text.is_empty() =>
            {
                on_text(text.as_str())
            }
            _ => {}
        }
        Ok(completion)
    }
}
