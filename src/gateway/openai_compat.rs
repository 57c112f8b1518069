//! OpenAI-style `/chat/completions` client with SSE streaming.
//!
//! The same wire format is spoken by OpenAI, OpenRouter, Ollama and most local
//! inference servers, so one implementation serves all of them.

use crate::error::{PermanentKind, ProviderError};
use crate::gateway::{
    Completion, CompletionRequest, ModelGateway, TextSink, Usage, into_response,
};
use crate::message::{Message, Role, ToolCallRequest};
use crate::tools::ToolSpec;
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;
use std::time::Duration;

#[skip_serializing_none]
#[derive(Serialize, Debug)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    tools: Option<Vec<WireTool>>,
    stream: bool,
    stream_options: Option<StreamOptions>,
}

#[derive(Serialize, Debug)]
struct StreamOptions {
    include_usage: bool,
}

#[skip_serializing_none]
#[derive(Serialize, Debug, PartialEq)]
struct WireMessage {
    role: &'static str,
    content: Option<WireContent>,
    tool_calls: Option<Vec<WireToolCall>>,
    tool_call_id: Option<String>,
}

#[derive(Serialize, Debug, PartialEq)]
#[serde(untagged)]
enum WireContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Serialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize, Debug, PartialEq)]
struct ImageUrl {
    url: String,
}

#[derive(Serialize, Debug, PartialEq)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionCall,
}

#[derive(Serialize, Debug, PartialEq)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Serialize, Debug)]
struct WireTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunction,
}

#[derive(Serialize, Debug)]
struct WireFunction {
    name: String,
    description: String,
    parameters: Value,
}

fn to_wire_tool(spec: &ToolSpec) -> WireTool {
    WireTool {
        kind: "function",
        function: WireFunction {
            name: spec.name.clone(),
            description: spec.description.clone(),
            parameters: spec.json_schema(),
        },
    }
}

fn to_wire_message(message: &Message) -> WireMessage {
    let plain = |role: &'static str, content: String| WireMessage {
        role,
        content: Some(WireContent::Text(content)),
        tool_calls: None,
        tool_call_id: None,
    };

    match message.role {
        Role::System => plain("system", message.content.clone()),
        Role::User if message.images.is_empty() => plain("user", message.content.clone()),
        Role::User => {
            let mut parts = vec![ContentPart::Text {
                text: message.content.clone(),
            }];
            parts.extend(message.images.iter().map(|image| ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: image.data_url(),
                },
            }));
            WireMessage {
                content: Some(WireContent::Parts(parts)),
                ..plain("user", String::new())
            }
        }
        Role::Assistant if message.tool_calls.is_empty() => {
            plain("assistant", message.content.clone())
        }
        Role::Assistant => WireMessage {
            role: "assistant",
            content: (!message.content.is_empty())
                .then(|| WireContent::Text(message.content.clone())),
            tool_calls: Some(
                message
                    .tool_calls
                    .iter()
                    .map(|call| WireToolCall {
                        id: call.id.clone(),
                        kind: "function",
                        function: WireFunctionCall {
                            name: call.name.clone(),
                            arguments: call.arguments_text(),
                        },
                    })
                    .collect(),
            ),
            tool_call_id: None,
        },
        Role::Tool => match &message.tool_call_id {
            Some(id) => WireMessage {
                tool_call_id: Some(id.clone()),
                ..plain("tool", message.content.clone())
            },
            // Output of a command the user ran; no call to attach it to.
            None => plain("user", user_tool_output_text(message)),
        },
    }
}

pub(crate) fn user_tool_output_text(message: &Message) -> String {
    format!(
        "Output of `{}` run by the user:\n{}",
        message.tool_name.as_deref().unwrap_or("tool"),
        message.content
    )
}

#[derive(Deserialize, Debug)]
struct StreamChunk {
    choices: Option<Vec<StreamChoice>>,
    error: Option<StreamError>,
    usage: Option<WireUsage>,
}

/// Sent in a final chunk with empty `choices` when usage was requested.
#[derive(Deserialize, Debug)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Deserialize, Debug)]
struct StreamChoice {
    delta: Option<Delta>,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct Delta {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Deserialize, Debug)]
struct ToolCallDelta {
    index: Option<usize>,
    id: Option<String>,
    function: Option<FunctionDelta>,
}

#[derive(Deserialize, Debug)]
struct FunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Deserialize, Debug)]
struct StreamError {
    message: Option<String>,
    code: Option<Value>,
}

#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

/// Reassembles a streamed completion from SSE lines.
#[derive(Debug, Default)]
pub(crate) struct StreamAccumulator {
    content: String,
    calls: Vec<PartialCall>,
    usage: Option<Usage>,
    finished: bool,
    done: bool,
}

impl StreamAccumulator {
    /// Feeds one SSE line. Comments, blank lines and non-data fields are ignored.
    pub(crate) fn push_line(&mut self, line: &str, on_text: TextSink<'_>) -> Result<(), ProviderError> {
        let Some(payload) = line.trim_end_matches('\r').strip_prefix("data:") else {
            return Ok(());
        };
        let payload = payload.trim();
        if payload.is_empty() {
            return Ok(());
        }
        if payload == "[DONE]" {
            self.done = true;
            return Ok(());
        }

        let chunk: StreamChunk = serde_json::from_str(payload).map_err(|e| {
            ProviderError::permanent(
                PermanentKind::Malformed,
                format!("undecodable stream chunk: {e}"),
            )
        })?;

        if let Some(error) = chunk.error {
            let message = error.message.unwrap_or_else(|| "unknown error".to_string());
            return Err(match error.code.as_ref().and_then(Value::as_u64) {
                Some(status) => ProviderError::from_status(status as u16, message),
                None => ProviderError::transient(message),
            });
        }

        if let Some(usage) = chunk.usage {
            self.usage = Some(Usage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            });
        }

        for choice in chunk.choices.unwrap_or_default() {
            if choice.finish_reason.is_some() {
                self.finished = true;
            }
            let Some(delta) = choice.delta else { continue };
            if let Some(text) = delta.content.filter(|t| !t.is_empty()) {
                on_text(text.as_str());
                self.content.push_str(&text);
            }
            for call in delta.tool_calls.unwrap_or_default() {
                let index = call.index.unwrap_or(self.calls.len().saturating_sub(1));
                while self.calls.len() <= index {
                    self.calls.push(PartialCall::default());
                }
                let partial = &mut self.calls[index];
                if let Some(id) = call.id {
                    partial.id.push_str(&id);
                }
                if let Some(function) = call.function {
                    if let Some(name) = function.name {
                        partial.name.push_str(&name);
                    }
                    if let Some(arguments) = function.arguments {
                        partial.arguments.push_str(&arguments);
                    }
                }
            }
        }
        Ok(())
    }

    pub(crate) fn is_done(&self) -> bool {
        self.done
    }

    pub(crate) fn finish(self) -> Result<Completion, ProviderError> {
        if !self.done && !self.finished {
            return Err(ProviderError::transient(
                "response stream ended before completion",
            ));
        }
        let calls = self
            .calls
            .into_iter()
            .filter(|c| !c.name.is_empty())
            .map(|c| ToolCallRequest::from_raw_arguments(c.id, c.name, &c.arguments))
            .collect();
        Ok(Completion {
            response: into_response(self.content, calls),
            usage: self.usage,
        })
    }
}

pub struct OpenAiCompatGateway {
    name: String,
    api_base: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiCompatGateway {
    pub fn new(
        name: &str,
        api_base: &str,
        api_key: Option<String>,
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
impl ModelGateway for OpenAiCompatGateway {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
        on_text: TextSink<'_>,
    ) -> Result<Completion, ProviderError> {
        let body = ChatRequest {
            model: &request.model,
            messages: request.messages.iter().map(to_wire_message).collect(),
            tools: (!request.tools.is_empty())
                .then(|| request.tools.iter().map(to_wire_tool).collect()),
            stream: true,
            stream_options: Some(StreamOptions {
                include_usage: true,
            }),
        };

        let url = format!("{}/chat/completions", self.api_base);
        tracing::debug!(provider = %self.name, model = %request.model, messages = body.messages.len(), "sending chat completion");

        let mut builder = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), truncate(&text)));
        }

        let mut accumulator = StreamAccumulator::default();
        let mut buffer: Vec<u8> = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            buffer.extend_from_slice(&chunk?);
            while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=newline).collect();
                accumulator.push_line(&String::from_utf8_lossy(&line), on_text)?;
            }
            if accumulator.is_done() {
                break;
            }
        }
        if !buffer.is_empty() {
            accumulator.push_line(&String::from_utf8_lossy(&buffer), on_text)?;
        }

        accumulator.finish()
    }
}

pub(crate) fn truncate(text: &str) -> String {
    const MAX: usize = 500;
    if text.chars().count() > MAX {
        format!("{}...", text.chars().take(MAX).collect::<String>())
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ModelResponse;
    use crate::message::ImageAttachment;
    use serde_json::json;
    use std::sync::Mutex;

    fn feed(lines: &[&str]) -> (Result<Completion, ProviderError>, String) {
        let streamed = Mutex::new(String::new());
        let sink = |t: &str| streamed.lock().unwrap().push_str(t);
        let mut acc = StreamAccumulator::default();
        for line in lines {
            if let Err(e) = acc.push_line(line, &sink) {
                return (Err(e), streamed.into_inner().unwrap());
            }
        }
        (acc.finish(), streamed.into_inner().unwrap())
    }

    #[test]
    fn test_text_stream() {
        let (response, streamed) = feed(&[
            ": OPENROUTER PROCESSING",
            r#"data: {"choices":[{"delta":{"role":"assistant","content":"Hel"}}]}"#,
            "",
            r#"data: {"choices":[{"delta":{"content":"lo"},"finish_reason":"stop"}]}"#,
            "data: [DONE]",
        ]);
        let completion = response.unwrap();
        assert_eq!(completion.response, ModelResponse::Text("Hello".to_string()));
        assert_eq!(completion.usage, None);
        assert_eq!(streamed, "Hello");
    }

    #[test]
    fn test_usage_chunk_is_recorded() {
        let (response, _) = feed(&[
            r#"data: {"choices":[{"delta":{"content":"Hi"},"finish_reason":"stop"}]}"#,
            r#"data: {"choices":[],"usage":{"prompt_tokens":1200,"completion_tokens":34,"total_tokens":1234}}"#,
            "data: [DONE]",
        ]);
        assert_eq!(
            response.unwrap().usage,
            Some(Usage {
                input_tokens: 1200,
                output_tokens: 34,
            })
        );
    }

    #[test]
    fn test_tool_call_deltas_are_merged_by_index() {
        let (response, _) = feed(&[
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_a","type":"function","function":{"name":"read_file","arguments":""}}]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"filename\":"}}]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":1,"id":"call_b","function":{"name":"list_files","arguments":"{}"}}]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"a.txt\"}"}}]}}]}"#,
            r#"data: {"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
            "data: [DONE]",
        ]);
        match response.unwrap().response {
            ModelResponse::ToolCalls { content, calls } => {
                assert!(content.is_empty());
                assert_eq!(calls.len(), 2);
                assert_eq!(calls[0].id, "call_a");
                assert_eq!(calls[0].name, "read_file");
                assert_eq!(calls[0].arguments, json!({"filename": "a.txt"}));
                assert_eq!(calls[1].name, "list_files");
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn test_error_chunk_is_classified() {
        let (response, _) = feed(&[r#"data: {"error":{"message":"Rate limit","code":429}}"#]);
        assert!(response.unwrap_err().is_transient());

        let (response, _) = feed(&[r#"data: {"error":{"message":"No credits","code":402}}"#]);
        assert!(matches!(
            response.unwrap_err(),
            ProviderError::Permanent {
                kind: PermanentKind::Quota,
                ..
            }
        ));
    }

    #[test]
    fn test_truncated_stream_is_transient() {
        let (response, _) = feed(&[r#"data: {"choices":[{"delta":{"content":"partial"}}]}"#]);
        assert!(response.unwrap_err().is_transient());
    }

    #[test]
    fn test_garbage_chunk_is_malformed() {
        let (response, _) = feed(&["data: {not json"]);
        assert!(matches!(
            response.unwrap_err(),
            ProviderError::Permanent {
                kind: PermanentKind::Malformed,
                ..
            }
        ));
    }

    #[test]
    fn test_wire_messages() {
        let image = ImageAttachment {
            mime_type: "image/png".to_string(),
            data: "AAAA".to_string(),
            source: "shot.png".to_string(),
        };
        let user = to_wire_message(&Message::user_with_images("look", vec![image]));
        let json = serde_json::to_value(&user).unwrap();
        assert_eq!(json["content"][0], json!({"type": "text", "text": "look"}));
        assert_eq!(
            json["content"][1],
            json!({"type": "image_url", "image_url": {"url": "data:image/png;base64,AAAA"}})
        );

        let call = ToolCallRequest::new("call_1", "read_file", json!({"filename": "a"}));
        let assistant = to_wire_message(&Message::assistant_tool_calls("", vec![call]));
        let json = serde_json::to_value(&assistant).unwrap();
        assert!(json.get("content").is_none());
        assert_eq!(json["tool_calls"][0]["function"]["arguments"], r#"{"filename":"a"}"#);

        let manual = to_wire_message(&Message::tool_output("exec_shell", "hello"));
        assert_eq!(manual.role, "user");
        assert_eq!(
            manual.content,
            Some(WireContent::Text(
                "Output of `exec_shell` run by the user:\nhello".to_string()
            ))
        );
    }
}
