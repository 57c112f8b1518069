//! # Agent Session
//!
//! A [`Session`] owns one conversation and drives it turn by turn: it sends the
//! history to the agent model, runs the tool calls the model asks for through the
//! [`ToolRegistry`], appends every result, and repeats until the model answers in
//! plain text or the iteration limit is hit.
//!
//! The session never prints. Everything worth showing goes through a
//! [`TurnObserver`].

use crate::commands::{self, Command};
use crate::compression;
use crate::config::{Config, ModelRoles};
use crate::error::AgentError;
use crate::gateway::router::split_model_id;
use crate::gateway::{CompletionRequest, ModelGateway, ModelResponse, ProviderRouter, Usage};
use crate::images;
use crate::message::{Conversation, ImageAttachment, Message, ToolCallRequest, ToolResult};
use crate::prompt_builder::build_system_prompt;
use crate::tool_registry::ToolRegistry;
use crate::tools::ToolContext;
use crate::tools::exec_shell::execute_shell_command;
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    AwaitingUserInput,
    Dispatching,
    InterpretingResponse,
    ExecutingTool,
    AppendingResult,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The model's final answer for this turn.
    Answer(String),
    /// A colon command was handled without calling the model.
    Command,
    /// The `:m` command: the front end should toggle multiline input.
    ToggleMultiline,
    Interrupted,
}

/// Receives everything a turn produces that a user may want to see.
pub trait TurnObserver: Send + Sync {
    fn on_state(&self, _state: TurnState) {}
    /// A fragment of assistant text as it streams in.
    fn on_text(&self, _delta: &str) {}
    fn on_tool_call(&self, _call: &ToolCallRequest) {}
    fn on_tool_result(&self, _tool_name: &str, _result: &ToolResult) {}
    /// Status lines and command output.
    fn on_notice(&self, _notice: &str) {}
}

pub struct NoopObserver;

impl TurnObserver for NoopObserver {}

const INTERRUPTED_RESULT: &str = "Interrupted by the user before this call completed.";

/// Token counts reported by the providers during this session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Size of the conversation as of the last agent request. `None` until a
    /// provider reports it, and again after the history changes shape.
    pub context_tokens: Option<u64>,
}

impl SessionUsage {
    fn add(&mut self, usage: Usage) {
        self.input_tokens += usage.input_tokens;
        self.output_tokens += usage.output_tokens;
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

pub struct Session {
    config: Arc<Config>,
    registry: Arc<ToolRegistry>,
    router: ProviderRouter,
    tool_ctx: ToolContext,
    conversation: Conversation,
    models: ModelRoles,
    gateway: Arc<dyn ModelGateway>,
    /// Provider-local name of the agent model.
    model: String,
    pending_images: Vec<ImageAttachment>,
    state: TurnState,
    usage: SessionUsage,
}

impl Session {
    /// Starts a session rooted at `project_root`, talking to the configured
    /// agent model.
    pub fn new(
        config: Arc<Config>,
        registry: Arc<ToolRegistry>,
        router: ProviderRouter,
        project_root: &Path,
    ) -> Result<Self> {
        let project_root = project_root.canonicalize().with_context(|| {
            format!("Failed to resolve project directory '{}'", project_root.display())
        })?;
        if !project_root.is_dir() {
            anyhow::bail!("'{}' is not a directory", project_root.display());
        }

        let models = config.models.clone();
        let (gateway, model) = router
            .resolve(&models.agent)
            .with_context(|| format!("Cannot use agent model '{}'", models.agent))?;

        let system_prompt = build_system_prompt(&project_root, &config, &registry.names());
        tracing::info!(root = %project_root.display(), model = %models.agent, tools = registry.len(), "session started");

        Ok(Self {
            tool_ctx: ToolContext::new(project_root, config.clone()),
            config,
            registry,
            router,
            conversation: Conversation::new(Some(system_prompt)),
            models,
            gateway,
            model,
            pending_images: Vec::new(),
            state: TurnState::AwaitingUserInput,
            usage: SessionUsage::default(),
        })
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn models(&self) -> &ModelRoles {
        &self.models
    }

    pub fn usage(&self) -> SessionUsage {
        self.usage
    }

    pub fn pending_images(&self) -> &[ImageAttachment] {
        &self.pending_images
    }

    pub fn project_root(&self) -> &Path {
        &self.tool_ctx.project_root
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.registry.names()
    }

    /// Handles one line of user input: either a colon command or a full turn
    /// with the model. Cancelling `cancel` interrupts the turn.
    pub async fn handle_input(
        &mut self,
        input: &str,
        observer: &dyn TurnObserver,
        cancel: CancellationToken,
    ) -> Result<TurnOutcome, AgentError> {
        let result = match Command::parse(input) {
            Some(command) => Ok(self.handle_command(command, observer, cancel).await),
            None => self.run_turn(input, observer, cancel).await,
        };
        self.set_state(TurnState::AwaitingUserInput, observer);
        result
    }

    fn set_state(&mut self, state: TurnState, observer: &dyn TurnObserver) {
        if self.state != state {
            tracing::trace!(from = ?self.state, to = ?state, "turn state");
            self.state = state;
            observer.on_state(state);
        }
    }

    async fn run_turn(
        &mut self,
        input: &str,
        observer: &dyn TurnObserver,
        cancel: CancellationToken,
    ) -> Result<TurnOutcome, AgentError> {
        let images = std::mem::take(&mut self.pending_images);
        self.conversation.push(if images.is_empty() {
            Message::user(input)
        } else {
            Message::user_with_images(input, images)
        });

        let ctx = self.tool_ctx.with_cancel(cancel.clone());
        let limit = self.config.max_iterations;
        let mut iterations: u32 = 0;

        loop {
            self.set_state(TurnState::Dispatching, observer);
            let request = CompletionRequest {
                model: self.model.clone(),
                messages: self.conversation.messages().to_vec(),
                tools: self.registry.list(),
            };
            let gateway = self.gateway.clone();
            let on_text = |delta: &str| observer.on_text(delta);

            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = gateway.complete(&request, &on_text) => Some(result),
            };
            let Some(response) = response else {
                return Ok(self.interrupt(&[], observer));
            };

            self.set_state(TurnState::InterpretingResponse, observer);
            let response = match response {
                Ok(completion) => {
                    if let Some(usage) = completion.usage {
                        self.usage.add(usage);
                        self.usage.context_tokens = Some(usage.input_tokens + usage.output_tokens);
                    }
                    completion.response
                }
                Err(e) => {
                    tracing::error!(model = %self.models.agent, error = %e, "turn aborted");
                    self.conversation
                        .push(Message::system(format!("[model request failed: {e}]")));
                    return Err(AgentError::Provider(e));
                }
            };

            let (content, calls) = match response {
                ModelResponse::Text(text) => {
                    self.conversation.push(Message::assistant(text.clone()));
                    self.set_state(TurnState::Done, observer);
                    return Ok(TurnOutcome::Answer(text));
                }
                ModelResponse::ToolCalls { content, calls } => (content, calls),
            };

            iterations += 1;
            if iterations > limit {
                tracing::warn!(limit, "iteration limit reached");
                self.conversation.push(Message::system(format!(
                    "[stopped after {limit} tool rounds without a final answer]"
                )));
                return Err(AgentError::MaxIterationsExceeded { limit });
            }

            let mut used_ids: HashSet<String> = self
                .conversation
                .call_ids()
                .into_iter()
                .map(str::to_string)
                .collect();
            let calls: Vec<ToolCallRequest> = calls
                .into_iter()
                .map(|call| with_unique_call_id(call, &mut used_ids))
                .collect();
            self.conversation
                .push(Message::assistant_tool_calls(content, calls.clone()));

            for (index, call) in calls.iter().enumerate() {
                self.set_state(TurnState::ExecutingTool, observer);
                observer.on_tool_call(call);

                let registry = self.registry.clone();
                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    result = registry.execute_tool_call(call, &ctx) => Some(result),
                };
                let Some(result) = result else {
                    return Ok(self.interrupt(&calls[index..], observer));
                };

                self.set_state(TurnState::AppendingResult, observer);
                observer.on_tool_result(&call.name, &result);
                self.conversation.push(Message::tool_result(&call.name, &result));
            }
        }
    }

    /// Closes out an interrupted turn. Every call still waiting for a result
    /// gets one, so the history stays well-formed for the next request.
    fn interrupt(&mut self, pending: &[ToolCallRequest], observer: &dyn TurnObserver) -> TurnOutcome {
        tracing::info!(pending = pending.len(), "turn interrupted");
        for call in pending {
            let result = ToolResult::failure(&call.id, INTERRUPTED_RESULT);
            self.conversation.push(Message::tool_result(&call.name, &result));
        }
        self.conversation
            .push(Message::system("[turn interrupted by user]"));
        observer.on_notice("Interrupted.");
        TurnOutcome::Interrupted
    }

    async fn handle_command(
        &mut self,
        command: Command,
        observer: &dyn TurnObserver,
        cancel: CancellationToken,
    ) -> TurnOutcome {
        match command {
            Command::Exec(shell_command) => {
                self.set_state(TurnState::ExecutingTool, observer);
                let ctx = self.tool_ctx.with_cancel(cancel);
                let result = match execute_shell_command(&shell_command, &ctx).await {
                    Ok(output) => ToolResult {
                        call_id: String::new(),
                        success: output.success,
                        content: output.content,
                        data: output.data,
                        side_effect: output.side_effect,
                    },
                    Err(e) => ToolResult::failure("", format!("Error: {e}")),
                };
                tracing::info!(
                    target: "audit",
                    tool = "exec_shell",
                    source = "user",
                    command = %shell_command,
                    success = result.success,
                    "tool executed"
                );
                observer.on_tool_result("exec_shell", &result);
                self.conversation
                    .push(Message::tool_output("exec_shell", result.content));
                if ctx.cancel.is_cancelled() {
                    return self.interrupt(&[], observer);
                }
            }
            Command::ToggleMultiline => return TurnOutcome::ToggleMultiline,
            Command::Clear => {
                self.conversation.clear();
                self.pending_images.clear();
                self.usage.context_tokens = None;
                observer.on_notice("Conversation cleared. Session token totals are kept.");
            }
            Command::Compress(keep) => self.compress(keep, observer, cancel).await,
            Command::Image(path) => {
                match images::load_image(&self.tool_ctx.project_root.join(&path)) {
                    Ok(image) => {
                        observer.on_notice(&format!(
                            "Attached {} ({}). {} image(s) will be sent with your next message.",
                            image.source,
                            image.mime_type,
                            self.pending_images.len() + 1
                        ));
                        self.pending_images.push(image);
                    }
                    Err(e) => observer.on_notice(&format!("Error: {e:#}")),
                }
            }
            Command::Drop => match self.pending_images.pop() {
                Some(image) => observer.on_notice(&format!("Removed {}.", image.source)),
                None => observer.on_notice("No images attached."),
            },
            Command::Models => observer.on_notice(&format!(
                "agent: {}\ncode:  {}\nlight: {}",
                self.models.agent, self.models.code, self.models.light
            )),
            Command::ListModels => observer.on_notice(&format!(
                "Configured providers (use a model as provider/model):\n{}",
                self.router.describe_providers().join("\n")
            )),
            Command::SetAgentModel(id) => match self.router.resolve(&id) {
                Ok((gateway, model)) => {
                    tracing::info!(from = %self.models.agent, to = %id, "agent model switched");
                    self.gateway = gateway;
                    self.model = model;
                    observer.on_notice(&format!("Agent model set to {id}."));
                    self.models.agent = id;
                }
                Err(e) => observer.on_notice(&format!("Cannot switch to '{id}': {e}")),
            },
            Command::SetCodeModel(id) => {
                if let Some(id) = checked_model_id(id, observer) {
                    observer.on_notice(&format!("Code model set to {id}."));
                    self.models.code = id;
                }
            }
            Command::SetLightModel(id) => {
                if let Some(id) = checked_model_id(id, observer) {
                    observer.on_notice(&format!("Light model set to {id}."));
                    self.models.light = id;
                }
            }
            Command::Help => observer.on_notice(commands::HELP),
            Command::Usage(usage) => observer.on_notice(&format!("Usage: {usage}")),
        }
        TurnOutcome::Command
    }

    /// Replaces all but the last `keep` messages (default from config) with a
    /// summary written by the light model. On any failure the history is left
    /// as it was.
    async fn compress(
        &mut self,
        keep: Option<usize>,
        observer: &dyn TurnObserver,
        cancel: CancellationToken,
    ) {
        let keep = keep.unwrap_or(self.config.compress_keep_recent as usize);
        let older = self.conversation.older_than(keep);
        if older.is_empty() {
            observer.on_notice(&format!(
                "Nothing to compress: the conversation has no messages older than the last {keep}."
            ));
            return;
        }
        let older_count = older.len();
        let recent_start = self.conversation.recent_start(keep);
        let prompt = compression::compression_prompt(
            older,
            &self.conversation.messages()[recent_start..],
        );

        let (gateway, model) = match self.router.resolve(&self.models.light) {
            Ok(resolved) => resolved,
            Err(e) => {
                observer.on_notice(&format!(
                    "Cannot compress with '{}': {e}",
                    self.models.light
                ));
                return;
            }
        };
        observer.on_notice(&format!(
            "Compressing {older_count} older message(s) with {}...",
            self.models.light
        ));

        self.set_state(TurnState::Dispatching, observer);
        let request = CompletionRequest {
            model,
            messages: vec![Message::user(prompt)],
            tools: Vec::new(),
        };
        let silent = |_: &str| {};
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = gateway.complete(&request, &silent) => Some(result),
        };

        let completion = match result {
            None => {
                observer.on_notice("Compression interrupted. The conversation is unchanged.");
                return;
            }
            Some(Err(e)) => {
                tracing::warn!(model = %self.models.light, error = %e, "compression failed");
                observer.on_notice(&format!(
                    "Compression failed: {e}. The conversation is unchanged."
                ));
                return;
            }
            Some(Ok(completion)) => completion,
        };
        if let Some(usage) = completion.usage {
            self.usage.add(usage);
        }
        let summary = match completion.response {
            ModelResponse::Text(text) | ModelResponse::ToolCalls { content: text, .. } => text,
        };
        if summary.trim().is_empty() {
            observer.on_notice("The light model returned an empty summary. The conversation is unchanged.");
            return;
        }

        let before = self.conversation.len();
        self.conversation
            .compact(recent_start, compression::summary_message(&summary));
        self.usage.context_tokens = None;
        tracing::info!(before, after = self.conversation.len(), summarized = older_count, "conversation compressed");
        observer.on_notice(&format!(
            "Compressed {older_count} message(s) into one summary. Messages: {before} -> {}.",
            self.conversation.len()
        ));
    }
}

fn checked_model_id(id: String, observer: &dyn TurnObserver) -> Option<String> {
    match split_model_id(&id) {
        Ok(_) => Some(id),
        Err(e) => {
            observer.on_notice(&format!("Cannot switch to '{id}': {e}"));
            None
        }
    }
}

/// Keeps the provider's call id unless it is missing or already taken in this
/// conversation, in which case a fresh one is minted. Results are matched to
/// calls by id, so ids must not repeat.
fn with_unique_call_id(mut call: ToolCallRequest, used: &mut HashSet<String>) -> ToolCallRequest {
    if call.id.is_empty() || used.contains(&call.id) {
        let minted = format!("call_{}", uuid::Uuid::new_v4().simple());
        tracing::debug!(tool = %call.name, given = %call.id, minted = %minted, "assigned tool call id");
        call.id = minted;
    }
    used.insert(call.id.clone());
    call
}
