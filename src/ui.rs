use crate::agent::{Session, SessionUsage, TurnObserver, TurnOutcome};
use crate::diff::colorize_diff;
use crate::message::{ToolCallRequest, ToolResult};
use anyhow::Result;
use console::style;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A second Ctrl+C at the prompt within this window exits.
const EXIT_WINDOW: Duration = Duration::from_secs(1);
/// Tool output longer than this is shortened on screen. The model sees all of it.
const MAX_DISPLAY_LINES: usize = 20;

#[derive(Debug)]
pub enum AppState {
    WaitingForUserInput,
    ProcessingPrompt(String),
    Shutdown,
}

pub struct App {
    session: Session,
    state: AppState,
    multiline: bool,
    multiline_buffer: Vec<String>,
    stdin_receiver: mpsc::Receiver<Option<String>>,
}

impl App {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            state: AppState::WaitingForUserInput,
            multiline: false,
            multiline_buffer: Vec::new(),
            stdin_receiver: spawn_stdin_channel(),
        }
    }

    pub async fn run(&mut self, initial_prompt: Option<String>) -> Result<()> {
        if let Some(prompt) = initial_prompt.filter(|p| !p.trim().is_empty()) {
            self.state = AppState::ProcessingPrompt(prompt);
        }

        let mut last_ctrl_c: Option<Instant> = None;

        loop {
            match &self.state {
                AppState::WaitingForUserInput => {
                    let prompt = if self.multiline { "...>" } else { "user>" };
                    print!("\x07{} ", style(prompt).cyan().bold());
                    io::stdout().flush()?;

                    tokio::select! {
                        biased;
                        _ = tokio::signal::ctrl_c() => {
                            if last_ctrl_c.is_some_and(|t| t.elapsed() < EXIT_WINDOW) {
                                self.state = AppState::Shutdown;
                            } else {
                                println!("\nPress Ctrl+C again to exit.");
                                last_ctrl_c = Some(Instant::now());
                            }
                        }
                        line_opt = self.stdin_receiver.recv() => {
                            // recv() returns None if the channel is closed.
                            match line_opt.flatten() {
                                Some(line) => self.accept_line(line),
                                None => {
                                    // Ctrl+D
                                    println!();
                                    self.state = AppState::Shutdown;
                                }
                            }
                        }
                    }
                }
                AppState::ProcessingPrompt(input) => {
                    let input = input.clone();
                    self.process(&input).await;
                    self.state = AppState::WaitingForUserInput;
                }
                AppState::Shutdown => {
                    println!("\nShutting down...");
                    return Ok(());
                }
            }
        }
    }

    fn accept_line(&mut self, line: String) {
        if self.multiline {
            match line.trim() {
                ":end" => {
                    let text = self.multiline_buffer.join("\n");
                    self.multiline_buffer.clear();
                    if !text.trim().is_empty() {
                        self.state = AppState::ProcessingPrompt(text);
                    }
                }
                ":m" if self.multiline_buffer.is_empty() => {
                    self.state = AppState::ProcessingPrompt(line);
                }
                _ => self.multiline_buffer.push(line),
            }
        } else if !line.trim().is_empty() {
            self.state = AppState::ProcessingPrompt(line);
        }
    }

    async fn process(&mut self, input: &str) {
        println!("[{}]", style("user").blue());
        println!("{}", style(input).cyan());

        let observer = ConsoleObserver::default();
        let cancel = CancellationToken::new();
        let result = {
            let turn = self.session.handle_input(input, &observer, cancel.clone());
            tokio::pin!(turn);
            loop {
                tokio::select! {
                    result = &mut turn => break result,
                    _ = tokio::signal::ctrl_c() => {
                        observer.end_stream();
                        println!("{}", style("Interrupting...").yellow());
                        cancel.cancel();
                    }
                }
            }
        };
        observer.end_stream();

        match result {
            Ok(TurnOutcome::ToggleMultiline) => {
                self.multiline = !self.multiline;
                if self.multiline {
                    println!("{}", style("Multiline input on. Finish each message with :end").dim());
                } else {
                    println!("{}", style("Multiline input off.").dim());
                }
            }
            Ok(TurnOutcome::Answer(_) | TurnOutcome::Command | TurnOutcome::Interrupted) => {}
            Err(e) => eprintln!("{}", style(format!("Turn failed: {e}")).red()),
        }

        let usage = self.session.usage();
        if usage.total_tokens() > 0 {
            println!("{}", style(usage_line(&usage)).dim());
        }
    }
}

fn usage_line(usage: &SessionUsage) -> String {
    let context = usage
        .context_tokens
        .map_or_else(|| "-".to_string(), thousands);
    format!(
        "Context tokens: {context} | Session in/out: {}/{} (total {})",
        thousands(usage.input_tokens),
        thousands(usage.output_tokens),
        thousands(usage.total_tokens())
    )
}

fn thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Renders a turn on the terminal.
#[derive(Default)]
pub struct ConsoleObserver {
    streaming: AtomicBool,
}

impl ConsoleObserver {
    /// Terminates the line of streamed assistant text, if one is open.
    fn end_stream(&self) {
        if self.streaming.swap(false, Ordering::SeqCst) {
            println!();
        }
    }
}

impl TurnObserver for ConsoleObserver {
    fn on_text(&self, delta: &str) {
        if !self.streaming.swap(true, Ordering::SeqCst) {
            println!("[{}]", style("assistant").blue());
        }
        print!("{delta}");
        let _ = io::stdout().flush();
    }

    fn on_tool_call(&self, call: &ToolCallRequest) {
        self.end_stream();
        println!("[{}]", style(format!("tool: {}", call.name)).magenta());
        let args = call.arguments_text();
        if call.name != "edit_file" {
            println!("{}", style(shorten(&args, 1)).dim());
        }
    }

    fn on_tool_result(&self, tool_name: &str, result: &ToolResult) {
        self.end_stream();
        match (&result.side_effect, tool_name) {
            (Some(diff), "edit_file") if !diff.is_empty() => print!("{}", colorize_diff(diff)),
            _ => println!("{}", style(shorten(&result.content, MAX_DISPLAY_LINES)).dim()),
        }
        if !result.success {
            println!("{}", style(format!("{tool_name} reported a failure")).red());
        }
    }

    fn on_notice(&self, notice: &str) {
        self.end_stream();
        println!("{}", style(notice).yellow());
    }
}

fn shorten(text: &str, max_lines: usize) -> String {
    let total = text.lines().count();
    if total <= max_lines {
        return text.to_string();
    }
    let head: Vec<&str> = text.lines().take(max_lines).collect();
    format!("{}\n... ({} more lines)", head.join("\n"), total - max_lines)
}

fn spawn_stdin_channel() -> mpsc::Receiver<Option<String>> {
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(async move {
        loop {
            let result = tokio::task::spawn_blocking(|| {
                let mut buffer = String::new();
                match io::stdin().read_line(&mut buffer) {
                    Ok(0) => Ok(None), // EOF (Ctrl+D)
                    Ok(_) => Ok(Some(buffer.trim_end_matches(['\n', '\r']).to_string())),
                    Err(e) => Err(e),
                }
            })
            .await;

            match result {
                Ok(Ok(line_opt)) => {
                    if tx.send(line_opt).await.is_err() {
                        // Receiver was dropped, so we can exit.
                        break;
                    }
                }
                _ => {
                    // An error occurred, signal EOF and exit the task.
                    tx.send(None).await.ok();
                    break;
                }
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shorten() {
        assert_eq!(shorten("a\nb", 2), "a\nb");
        assert_eq!(shorten("a\nb\nc\nd", 2), "a\nb\n... (2 more lines)");
    }

    #[test]
    fn test_usage_line() {
        let mut usage = SessionUsage {
            input_tokens: 1_234_567,
            output_tokens: 890,
            context_tokens: Some(12_000),
        };
        assert_eq!(
            usage_line(&usage),
            "Context tokens: 12,000 | Session in/out: 1,234,567/890 (total 1,235,457)"
        );

        usage.context_tokens = None;
        assert!(usage_line(&usage).starts_with("Context tokens: - |"));
    }
}
