use crate::tools::{ParamSpec, ParamType, Tool, ToolContext, ToolOutput, ToolSpec, parse_args};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::process::Stdio;
use std::time::Duration;
use strip_ansi_escapes::strip_str;
use tokio::process::Command;

/// Defines the arguments structure for the shell tool.
/// The LLM will populate this structure.
#[derive(Deserialize, Debug)]
pub struct ExecShellArgs {
    pub command: String,
}

pub struct ExecShellTool;

#[async_trait]
impl Tool for ExecShellTool {
    fn name(&self) -> &'static str {
        "exec_shell"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "exec_shell",
            "Runs a shell command with `sh -c` in the project root and returns its combined stdout and stderr. Use it to build, run tests, inspect git state and similar. Commands that wait for interactive input will hang until the timeout.",
            vec![ParamSpec::required(
                "command",
                ParamType::String,
                "The shell command to execute. For example: cargo test",
            )],
        )
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let args: ExecShellArgs = parse_args(args)?;
        execute_shell_command(&args.command, ctx).await
    }

    fn is_mutating(&self) -> bool {
        true
    }
}

/// Runs `command` under the configured timeout. The child is killed when the
/// timeout fires or the turn is cancelled.
pub async fn execute_shell_command(command: &str, ctx: &ToolContext) -> Result<ToolOutput> {
    if command.trim().is_empty() {
        return Err(anyhow!("Command must not be empty."));
    }
    let timeout = Duration::from_secs(ctx.config.shell_timeout_seconds.max(1));

    let child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(&ctx.project_root)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| anyhow!("Failed to start shell: {e}"))?;

    let output = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => {
            return Err(anyhow!("Command interrupted: {command}"));
        }
        result = tokio::time::timeout(timeout, child.wait_with_output()) => match result {
            Ok(output) => output?,
            Err(_) => {
                return Err(anyhow!(
                    "Command timed out after {} seconds: {command}",
                    timeout.as_secs()
                ));
            }
        },
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let mut content = strip_str(format!("{stdout}\n{stderr}").trim());
    if content.is_empty() {
        content = "[no output]".to_string();
    }
    if !output.status.success() {
        let status = output
            .status
            .code()
            .map_or_else(|| "killed by signal".to_string(), |c| c.to_string());
        content.push_str(&format!("\n[exit status: {status}]"));
    }

    Ok(ToolOutput {
        content,
        success: output.status.success(),
        data: Some(json!({ "exit_code": output.status.code() })),
        side_effect: Some(format!("$ {command}")),
    })
}
