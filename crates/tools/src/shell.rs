//! Shell tool: run commands through `sh -c` with a hard timeout.
//!
//! The child is killed when the timeout expires; the call then fails with a
//! normal tool result instead of hanging the agent.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use forgeloop_core::error::ToolError;
use forgeloop_core::tool::{Tool, ToolEffect, ToolResult};
use tokio::process::Command;
use tracing::{debug, warn};

/// Output beyond this many characters is cut.
const MAX_OUTPUT_CHARS: usize = 30_000;

/// Execute shell commands.
pub struct ShellTool {
    timeout: Duration,
    working_dir: Option<PathBuf>,
}

impl ShellTool {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            working_dir: None,
        }
    }

    /// Run commands in `dir` instead of the process cwd.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

impl Default for ShellTool {
    fn default() -> Self {
        Self::new(Duration::from_secs(120))
    }
}

pub(crate) fn clip(text: &str) -> String {
    if text.len() <= MAX_OUTPUT_CHARS {
        return text.to_string();
    }
    let mut end = MAX_OUTPUT_CHARS;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!(
        "{}\n[output truncated: {} more characters]",
        &text[..end],
        text.len() - end
    )
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Execute a bash command and return stdout/stderr. Use this to run tests, search with grep/find, inspect git state, and build the project. Commands are killed after the configured timeout."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                }
            },
            "required": ["command"]
        })
    }

    fn effect(&self) -> ToolEffect {
        ToolEffect::RunsCommand
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let command = arguments["command"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'command' argument".into()))?;

        debug!(
            command = %command,
            timeout_secs = self.timeout.as_secs(),
            "Executing shell command"
        );

        let mut cmd = Command::new("sh");
        cmd.args(["-c", command]).kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ToolError::ExecutionFailed {
                    tool_name: "bash".into(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                warn!(
                    command = %command,
                    timeout_secs = self.timeout.as_secs(),
                    "Command timed out"
                );
                return Ok(ToolResult::fail(format!(
                    "Command timed out after {} seconds",
                    self.timeout.as_secs()
                ))
                .with_suggestion(
                    "Try a command that completes faster or increase tools.shell_timeout_secs",
                )
                .with_metadata("command", serde_json::json!(command))
                .with_metadata("timed_out", serde_json::json!(true)));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let code = output.status.code().unwrap_or(-1);

        let result = if output.status.success() {
            let text = if stderr.trim().is_empty() {
                stdout.trim_end().to_string()
            } else {
                format!("{}\n[stderr]: {}", stdout.trim_end(), stderr.trim_end())
            };
            ToolResult::ok(clip(&text))
        } else {
            warn!(command = %command, exit_code = code, "Command failed");
            let text = format!("[exit code: {code}]\n{}\n{}", stdout.trim_end(), stderr.trim_end());
            ToolResult::fail(clip(text.trim_end()))
        };

        Ok(result
            .with_metadata("command", serde_json::json!(command))
            .with_metadata("exit_code", serde_json::json!(code)))
    }
}
