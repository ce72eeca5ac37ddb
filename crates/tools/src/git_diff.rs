//! Git diff tool: show uncommitted changes in the working tree.
//!
//! Runs `git` directly (no shell) so a `path` argument is never interpreted
//! as shell syntax.

use std::path::PathBuf;
use std::process::Output;
use std::time::Duration;

use async_trait::async_trait;
use forgeloop_core::error::ToolError;
use forgeloop_core::tool::{Tool, ToolEffect, ToolResult};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::resolve_path;
use crate::shell::clip;

/// Show `git diff` output for the working tree or the index.
pub struct GitDiffTool {
    timeout: Duration,
    working_dir: Option<PathBuf>,
}

impl GitDiffTool {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            working_dir: None,
        }
    }

    /// Run git in `dir` instead of the process cwd.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    async fn git(&self, args: &[&str]) -> Result<Output, ToolError> {
        let mut cmd = Command::new("git");
        cmd.args(args).kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ToolError::Timeout {
                tool_name: "git_diff".into(),
                timeout_secs: self.timeout.as_secs(),
            }),
        }
    }
}

impl Default for GitDiffTool {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl Tool for GitDiffTool {
    fn name(&self) -> &str {
        "git_diff"
    }

    fn description(&self) -> &str {
        "Show git diff for modified files. Use it to review changes after str_replace or \
         write_file, or to see everything changed during the session. Pass `path` to limit \
         the diff to one file and `staged` to diff the index instead of the working tree."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Optional: specific file to show the diff for"
                },
                "staged": {
                    "type": "boolean",
                    "description": "Diff staged changes instead of the working tree (default: false)"
                }
            },
            "required": []
        })
    }

    fn effect(&self) -> ToolEffect {
        ToolEffect::ReadOnly
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let path = arguments["path"].as_str().filter(|p| !p.trim().is_empty());
        let staged = arguments["staged"].as_bool().unwrap_or(false);

        let repo_check = match self.git(&["rev-parse", "--git-dir"]).await {
            Ok(output) => output,
            Err(ToolError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ToolResult::fail("git command not found")
                    .with_suggestion("Install git: https://git-scm.com/downloads"));
            }
            Err(e) => return Err(e),
        };
        if !repo_check.status.success() {
            return Ok(ToolResult::fail("Not a git repository").with_suggestion(
                "Initialize git with 'git init' or run from a git repository",
            ));
        }

        if let Some(path) = path
            && !resolve_path(self.working_dir.as_deref(), path).exists()
        {
            return Ok(ToolResult::fail(format!("File not found: {path}"))
                .with_suggestion("Check the file path and try again"));
        }

        let mut args = vec!["diff", "--no-color"];
        if staged {
            args.push("--cached");
        }
        if let Some(path) = path {
            args.extend(["--", path]);
        }
        let command = format!("git {}", args.join(" "));
        debug!(command = %command, "Running git diff");

        let output = match self.git(&args).await {
            Ok(output) => output,
            Err(ToolError::Timeout { timeout_secs, .. }) => {
                warn!(command = %command, timeout_secs, "git diff timed out");
                return Ok(ToolResult::fail(format!(
                    "git diff timed out after {timeout_secs} seconds"
                ))
                .with_suggestion("Limit the diff to one file with the path parameter"));
            }
            Err(e) => return Err(e),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Ok(ToolResult::fail(format!("git diff failed: {}", stderr.trim_end()))
                .with_metadata("command", serde_json::json!(command)));
        }

        let diff = String::from_utf8_lossy(&output.stdout);
        if diff.trim().is_empty() {
            let scope = path.map(|p| format!(" in {p}")).unwrap_or_default();
            return Ok(ToolResult::ok(format!("No changes detected{scope}"))
                .with_metadata("path", serde_json::json!(path))
                .with_metadata("has_changes", serde_json::json!(false)));
        }

        let files_changed = diff.lines().filter(|l| l.starts_with("diff --git ")).count();
        Ok(ToolResult::ok(clip(diff.trim_end()))
            .with_metadata("path", serde_json::json!(path))
            .with_metadata("has_changes", serde_json::json!(true))
            .with_metadata("files_changed", serde_json::json!(files_changed))
            .with_metadata("lines", serde_json::json!(diff.lines().count())))
    }
}
