//! File write tool: create new files. Never overwrites.

use std::path::PathBuf;

use async_trait::async_trait;
use forgeloop_core::error::ToolError;
use forgeloop_core::tool::{Tool, ToolEffect, ToolResult};

use crate::resolve_path;

pub struct FileWriteTool {
    root: Option<PathBuf>,
}

impl FileWriteTool {
    pub fn new() -> Self {
        Self { root: None }
    }

    /// Relative paths resolve against `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: Some(root.into()) }
    }
}

impl Default for FileWriteTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for FileWriteTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Create a NEW file with the given content. Creates parent directories as needed. \
         Will NOT overwrite existing files; use str_replace to modify them."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path for the new file"
                },
                "content": {
                    "type": "string",
                    "description": "File content"
                }
            },
            "required": ["path", "content"]
        })
    }

    fn effect(&self) -> ToolEffect {
        ToolEffect::CreatesFile
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let path = arguments["path"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'path' argument".into()))?;

        let content = arguments["content"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'content' argument".into()))?;

        let file_path = resolve_path(self.root.as_deref(), path);

        if tokio::fs::try_exists(&file_path).await.unwrap_or(false) {
            return Ok(ToolResult::fail(format!("File already exists: {path}"))
                .with_suggestion("Use str_replace to modify existing files"));
        }

        // Ensure parent directory exists
        if let Some(parent) = file_path.parent()
            && !parent.as_os_str().is_empty()
            && let Err(e) = tokio::fs::create_dir_all(parent).await
        {
            return Ok(ToolResult::fail(format!("Failed to create directory: {e}")));
        }

        match tokio::fs::write(&file_path, content).await {
            Ok(()) => {
                let lines = content.lines().count();
                Ok(ToolResult::ok(format!(
                    "Created file with {lines} lines ({} characters)",
                    content.chars().count()
                ))
                .with_metadata("path", serde_json::json!(path))
                .with_metadata("lines", serde_json::json!(lines))
                .with_metadata("content", serde_json::json!(content))
                .with_metadata("is_new_file", serde_json::json!(true)))
            }
            Err(e) => Ok(ToolResult::fail(format!("Failed to create file: {e}"))
                .with_metadata("path", serde_json::json!(path))),
        }
    }
}
