//! File read tool: line-numbered file contents with optional ranges.

use std::path::PathBuf;

use async_trait::async_trait;
use forgeloop_core::error::ToolError;
use forgeloop_core::tool::{Tool, ToolEffect, ToolResult};

use crate::resolve_path;

pub struct FileReadTool {
    root: Option<PathBuf>,
}

impl FileReadTool {
    /// Relative paths resolve against the process cwd.
    pub fn new() -> Self {
        Self { root: None }
    }

    /// Relative paths resolve against `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: Some(root.into()) }
    }
}

impl Default for FileReadTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a text file. Output is line-numbered (`   N | text`); the numbers are not part of the file. \
         Use start_line/end_line to read part of a large file. Always read a file before editing it."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The file path to read"
                },
                "start_line": {
                    "type": "integer",
                    "description": "First line to read (1-indexed)"
                },
                "end_line": {
                    "type": "integer",
                    "description": "Last line to read (inclusive)"
                }
            },
            "required": ["path"]
        })
    }

    fn effect(&self) -> ToolEffect {
        ToolEffect::ReadsFile
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let path = arguments["path"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'path' argument".into()))?;
        let start_line = arguments["start_line"].as_u64().map(|n| n as usize);
        let end_line = arguments["end_line"].as_u64().map(|n| n as usize);

        let file_path = resolve_path(self.root.as_deref(), path);

        let metadata = match tokio::fs::metadata(&file_path).await {
            Ok(m) => m,
            Err(_) => {
                return Ok(ToolResult::fail(format!("File not found: {path}")).with_suggestion(
                    "Use bash to search for the file (e.g., 'find . -name filename')",
                ));
            }
        };
        if !metadata.is_file() {
            return Ok(ToolResult::fail(format!("Path is not a file: {path}"))
                .with_suggestion("Provide a file path, not a directory"));
        }

        let content = match tokio::fs::read_to_string(&file_path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                return Ok(ToolResult::fail(format!("Cannot read file (not a text file): {path}"))
                    .with_suggestion("This appears to be a binary file"));
            }
            Err(e) => {
                return Ok(ToolResult::fail(format!("Failed to read file: {e}"))
                    .with_metadata("path", serde_json::json!(path)));
            }
        };

        let lines: Vec<&str> = content.lines().collect();
        let total_lines = lines.len();

        let (start, end) = if start_line.is_some() || end_line.is_some() {
            let start = start_line.unwrap_or(1).saturating_sub(1);
            let end = end_line.unwrap_or(total_lines);
            if end > total_lines || start >= end {
                return Ok(ToolResult::fail(format!(
                    "Invalid line range: {}-{} (file has {total_lines} lines)",
                    start_line.map(|n| n.to_string()).unwrap_or_default(),
                    end_line.map(|n| n.to_string()).unwrap_or_default(),
                ))
                .with_suggestion(format!("Use a valid range between 1 and {total_lines}")));
            }
            (start, end)
        } else {
            (0, total_lines)
        };

        let numbered = lines[start..end]
            .iter()
            .enumerate()
            .map(|(i, line)| format!("{:4} | {}", start + i + 1, line))
            .collect::<Vec<_>>()
            .join("\n");

        let whole_file = start == 0 && end == total_lines;
        let mut result = ToolResult::ok(numbered)
            .with_metadata("path", serde_json::json!(path))
            .with_metadata("total_lines", serde_json::json!(total_lines))
            .with_metadata("start_line", serde_json::json!(start + 1))
            .with_metadata("end_line", serde_json::json!(end));
        if whole_file {
            result = result.with_metadata("content", serde_json::json!(content));
        }
        Ok(result)
    }
}
