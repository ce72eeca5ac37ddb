//! Exact, unique string replacement with a reviewable preview.

use std::path::PathBuf;

use async_trait::async_trait;
use forgeloop_core::error::ToolError;
use forgeloop_core::tool::{ApprovableTool, AutoApprove, Preview, Tool, ToolEffect, ToolResult};
use similar::TextDiff;
use tracing::debug;

use crate::resolve_path;

pub struct StrReplaceTool {
    root: Option<PathBuf>,
}

impl StrReplaceTool {
    pub fn new() -> Self {
        Self { root: None }
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: Some(root.into()) }
    }

    fn str_arg<'a>(arguments: &'a serde_json::Value, key: &str) -> Result<&'a str, ToolError> {
        arguments[key]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments(format!("Missing '{key}' argument")))
    }
}

impl Default for StrReplaceTool {
    fn default() -> Self {
        Self::new()
    }
}

/// Unified diff of `old` against `new`, labelled with `path`.
pub fn unified_diff(path: &str, old: &str, new: &str) -> String {
    TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(3)
        .header(&format!("a/{path}"), &format!("b/{path}"))
        .to_string()
}

fn preview_error(message: impl Into<String>, suggestion: impl Into<String>) -> ToolError {
    ToolError::Preview {
        message: message.into(),
        suggestion: Some(suggestion.into()),
    }
}

#[async_trait]
impl Tool for StrReplaceTool {
    fn name(&self) -> &str {
        "str_replace"
    }

    fn description(&self) -> &str {
        "Replace an exact string in an existing file. old_str must match the file exactly \
         (including whitespace and indentation) and must occur exactly once. Include enough \
         surrounding lines to make it unique. Do not include the line numbers shown by read_file."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path of the file to edit"
                },
                "old_str": {
                    "type": "string",
                    "description": "Exact text to replace (must be unique in the file)"
                },
                "new_str": {
                    "type": "string",
                    "description": "Replacement text"
                }
            },
            "required": ["path", "old_str", "new_str"]
        })
    }

    fn effect(&self) -> ToolEffect {
        ToolEffect::EditsFile
    }

    fn as_approvable(&self) -> Option<&dyn ApprovableTool> {
        Some(self)
    }

    /// Non-interactive path: preview then apply.
    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        forgeloop_core::tool::execute_with_approval(self, &arguments, &AutoApprove).await
    }
}

#[async_trait]
impl ApprovableTool for StrReplaceTool {
    async fn generate_preview(&self, arguments: &serde_json::Value) -> Result<Preview, ToolError> {
        let path = Self::str_arg(arguments, "path")?;
        let old_str = Self::str_arg(arguments, "old_str")?;
        let new_str = Self::str_arg(arguments, "new_str")?;

        if old_str.is_empty() {
            return Err(preview_error(
                "old_str must not be empty",
                "Use write_file to create new files",
            ));
        }

        let file_path = resolve_path(self.root.as_deref(), path);
        let old_content = match tokio::fs::read_to_string(&file_path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(preview_error(
                    format!("File not found: {path}"),
                    "Use write_file to create new files",
                ));
            }
            Err(e) => return Err(ToolError::Io(e)),
        };

        let count = old_content.matches(old_str).count();
        if count == 0 {
            let trimmed = old_str.trim();
            let suggestion = if !trimmed.is_empty() && old_content.contains(trimmed) {
                "The text exists but whitespace differs. Read the file again and copy the exact indentation"
            } else {
                "Read the file again and copy the exact text to replace"
            };
            return Err(preview_error("Exact string not found in file", suggestion));
        }
        if count > 1 {
            return Err(preview_error(
                format!("String appears {count} times in file (must be unique)"),
                "Include more surrounding lines to make old_str unique",
            ));
        }

        let new_content = old_content.replacen(old_str, new_str, 1);
        let old_lines = old_str.lines().count().max(1);
        let new_lines = new_str.lines().count();

        debug!(path = %path, old_lines, new_lines, "Generated replacement preview");

        let mut data = serde_json::Map::new();
        let diff = unified_diff(path, &old_content, &new_content);
        data.insert("diff".into(), serde_json::json!(diff));
        data.insert("old_lines".into(), serde_json::json!(old_lines));
        data.insert("new_lines".into(), serde_json::json!(new_lines));

        Ok(Preview {
            summary: format!("Replace {old_lines} line(s) with {new_lines} line(s) in {path}"),
            path: Some(path.to_string()),
            old_content: Some(old_content),
            new_content: Some(new_content),
            data,
        })
    }

    async fn apply_changes(&self, preview: Preview) -> Result<ToolResult, ToolError> {
        let (Some(path), Some(old_content), Some(new_content)) =
            (preview.path, preview.old_content, preview.new_content)
        else {
            return Err(ToolError::InvalidArguments("Preview is missing file contents".into()));
        };

        let file_path = resolve_path(self.root.as_deref(), &path);
        let current = tokio::fs::read_to_string(&file_path).await?;
        if current != old_content {
            return Ok(ToolResult::fail(format!("File changed since preview: {path}"))
                .with_suggestion("Read the file again and retry the replacement"));
        }

        tokio::fs::write(&file_path, &new_content).await?;

        let old_lines = preview.data.get("old_lines").and_then(|v| v.as_u64()).unwrap_or(0);
        let new_lines = preview.data.get("new_lines").and_then(|v| v.as_u64()).unwrap_or(0);

        Ok(ToolResult::ok(format!(
            "Successfully replaced {old_lines} line(s) with {new_lines} line(s)"
        ))
        .with_metadata("path", serde_json::json!(path))
        .with_metadata("old_content", serde_json::json!(old_content))
        .with_metadata("new_content", serde_json::json!(new_content)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgeloop_core::tool::{DenyAll, execute_with_approval};

    fn setup(content: &str) -> (tempfile::TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calc.py");
        std::fs::write(&path, content).unwrap();
        (dir, path.to_string_lossy().into_owned())
    }

    #[tokio::test]
    async fn replaces_unique_string() {
        let (_dir, path) = setup("def add(a, b):\n    return a - b\n");

        let result = StrReplaceTool::new()
            .execute(serde_json::json!({
                "path": path,
                "old_str": "return a - b",
                "new_str": "return a + b"
            }))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(
            result.output.as_deref(),
            Some("Successfully replaced 1 line(s) with 1 line(s)")
        );
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "def add(a, b):\n    return a + b\n"
        );
        assert_eq!(result.metadata["old_content"], "def add(a, b):\n    return a - b\n");
    }

    #[tokio::test]
    async fn ambiguous_match_is_rejected_in_preview() {
        let (_dir, path) = setup("x = 1\nx = 1\n");
        let args = serde_json::json!({"path": path, "old_str": "x = 1", "new_str": "x = 2"});
        let err = StrReplaceTool::new().generate_preview(&args).await.unwrap_err();
        assert!(err.to_string().contains("String appears 2 times in file (must be unique)"));
    }

    #[tokio::test]
    async fn whitespace_mismatch_gets_a_hint() {
        let (_dir, path) = setup("    return a - b\n");
        let args = serde_json::json!({"path": path, "old_str": "return a - b  ", "new_str": "x"});
        let err = StrReplaceTool::new().generate_preview(&args).await.unwrap_err();
        assert!(err.to_string().contains("Exact string not found in file"));
        assert!(err.suggestion().unwrap().contains("whitespace"));
    }

    #[tokio::test]
    async fn missing_file_is_a_preview_error() {
        let args = serde_json::json!({"path": "/no/such/file.py", "old_str": "a", "new_str": "b"});
        let err = StrReplaceTool::new().generate_preview(&args).await.unwrap_err();
        assert!(matches!(err, ToolError::Preview { .. }));
    }

    #[tokio::test]
    async fn rejection_leaves_file_untouched() {
        let (_dir, path) = setup("a = 1\n");
        let tool = StrReplaceTool::new();
        let result = execute_with_approval(
            &tool,
            &serde_json::json!({"path": path, "old_str": "a = 1", "new_str": "a = 2"}),
            &DenyAll,
        )
        .await
        .unwrap();
        assert!(!result.success);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a = 1\n");
    }

    #[tokio::test]
    async fn preview_carries_a_diff() {
        let (_dir, path) = setup("a = 1\nb = 2\n");
        let args = serde_json::json!({"path": path, "old_str": "b = 2", "new_str": "b = 3"});
        let preview = StrReplaceTool::new().generate_preview(&args).await.unwrap();
        let diff = preview.data["diff"].as_str().unwrap();
        assert!(diff.contains("-b = 2"));
        assert!(diff.contains("+b = 3"));
    }

    #[tokio::test]
    async fn stale_preview_is_not_applied() {
        let (_dir, path) = setup("a = 1\n");
        let tool = StrReplaceTool::new();
        let args = serde_json::json!({"path": path, "old_str": "a = 1", "new_str": "a = 2"});
        let preview = tool.generate_preview(&args).await.unwrap();
        std::fs::write(&path, "a = 5\n").unwrap();

        let result = tool.apply_changes(preview).await.unwrap();
        assert!(!result.success);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a = 5\n");
    }
}
