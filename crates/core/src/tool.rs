//! Tool trait: the abstraction over agent capabilities.
//!
//! Tools are what give the agent the ability to act on a working copy:
//! run shell commands, read files, create files, edit them in place.
//!
//! Every tool declares a [`ToolEffect`] so the runtime can apply policy
//! (write-once guards, modification tracking, read caching) without
//! knowing individual tool names. Destructive edits implement
//! [`ApprovableTool`] and go through preview → approve → apply.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ToolError;
use crate::provider::ToolDefinition;

/// The outcome of a tool execution. Never an exception: failures are data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool executed successfully
    pub success: bool,

    /// Output text on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    /// Error text on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Hint for the model on how to recover
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,

    /// Structured data (paths, counts, raw file content)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: Some(output.into()),
            ..Default::default()
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Convert a tool-local error into a failed result.
    pub fn from_error(err: &ToolError) -> Self {
        let mut result = Self::fail(err.to_string());
        result.suggestion = err.suggestion().map(str::to_string);
        result
    }

    /// Output on success, error on failure; empty when neither is set.
    pub fn body(&self) -> &str {
        let text = if self.success { &self.output } else { &self.error };
        text.as_deref().unwrap_or("")
    }
}

impl std::fmt::Display for ToolResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.success {
            write!(f, "Success: {}", self.output.as_deref().unwrap_or(""))
        } else {
            write!(f, "Error: {}", self.error.as_deref().unwrap_or("unknown error"))?;
            if let Some(s) = &self.suggestion {
                write!(f, "\nSuggestion: {s}")?;
            }
            Ok(())
        }
    }
}

/// What a tool does to the outside world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolEffect {
    /// No filesystem or process side effects.
    ReadOnly,
    /// Reads a file into the conversation.
    ReadsFile,
    /// Creates a new file; subject to the write-once guard.
    CreatesFile,
    /// Modifies an existing file in place.
    EditsFile,
    /// Runs an external command.
    RunsCommand,
}

impl ToolEffect {
    /// Whether successful calls should be recorded as modifications.
    pub fn is_mutating(self) -> bool {
        matches!(self, ToolEffect::CreatesFile | ToolEffect::EditsFile)
    }
}

/// The core Tool trait.
///
/// Each tool implements this trait and is registered in a [`ToolRegistry`].
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "bash", "read_file").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Side-effect class of this tool.
    fn effect(&self) -> ToolEffect {
        ToolEffect::ReadOnly
    }

    /// The file a call targets, if any.
    fn target_path(&self, arguments: &serde_json::Value) -> Option<String> {
        arguments
            .get("path")
            .or_else(|| arguments.get("file_path"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    /// Approval-gated tools return themselves here.
    fn as_approvable(&self) -> Option<&dyn ApprovableTool> {
        None
    }

    /// Execute the tool with the given arguments.
    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError>;

    /// Names from the schema's `required` list.
    fn required_parameters(&self) -> Vec<String> {
        self.parameters_schema()
            .get("required")
            .and_then(|r| r.as_array())
            .map(|r| r.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default()
    }

    /// Convert this tool into a ToolDefinition for sending to the model.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A computed but not yet applied change.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Preview {
    /// One-line human description
    pub summary: String,

    /// Target file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_content: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_content: Option<String>,

    /// Tool-specific extras carried from preview to apply
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub data: serde_json::Map<String, serde_json::Value>,
}

/// A reviewer's answer to a preview.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Approval {
    Approved,
    Rejected { feedback: Option<String> },
}

/// Decides whether a previewed change may be applied.
#[async_trait]
pub trait Approver: Send + Sync {
    /// Display the preview. No state change.
    fn show(&self, _tool_name: &str, _preview: &Preview) {}

    /// Ask for a decision.
    async fn approve(&self, tool_name: &str, preview: &Preview) -> Approval;
}

/// Approves everything. Used for non-interactive runs and sub-agents.
pub struct AutoApprove;

#[async_trait]
impl Approver for AutoApprove {
    async fn approve(&self, _tool_name: &str, _preview: &Preview) -> Approval {
        Approval::Approved
    }
}

/// Rejects everything.
pub struct DenyAll;

#[async_trait]
impl Approver for DenyAll {
    async fn approve(&self, _tool_name: &str, _preview: &Preview) -> Approval {
        Approval::Rejected { feedback: None }
    }
}

/// A tool whose effect is applied only after approval.
#[async_trait]
pub trait ApprovableTool: Tool {
    /// Compute the change without touching the filesystem.
    async fn generate_preview(&self, arguments: &serde_json::Value) -> Result<Preview, ToolError>;

    /// Hand the preview to the approver for display.
    fn show_preview(&self, preview: &Preview, approver: &dyn Approver) {
        approver.show(self.name(), preview);
    }

    async fn get_approval(&self, preview: &Preview, approver: &dyn Approver) -> Approval {
        approver.approve(self.name(), preview).await
    }

    /// Apply a previously previewed change.
    async fn apply_changes(&self, preview: Preview) -> Result<ToolResult, ToolError>;
}

/// Run the four-step approval contract. A rejection leaves the filesystem untouched.
pub async fn execute_with_approval(
    tool: &dyn ApprovableTool,
    arguments: &serde_json::Value,
    approver: &dyn Approver,
) -> Result<ToolResult, ToolError> {
    let preview = tool.generate_preview(arguments).await?;
    tool.show_preview(&preview, approver);
    match tool.get_approval(&preview, approver).await {
        Approval::Approved => tool.apply_changes(preview).await,
        Approval::Rejected { feedback } => Ok(ToolResult::fail("User rejected the changes")
            .with_suggestion(feedback.unwrap_or_else(|| "User did not provide feedback".into()))),
    }
}

/// A registry of available tools.
///
/// The agent uses this to:
/// 1. Advertise tool definitions to the model
/// 2. Look up tools when the model requests them
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// All tools, ordered by name.
    pub fn all(&self) -> Vec<&dyn Tool> {
        let mut tools: Vec<&dyn Tool> = self.tools.values().map(|t| t.as_ref()).collect();
        tools.sort_by(|a, b| a.name().cmp(b.name()));
        tools
    }

    /// The tool list exactly as it is passed to the model request.
    pub fn to_model_schema(&self) -> Vec<ToolDefinition> {
        self.all().into_iter().map(|t| t.to_definition()).collect()
    }

    /// List all registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
