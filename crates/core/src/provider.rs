//! Provider trait: the normalized contract over model backends.
//!
//! Every backend turns a [`ChatRequest`] into a [`ChatResponse`] and maps its
//! own failure modes onto [`LlmError`]. Callers never see wire formats.
//!
//! Implementations: Anthropic, OpenAI-compatible, and the fallback chain.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::message::{Message, ToolCall};

/// Per-call generation options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatOptions {
    /// Temperature (0.0 = deterministic)
    #[serde(default)]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Stop sequences
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

fn default_max_tokens() -> u32 {
    4096
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: default_max_tokens(),
            stop: Vec::new(),
        }
    }
}

/// One model call: conversation, available tools, system prompt, options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    /// The conversation messages (no system prompt; see `system`)
    pub messages: Vec<Message>,

    /// Tools the model can call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// System prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    #[serde(default)]
    pub options: ChatOptions,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.options = options;
        self
    }
}

/// A tool definition sent to the model so it knows what tools it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// Why the model stopped generating, normalized across providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural end of turn.
    Stop,
    /// The model wants tools executed.
    ToolCalls,
    /// Output was cut off by the token limit.
    Length,
    Other,
}

impl FinishReason {
    /// Map a provider's raw stop reason.
    pub fn from_provider(raw: Option<&str>) -> Self {
        match raw {
            Some("stop" | "end_turn" | "stop_sequence") => FinishReason::Stop,
            Some("tool_use" | "tool_calls" | "function_call") => FinishReason::ToolCalls,
            Some("length" | "max_tokens") => FinishReason::Length,
            _ => FinishReason::Other,
        }
    }
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A normalized model response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Text content, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Requested tool calls, in the order the model emitted them
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,

    pub finish_reason: FinishReason,

    /// Which model actually responded
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl ChatResponse {
    /// Trimmed text, `None` when empty.
    pub fn text(&self) -> Option<&str> {
        self.content.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// The core Provider trait.
///
/// The agent loop calls `chat()` without knowing which backend (or chain of
/// backends) answers.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "anthropic").
    fn name(&self) -> &str;

    /// The model this provider targets.
    fn model(&self) -> &str;

    /// Send a request and get a complete response.
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_reason_normalization() {
        assert_eq!(FinishReason::from_provider(Some("end_turn")), FinishReason::Stop);
        assert_eq!(FinishReason::from_provider(Some("stop")), FinishReason::Stop);
        assert_eq!(FinishReason::from_provider(Some("tool_use")), FinishReason::ToolCalls);
        assert_eq!(FinishReason::from_provider(Some("tool_calls")), FinishReason::ToolCalls);
        assert_eq!(FinishReason::from_provider(Some("max_tokens")), FinishReason::Length);
        assert_eq!(FinishReason::from_provider(None), FinishReason::Other);
    }

    #[test]
    fn chat_request_builder() {
        let req = ChatRequest::new(vec![Message::user("hi")])
            .with_system("be brief")
            .with_options(ChatOptions { temperature: 0.2, ..Default::default() });
        assert_eq!(req.system.as_deref(), Some("be brief"));
        assert!((req.options.temperature - 0.2).abs() < f32::EPSILON);
        assert_eq!(req.options.max_tokens, 4096);
        assert!(req.tools.is_empty());
    }

    #[test]
    fn response_text_ignores_whitespace() {
        let resp = ChatResponse {
            content: Some("   \n".into()),
            tool_calls: vec![],
            finish_reason: FinishReason::Stop,
            model: "m".into(),
            usage: None,
        };
        assert!(resp.text().is_none());
        assert!(!resp.has_tool_calls());
    }

    #[test]
    fn tool_definition_serialization() {
        let tool = ToolDefinition {
            name: "bash".into(),
            description: "Execute a shell command".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string", "description": "The command to run" }
                },
                "required": ["command"]
            }),
        };
        let json = serde_json::to_string(&tool).unwrap();
        assert!(json.contains("bash"));
        assert!(json.contains("command"));
    }
}
