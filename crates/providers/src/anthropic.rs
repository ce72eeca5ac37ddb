//! Anthropic native provider implementation.
//!
//! Uses Anthropic's Messages API directly (not an OpenAI-compatible proxy).
//!
//! Wire differences handled here:
//! - `x-api-key` header authentication (not Bearer) plus `anthropic-version`
//! - System prompt as a top-level field
//! - Tool schemas under `input_schema`
//! - Tool results sent as user turns carrying `tool_result` blocks
//! - Usage reported as `input_tokens` / `output_tokens`

use async_trait::async_trait;
use forgeloop_core::message::{Message, Role, ToolCall};
use forgeloop_core::provider::*;
use forgeloop_core::LlmError;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::http;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// Anthropic native Messages API provider.
pub struct AnthropicProvider {
    name: String,
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider for `model`.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            model: model.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Convert messages to Anthropic API format with content blocks.
    ///
    /// Consecutive turns with the same API role are merged, since tool
    /// results and interior system markers both travel as user turns.
    fn to_api_messages(messages: &[Message]) -> Vec<AnthropicMessage> {
        let mut result: Vec<AnthropicMessage> = Vec::new();

        for msg in messages {
            let (role, blocks) = match msg.role {
                Role::User => ("user", vec![ContentBlock::Text { text: msg.content.clone() }]),
                Role::System => (
                    "user",
                    vec![ContentBlock::Text {
                        text: format!("[system] {}", msg.content),
                    }],
                ),
                Role::Assistant => {
                    let mut blocks = Vec::new();
                    if !msg.content.trim().is_empty() {
                        blocks.push(ContentBlock::Text { text: msg.content.clone() });
                    }
                    for tc in &msg.tool_calls {
                        blocks.push(ContentBlock::ToolUse {
                            id: tc.id.clone(),
                            name: tc.name.clone(),
                            input: serde_json::Value::Object(tc.arguments.clone()),
                        });
                    }
                    if blocks.is_empty() {
                        continue;
                    }
                    ("assistant", blocks)
                }
                Role::Tool => (
                    "user",
                    vec![ContentBlock::ToolResult {
                        tool_use_id: msg.tool_call_id.clone().unwrap_or_default(),
                        content: msg.content.clone(),
                        is_error: msg.metadata.get("success").and_then(|v| v.as_bool())
                            == Some(false),
                    }],
                ),
            };

            match result.last_mut() {
                Some(last) if last.role == role => last.content.extend(blocks),
                _ => result.push(AnthropicMessage {
                    role: role.into(),
                    content: AnthropicContent::Blocks(blocks),
                }),
            }
        }

        for msg in &mut result {
            msg.content.simplify();
        }
        result
    }

    /// Convert tool definitions to Anthropic format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<AnthropicTool> {
        tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.parameters.clone(),
            })
            .collect()
    }

    fn build_body(&self, request: &ChatRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": Self::to_api_messages(&request.messages),
            "max_tokens": request.options.max_tokens,
            "temperature": request.options.temperature,
        });

        if let Some(ref sys) = request.system {
            body["system"] = serde_json::json!(sys);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }

        if !request.options.stop.is_empty() {
            body["stop_sequences"] = serde_json::json!(request.options.stop);
        }

        body
    }

    /// Convert an Anthropic API response to the normalized response.
    fn to_chat_response(resp: AnthropicResponse) -> ChatResponse {
        let mut text_content = String::new();
        let mut tool_calls = Vec::new();

        for block in resp.content {
            match block {
                ResponseContentBlock::Text { text } => {
                    if !text_content.is_empty() {
                        text_content.push('\n');
                    }
                    text_content.push_str(&text);
                }
                ResponseContentBlock::ToolUse { id, name, input } => {
                    tool_calls.push(ToolCall::from_value(id, name, input));
                }
                ResponseContentBlock::Other => {}
            }
        }

        let usage = Usage {
            prompt_tokens: resp.usage.input_tokens,
            completion_tokens: resp.usage.output_tokens,
            total_tokens: resp.usage.input_tokens + resp.usage.output_tokens,
        };

        ChatResponse {
            content: (!text_content.is_empty()).then_some(text_content),
            tool_calls,
            finish_reason: FinishReason::from_provider(resp.stop_reason.as_deref()),
            model: resp.model,
            usage: Some(usage),
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_body(&request);

        debug!(
            provider = "anthropic",
            model = %self.model,
            messages = request.messages.len(),
            "Sending chat request"
        );

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(http::transport)?;

        let status = response.status().as_u16();
        if status != 200 {
            let retry_after = http::retry_after(response.headers());
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Anthropic API error");
            return Err(http::classify(&self.name, status, &error_body, retry_after));
        }

        let api_resp: AnthropicResponse = response.json().await.map_err(|e| LlmError::Api {
            status_code: 200,
            message: format!("Failed to parse Anthropic response: {e}"),
        })?;

        Ok(Self::to_chat_response(api_resp))
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: AnthropicContent,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum AnthropicContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl AnthropicContent {
    fn extend(&mut self, more: Vec<ContentBlock>) {
        match self {
            AnthropicContent::Blocks(blocks) => blocks.extend(more),
            AnthropicContent::Text(text) => {
                let mut blocks = vec![ContentBlock::Text { text: std::mem::take(text) }];
                blocks.extend(more);
                *self = AnthropicContent::Blocks(blocks);
            }
        }
    }

    /// A lone text block becomes a plain string.
    fn simplify(&mut self) {
        if let AnthropicContent::Blocks(blocks) = self
            && let [ContentBlock::Text { text }] = blocks.as_mut_slice()
        {
            *self = AnthropicContent::Text(std::mem::take(text));
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    model: String,
    content: Vec<ResponseContentBlock>,
    usage: AnthropicUsage,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponseContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    /// Thinking and any future block types.
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str, name: &str, args: serde_json::Value) -> ToolCall {
        ToolCall::from_value(id, name, args)
    }

    #[test]
    fn constructor() {
        let provider = AnthropicProvider::new("sk-ant-test", "claude-sonnet-4-5");
        assert_eq!(provider.name(), "anthropic");
        assert_eq!(provider.model(), "claude-sonnet-4-5");
        assert_eq!(provider.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn constructor_with_base_url() {
        let provider =
            AnthropicProvider::new("sk-ant-test", "m").with_base_url("https://custom.proxy.com/");
        assert_eq!(provider.base_url, "https://custom.proxy.com");
    }

    #[test]
    fn system_prompt_is_top_level() {
        let provider = AnthropicProvider::new("k", "claude-sonnet-4-5");
        let req =
            ChatRequest::new(vec![Message::user("Hello")]).with_system("You are a coding agent");
        let body = provider.build_body(&req);
        assert_eq!(body["system"], "You are a coding agent");
        assert_eq!(body["model"], "claude-sonnet-4-5");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn message_conversion_user_assistant() {
        let messages = vec![Message::user("Hello"), Message::assistant("Hi!")];
        let api_msgs = AnthropicProvider::to_api_messages(&messages);
        assert_eq!(api_msgs.len(), 2);
        assert_eq!(api_msgs[0].role, "user");
        assert_eq!(api_msgs[1].role, "assistant");
        assert!(matches!(&api_msgs[1].content, AnthropicContent::Text(t) if t == "Hi!"));
    }

    #[test]
    fn message_conversion_with_tool_calls() {
        let read = call("toolu_123", "read_file", serde_json::json!({"path": "a.py"}));
        let msg = Message::assistant("Let me look").with_tool_calls(vec![read]);

        let api_msgs = AnthropicProvider::to_api_messages(&[msg]);
        assert_eq!(api_msgs.len(), 1);
        assert_eq!(api_msgs[0].role, "assistant");

        match &api_msgs[0].content {
            AnthropicContent::Blocks(blocks) => {
                assert_eq!(blocks.len(), 2);
                assert!(matches!(&blocks[0], ContentBlock::Text { text } if text == "Let me look"));
                match &blocks[1] {
                    ContentBlock::ToolUse { id, name, input } => {
                        assert_eq!(id, "toolu_123");
                        assert_eq!(name, "read_file");
                        assert_eq!(input["path"], "a.py");
                    }
                    _ => panic!("Expected tool_use block"),
                }
            }
            _ => panic!("Expected blocks content"),
        }
    }

    #[test]
    fn tool_result_becomes_user_turn() {
        let failed = Message::tool_result("toolu_9", "Error: boom")
            .with_metadata("success", serde_json::json!(false));
        let api_msgs = AnthropicProvider::to_api_messages(&[failed]);
        assert_eq!(api_msgs[0].role, "user");
        match &api_msgs[0].content {
            AnthropicContent::Blocks(blocks) => match &blocks[0] {
                ContentBlock::ToolResult { tool_use_id, content, is_error } => {
                    assert_eq!(tool_use_id, "toolu_9");
                    assert_eq!(content, "Error: boom");
                    assert!(*is_error);
                }
                _ => panic!("Expected tool_result block"),
            },
            _ => panic!("Expected blocks content"),
        }
    }

    #[test]
    fn consecutive_user_turns_are_merged() {
        let ls = call("t1", "bash", serde_json::json!({"command": "ls"}));
        let messages = vec![
            Message::user("Fix the bug"),
            Message::assistant("").with_tool_calls(vec![ls]),
            Message::tool_result("t1", "Success: a.py"),
            Message::system("[pruned 3 messages]"),
        ];
        let api_msgs = AnthropicProvider::to_api_messages(&messages);
        assert_eq!(api_msgs.len(), 3);
        assert_eq!(api_msgs[2].role, "user");
        match &api_msgs[2].content {
            AnthropicContent::Blocks(blocks) => {
                assert_eq!(blocks.len(), 2);
                assert!(matches!(
                    &blocks[1],
                    ContentBlock::Text { text } if text.starts_with("[system]")
                ));
            }
            _ => panic!("Expected merged blocks"),
        }
    }

    #[test]
    fn empty_assistant_text_is_dropped() {
        let messages = vec![Message::user("hi"), Message::assistant("  ")];
        assert_eq!(AnthropicProvider::to_api_messages(&messages).len(), 1);
    }

    #[test]
    fn tool_definition_conversion() {
        let tools = vec![ToolDefinition {
            name: "bash".into(),
            description: "Run a command".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {"command": {"type": "string"}},
                "required": ["command"]
            }),
        }];
        let api_tools = AnthropicProvider::to_api_tools(&tools);
        assert_eq!(api_tools.len(), 1);
        let json = serde_json::to_value(&api_tools[0]).unwrap();
        assert_eq!(json["input_schema"]["type"], "object");
        assert!(json.get("parameters").is_none());
    }

    #[test]
    fn parse_text_response() {
        let resp: AnthropicResponse = serde_json::from_str(
            r#"{
                "id": "msg_01",
                "model": "claude-sonnet-4-5",
                "content": [{"type": "text", "text": "Final Answer: done"}],
                "usage": {"input_tokens": 10, "output_tokens": 5},
                "stop_reason": "end_turn"
            }"#,
        )
        .unwrap();

        let cr = AnthropicProvider::to_chat_response(resp);
        assert_eq!(cr.content.as_deref(), Some("Final Answer: done"));
        assert!(cr.tool_calls.is_empty());
        assert_eq!(cr.finish_reason, FinishReason::Stop);
        let usage = cr.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 10);
        assert_eq!(usage.completion_tokens, 5);
        assert_eq!(usage.total_tokens, 15);
    }

    #[test]
    fn parse_tool_use_response() {
        let resp: AnthropicResponse = serde_json::from_str(
            r#"{
                "id": "msg_02",
                "model": "claude-sonnet-4-5",
                "content": [
                    {"type": "thinking", "thinking": "hmm", "signature": "x"},
                    {"type": "tool_use", "id": "toolu_abc", "name": "bash", "input": {"command": "pytest"}}
                ],
                "usage": {"input_tokens": 20, "output_tokens": 10},
                "stop_reason": "tool_use"
            }"#,
        )
        .unwrap();

        let cr = AnthropicProvider::to_chat_response(resp);
        assert!(cr.content.is_none());
        assert_eq!(cr.finish_reason, FinishReason::ToolCalls);
        assert_eq!(cr.tool_calls.len(), 1);
        assert_eq!(cr.tool_calls[0].id, "toolu_abc");
        assert_eq!(cr.tool_calls[0].arg_str("command"), Some("pytest"));
    }
}
