//! OpenAI-compatible provider implementation.
//!
//! Works with: OpenAI, OpenRouter, Ollama, vLLM, and any endpoint exposing
//! `/chat/completions` with function calling.
//!
//! Wire differences handled here:
//! - System prompt as the leading `system` message
//! - Tools wrapped as `{"type": "function", "function": {..., "parameters"}}`
//! - Tool call arguments travel as JSON-encoded strings
//! - Usage reported as `prompt_tokens` / `completion_tokens`

use async_trait::async_trait;
use forgeloop_core::message::{Message, Role, ToolCall};
use forgeloop_core::provider::*;
use forgeloop_core::LlmError;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::http;

/// An OpenAI-compatible model provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::new("openai", "https://api.openai.com/v1", api_key, model)
    }

    /// Create an OpenRouter provider (convenience constructor).
    pub fn openrouter(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::new("openrouter", "https://openrouter.ai/api/v1", api_key, model)
    }

    /// Create an Ollama provider (convenience constructor).
    pub fn ollama(base_url: Option<&str>, model: impl Into<String>) -> Self {
        Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            "ollama", // Ollama doesn't need a real key
            model,
        )
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(system: Option<&str>, messages: &[Message]) -> Vec<ApiMessage> {
        let mut result = Vec::with_capacity(messages.len() + 1);
        if let Some(sys) = system {
            result.push(ApiMessage {
                role: "system".into(),
                content: Some(sys.to_string()),
                tool_calls: None,
                tool_call_id: None,
            });
        }

        result.extend(messages.iter().map(|m| ApiMessage {
            role: m.role.to_string(),
            content: if m.role == Role::Assistant
                && m.content.is_empty()
                && !m.tool_calls.is_empty()
            {
                None
            } else {
                Some(m.content.clone())
            },
            tool_calls: if m.tool_calls.is_empty() {
                None
            } else {
                Some(
                    m.tool_calls
                        .iter()
                        .map(|tc| ApiToolCall {
                            id: tc.id.clone(),
                            r#type: "function".into(),
                            function: ApiFunction {
                                name: tc.name.clone(),
                                arguments: serde_json::Value::Object(tc.arguments.clone())
                                    .to_string(),
                            },
                        })
                        .collect(),
                )
            },
            tool_call_id: m.tool_call_id.clone(),
        }));

        result
    }

    /// Convert tool definitions to OpenAI API format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn build_body(&self, request: &ChatRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": Self::to_api_messages(request.system.as_deref(), &request.messages),
            "temperature": request.options.temperature,
            "max_tokens": request.options.max_tokens,
            "stream": false,
        });

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }

        if !request.options.stop.is_empty() {
            body["stop"] = serde_json::json!(request.options.stop);
        }

        body
    }

    fn to_chat_response(api_response: ApiResponse) -> Result<ChatResponse, LlmError> {
        let choice = api_response.choices.into_iter().next().ok_or_else(|| LlmError::Api {
            status_code: 200,
            message: "No choices in response".into(),
        })?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| {
                let args = parse_arguments(&tc.function.arguments);
                ToolCall::new(tc.id, tc.function.name, args)
            })
            .collect();

        let usage = api_response.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(ChatResponse {
            content: choice.message.content.filter(|c| !c.is_empty()),
            tool_calls,
            finish_reason: FinishReason::from_provider(choice.finish_reason.as_deref()),
            model: api_response.model,
            usage,
        })
    }
}

/// Decode the JSON-string arguments; undecodable input is kept under `_raw`.
fn parse_arguments(raw: &str) -> serde_json::Map<String, serde_json::Value> {
    if raw.trim().is_empty() {
        return serde_json::Map::new();
    }
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Object(map)) => map,
        _ => {
            warn!(arguments = %raw, "Tool call arguments are not a JSON object");
            let mut map = serde_json::Map::new();
            map.insert("_raw".into(), serde_json::Value::String(raw.to_string()));
            map
        }
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(&request);

        debug!(
            provider = %self.name,
            model = %self.model,
            messages = request.messages.len(),
            "Sending chat request"
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(http::transport)?;

        let status = response.status().as_u16();
        if status != 200 {
            let retry_after = http::retry_after(response.headers());
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Provider returned error");
            return Err(http::classify(&self.name, status, &error_body, retry_after));
        }

        let api_response: ApiResponse = response.json().await.map_err(|e| LlmError::Api {
            status_code: 200,
            message: format!("Failed to parse response: {e}"),
        })?;

        Self::to_chat_response(api_response)
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openrouter_constructor() {
        let p = OpenAiCompatProvider::openrouter("sk-or-test", "anthropic/claude-sonnet-4");
        assert_eq!(p.name(), "openrouter");
        assert_eq!(p.base_url, "https://openrouter.ai/api/v1");
        assert_eq!(p.model(), "anthropic/claude-sonnet-4");
    }

    #[test]
    fn ollama_constructor() {
        let p = OpenAiCompatProvider::ollama(None, "qwen2.5-coder");
        assert_eq!(p.name(), "ollama");
        assert_eq!(p.base_url, "http://localhost:11434/v1");
    }

    #[test]
    fn system_prompt_leads_messages() {
        let msgs =
            OpenAiCompatProvider::to_api_messages(Some("be terse"), &[Message::user("Hello")]);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].role, "system");
        assert_eq!(msgs[0].content.as_deref(), Some("be terse"));
        assert_eq!(msgs[1].role, "user");
    }

    #[test]
    fn tool_definition_conversion() {
        let tools = vec![ToolDefinition {
            name: "read_file".into(),
            description: "Read a file".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {"path": {"type": "string"}}
            }),
        }];
        let json = serde_json::to_value(OpenAiCompatProvider::to_api_tools(&tools)).unwrap();
        assert_eq!(json[0]["type"], "function");
        assert_eq!(json[0]["function"]["name"], "read_file");
        assert_eq!(json[0]["function"]["parameters"]["type"], "object");
    }

    #[test]
    fn message_conversion_with_tool_calls() {
        let msg = Message::assistant("").with_tool_calls(vec![ToolCall::from_value(
            "call_1",
            "bash",
            serde_json::json!({"command": "ls"}),
        )]);
        let msgs = OpenAiCompatProvider::to_api_messages(None, &[msg]);
        assert!(msgs[0].content.is_none());
        let tc = &msgs[0].tool_calls.as_ref().unwrap()[0];
        assert_eq!(tc.function.name, "bash");
        let args: serde_json::Value = serde_json::from_str(&tc.function.arguments).unwrap();
        assert_eq!(args["command"], "ls");
    }

    #[test]
    fn message_conversion_tool_response() {
        let result = Message::tool_result("call_1", "Success: ok");
        let msgs = OpenAiCompatProvider::to_api_messages(None, &[result]);
        assert_eq!(msgs[0].role, "tool");
        assert_eq!(msgs[0].tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn parse_tool_call_response() {
        let api: ApiResponse = serde_json::from_str(
            r#"{
                "model": "gpt-4o",
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [{
                            "id": "call_abc",
                            "type": "function",
                            "function": {"name": "write_file", "arguments": "{\"path\":\"x.py\",\"content\":\"print(1)\"}"}
                        }]
                    },
                    "finish_reason": "tool_calls"
                }],
                "usage": {"prompt_tokens": 30, "completion_tokens": 12, "total_tokens": 42}
            }"#,
        )
        .unwrap();

        let resp = OpenAiCompatProvider::to_chat_response(api).unwrap();
        assert!(resp.content.is_none());
        assert_eq!(resp.finish_reason, FinishReason::ToolCalls);
        assert_eq!(resp.tool_calls[0].arg_str("path"), Some("x.py"));
        assert_eq!(resp.usage.unwrap().total_tokens, 42);
    }

    #[test]
    fn parse_text_response() {
        let api: ApiResponse = serde_json::from_str(
            r#"{"model": "gpt-4o", "choices": [{"message": {"role": "assistant", "content": "All done."}, "finish_reason": "stop"}]}"#,
        )
        .unwrap();
        let resp = OpenAiCompatProvider::to_chat_response(api).unwrap();
        assert_eq!(resp.content.as_deref(), Some("All done."));
        assert_eq!(resp.finish_reason, FinishReason::Stop);
        assert!(resp.usage.is_none());
    }

    #[test]
    fn empty_choices_is_an_api_error() {
        let api: ApiResponse =
            serde_json::from_str(r#"{"model": "gpt-4o", "choices": []}"#).unwrap();
        assert!(matches!(OpenAiCompatProvider::to_chat_response(api), Err(LlmError::Api { .. })));
    }

    #[test]
    fn malformed_arguments_are_preserved() {
        let args = parse_arguments("{not json");
        assert_eq!(args["_raw"], "{not json");
        assert!(parse_arguments("").is_empty());
    }
}
