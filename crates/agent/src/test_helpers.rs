//! Shared test helpers for agent tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use forgeloop_core::error::LlmError;
use forgeloop_core::message::ToolCall;
use forgeloop_core::provider::{ChatRequest, ChatResponse, FinishReason, Provider, Usage};

type Hook = Box<dyn Fn() + Send + Sync>;

/// A provider that answers from a script.
///
/// Each call to `chat` pops the next scripted result. Panics if more calls
/// are made than responses provided.
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<Result<ChatResponse, LlmError>>>,
    call_count: Mutex<usize>,
    last_request: Mutex<Option<ChatRequest>>,
    hook: Mutex<Option<Hook>>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<Result<ChatResponse, LlmError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            call_count: Mutex::new(0),
            last_request: Mutex::new(None),
            hook: Mutex::new(None),
        }
    }

    pub fn call_count(&self) -> usize {
        *self.call_count.lock().unwrap()
    }

    pub fn last_request(&self) -> Option<ChatRequest> {
        self.last_request.lock().unwrap().clone()
    }

    /// Run `hook` on every call, before the response is returned.
    pub fn on_call(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.hook.lock().unwrap() = Some(Box::new(hook));
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        let next = {
            let mut count = self.call_count.lock().unwrap();
            *count += 1;
            *self.last_request.lock().unwrap() = Some(request);
            if let Some(hook) = self.hook.lock().unwrap().as_ref() {
                hook();
            }
            let next = self.responses.lock().unwrap().pop_front();
            (next, *count)
        };

        match next {
            (Some(result), _) => result,
            (None, call) => panic!("ScriptedProvider: no more responses (call #{call})"),
        }
    }
}

fn usage() -> Option<Usage> {
    Some(Usage {
        prompt_tokens: 10,
        completion_tokens: 5,
        total_tokens: 15,
    })
}

/// A text-only response.
pub fn text_response(text: &str, finish_reason: FinishReason) -> ChatResponse {
    ChatResponse {
        content: Some(text.to_string()),
        tool_calls: Vec::new(),
        finish_reason,
        model: "mock-model".into(),
        usage: usage(),
    }
}

/// A response requesting `calls`, with no text.
pub fn tool_response(calls: Vec<ToolCall>) -> ChatResponse {
    ChatResponse {
        content: None,
        tool_calls: calls,
        finish_reason: FinishReason::ToolCalls,
        model: "mock-model".into(),
        usage: usage(),
    }
}

pub fn tool_call(id: &str, name: &str, args: serde_json::Value) -> ToolCall {
    ToolCall::from_value(id, name, args)
}
