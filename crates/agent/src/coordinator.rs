//! Tool dispatch with policy: lookup, argument checks, the write-once
//! guard, approval, and a panic boundary. Never returns an error.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use forgeloop_core::message::ToolCall;
use forgeloop_core::tool::{
    Approver, Tool, ToolEffect, ToolRegistry, ToolResult, execute_with_approval,
};
use futures::FutureExt;
use tracing::{debug, info, warn};

use crate::context::ContextManager;

pub struct ToolExecutionCoordinator {
    tools: Arc<ToolRegistry>,
    approver: Arc<dyn Approver>,
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "tool panicked".to_string()
    }
}

impl ToolExecutionCoordinator {
    pub fn new(tools: Arc<ToolRegistry>, approver: Arc<dyn Approver>) -> Self {
        Self { tools, approver }
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Declared effect of `name`; unknown tools are treated as read-only.
    pub fn effect_of(&self, name: &str) -> ToolEffect {
        self.tools.get(name).map_or(ToolEffect::ReadOnly, |t| t.effect())
    }

    /// Run `call` and record its side effects in `context`.
    ///
    /// The caller appends the call/result pair to the history.
    pub async fn execute(&self, call: &ToolCall, context: &mut ContextManager) -> ToolResult {
        let Some(tool) = self.tools.get(&call.name) else {
            warn!(tool = %call.name, "Unknown tool requested");
            return ToolResult::fail(format!("Tool not found: {}", call.name)).with_suggestion(
                format!("Use one of the available tools: {}", self.tools.names().join(", ")),
            );
        };

        let arguments = serde_json::Value::Object(call.arguments.clone());

        let required = tool.required_parameters();
        if let Some(missing) = required.iter().find(|p| !call.arguments.contains_key(p.as_str())) {
            return ToolResult::fail(format!(
                "Missing required parameter: {missing} for tool {}",
                call.name
            ))
            .with_suggestion(format!(
                "Retry {} with all required parameters: {}",
                call.name,
                required.join(", ")
            ));
        }

        let effect = tool.effect();
        let target = tool.target_path(&arguments);

        if effect == ToolEffect::CreatesFile
            && let Some(path) = &target
            && context.was_file_created(path)
        {
            return ToolResult::fail(format!("File '{path}' was already created in this session"))
                .with_suggestion("The file already exists. Use str_replace to modify it, or use a different filename.");
        }

        info!(tool = %call.name, call_id = %call.id, ?effect, "Dispatching tool");

        let result = self.run_guarded(tool, arguments).await;

        debug!(tool = %call.name, success = result.success, "Tool finished");

        if result.success {
            self.record_effects(call, tool, effect, target, &result, context);
        }
        result
    }

    async fn run_guarded(&self, tool: &dyn Tool, arguments: serde_json::Value) -> ToolResult {
        let approver = self.approver.as_ref();
        let outcome = match tool.as_approvable() {
            Some(approvable) => {
                AssertUnwindSafe(execute_with_approval(approvable, &arguments, approver))
                    .catch_unwind()
                    .await
            }
            None => AssertUnwindSafe(tool.execute(arguments.clone())).catch_unwind().await,
        };

        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!(tool = %tool.name(), error = %e, "Tool returned an error");
                ToolResult::from_error(&e)
            }
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                warn!(tool = %tool.name(), reason = %reason, "Tool panicked");
                ToolResult::fail(format!("Tool execution failed: {reason}"))
                    .with_suggestion("Try a different approach or different arguments")
            }
        }
    }

    fn record_effects(
        &self,
        call: &ToolCall,
        tool: &dyn Tool,
        effect: ToolEffect,
        target: Option<String>,
        result: &ToolResult,
        context: &mut ContextManager,
    ) {
        let meta = |key: &str| {
            result
                .metadata
                .get(key)
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };
        let Some(path) = target.or_else(|| meta("path")) else {
            return;
        };

        match effect {
            ToolEffect::ReadsFile => {
                if let Some(content) = meta("content") {
                    context.add_file_to_context(path, content);
                }
            }
            ToolEffect::CreatesFile | ToolEffect::EditsFile => {
                let new_content = meta("new_content").or_else(|| meta("content"));
                context.track_modification(
                    &path,
                    tool.name(),
                    meta("old_content"),
                    new_content.clone(),
                );
                if effect == ToolEffect::CreatesFile {
                    context.mark_file_created(&path);
                }
                if let Some(content) = new_content {
                    context.add_file_to_context(path, content);
                }
            }
            ToolEffect::ReadOnly | ToolEffect::RunsCommand => {
                debug!(tool = %call.name, "No file effects to record");
            }
        }
    }
}
