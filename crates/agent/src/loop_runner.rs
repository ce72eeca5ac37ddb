//! The agent reasoning loop implementation.
//!
//! One iteration: call the model, classify the answer, run requested tools
//! in order, compress and prune the context, then check stop heuristics.
//! Every exit path produces an [`AgentResult`].

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use forgeloop_config::AppConfig;
use forgeloop_core::error::LlmError;
use forgeloop_core::message::Message;
use forgeloop_core::provider::{ChatOptions, ChatRequest, ChatResponse, FinishReason, Provider};
use forgeloop_core::tool::{Approver, AutoApprove, ToolEffect, ToolRegistry};
use futures::FutureExt;
use tracing::{debug, info, warn};

use crate::context::ContextManager;
use crate::coordinator::ToolExecutionCoordinator;
use crate::prompt::{PromptContext, build_system_prompt, has_final_answer_marker};
use crate::result::{AgentResult, Outcome, StopReason};

/// What one iteration decided.
enum Step {
    Continue,
    Stop { reason: StopReason, message: String },
}

impl Step {
    fn stop(reason: StopReason, message: impl Into<String>) -> Self {
        Step::Stop {
            reason,
            message: message.into(),
        }
    }
}

/// The core agent loop that orchestrates model calls and tool execution.
pub struct AgentLoop {
    /// The model gateway
    provider: Arc<dyn Provider>,

    tools: Arc<ToolRegistry>,

    coordinator: ToolExecutionCoordinator,

    /// Conversation memory, owned for the lifetime of the loop
    context: ContextManager,

    options: ChatOptions,

    max_iterations: usize,

    /// Consecutive text-only replies tolerated before giving up
    max_text_responses: usize,

    /// Same-tool run length that counts as stuck
    loop_detection_window: usize,

    keep_recent_tool_results: usize,

    working_dir: String,

    /// Set from outside (Ctrl-C); checked between iterations
    interrupt: Arc<AtomicBool>,

    // Per-run state
    task: String,
    text_streak: usize,
    tool_calls_made: usize,
    last_model: Option<String>,
}

impl AgentLoop {
    /// Create a loop with auto-approval and default limits.
    pub fn new(
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
        context: ContextManager,
    ) -> Self {
        let coordinator = ToolExecutionCoordinator::new(tools.clone(), Arc::new(AutoApprove));
        let working_dir = std::env::current_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| ".".into());
        Self {
            provider,
            tools,
            coordinator,
            context,
            options: ChatOptions::default(),
            max_iterations: 30,
            max_text_responses: 3,
            loop_detection_window: 5,
            keep_recent_tool_results: 3,
            working_dir,
            interrupt: Arc::new(AtomicBool::new(false)),
            task: String::new(),
            text_streak: 0,
            tool_calls_made: 0,
            last_model: None,
        }
    }

    /// Create a loop with every limit taken from `config`.
    pub fn from_config(
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
        approver: Arc<dyn Approver>,
        config: &AppConfig,
    ) -> Self {
        let context = ContextManager::new(config.context.max_tokens)
            .with_prune_threshold(config.context.prune_threshold);
        let mut agent = Self::new(provider, tools, context)
            .with_approver(approver)
            .with_max_iterations(config.agent.max_iterations)
            .with_max_text_responses(config.agent.max_text_responses)
            .with_loop_detection_window(config.agent.loop_detection_window)
            .with_keep_recent_tool_results(config.context.keep_recent_tool_results)
            .with_options(ChatOptions {
                temperature: config.llm.temperature,
                max_tokens: config.llm.max_response_tokens,
                stop: Vec::new(),
            });
        if let Some(dir) = &config.tools.working_dir {
            agent = agent.with_working_dir(dir.display().to_string());
        }
        agent
    }

    pub fn with_approver(mut self, approver: Arc<dyn Approver>) -> Self {
        self.coordinator = ToolExecutionCoordinator::new(self.tools.clone(), approver);
        self
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_max_text_responses(mut self, max: usize) -> Self {
        self.max_text_responses = max.max(1);
        self
    }

    pub fn with_loop_detection_window(mut self, window: usize) -> Self {
        self.loop_detection_window = window;
        self
    }

    pub fn with_keep_recent_tool_results(mut self, keep: usize) -> Self {
        self.keep_recent_tool_results = keep;
        self
    }

    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// Share an interrupt flag with the caller.
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = flag;
        self
    }

    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        self.interrupt.clone()
    }

    pub fn context(&self) -> &ContextManager {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut ContextManager {
        &mut self.context
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Run `task` to completion.
    ///
    /// With `clear_context` the previous conversation is dropped first;
    /// otherwise the task continues it. Never panics and never returns an
    /// error: every outcome is an [`AgentResult`].
    pub async fn run(&mut self, task: &str, clear_context: bool) -> AgentResult {
        info!(max_iterations = self.max_iterations, clear_context, "Agent run started");

        self.interrupt.store(false, Ordering::SeqCst);
        if clear_context {
            self.context.clear();
        }
        self.context.add_message(Message::user(task));
        self.task = task.to_string();
        self.text_streak = 0;
        self.tool_calls_made = 0;

        for iteration in 1..=self.max_iterations {
            if self.interrupt.load(Ordering::SeqCst) {
                return self.finish(StopReason::UserInterrupt, "Interrupted by user", iteration - 1);
            }

            debug!(iteration, max = self.max_iterations, "Agent loop iteration");

            match AssertUnwindSafe(self.step(iteration)).catch_unwind().await {
                Ok(Ok(Step::Continue)) => {}
                Ok(Ok(Step::Stop { reason, message })) => {
                    return self.finish(reason, message, iteration);
                }
                Ok(Err(e)) => {
                    return self.finish(StopReason::LlmError, format!("LLM error: {e}"), iteration);
                }
                Err(payload) => {
                    let reason = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".into());
                    return self.finish(
                        StopReason::UnexpectedError,
                        format!("Unexpected error: {reason}"),
                        iteration,
                    );
                }
            }
        }

        self.finish(
            StopReason::MaxIterations,
            format!("Max iterations ({}) reached", self.max_iterations),
            self.max_iterations,
        )
    }

    fn system_prompt(&self, iteration: usize) -> String {
        build_system_prompt(&PromptContext {
            working_dir: &self.working_dir,
            tools: &self.tools,
            files_in_context: self.context.files_in_context().keys().map(String::as_str).collect(),
            modifications: self.context.modifications().len(),
            iteration,
            max_iterations: self.max_iterations,
        })
    }

    /// Final answer: a provider stop with no tool calls, or the explicit marker.
    fn is_final_answer(response: &ChatResponse) -> bool {
        (!response.has_tool_calls() && response.finish_reason == FinishReason::Stop)
            || response.text().is_some_and(has_final_answer_marker)
    }

    async fn step(&mut self, iteration: usize) -> Result<Step, LlmError> {
        let request = ChatRequest::new(self.context.get_messages().to_vec())
            .with_tools(self.tools.to_model_schema())
            .with_system(self.system_prompt(iteration))
            .with_options(self.options.clone());

        let response = self.provider.chat(request).await?;
        self.last_model = Some(response.model.clone());

        debug!(
            iteration,
            finish_reason = ?response.finish_reason,
            tool_calls = response.tool_calls.len(),
            usage = ?response.usage,
            "Model responded"
        );

        if !response.has_tool_calls() {
            let Some(text) = response.text() else {
                return Ok(Step::stop(
                    StopReason::NoAction,
                    "Agent did not call any tools or provide a response",
                ));
            };

            if self
                .context
                .last_assistant_text()
                .is_some_and(|prev| prev.trim() == text)
            {
                let preview: String = text.chars().take(100).collect();
                let message = format!(
                    "Agent appears stuck (repeating same message). Last message: {preview}"
                );
                return Ok(Step::stop(StopReason::RepeatedMessage, message));
            }

            self.context.add_message(Message::assistant(text));

            if Self::is_final_answer(&response) {
                return Ok(Step::stop(StopReason::FinalAnswer, text));
            }

            self.text_streak += 1;
            if self.text_streak >= self.max_text_responses {
                return Ok(Step::stop(
                    StopReason::TooManyTextResponses,
                    "Agent is thinking but not taking action. Try rephrasing the request or giving more specific instructions.",
                ));
            }
            debug!(streak = self.text_streak, "Text-only response, continuing");
            return Ok(Step::Continue);
        }

        if Self::is_final_answer(&response) {
            return Ok(Step::stop(
                StopReason::FinalAnswer,
                response.text().unwrap_or("Task completed"),
            ));
        }

        self.text_streak = 0;
        if let Some(text) = response.text() {
            debug!(text = %text, "Model commentary alongside tool calls");
        }

        for call in &response.tool_calls {
            let result = self.coordinator.execute(call, &mut self.context).await;
            let effect = self.coordinator.effect_of(&call.name);
            self.context.add_tool_result(call, &result, effect);
            self.tool_calls_made += 1;
            info!(iteration, tool = %call.name, success = result.success, "Tool result recorded");
        }

        self.context.compress_unmodified_files();
        self.context.compress_old_tool_results(self.keep_recent_tool_results);
        self.context.prune_if_needed();

        Ok(match self.check_stop_conditions() {
            Some(reason) => Step::stop(reason, format!("Stopping conditions met: {reason}")),
            None => Step::Continue,
        })
    }

    /// Domain heuristics evaluated after each tool round.
    fn check_stop_conditions(&self) -> Option<StopReason> {
        let window = self.loop_detection_window;
        let recent: Vec<_> = self.context.recent_tool_outputs().collect();
        if window > 0 && recent.len() >= window {
            let tail = &recent[recent.len() - window..];
            if tail.iter().all(|o| o.tool == tail[0].tool) {
                warn!(tool = %tail[0].tool, window, "Same tool repeated, stopping");
                return Some(StopReason::StuckInLoop);
            }
        }

        if self.task.to_lowercase().contains("test")
            && let Some(result) = self.context.last_result_with_effect(ToolEffect::RunsCommand)
            && result.success
        {
            let output = result.output.as_deref().unwrap_or("").to_lowercase();
            if output.contains("passed") && !output.contains("failed") {
                return Some(StopReason::TestsPassed);
            }
        }

        None
    }

    fn finish(
        &self,
        reason: StopReason,
        message: impl Into<String>,
        iterations: usize,
    ) -> AgentResult {
        let message = message.into();
        match reason.outcome() {
            Outcome::Success => info!(stop_reason = %reason, iterations, "Agent run finished"),
            Outcome::Incomplete => warn!(stop_reason = %reason, iterations, "Agent run incomplete"),
            Outcome::Error => {
                warn!(stop_reason = %reason, iterations, error = %message, "Agent run failed")
            }
        }

        let mut metadata = serde_json::Map::new();
        metadata.insert("tool_calls".into(), serde_json::json!(self.tool_calls_made));
        metadata.insert(
            "provider_model".into(),
            serde_json::json!(self.last_model.as_deref().unwrap_or(self.provider.model())),
        );
        metadata.insert("final_tokens".into(), serde_json::json!(self.context.estimate_tokens()));

        AgentResult {
            success: reason.is_success(),
            message,
            iterations_used: iterations,
            modifications: self.context.modifications().to_vec(),
            stop_reason: reason,
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{ScriptedProvider, text_response, tool_call, tool_response};
    use forgeloop_core::provider::ChatResponse;
    use forgeloop_tools::file_write::FileWriteTool;
    use forgeloop_tools::shell::ShellTool;

    fn registry() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(ShellTool::default()));
        registry.register(Box::new(FileWriteTool::new()));
        Arc::new(registry)
    }

    fn agent(responses: Vec<Result<ChatResponse, LlmError>>) -> (AgentLoop, Arc<ScriptedProvider>) {
        let provider = Arc::new(ScriptedProvider::new(responses));
        let agent = AgentLoop::new(provider.clone(), registry(), ContextManager::new(100_000))
            .with_working_dir("/tmp");
        (agent, provider)
    }

    fn bash_round(id: &str, command: &str) -> Result<ChatResponse, LlmError> {
        let args = serde_json::json!({ "command": command });
        Ok(tool_response(vec![tool_call(id, "bash", args)]))
    }

    #[tokio::test]
    async fn scenario_b_final_answer_marker() {
        let (mut agent, provider) = agent(vec![Ok(text_response(
            "Final Answer: the bug is fixed",
            FinishReason::Other,
        ))]);
        let result = agent.run("fix the bug", true).await;
        assert!(result.success);
        assert_eq!(result.stop_reason, StopReason::FinalAnswer);
        assert_eq!(result.iterations_used, 1);
        assert_eq!(result.message, "Final Answer: the bug is fixed");
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn provider_stop_without_tools_is_final() {
        let (mut agent, _) = agent(vec![Ok(text_response("All done.", FinishReason::Stop))]);
        let result = agent.run("say hi", true).await;
        assert_eq!(result.stop_reason, StopReason::FinalAnswer);
        assert_eq!(result.metadata["provider_model"], "mock-model");
    }

    #[tokio::test]
    async fn scenario_a_same_tool_five_times_is_stuck() {
        let responses = (0..6).map(|i| bash_round(&format!("c{i}"), "echo hi")).collect();
        let (mut agent, _) = agent(responses);
        let result = agent.run("investigate", true).await;
        assert_eq!(result.stop_reason, StopReason::StuckInLoop);
        assert!(result.success);
        assert_eq!(result.iterations_used, 5);
        assert_eq!(result.metadata["tool_calls"], 5);
    }

    #[tokio::test]
    async fn scenario_c_second_create_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.py").to_string_lossy().into_owned();
        let write = |id: &str, content: &str| -> Result<ChatResponse, LlmError> {
            let args = serde_json::json!({"path": path, "content": content});
            Ok(tool_response(vec![tool_call(id, "write_file", args)]))
        };
        let (mut agent, _) = agent(vec![
            write("c1", "a = 1\n"),
            write("c2", "b = 2\n"),
            Ok(text_response("Final Answer: done", FinishReason::Stop)),
        ]);
        let result = agent.run("create x.py", true).await;

        assert_eq!(result.stop_reason, StopReason::FinalAnswer);
        assert_eq!(result.modifications.len(), 1);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a = 1\n");
        let second = agent.context().get_last_tool_result(Some("write_file")).unwrap();
        assert!(!second.success);
        assert!(second.error.as_deref().unwrap().contains("already"));
    }

    #[tokio::test]
    async fn empty_response_is_no_action() {
        let (mut agent, _) = agent(vec![Ok(text_response("   ", FinishReason::Stop))]);
        let result = agent.run("task", true).await;
        assert_eq!(result.stop_reason, StopReason::NoAction);
        assert!(!result.success);
    }

    #[tokio::test]
    async fn repeated_text_is_detected() {
        let (mut agent, _) = agent(vec![
            Ok(text_response("Let me think about this.", FinishReason::Length)),
            Ok(text_response("Let me think about this.", FinishReason::Length)),
        ]);
        let result = agent.run("task", true).await;
        assert_eq!(result.stop_reason, StopReason::RepeatedMessage);
        assert_eq!(result.iterations_used, 2);
    }

    #[tokio::test]
    async fn same_commentary_around_a_tool_round_is_not_a_repeat() {
        let (mut agent, _) = agent(vec![
            Ok(text_response("Let me check the tests.", FinishReason::Length)),
            bash_round("c1", "echo checking"),
            Ok(text_response("Let me check the tests.", FinishReason::Length)),
            Ok(text_response("Final Answer: ok", FinishReason::Stop)),
        ]);
        let result = agent.run("look around", true).await;
        assert_eq!(result.stop_reason, StopReason::FinalAnswer);
        assert_eq!(result.iterations_used, 4);
    }

    #[tokio::test]
    async fn tool_rounds_reset_the_text_streak() {
        let (agent, _) = agent(vec![
            Ok(text_response("Looking at the layout.", FinishReason::Length)),
            Ok(text_response("Now the entry point.", FinishReason::Length)),
            bash_round("c1", "echo step"),
            Ok(text_response("The build script next.", FinishReason::Length)),
            Ok(text_response("Then the fixtures.", FinishReason::Length)),
            bash_round("c2", "echo step"),
            Ok(text_response("One more look.", FinishReason::Length)),
            Ok(text_response("Final Answer: mapped the project", FinishReason::Stop)),
        ]);
        let mut agent = agent.with_max_text_responses(3);
        let result = agent.run("map the project", true).await;
        assert_eq!(result.stop_reason, StopReason::FinalAnswer);
        assert_eq!(result.iterations_used, 8);
        assert_eq!(result.metadata["tool_calls"], 2);
    }

    #[tokio::test]
    async fn text_only_turns_are_capped() {
        let (mut agent, _) = agent(vec![
            Ok(text_response("First I will look.", FinishReason::Length)),
            Ok(text_response("Then I will edit.", FinishReason::Length)),
            Ok(text_response("Then I will test.", FinishReason::Length)),
        ]);
        let result = agent.run("task", true).await;
        assert_eq!(result.stop_reason, StopReason::TooManyTextResponses);
        assert_eq!(result.iterations_used, 3);
    }

    #[tokio::test]
    async fn tool_calls_with_marker_end_the_run() {
        let args = serde_json::json!({"command": "rm -rf /tmp/nothing"});
        let mut response = tool_response(vec![tool_call("c1", "bash", args)]);
        response.content = Some("Final Answer: nothing left to do".into());
        let (mut agent, _) = agent(vec![Ok(response)]);
        let result = agent.run("task", true).await;
        assert_eq!(result.stop_reason, StopReason::FinalAnswer);
        assert_eq!(result.metadata["tool_calls"], 0);
    }

    #[tokio::test]
    async fn gateway_error_is_terminal() {
        let (mut agent, _) = agent(vec![Err(LlmError::Authentication("bad key".into()))]);
        let result = agent.run("task", true).await;
        assert_eq!(result.stop_reason, StopReason::LlmError);
        assert!(!result.success);
        assert!(result.message.starts_with("LLM error:"));
    }

    #[tokio::test]
    async fn panics_inside_an_iteration_are_contained() {
        // The scripted provider panics once it runs out of responses.
        let (mut agent, _) = agent(vec![]);
        let result = agent.run("task", true).await;
        assert_eq!(result.stop_reason, StopReason::UnexpectedError);
        assert!(result.message.contains("no more responses"));
    }

    #[tokio::test]
    async fn max_iterations_is_incomplete() {
        let responses = (0..2).map(|i| bash_round(&format!("c{i}"), "echo step")).collect();
        let (agent, _) = agent(responses);
        let mut agent = agent.with_max_iterations(2);
        let result = agent.run("task", true).await;
        assert_eq!(result.stop_reason, StopReason::MaxIterations);
        assert_eq!(result.iterations_used, 2);
        assert!(!result.success);
    }

    #[tokio::test]
    async fn interrupt_is_observed_before_next_iteration() {
        let (agent, provider) =
            agent(vec![Ok(text_response("Final Answer: x", FinishReason::Stop))]);
        let flag = Arc::new(AtomicBool::new(false));
        let mut agent = agent.with_interrupt(flag.clone());

        // Raise the flag from inside the first model call.
        provider.on_call(move || flag.store(true, Ordering::SeqCst));
        let result = agent.run("task", true).await;
        // The first iteration completes; the answer wins before the flag is read.
        assert_eq!(result.stop_reason, StopReason::FinalAnswer);
    }

    #[tokio::test]
    async fn interrupt_stops_a_running_task() {
        let responses = (0..3).map(|i| bash_round(&format!("c{i}"), "echo working")).collect();
        let (agent, provider) = agent(responses);
        let flag = Arc::new(AtomicBool::new(false));
        let mut agent = agent.with_interrupt(flag.clone());
        provider.on_call(move || flag.store(true, Ordering::SeqCst));

        let result = agent.run("task", true).await;
        assert_eq!(result.stop_reason, StopReason::UserInterrupt);
        assert_eq!(result.iterations_used, 1);
    }

    #[tokio::test]
    async fn tests_passed_heuristic() {
        let (mut agent, _) = agent(vec![bash_round("c1", "echo '5 passed in 0.1s'")]);
        let result = agent.run("run the tests", true).await;
        assert_eq!(result.stop_reason, StopReason::TestsPassed);
        assert!(result.success);
    }

    #[tokio::test]
    async fn failing_tests_do_not_stop() {
        let (mut agent, _) = agent(vec![
            bash_round("c1", "echo '1 failed, 4 passed'"),
            Ok(text_response("Final Answer: one test still fails", FinishReason::Stop)),
        ]);
        let result = agent.run("run the tests", true).await;
        assert_eq!(result.stop_reason, StopReason::FinalAnswer);
        assert_eq!(result.iterations_used, 2);
    }

    #[tokio::test]
    async fn context_is_kept_between_runs_unless_cleared() {
        let (mut agent, _) = agent(vec![
            Ok(text_response("Final Answer: one", FinishReason::Stop)),
            Ok(text_response("Final Answer: two", FinishReason::Stop)),
            Ok(text_response("Final Answer: three", FinishReason::Stop)),
        ]);
        agent.run("first", true).await;
        agent.run("second", false).await;
        assert_eq!(agent.context().get_messages().len(), 4);
        agent.run("third", true).await;
        assert_eq!(agent.context().get_messages().len(), 2);
    }

    #[tokio::test]
    async fn requests_carry_tools_and_system_prompt() {
        let (mut agent, provider) =
            agent(vec![Ok(text_response("Final Answer: ok", FinishReason::Stop))]);
        agent.run("task", true).await;
        let request = provider.last_request().unwrap();
        assert_eq!(request.tools.len(), 2);
        assert!(request.system.unwrap().contains("Working directory: /tmp"));
        assert_eq!(request.messages.len(), 1);
    }
}
