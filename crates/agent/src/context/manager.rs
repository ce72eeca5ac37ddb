//! Conversation state and token budget for one agent run.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use forgeloop_core::message::{Message, Role, ToolCall};
use forgeloop_core::structure::CodeAnalyzer;
use forgeloop_core::tool::{ToolEffect, ToolResult};
use forgeloop_tools::SourceAnalyzer;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::token::{estimate_messages_tokens, estimate_tokens};

/// Capacity of the recent tool output ring used for loop detection.
pub const RECENT_OUTPUTS_CAPACITY: usize = 10;

/// Default share of `max_tokens` at which pruning starts.
pub const DEFAULT_PRUNE_THRESHOLD: f64 = 0.6;

/// Audit record of a file-changing tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Modification {
    pub file_path: String,
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_content: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// A tool outcome remembered for stop heuristics.
#[derive(Debug, Clone)]
pub struct RecentToolOutput {
    pub tool: String,
    pub effect: ToolEffect,
    pub result: ToolResult,
}

/// Compressed stand-in for a file that was evicted from view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSummary {
    pub summary: String,
    pub original: String,
}

/// Owns the message history, files in view, modification log and budget.
///
/// One instance belongs to one `AgentLoop`; it is not meant to be shared.
pub struct ContextManager {
    pub(super) messages: Vec<Message>,
    pub(super) files_in_context: BTreeMap<String, String>,
    pub(super) modifications: Vec<Modification>,
    pub(super) recent_tool_outputs: VecDeque<RecentToolOutput>,
    pub(super) created_files: HashSet<String>,
    pub(super) file_summaries: BTreeMap<String, FileSummary>,
    pub(super) max_tokens: usize,
    pub(super) prune_threshold: f64,
    pub(super) analyzer: Arc<dyn CodeAnalyzer>,
}

impl ContextManager {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            messages: Vec::new(),
            files_in_context: BTreeMap::new(),
            modifications: Vec::new(),
            recent_tool_outputs: VecDeque::with_capacity(RECENT_OUTPUTS_CAPACITY),
            created_files: HashSet::new(),
            file_summaries: BTreeMap::new(),
            max_tokens,
            prune_threshold: DEFAULT_PRUNE_THRESHOLD,
            analyzer: Arc::new(SourceAnalyzer::new()),
        }
    }

    /// Share of `max_tokens` at which [`prune_if_needed`](Self::prune_if_needed) acts.
    pub fn with_prune_threshold(mut self, threshold: f64) -> Self {
        self.prune_threshold = threshold;
        self
    }

    /// Use `analyzer` for file outlines and the dependency graph.
    pub fn with_analyzer(mut self, analyzer: Arc<dyn CodeAnalyzer>) -> Self {
        self.analyzer = analyzer;
        self
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn prune_threshold(&self) -> f64 {
        self.prune_threshold
    }

    // ── Messages ──────────────────────────────────────────────

    /// Append a message. No other side effects.
    pub fn add_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Append the assistant tool-call message and its tool result, and
    /// remember the outcome for loop detection.
    pub fn add_tool_result(&mut self, call: &ToolCall, result: &ToolResult, effect: ToolEffect) {
        self.messages
            .push(Message::assistant("").with_tool_calls(vec![call.clone()]));

        let mut tool_msg = Message::tool_result(&call.id, result.to_string())
            .with_metadata("tool", serde_json::json!(call.name))
            .with_metadata("success", serde_json::json!(result.success))
            .with_metadata("effect", serde_json::json!(effect));
        let path = call
            .arg_str("path")
            .or_else(|| call.arg_str("file_path"))
            .or_else(|| result.metadata.get("path").and_then(|v| v.as_str()));
        if let Some(path) = path {
            tool_msg = tool_msg.with_metadata("path", serde_json::json!(path));
        }
        self.messages.push(tool_msg);

        if self.recent_tool_outputs.len() == RECENT_OUTPUTS_CAPACITY {
            self.recent_tool_outputs.pop_front();
        }
        self.recent_tool_outputs.push_back(RecentToolOutput {
            tool: call.name.clone(),
            effect,
            result: result.clone(),
        });
    }

    /// Messages in conversational order.
    pub fn get_messages(&self) -> &[Message] {
        &self.messages
    }

    /// Text of the immediately preceding assistant message.
    ///
    /// `None` when that message is empty, which is the case for the
    /// tool-call half of a tool round.
    pub fn last_assistant_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.content.trim())
            .filter(|text| !text.is_empty())
    }

    // ── Files ─────────────────────────────────────────────────

    /// Put a file in view and register it with the analyzer.
    pub fn add_file_to_context(&mut self, path: impl Into<String>, content: impl Into<String>) {
        let path = path.into();
        let content = content.into();
        self.analyzer.register_file(&path, &content);
        self.file_summaries.remove(&path);
        self.files_in_context.insert(path, content);
    }

    pub fn remove_file_from_context(&mut self, path: &str) {
        self.files_in_context.remove(path);
    }

    pub fn files_in_context(&self) -> &BTreeMap<String, String> {
        &self.files_in_context
    }

    /// Summary and original text of a file that was compressed.
    pub fn file_summary(&self, path: &str) -> Option<&FileSummary> {
        self.file_summaries.get(path)
    }

    // ── Modifications ─────────────────────────────────────────

    pub fn track_modification(
        &mut self,
        file_path: impl Into<String>,
        tool_name: impl Into<String>,
        old_content: Option<String>,
        new_content: Option<String>,
    ) {
        let modification = Modification {
            file_path: file_path.into(),
            tool_name: tool_name.into(),
            old_content,
            new_content,
            timestamp: Utc::now(),
        };
        debug!(
            path = %modification.file_path,
            tool = %modification.tool_name,
            "Tracked modification"
        );
        self.modifications.push(modification);
    }

    pub fn modifications(&self) -> &[Modification] {
        &self.modifications
    }

    /// Paths with at least one recorded modification.
    pub fn modified_files(&self) -> BTreeSet<String> {
        self.modifications.iter().map(|m| m.file_path.clone()).collect()
    }

    pub fn was_file_created(&self, path: &str) -> bool {
        self.created_files.contains(path)
    }

    pub fn mark_file_created(&mut self, path: impl Into<String>) {
        self.created_files.insert(path.into());
    }

    // ── Tool outputs ──────────────────────────────────────────

    pub fn recent_tool_outputs(&self) -> impl Iterator<Item = &RecentToolOutput> {
        self.recent_tool_outputs.iter()
    }

    /// Last remembered result, optionally for one tool.
    pub fn get_last_tool_result(&self, tool: Option<&str>) -> Option<&ToolResult> {
        self.recent_tool_outputs
            .iter()
            .rev()
            .find(|o| tool.is_none_or(|t| o.tool == t))
            .map(|o| &o.result)
    }

    /// Last remembered result of a tool with `effect`.
    pub fn last_result_with_effect(&self, effect: ToolEffect) -> Option<&ToolResult> {
        self.recent_tool_outputs
            .iter()
            .rev()
            .find(|o| o.effect == effect)
            .map(|o| &o.result)
    }

    // ── Budget ────────────────────────────────────────────────

    /// Approximate size of messages plus files in view. See [`super::token`].
    pub fn estimate_tokens(&self) -> usize {
        estimate_messages_tokens(&self.messages)
            + self
                .files_in_context
                .values()
                .map(|c| estimate_tokens(c))
                .sum::<usize>()
    }

    /// True when the estimate has reached `max_tokens * threshold`.
    pub fn is_approaching_limit(&self, threshold: f64) -> bool {
        self.estimate_tokens() as f64 >= self.max_tokens as f64 * threshold
    }

    /// One-line status for logs and the interactive session.
    pub fn summary(&self) -> String {
        let recent: Vec<&str> = self.recent_tool_outputs.iter().map(|o| o.tool.as_str()).collect();
        format!(
            "messages={} files={} modifications={} tokens~{}/{} recent_tools=[{}]",
            self.messages.len(),
            self.files_in_context.len(),
            self.modifications.len(),
            self.estimate_tokens(),
            self.max_tokens,
            recent.join(", ")
        )
    }

    /// Reset everything to the freshly constructed state.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.files_in_context.clear();
        self.modifications.clear();
        self.recent_tool_outputs.clear();
        self.created_files.clear();
        self.file_summaries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_keep_insertion_order() {
        let mut ctx = ContextManager::new(10_000);
        for i in 0..12 {
            ctx.add_message(Message::user(format!("m{i}")));
        }
        let contents: Vec<&str> = ctx.get_messages().iter().map(|m| m.content.as_str()).collect();
        let expected: Vec<String> = (0..12).map(|i| format!("m{i}")).collect();
        assert_eq!(contents, expected);
    }

    #[test]
    fn tool_result_appends_linked_pair() {
        let mut ctx = ContextManager::new(10_000);
        let call = ToolCall::from_value("call_1", "read_file", serde_json::json!({"path": "a.py"}));
        ctx.add_tool_result(&call, &ToolResult::ok("   1 | x"), ToolEffect::ReadsFile);

        let msgs = ctx.get_messages();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].role, Role::Assistant);
        assert_eq!(msgs[0].tool_calls[0].id, "call_1");
        assert_eq!(msgs[1].role, Role::Tool);
        assert_eq!(msgs[1].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(msgs[1].content, "Success:    1 | x");
        assert_eq!(msgs[1].meta_str("path"), Some("a.py"));
        assert_eq!(msgs[1].meta_str("effect"), Some("reads_file"));
    }

    #[test]
    fn last_assistant_text_is_the_immediately_preceding_message() {
        let mut ctx = ContextManager::new(10_000);
        assert_eq!(ctx.last_assistant_text(), None);

        ctx.add_message(Message::assistant("Let me check the tests.  "));
        assert_eq!(ctx.last_assistant_text(), Some("Let me check the tests."));

        // A tool round in between hides the earlier commentary.
        let call = ToolCall::from_value("c1", "bash", serde_json::json!({"command": "ls"}));
        ctx.add_tool_result(&call, &ToolResult::ok("src"), ToolEffect::RunsCommand);
        assert_eq!(ctx.last_assistant_text(), None);
    }

    #[test]
    fn recent_outputs_ring_is_bounded() {
        let mut ctx = ContextManager::new(10_000);
        for i in 0..15 {
            let call =
                ToolCall::from_value(format!("c{i}"), format!("t{i}"), serde_json::json!({}));
            ctx.add_tool_result(&call, &ToolResult::ok("ok"), ToolEffect::ReadOnly);
        }
        assert_eq!(ctx.recent_tool_outputs().count(), RECENT_OUTPUTS_CAPACITY);
        assert_eq!(ctx.recent_tool_outputs().next().unwrap().tool, "t5");
    }

    #[test]
    fn last_tool_result_filters_by_name() {
        let mut ctx = ContextManager::new(10_000);
        let bash = ToolCall::from_value("1", "bash", serde_json::json!({}));
        let read = ToolCall::from_value("2", "read_file", serde_json::json!({}));
        ctx.add_tool_result(&bash, &ToolResult::ok("3 passed"), ToolEffect::RunsCommand);
        ctx.add_tool_result(&read, &ToolResult::ok("file"), ToolEffect::ReadsFile);

        assert_eq!(ctx.get_last_tool_result(None).unwrap().output.as_deref(), Some("file"));
        assert_eq!(
            ctx.get_last_tool_result(Some("bash")).unwrap().output.as_deref(),
            Some("3 passed")
        );
        assert!(ctx.last_result_with_effect(ToolEffect::RunsCommand).is_some());
        assert!(ctx.get_last_tool_result(Some("grep")).is_none());
    }

    #[test]
    fn estimate_includes_files() {
        let mut ctx = ContextManager::new(10_000);
        ctx.add_message(Message::user("a".repeat(400)));
        ctx.add_file_to_context("x.py", "b".repeat(400));
        assert_eq!(ctx.estimate_tokens(), 200);
        ctx.remove_file_from_context("x.py");
        assert_eq!(ctx.estimate_tokens(), 100);
    }

    #[test]
    fn approaching_limit_boundary() {
        let mut ctx = ContextManager::new(1000);
        ctx.add_message(Message::user("a".repeat(1200)));
        assert!(!ctx.is_approaching_limit(0.6));
        ctx.add_message(Message::assistant("a".repeat(1200)));
        assert!(ctx.is_approaching_limit(0.6));
    }

    #[test]
    fn modifications_and_created_files() {
        let mut ctx = ContextManager::new(1000);
        ctx.track_modification("x.py", "write_file", None, Some("x".into()));
        ctx.track_modification("x.py", "str_replace", Some("x".into()), Some("y".into()));
        ctx.mark_file_created("x.py");

        assert_eq!(ctx.modifications().len(), 2);
        assert_eq!(ctx.modified_files().into_iter().collect::<Vec<_>>(), vec!["x.py"]);
        assert!(ctx.was_file_created("x.py"));
        assert!(!ctx.was_file_created("y.py"));
    }

    #[test]
    fn clear_resets_everything() {
        let mut ctx = ContextManager::new(1000);
        ctx.add_message(Message::user("task"));
        ctx.add_file_to_context("a.py", "x");
        ctx.track_modification("a.py", "str_replace", None, None);
        ctx.mark_file_created("b.py");
        let call = ToolCall::from_value("1", "bash", serde_json::json!({}));
        ctx.add_tool_result(&call, &ToolResult::ok("ok"), ToolEffect::RunsCommand);

        ctx.clear();

        assert!(ctx.get_messages().is_empty());
        assert!(ctx.files_in_context().is_empty());
        assert!(ctx.modifications().is_empty());
        assert_eq!(ctx.recent_tool_outputs().count(), 0);
        assert!(!ctx.was_file_created("b.py"));
        assert_eq!(ctx.estimate_tokens(), 0);
    }

    #[test]
    fn summary_mentions_counts() {
        let mut ctx = ContextManager::new(1000);
        ctx.add_message(Message::user("hi"));
        assert!(ctx.summary().starts_with("messages=1 files=0 modifications=0"));
    }
}
