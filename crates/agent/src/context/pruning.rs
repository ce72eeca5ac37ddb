//! Three-tier budget enforcement.
//!
//! Tiers escalate only while the estimate is still at or above the limit:
//!
//! 1. summarize unmodified files in view (keeping modified files and their
//!    close neighbours verbatim),
//! 2. drop low-importance messages (only with more than 20 messages),
//! 3. truncate long tool output, then collapse the history.
//!
//! A tier's result is committed only if it does not grow the estimate.

use std::collections::{BTreeMap, BTreeSet};

use forgeloop_core::message::{Message, Role};
use serde::Serialize;
use tracing::{debug, info};

use super::manager::{ContextManager, FileSummary};
use super::token::estimate_messages_tokens;

/// Message count above which importance pruning may run.
pub const MIN_MESSAGES_FOR_SCORING: usize = 20;
/// Messages always kept at the tail by importance pruning.
pub const KEEP_LAST: usize = 10;
/// Messages kept at the tail when collapsing.
pub const COLLAPSE_KEEP_LAST: usize = 15;
/// Tool output longer than this is truncated in tier 3.
pub const MAX_TOOL_OUTPUT_CHARS: usize = 1000;
/// Dependents of a modified file kept verbatim.
const CLOSEST_DEPENDENTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PruneTier {
    FileSummarization,
    ImportancePruning,
    Truncation,
    Collapse,
}

/// What a `prune_if_needed` call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PruneReport {
    pub before: usize,
    pub after: usize,
    /// Tiers that ran, in order. Empty when the budget was fine.
    pub tiers: Vec<PruneTier>,
}

impl PruneReport {
    pub fn reached(&self, tier: PruneTier) -> bool {
        self.tiers.contains(&tier)
    }
}

/// System message standing in for `count` dropped messages.
pub fn pruned_marker(count: usize) -> Message {
    Message::system(format!("[pruned {count} messages]"))
        .with_metadata("pruned_marker", serde_json::json!(true))
        .with_metadata("pruned_count", serde_json::json!(count))
}

fn is_marker(msg: &Message) -> bool {
    msg.meta_flag("pruned_marker") || msg.meta_flag("summary") || msg.content.starts_with("[pruned")
}

/// 0–100 importance of message `index` out of `len`.
pub fn importance_score(msg: &Message, index: usize, len: usize) -> f64 {
    let mut score = 50.0;
    match msg.role {
        Role::Tool => {
            let mutating = matches!(msg.meta_str("effect"), Some("creates_file" | "edits_file"));
            if mutating && msg.meta_flag("success") {
                score += 40.0;
            }
            if msg.content.starts_with("Error:") {
                score -= 20.0;
            }
        }
        Role::User => score += 30.0,
        Role::System if is_marker(msg) => score += 20.0,
        _ => {}
    }
    if len > 1 {
        score += 20.0 * index as f64 / (len - 1) as f64;
    }
    score.clamp(0.0, 100.0)
}

/// Grow `keep` so no tool message survives without the assistant message
/// that requested it, and vice versa.
fn close_tool_pairs(messages: &[Message], keep: &mut [bool]) {
    let mut owner: BTreeMap<&str, usize> = BTreeMap::new();
    for (i, m) in messages.iter().enumerate() {
        for tc in &m.tool_calls {
            owner.insert(tc.id.as_str(), i);
        }
    }
    // Two passes reach a fixed point: tool → assistant, then assistant → all its tools.
    for (i, m) in messages.iter().enumerate() {
        if keep[i]
            && let Some(id) = &m.tool_call_id
            && let Some(&a) = owner.get(id.as_str())
        {
            keep[a] = true;
        }
    }
    for (i, m) in messages.iter().enumerate() {
        if let Some(id) = &m.tool_call_id
            && let Some(&a) = owner.get(id.as_str())
            && keep[a]
        {
            keep[i] = true;
        }
    }
}

/// Rebuild the history from `keep`, replacing each dropped run with one marker.
fn rebuild(messages: &[Message], keep: &[bool]) -> Vec<Message> {
    let mut out = Vec::with_capacity(messages.len());
    let mut dropped = 0usize;
    for (m, &k) in messages.iter().zip(keep) {
        if k {
            if dropped > 0 {
                out.push(pruned_marker(dropped));
                dropped = 0;
            }
            out.push(m.clone());
        } else {
            // An old marker stands for the messages it replaced.
            dropped += m
                .metadata
                .get("pruned_count")
                .and_then(|v| v.as_u64())
                .map_or(1, |n| n as usize);
        }
    }
    if dropped > 0 {
        out.push(pruned_marker(dropped));
    }
    out
}

/// Importance-scored selection. Returns the new history.
pub fn score_and_select(messages: &[Message]) -> Vec<Message> {
    let n = messages.len();
    let keep_count = ((n as f64 * 0.7).round() as usize).max(MIN_MESSAGES_FOR_SCORING);

    let mut ranked: Vec<(usize, f64)> = messages
        .iter()
        .enumerate()
        .map(|(i, m)| (i, importance_score(m, i, n)))
        .collect();
    // Highest score first; newer wins ties.
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(b.0.cmp(&a.0)));

    let mut keep = vec![false; n];
    for &(i, _) in ranked.iter().take(keep_count) {
        keep[i] = true;
    }
    if let Some(first_user) = messages.iter().position(|m| m.role == Role::User) {
        keep[first_user] = true;
    }
    for k in keep.iter_mut().skip(n.saturating_sub(KEEP_LAST)) {
        *k = true;
    }
    close_tool_pairs(messages, &mut keep);
    rebuild(messages, &keep)
}

/// Cut tool messages longer than [`MAX_TOOL_OUTPUT_CHARS`].
pub fn truncate_tool_outputs(messages: &[Message]) -> Vec<Message> {
    messages
        .iter()
        .map(|m| {
            let len = m.content.chars().count();
            if m.role != Role::Tool || len <= MAX_TOOL_OUTPUT_CHARS {
                return m.clone();
            }
            let mut cut = m.clone();
            let head: String = m.content.chars().take(MAX_TOOL_OUTPUT_CHARS).collect();
            cut.content = format!("{head}\n[truncated {} characters]", len - MAX_TOOL_OUTPUT_CHARS);
            cut.metadata.insert("truncated".into(), serde_json::json!(true));
            cut
        })
        .collect()
}

/// First user message, one marker, and the last [`COLLAPSE_KEEP_LAST`] messages.
pub fn collapse(messages: &[Message]) -> Vec<Message> {
    let n = messages.len();
    let mut start = n.saturating_sub(COLLAPSE_KEEP_LAST);
    // Never open the tail with a tool result whose request was cut.
    while start > 0 && messages[start].role == Role::Tool {
        start -= 1;
    }
    let first_user = messages.iter().position(|m| m.role == Role::User);

    let mut out = Vec::with_capacity(COLLAPSE_KEEP_LAST + 2);
    let mut dropped = start;
    if let Some(u) = first_user
        && u < start
    {
        out.push(messages[u].clone());
        dropped -= 1;
    }
    if dropped == 0 {
        return messages.to_vec();
    }
    out.push(
        Message::system(format!(
            "[pruned {dropped} earlier messages to stay within the context budget]"
        ))
        .with_metadata("pruned_marker", serde_json::json!(true))
        .with_metadata("pruned_count", serde_json::json!(dropped)),
    );
    out.extend_from_slice(&messages[start..]);
    out
}

impl ContextManager {
    /// Files kept verbatim during summarization: modified files, what they
    /// import, and their closest importers.
    pub(super) fn keep_set(&self) -> BTreeSet<String> {
        let mut keep = BTreeSet::new();
        for path in self.modified_files() {
            keep.extend(self.analyzer.get_dependencies(&path));
            keep.extend(
                self.analyzer
                    .get_dependents(&path)
                    .into_iter()
                    .take(CLOSEST_DEPENDENTS),
            );
            keep.insert(path);
        }
        keep
    }

    fn summarize_files(&mut self) {
        let keep = self.keep_set();
        let mut files = self.files_in_context.clone();
        let mut summaries = BTreeMap::new();
        for (path, content) in files.iter_mut() {
            if keep.contains(path) || self.file_summaries.contains_key(path) {
                continue;
            }
            let summary = self.analyzer.get_structure(path, content).render(path);
            if summary.len() < content.len() {
                let original = std::mem::replace(content, summary.clone());
                summaries.insert(path.clone(), FileSummary { summary, original });
            }
        }
        let before: usize = self.files_in_context.values().map(|c| c.chars().count()).sum();
        let after: usize = files.values().map(|c| c.chars().count()).sum();
        if after <= before {
            self.files_in_context = files;
            self.file_summaries.extend(summaries);
        }
    }

    fn commit_messages(&mut self, candidate: Vec<Message>) -> bool {
        if estimate_messages_tokens(&candidate) <= estimate_messages_tokens(&self.messages) {
            self.messages = candidate;
            true
        } else {
            false
        }
    }

    fn over_budget(&self) -> bool {
        self.is_approaching_limit(self.prune_threshold)
    }

    /// Bring the estimate under the budget, escalating tier by tier.
    ///
    /// Never increases the estimate. Each tier runs at most once per call.
    pub fn prune_if_needed(&mut self) -> PruneReport {
        let before = self.estimate_tokens();
        let mut tiers = Vec::new();
        if !self.over_budget() {
            return PruneReport { before, after: before, tiers };
        }

        info!(tokens = before, max_tokens = self.max_tokens, "Context over budget, pruning");

        tiers.push(PruneTier::FileSummarization);
        self.summarize_files();
        debug!(tokens = self.estimate_tokens(), "After file summarization");

        if self.over_budget() && self.messages.len() > MIN_MESSAGES_FOR_SCORING {
            tiers.push(PruneTier::ImportancePruning);
            let candidate = score_and_select(&self.messages);
            self.commit_messages(candidate);
            debug!(
                tokens = self.estimate_tokens(),
                messages = self.messages.len(),
                "After importance pruning"
            );
        }

        if self.over_budget() {
            tiers.push(PruneTier::Truncation);
            let candidate = truncate_tool_outputs(&self.messages);
            self.commit_messages(candidate);
            debug!(tokens = self.estimate_tokens(), "After tool output truncation");

            if self.over_budget() {
                tiers.push(PruneTier::Collapse);
                let candidate = collapse(&self.messages);
                self.commit_messages(candidate);
                debug!(
                    tokens = self.estimate_tokens(),
                    messages = self.messages.len(),
                    "After collapse"
                );
            }
        }

        let after = self.estimate_tokens();
        info!(before, after, tiers = ?tiers, "Pruning finished");
        PruneReport { before, after, tiers }
    }
}
