//! Proactive compression, run after each tool round regardless of budget.

use forgeloop_core::message::Role;
use tracing::debug;

use super::manager::{ContextManager, FileSummary};

/// Files smaller than this stay verbatim.
pub const MIN_COMPRESS_CHARS: usize = 1500;
/// Tool output of at most this many lines is left alone.
const MIN_COMPRESS_LINES: usize = 15;
const HEAD_LINES: usize = 10;
const TAIL_LINES: usize = 5;

/// First and last lines of `text` with an omission count in between.
pub fn head_tail_preview(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() <= HEAD_LINES + TAIL_LINES {
        return text.to_string();
    }
    let omitted = lines.len() - HEAD_LINES - TAIL_LINES;
    format!(
        "{}\n... [{omitted} lines omitted; read the file again for full content] ...\n{}",
        lines[..HEAD_LINES].join("\n"),
        lines[lines.len() - TAIL_LINES..].join("\n")
    )
}

impl ContextManager {
    /// Replace unmodified files in view with their structural summary.
    ///
    /// Returns how many files were compressed.
    pub fn compress_unmodified_files(&mut self) -> usize {
        let modified = self.modified_files();
        let mut compressed = 0;
        for (path, content) in self.files_in_context.iter_mut() {
            if modified.contains(path)
                || self.file_summaries.contains_key(path)
                || content.chars().count() < MIN_COMPRESS_CHARS
            {
                continue;
            }
            let summary = self.analyzer.get_structure(path, content).render(path);
            if summary.len() >= content.len() {
                continue;
            }
            let original = std::mem::replace(content, summary.clone());
            self.file_summaries
                .insert(path.clone(), FileSummary { summary, original });
            compressed += 1;
        }
        if compressed > 0 {
            debug!(compressed, "Compressed unmodified files");
        }
        compressed
    }

    /// Shorten all but the `keep_recent` newest file-read results to a
    /// head/tail preview.
    ///
    /// Results for files modified at or after the read stay verbatim since
    /// exact-match edits may still need them.
    pub fn compress_old_tool_results(&mut self, keep_recent: usize) -> usize {
        let reads: Vec<usize> = self
            .messages
            .iter()
            .enumerate()
            .filter(|(_, m)| {
                m.role == Role::Tool
                    && m.meta_str("effect") == Some("reads_file")
                    && m.meta_flag("success")
            })
            .map(|(i, _)| i)
            .collect();
        let old = reads.len().saturating_sub(keep_recent);

        let mut compressed = 0;
        for &i in &reads[..old] {
            let msg = &self.messages[i];
            if msg.meta_flag("compressed") || msg.content.lines().count() <= MIN_COMPRESS_LINES {
                continue;
            }
            let touched_later = msg.meta_str("path").is_some_and(|path| {
                self.modifications
                    .iter()
                    .any(|m| m.file_path == path && m.timestamp >= msg.timestamp)
            });
            if touched_later {
                continue;
            }
            let preview = head_tail_preview(&msg.content);
            let msg = &mut self.messages[i];
            msg.content = preview;
            msg.metadata.insert("compressed".into(), serde_json::json!(true));
            compressed += 1;
        }
        if compressed > 0 {
            debug!(compressed, keep_recent, "Compressed old file reads");
        }
        compressed
    }
}
