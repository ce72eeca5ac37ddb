//! System prompt construction.

use std::fmt::Write;

use forgeloop_core::tool::ToolRegistry;

/// Phrase the model uses to mark its final answer.
pub const FINAL_ANSWER_MARKER: &str = "Final Answer:";

/// Inputs for one rendering of the system prompt.
pub struct PromptContext<'a> {
    pub working_dir: &'a str,
    pub tools: &'a ToolRegistry,
    pub files_in_context: Vec<&'a str>,
    pub modifications: usize,
    pub iteration: usize,
    pub max_iterations: usize,
}

/// First sentence of a tool description.
fn short_description(description: &str) -> &str {
    description
        .split_once(". ")
        .map_or(description, |(first, _)| first)
        .trim_end_matches('.')
}

pub fn build_system_prompt(ctx: &PromptContext<'_>) -> String {
    let mut tools = String::new();
    for tool in ctx.tools.all() {
        let _ = writeln!(tools, "- {}: {}", tool.name(), short_description(tool.description()));
    }
    let files = if ctx.files_in_context.is_empty() {
        "None".to_string()
    } else {
        ctx.files_in_context.join(", ")
    };

    format!(
        "You are a coding agent working in a local repository. You solve the user's task by \
calling tools, observing their results, and iterating until the task is done.

# Environment
Working directory: {working_dir}
Files in context: {files}
Modifications so far: {mods}
Iteration: {iteration} of {max}

# Tools
{tools}
# Rules
- Always read a file with read_file before editing it.
- Use str_replace for changes to existing files; old_str must match exactly once. Never include the line-number prefix shown by read_file.
- Use write_file only for new files.
- Use bash to run tests, search (grep, find) and inspect the project.
- Use git_diff to review your edits before finishing.
- Keep going with tool calls while there is work left. Do not narrate plans without acting.
- When the task is complete, reply without tool calls and start your reply with \"{marker}\" followed by a short summary of what you did.",
        working_dir = ctx.working_dir,
        mods = ctx.modifications,
        iteration = ctx.iteration,
        max = ctx.max_iterations,
        marker = FINAL_ANSWER_MARKER,
    )
}

/// Case-insensitive check for the final-answer marker.
pub fn has_final_answer_marker(text: &str) -> bool {
    text.to_lowercase().contains(&FINAL_ANSWER_MARKER.to_lowercase())
}
