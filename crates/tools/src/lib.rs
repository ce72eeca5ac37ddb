//! Built-in tools for the agent.
//!
//! Each tool declares a [`ToolEffect`](forgeloop_core::tool::ToolEffect); the
//! coordinator and the context manager key their bookkeeping off it rather
//! than off tool names.

pub mod analysis;
pub mod file_read;
pub mod file_write;
pub mod git_diff;
pub mod shell;
pub mod str_replace;
pub mod todo;

use std::path::{Path, PathBuf};
use std::time::Duration;

use forgeloop_core::tool::ToolRegistry;

pub use analysis::SourceAnalyzer;
pub use todo::{TodoItem, TodoList, TodoStatus};

/// Resolve `path` against `root` unless it is already absolute.
pub(crate) fn resolve_path(root: Option<&Path>, path: &str) -> PathBuf {
    let p = Path::new(path);
    match root {
        Some(root) if p.is_relative() => root.join(p),
        _ => p.to_path_buf(),
    }
}

/// Create a registry with the file and shell tools.
///
/// Relative paths and shell commands resolve against `working_dir` when given.
/// The `task` tool lives in the agent crate and is registered there.
pub fn default_registry(
    working_dir: Option<&Path>,
    shell_timeout: Duration,
    todos: TodoList,
) -> ToolRegistry {
    let mut registry = read_only_registry(working_dir, shell_timeout);
    match working_dir {
        Some(dir) => {
            registry.register(Box::new(file_write::FileWriteTool::with_root(dir)));
            registry.register(Box::new(str_replace::StrReplaceTool::with_root(dir)));
        }
        None => {
            registry.register(Box::new(file_write::FileWriteTool::new()));
            registry.register(Box::new(str_replace::StrReplaceTool::new()));
        }
    }
    registry.register(Box::new(todo::TodoWriteTool::new(todos)));
    registry
}

/// Registry for sub-agents: reading and shell inspection, no file-mutating tools.
pub fn read_only_registry(working_dir: Option<&Path>, shell_timeout: Duration) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    match working_dir {
        Some(dir) => {
            registry.register(Box::new(shell::ShellTool::new(shell_timeout).with_working_dir(dir)));
            registry.register(Box::new(file_read::FileReadTool::with_root(dir)));
            registry.register(Box::new(
                git_diff::GitDiffTool::new(shell_timeout).with_working_dir(dir),
            ));
        }
        None => {
            registry.register(Box::new(shell::ShellTool::new(shell_timeout)));
            registry.register(Box::new(file_read::FileReadTool::new()));
            registry.register(Box::new(git_diff::GitDiffTool::new(shell_timeout)));
        }
    }
    registry
}
