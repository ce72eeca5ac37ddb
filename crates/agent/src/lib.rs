//! The coding agent: loop, context, and tool coordination.
//!
//! Each iteration of [`AgentLoop::run`] follows the same cycle:
//!
//! 1. **Ask** the model (through any [`Provider`](forgeloop_core::provider::Provider),
//!    usually the fallback gateway) with the conversation, tool schemas and system prompt
//! 2. **Classify** the answer: final answer, text-only, or tool calls
//! 3. **Act**: run each tool call through the [`ToolExecutionCoordinator`]
//!    (lookup, validation, write-once guard, approval, panic containment)
//! 4. **Observe**: record results in the [`ContextManager`], compress and prune
//! 5. **Check** stop heuristics (stuck loop, tests passed)
//!
//! Every run ends in an [`AgentResult`] with a [`StopReason`].

pub mod context;
pub mod coordinator;
pub mod loop_runner;
pub mod prompt;
pub mod result;
pub mod subagent;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use context::{
    ContextManager, FileSummary, Modification, PruneReport, PruneTier, RecentToolOutput,
};
pub use coordinator::ToolExecutionCoordinator;
pub use loop_runner::AgentLoop;
pub use result::{AgentResult, Outcome, StopReason};
pub use subagent::{RegistryFactory, SubagentKind, TaskTool, Thoroughness};
