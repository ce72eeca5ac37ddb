//! # forgeloop core
//!
//! Domain types, traits, and error definitions for the forgeloop coding agent.
//! This crate has **no runtime dependencies** beyond serde, async-trait and a
//! few value-type crates. It defines the model that the provider, tool and
//! agent crates implement against.
//!
//! ## Design Philosophy
//!
//! Every seam is a trait here (`Provider`, `Tool`, `ApprovableTool`,
//! `Approver`, `CodeAnalyzer`). Implementations live in their own crates, so
//! the agent loop can be driven by scripted providers and fake tools in tests.

pub mod error;
pub mod message;
pub mod provider;
pub mod structure;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, LlmError, LlmErrorKind, Result, ToolError};
pub use message::{Message, Role, ToolCall};
pub use provider::{
    ChatOptions, ChatRequest, ChatResponse, FinishReason, Provider, ToolDefinition, Usage,
};
pub use structure::{CodeAnalyzer, FileStructure};
pub use tool::{
    Approval, ApprovableTool, Approver, AutoApprove, DenyAll, Preview, Tool, ToolEffect,
    ToolRegistry, ToolResult, execute_with_approval,
};
