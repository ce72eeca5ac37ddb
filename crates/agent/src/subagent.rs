//! The `task` tool: delegate a self-contained job to a child agent.
//!
//! The child gets its own [`ContextManager`] and a fresh tool registry
//! without file-mutating tools, runs with auto-approval, and only its final
//! message flows back into the parent's conversation.

use std::sync::Arc;

use async_trait::async_trait;
use forgeloop_core::error::ToolError;
use forgeloop_core::provider::Provider;
use forgeloop_core::tool::{Tool, ToolRegistry, ToolResult};
use serde_json::Value;
use tracing::info;

use crate::context::ContextManager;
use crate::loop_runner::AgentLoop;
use crate::result::Outcome;

/// Builds the registry a child agent gets.
pub type RegistryFactory = Arc<dyn Fn() -> ToolRegistry + Send + Sync>;

const CHILD_CONTEXT_TOKENS: usize = 50_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubagentKind {
    Explore,
    Plan,
    Test,
    Refactor,
    Documentation,
}

impl SubagentKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Explore" => Some(Self::Explore),
            "Plan" => Some(Self::Plan),
            "Test" => Some(Self::Test),
            "Refactor" => Some(Self::Refactor),
            "Documentation" => Some(Self::Documentation),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Explore => "Explore",
            Self::Plan => "Plan",
            Self::Test => "Test",
            Self::Refactor => "Refactor",
            Self::Documentation => "Documentation",
        }
    }

    /// Iteration budget. Only Explore scales with thoroughness.
    pub fn max_iterations(self, thoroughness: Thoroughness) -> usize {
        match (self, thoroughness) {
            (Self::Explore, Thoroughness::Quick) => 5,
            (Self::Explore, Thoroughness::VeryThorough) => 20,
            _ => 10,
        }
    }

    fn role(self) -> &'static str {
        match self {
            Self::Explore => {
                "an Explore agent specialized in finding code and explaining how it works"
            }
            Self::Plan => {
                "a Plan agent that produces step-by-step implementation plans without implementing them"
            }
            Self::Test => "a Test agent that studies test suites, frameworks and coverage gaps",
            Self::Refactor => {
                "a Refactor agent that reviews code for smells and proposes restructurings"
            }
            Self::Documentation => "a Documentation agent that describes APIs and their usage",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Thoroughness {
    Quick,
    #[default]
    Medium,
    VeryThorough,
}

impl Thoroughness {
    /// Unknown values fall back to `Medium`.
    pub fn parse(s: &str) -> Self {
        match s {
            "quick" => Self::Quick,
            "very thorough" => Self::VeryThorough,
            _ => Self::Medium,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Quick => "quick",
            Self::Medium => "medium",
            Self::VeryThorough => "very thorough",
        }
    }

    fn guidance(self) -> &'static str {
        match self {
            Self::Quick => {
                "Be quick: try one or two searches, read at most three files, answer concisely."
            }
            Self::Medium => {
                "Be moderately thorough: try several searches, read the key files, include examples."
            }
            Self::VeryThorough => {
                "Be exhaustive: try many search variations and naming conventions, check tests too, report everything relevant."
            }
        }
    }
}

fn child_task(kind: SubagentKind, thoroughness: Thoroughness, prompt: &str) -> String {
    format!(
        "You are {role}.\n\nTask:\n{prompt}\n\nThoroughness: {level}. {guidance}\n\n\
Do not modify any files. Cite findings as file:line. When done, start your reply with \
\"Final Answer:\" followed by a summary of what you found.",
        role = kind.role(),
        level = thoroughness.as_str(),
        guidance = thoroughness.guidance(),
    )
}

pub struct TaskTool {
    provider: Arc<dyn Provider>,
    registry: RegistryFactory,
    working_dir: Option<String>,
}

impl TaskTool {
    pub fn new(provider: Arc<dyn Provider>, registry: RegistryFactory) -> Self {
        Self {
            provider,
            registry,
            working_dir: None,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

fn required_str<'a>(arguments: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidArguments(format!("Missing '{key}' argument")))
}

#[async_trait]
impl Tool for TaskTool {
    fn name(&self) -> &str {
        "task"
    }

    fn description(&self) -> &str {
        "Launch a sub-agent to handle a multi-step investigation autonomously. Types: Explore \
         (find code, answer questions about the codebase; set thoroughness to quick, medium or \
         very thorough), Plan, Test, Refactor, Documentation. The sub-agent cannot modify files \
         and returns only its final summary."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "subagent_type": {
                    "type": "string",
                    "enum": ["Explore", "Plan", "Test", "Refactor", "Documentation"],
                    "description": "The kind of sub-agent to launch"
                },
                "prompt": {
                    "type": "string",
                    "description": "The full task for the sub-agent, including what to return"
                },
                "description": {
                    "type": "string",
                    "description": "A short (3-5 word) label for logging"
                },
                "thoroughness": {
                    "type": "string",
                    "enum": ["quick", "medium", "very thorough"],
                    "description": "How thorough the exploration should be (default: medium)"
                }
            },
            "required": ["subagent_type", "prompt", "description"]
        })
    }

    async fn execute(&self, arguments: Value) -> Result<ToolResult, ToolError> {
        let kind_name = required_str(&arguments, "subagent_type")?;
        let prompt = required_str(&arguments, "prompt")?;
        let description = required_str(&arguments, "description")?;
        let thoroughness = arguments
            .get("thoroughness")
            .and_then(Value::as_str)
            .map(Thoroughness::parse)
            .unwrap_or_default();

        let Some(kind) = SubagentKind::parse(kind_name) else {
            return Ok(ToolResult::fail(format!("Unknown subagent_type: {kind_name}"))
                .with_suggestion("Use 'Explore', 'Plan', 'Test', 'Refactor', or 'Documentation'"));
        };

        let max_iterations = kind.max_iterations(thoroughness);
        info!(subagent = kind.as_str(), %description, max_iterations, "Launching sub-agent");

        let mut child = AgentLoop::new(
            self.provider.clone(),
            Arc::new((self.registry)()),
            ContextManager::new(CHILD_CONTEXT_TOKENS),
        )
        .with_max_iterations(max_iterations);
        if let Some(dir) = &self.working_dir {
            child = child.with_working_dir(dir.clone());
        }

        let result = child.run(&child_task(kind, thoroughness, prompt), true).await;
        info!(
            subagent = kind.as_str(),
            iterations = result.iterations_used,
            stop_reason = %result.stop_reason,
            "Sub-agent finished"
        );

        let tool_result = if result.stop_reason.outcome() == Outcome::Error {
            ToolResult::fail(format!("Sub-agent failed: {}", result.message))
        } else {
            ToolResult::ok(result.message)
        };
        Ok(tool_result
            .with_metadata("subagent_type", serde_json::json!(kind.as_str()))
            .with_metadata("description", serde_json::json!(description))
            .with_metadata("thoroughness", serde_json::json!(thoroughness.as_str()))
            .with_metadata("iterations_used", serde_json::json!(result.iterations_used))
            .with_metadata("stop_reason", serde_json::json!(result.stop_reason)))
    }
}
