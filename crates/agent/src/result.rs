//! The value returned by one agent run.

use serde::{Deserialize, Serialize};

use crate::context::Modification;

/// Why a run ended. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    FinalAnswer,
    TestsPassed,
    StuckInLoop,
    TooManyTextResponses,
    NoAction,
    RepeatedMessage,
    MaxIterations,
    UserInterrupt,
    LlmError,
    UnexpectedError,
}

/// Coarse outcome class of a [`StopReason`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Incomplete,
    Error,
}

impl StopReason {
    pub fn outcome(self) -> Outcome {
        match self {
            StopReason::FinalAnswer | StopReason::TestsPassed | StopReason::StuckInLoop => {
                Outcome::Success
            }
            StopReason::TooManyTextResponses
            | StopReason::NoAction
            | StopReason::RepeatedMessage
            | StopReason::MaxIterations
            | StopReason::UserInterrupt => Outcome::Incomplete,
            StopReason::LlmError | StopReason::UnexpectedError => Outcome::Error,
        }
    }

    pub fn is_success(self) -> bool {
        self.outcome() == Outcome::Success
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StopReason::FinalAnswer => "final_answer",
            StopReason::TestsPassed => "tests_passed",
            StopReason::StuckInLoop => "stuck_in_loop",
            StopReason::TooManyTextResponses => "too_many_text_responses",
            StopReason::NoAction => "no_action",
            StopReason::RepeatedMessage => "repeated_message",
            StopReason::MaxIterations => "max_iterations",
            StopReason::UserInterrupt => "user_interrupt",
            StopReason::LlmError => "llm_error",
            StopReason::UnexpectedError => "unexpected_error",
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of [`AgentLoop::run`](crate::AgentLoop::run). Always well-formed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub success: bool,
    pub message: String,
    pub iterations_used: usize,
    pub modifications: Vec<Modification>,
    pub stop_reason: StopReason,
    /// `tool_calls`, `provider_model`, `final_tokens`
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}
