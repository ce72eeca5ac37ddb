//! Error types for the forgeloop domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Model-side failures are `LlmError`, tool-side failures are `ToolError`.

use thiserror::Error;

/// The top-level error type for forgeloop operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

/// The four error kinds every provider must signal distinctly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    Authentication,
    RateLimit,
    ContextLength,
    Api,
}

/// Normalized provider failure.
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Rate limited by provider{}", retry_hint(.retry_after_secs))]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Context length exceeded: {0}")]
    ContextLength(String),

    #[error("API request failed: {message} (status: {status_code})")]
    Api { status_code: u16, message: String },

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("All models failed. Errors:\n{}", .errors.join("\n"))]
    AllProvidersFailed { errors: Vec<String> },
}

fn retry_hint(secs: &Option<u64>) -> String {
    match secs {
        Some(s) => format!(", retry after {s}s"),
        None => String::new(),
    }
}

impl LlmError {
    /// Collapse the variant into one of the four normalized kinds.
    pub fn kind(&self) -> LlmErrorKind {
        match self {
            LlmError::Authentication(_) | LlmError::NotConfigured(_) => {
                LlmErrorKind::Authentication
            }
            LlmError::RateLimited { .. } => LlmErrorKind::RateLimit,
            LlmError::ContextLength(_) => LlmErrorKind::ContextLength,
            LlmError::Api { .. }
            | LlmError::Timeout(_)
            | LlmError::Network(_)
            | LlmError::AllProvidersFailed { .. } => LlmErrorKind::Api,
        }
    }

    /// Whether the same provider may succeed if asked again.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::RateLimited { .. } | LlmError::Timeout(_) | LlmError::Network(_) => true,
            LlmError::Api { status_code, .. } => {
                *status_code == 0 || *status_code >= 500 || *status_code == 408
            }
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    /// Preview could not be produced, e.g. the edit target does not match.
    #[error("{message}")]
    Preview {
        message: String,
        suggestion: Option<String>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ToolError {
    /// A hint for the model, when the error carries one.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            ToolError::Preview { suggestion, .. } => suggestion.as_deref(),
            ToolError::NotFound(_) => Some("Use one of the available tools"),
            ToolError::InvalidArguments(_) => Some("Check the parameters and try again"),
            ToolError::Io(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Some("Verify the file path is correct")
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn llm_error_displays_correctly() {
        let err = Error::Llm(LlmError::Api {
            status_code: 502,
            message: "Bad gateway".into(),
        });
        assert!(err.to_string().contains("502"));
        assert!(err.to_string().contains("Bad gateway"));
    }

    #[test]
    fn aggregated_error_lists_every_provider() {
        let err = LlmError::AllProvidersFailed {
            errors: vec!["anthropic: boom".into(), "openai: bust".into()],
        };
        let text = err.to_string();
        assert!(text.starts_with("All models failed. Errors:"));
        assert!(text.contains("anthropic: boom"));
        assert!(text.contains("openai: bust"));
    }

    #[test]
    fn kinds_are_normalized() {
        assert_eq!(LlmError::Authentication("x".into()).kind(), LlmErrorKind::Authentication);
        assert_eq!(
            LlmError::RateLimited { retry_after_secs: None }.kind(),
            LlmErrorKind::RateLimit
        );
        assert_eq!(LlmError::ContextLength("x".into()).kind(), LlmErrorKind::ContextLength);
        assert_eq!(LlmError::Timeout("x".into()).kind(), LlmErrorKind::Api);
    }

    #[test]
    fn transient_classification() {
        assert!(LlmError::RateLimited { retry_after_secs: Some(2) }.is_transient());
        assert!(LlmError::Api { status_code: 503, message: String::new() }.is_transient());
        assert!(!LlmError::Api { status_code: 400, message: String::new() }.is_transient());
        assert!(!LlmError::Authentication("bad key".into()).is_transient());
        assert!(!LlmError::ContextLength("too long".into()).is_transient());
    }

    #[test]
    fn tool_error_suggestions() {
        assert_eq!(
            ToolError::NotFound("nope".into()).suggestion(),
            Some("Use one of the available tools")
        );
        let err = ToolError::Preview {
            message: "Exact string not found in file".into(),
            suggestion: Some("Re-read the file".into()),
        };
        assert_eq!(err.to_string(), "Exact string not found in file");
        assert_eq!(err.suggestion(), Some("Re-read the file"));
    }
}
