//! HTTP status → [`LlmError`] mapping shared by the wire clients.

use forgeloop_core::LlmError;

/// Substrings providers use when a prompt does not fit the model window.
const CONTEXT_LENGTH_MARKERS: &[&str] = &[
    "context_length_exceeded",
    "prompt is too long",
    "maximum context length",
    "context window",
    "too many tokens",
];

/// Map a non-success response to the shared taxonomy.
pub(crate) fn classify(
    provider: &str,
    status: u16,
    body: &str,
    retry_after: Option<u64>,
) -> LlmError {
    match status {
        401 | 403 => LlmError::Authentication(format!("{provider} rejected the API key")),
        429 => LlmError::RateLimited {
            retry_after_secs: retry_after,
        },
        400 | 413 if is_context_length(body) => LlmError::ContextLength(truncate(body, 300)),
        _ => LlmError::Api {
            status_code: status,
            message: truncate(body, 500),
        },
    }
}

/// Map a transport failure.
pub(crate) fn transport(err: reqwest::Error) -> LlmError {
    if err.is_timeout() {
        LlmError::Timeout(err.to_string())
    } else {
        LlmError::Network(err.to_string())
    }
}

/// Seconds from a `retry-after` header, if present and numeric.
pub(crate) fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn is_context_length(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    CONTEXT_LENGTH_MARKERS.iter().any(|m| lower.contains(m))
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}
