//! Token estimation utilities.
//!
//! The estimate is approximate, not exact: 1 token ≈ 4 characters, rounded
//! up. It is within ~10% for BPE tokenizers on English text and code, which
//! is enough to decide when to prune. Callers must not treat it as a count.

use forgeloop_core::message::Message;

/// Estimate the token count for a string.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Estimate tokens for a single message: its content plus any tool-call
/// names and arguments it carries.
pub fn estimate_message_tokens(message: &Message) -> usize {
    let calls: usize = message
        .tool_calls
        .iter()
        .map(|tc| {
            let args = serde_json::to_string(&tc.arguments).unwrap_or_default();
            estimate_tokens(&tc.name) + estimate_tokens(&args)
        })
        .sum();
    estimate_tokens(&message.content) + calls
}

/// Estimate tokens for a slice of messages.
pub fn estimate_messages_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgeloop_core::message::ToolCall;

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn four_chars_is_one_token() {
        assert_eq!(estimate_tokens("test"), 1);
    }

    #[test]
    fn five_chars_rounds_up() {
        assert_eq!(estimate_tokens("hello"), 2);
    }

    #[test]
    fn counts_characters_not_bytes() {
        assert_eq!(estimate_tokens("éééé"), 1);
    }

    #[test]
    fn message_counts_content() {
        let msg = Message::user("a".repeat(1200));
        assert_eq!(estimate_message_tokens(&msg), 300);
    }

    #[test]
    fn tool_call_arguments_count() {
        let call = ToolCall::from_value("c1", "bash", serde_json::json!({"command": "ls"}));
        let msg = Message::assistant("").with_tool_calls(vec![call]);
        assert!(estimate_message_tokens(&msg) > 0);
    }

    #[test]
    fn multiple_messages() {
        let msgs = vec![Message::user("hello"), Message::assistant("world")];
        assert_eq!(estimate_messages_tokens(&msgs), 4);
    }
}
