//! Token estimation.
//!
//! Approximates model token counts without calling the model, using a
//! fixed ~4 characters per token ratio (Gemini/GPT average). Every function
//! here is pure and infallible.

use super::message::Message;
use crate::tools::ToolDefinition;

/// Characters per token estimate (conservative for Gemini/GPT models).
const CHARS_PER_TOKEN: usize = 4;

/// Per-message tax for role name, delimiters and metadata on the wire.
pub const MESSAGE_OVERHEAD: usize = 4;

/// Estimate token count for a string.
#[inline]
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(CHARS_PER_TOKEN)
}

/// Estimate tokens for a single message, overhead included.
pub fn estimate_message(message: &Message) -> usize {
    let mut tokens = MESSAGE_OVERHEAD + estimate_tokens(&message.content);

    if let Some(payload) = &message.payload {
        tokens += estimate_tokens(&payload.to_string());
    }
    if let Some(calls) = &message.tool_calls {
        for call in calls {
            tokens += estimate_tokens(&call.name) + estimate_tokens(&call.arguments.to_string());
        }
    }

    tokens
}

/// Estimate tokens for a sequence of messages.
///
/// Monotonic: appending a message never decreases the estimate, since every
/// message costs at least [`MESSAGE_OVERHEAD`].
pub fn estimate_history(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message).sum()
}

/// Estimate tokens for tool definitions sent alongside the prompt.
pub fn estimate_tools(tools: &[ToolDefinition]) -> usize {
    tools
        .iter()
        .map(|t| serde_json::to_string(t).map(|s| estimate_tokens(&s)).unwrap_or(0))
        .sum()
}

/// Truncate text to fit within a token budget.
pub fn truncate_to_budget(text: &str, max_tokens: usize) -> &str {
    let max_chars = max_tokens * CHARS_PER_TOKEN;
    if text.len() <= max_chars {
        text
    } else {
        // Find a safe UTF-8 boundary
        let mut end = max_chars.min(text.len());
        while end > 0 && !text.is_char_boundary(end) {
            end -= 1;
        }
        &text[..end]
    }
}
