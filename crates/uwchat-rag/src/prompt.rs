use uwchat_core::{ChatMessage, Role};
use uwchat_error::{ChatError, Result};

/// Grounding rules for every completion. Singular and always first in the
/// assembled sequence.
pub const SYSTEM_PROMPT: &str = "You are a helpful assistant for University of Waterloo students. Answer based on the provided context.

If the user asks about a specific non-Waterloo location (like San Francisco, NYC, Toronto, etc.) by name, you can provide information about that location if it appears in the context.

If the user doesn't specify a location when asking about places to eat, restaurants, cafes, or other location-based queries, always assume they are asking about places in Waterloo or near the University of Waterloo campus.

If the context doesn't contain relevant information to answer the user's question, inform them that you don't have that specific information and offer to help with something else.";

/// Join citation texts into the context block, order preserved from
/// retrieval.
pub fn context_block(texts: &[String]) -> String {
    texts.join("\n")
}

/// Build the model-ready message sequence: the fixed system instruction,
/// all history except the final turn, then one synthesized user message
/// carrying the retrieval context and the original question.
pub fn assemble(history: &[ChatMessage], context: &str) -> Result<Vec<ChatMessage>> {
    let last = history.last().ok_or_else(|| ChatError::Validation {
        message: "conversation history is empty".to_string(),
    })?;
    if last.role != Role::User {
        return Err(ChatError::Validation {
            message: "last message must have role user".to_string(),
        });
    }

    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(ChatMessage::system(SYSTEM_PROMPT));
    messages.extend_from_slice(&history[..history.len() - 1]);
    messages.push(ChatMessage::user(format!(
        "Context: {}\n\nQuestion: {}",
        context, last.content
    )));
    Ok(messages)
}
