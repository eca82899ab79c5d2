//! Chat prompt composition.
//!
//! Each turn is sent to the generation service as:
//!
//! ```text
//! system     system prompt + retrieved context (or a "no context" note)
//! user/asst  the last `history_window` transcript messages
//! user       the current question
//! ```
//!
//! The history window always starts on a user message so the model never
//! sees an answer without its question.

use crate::models::{Message, Role};
use crate::retrieval::Passage;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant that answers questions \
using the knowledge base excerpts provided below. Prefer the excerpts over prior knowledge. \
If the excerpts do not contain the answer, say so plainly. Use the conversation so far to \
resolve follow-up questions.";

const CONTEXT_RULE: &str = "---------------------";

/// Written into the system message when retrieval found nothing.
pub const NO_CONTEXT_NOTE: &str = "No relevant context was found in the knowledge base.";

pub struct PromptInput<'a> {
    pub system_prompt: &'a str,
    pub passages: &'a [Passage],
    pub history: &'a [Message],
    pub history_window: usize,
    pub question: &'a str,
}

/// Build the message list for one turn.
pub fn compose(input: &PromptInput<'_>) -> Vec<Message> {
    let mut system = String::from(input.system_prompt.trim());
    system.push_str("\n\n");
    if input.passages.is_empty() {
        system.push_str(NO_CONTEXT_NOTE);
    } else {
        system.push_str("Context information is below.\n");
        system.push_str(CONTEXT_RULE);
        system.push('\n');
        system.push_str(&format_context(input.passages));
        system.push('\n');
        system.push_str(CONTEXT_RULE);
    }

    let mut messages = Vec::with_capacity(input.history_window + 2);
    messages.push(Message::system(system));
    messages.extend(condense_history(input.history, input.history_window));
    messages.push(Message::user(input.question.trim()));
    messages
}

/// Render passages as `file_path: <path>` blocks separated by blank lines.
pub fn format_context(passages: &[Passage]) -> String {
    passages
        .iter()
        .map(|p| format!("file_path: {}\n\n{}", p.file_path, p.text.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// The last `window` user/assistant messages, starting on a user turn.
pub fn condense_history(history: &[Message], window: usize) -> Vec<Message> {
    let turns: Vec<&Message> = history
        .iter()
        .filter(|m| matches!(m.role, Role::User | Role::Assistant))
        .collect();
    let start = turns.len().saturating_sub(window);
    let mut tail = &turns[start..];
    while let Some(first) = tail.first() {
        if first.role == Role::User {
            break;
        }
        tail = &tail[1..];
    }
    tail.iter().map(|m| (*m).clone()).collect()
}
