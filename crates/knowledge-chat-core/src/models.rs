//! Data models shared by the index, the chat history store, and the
//! session layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

/// Maximum length of a citation excerpt, in characters.
pub const EXCERPT_CHARS: usize = 240;

/// A single corpus file after text extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Deterministic UUID derived from `source_id`.
    pub id: String,
    /// Path relative to the corpus root (or the path as listed).
    pub source_id: String,
    /// File name.
    pub title: String,
    pub content_type: String,
    pub body: String,
    /// SHA-256 of `body`.
    pub hash: String,
    /// Last modification time (Unix seconds).
    pub updated_at: i64,
}

/// A retrievable slice of a document body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}

/// Speaker of a chat message.
///
/// Transcripts only ever contain `User` and `Assistant`; `System` is used
/// when composing prompts. Foreign role names written by other tools are
/// accepted on read and normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    #[serde(alias = "human", alias = "USER", alias = "User")]
    User,
    #[serde(alias = "ai", alias = "model", alias = "chatbot", alias = "ASSISTANT", alias = "Assistant")]
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Where an answer came from. Recomputed for every query, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceCitation {
    pub file_path: String,
    pub score: f32,
    pub excerpt: String,
    pub document_id: String,
    pub chunk_id: String,
}

/// Machine-readable reason a chat turn produced no answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatFailure {
    /// Stable snake_case code, e.g. `"timeout"` or `"unavailable"`.
    pub kind: String,
    pub message: String,
    /// Whether asking again later may succeed (a slow or unreachable
    /// service, as opposed to a rejected request).
    pub retryable: bool,
}

/// Result of one chat turn.
///
/// A failed turn still produces a value: `response` carries a readable
/// message, `citations` is empty, and `error` says what went wrong.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub citations: Vec<SourceCitation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ChatFailure>,
}

impl ChatResponse {
    pub fn answered(response: String, citations: Vec<SourceCitation>) -> Self {
        Self {
            response,
            citations,
            error: None,
        }
    }

    pub fn failed(kind: &str, message: impl Into<String>) -> Self {
        Self::failure(kind, message.into(), false)
    }

    fn failure(kind: &str, message: String, retryable: bool) -> Self {
        Self {
            response: format!("Sorry, I could not answer that: {}", message),
            citations: Vec::new(),
            error: Some(ChatFailure {
                kind: kind.to_string(),
                message,
                retryable,
            }),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

impl From<&ServiceError> for ChatResponse {
    fn from(err: &ServiceError) -> Self {
        ChatResponse::failure(err.kind(), err.to_string(), err.is_transient())
    }
}

/// Truncate text to [`EXCERPT_CHARS`] characters for display.
pub fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= EXCERPT_CHARS {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(EXCERPT_CHARS).collect();
    out.push('…');
    out
}
