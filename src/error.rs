//! Lifecycle errors for the index and chat session layers.

use std::path::{Path, PathBuf};

use knowledge_chat_core::error::ServiceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    /// The corpus produced no documents with non-blank text.
    #[error("knowledge corpus at {} contains no readable documents", .root.display())]
    CorpusEmpty { root: PathBuf },

    #[error("knowledge corpus not found: {}", .path.display())]
    CorpusMissing { path: PathBuf },

    /// The persisted index is partial or unreadable.
    #[error("persisted state at {} is corrupt: {reason}", .path.display())]
    CorruptPersistedState { path: PathBuf, reason: String },

    #[error(
        "index was built with embedding model '{persisted}' but '{configured}' is configured; \
         run `kchat relearn` to rebuild it"
    )]
    EmbeddingModelMismatch {
        persisted: String,
        configured: String,
    },

    #[error("failed to {op} {}: {source}", .path.display())]
    Filesystem {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Embedding failure while building the index.
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("index error: {0}")]
    Index(String),

    /// No knowledge snapshot is loaded, e.g. after a failed relearn.
    #[error("knowledge index is not ready; run `kchat relearn` to rebuild it")]
    NotReady,

    #[error("question must not be empty")]
    EmptyQuestion,

    #[error("configuration error: {0}")]
    Config(String),
}

impl SessionError {
    /// Stable snake_case code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::CorpusEmpty { .. } => "corpus_empty",
            SessionError::CorpusMissing { .. } => "corpus_missing",
            SessionError::CorruptPersistedState { .. } => "corrupt_persisted_state",
            SessionError::EmbeddingModelMismatch { .. } => "embedding_model_mismatch",
            SessionError::Filesystem { .. } => "filesystem",
            SessionError::Service(e) => e.kind(),
            SessionError::Index(_) => "index",
            SessionError::NotReady => "not_ready",
            SessionError::EmptyQuestion => "empty_question",
            SessionError::Config(_) => "config",
        }
    }

    pub fn fs(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        SessionError::Filesystem {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn corrupt(path: &Path, reason: impl Into<String>) -> Self {
        SessionError::CorruptPersistedState {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}

impl From<anyhow::Error> for SessionError {
    fn from(err: anyhow::Error) -> Self {
        SessionError::Index(format!("{:#}", err))
    }
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;
