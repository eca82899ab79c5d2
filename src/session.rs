//! Chat sessions: one transcript bound to one knowledge snapshot.
//!
//! A turn embeds the question, retrieves the top-k passages, composes the
//! prompt from system prompt + context + recent history + question, and asks
//! the generation service. Only a completed exchange is appended to the
//! transcript. Transcripts live in the shared history store alone; a
//! session reads its own on every turn and writes it back before the
//! answer is returned.
//!
//! Failures of the model services do not surface as `Err`: the caller gets
//! a [`ChatResponse`] whose `error` says what went wrong and whose
//! `response` is readable as-is. `Err` is reserved for local state problems
//! (the history file could not be written, the index rejected the query).

use std::sync::Arc;

use knowledge_chat_core::embedding::embed_query;
use knowledge_chat_core::error::ServiceError;
use knowledge_chat_core::generation::Generator;
use knowledge_chat_core::models::{ChatResponse, Message};
use knowledge_chat_core::prompt::{compose, PromptInput, DEFAULT_SYSTEM_PROMPT};
use knowledge_chat_core::retrieval::{citations, retrieve, RetrievalParams};

use crate::config::Config;
use crate::error::{SessionError, SessionResult};
use crate::history::{lock, SharedHistory};
use crate::index::KnowledgeSnapshot;

#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub system_prompt: String,
    pub history_window: usize,
    pub retrieval: RetrievalParams,
}

impl ChatSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            system_prompt: config.chat.system_prompt().to_string(),
            history_window: config.chat.history_window,
            retrieval: config.retrieval.params(),
        }
    }
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            history_window: 12,
            retrieval: RetrievalParams::default(),
        }
    }
}

/// The generation client and settings every session of a manager shares.
#[derive(Clone)]
pub struct ChatContext {
    pub generator: Arc<dyn Generator>,
    pub settings: ChatSettings,
}

pub struct Session {
    id: String,
    knowledge: Arc<KnowledgeSnapshot>,
    history: SharedHistory,
    context: ChatContext,
}

/// Open the conversation `session_id`, resuming its stored transcript if
/// there is one.
pub fn open_session(
    knowledge: Arc<KnowledgeSnapshot>,
    history: SharedHistory,
    session_id: &str,
    context: ChatContext,
) -> SessionResult<Session> {
    let stored = lock(&history)?.messages(session_id).len();
    tracing::debug!(session = session_id, messages = stored, "session opened");
    Ok(Session {
        id: session_id.to_string(),
        knowledge,
        history,
        context,
    })
}

impl Session {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn knowledge(&self) -> &Arc<KnowledgeSnapshot> {
        &self.knowledge
    }

    /// The transcript, oldest first.
    pub fn history(&self) -> SessionResult<Vec<Message>> {
        Ok(lock(&self.history)?.messages(&self.id).to_vec())
    }

    /// Run one question/answer turn.
    pub async fn ask(&mut self, question: &str) -> SessionResult<ChatResponse> {
        let question = question.trim();
        if question.is_empty() {
            let err = SessionError::EmptyQuestion;
            return Ok(ChatResponse::failed(err.code(), err.to_string()));
        }

        let query_vec = match embed_query(self.knowledge.embedder(), question).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(session = %self.id, error = %e, "question could not be embedded");
                return Ok(ChatResponse::from(&e));
            }
        };
        let dims = self.knowledge.manifest().dims;
        if query_vec.len() != dims {
            let e = ServiceError::malformed(
                "embedding",
                format!(
                    "query vector has {} dims, index was built with {}",
                    query_vec.len(),
                    dims
                ),
            );
            tracing::warn!(session = %self.id, error = %e, "question could not be embedded");
            return Ok(ChatResponse::from(&e));
        }

        let settings = &self.context.settings;
        let passages = retrieve(self.knowledge.store(), &query_vec, &settings.retrieval).await?;
        tracing::debug!(
            session = %self.id,
            passages = passages.len(),
            top_score = passages.first().map(|p| p.score),
            "retrieved context"
        );

        let mut transcript = self.history()?;
        let messages = compose(&PromptInput {
            system_prompt: &settings.system_prompt,
            passages: &passages,
            history: &transcript,
            history_window: settings.history_window,
            question,
        });

        let answer = match self.context.generator.complete(&messages).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(session = %self.id, error = %e, "generation failed; transcript unchanged");
                return Ok(ChatResponse::from(&e));
            }
        };

        transcript.push(Message::user(question));
        transcript.push(Message::assistant(answer.clone()));
        lock(&self.history)?.replace(&self.id, transcript)?;

        Ok(ChatResponse::answered(answer, citations(&passages)))
    }

    /// Forget this conversation, in memory and on disk. Idempotent.
    pub fn reset(&mut self) -> SessionResult<()> {
        lock(&self.history)?.clear(&self.id)?;
        tracing::info!(session = %self.id, "chat history cleared");
        Ok(())
    }
}
