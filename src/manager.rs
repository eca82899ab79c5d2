//! The session manager: the public face of knowledge-chat.
//!
//! Owns the knowledge snapshot, the shared history store, and every open
//! [`Session`]. Keeps them consistent across the lifecycle:
//!
//! ```text
//! Uninitialized --start--> Ready --ask/reset--> Ready
//!                          Ready --relearn--> Rebuilding --ok--> Ready
//!                                                        --err-> Uninitialized
//! ```
//!
//! The single-conversation methods (`ask`, `chat`, `get_history`,
//! `remove_chat_history`) act on the default session key; the `*_in` /
//! `*_of` variants take an explicit key.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use knowledge_chat_core::embedding::Embedder;
use knowledge_chat_core::generation::Generator;
use knowledge_chat_core::models::{ChatResponse, Message};

use crate::config::{self, Config};
use crate::corpus::CorpusSource;
use crate::error::{SessionError, SessionResult};
use crate::history::{lock, ChatHistoryStore, SharedHistory};
use crate::index::{ensure_index, rebuild_index, IndexOptions, KnowledgeSnapshot};
use crate::progress::{IndexProgressReporter, NoProgress};
use crate::session::{open_session, ChatContext, ChatSettings, Session};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    Ready,
    Rebuilding,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RelearnOptions {
    /// Also wipe every stored conversation.
    pub clear_history: bool,
}

pub struct SessionManager {
    index_dir: PathBuf,
    corpus: CorpusSource,
    options: IndexOptions,
    default_key: String,
    embedder: Arc<dyn Embedder>,
    context: ChatContext,
    history: SharedHistory,
    knowledge: Option<Arc<KnowledgeSnapshot>>,
    sessions: BTreeMap<String, Session>,
    state: SessionState,
    progress: Box<dyn IndexProgressReporter>,
}

impl SessionManager {
    /// Load (or build) the index and open the default session.
    pub async fn start(
        config: &Config,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
    ) -> SessionResult<Self> {
        Self::start_with_progress(config, embedder, generator, Box::new(NoProgress)).await
    }

    pub async fn start_with_progress(
        config: &Config,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        progress: Box<dyn IndexProgressReporter>,
    ) -> SessionResult<Self> {
        config::validate(config).map_err(|e| SessionError::Config(format!("{:#}", e)))?;

        let history = ChatHistoryStore::open(&config.storage.history_path)?.shared();
        let mut manager = Self {
            index_dir: config.storage.index_dir.clone(),
            corpus: CorpusSource::from_config(&config.knowledge),
            options: IndexOptions::from_config(config),
            default_key: config.chat.session_key.clone(),
            embedder,
            context: ChatContext {
                generator,
                settings: ChatSettings::from_config(config),
            },
            history,
            knowledge: None,
            sessions: BTreeMap::new(),
            state: SessionState::Uninitialized,
            progress,
        };

        let snapshot = ensure_index(
            &manager.index_dir,
            &manager.corpus,
            manager.embedder.clone(),
            manager.options,
            manager.progress.as_ref(),
        )
        .await?;
        manager.knowledge = Some(Arc::new(snapshot));
        manager.state = SessionState::Ready;
        let key = manager.default_key.clone();
        manager.open_session(&key)?;
        tracing::info!(session = %key, "session manager ready");
        Ok(manager)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The loaded knowledge, if the manager is ready.
    pub fn snapshot(&self) -> Option<&Arc<KnowledgeSnapshot>> {
        self.knowledge.as_ref()
    }

    pub fn default_key(&self) -> &str {
        &self.default_key
    }

    /// Ask on the default session and return only the answer text. A
    /// service failure yields its readable message.
    pub async fn ask(&mut self, question: &str) -> SessionResult<String> {
        Ok(self.chat(question).await?.response)
    }

    pub async fn chat(&mut self, question: &str) -> SessionResult<ChatResponse> {
        let key = self.default_key.clone();
        self.chat_in(&key, question).await
    }

    pub fn get_history(&self) -> SessionResult<Vec<Message>> {
        self.history_of(&self.default_key)
    }

    pub fn remove_chat_history(&mut self) -> SessionResult<()> {
        let key = self.default_key.clone();
        self.reset_session(&key)
    }

    /// Open `session_id` if it is not open yet.
    pub fn open_session(&mut self, session_id: &str) -> SessionResult<()> {
        let session_id = check_key(session_id)?;
        if self.sessions.contains_key(session_id) {
            return Ok(());
        }
        let knowledge = self.knowledge.clone().ok_or(SessionError::NotReady)?;
        let session = open_session(
            knowledge,
            self.history.clone(),
            session_id,
            self.context.clone(),
        )?;
        self.sessions.insert(session_id.to_string(), session);
        Ok(())
    }

    pub async fn chat_in(&mut self, session_id: &str, question: &str) -> SessionResult<ChatResponse> {
        if self.state != SessionState::Ready {
            return Err(SessionError::NotReady);
        }
        self.open_session(session_id)?;
        let session = self
            .sessions
            .get_mut(session_id.trim())
            .ok_or(SessionError::NotReady)?;
        session.ask(question).await
    }

    /// Transcript of `session_id`. Readable even when the index is not.
    pub fn history_of(&self, session_id: &str) -> SessionResult<Vec<Message>> {
        let session_id = check_key(session_id)?;
        Ok(lock(&self.history)?.messages(session_id).to_vec())
    }

    /// Clear the transcript of `session_id` and close it. Idempotent.
    pub fn reset_session(&mut self, session_id: &str) -> SessionResult<()> {
        let session_id = check_key(session_id)?;
        match self.sessions.remove(session_id) {
            Some(mut session) => session.reset(),
            None => lock(&self.history)?.clear(session_id),
        }
    }

    /// Number of sessions currently bound to the knowledge snapshot.
    pub fn open_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Delete the index and rebuild it from the corpus. There is no undo.
    ///
    /// Open sessions are rebound to the new snapshot. If the rebuild fails
    /// the manager is left `Uninitialized` and serves no answers until a
    /// later relearn succeeds. If only clearing the history fails, the new
    /// index is served, every transcript is kept, and the error is returned.
    pub async fn relearn_knowledge(
        &mut self,
        options: RelearnOptions,
    ) -> SessionResult<Arc<KnowledgeSnapshot>> {
        let open: Vec<String> = self.sessions.keys().cloned().collect();
        self.state = SessionState::Rebuilding;
        self.sessions.clear();
        self.knowledge = None;
        tracing::info!(clear_history = options.clear_history, "relearning knowledge");

        let rebuilt = rebuild_index(
            &self.index_dir,
            &self.corpus,
            self.embedder.clone(),
            self.options,
            self.progress.as_ref(),
        )
        .await;
        let snapshot = match rebuilt {
            Ok(s) => Arc::new(s),
            Err(e) => {
                tracing::warn!(error = %e, "relearn failed; knowledge unavailable");
                self.state = SessionState::Uninitialized;
                return Err(e);
            }
        };
        self.knowledge = Some(snapshot.clone());
        self.state = SessionState::Ready;

        let cleared = match options.clear_history {
            true => lock(&self.history)?.clear_all(),
            false => Ok(()),
        };
        let default_key = self.default_key.clone();
        for key in std::iter::once(default_key).chain(open) {
            self.open_session(&key)?;
        }
        if let Err(e) = cleared {
            tracing::warn!(error = %e, "index rebuilt but chat history could not be cleared");
            return Err(e);
        }
        Ok(snapshot)
    }
}

fn check_key(session_id: &str) -> SessionResult<&str> {
    let key = session_id.trim();
    if key.is_empty() {
        return Err(SessionError::Config("session id must not be empty".into()));
    }
    Ok(key)
}
