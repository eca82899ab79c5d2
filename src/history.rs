//! Persisted chat transcripts.
//!
//! One JSON file holds every conversation, keyed by session id:
//!
//! ```json
//! { "store": { "default": [ {"role": "user", "content": "...", "created_at": "..."} ] } }
//! ```
//!
//! Every change is written through immediately with an atomic replace.
//! When the last conversation is cleared the file itself is removed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use knowledge_chat_core::models::{Message, Role};

use crate::error::{SessionError, SessionResult};
use crate::persist::{read_json, remove_file_if_exists, write_json_atomic};

#[derive(Debug, Default, Serialize, Deserialize)]
struct HistoryFile {
    #[serde(default)]
    store: BTreeMap<String, Vec<Message>>,
}

#[derive(Debug)]
pub struct ChatHistoryStore {
    path: PathBuf,
    store: BTreeMap<String, Vec<Message>>,
}

/// History store shared by all sessions of one manager.
pub type SharedHistory = Arc<Mutex<ChatHistoryStore>>;

impl ChatHistoryStore {
    /// Open the history file at `path`, starting empty if it does not exist.
    pub fn open(path: impl Into<PathBuf>) -> SessionResult<Self> {
        let path = path.into();
        let store = if path.is_file() {
            let file: HistoryFile = read_json(&path)?;
            file.store
                .into_iter()
                .map(|(key, msgs)| (key, only_turns(msgs)))
                .collect()
        } else {
            BTreeMap::new()
        };
        tracing::debug!(path = %path.display(), conversations = store.len(), "opened chat history");
        Ok(Self { path, store })
    }

    pub fn shared(self) -> SharedHistory {
        Arc::new(Mutex::new(self))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Transcript for `key`, oldest first. Empty if unknown.
    pub fn messages(&self, key: &str) -> &[Message] {
        self.store.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn keys(&self) -> Vec<String> {
        self.store.keys().cloned().collect()
    }

    /// Replace the transcript for `key` and persist. On a write failure the
    /// in-memory state is rolled back.
    pub fn replace(&mut self, key: &str, messages: Vec<Message>) -> SessionResult<()> {
        let previous = if messages.is_empty() {
            self.store.remove(key)
        } else {
            self.store.insert(key.to_string(), messages)
        };
        if let Err(e) = self.save() {
            match previous {
                Some(old) => self.store.insert(key.to_string(), old),
                None => self.store.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    /// Drop the transcript for `key`. Clearing an unknown key is a no-op.
    pub fn clear(&mut self, key: &str) -> SessionResult<()> {
        self.replace(key, Vec::new())
    }

    /// Drop every transcript and delete the file. On failure nothing is
    /// dropped.
    pub fn clear_all(&mut self) -> SessionResult<()> {
        let previous = std::mem::take(&mut self.store);
        if let Err(e) = remove_file_if_exists(&self.path) {
            self.store = previous;
            return Err(e);
        }
        Ok(())
    }

    fn save(&self) -> SessionResult<()> {
        if self.store.is_empty() {
            return remove_file_if_exists(&self.path);
        }
        let file = HistoryFile {
            store: self.store.clone(),
        };
        write_json_atomic(&self.path, &file)
    }
}

/// Keep only user/assistant messages; system prompts are never persisted.
fn only_turns(messages: Vec<Message>) -> Vec<Message> {
    messages
        .into_iter()
        .filter(|m| matches!(m.role, Role::User | Role::Assistant))
        .collect()
}

/// Lock a shared history store, mapping poisoning to an error.
pub fn lock(
    history: &SharedHistory,
) -> SessionResult<std::sync::MutexGuard<'_, ChatHistoryStore>> {
    history
        .lock()
        .map_err(|_| SessionError::Index("chat history lock poisoned".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn exchange(q: &str, a: &str) -> Vec<Message> {
        vec![Message::user(q), Message::assistant(a)]
    }

    #[test]
    fn missing_file_opens_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChatHistoryStore::open(dir.path().join("chat/chat_store.json")).unwrap();
        assert!(store.messages("default").is_empty());
        assert!(store.keys().is_empty());
    }

    #[test]
    fn replace_persists_and_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat/chat_store.json");
        let mut store = ChatHistoryStore::open(&path).unwrap();
        store.replace("default", exchange("q1", "a1")).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["store"]["default"][0]["role"], "user");
        assert_eq!(raw["store"]["default"][1]["content"], "a1");

        let reopened = ChatHistoryStore::open(&path).unwrap();
        assert_eq!(reopened.messages("default").len(), 2);
    }

    #[test]
    fn clearing_last_conversation_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat_store.json");
        let mut store = ChatHistoryStore::open(&path).unwrap();
        store.replace("a", exchange("q", "a")).unwrap();
        store.replace("b", exchange("q", "a")).unwrap();

        store.clear("a").unwrap();
        assert!(path.exists());
        assert_eq!(store.keys(), vec!["b"]);

        store.clear("b").unwrap();
        assert!(!path.exists());
        store.clear("b").unwrap();
        store.clear_all().unwrap();
    }

    #[test]
    fn failed_clear_all_keeps_every_transcript() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat_store.json");
        let mut store = ChatHistoryStore::open(&path).unwrap();
        store.replace("a", exchange("q", "a")).unwrap();

        fs::remove_file(&path).unwrap();
        fs::create_dir(&path).unwrap();
        assert!(store.clear_all().is_err());
        assert_eq!(store.messages("a").len(), 2);
    }

    #[test]
    fn foreign_roles_are_normalized_and_system_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat_store.json");
        fs::write(
            &path,
            r#"{"store": {"default": [
                {"role": "system", "content": "be nice"},
                {"role": "human", "content": "hi"},
                {"role": "ai", "content": "hello"}
            ]}}"#,
        )
        .unwrap();
        let store = ChatHistoryStore::open(&path).unwrap();
        let roles: Vec<Role> = store.messages("default").iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant]);
    }

    #[test]
    fn garbage_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat_store.json");
        fs::write(&path, "not json").unwrap();
        assert!(matches!(
            ChatHistoryStore::open(&path),
            Err(SessionError::CorruptPersistedState { .. })
        ));
    }

    #[test]
    fn failed_write_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        // The parent "directory" is a file, so every write fails.
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "").unwrap();
        let mut store = ChatHistoryStore::open(blocker.join("chat_store.json")).unwrap();
        assert!(store.replace("default", exchange("q", "a")).is_err());
        assert!(store.messages("default").is_empty());
    }
}
