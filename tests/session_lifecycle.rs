//! End-to-end behaviour of the session manager against in-process fakes.

mod common;

use std::fs;
use std::sync::Arc;

use common::{echo, embedder, FailingGenerator, Workspace, NO_CONTEXT_ANSWER};
use knowledge_chat::history::ChatHistoryStore;
use knowledge_chat::index::{inspect, PersistedState, DOCSTORE_FILE, INDEX_STORE_FILE};
use knowledge_chat::{RelearnOptions, SessionError, SessionManager, SessionState};
use knowledge_chat_core::models::Role;

const CONTACT: &str = "For tree planting, contact the Parks Department.";
const QUESTION: &str = "I want to plant a tree. Who should I contact?";

async fn start(ws: &Workspace) -> SessionManager {
    SessionManager::start(&ws.config(), embedder("hash-a"), echo())
        .await
        .unwrap()
}

#[tokio::test]
async fn parks_department_scenario() {
    let ws = Workspace::new(&[("contact.md", CONTACT)]);
    let mut manager = start(&ws).await;
    assert_eq!(manager.state(), SessionState::Ready);

    let resp = manager.chat(QUESTION).await.unwrap();
    assert!(resp.error.is_none());
    assert!(resp.response.contains("Parks Department"));
    assert_eq!(resp.citations.len(), 1);
    assert_eq!(resp.citations[0].file_path, "contact.md");
    assert!(resp.citations[0].score > 0.0);
    assert_eq!(resp.citations[0].excerpt, CONTACT);
}

#[tokio::test]
async fn index_round_trip_cites_the_same_files() {
    let ws = Workspace::new(&[
        ("contact.md", CONTACT),
        ("onsen.md", "The hot spring baths open at dawn and close at midnight."),
        ("space.md", "Ask the observatory staff about telescope nights."),
    ]);

    let first = {
        let mut manager = start(&ws).await;
        manager.chat(QUESTION).await.unwrap()
    };
    assert_eq!(inspect(&ws.index_dir()), PersistedState::Complete);
    let manifest_before = fs::read_to_string(ws.index_dir().join(INDEX_STORE_FILE)).unwrap();

    let mut reloaded = start(&ws).await;
    let second = reloaded.chat(QUESTION).await.unwrap();

    let paths = |r: &knowledge_chat_core::models::ChatResponse| -> Vec<String> {
        r.citations.iter().map(|c| c.file_path.clone()).collect()
    };
    assert_eq!(paths(&first), paths(&second));
    assert_eq!(
        manifest_before,
        fs::read_to_string(ws.index_dir().join(INDEX_STORE_FILE)).unwrap(),
        "loading must not rewrite the index"
    );
}

#[tokio::test]
async fn successful_ask_adds_exactly_two_messages() {
    let ws = Workspace::new(&[("contact.md", CONTACT)]);
    let mut manager = start(&ws).await;

    manager.ask(QUESTION).await.unwrap();
    let before = manager.get_history().unwrap().len();
    let answer = manager.ask("And what about planting a second tree?").await.unwrap();
    assert!(!answer.is_empty());

    let history = manager.get_history().unwrap();
    assert_eq!(history.len(), before + 2);
    assert_eq!(history[before].role, Role::User);
    assert_eq!(history[before + 1].role, Role::Assistant);
    assert_eq!(history[before + 1].content, answer);
}

#[tokio::test]
async fn history_survives_restart() {
    let ws = Workspace::new(&[("contact.md", CONTACT)]);
    {
        let mut manager = start(&ws).await;
        manager.ask(QUESTION).await.unwrap();
    }
    assert!(ws.history_path().exists());
    let manager = start(&ws).await;
    assert_eq!(manager.get_history().unwrap().len(), 2);
}

#[tokio::test]
async fn reset_twice_leaves_empty_history() {
    let ws = Workspace::new(&[("contact.md", CONTACT)]);
    let mut manager = start(&ws).await;
    manager.ask(QUESTION).await.unwrap();

    manager.remove_chat_history().unwrap();
    manager.remove_chat_history().unwrap();
    assert!(manager.get_history().unwrap().is_empty());
    assert!(!ws.history_path().exists());
    // The index is untouched.
    assert_eq!(inspect(&ws.index_dir()), PersistedState::Complete);
}

#[tokio::test]
async fn no_retrievable_context_still_answers() {
    let ws = Workspace::new(&[("contact.md", CONTACT)]);
    let mut config = ws.config();
    config.retrieval.similarity_cutoff = Some(0.99);
    let mut manager = SessionManager::start(&config, embedder("hash-a"), echo())
        .await
        .unwrap();

    let resp = manager.chat("Quantum chromodynamics lecture schedule").await.unwrap();
    assert!(resp.error.is_none());
    assert!(resp.citations.is_empty());
    assert_eq!(resp.response, NO_CONTEXT_ANSWER);
    assert_eq!(manager.get_history().unwrap().len(), 2);
}

#[tokio::test]
async fn unavailable_generation_is_reported_not_recorded() {
    let ws = Workspace::new(&[("contact.md", CONTACT)]);
    let mut manager =
        SessionManager::start(&ws.config(), embedder("hash-a"), Arc::new(FailingGenerator))
            .await
            .unwrap();

    let resp = manager.chat(QUESTION).await.unwrap();
    assert!(!resp.response.is_empty());
    assert!(resp.citations.is_empty());
    assert_eq!(resp.error.as_ref().unwrap().kind, "unavailable");
    assert!(manager.get_history().unwrap().is_empty());
    assert!(!ws.history_path().exists());
}

#[tokio::test]
async fn relearn_never_cites_removed_documents() {
    let ws = Workspace::new(&[
        ("contact.md", CONTACT),
        ("old-contact.md", "For tree planting, contact the retired Forestry Office."),
    ]);
    let mut manager = start(&ws).await;
    let before = manager.chat(QUESTION).await.unwrap();
    assert!(before.citations.iter().any(|c| c.file_path == "old-contact.md"));

    ws.remove("old-contact.md");
    let snapshot = manager
        .relearn_knowledge(RelearnOptions::default())
        .await
        .unwrap();
    assert_eq!(snapshot.manifest().document_count, 1);
    assert_eq!(manager.state(), SessionState::Ready);

    let after = manager.chat(QUESTION).await.unwrap();
    assert!(!after.citations.is_empty());
    assert!(after.citations.iter().all(|c| c.file_path != "old-contact.md"));
}

#[tokio::test]
async fn relearn_keeps_history_unless_asked() {
    let ws = Workspace::new(&[("contact.md", CONTACT)]);
    let mut manager = start(&ws).await;
    manager.ask(QUESTION).await.unwrap();

    manager
        .relearn_knowledge(RelearnOptions {
            clear_history: false,
        })
        .await
        .unwrap();
    assert_eq!(manager.get_history().unwrap().len(), 2);

    manager
        .relearn_knowledge(RelearnOptions {
            clear_history: true,
        })
        .await
        .unwrap();
    assert!(manager.get_history().unwrap().is_empty());
    assert!(!ws.history_path().exists());
}

#[tokio::test]
async fn relearn_that_cannot_clear_history_keeps_it() {
    let ws = Workspace::new(&[("contact.md", CONTACT)]);
    let mut manager = start(&ws).await;
    manager.ask(QUESTION).await.unwrap();

    // A directory where the history file should be cannot be removed as a file.
    fs::remove_file(ws.history_path()).unwrap();
    fs::create_dir(ws.history_path()).unwrap();

    let err = manager
        .relearn_knowledge(RelearnOptions {
            clear_history: true,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Filesystem { .. }));
    assert_eq!(manager.state(), SessionState::Ready);
    assert!(manager.snapshot().is_some());
    assert_eq!(manager.get_history().unwrap().len(), 2);
}

#[tokio::test]
async fn index_dir_overlapping_corpus_is_refused() {
    let ws = Workspace::new(&[("contact.md", CONTACT)]);
    let mut config = ws.config();
    config.storage.index_dir = ws.root().join("knowledge");
    let err = SessionManager::start(&config, embedder("hash-a"), echo())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, SessionError::Config(_)));
    assert!(ws.root().join("knowledge/contact.md").exists());
}

#[tokio::test]
async fn failed_relearn_leaves_manager_uninitialized() {
    let ws = Workspace::new(&[("contact.md", CONTACT)]);
    let mut manager = start(&ws).await;
    manager.ask(QUESTION).await.unwrap();

    ws.remove("contact.md");
    let err = manager
        .relearn_knowledge(RelearnOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::CorpusEmpty { .. }));
    assert_eq!(manager.state(), SessionState::Uninitialized);
    assert!(manager.snapshot().is_none());
    assert!(matches!(
        manager.chat(QUESTION).await,
        Err(SessionError::NotReady)
    ));
    // History is still readable.
    assert_eq!(manager.get_history().unwrap().len(), 2);

    ws.write("contact.md", CONTACT);
    manager
        .relearn_knowledge(RelearnOptions::default())
        .await
        .unwrap();
    assert_eq!(manager.state(), SessionState::Ready);
    assert_eq!(manager.get_history().unwrap().len(), 2);
}

#[tokio::test]
async fn empty_corpus_fails_without_writing() {
    let ws = Workspace::new(&[("blank.md", "\n\n   \n")]);
    let err = SessionManager::start(&ws.config(), embedder("hash-a"), echo())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, SessionError::CorpusEmpty { .. }));
    assert!(!ws.index_dir().exists());
}

#[tokio::test]
async fn missing_corpus_is_reported() {
    let ws = Workspace::new(&[]);
    fs::remove_dir(ws.root().join("knowledge")).unwrap();
    let err = SessionManager::start(&ws.config(), embedder("hash-a"), echo())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, SessionError::CorpusMissing { .. }));
}

#[tokio::test]
async fn partial_or_garbage_index_is_corrupt() {
    let ws = Workspace::new(&[("contact.md", CONTACT)]);
    drop(start(&ws).await);

    fs::remove_file(ws.index_dir().join(DOCSTORE_FILE)).unwrap();
    let err = SessionManager::start(&ws.config(), embedder("hash-a"), echo())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, SessionError::CorruptPersistedState { .. }));

    fs::write(ws.index_dir().join(DOCSTORE_FILE), "]]garbage[[").unwrap();
    let err = SessionManager::start(&ws.config(), embedder("hash-a"), echo())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, SessionError::CorruptPersistedState { .. }));
}

#[tokio::test]
async fn different_embedding_model_is_refused() {
    let ws = Workspace::new(&[("contact.md", CONTACT)]);
    drop(start(&ws).await);

    let err = SessionManager::start(&ws.config(), embedder("hash-b"), echo())
        .await
        .err()
        .unwrap();
    match err {
        SessionError::EmbeddingModelMismatch {
            persisted,
            configured,
        } => {
            assert_eq!(persisted, "hash-a");
            assert_eq!(configured, "hash-b");
        }
        other => panic!("expected EmbeddingModelMismatch, got {:?}", other),
    }
}

#[tokio::test]
async fn sessions_keep_separate_transcripts() {
    let ws = Workspace::new(&[("contact.md", CONTACT)]);
    let mut manager = start(&ws).await;

    manager.chat_in("alice", QUESTION).await.unwrap();
    manager.chat_in("alice", "Anything else?").await.unwrap();
    manager.chat_in("bob", QUESTION).await.unwrap();

    assert_eq!(manager.history_of("alice").unwrap().len(), 4);
    assert_eq!(manager.history_of("bob").unwrap().len(), 2);
    assert!(manager.get_history().unwrap().is_empty());

    manager.reset_session("alice").unwrap();
    assert!(manager.history_of("alice").unwrap().is_empty());
    assert_eq!(manager.history_of("bob").unwrap().len(), 2);

    let stored = ChatHistoryStore::open(ws.history_path()).unwrap();
    assert_eq!(stored.keys(), vec!["bob"]);
}

#[tokio::test]
async fn blank_question_is_rejected_without_side_effects() {
    let ws = Workspace::new(&[("contact.md", CONTACT)]);
    let mut manager = start(&ws).await;
    let resp = manager.chat("   ").await.unwrap();
    assert_eq!(resp.error.unwrap().kind, "empty_question");
    assert!(manager.get_history().unwrap().is_empty());
}
