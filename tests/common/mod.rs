//! In-process stand-ins for the model services, plus workspace helpers.

#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;

use knowledge_chat::config::Config;
use knowledge_chat_core::embedding::Embedder;
use knowledge_chat_core::error::ServiceError;
use knowledge_chat_core::generation::Generator;
use knowledge_chat_core::models::{Message, Role};
use knowledge_chat_core::prompt::NO_CONTEXT_NOTE;

pub const DIMS: usize = 64;

/// Bag-of-words embedder: each lowercase word is hashed (FNV-1a) into one
/// of [`DIMS`] buckets. Texts sharing words end up close together.
pub struct HashEmbedder {
    model: String,
    pub calls: AtomicUsize,
}

impl HashEmbedder {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; DIMS];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 2)
        {
            let mut h: u32 = 0x811c_9dc5;
            for b in word.to_lowercase().bytes() {
                h ^= b as u32;
                h = h.wrapping_mul(0x0100_0193);
            }
            v[(h as usize) % DIMS] += 1.0;
        }
        v
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> Option<usize> {
        Some(DIMS)
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }
}

/// Answers by repeating the context block it was given, so tests can see
/// exactly what retrieval fed the model.
pub struct EchoGenerator;

pub const NO_CONTEXT_ANSWER: &str = "I could not find anything about that in the knowledge base.";

#[async_trait]
impl Generator for EchoGenerator {
    fn model_name(&self) -> &str {
        "echo"
    }

    async fn complete(&self, messages: &[Message]) -> Result<String, ServiceError> {
        let system = messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        if system.contains(NO_CONTEXT_NOTE) {
            return Ok(NO_CONTEXT_ANSWER.to_string());
        }
        let context = system
            .split("---------------------")
            .nth(1)
            .unwrap_or_default()
            .trim();
        Ok(format!("Based on the knowledge base: {}", context))
    }
}

/// Always reports the generation service as unreachable.
pub struct FailingGenerator;

#[async_trait]
impl Generator for FailingGenerator {
    fn model_name(&self) -> &str {
        "down"
    }

    async fn complete(&self, _messages: &[Message]) -> Result<String, ServiceError> {
        Err(ServiceError::Unavailable {
            service: "generation".into(),
            reason: "connection refused".into(),
        })
    }
}

pub fn embedder(model: &str) -> Arc<dyn Embedder> {
    Arc::new(HashEmbedder::new(model))
}

pub fn echo() -> Arc<dyn Generator> {
    Arc::new(EchoGenerator)
}

/// A scratch workspace: `knowledge/` for the corpus, `storage/` for state.
pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new(files: &[(&str, &str)]) -> Self {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("knowledge")).unwrap();
        let ws = Self { dir };
        for (name, body) in files {
            ws.write(name, body);
        }
        ws
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, name: &str, body: &str) {
        let path = self.root().join("knowledge").join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    pub fn remove(&self, name: &str) {
        fs::remove_file(self.root().join("knowledge").join(name)).unwrap();
    }

    pub fn config(&self) -> Config {
        let mut config = Config::default();
        config.knowledge.root = self.root().join("knowledge");
        config.storage.index_dir = self.root().join("storage/index");
        config.storage.history_path = self.root().join("storage/chat/chat_store.json");
        config
    }

    pub fn history_path(&self) -> std::path::PathBuf {
        self.root().join("storage/chat/chat_store.json")
    }

    pub fn index_dir(&self) -> std::path::PathBuf {
        self.root().join("storage/index")
    }
}
