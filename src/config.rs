//! TOML configuration.
//!
//! Every section and field has a default, so an empty file (or no file at
//! all, via [`load_or_default`]) yields a working setup that talks to a
//! local Ollama server and reads `./knowledge/**/*.md`.
//!
//! ```toml
//! [models]
//! provider = "ollama"
//! generation_model = "gemma3:4b"
//! embedding_model = "nomic-embed-text"
//! request_timeout_secs = 120
//!
//! [knowledge]
//! root = "knowledge"
//! include_globs = ["**/*.md"]
//! recursive = true
//!
//! [storage]
//! index_dir = "./storage/index"
//! history_path = "./storage/chat/chat_store.json"
//!
//! [retrieval]
//! top_k = 3
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Component, Path, PathBuf};

use knowledge_chat_core::prompt::DEFAULT_SYSTEM_PROMPT;
use knowledge_chat_core::retrieval::RetrievalParams;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub models: ModelsConfig,
    pub knowledge: KnowledgeConfig,
    pub storage: StorageConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub chat: ChatConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ModelsConfig {
    /// `ollama`, `openai`, or `disabled`.
    pub provider: String,
    /// Base URL of the model server. Defaults per provider.
    pub url: Option<String>,
    pub generation_model: String,
    pub embedding_model: String,
    /// Expected embedding dimensionality; checked against returned vectors.
    pub dims: Option<usize>,
    pub request_timeout_secs: u64,
    /// Texts per embedding request while building the index.
    pub batch_size: usize,
    pub temperature: Option<f32>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            url: None,
            generation_model: "gemma3:4b".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            dims: None,
            request_timeout_secs: 120,
            batch_size: 32,
            temperature: None,
        }
    }
}

impl ModelsConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    /// The configured URL, or the provider's usual address.
    pub fn base_url(&self) -> String {
        let url = match (&self.url, self.provider.as_str()) {
            (Some(url), _) => url.clone(),
            (None, "openai") => "https://api.openai.com".to_string(),
            (None, _) => "http://localhost:11434".to_string(),
        };
        url.trim_end_matches('/').to_string()
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct KnowledgeConfig {
    /// Directory scanned for documents.
    pub root: PathBuf,
    /// Explicit file list. When set, `root` and the globs are ignored.
    pub files: Option<Vec<PathBuf>>,
    pub include_globs: Vec<String>,
    pub exclude_globs: Vec<String>,
    pub recursive: bool,
    pub follow_symlinks: bool,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("knowledge"),
            files: None,
            include_globs: vec!["**/*.md".to_string()],
            exclude_globs: Vec::new(),
            recursive: true,
            follow_symlinks: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub index_dir: PathBuf,
    pub history_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            index_dir: PathBuf::from("./storage/index"),
            history_path: PathBuf::from("./storage/chat/chat_store.json"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChunkingConfig {
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { max_tokens: 512 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub similarity_cutoff: Option<f32>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            similarity_cutoff: None,
        }
    }
}

impl RetrievalConfig {
    pub fn params(&self) -> RetrievalParams {
        RetrievalParams {
            top_k: self.top_k,
            similarity_cutoff: self.similarity_cutoff,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChatConfig {
    /// Conversation key used by the CLI and the default session.
    pub session_key: String,
    /// Prior messages sent with each question.
    pub history_window: usize,
    pub system_prompt: Option<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            session_key: "default".to_string(),
            history_window: 12,
            system_prompt: None,
        }
    }
}

impl ChatConfig {
    pub fn system_prompt(&self) -> &str {
        self.system_prompt.as_deref().unwrap_or(DEFAULT_SYSTEM_PROMPT)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:7340".to_string(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Load `path` if it exists, otherwise fall back to the built-in defaults.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        return load_config(path);
    }
    tracing::debug!(path = %path.display(), "config file not found, using defaults");
    let config = Config::default();
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    match config.models.provider.as_str() {
        "ollama" | "openai" | "disabled" => {}
        other => bail!(
            "Unknown model provider: '{}'. Must be ollama, openai, or disabled.",
            other
        ),
    }
    if config.models.generation_model.trim().is_empty() {
        bail!("models.generation_model must not be empty");
    }
    if config.models.embedding_model.trim().is_empty() {
        bail!("models.embedding_model must not be empty");
    }
    if config.models.request_timeout_secs == 0 {
        bail!("models.request_timeout_secs must be > 0");
    }
    if config.models.batch_size == 0 {
        bail!("models.batch_size must be > 0");
    }
    if config.models.dims == Some(0) {
        bail!("models.dims must be > 0 when set");
    }

    if config.chunking.max_tokens == 0 {
        bail!("chunking.max_tokens must be > 0");
    }

    if config.retrieval.top_k < 1 {
        bail!("retrieval.top_k must be >= 1");
    }
    if let Some(cutoff) = config.retrieval.similarity_cutoff {
        if !(-1.0..=1.0).contains(&cutoff) {
            bail!("retrieval.similarity_cutoff must be in [-1.0, 1.0]");
        }
    }

    if config.chat.session_key.trim().is_empty() {
        bail!("chat.session_key must not be empty");
    }

    if config.knowledge.files.as_ref().is_some_and(|f| f.is_empty()) {
        bail!("knowledge.files must list at least one file when set");
    }

    // Rebuilding the index removes index_dir wholesale.
    let index_dir = normalize(&config.storage.index_dir);
    let history = normalize(&config.storage.history_path);
    if history.starts_with(&index_dir) {
        bail!(
            "storage.history_path ({}) must not be inside storage.index_dir ({})",
            config.storage.history_path.display(),
            config.storage.index_dir.display()
        );
    }
    let corpus: Vec<&PathBuf> = match &config.knowledge.files {
        Some(files) => files.iter().collect(),
        None => vec![&config.knowledge.root],
    };
    for source in corpus {
        let normalized = normalize(source);
        if normalized.starts_with(&index_dir) || index_dir.starts_with(&normalized) {
            bail!(
                "storage.index_dir ({}) must not overlap the knowledge corpus ({})",
                config.storage.index_dir.display(),
                source.display()
            );
        }
    }

    Ok(())
}

/// Lexically normalize a path (drop `.`, resolve `..`) for containment checks.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
