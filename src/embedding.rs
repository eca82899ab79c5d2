//! Embedding service clients.
//!
//! Implementations of [`Embedder`] for the configured provider:
//! - **[`OllamaEmbedder`]**: `POST {url}/api/embed` on a local Ollama server.
//! - **[`OpenAIEmbedder`]**: `POST {url}/v1/embeddings`, key from `OPENAI_API_KEY`.
//! - **[`DisabledEmbedder`]**: fails every call with [`ServiceError::Disabled`].
//!
//! Use [`create_embedder`] to build one from `[models]`.
//!
//! Responses are checked before they reach the index: one vector per
//! input, and every vector of the configured `dims` when that is set.

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use knowledge_chat_core::embedding::Embedder;
use knowledge_chat_core::error::ServiceError;

use crate::config::ModelsConfig;
use crate::http::JsonClient;

const SERVICE: &str = "embedding";

pub struct OllamaEmbedder {
    http: JsonClient,
    url: String,
    model: String,
    dims: Option<usize>,
}

impl OllamaEmbedder {
    pub fn new(config: &ModelsConfig) -> Result<Self> {
        Ok(Self {
            http: JsonClient::new(SERVICE, config.request_timeout_secs)?,
            url: format!("{}/api/embed", config.base_url()),
            model: config.embedding_model.clone(),
            dims: config.dims,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> Option<usize> {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = json!({ "model": self.model, "input": texts });
        let resp = self.http.post(&self.url, &body).await?;
        let vectors = parse_ollama_response(&resp)?;
        check_vectors(&vectors, texts.len(), self.dims)?;
        Ok(vectors)
    }
}

pub struct OpenAIEmbedder {
    http: JsonClient,
    url: String,
    model: String,
    dims: Option<usize>,
}

impl OpenAIEmbedder {
    /// Fails if `OPENAI_API_KEY` is not set.
    pub fn new(config: &ModelsConfig) -> Result<Self> {
        let key = match std::env::var("OPENAI_API_KEY") {
            Ok(k) if !k.trim().is_empty() => k,
            _ => bail!("OPENAI_API_KEY environment variable not set"),
        };
        Ok(Self {
            http: JsonClient::new(SERVICE, config.request_timeout_secs)?.with_bearer(key),
            url: format!("{}/v1/embeddings", config.base_url()),
            model: config.embedding_model.clone(),
            dims: config.dims,
        })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> Option<usize> {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = json!({ "model": self.model, "input": texts });
        let resp = self.http.post(&self.url, &body).await?;
        let vectors = parse_openai_response(&resp)?;
        check_vectors(&vectors, texts.len(), self.dims)?;
        Ok(vectors)
    }
}

/// Used when `models.provider = "disabled"`.
pub struct DisabledEmbedder {
    model: String,
}

impl DisabledEmbedder {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }
}

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> Option<usize> {
        None
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        Err(ServiceError::Disabled {
            service: SERVICE.to_string(),
        })
    }
}

/// Build the embedder selected by `models.provider`.
///
/// | Provider | Implementation |
/// |----------|----------------|
/// | `"ollama"` | [`OllamaEmbedder`] |
/// | `"openai"` | [`OpenAIEmbedder`] |
/// | `"disabled"` | [`DisabledEmbedder`] |
pub fn create_embedder(config: &ModelsConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        "disabled" => Ok(Arc::new(DisabledEmbedder::new(&config.embedding_model))),
        other => bail!("Unknown model provider: {}", other),
    }
}

fn parse_vector(value: &Value) -> Result<Vec<f32>, ServiceError> {
    let items = value
        .as_array()
        .ok_or_else(|| ServiceError::malformed(SERVICE, "embedding is not an array"))?;
    items
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| ServiceError::malformed(SERVICE, "embedding holds a non-number"))
        })
        .collect()
}

/// `{"embeddings": [[...], ...]}`
pub fn parse_ollama_response(json: &Value) -> Result<Vec<Vec<f32>>, ServiceError> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| ServiceError::malformed(SERVICE, "missing embeddings array"))?
        .iter()
        .map(parse_vector)
        .collect()
}

/// `{"data": [{"index": 0, "embedding": [...]}, ...]}`, reordered by `index`.
pub fn parse_openai_response(json: &Value) -> Result<Vec<Vec<f32>>, ServiceError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| ServiceError::malformed(SERVICE, "missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let embedding = item
            .get("embedding")
            .ok_or_else(|| ServiceError::malformed(SERVICE, "missing embedding"))?;
        indexed.push((index, parse_vector(embedding)?));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

/// Reject responses with the wrong vector count or dimensionality.
pub fn check_vectors(
    vectors: &[Vec<f32>],
    expected: usize,
    dims: Option<usize>,
) -> Result<(), ServiceError> {
    if vectors.len() != expected {
        return Err(ServiceError::malformed(
            SERVICE,
            format!("expected {} vectors, got {}", expected, vectors.len()),
        ));
    }
    let width = match dims.or_else(|| vectors.first().map(Vec::len)) {
        Some(w) => w,
        None => return Ok(()),
    };
    if width == 0 {
        return Err(ServiceError::malformed(SERVICE, "empty embedding vector"));
    }
    if let Some(v) = vectors.iter().find(|v| v.len() != width) {
        return Err(ServiceError::malformed(
            SERVICE,
            format!("vector has {} dims, expected {}", v.len(), width),
        ));
    }
    Ok(())
}
