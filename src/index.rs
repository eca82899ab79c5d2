//! Index lifecycle: build the vector index from the corpus, or load the one
//! already on disk.
//!
//! # Persisted layout
//!
//! ```text
//! <index_dir>/
//!   docstore.json       documents and their chunks
//!   vector_store.json   chunk id -> embedding
//!   index_store.json    manifest, written last
//! ```
//!
//! The presence of these files decides what [`ensure_index`] does: all
//! three means load, none means build, anything in between is reported as
//! [`SessionError::CorruptPersistedState`] and left for the user to relearn.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use knowledge_chat_core::chunk::chunk_text;
use knowledge_chat_core::embedding::Embedder;
use knowledge_chat_core::models::{Chunk, Document};
use knowledge_chat_core::store::memory::{InMemoryStore, StoreContents};
use knowledge_chat_core::store::VectorStore;

use crate::config::Config;
use crate::corpus::CorpusSource;
use crate::error::{SessionError, SessionResult};
use crate::persist::{read_json, remove_dir_if_exists, write_json_atomic};
use crate::progress::{IndexProgressEvent, IndexProgressReporter};

pub const DOCSTORE_FILE: &str = "docstore.json";
pub const VECTOR_STORE_FILE: &str = "vector_store.json";
pub const INDEX_STORE_FILE: &str = "index_store.json";

const INDEX_FILES: [&str; 3] = [DOCSTORE_FILE, VECTOR_STORE_FILE, INDEX_STORE_FILE];

pub const FORMAT_VERSION: u32 = 1;

/// Contents of `index_store.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub format_version: u32,
    pub embedding_model: String,
    pub dims: usize,
    pub built_at: DateTime<Utc>,
    pub document_count: usize,
    pub chunk_count: usize,
    pub max_tokens: usize,
}

#[derive(Serialize, Deserialize)]
struct DocStoreFile {
    documents: Vec<Document>,
    chunks: Vec<Chunk>,
}

#[derive(Serialize, Deserialize)]
struct VectorStoreFile {
    embeddings: BTreeMap<String, Vec<f32>>,
}

/// Build parameters taken from the config.
#[derive(Debug, Clone, Copy)]
pub struct IndexOptions {
    pub max_tokens: usize,
    pub batch_size: usize,
}

impl IndexOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_tokens: config.chunking.max_tokens,
            batch_size: config.models.batch_size,
        }
    }
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            batch_size: 32,
        }
    }
}

/// What is on disk at an index location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistedState {
    Absent,
    Complete,
    Partial { present: Vec<&'static str> },
}

pub fn inspect(persist_dir: &Path) -> PersistedState {
    let present: Vec<&'static str> = INDEX_FILES
        .iter()
        .copied()
        .filter(|f| persist_dir.join(f).is_file())
        .collect();
    match present.len() {
        0 => PersistedState::Absent,
        n if n == INDEX_FILES.len() => PersistedState::Complete,
        _ => PersistedState::Partial { present },
    }
}

/// A loaded, queryable index plus the embedder that must be used to query it.
pub struct KnowledgeSnapshot {
    persist_dir: PathBuf,
    manifest: IndexManifest,
    store: InMemoryStore,
    embedder: Arc<dyn Embedder>,
}

impl KnowledgeSnapshot {
    pub fn persist_dir(&self) -> &Path {
        &self.persist_dir
    }

    pub fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    pub fn store(&self) -> &InMemoryStore {
        &self.store
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    /// Source paths of every indexed document, sorted.
    pub fn sources(&self) -> SessionResult<Vec<String>> {
        Ok(self.store.source_ids()?)
    }
}

impl std::fmt::Debug for KnowledgeSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeSnapshot")
            .field("persist_dir", &self.persist_dir)
            .field("manifest", &self.manifest)
            .finish()
    }
}

/// Load the index at `persist_dir`, building it from `corpus` first if
/// nothing is there.
pub async fn ensure_index(
    persist_dir: &Path,
    corpus: &CorpusSource,
    embedder: Arc<dyn Embedder>,
    options: IndexOptions,
    progress: &dyn IndexProgressReporter,
) -> SessionResult<KnowledgeSnapshot> {
    match inspect(persist_dir) {
        PersistedState::Complete => load(persist_dir, embedder),
        PersistedState::Absent => build(persist_dir, corpus, embedder, options, progress).await,
        PersistedState::Partial { present } => Err(SessionError::corrupt(
            persist_dir,
            format!(
                "incomplete index (found only {}); run `kchat relearn` to rebuild it",
                present.join(", ")
            ),
        )),
    }
}

/// Delete the index at `persist_dir` and build a new one. There is no undo.
pub async fn rebuild_index(
    persist_dir: &Path,
    corpus: &CorpusSource,
    embedder: Arc<dyn Embedder>,
    options: IndexOptions,
    progress: &dyn IndexProgressReporter,
) -> SessionResult<KnowledgeSnapshot> {
    tracing::info!(dir = %persist_dir.display(), "removing persisted index");
    remove_dir_if_exists(persist_dir)?;
    ensure_index(persist_dir, corpus, embedder, options, progress).await
}

async fn build(
    persist_dir: &Path,
    corpus: &CorpusSource,
    embedder: Arc<dyn Embedder>,
    options: IndexOptions,
    progress: &dyn IndexProgressReporter,
) -> SessionResult<KnowledgeSnapshot> {
    progress.report(IndexProgressEvent::Scanning {
        location: corpus.location().display().to_string(),
    });
    let documents = corpus.scan()?;
    if documents.is_empty() {
        return Err(SessionError::CorpusEmpty {
            root: corpus.location(),
        });
    }

    let chunked: Vec<(Document, Vec<Chunk>)> = documents
        .into_iter()
        .map(|doc| {
            let chunks = chunk_text(&doc.id, &doc.body, options.max_tokens);
            (doc, chunks)
        })
        .filter(|(_, chunks)| !chunks.is_empty())
        .collect();
    let total: usize = chunked.iter().map(|(_, c)| c.len()).sum();
    if total == 0 {
        return Err(SessionError::CorpusEmpty {
            root: corpus.location(),
        });
    }

    tracing::info!(
        documents = chunked.len(),
        chunks = total,
        model = embedder.model_name(),
        "building knowledge index"
    );

    let texts: Vec<String> = chunked
        .iter()
        .flat_map(|(_, chunks)| chunks.iter().map(|c| c.text.clone()))
        .collect();
    let vectors = embed_all(embedder.as_ref(), &texts, options.batch_size, progress).await?;
    let dims = check_dims(embedder.as_ref(), &vectors)?;

    let store = InMemoryStore::new();
    let mut offset = 0;
    for (doc, chunks) in &chunked {
        let end = offset + chunks.len();
        store.insert_document(doc, chunks, &vectors[offset..end]).await?;
        offset = end;
    }

    let manifest = IndexManifest {
        format_version: FORMAT_VERSION,
        embedding_model: embedder.model_name().to_string(),
        dims,
        built_at: Utc::now(),
        document_count: store.document_count().await?,
        chunk_count: store.chunk_count().await?,
        max_tokens: options.max_tokens,
    };

    if let Err(e) = persist(persist_dir, &store, &manifest) {
        // Never leave a partial index behind.
        let _ = remove_dir_if_exists(persist_dir);
        return Err(e);
    }
    progress.report(IndexProgressEvent::Persisted {
        documents: manifest.document_count as u64,
        chunks: manifest.chunk_count as u64,
    });
    tracing::info!(dir = %persist_dir.display(), "knowledge index persisted");

    Ok(KnowledgeSnapshot {
        persist_dir: persist_dir.to_path_buf(),
        manifest,
        store,
        embedder,
    })
}

async fn embed_all(
    embedder: &dyn Embedder,
    texts: &[String],
    batch_size: usize,
    progress: &dyn IndexProgressReporter,
) -> SessionResult<Vec<Vec<f32>>> {
    let total = texts.len() as u64;
    let mut vectors = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size.max(1)) {
        let embedded = embedder.embed(batch).await?;
        if embedded.len() != batch.len() {
            return Err(SessionError::Index(format!(
                "embedding service returned {} vectors for {} texts",
                embedded.len(),
                batch.len()
            )));
        }
        vectors.extend(embedded);
        progress.report(IndexProgressEvent::Embedding {
            n: vectors.len() as u64,
            total,
        });
    }
    Ok(vectors)
}

/// All vectors must share one non-zero width that agrees with the
/// embedder's declared dims, if any.
fn check_dims(embedder: &dyn Embedder, vectors: &[Vec<f32>]) -> SessionResult<usize> {
    let width = vectors.first().map(Vec::len).unwrap_or(0);
    if width == 0 {
        return Err(SessionError::Index("embedding service returned empty vectors".into()));
    }
    if let Some(expected) = embedder.dims() {
        if expected != width {
            return Err(SessionError::Index(format!(
                "embedding model '{}' returned {} dims, configured for {}",
                embedder.model_name(),
                width,
                expected
            )));
        }
    }
    if vectors.iter().any(|v| v.len() != width) {
        return Err(SessionError::Index("embedding vectors have mixed dimensions".into()));
    }
    Ok(width)
}

fn persist(dir: &Path, store: &InMemoryStore, manifest: &IndexManifest) -> SessionResult<()> {
    let contents = store.export()?;
    write_json_atomic(
        &dir.join(DOCSTORE_FILE),
        &DocStoreFile {
            documents: contents.documents,
            chunks: contents.chunks,
        },
    )?;
    write_json_atomic(
        &dir.join(VECTOR_STORE_FILE),
        &VectorStoreFile {
            embeddings: contents.vectors,
        },
    )?;
    write_json_atomic(&dir.join(INDEX_STORE_FILE), manifest)
}

/// Load a complete persisted index, validating it against the embedder.
pub fn load(persist_dir: &Path, embedder: Arc<dyn Embedder>) -> SessionResult<KnowledgeSnapshot> {
    let manifest_path = persist_dir.join(INDEX_STORE_FILE);
    let manifest: IndexManifest = read_json(&manifest_path)?;

    if manifest.format_version != FORMAT_VERSION {
        return Err(SessionError::corrupt(
            &manifest_path,
            format!(
                "unsupported format version {} (expected {})",
                manifest.format_version, FORMAT_VERSION
            ),
        ));
    }
    if manifest.embedding_model != embedder.model_name() {
        return Err(SessionError::EmbeddingModelMismatch {
            persisted: manifest.embedding_model,
            configured: embedder.model_name().to_string(),
        });
    }
    if let Some(dims) = embedder.dims() {
        if dims != manifest.dims {
            return Err(SessionError::EmbeddingModelMismatch {
                persisted: format!("{} ({} dims)", manifest.embedding_model, manifest.dims),
                configured: format!("{} ({} dims)", embedder.model_name(), dims),
            });
        }
    }

    let docstore: DocStoreFile = read_json(&persist_dir.join(DOCSTORE_FILE))?;
    let vectors_path = persist_dir.join(VECTOR_STORE_FILE);
    let vectors: VectorStoreFile = read_json(&vectors_path)?;

    if docstore.documents.len() != manifest.document_count
        || docstore.chunks.len() != manifest.chunk_count
    {
        return Err(SessionError::corrupt(
            persist_dir,
            format!(
                "manifest lists {} documents / {} chunks, docstore holds {} / {}",
                manifest.document_count,
                manifest.chunk_count,
                docstore.documents.len(),
                docstore.chunks.len()
            ),
        ));
    }

    let store = InMemoryStore::import(StoreContents {
        documents: docstore.documents,
        chunks: docstore.chunks,
        vectors: vectors.embeddings,
    })
    .map_err(|e| SessionError::corrupt(&vectors_path, format!("{:#}", e)))?;

    if store.dims().is_some_and(|d| d != manifest.dims) {
        return Err(SessionError::corrupt(
            &vectors_path,
            format!("stored vectors do not have {} dims", manifest.dims),
        ));
    }

    tracing::info!(
        dir = %persist_dir.display(),
        documents = manifest.document_count,
        chunks = manifest.chunk_count,
        "loaded knowledge index"
    );

    Ok(KnowledgeSnapshot {
        persist_dir: persist_dir.to_path_buf(),
        manifest,
        store,
        embedder,
    })
}
