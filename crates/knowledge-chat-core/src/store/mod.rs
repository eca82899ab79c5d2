//! Vector store abstraction.
//!
//! The [`VectorStore`] trait is what retrieval runs against. The only
//! backend today is [`memory::InMemoryStore`], which the app crate
//! serializes to JSON files; the trait keeps retrieval independent of that
//! choice.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Chunk, Document};

/// A chunk returned from similarity search.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkHit {
    pub chunk_id: String,
    pub document_id: String,
    /// `source_id` of the parent document (the file path).
    pub source_id: String,
    pub chunk_index: i64,
    /// Cosine similarity in `[-1.0, 1.0]`.
    pub score: f32,
    pub text: String,
}

/// Storage for embedded chunks with top-k cosine search.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert_document`](VectorStore::insert_document) | Add a document with its chunks and their vectors |
/// | [`search`](VectorStore::search) | Top-k chunks by cosine similarity |
/// | [`document_count`](VectorStore::document_count) | Number of stored documents |
/// | [`chunk_count`](VectorStore::chunk_count) | Number of stored chunks |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Add a document. `vectors[i]` belongs to `chunks[i]`.
    async fn insert_document(
        &self,
        doc: &Document,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
    ) -> Result<()>;

    /// Return at most `limit` chunks, most similar first.
    async fn search(&self, query_vec: &[f32], limit: usize) -> Result<Vec<ChunkHit>>;

    async fn document_count(&self) -> Result<usize>;

    async fn chunk_count(&self) -> Result<usize>;
}
