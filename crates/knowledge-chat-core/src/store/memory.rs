//! In-memory [`VectorStore`] with brute-force cosine search.
//!
//! State sits behind `std::sync::RwLock`. [`InMemoryStore::export`] and
//! [`InMemoryStore::import`] convert to and from a plain
//! [`StoreContents`] value so the app crate can persist it.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{Chunk, Document};

use super::{ChunkHit, VectorStore};

struct StoredChunk {
    chunk: Chunk,
    source_id: String,
    vector: Vec<f32>,
}

#[derive(Default)]
struct Inner {
    docs: BTreeMap<String, Document>,
    chunks: Vec<StoredChunk>,
    dims: Option<usize>,
}

/// Everything the store holds, detached from the lock.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreContents {
    pub documents: Vec<Document>,
    pub chunks: Vec<Chunk>,
    /// Chunk id → vector.
    pub vectors: BTreeMap<String, Vec<f32>>,
}

pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Dimensionality of the stored vectors, once any are stored.
    pub fn dims(&self) -> Option<usize> {
        self.inner.read().ok().and_then(|g| g.dims)
    }

    /// Rebuild a store from persisted contents.
    ///
    /// Fails if a chunk has no vector, a chunk points at an unknown
    /// document, or vector dimensions disagree.
    pub fn import(contents: StoreContents) -> Result<Self> {
        let docs: HashMap<&str, &Document> = contents
            .documents
            .iter()
            .map(|d| (d.id.as_str(), d))
            .collect();

        let mut grouped: BTreeMap<&str, (Vec<Chunk>, Vec<Vec<f32>>)> = BTreeMap::new();
        for chunk in &contents.chunks {
            if !docs.contains_key(chunk.document_id.as_str()) {
                bail!(
                    "chunk {} references unknown document {}",
                    chunk.id,
                    chunk.document_id
                );
            }
            let vector = contents
                .vectors
                .get(&chunk.id)
                .ok_or_else(|| anyhow!("chunk {} has no stored vector", chunk.id))?;
            let entry = grouped.entry(chunk.document_id.as_str()).or_default();
            entry.0.push(chunk.clone());
            entry.1.push(vector.clone());
        }
        if contents.vectors.len() != contents.chunks.len() {
            bail!(
                "{} vectors stored for {} chunks",
                contents.vectors.len(),
                contents.chunks.len()
            );
        }

        let store = Self::new();
        {
            let mut inner = store.write()?;
            for doc in &contents.documents {
                inner.docs.insert(doc.id.clone(), doc.clone());
            }
            for (doc_id, (chunks, vectors)) in grouped {
                let doc = docs[doc_id];
                insert_locked(&mut inner, doc, &chunks, &vectors)?;
            }
        }
        Ok(store)
    }

    /// Snapshot the store contents, documents sorted by id and chunks in
    /// insertion order.
    pub fn export(&self) -> Result<StoreContents> {
        let inner = self.read()?;
        Ok(StoreContents {
            documents: inner.docs.values().cloned().collect(),
            chunks: inner.chunks.iter().map(|sc| sc.chunk.clone()).collect(),
            vectors: inner
                .chunks
                .iter()
                .map(|sc| (sc.chunk.id.clone(), sc.vector.clone()))
                .collect(),
        })
    }

    /// Distinct `source_id`s of stored documents, sorted.
    pub fn source_ids(&self) -> Result<Vec<String>> {
        let inner = self.read()?;
        let mut ids: Vec<String> = inner.docs.values().map(|d| d.source_id.clone()).collect();
        ids.sort();
        Ok(ids)
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| anyhow!("vector store lock poisoned"))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| anyhow!("vector store lock poisoned"))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn insert_locked(
    inner: &mut Inner,
    doc: &Document,
    chunks: &[Chunk],
    vectors: &[Vec<f32>],
) -> Result<()> {
    if chunks.len() != vectors.len() {
        bail!(
            "document {}: {} chunks but {} vectors",
            doc.source_id,
            chunks.len(),
            vectors.len()
        );
    }
    for v in vectors {
        match inner.dims {
            None => inner.dims = Some(v.len()),
            Some(d) if d != v.len() => bail!(
                "document {}: vector has {} dims, store holds {}",
                doc.source_id,
                v.len(),
                d
            ),
            Some(_) => {}
        }
    }

    inner.docs.insert(doc.id.clone(), doc.clone());
    inner.chunks.retain(|sc| sc.chunk.document_id != doc.id);
    for (chunk, vector) in chunks.iter().zip(vectors) {
        inner.chunks.push(StoredChunk {
            chunk: chunk.clone(),
            source_id: doc.source_id.clone(),
            vector: vector.clone(),
        });
    }
    Ok(())
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn insert_document(
        &self,
        doc: &Document,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
    ) -> Result<()> {
        let mut inner = self.write()?;
        insert_locked(&mut inner, doc, chunks, vectors)
    }

    async fn search(&self, query_vec: &[f32], limit: usize) -> Result<Vec<ChunkHit>> {
        let inner = self.read()?;
        if let Some(d) = inner.dims {
            if d != query_vec.len() {
                bail!(
                    "query vector has {} dims, index was built with {}",
                    query_vec.len(),
                    d
                );
            }
        }

        let mut hits: Vec<ChunkHit> = inner
            .chunks
            .iter()
            .map(|sc| ChunkHit {
                chunk_id: sc.chunk.id.clone(),
                document_id: sc.chunk.document_id.clone(),
                source_id: sc.source_id.clone(),
                chunk_index: sc.chunk.chunk_index,
                score: cosine_similarity(query_vec, &sc.vector),
                text: sc.chunk.text.clone(),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.source_id.cmp(&b.source_id))
                .then(a.chunk_index.cmp(&b.chunk_index))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn document_count(&self) -> Result<usize> {
        Ok(self.read()?.docs.len())
    }

    async fn chunk_count(&self) -> Result<usize> {
        Ok(self.read()?.chunks.len())
    }
}
