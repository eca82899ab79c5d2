//! Top-k retrieval over a [`VectorStore`].
//!
//! The caller embeds the question; this module fetches the `top_k` most
//! similar chunks, drops those under the optional similarity cutoff, and
//! turns the rest into [`Passage`]s (full text for the prompt) that can
//! each produce a [`SourceCitation`] (short excerpt for the user).

use anyhow::Result;

use crate::models::{excerpt, SourceCitation};
use crate::store::{ChunkHit, VectorStore};

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalParams {
    /// Number of chunks to fetch.
    pub top_k: usize,
    /// Hits scoring below this are dropped.
    pub similarity_cutoff: Option<f32>,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            top_k: 3,
            similarity_cutoff: None,
        }
    }
}

/// A retrieved chunk with its full text.
#[derive(Debug, Clone, PartialEq)]
pub struct Passage {
    pub file_path: String,
    pub score: f32,
    pub text: String,
    pub document_id: String,
    pub chunk_id: String,
}

impl Passage {
    pub fn citation(&self) -> SourceCitation {
        SourceCitation {
            file_path: self.file_path.clone(),
            score: self.score,
            excerpt: excerpt(&self.text),
            document_id: self.document_id.clone(),
            chunk_id: self.chunk_id.clone(),
        }
    }
}

impl From<ChunkHit> for Passage {
    fn from(hit: ChunkHit) -> Self {
        Passage {
            file_path: hit.source_id,
            score: hit.score,
            text: hit.text,
            document_id: hit.document_id,
            chunk_id: hit.chunk_id,
        }
    }
}

/// Fetch passages for an embedded query, most similar first.
pub async fn retrieve<S: VectorStore + ?Sized>(
    store: &S,
    query_vec: &[f32],
    params: &RetrievalParams,
) -> Result<Vec<Passage>> {
    if params.top_k == 0 {
        return Ok(Vec::new());
    }

    let hits = store.search(query_vec, params.top_k).await?;
    let passages = hits
        .into_iter()
        .filter(|h| match params.similarity_cutoff {
            Some(cutoff) => h.score >= cutoff,
            None => true,
        })
        .map(Passage::from)
        .collect();
    Ok(passages)
}

/// Citations for a set of passages, preserving their order.
pub fn citations(passages: &[Passage]) -> Vec<SourceCitation> {
    passages.iter().map(Passage::citation).collect()
}
