//! Paragraph-boundary text chunker.
//!
//! Splits a document body into [`Chunk`]s of at most `max_tokens`
//! (approximated as 4 characters per token). Paragraphs (`\n\n`) are packed
//! greedily; a paragraph that is too long on its own is hard-split at the
//! last newline or space before the limit.
//!
//! Chunk ids are UUID v5 values over `document_id` and the chunk index, so
//! rebuilding an unchanged corpus yields the same ids.
//!
//! ```rust
//! use knowledge_chat_core::chunk::chunk_text;
//!
//! let chunks = chunk_text("doc-1", "Hello world.\n\nSecond paragraph.", 512);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].chunk_index, 0);
//! ```

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Chunk;

const CHARS_PER_TOKEN: usize = 4;

/// Split `text` into chunks. Blank text produces no chunks.
pub fn chunk_text(document_id: &str, text: &str, max_tokens: usize) -> Vec<Chunk> {
    let max_chars = (max_tokens * CHARS_PER_TOKEN).max(1);
    let mut pieces: Vec<String> = Vec::new();
    let mut buf = String::new();

    for para in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        if para.len() > max_chars {
            if !buf.is_empty() {
                pieces.push(std::mem::take(&mut buf));
            }
            pieces.extend(hard_split(para, max_chars));
            continue;
        }

        if !buf.is_empty() && buf.len() + 2 + para.len() > max_chars {
            pieces.push(std::mem::take(&mut buf));
        }
        if !buf.is_empty() {
            buf.push_str("\n\n");
        }
        buf.push_str(para);
    }
    if !buf.is_empty() {
        pieces.push(buf);
    }

    pieces
        .into_iter()
        .enumerate()
        .map(|(i, piece)| make_chunk(document_id, i as i64, &piece))
        .collect()
}

/// Split an oversized paragraph at whitespace, never inside a UTF-8 char.
fn hard_split(para: &str, max_chars: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = para;
    while !rest.is_empty() {
        if rest.len() <= max_chars {
            out.push(rest.trim().to_string());
            break;
        }
        let limit = floor_char_boundary(rest, max_chars);
        let cut = rest[..limit]
            .rfind(|c: char| c == '\n' || c == ' ')
            .map(|pos| pos + 1)
            .unwrap_or(limit);
        // A single char wider than the limit still has to make progress.
        let cut = if cut == 0 {
            rest.chars().next().map(char::len_utf8).unwrap_or(rest.len())
        } else {
            cut
        };
        let piece = rest[..cut].trim();
        if !piece.is_empty() {
            out.push(piece.to_string());
        }
        rest = &rest[cut..];
    }
    out
}

fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn make_chunk(document_id: &str, index: i64, text: &str) -> Chunk {
    let hash = format!("{:x}", Sha256::digest(text.as_bytes()));
    let id = Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("{}:{}", document_id, index).as_bytes(),
    );

    Chunk {
        id: id.to_string(),
        document_id: document_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash,
    }
}
