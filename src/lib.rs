//! # knowledge-chat
//!
//! Ask questions about a local knowledge base, answered by a locally hosted
//! language model with citations back to the source files.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Corpus   │──▶│ Chunk+Embed  │──▶│ Vector index │
//! │ knowledge/│   │  (Ollama)    │   │ storage/index│
//! └───────────┘   └──────────────┘   └──────┬───────┘
//!                                           │ top-k
//!                 ┌──────────────┐   ┌──────▼───────┐
//!                 │ Chat history │◀──│   Session    │──▶ generation model
//!                 │ storage/chat │   │   manager    │
//!                 └──────────────┘   └──────┬───────┘
//!                                    ┌──────┴───────┐
//!                                    ▼              ▼
//!                               CLI (kchat)     HTTP server
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! kchat index                                   # build the index from ./knowledge
//! kchat ask "I want to plant a tree. Who should I contact?"
//! kchat chat                                    # interactive conversation
//! kchat relearn --yes                           # rebuild after editing the corpus
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`corpus`] | Directory / file-list scanning into documents |
//! | [`extract`] | PDF, DOCX, and PPTX text extraction |
//! | [`embedding`] | Embedding service clients |
//! | [`generation`] | Generation service clients |
//! | [`index`] | Build-or-load lifecycle of the persisted vector index |
//! | [`history`] | Persisted chat transcripts keyed by session |
//! | [`session`] | One conversation bound to one knowledge snapshot |
//! | [`manager`] | Public facade: ask, chat, history, reset, relearn |
//! | [`server`] | JSON HTTP server |
//! | [`progress`] | Index build progress on stderr |

pub mod config;
pub mod corpus;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generation;
pub mod history;
mod http;
pub mod index;
pub mod manager;
pub mod persist;
pub mod progress;
pub mod server;
pub mod session;

pub use error::{SessionError, SessionResult};
pub use manager::{RelearnOptions, SessionManager, SessionState};
