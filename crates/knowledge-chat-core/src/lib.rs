//! # knowledge-chat core
//!
//! Shared logic for knowledge-chat: data models, chunking, the embedding and
//! generation service traits, the vector store abstraction, top-k retrieval,
//! and chat prompt composition.
//!
//! This crate contains no tokio, HTTP, or filesystem I/O. Concrete service
//! clients and persistence live in the `knowledge-chat` app crate.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod models;
pub mod prompt;
pub mod retrieval;
pub mod store;
