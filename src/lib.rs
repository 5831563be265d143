//! # quarry
//!
//! A code-aware semantic search core: it ingests a source tree, decomposes
//! each file into syntax-respecting chunks, embeds those chunks into dense
//! vectors, and serves retrieval queries that combine dense and sparse
//! signals with optional re-ranking and pseudo-relevance-feedback (PRF)
//! query expansion.
//!
//! ## Architecture
//!
//! Indexing pipeline:
//!
//! ```text
//!   ┌──────────┐   ┌───────────────┐   ┌──────────┐   ┌───────────────┐
//!   │ tree walk │──▶│ AST chunker   │──▶│ embedding │──▶│ vector store  │
//!   │ + ignores │   │ (ts fallback) │   │ cache     │   │ insert (batch)│
//!   └──────────┘   └───────────────┘   └──────────┘   └───────────────┘
//!         ▲ incremental deltas via content-hash snapshot
//! ```
//!
//! Query pipeline:
//!
//! ```text
//!   query ──▶ preprocessor ──▶ variant selection ──▶ hybrid search (RRF)
//!                                                        │
//!                                   optional cross-encoder rerank
//!                                                        │
//!                        optional PRF: expand from first-pass results,
//!                        re-search, merge + dedup ──▶ ranked results
//! ```
//!
//! The embedding provider, vector store, and reranker are external
//! collaborators behind the traits in [`provider`]; the crate owns the
//! pipeline, not the backends.
//!
//! ## Module Overview
//!
//! - [`config`] - Environment-based configuration with defaults
//! - [`models`] - Shared data types: `CodeChunk`, `VectorDocument`,
//!   `SearchResult`, `PrfResult`, ...
//! - [`error`] - Typed error kinds and the crate `Result` alias
//! - [`provider`] - Trait seams for embedder, store, and reranker
//! - [`chunking`] - AST-aware chunking with a character-based fallback
//! - [`cache`] - Content-addressed SQLite embedding cache
//! - [`query`] - Query preprocessing, TF-IDF, and PRF expansion
//! - [`index`] - Ignore rules, change snapshots, and the indexing pipeline
//! - [`search`] - The retrieval orchestrator

pub mod cache;
pub mod chunking;
pub mod config;
pub mod error;
pub mod index;
pub mod models;
pub mod provider;
pub mod query;
pub mod search;

pub use config::Config;
pub use error::{Error, Result};
