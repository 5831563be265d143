//! Trait seams for the external collaborators: the embedding provider,
//! the vector store, and the optional cross-encoder reranker.
//!
//! The core never talks to a concrete backend; everything flows through
//! these object-safe traits so that stores (Milvus-style hybrid indexes,
//! in-memory fakes for tests) and embedding services can be swapped
//! without touching the pipeline.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::models::VectorDocument;

/// A dense embedding with its dimension.
#[derive(Debug, Clone)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub dimension: usize,
}

/// Options for a plain dense search.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub top_k: usize,
    pub threshold: f32,
    pub filter_expr: Option<String>,
}

/// One sub-request of a hybrid search: dense against `vector`, or sparse
/// (lexical) against `sparse_vector` with the raw query text as data.
#[derive(Debug, Clone)]
pub struct HybridSubRequest {
    pub data: HybridQueryData,
    pub anns_field: String,
    pub limit: usize,
}

#[derive(Debug, Clone)]
pub enum HybridQueryData {
    Dense(Vec<f32>),
    Text(String),
}

/// Fusion and limit options for a hybrid search. The store fuses the
/// sub-request rankings with reciprocal-rank fusion.
#[derive(Debug, Clone)]
pub struct HybridOptions {
    /// RRF tuning parameter.
    pub rrf_k: u32,
    pub limit: usize,
    pub filter_expr: Option<String>,
}

/// A raw result row coming back from the store.
#[derive(Debug, Clone)]
pub struct StoreSearchResult {
    pub id: String,
    pub content: String,
    pub relative_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub language: String,
    pub score: f32,
}

/// Embedding service contract.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Embedding>;

    /// Embed a batch of texts; the output is parallel to the input.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Probe the provider for its output dimension.
    async fn detect_dimension(&self) -> Result<usize>;

    /// Provider name, for logging.
    fn provider_name(&self) -> &str;
}

/// Vector store contract. Hybrid collections additionally maintain a
/// sparse lexical index built by the store itself from `content`.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn has_collection(&self, name: &str) -> Result<bool>;

    async fn create_collection(&self, name: &str, dimension: usize, description: &str)
        -> Result<()>;

    async fn create_hybrid_collection(
        &self,
        name: &str,
        dimension: usize,
        description: &str,
    ) -> Result<()>;

    async fn drop_collection(&self, name: &str) -> Result<()>;

    async fn insert(&self, name: &str, documents: Vec<VectorDocument>) -> Result<()>;

    /// Same payload shape as [`VectorStore::insert`]; the store derives the
    /// sparse representation from each document's `content`.
    async fn insert_hybrid(&self, name: &str, documents: Vec<VectorDocument>) -> Result<()>;

    async fn search(
        &self,
        name: &str,
        vector: Vec<f32>,
        options: SearchOptions,
    ) -> Result<Vec<StoreSearchResult>>;

    async fn hybrid_search(
        &self,
        name: &str,
        requests: Vec<HybridSubRequest>,
        options: HybridOptions,
    ) -> Result<Vec<StoreSearchResult>>;

    /// Query rows by filter expression, returning the requested output
    /// fields as JSON objects.
    async fn query(
        &self,
        name: &str,
        filter_expr: &str,
        output_fields: &[&str],
        limit: Option<usize>,
    ) -> Result<Vec<serde_json::Map<String, Value>>>;

    async fn delete(&self, name: &str, ids: &[String]) -> Result<()>;
}

/// A reranked document with its relevance score.
#[derive(Debug, Clone)]
pub struct RerankedResult {
    /// Index into the documents array passed to `rerank`.
    pub index: usize,
    pub score: f32,
}

/// Cross-encoder reranker contract.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Load the model. Idempotent; called lazily before the first rerank.
    async fn initialize(&self) -> Result<()>;

    /// Score documents against the query, best first.
    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_k: usize,
    ) -> Result<Vec<RerankedResult>>;

    fn is_enabled(&self) -> bool;
}
