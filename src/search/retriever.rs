//! The retrieval orchestrator.
//!
//! Pipeline per query: preprocess → select variants → hybrid (or dense)
//! search per variant → client-side fusion across variants → optional
//! cross-encoder re-rank → results. `search_with_prf` wraps the whole
//! flow in a two-pass pseudo-relevance-feedback loop.
//!
//! Degradation rules: a reranker failure falls back to the fused list, a
//! PRF failure falls back to the first-pass results, and a non-primary
//! variant failure only loses that variant's contribution.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::index::indexer::Indexer;
use crate::models::{PreprocessingResult, SearchResult};
use crate::provider::{
    EmbeddingProvider, HybridOptions, HybridQueryData, HybridSubRequest, Reranker, SearchOptions,
    StoreSearchResult, VectorStore,
};
use crate::query::preprocess::{select_best_variant, select_variants, QueryPreprocessor};
use crate::query::prf::PrfEngine;

/// RRF parameter the store uses to fuse the dense and sparse sub-requests
/// of one hybrid call.
const STORE_RRF_K: u32 = 100;

/// RRF parameter for client-side fusion across query variants.
const VARIANT_RRF_K: f32 = 60.0;

/// Weight of the primary variant in cross-variant fusion.
const PRIMARY_VARIANT_WEIGHT: f32 = 2.0;

/// Variants issued in multi-query mode.
const MAX_QUERY_VARIANTS: usize = 3;

pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    reranker: Option<Arc<dyn Reranker>>,
    reranker_init: OnceCell<bool>,
    preprocessor: QueryPreprocessor,
    prf: PrfEngine,
    config: Config,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        config: Config,
    ) -> Self {
        let preprocessor = QueryPreprocessor::new(config.preprocess.clone());
        let prf = PrfEngine::new(config.prf.clone());
        Self {
            embedder,
            store,
            reranker: None,
            reranker_init: OnceCell::new(),
            preprocessor,
            prf,
            config,
        }
    }

    /// Attach a cross-encoder reranker. It is initialized lazily before
    /// its first use; concurrent callers wait on the same initialization.
    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub fn prf_engine(&self) -> &PrfEngine {
        &self.prf
    }

    /// Search an indexed codebase.
    pub async fn search(
        &self,
        codebase_path: &Path,
        query: &str,
        top_k: usize,
        threshold: f32,
        filter_expr: Option<&str>,
    ) -> Result<Vec<SearchResult>> {
        if query.trim().is_empty() {
            return Err(Error::InvalidArgument("query is empty".to_string()));
        }

        let collection = Indexer::collection_name(codebase_path, self.config.hybrid_mode);
        if !self.store.has_collection(&collection).await? {
            return Err(Error::NotIndexed(
                codebase_path.to_string_lossy().to_string(),
            ));
        }

        let preprocessed = self.preprocessor.preprocess(query);
        let variants = self.choose_variants(&preprocessed);
        let primary = variants[0].clone();
        tracing::debug!("query variants: {variants:?}");

        let reranking = self.reranker_active();
        let fetch_limit = if reranking {
            (top_k * 2).min(50)
        } else {
            top_k
        };

        // Fan out one search per variant; the primary carries double
        // weight in fusion and its failure is fatal, the others degrade.
        let mut ranked_lists: Vec<(Vec<StoreSearchResult>, f32)> = Vec::new();
        for (i, variant) in variants.iter().enumerate() {
            let weight = if i == 0 { PRIMARY_VARIANT_WEIGHT } else { 1.0 };
            match self
                .search_variant(&collection, variant, fetch_limit, threshold, filter_expr)
                .await
            {
                Ok(results) => ranked_lists.push((results, weight)),
                Err(e) if i == 0 => return Err(e),
                Err(e) => tracing::warn!("variant search failed for {variant:?}: {e}"),
            }
        }

        let fused = if ranked_lists.len() == 1 {
            ranked_lists.remove(0).0
        } else {
            fuse_ranked_lists(ranked_lists, fetch_limit)
        };

        let final_results = if reranking && !fused.is_empty() {
            self.rerank_results(&primary, fused, top_k).await
        } else {
            let mut fused = fused;
            fused.truncate(top_k);
            fused
        };

        Ok(final_results.into_iter().map(into_search_result).collect())
    }

    /// PRF-enhanced search: widen the first pass, expand the query from
    /// its results, re-search, and merge (expansion pass first). Any PRF
    /// failure silently falls back to the first-pass results.
    pub async fn search_with_prf(
        &self,
        codebase_path: &Path,
        query: &str,
        top_k: usize,
        threshold: f32,
        filter_expr: Option<&str>,
    ) -> Result<Vec<SearchResult>> {
        if !self.config.prf.enabled {
            return self
                .search(codebase_path, query, top_k, threshold, filter_expr)
                .await;
        }

        let first_pass_k = top_k.saturating_mul(2).max(12);
        let first_pass_threshold = 0.8 * threshold;
        let mut first_pass = self
            .search(codebase_path, query, first_pass_k, first_pass_threshold, filter_expr)
            .await?;

        if first_pass.is_empty() {
            return Ok(Vec::new());
        }

        let expansion = match self.prf.expand(query, &first_pass) {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!("PRF expansion failed, using first-pass results: {e}");
                first_pass.truncate(top_k);
                return Ok(first_pass);
            }
        };

        if expansion.expanded_query == expansion.original_query {
            first_pass.truncate(top_k);
            return Ok(first_pass);
        }
        tracing::debug!("PRF expanded query: {:?}", expansion.expanded_query);

        let second_pass = match self
            .search(codebase_path, &expansion.expanded_query, top_k, threshold, filter_expr)
            .await
        {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!("expansion-pass search failed, using first pass: {e}");
                first_pass.truncate(top_k);
                return Ok(first_pass);
            }
        };

        let mut merged = Vec::with_capacity(top_k);
        let mut seen: HashSet<(String, usize, usize)> = HashSet::new();
        for result in second_pass.into_iter().chain(first_pass.into_iter()) {
            let key = (
                result.relative_path.clone(),
                result.start_line,
                result.end_line,
            );
            if seen.insert(key) {
                merged.push(result);
            }
            if merged.len() >= top_k {
                break;
            }
        }
        Ok(merged)
    }

    /// Multi-query mode requires at least two variants and a detected
    /// pattern; otherwise a single selected variant is issued.
    fn choose_variants(&self, preprocessed: &PreprocessingResult) -> Vec<String> {
        let multi_query = preprocessed.expanded_terms.len() >= 2
            && !preprocessed.detected_patterns.is_empty();
        if multi_query {
            select_variants(preprocessed, MAX_QUERY_VARIANTS)
        } else {
            vec![select_best_variant(preprocessed)]
        }
    }

    fn reranker_active(&self) -> bool {
        self.config.reranker_enabled
            && self.reranker.as_ref().is_some_and(|r| r.is_enabled())
    }

    /// One store round-trip for one query variant.
    async fn search_variant(
        &self,
        collection: &str,
        variant: &str,
        limit: usize,
        threshold: f32,
        filter_expr: Option<&str>,
    ) -> Result<Vec<StoreSearchResult>> {
        let embedding = self.embedder.embed(variant).await?;

        if self.config.hybrid_mode {
            let requests = vec![
                HybridSubRequest {
                    data: HybridQueryData::Dense(embedding.vector),
                    anns_field: "vector".to_string(),
                    limit,
                },
                HybridSubRequest {
                    data: HybridQueryData::Text(variant.to_string()),
                    anns_field: "sparse_vector".to_string(),
                    limit,
                },
            ];
            self.store
                .hybrid_search(
                    collection,
                    requests,
                    HybridOptions {
                        rrf_k: STORE_RRF_K,
                        limit,
                        filter_expr: filter_expr.map(String::from),
                    },
                )
                .await
        } else {
            self.store
                .search(
                    collection,
                    embedding.vector,
                    SearchOptions {
                        top_k: limit,
                        threshold,
                        filter_expr: filter_expr.map(String::from),
                    },
                )
                .await
        }
    }

    /// Cross-encoder re-rank with lazy one-shot initialization. Any
    /// failure returns the fused list unchanged (truncated).
    async fn rerank_results(
        &self,
        query: &str,
        mut fused: Vec<StoreSearchResult>,
        top_k: usize,
    ) -> Vec<StoreSearchResult> {
        let Some(reranker) = self.reranker.clone() else {
            fused.truncate(top_k);
            return fused;
        };

        let initialized = *self
            .reranker_init
            .get_or_init(|| async {
                match reranker.initialize().await {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!("reranker initialization failed: {e}");
                        false
                    }
                }
            })
            .await;
        if !initialized {
            fused.truncate(top_k);
            return fused;
        }

        let documents: Vec<String> = fused.iter().map(|r| r.content.clone()).collect();
        match reranker.rerank(query, &documents, top_k).await {
            Ok(ranked) => {
                let mut reranked = Vec::with_capacity(top_k.min(ranked.len()));
                for item in ranked.into_iter().take(top_k) {
                    if let Some(result) = fused.get(item.index) {
                        let mut result = result.clone();
                        result.score = item.score;
                        reranked.push(result);
                    }
                }
                reranked
            }
            Err(e) => {
                tracing::warn!("re-ranking failed, returning fused order: {e}");
                fused.truncate(top_k);
                fused
            }
        }
    }
}

/// Reciprocal-rank fusion across per-variant ranked lists, deduplicated
/// by chunk identity. The reported score of a fused entry is its summed
/// weighted RRF contribution.
fn fuse_ranked_lists(
    ranked_lists: Vec<(Vec<StoreSearchResult>, f32)>,
    limit: usize,
) -> Vec<StoreSearchResult> {
    type Key = (String, usize, usize);
    let mut fused: HashMap<Key, StoreSearchResult> = HashMap::new();

    for (results, weight) in ranked_lists {
        for (rank, result) in results.into_iter().enumerate() {
            let rrf = weight * (1.0 / (VARIANT_RRF_K + rank as f32 + 1.0));
            let key = (
                result.relative_path.clone(),
                result.start_line,
                result.end_line,
            );
            fused
                .entry(key)
                .and_modify(|existing| existing.score += rrf)
                .or_insert_with(|| {
                    let mut result = result;
                    result.score = rrf;
                    result
                });
        }
    }

    let mut merged: Vec<StoreSearchResult> = fused.into_values().collect();
    merged.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    merged.truncate(limit);
    merged
}

fn into_search_result(result: StoreSearchResult) -> SearchResult {
    SearchResult {
        content: result.content,
        relative_path: result.relative_path,
        start_line: result.start_line,
        end_line: result.end_line,
        language: result.language,
        score: result.score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(path: &str, start: usize, score: f32) -> StoreSearchResult {
        StoreSearchResult {
            id: format!("{path}:{start}"),
            content: format!("content of {path}:{start}"),
            relative_path: path.to_string(),
            start_line: start,
            end_line: start + 5,
            language: "rust".to_string(),
            score,
        }
    }

    // ── cross-variant fusion ─────────────────────────────

    #[test]
    fn test_fusion_sums_weighted_contributions() {
        let primary = vec![hit("a.rs", 1, 0.9), hit("b.rs", 1, 0.8)];
        let secondary = vec![hit("b.rs", 1, 0.7), hit("c.rs", 1, 0.6)];

        let fused = fuse_ranked_lists(vec![(primary, 2.0), (secondary, 1.0)], 10);

        // b.rs appears in both lists and accumulates both contributions
        let b = fused.iter().find(|r| r.relative_path == "b.rs").unwrap();
        let expected = 2.0 * (1.0 / 62.0) + 1.0 / 61.0;
        assert!((b.score - expected).abs() < 1e-6);

        // a.rs leads on primary weight alone
        assert_eq!(fused[0].relative_path, "a.rs");
    }

    #[test]
    fn test_fusion_dedups_by_chunk_identity() {
        let list_a = vec![hit("a.rs", 1, 0.9)];
        let list_b = vec![hit("a.rs", 1, 0.5)];
        let fused = fuse_ranked_lists(vec![(list_a, 1.0), (list_b, 1.0)], 10);
        assert_eq!(fused.len(), 1);
    }

    #[test]
    fn test_fusion_distinguishes_line_ranges() {
        let list_a = vec![hit("a.rs", 1, 0.9)];
        let list_b = vec![hit("a.rs", 50, 0.8)];
        let fused = fuse_ranked_lists(vec![(list_a, 1.0), (list_b, 1.0)], 10);
        assert_eq!(fused.len(), 2);
    }

    #[test]
    fn test_fusion_respects_limit() {
        let list: Vec<StoreSearchResult> = (0..20).map(|i| hit("a.rs", i * 10 + 1, 0.5)).collect();
        let fused = fuse_ranked_lists(vec![(list, 1.0)], 5);
        assert_eq!(fused.len(), 5);
    }

    #[test]
    fn test_fusion_ranks_by_rank_not_raw_score() {
        // The second list's raw scores are higher, but rank decides
        let list_a = vec![hit("first.rs", 1, 0.1), hit("second.rs", 1, 0.05)];
        let fused = fuse_ranked_lists(vec![(list_a, 1.0)], 10);
        assert_eq!(fused[0].relative_path, "first.rs");
        assert!(fused[0].score > fused[1].score);
    }
}
