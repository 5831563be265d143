use serde::{Deserialize, Serialize};

use crate::query::preprocess::PreprocessConfig;
use crate::query::prf::PrfConfig;

/// Top-level configuration for the retrieval core, sourced from the
/// environment with sensible defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Use hybrid (dense + sparse) collections and search.
    pub hybrid_mode: bool,
    /// Number of chunks embedded and inserted per batch.
    pub embedding_batch_size: usize,
    /// Maximum chunk content length in characters.
    pub chunk_size: usize,
    /// Characters of trailing context prepended to each following chunk.
    pub chunk_overlap: usize,
    /// Hard ceiling on chunks per indexing invocation.
    pub chunk_limit: usize,
    /// Extra file extensions to index (dot-prefixed).
    pub custom_extensions: Vec<String>,
    /// Extra ignore patterns merged into the effective set.
    pub custom_ignore_patterns: Vec<String>,
    /// Embedding cache behaviour.
    pub cache: CacheConfig,
    /// Pseudo-relevance-feedback parameters.
    pub prf: PrfConfig,
    /// Query preprocessing stage toggles.
    pub preprocess: PreprocessConfig,
    /// Enable the cross-encoder reranker when one is wired in.
    pub reranker_enabled: bool,
}

/// Embedding-cache eviction knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub max_age_days: u64,
    pub max_size_mb: u64,
    pub cleanup_interval_hours: u64,
    pub cleanup_enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_age_days: 7,
            max_size_mb: 500,
            cleanup_interval_hours: 24,
            cleanup_enabled: true,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hybrid_mode: true,
            embedding_batch_size: 100,
            chunk_size: 2500,
            chunk_overlap: 0,
            chunk_limit: 450_000,
            custom_extensions: Vec::new(),
            custom_ignore_patterns: Vec::new(),
            cache: CacheConfig::default(),
            prf: PrfConfig::default(),
            preprocess: PreprocessConfig::default(),
            reranker_enabled: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("HYBRID_MODE") {
            config.hybrid_mode = parse_bool(&val, config.hybrid_mode);
        }
        if let Ok(val) = std::env::var("EMBEDDING_BATCH_SIZE") {
            if let Ok(v) = val.parse() {
                config.embedding_batch_size = v;
            }
        }
        if let Ok(val) = std::env::var("CHUNK_SIZE") {
            if let Ok(v) = val.parse() {
                config.chunk_size = v;
            }
        }
        if let Ok(val) = std::env::var("CHUNK_OVERLAP") {
            if let Ok(v) = val.parse() {
                config.chunk_overlap = v;
            }
        }
        if let Ok(val) = std::env::var("CHUNK_LIMIT") {
            if let Ok(v) = val.parse() {
                config.chunk_limit = v;
            }
        }
        if let Ok(val) = std::env::var("CUSTOM_EXTENSIONS") {
            config.custom_extensions = parse_extensions(&val);
        }
        if let Ok(val) = std::env::var("CUSTOM_IGNORE_PATTERNS") {
            config.custom_ignore_patterns = parse_list(&val);
        }

        // Cache eviction
        if let Ok(val) = std::env::var("CACHE_MAX_AGE_DAYS") {
            if let Ok(v) = val.parse() {
                config.cache.max_age_days = v;
            }
        }
        if let Ok(val) = std::env::var("CACHE_MAX_SIZE_MB") {
            if let Ok(v) = val.parse() {
                config.cache.max_size_mb = v;
            }
        }
        if let Ok(val) = std::env::var("CACHE_CLEANUP_INTERVAL_HOURS") {
            if let Ok(v) = val.parse() {
                config.cache.cleanup_interval_hours = v;
            }
        }
        if let Ok(val) = std::env::var("CACHE_CLEANUP_ENABLED") {
            config.cache.cleanup_enabled = parse_bool(&val, config.cache.cleanup_enabled);
        }

        // PRF
        if let Ok(val) = std::env::var("PRF_ENABLED") {
            config.prf.enabled = parse_bool(&val, config.prf.enabled);
        }
        if let Ok(val) = std::env::var("PRF_TOP_K") {
            if let Ok(v) = val.parse() {
                config.prf.top_k = v;
            }
        }
        if let Ok(val) = std::env::var("PRF_EXPANSION_TERMS") {
            if let Ok(v) = val.parse() {
                config.prf.expansion_terms = v;
            }
        }
        if let Ok(val) = std::env::var("PRF_MIN_TERM_FREQ") {
            if let Ok(v) = val.parse() {
                config.prf.min_term_freq = v;
            }
        }
        if let Ok(val) = std::env::var("PRF_ORIGINAL_WEIGHT") {
            if let Ok(v) = val.parse() {
                config.prf.original_weight = v;
            }
        }
        if let Ok(val) = std::env::var("PRF_CODE_TOKENS") {
            config.prf.code_tokens = parse_bool(&val, config.prf.code_tokens);
        }
        if let Ok(val) = std::env::var("PRF_MIN_TERM_LENGTH") {
            if let Ok(v) = val.parse() {
                config.prf.min_term_length = v;
            }
        }

        if let Ok(val) = std::env::var("RERANKER_ENABLED") {
            config.reranker_enabled = parse_bool(&val, config.reranker_enabled);
        }

        config
    }
}

fn parse_bool(val: &str, default: bool) -> bool {
    match val.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

fn parse_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse comma-separated extensions, forcing a leading dot and dropping
/// duplicates.
fn parse_extensions(val: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    parse_list(val)
        .into_iter()
        .map(|ext| {
            if ext.starts_with('.') {
                ext
            } else {
                format!(".{ext}")
            }
        })
        .filter(|ext| seen.insert(ext.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.hybrid_mode);
        assert_eq!(config.embedding_batch_size, 100);
        assert_eq!(config.chunk_size, 2500);
        assert_eq!(config.chunk_overlap, 0);
        assert_eq!(config.chunk_limit, 450_000);
        assert_eq!(config.cache.max_age_days, 7);
        assert_eq!(config.cache.max_size_mb, 500);
        assert_eq!(config.cache.cleanup_interval_hours, 24);
        assert!(config.cache.cleanup_enabled);
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("true", false));
        assert!(parse_bool("1", false));
        assert!(parse_bool("YES", false));
        assert!(!parse_bool("false", true));
        assert!(!parse_bool("0", true));
        assert!(parse_bool("garbage", true));
        assert!(!parse_bool("garbage", false));
    }

    #[test]
    fn test_parse_extensions_adds_dot() {
        let exts = parse_extensions("vue, svelte,.zig");
        assert_eq!(exts, vec![".vue", ".svelte", ".zig"]);
    }

    #[test]
    fn test_parse_extensions_dedup() {
        let exts = parse_extensions("vue,.vue,vue");
        assert_eq!(exts, vec![".vue"]);
    }

    #[test]
    fn test_parse_list_skips_empty() {
        let patterns = parse_list("*.log, ,temp/");
        assert_eq!(patterns, vec!["*.log", "temp/"]);
    }
}
