//! Pseudo-relevance-feedback query expansion.
//!
//! Treats the top-K first-pass results as relevant, extracts candidate
//! terms with TF-IDF over that small corpus, filters out noise, and
//! interpolates the survivors with the original query (RM3 approximated
//! by concatenation with an ordering rule based on `original_weight`).
//!
//! Expansion never fails the caller: any internal error is recorded in
//! the result's reasoning and the original query is echoed back.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{ExpansionTerm, PrfResult, SearchResult, TermSource};
use crate::query::tfidf::TfIdfCorpus;

/// Tuning knobs for PRF expansion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrfConfig {
    pub enabled: bool,
    /// Pseudo-relevant documents taken from the first pass (5-10 works well).
    pub top_k: usize,
    /// Expansion terms appended to the query (5-10 works well).
    pub expansion_terms: usize,
    /// Minimum cumulative occurrences for a candidate term.
    pub min_term_freq: usize,
    /// Interpolation weight of the original query (0.6-0.8 works well).
    pub original_weight: f64,
    /// Split identifiers (camelCase, snake_case, digit boundaries) before
    /// tokenizing.
    pub code_tokens: bool,
    pub min_term_length: usize,
    pub stop_words: HashSet<String>,
}

impl Default for PrfConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            top_k: 7,
            expansion_terms: 8,
            min_term_freq: 2,
            original_weight: 0.7,
            code_tokens: true,
            min_term_length: 3,
            stop_words: default_stop_words(),
        }
    }
}

fn default_stop_words() -> HashSet<String> {
    [
        // English
        "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have",
        "in", "is", "it", "its", "not", "of", "on", "or", "that", "the", "this", "to", "was",
        "were", "will", "with", "you", "your",
        // Code keywords that carry no retrieval signal
        "const", "let", "var", "function", "return", "if", "else", "while", "true", "false",
        "null", "undefined", "new", "public", "private", "static", "void", "int", "string",
        "bool", "class", "def", "import", "export", "use", "pub", "mod", "impl", "self",
        "type", "fn",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Running counters, exposed through [`PrfEngine::stats`].
#[derive(Debug, Clone, Default)]
struct PrfCounters {
    total_queries: u64,
    total_processing_time_ms: u64,
    successful_expansions: u64,
}

/// Aggregate statistics view.
#[derive(Debug, Clone, Serialize)]
pub struct PrfStats {
    pub total_queries: u64,
    pub avg_processing_time: f64,
    pub success_rate: f64,
}

/// Candidate term accumulator across documents.
struct TermScore {
    max_tf_idf: f64,
    frequency: usize,
    document_count: usize,
}

pub struct PrfEngine {
    config: PrfConfig,
    counters: Mutex<PrfCounters>,
    camel_re: Regex,
    separator_re: Regex,
    alpha_digit_re: Regex,
    digit_alpha_re: Regex,
    non_word_re: Regex,
    whitespace_re: Regex,
    noise_res: Vec<Regex>,
}

impl PrfEngine {
    pub fn new(config: PrfConfig) -> Self {
        Self {
            config,
            counters: Mutex::new(PrfCounters::default()),
            camel_re: Regex::new(r"([a-z])([A-Z])").expect("static regex"),
            separator_re: Regex::new(r"[_\-]+").expect("static regex"),
            alpha_digit_re: Regex::new(r"([A-Za-z])([0-9])").expect("static regex"),
            digit_alpha_re: Regex::new(r"([0-9])([A-Za-z])").expect("static regex"),
            non_word_re: Regex::new(r"[^\w\s]").expect("static regex"),
            whitespace_re: Regex::new(r"\s+").expect("static regex"),
            noise_res: [r"^[a-z]$", r"^\d+[a-z]?$", r"^x{2,}$", r"^[xyz]\d*$"]
                .iter()
                .map(|p| Regex::new(p).expect("static regex"))
                .collect(),
        }
    }

    pub fn config(&self) -> &PrfConfig {
        &self.config
    }

    /// Expand `original_query` using the first-pass `results`. Internal
    /// failures degrade to an echo of the original query; only an empty
    /// query is an error.
    pub fn expand(&self, original_query: &str, results: &[SearchResult]) -> Result<PrfResult> {
        if original_query.trim().is_empty() {
            return Err(Error::InvalidArgument("PRF query is empty".to_string()));
        }

        let started = Instant::now();
        let mut result = match self.try_expand(original_query, results) {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!("PRF expansion failed, echoing original query: {e}");
                PrfResult {
                    original_query: original_query.to_string(),
                    expanded_query: original_query.to_string(),
                    expansion_terms: Vec::new(),
                    documents_analyzed: 0,
                    reasoning: vec![format!("Expansion failed: {e}")],
                    processing_time_ms: 0,
                }
            }
        };
        result.processing_time_ms = started.elapsed().as_millis() as u64;

        let mut counters = self.counters.lock();
        counters.total_queries += 1;
        counters.total_processing_time_ms += result.processing_time_ms;
        if result.expanded_query != result.original_query {
            counters.successful_expansions += 1;
        }

        Ok(result)
    }

    fn try_expand(&self, original_query: &str, results: &[SearchResult]) -> Result<PrfResult> {
        if results.is_empty() {
            return Ok(echo(
                original_query,
                0,
                vec!["No search results provided".to_string()],
            ));
        }

        let required = self.config.top_k.min(3);
        if results.len() < required {
            return Ok(echo(
                original_query,
                0,
                vec![format!(
                    "Insufficient documents: {} < {} required",
                    results.len(),
                    required
                )],
            ));
        }

        let pseudo_relevant: Vec<&SearchResult> =
            results.iter().take(self.config.top_k).collect();
        let documents_analyzed = pseudo_relevant.len();

        let docs: Vec<Vec<String>> = pseudo_relevant
            .iter()
            .map(|r| self.tokenize(&r.content))
            .collect();

        let candidates = self.score_candidates(&docs);
        let mut terms = self.filter_candidates(original_query, candidates);
        terms.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        terms.truncate(self.config.expansion_terms);

        let expanded_query = self.interpolate(original_query, &terms);

        let mut reasoning = vec![format!(
            "Analyzed {documents_analyzed} pseudo-relevant documents"
        )];
        reasoning.push(format!("Extracted {} expansion terms", terms.len()));
        if !terms.is_empty() {
            let top: Vec<&str> = terms.iter().take(3).map(|t| t.term.as_str()).collect();
            let avg = terms.iter().map(|t| t.score).sum::<f64>() / terms.len() as f64;
            reasoning.push(format!("Top terms: {}", top.join(", ")));
            reasoning.push(format!("Average term score: {avg:.4}"));
        }
        if self.config.code_tokens {
            reasoning.push("Code-aware tokenization enabled".to_string());
        }

        Ok(PrfResult {
            original_query: original_query.to_string(),
            expanded_query,
            expansion_terms: terms,
            documents_analyzed,
            reasoning,
            processing_time_ms: 0,
        })
    }

    /// Split identifiers when `code_tokens` is on, then strip non-word
    /// characters, collapse whitespace, and lowercase.
    fn tokenize(&self, content: &str) -> Vec<String> {
        let mut text = content.to_string();
        if self.config.code_tokens {
            text = self.camel_re.replace_all(&text, "$1 $2").into_owned();
            text = self.separator_re.replace_all(&text, " ").into_owned();
            text = self.alpha_digit_re.replace_all(&text, "$1 $2").into_owned();
            text = self.digit_alpha_re.replace_all(&text, "$1 $2").into_owned();
        }
        let text = self.non_word_re.replace_all(&text, " ");
        let text = self.whitespace_re.replace_all(&text, " ");
        text.trim()
            .to_lowercase()
            .split_whitespace()
            .map(|t| t.to_string())
            .collect()
    }

    /// Score every unique token of every document, tracking the maximum
    /// tf-idf across documents, the cumulative occurrence count, and the
    /// number of documents containing the token.
    fn score_candidates(&self, docs: &[Vec<String>]) -> HashMap<String, TermScore> {
        let corpus = TfIdfCorpus::new(docs);
        let mut scores: HashMap<String, TermScore> = HashMap::new();

        for doc in docs {
            let mut doc_counts: HashMap<&str, usize> = HashMap::new();
            for token in doc {
                *doc_counts.entry(token.as_str()).or_insert(0) += 1;
            }

            for (token, count) in doc_counts {
                let tf_idf = corpus.tf_idf(token, doc);
                let entry = scores.entry(token.to_string()).or_insert(TermScore {
                    max_tf_idf: 0.0,
                    frequency: 0,
                    document_count: 0,
                });
                entry.max_tf_idf = entry.max_tf_idf.max(tf_idf);
                entry.frequency += count;
                entry.document_count += 1;
            }
        }

        scores
    }

    fn filter_candidates(
        &self,
        original_query: &str,
        candidates: HashMap<String, TermScore>,
    ) -> Vec<ExpansionTerm> {
        let original_lower = original_query.to_lowercase();

        candidates
            .into_iter()
            .filter(|(term, score)| {
                term.chars().count() >= self.config.min_term_length
                    && score.frequency >= self.config.min_term_freq
                    && !self.config.stop_words.contains(term.as_str())
                    && !original_lower.contains(term.as_str())
                    && !term.chars().all(|c| c.is_ascii_digit())
                    && term.chars().next().is_some_and(|c| c.is_alphabetic())
                    && !self.noise_res.iter().any(|re| re.is_match(term))
            })
            .map(|(term, score)| ExpansionTerm {
                term,
                score: score.max_tf_idf,
                frequency: score.frequency,
                document_count: score.document_count,
                source: TermSource::Tfidf,
            })
            .collect()
    }

    /// Concatenate per the interpolation weight: expansion terms lead only
    /// when they carry the majority of the weight.
    fn interpolate(&self, original_query: &str, terms: &[ExpansionTerm]) -> String {
        if terms.is_empty() {
            return original_query.to_string();
        }
        let joined: Vec<&str> = terms.iter().map(|t| t.term.as_str()).collect();
        let joined = joined.join(" ");
        if 1.0 - self.config.original_weight > 0.5 {
            format!("{joined} {original_query}")
        } else {
            format!("{original_query} {joined}")
        }
    }

    pub fn stats(&self) -> PrfStats {
        let counters = self.counters.lock();
        let total = counters.total_queries;
        PrfStats {
            total_queries: total,
            avg_processing_time: if total > 0 {
                counters.total_processing_time_ms as f64 / total as f64
            } else {
                0.0
            },
            success_rate: if total > 0 {
                counters.successful_expansions as f64 / total as f64
            } else {
                0.0
            },
        }
    }

    pub fn reset_stats(&self) {
        *self.counters.lock() = PrfCounters::default();
    }
}

fn echo(original_query: &str, documents_analyzed: usize, reasoning: Vec<String>) -> PrfResult {
    PrfResult {
        original_query: original_query.to_string(),
        expanded_query: original_query.to_string(),
        expansion_terms: Vec::new(),
        documents_analyzed,
        reasoning,
        processing_time_ms: 0,
    }
}
