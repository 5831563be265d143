//! TF-IDF scoring over a small corpus (the pseudo-relevant document set).
//!
//! The `+1` smoothing terms in both formulas are deliberate and matched by
//! test vectors: `tf = occurrences / (doc_len + 1)` and
//! `idf = ln(N / (df + 1)) + 1`. All comparisons are case-insensitive.

use std::collections::{HashMap, HashSet};

/// Document frequencies for one corpus. Rebuilt per query; holds no state
/// between queries.
#[derive(Debug)]
pub struct TfIdfCorpus {
    doc_count: usize,
    doc_freq: HashMap<String, usize>,
}

impl TfIdfCorpus {
    /// Build a corpus from tokenized documents.
    pub fn new(docs: &[Vec<String>]) -> Self {
        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        for doc in docs {
            let unique: HashSet<String> = doc.iter().map(|t| t.to_lowercase()).collect();
            for token in unique {
                *doc_freq.entry(token).or_insert(0) += 1;
            }
        }
        Self {
            doc_count: docs.len(),
            doc_freq,
        }
    }

    /// Term frequency: occurrences / (doc_len + 1).
    pub fn tf(term: &str, doc_tokens: &[String]) -> f64 {
        let term = term.to_lowercase();
        let occurrences = doc_tokens
            .iter()
            .filter(|t| t.to_lowercase() == term)
            .count();
        occurrences as f64 / (doc_tokens.len() + 1) as f64
    }

    /// Inverse document frequency: ln(N / (df + 1)) + 1.
    pub fn idf(&self, term: &str) -> f64 {
        let df = self
            .doc_freq
            .get(&term.to_lowercase())
            .copied()
            .unwrap_or(0);
        (self.doc_count as f64 / (df + 1) as f64).ln() + 1.0
    }

    pub fn tf_idf(&self, term: &str, doc_tokens: &[String]) -> f64 {
        Self::tf(term, doc_tokens) * self.idf(term)
    }

    pub fn doc_count(&self) -> usize {
        self.doc_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(s: &str) -> Vec<String> {
        s.split_whitespace().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_tf_with_smoothing_denominator() {
        let doc = tokens("error error handler");
        // 2 occurrences / (3 tokens + 1)
        assert!((TfIdfCorpus::tf("error", &doc) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_tf_zero_for_absent_term() {
        let doc = tokens("alpha beta");
        assert_eq!(TfIdfCorpus::tf("gamma", &doc), 0.0);
    }

    #[test]
    fn test_tf_case_insensitive() {
        let doc = tokens("Error ERROR error");
        assert!((TfIdfCorpus::tf("error", &doc) - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_idf_known_value() {
        let docs = vec![tokens("error handler"), tokens("parser"), tokens("error")];
        let corpus = TfIdfCorpus::new(&docs);
        // df("error") = 2, N = 3: ln(3/3) + 1 = 1
        assert!((corpus.idf("error") - 1.0).abs() < 1e-12);
        // df("parser") = 1, N = 3: ln(3/2) + 1
        let expected = (3.0f64 / 2.0).ln() + 1.0;
        assert!((corpus.idf("parser") - expected).abs() < 1e-12);
    }

    #[test]
    fn test_idf_unknown_term() {
        let docs = vec![tokens("a b"), tokens("c")];
        let corpus = TfIdfCorpus::new(&docs);
        // df = 0: ln(2/1) + 1
        let expected = 2.0f64.ln() + 1.0;
        assert!((corpus.idf("zzz") - expected).abs() < 1e-12);
    }

    #[test]
    fn test_tf_idf_product() {
        let docs = vec![tokens("retry retry backoff"), tokens("parse")];
        let corpus = TfIdfCorpus::new(&docs);
        let doc = &docs[0];
        let expected = TfIdfCorpus::tf("retry", doc) * corpus.idf("retry");
        assert!((corpus.tf_idf("retry", doc) - expected).abs() < 1e-12);
        assert!(corpus.tf_idf("retry", doc) > 0.0);
    }

    #[test]
    fn test_empty_corpus() {
        let corpus = TfIdfCorpus::new(&[]);
        assert_eq!(corpus.doc_count(), 0);
        // ln(0/1) + 1 would be -inf; nothing sensible to assert beyond no panic
        assert!(corpus.idf("term").is_infinite() || corpus.idf("term") < 1.0);
    }
}
