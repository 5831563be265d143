use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A contiguous region of a source file, produced by the chunker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeChunk {
    pub content: String,
    /// 1-based start line in the original file.
    pub start_line: usize,
    /// 1-based end line in the original file.
    pub end_line: usize,
    pub language: String,
    pub file_path: String,
}

/// A document as persisted in the vector store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorDocument {
    /// Stable id derived from (relative_path, start_line, end_line, content).
    pub id: String,
    pub content: String,
    pub vector: Vec<f32>,
    pub relative_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub file_extension: String,
    pub metadata: DocumentMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub language: String,
    pub codebase_path: String,
    pub chunk_index: usize,
}

/// Deterministic document identity: an unchanged chunk re-indexes to the
/// same id.
pub fn document_id(relative_path: &str, start_line: usize, end_line: usize, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(relative_path.as_bytes());
    hasher.update(b":");
    hasher.update(start_line.to_string().as_bytes());
    hasher.update(b":");
    hasher.update(end_line.to_string().as_bytes());
    hasher.update(b":");
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..32].to_string()
}

/// A single retrieval result returned to callers. Higher score is better.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub content: String,
    pub relative_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub language: String,
    pub score: f32,
}

/// Output of the query preprocessor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessingResult {
    pub original_query: String,
    pub normalized_query: String,
    /// Deduplicated query variants in insertion order; the first entry is
    /// always the normalized query itself.
    pub expanded_terms: Vec<String>,
    /// Tagged patterns of the form `filename:<path>` or `language:<tag>`.
    pub detected_patterns: Vec<String>,
    pub reasoning: Vec<String>,
}

/// Where an expansion term came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TermSource {
    Tfidf,
    Frequency,
    Context,
}

/// A candidate expansion term extracted from pseudo-relevant documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpansionTerm {
    pub term: String,
    pub score: f64,
    pub frequency: usize,
    pub document_count: usize,
    pub source: TermSource,
}

/// Output of a pseudo-relevance-feedback expansion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrfResult {
    pub original_query: String,
    pub expanded_query: String,
    pub expansion_terms: Vec<ExpansionTerm>,
    pub documents_analyzed: usize,
    pub reasoning: Vec<String>,
    pub processing_time_ms: u64,
}

/// Terminal status of one indexing invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStatus {
    Completed,
    LimitReached,
}

/// Summary returned by the indexer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexReport {
    pub indexed_files: usize,
    pub total_chunks: usize,
    pub status: IndexStatus,
}

/// Progress callback payload during indexing.
#[derive(Debug, Clone)]
pub struct IndexProgress {
    pub phase: String,
    pub current: usize,
    pub total: usize,
    pub percentage: u8,
}

/// File-level delta computed by the snapshot synchronizer.
#[derive(Debug, Clone, Default)]
pub struct FileChanges {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub modified: Vec<String>,
}

impl FileChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    pub fn total(&self) -> usize {
        self.added.len() + self.removed.len() + self.modified.len()
    }
}

/// Persisted per-codebase snapshot: relative path -> content hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodebaseSnapshot {
    pub codebase_path: String,
    pub files: std::collections::BTreeMap<String, String>,
    pub last_updated: DateTime<Utc>,
}

impl CodebaseSnapshot {
    pub fn empty(codebase_path: &str) -> Self {
        Self {
            codebase_path: codebase_path.to_string(),
            files: Default::default(),
            last_updated: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_id_is_stable() {
        let a = document_id("src/main.rs", 1, 10, "fn main() {}");
        let b = document_id("src/main.rs", 1, 10, "fn main() {}");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_document_id_changes_with_content() {
        let a = document_id("src/main.rs", 1, 10, "fn main() {}");
        let b = document_id("src/main.rs", 1, 10, "fn main() { run(); }");
        assert_ne!(a, b);
    }

    #[test]
    fn test_document_id_changes_with_location() {
        let a = document_id("src/main.rs", 1, 10, "fn main() {}");
        let b = document_id("src/main.rs", 2, 11, "fn main() {}");
        let c = document_id("src/lib.rs", 1, 10, "fn main() {}");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_index_status_serialization() {
        assert_eq!(
            serde_json::to_string(&IndexStatus::Completed).unwrap(),
            "\"completed\""
        );
        assert_eq!(
            serde_json::to_string(&IndexStatus::LimitReached).unwrap(),
            "\"limit_reached\""
        );
    }

    #[test]
    fn test_file_changes_empty() {
        let changes = FileChanges::default();
        assert!(changes.is_empty());
        assert_eq!(changes.total(), 0);
    }

    #[test]
    fn test_search_result_roundtrip() {
        let result = SearchResult {
            content: "fn parse() {}".to_string(),
            relative_path: "src/parse.rs".to_string(),
            start_line: 3,
            end_line: 3,
            language: "rust".to_string(),
            score: 0.82,
        };
        let json = serde_json::to_string(&result).unwrap();
        let back: SearchResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back.relative_path, "src/parse.rs");
        assert_eq!(back.start_line, 3);
    }

    #[test]
    fn test_snapshot_empty() {
        let snap = CodebaseSnapshot::empty("/tmp/proj");
        assert_eq!(snap.codebase_path, "/tmp/proj");
        assert!(snap.files.is_empty());
    }
}
