//! The indexing pipeline: walk the tree, chunk each file, embed through
//! the cache, and insert into the vector store in batches.
//!
//! A full index streams every eligible file; an incremental reindex uses
//! the per-codebase snapshot to delete and re-add only what changed.
//! Cancellation lets the in-flight batch complete, schedules no new work,
//! and leaves the snapshot uncommitted.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use md5::{Digest as Md5Digest, Md5};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::cache::EmbeddingCache;
use crate::chunking::Chunker;
use crate::config::Config;
use crate::error::Result;
use crate::index::ignore::{IgnoreCache, IgnoreMatcher};
use crate::index::snapshot::{hash_file, SnapshotSynchronizer};
use crate::models::{
    document_id, CodeChunk, DocumentMetadata, IndexProgress, IndexReport, IndexStatus,
    VectorDocument,
};
use crate::provider::{EmbeddingProvider, VectorStore};

/// Extensions indexed by default.
pub const DEFAULT_EXTENSIONS: &[&str] = &[
    ".ts", ".tsx", ".js", ".jsx", ".py", ".java", ".cpp", ".c", ".h", ".hpp", ".cs", ".go",
    ".rs", ".php", ".rb", ".swift", ".kt", ".scala", ".m", ".mm", ".md", ".markdown", ".ipynb",
];

/// Collection name prefixes per retrieval mode, so hybrid and dense
/// collections for the same codebase coexist without collision.
const HYBRID_PREFIX: &str = "hybrid_code_chunks";
const DENSE_PREFIX: &str = "code_chunks";

/// Portion of the progress range reserved for collection preparation.
const PREPARE_PERCENT: usize = 10;

pub type ProgressFn = dyn Fn(IndexProgress) + Send + Sync;

/// A chunk waiting in the embedding buffer.
struct PendingChunk {
    chunk: CodeChunk,
    chunk_index: usize,
}

pub struct Indexer {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    cache: Arc<EmbeddingCache>,
    chunker: Chunker,
    config: Config,
    ignore_cache: IgnoreCache,
    /// One synchronizer per codebase, reused across incremental runs.
    synchronizers: Mutex<HashMap<PathBuf, SnapshotSynchronizer>>,
}

impl Indexer {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        cache: Arc<EmbeddingCache>,
        config: Config,
    ) -> Self {
        let chunker = Chunker::new(config.chunk_size, config.chunk_overlap);
        Self {
            embedder,
            store,
            cache,
            chunker,
            config,
            ignore_cache: IgnoreCache::new(),
            synchronizers: Mutex::new(HashMap::new()),
        }
    }

    /// Store collection name for a codebase:
    /// `<prefix>_<first 8 hex chars of md5(absolute path)>`.
    pub fn collection_name(codebase_path: &Path, hybrid: bool) -> String {
        let digest = Md5::digest(codebase_path.to_string_lossy().as_bytes());
        let hex: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();
        let prefix = if hybrid { HYBRID_PREFIX } else { DENSE_PREFIX };
        format!("{prefix}_{hex}")
    }

    /// Index a whole codebase. With `force_reindex` the collection is
    /// dropped and recreated first.
    pub async fn index_codebase(
        &self,
        codebase_path: &Path,
        force_reindex: bool,
        progress: Option<&ProgressFn>,
        cancel: &CancellationToken,
    ) -> Result<IndexReport> {
        report(progress, "preparing", 0, 1, 0);

        let collection = Self::collection_name(codebase_path, self.config.hybrid_mode);
        self.prepare_collection(&collection, force_reindex).await?;
        report(progress, "preparing", 1, 1, PREPARE_PERCENT as u8);

        let matcher = self
            .ignore_cache
            .matcher_for(codebase_path, &self.config.custom_ignore_patterns);
        let extensions = self.supported_extensions();
        let files = enumerate_files(codebase_path, &matcher, &extensions);
        tracing::info!(
            "indexing {} files from {}",
            files.len(),
            codebase_path.display()
        );

        let mut sync = self.take_synchronizer(codebase_path);
        if force_reindex {
            if let Err(e) = sync.clear() {
                tracing::warn!("failed to clear snapshot: {e}");
            }
        }

        let outcome = self
            .process_files(codebase_path, &collection, &files, progress, cancel)
            .await?;

        // The snapshot only advances when the whole job succeeded.
        if !outcome.cancelled && outcome.status == IndexStatus::Completed {
            sync.check_for_changes(outcome.hashes.clone());
            if let Err(e) = sync.commit() {
                tracing::warn!("failed to commit snapshot: {e}");
            }
        }
        self.store_synchronizer(codebase_path, sync);

        Ok(IndexReport {
            indexed_files: outcome.indexed_files,
            total_chunks: outcome.total_chunks,
            status: outcome.status,
        })
    }

    /// Incremental reindex: delete documents for removed and modified
    /// files, then run added and modified files through the pipeline.
    pub async fn reindex_changes(
        &self,
        codebase_path: &Path,
        progress: Option<&ProgressFn>,
        cancel: &CancellationToken,
    ) -> Result<IndexReport> {
        let collection = Self::collection_name(codebase_path, self.config.hybrid_mode);
        if !self.store.has_collection(&collection).await? {
            return self
                .index_codebase(codebase_path, false, progress, cancel)
                .await;
        }

        report(progress, "preparing", 0, 1, 0);
        let matcher = self
            .ignore_cache
            .matcher_for(codebase_path, &self.config.custom_ignore_patterns);
        let extensions = self.supported_extensions();
        let files = enumerate_files(codebase_path, &matcher, &extensions);

        let mut current = BTreeMap::new();
        for rel in &files {
            match hash_file(&codebase_path.join(rel)) {
                Ok(hash) => {
                    current.insert(rel.clone(), hash);
                }
                Err(e) => tracing::warn!("skipping unreadable file {rel}: {e}"),
            }
        }

        let mut sync = self.take_synchronizer(codebase_path);
        let changes = sync.check_for_changes(current);
        report(progress, "preparing", 1, 1, PREPARE_PERCENT as u8);

        if changes.is_empty() {
            self.store_synchronizer(codebase_path, sync);
            return Ok(IndexReport {
                indexed_files: 0,
                total_chunks: 0,
                status: IndexStatus::Completed,
            });
        }
        tracing::info!(
            "incremental reindex: {} added, {} removed, {} modified",
            changes.added.len(),
            changes.removed.len(),
            changes.modified.len()
        );

        for rel in changes.removed.iter().chain(changes.modified.iter()) {
            self.delete_file_documents(&collection, rel).await?;
        }

        let mut to_index: Vec<String> = changes.added.clone();
        to_index.extend(changes.modified.iter().cloned());
        to_index.sort();

        let outcome = self
            .process_files(codebase_path, &collection, &to_index, progress, cancel)
            .await?;

        if !outcome.cancelled && outcome.status == IndexStatus::Completed {
            if let Err(e) = sync.commit() {
                tracing::warn!("failed to commit snapshot: {e}");
            }
        }
        self.store_synchronizer(codebase_path, sync);

        Ok(IndexReport {
            indexed_files: outcome.indexed_files,
            total_chunks: outcome.total_chunks,
            status: outcome.status,
        })
    }

    /// Drop both collections for a codebase and reset its snapshot.
    pub async fn clear_index(&self, codebase_path: &Path) -> Result<()> {
        for hybrid in [true, false] {
            let name = Self::collection_name(codebase_path, hybrid);
            if self.store.has_collection(&name).await? {
                self.store.drop_collection(&name).await?;
            }
        }
        let mut sync = self.take_synchronizer(codebase_path);
        sync.clear()?;
        self.store_synchronizer(codebase_path, sync);
        Ok(())
    }

    /// Delete every document whose `relative_path` equals the given path.
    /// Backslashes are doubled so the expression survives the store's
    /// string parsing on any platform.
    pub async fn delete_file_documents(
        &self,
        collection: &str,
        relative_path: &str,
    ) -> Result<usize> {
        let escaped = relative_path.replace('\\', "\\\\");
        let filter = format!("relative_path == \"{escaped}\"");
        let rows = self
            .store
            .query(collection, &filter, &["id"], None)
            .await?;

        let ids: Vec<String> = rows
            .iter()
            .filter_map(|row| row.get("id").and_then(|v| v.as_str()).map(String::from))
            .collect();

        for batch in ids.chunks(100) {
            self.store.delete(collection, batch).await?;
        }
        Ok(ids.len())
    }

    async fn prepare_collection(&self, collection: &str, force_reindex: bool) -> Result<()> {
        let exists = self.store.has_collection(collection).await?;
        if exists && force_reindex {
            self.store.drop_collection(collection).await?;
        }
        if !exists || force_reindex {
            let dimension = self.embedder.detect_dimension().await?;
            let description = "code chunks with syntax-aware boundaries";
            if self.config.hybrid_mode {
                self.store
                    .create_hybrid_collection(collection, dimension, description)
                    .await?;
            } else {
                self.store
                    .create_collection(collection, dimension, description)
                    .await?;
            }
        }
        Ok(())
    }

    /// Stream files through chunking and batched embedding/insertion.
    async fn process_files(
        &self,
        codebase_path: &Path,
        collection: &str,
        files: &[String],
        progress: Option<&ProgressFn>,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutcome> {
        let codebase_str = codebase_path.to_string_lossy().to_string();
        let mut buffer: Vec<PendingChunk> = Vec::new();
        let mut hashes = BTreeMap::new();
        let mut indexed_files = 0usize;
        let mut total_chunks = 0usize;
        let mut status = IndexStatus::Completed;
        let mut cancelled = false;
        let total = files.len().max(1);

        for (i, rel) in files.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::info!("indexing cancelled after {indexed_files} files");
                cancelled = true;
                break;
            }

            let abs = codebase_path.join(rel);
            let content = match std::fs::read_to_string(&abs) {
                Ok(content) => content,
                Err(e) => {
                    tracing::warn!("skipping unreadable file {rel}: {e}");
                    continue;
                }
            };

            match hash_file(&abs) {
                Ok(hash) => {
                    hashes.insert(rel.clone(), hash);
                }
                Err(e) => tracing::warn!("failed to hash {rel}: {e}"),
            }

            let language = language_for_path(rel);
            let chunks = self.chunker.chunk(&content, &language, rel);
            for (chunk_index, chunk) in chunks.into_iter().enumerate() {
                buffer.push(PendingChunk { chunk, chunk_index });
                total_chunks += 1;

                if buffer.len() >= self.config.embedding_batch_size {
                    self.flush_batch(collection, &codebase_str, &mut buffer)
                        .await?;
                }
                if total_chunks >= self.config.chunk_limit {
                    break;
                }
            }

            indexed_files += 1;
            let percentage =
                PREPARE_PERCENT + ((i + 1) * (100 - PREPARE_PERCENT)) / total;
            report(progress, "indexing", i + 1, files.len(), percentage as u8);

            if total_chunks >= self.config.chunk_limit {
                tracing::warn!(
                    "chunk limit of {} reached, stopping cleanly",
                    self.config.chunk_limit
                );
                status = IndexStatus::LimitReached;
                break;
            }
        }

        self.flush_batch(collection, &codebase_str, &mut buffer)
            .await?;

        Ok(ProcessOutcome {
            indexed_files,
            total_chunks,
            status,
            cancelled,
            hashes,
        })
    }

    /// Embed a buffered batch (cache first, provider for misses in one
    /// call, cache write-back in one transaction) and insert the
    /// assembled documents.
    async fn flush_batch(
        &self,
        collection: &str,
        codebase_path: &str,
        buffer: &mut Vec<PendingChunk>,
    ) -> Result<()> {
        if buffer.is_empty() {
            return Ok(());
        }
        let pending = std::mem::take(buffer);

        let hashes: Vec<String> = pending
            .iter()
            .map(|p| EmbeddingCache::content_hash(&p.chunk.content))
            .collect();
        let mut vectors = self.cache.get_many(&hashes);

        let mut miss_hashes: Vec<String> = Vec::new();
        let mut miss_texts: Vec<String> = Vec::new();
        for (pending, hash) in pending.iter().zip(hashes.iter()) {
            if !vectors.contains_key(hash) && !miss_hashes.contains(hash) {
                miss_hashes.push(hash.clone());
                miss_texts.push(pending.chunk.content.clone());
            }
        }

        if !miss_texts.is_empty() {
            tracing::debug!(
                "cache hit {}/{} chunks, embedding {} misses",
                hashes.len() - miss_texts.len(),
                hashes.len(),
                miss_texts.len()
            );
            let embedded = self.embedder.embed_batch(&miss_texts).await?;
            let entries: Vec<(String, Vec<f32>)> = miss_hashes
                .iter()
                .cloned()
                .zip(embedded.iter().cloned())
                .collect();
            self.cache.set_many(&entries);
            for (hash, vector) in entries {
                vectors.insert(hash, vector);
            }
        }

        let documents: Vec<VectorDocument> = pending
            .iter()
            .zip(hashes.iter())
            .filter_map(|(p, hash)| {
                let vector = vectors.get(hash)?.clone();
                let chunk = &p.chunk;
                Some(VectorDocument {
                    id: document_id(
                        &chunk.file_path,
                        chunk.start_line,
                        chunk.end_line,
                        &chunk.content,
                    ),
                    content: chunk.content.clone(),
                    vector,
                    relative_path: chunk.file_path.clone(),
                    start_line: chunk.start_line,
                    end_line: chunk.end_line,
                    file_extension: extension_of(&chunk.file_path),
                    metadata: DocumentMetadata {
                        language: chunk.language.clone(),
                        codebase_path: codebase_path.to_string(),
                        chunk_index: p.chunk_index,
                    },
                })
            })
            .collect();

        if self.config.hybrid_mode {
            self.store.insert_hybrid(collection, documents).await?;
        } else {
            self.store.insert(collection, documents).await?;
        }
        Ok(())
    }

    fn supported_extensions(&self) -> HashSet<String> {
        let mut extensions: HashSet<String> =
            DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect();
        for ext in &self.config.custom_extensions {
            let ext = if ext.starts_with('.') {
                ext.clone()
            } else {
                format!(".{ext}")
            };
            extensions.insert(ext);
        }
        extensions
    }

    fn take_synchronizer(&self, codebase_path: &Path) -> SnapshotSynchronizer {
        if let Some(sync) = self.synchronizers.lock().remove(codebase_path) {
            return sync;
        }
        let mut sync = SnapshotSynchronizer::new(codebase_path);
        if let Err(e) = sync.initialize() {
            tracing::warn!("snapshot initialization failed: {e}");
        }
        sync
    }

    fn store_synchronizer(&self, codebase_path: &Path, sync: SnapshotSynchronizer) {
        self.synchronizers
            .lock()
            .insert(codebase_path.to_path_buf(), sync);
    }
}

struct ProcessOutcome {
    indexed_files: usize,
    total_chunks: usize,
    status: IndexStatus,
    cancelled: bool,
    hashes: BTreeMap<String, String>,
}

fn report(progress: Option<&ProgressFn>, phase: &str, current: usize, total: usize, pct: u8) {
    if let Some(callback) = progress {
        callback(IndexProgress {
            phase: phase.to_string(),
            current,
            total,
            percentage: pct,
        });
    }
}

/// Enumerate indexable files as POSIX-normalised relative paths, pruning
/// ignored directories.
fn enumerate_files(
    root: &Path,
    matcher: &IgnoreMatcher,
    extensions: &HashSet<String>,
) -> Vec<String> {
    let mut files = Vec::new();

    let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
        if entry.depth() == 0 {
            return true;
        }
        let rel = relative_posix(entry.path(), root);
        !matcher.is_ignored(&rel)
    });

    for entry in walker.filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = relative_posix(entry.path(), root);
        if !extensions.contains(&extension_of(&rel)) {
            continue;
        }
        files.push(rel);
    }

    files.sort();
    files
}

fn relative_posix(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Dot-prefixed extension of a relative path, empty when absent.
fn extension_of(relative_path: &str) -> String {
    let name = relative_path.rsplit('/').next().unwrap_or(relative_path);
    match name.rfind('.') {
        Some(idx) if idx > 0 => name[idx..].to_lowercase(),
        _ => String::new(),
    }
}

/// Map a file path to the language tag fed to the chunker.
fn language_for_path(relative_path: &str) -> String {
    match extension_of(relative_path).as_str() {
        ".ts" => "typescript",
        ".tsx" => "tsx",
        ".js" | ".jsx" => "javascript",
        ".py" => "python",
        ".java" => "java",
        ".cpp" | ".hpp" => "cpp",
        ".c" | ".h" => "c",
        ".cs" => "csharp",
        ".go" => "go",
        ".rs" => "rust",
        ".php" => "php",
        ".rb" => "ruby",
        ".swift" => "swift",
        ".kt" => "kotlin",
        ".scala" => "scala",
        ".m" | ".mm" => "objective-c",
        ".md" | ".markdown" => "markdown",
        ".ipynb" => "json",
        _ => "text",
    }
    .to_string()
}
