//! Content-addressed persistent cache of embedding vectors.
//!
//! Keyed by the SHA-256 of the trimmed chunk text, so identical chunks in
//! different files share one cached vector. Backed by a single SQLite
//! database per user with WAL journaling (readers concurrent with one
//! writer). The cache is a pure accelerator: if the database cannot be
//! opened every operation becomes a no-op and the pipeline proceeds
//! without it.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};

use crate::config::CacheConfig;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS embeddings (
    content_hash TEXT PRIMARY KEY,
    embedding    BLOB NOT NULL,
    dimension    INTEGER NOT NULL,
    created_at   INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_embeddings_created_at ON embeddings(created_at);
";

/// Fraction of rows removed when the size bound is exceeded.
const SIZE_EVICTION_FRACTION: usize = 10;

/// Aggregate cache statistics.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub total_entries: u64,
    pub size_bytes: u64,
    pub oldest_ts: Option<i64>,
    pub newest_ts: Option<i64>,
}

/// SQLite-backed embedding cache. `None` inside the mutex means the
/// database could not be opened and the cache is operating as a no-op.
pub struct EmbeddingCache {
    conn: Mutex<Option<Connection>>,
    config: CacheConfig,
    last_cleanup: Mutex<i64>,
}

impl EmbeddingCache {
    /// Open (or create) the cache database at the default per-user
    /// location.
    pub fn open_default(config: CacheConfig) -> Self {
        match default_cache_path() {
            Some(path) => Self::open(&path, config),
            None => {
                tracing::warn!("no user cache directory available, embedding cache disabled");
                Self::disabled(config)
            }
        }
    }

    /// Open (or create) the cache database at `path`. Failure to open
    /// degrades to a disabled cache rather than an error.
    pub fn open(path: &Path, config: CacheConfig) -> Self {
        let conn = match open_database(path) {
            Ok(conn) => Some(conn),
            Err(e) => {
                tracing::warn!("embedding cache unavailable ({e}), continuing without cache");
                None
            }
        };

        let cache = Self {
            conn: Mutex::new(conn),
            config,
            last_cleanup: Mutex::new(0),
        };

        if cache.config.cleanup_enabled {
            let removed = cache.cleanup(cache.max_age_secs());
            if removed > 0 {
                tracing::info!("startup cache cleanup removed {removed} entries");
            }
        }

        cache
    }

    /// A cache that ignores all operations.
    pub fn disabled(config: CacheConfig) -> Self {
        Self {
            conn: Mutex::new(None),
            config,
            last_cleanup: Mutex::new(0),
        }
    }

    pub fn is_available(&self) -> bool {
        self.conn.lock().is_some()
    }

    /// SHA-256 of the trimmed content, lowercase hex. The only cache key.
    pub fn content_hash(content: &str) -> String {
        let digest = Sha256::digest(content.trim().as_bytes());
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Look up one vector.
    pub fn get(&self, hash: &str) -> Option<Vec<f32>> {
        let guard = self.conn.lock();
        let conn = guard.as_ref()?;
        conn.query_row(
            "SELECT embedding FROM embeddings WHERE content_hash = ?1",
            params![hash],
            |row| row.get::<_, Vec<u8>>(0),
        )
        .optional()
        .ok()
        .flatten()
        .map(|blob| decode_vector(&blob))
    }

    /// Batch lookup; absent hashes are simply missing from the map.
    pub fn get_many(&self, hashes: &[String]) -> std::collections::HashMap<String, Vec<f32>> {
        let mut found = std::collections::HashMap::new();
        let guard = self.conn.lock();
        let Some(conn) = guard.as_ref() else {
            return found;
        };

        let Ok(mut stmt) =
            conn.prepare("SELECT embedding FROM embeddings WHERE content_hash = ?1")
        else {
            return found;
        };

        for hash in hashes {
            let row = stmt
                .query_row(params![hash], |row| row.get::<_, Vec<u8>>(0))
                .optional();
            if let Ok(Some(blob)) = row {
                found.insert(hash.clone(), decode_vector(&blob));
            }
        }
        found
    }

    /// Upsert one vector.
    pub fn set(&self, hash: &str, vector: &[f32]) {
        let now = epoch_secs();
        {
            let guard = self.conn.lock();
            let Some(conn) = guard.as_ref() else { return };
            let result = conn.execute(
                "INSERT OR REPLACE INTO embeddings (content_hash, embedding, dimension, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![hash, encode_vector(vector), vector.len() as i64, now],
            );
            if let Err(e) = result {
                tracing::warn!("cache set failed: {e}");
            }
        }
        self.maybe_periodic_cleanup();
    }

    /// Upsert a batch in a single transaction.
    pub fn set_many(&self, entries: &[(String, Vec<f32>)]) {
        if entries.is_empty() {
            return;
        }
        let now = epoch_secs();
        {
            let mut guard = self.conn.lock();
            let Some(conn) = guard.as_mut() else { return };

            let result = (|| -> rusqlite::Result<()> {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare(
                        "INSERT OR REPLACE INTO embeddings (content_hash, embedding, dimension, created_at)
                         VALUES (?1, ?2, ?3, ?4)",
                    )?;
                    for (hash, vector) in entries {
                        stmt.execute(params![
                            hash,
                            encode_vector(vector),
                            vector.len() as i64,
                            now
                        ])?;
                    }
                }
                tx.commit()
            })();

            if let Err(e) = result {
                tracing::warn!("cache batch set failed: {e}");
            }
        }
        self.maybe_periodic_cleanup();
    }

    /// Delete rows older than `max_age_secs`; returns the number removed.
    pub fn cleanup(&self, max_age_secs: i64) -> usize {
        let cutoff = epoch_secs() - max_age_secs;
        let removed = {
            let guard = self.conn.lock();
            let Some(conn) = guard.as_ref() else { return 0 };
            conn.execute(
                "DELETE FROM embeddings WHERE created_at < ?1",
                params![cutoff],
            )
            .unwrap_or(0)
        };

        self.evict_by_size();
        *self.last_cleanup.lock() = epoch_secs();
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let guard = self.conn.lock();
        let Some(conn) = guard.as_ref() else {
            return CacheStats::default();
        };

        conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(LENGTH(embedding) + LENGTH(content_hash) + 16), 0),
                    MIN(created_at),
                    MAX(created_at)
             FROM embeddings",
            [],
            |row| {
                Ok(CacheStats {
                    total_entries: row.get::<_, i64>(0)? as u64,
                    size_bytes: row.get::<_, i64>(1)? as u64,
                    oldest_ts: row.get(2)?,
                    newest_ts: row.get(3)?,
                })
            },
        )
        .unwrap_or_default()
    }

    /// Close the database handle. Subsequent operations are no-ops.
    pub fn close(&self) {
        let mut guard = self.conn.lock();
        if let Some(conn) = guard.take() {
            let _ = conn.close();
        }
    }

    fn max_age_secs(&self) -> i64 {
        self.config.max_age_days as i64 * 24 * 3600
    }

    /// Remove the oldest rows when total size exceeds the bound.
    fn evict_by_size(&self) {
        let max_bytes = self.config.max_size_mb * 1024 * 1024;
        let stats = self.stats();
        if stats.size_bytes <= max_bytes || stats.total_entries == 0 {
            return;
        }

        let evict_count = (stats.total_entries as usize / SIZE_EVICTION_FRACTION).max(1);
        let guard = self.conn.lock();
        let Some(conn) = guard.as_ref() else { return };
        let result = conn.execute(
            "DELETE FROM embeddings WHERE content_hash IN (
                 SELECT content_hash FROM embeddings ORDER BY created_at ASC LIMIT ?1
             )",
            params![evict_count as i64],
        );
        match result {
            Ok(n) => tracing::info!("size eviction removed {n} cache entries"),
            Err(e) => tracing::warn!("size eviction failed: {e}"),
        }
    }

    /// Run cleanup when the configured interval has elapsed since the
    /// last pass.
    fn maybe_periodic_cleanup(&self) {
        if !self.config.cleanup_enabled {
            return;
        }
        let interval = self.config.cleanup_interval_hours as i64 * 3600;
        let due = {
            let last = self.last_cleanup.lock();
            epoch_secs() - *last >= interval
        };
        if due {
            self.cleanup(self.max_age_secs());
        }
    }
}

fn open_database(path: &Path) -> anyhow::Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(conn)
}

/// `<user cache dir>/quarry/embeddings/cache.db`
fn default_cache_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "quarry")
        .map(|dirs| dirs.cache_dir().join("embeddings").join("cache.db"))
}

/// Little-endian packed f32s.
fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

fn epoch_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;

    fn temp_cache() -> (tempfile::TempDir, EmbeddingCache) {
        let dir = tempfile::tempdir().unwrap();
        let cache = EmbeddingCache::open(&dir.path().join("cache.db"), CacheConfig::default());
        (dir, cache)
    }

    // ── hashing ──────────────────────────────────────────

    #[test]
    fn test_content_hash_trims() {
        assert_eq!(
            EmbeddingCache::content_hash("  fn main() {}  \n"),
            EmbeddingCache::content_hash("fn main() {}")
        );
    }

    #[test]
    fn test_content_hash_is_lowercase_hex() {
        let hash = EmbeddingCache::content_hash("hello");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_uppercase()));
    }

    // ── get / set ────────────────────────────────────────

    #[test]
    fn test_set_then_get_roundtrip_bit_exact() {
        let (_dir, cache) = temp_cache();
        let vector = vec![0.5f32, -1.25, 3.0, f32::MIN_POSITIVE];
        let hash = EmbeddingCache::content_hash("some chunk");

        cache.set(&hash, &vector);
        let back = cache.get(&hash).unwrap();
        assert_eq!(back, vector);
    }

    #[test]
    fn test_get_missing_returns_none() {
        let (_dir, cache) = temp_cache();
        assert!(cache.get("deadbeef").is_none());
    }

    #[test]
    fn test_set_overwrites() {
        let (_dir, cache) = temp_cache();
        let hash = EmbeddingCache::content_hash("chunk");
        cache.set(&hash, &[1.0]);
        cache.set(&hash, &[2.0, 3.0]);
        assert_eq!(cache.get(&hash).unwrap(), vec![2.0, 3.0]);
    }

    #[test]
    fn test_set_many_get_many() {
        let (_dir, cache) = temp_cache();
        let entries: Vec<(String, Vec<f32>)> = (0..5)
            .map(|i| {
                (
                    EmbeddingCache::content_hash(&format!("chunk {i}")),
                    vec![i as f32; 4],
                )
            })
            .collect();
        cache.set_many(&entries);

        let mut hashes: Vec<String> = entries.iter().map(|(h, _)| h.clone()).collect();
        hashes.push("missing".to_string());

        let found = cache.get_many(&hashes);
        assert_eq!(found.len(), 5);
        for (hash, vector) in &entries {
            assert_eq!(found.get(hash).unwrap(), vector);
        }
        assert!(!found.contains_key("missing"));
    }

    // ── stats ────────────────────────────────────────────

    #[test]
    fn test_stats_counts_entries() {
        let (_dir, cache) = temp_cache();
        assert_eq!(cache.stats().total_entries, 0);

        cache.set(&EmbeddingCache::content_hash("a"), &[1.0, 2.0]);
        cache.set(&EmbeddingCache::content_hash("b"), &[3.0]);

        let stats = cache.stats();
        assert_eq!(stats.total_entries, 2);
        assert!(stats.size_bytes > 0);
        assert!(stats.oldest_ts.is_some());
        assert!(stats.newest_ts.is_some());
    }

    // ── cleanup ──────────────────────────────────────────

    #[test]
    fn test_cleanup_removes_only_expired() {
        let (_dir, cache) = temp_cache();
        cache.set(&EmbeddingCache::content_hash("fresh"), &[1.0]);

        // Nothing is older than one hour
        assert_eq!(cache.cleanup(3600), 0);
        assert_eq!(cache.stats().total_entries, 1);

        // Everything is older than minus-one second
        assert_eq!(cache.cleanup(-1), 1);
        assert_eq!(cache.stats().total_entries, 0);
    }

    // ── degraded mode ────────────────────────────────────

    #[test]
    fn test_disabled_cache_is_noop() {
        let cache = EmbeddingCache::disabled(CacheConfig::default());
        assert!(!cache.is_available());

        cache.set("h", &[1.0]);
        assert!(cache.get("h").is_none());
        cache.set_many(&[("h2".to_string(), vec![2.0])]);
        assert!(cache.get_many(&["h2".to_string()]).is_empty());
        assert_eq!(cache.cleanup(0), 0);
        assert_eq!(cache.stats().total_entries, 0);
    }

    #[test]
    fn test_open_on_unwritable_path_degrades() {
        // A path that cannot be a database directory
        let cache = EmbeddingCache::open(
            Path::new("/dev/null/nested/cache.db"),
            CacheConfig::default(),
        );
        assert!(!cache.is_available());
        cache.set("h", &[1.0]);
        assert!(cache.get("h").is_none());
    }

    #[test]
    fn test_close_makes_cache_noop() {
        let (_dir, cache) = temp_cache();
        cache.set("h", &[1.0]);
        cache.close();
        assert!(!cache.is_available());
        assert!(cache.get("h").is_none());
    }

    // ── persistence ──────────────────────────────────────

    #[test]
    fn test_reopen_preserves_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        let hash = EmbeddingCache::content_hash("persisted");

        {
            let cache = EmbeddingCache::open(&path, CacheConfig::default());
            cache.set(&hash, &[9.0, 8.0]);
            cache.close();
        }

        let cache = EmbeddingCache::open(&path, CacheConfig::default());
        assert_eq!(cache.get(&hash).unwrap(), vec![9.0, 8.0]);
    }
}
