//! Per-codebase content-hash snapshots for incremental reindexing.
//!
//! A snapshot maps repository-relative POSIX paths to the SHA-256 of the
//! file's bytes. Diffing the stored map against the current tree yields
//! the added/removed/modified sets. Snapshots are written atomically
//! (temp file + rename) so a crash mid-write leaves either the old or the
//! new snapshot intact.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use md5::{Digest as Md5Digest, Md5};
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::models::{CodebaseSnapshot, FileChanges};

/// Detects file-level changes between indexings of one codebase.
pub struct SnapshotSynchronizer {
    codebase_path: PathBuf,
    snapshot_path: PathBuf,
    snapshot: CodebaseSnapshot,
    staged: Option<BTreeMap<String, String>>,
}

impl SnapshotSynchronizer {
    /// Create a synchronizer for a codebase, storing its snapshot in the
    /// per-user cache directory under a name derived from the absolute
    /// path.
    pub fn new(codebase_path: &Path) -> Self {
        let snapshot_path = snapshot_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(format!("{}.json", codebase_identifier(codebase_path)));
        Self::with_snapshot_path(codebase_path, snapshot_path)
    }

    pub fn with_snapshot_path(codebase_path: &Path, snapshot_path: PathBuf) -> Self {
        Self {
            codebase_path: codebase_path.to_path_buf(),
            snapshot_path,
            snapshot: CodebaseSnapshot::empty(&codebase_path.to_string_lossy()),
            staged: None,
        }
    }

    /// Load the persisted snapshot, or start from an empty one.
    pub fn initialize(&mut self) -> Result<()> {
        if self.snapshot_path.is_file() {
            let data = std::fs::read_to_string(&self.snapshot_path)?;
            match serde_json::from_str::<CodebaseSnapshot>(&data) {
                Ok(snapshot) => self.snapshot = snapshot,
                Err(e) => {
                    tracing::warn!(
                        "snapshot {} is unreadable ({e}), starting fresh",
                        self.snapshot_path.display()
                    );
                    self.snapshot =
                        CodebaseSnapshot::empty(&self.codebase_path.to_string_lossy());
                }
            }
        }
        Ok(())
    }

    /// Diff the current tree state against the stored snapshot and stage
    /// the current map for a later [`commit`](Self::commit).
    pub fn check_for_changes(&mut self, current: BTreeMap<String, String>) -> FileChanges {
        let mut changes = FileChanges::default();

        for (path, hash) in &current {
            match self.snapshot.files.get(path) {
                None => changes.added.push(path.clone()),
                Some(stored) if stored != hash => changes.modified.push(path.clone()),
                Some(_) => {}
            }
        }

        for path in self.snapshot.files.keys() {
            if !current.contains_key(path) {
                changes.removed.push(path.clone());
            }
        }

        self.staged = Some(current);
        changes
    }

    /// Atomically persist the staged map. A no-op when nothing is staged.
    pub fn commit(&mut self) -> Result<()> {
        let Some(files) = self.staged.take() else {
            return Ok(());
        };

        self.snapshot = CodebaseSnapshot {
            codebase_path: self.codebase_path.to_string_lossy().to_string(),
            files,
            last_updated: Utc::now(),
        };

        if let Some(parent) = self.snapshot_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(&self.snapshot)?;
        let tmp_path = self.snapshot_path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &data)?;
        std::fs::rename(&tmp_path, &self.snapshot_path)?;
        Ok(())
    }

    /// Drop the stored snapshot (used by force reindex and clear).
    pub fn clear(&mut self) -> Result<()> {
        self.snapshot = CodebaseSnapshot::empty(&self.codebase_path.to_string_lossy());
        self.staged = None;
        if self.snapshot_path.is_file() {
            std::fs::remove_file(&self.snapshot_path)?;
        }
        Ok(())
    }

    pub fn tracked_files(&self) -> usize {
        self.snapshot.files.len()
    }
}

/// SHA-256 of a file's bytes, lowercase hex.
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    let digest = Sha256::digest(&bytes);
    Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
}

/// Deterministic identifier for a codebase path: md5 hex truncated to 16
/// characters, stable across invocations.
pub fn codebase_identifier(codebase_path: &Path) -> String {
    let digest = Md5::digest(codebase_path.to_string_lossy().as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..16].to_string()
}

/// `<user cache dir>/quarry/snapshots`
fn snapshot_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "quarry")
        .map(|dirs| dirs.cache_dir().join("snapshots"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synchronizer(dir: &Path) -> SnapshotSynchronizer {
        SnapshotSynchronizer::with_snapshot_path(
            Path::new("/home/dev/project"),
            dir.join("snapshot.json"),
        )
    }

    fn files(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(p, h)| (p.to_string(), h.to_string()))
            .collect()
    }

    // ── identifier ───────────────────────────────────────

    #[test]
    fn test_identifier_is_deterministic() {
        let a = codebase_identifier(Path::new("/home/dev/project"));
        let b = codebase_identifier(Path::new("/home/dev/project"));
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn test_identifier_differs_per_path() {
        assert_ne!(
            codebase_identifier(Path::new("/home/dev/project-a")),
            codebase_identifier(Path::new("/home/dev/project-b"))
        );
    }

    // ── diffing ──────────────────────────────────────────

    #[test]
    fn test_fresh_snapshot_reports_all_added() {
        let dir = tempfile::tempdir().unwrap();
        let mut sync = synchronizer(dir.path());
        sync.initialize().unwrap();

        let changes = sync.check_for_changes(files(&[("a.rs", "h1"), ("b.rs", "h2")]));
        assert_eq!(changes.added.len(), 2);
        assert!(changes.removed.is_empty());
        assert!(changes.modified.is_empty());
    }

    #[test]
    fn test_unchanged_tree_reports_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut sync = synchronizer(dir.path());
        sync.initialize().unwrap();
        sync.check_for_changes(files(&[("a.rs", "h1")]));
        sync.commit().unwrap();

        let changes = sync.check_for_changes(files(&[("a.rs", "h1")]));
        assert!(changes.is_empty());
    }

    #[test]
    fn test_detects_added_removed_modified() {
        let dir = tempfile::tempdir().unwrap();
        let mut sync = synchronizer(dir.path());
        sync.initialize().unwrap();
        sync.check_for_changes(files(&[("keep.rs", "h1"), ("change.rs", "h2"), ("drop.rs", "h3")]));
        sync.commit().unwrap();

        let changes = sync.check_for_changes(files(&[
            ("keep.rs", "h1"),
            ("change.rs", "h2-modified"),
            ("new.rs", "h4"),
        ]));

        assert_eq!(changes.added, vec!["new.rs"]);
        assert_eq!(changes.modified, vec!["change.rs"]);
        assert_eq!(changes.removed, vec!["drop.rs"]);
    }

    #[test]
    fn test_added_and_modified_are_disjoint() {
        let dir = tempfile::tempdir().unwrap();
        let mut sync = synchronizer(dir.path());
        sync.initialize().unwrap();
        sync.check_for_changes(files(&[("a.rs", "h1")]));
        sync.commit().unwrap();

        let changes = sync.check_for_changes(files(&[("a.rs", "h2"), ("b.rs", "h3")]));
        for added in &changes.added {
            assert!(!changes.modified.contains(added));
        }
    }

    // ── persistence ──────────────────────────────────────

    #[test]
    fn test_commit_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut sync = synchronizer(dir.path());
            sync.initialize().unwrap();
            sync.check_for_changes(files(&[("a.rs", "h1")]));
            sync.commit().unwrap();
        }

        let mut sync = synchronizer(dir.path());
        sync.initialize().unwrap();
        assert_eq!(sync.tracked_files(), 1);
        let changes = sync.check_for_changes(files(&[("a.rs", "h1")]));
        assert!(changes.is_empty());
    }

    #[test]
    fn test_uncommitted_changes_are_not_persisted() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut sync = synchronizer(dir.path());
            sync.initialize().unwrap();
            sync.check_for_changes(files(&[("a.rs", "h1")]));
            // no commit: a cancelled job must not advance the snapshot
        }

        let mut sync = synchronizer(dir.path());
        sync.initialize().unwrap();
        assert_eq!(sync.tracked_files(), 0);
    }

    #[test]
    fn test_commit_without_stage_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut sync = synchronizer(dir.path());
        sync.initialize().unwrap();
        sync.commit().unwrap();
        assert!(!dir.path().join("snapshot.json").exists());
    }

    #[test]
    fn test_corrupt_snapshot_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("snapshot.json"), "{ not json").unwrap();

        let mut sync = synchronizer(dir.path());
        sync.initialize().unwrap();
        assert_eq!(sync.tracked_files(), 0);
    }

    #[test]
    fn test_clear_removes_snapshot_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut sync = synchronizer(dir.path());
        sync.initialize().unwrap();
        sync.check_for_changes(files(&[("a.rs", "h1")]));
        sync.commit().unwrap();
        assert!(dir.path().join("snapshot.json").exists());

        sync.clear().unwrap();
        assert!(!dir.path().join("snapshot.json").exists());
        assert_eq!(sync.tracked_files(), 0);
    }

    // ── file hashing ─────────────────────────────────────

    #[test]
    fn test_hash_file_is_content_based() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.rs");
        let b = dir.path().join("b.rs");
        std::fs::write(&a, "fn main() {}").unwrap();
        std::fs::write(&b, "fn main() {}").unwrap();
        assert_eq!(hash_file(&a).unwrap(), hash_file(&b).unwrap());

        std::fs::write(&b, "fn main() { changed(); }").unwrap();
        assert_ne!(hash_file(&a).unwrap(), hash_file(&b).unwrap());
    }
}
