//! Ignore-pattern composition and matching.
//!
//! Effective patterns for a codebase are merged from, in order: built-in
//! defaults, every `.*ignore` file in the codebase root, a global
//! `~/.context/.contextignore`, the `CUSTOM_IGNORE_PATTERNS` environment
//! variable, and caller-supplied patterns. Patterns follow gitignore
//! semantics (bare names match at any depth, a trailing `/` matches the
//! directory subtree, a leading `/` anchors to the root). Compiled sets
//! are cached per codebase; reads greatly outnumber writes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use globset::{Glob, GlobSet, GlobSetBuilder};
use parking_lot::RwLock;

/// Built-in ignore patterns: VCS metadata, build outputs, IDE state,
/// caches, logs, temp files, env files, and minified/bundled artefacts.
pub const DEFAULT_IGNORE_PATTERNS: &[&str] = &[
    // VCS
    ".git/",
    ".svn/",
    ".hg/",
    // build outputs and dependency trees
    "node_modules/",
    "target/",
    "build/",
    "dist/",
    "out/",
    "vendor/",
    "__pycache__/",
    ".venv/",
    "venv/",
    "*.egg-info/",
    // IDE state
    ".idea/",
    ".vscode/",
    ".vs/",
    "*.iml",
    // caches
    ".cache/",
    ".pytest_cache/",
    ".mypy_cache/",
    ".gradle/",
    ".next/",
    ".nuxt/",
    // logs and temp
    "logs/",
    "*.log",
    "tmp/",
    "temp/",
    "*.tmp",
    "*.swp",
    ".DS_Store",
    // env files
    ".env",
    ".env.*",
    // minified and bundled artefacts
    "*.min.js",
    "*.min.css",
    "*.bundle.js",
    "*.map",
];

/// A compiled ignore set for one codebase.
#[derive(Clone)]
pub struct IgnoreMatcher {
    set: Arc<GlobSet>,
}

impl IgnoreMatcher {
    /// True when the POSIX-normalised relative path matches any effective
    /// pattern.
    pub fn is_ignored(&self, relative_path: &str) -> bool {
        let normalized = relative_path.replace('\\', "/");
        self.set.is_match(normalized.as_str())
    }
}

/// Per-codebase cache of compiled ignore sets.
#[derive(Default)]
pub struct IgnoreCache {
    sets: RwLock<HashMap<PathBuf, IgnoreMatcher>>,
}

impl IgnoreCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or build the effective matcher for a codebase.
    pub fn matcher_for(&self, codebase_root: &Path, extra_patterns: &[String]) -> IgnoreMatcher {
        if let Some(matcher) = self.sets.read().get(codebase_root) {
            return matcher.clone();
        }

        let matcher = build_matcher(codebase_root, extra_patterns);
        self.sets
            .write()
            .insert(codebase_root.to_path_buf(), matcher.clone());
        matcher
    }

    /// Drop the cached set for a codebase (e.g. after its ignore files
    /// changed).
    pub fn invalidate(&self, codebase_root: &Path) {
        self.sets.write().remove(codebase_root);
    }
}

/// Compose and compile the effective pattern set for a codebase.
fn build_matcher(codebase_root: &Path, extra_patterns: &[String]) -> IgnoreMatcher {
    let mut patterns: Vec<String> = DEFAULT_IGNORE_PATTERNS
        .iter()
        .map(|p| p.to_string())
        .collect();

    patterns.extend(read_ignore_files(codebase_root));
    patterns.extend(read_global_ignore());

    if let Ok(env_patterns) = std::env::var("CUSTOM_IGNORE_PATTERNS") {
        patterns.extend(
            env_patterns
                .split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty()),
        );
    }

    patterns.extend(extra_patterns.iter().cloned());

    IgnoreMatcher {
        set: Arc::new(compile_globset(&patterns)),
    }
}

/// Read every `.*ignore` file directly in the codebase root.
fn read_ignore_files(codebase_root: &Path) -> Vec<String> {
    let mut patterns = Vec::new();
    let Ok(entries) = std::fs::read_dir(codebase_root) else {
        return patterns;
    };

    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') && name.ends_with("ignore") && entry.path().is_file() {
            patterns.extend(read_pattern_file(&entry.path()));
        }
    }
    patterns
}

/// Global `~/.context/.contextignore`, if present.
fn read_global_ignore() -> Vec<String> {
    let Some(base) = directories::BaseDirs::new() else {
        return Vec::new();
    };
    let path = base.home_dir().join(".context").join(".contextignore");
    if path.is_file() {
        read_pattern_file(&path)
    } else {
        Vec::new()
    }
}

fn read_pattern_file(path: &Path) -> Vec<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => content
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .collect(),
        Err(e) => {
            tracing::warn!("failed to read ignore file {}: {e}", path.display());
            Vec::new()
        }
    }
}

/// Compile patterns into a [`GlobSet`], translating gitignore conventions
/// and skipping invalid or unsupported (negated) entries.
fn compile_globset(patterns: &[String]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        for glob in gitignore_to_globs(pattern) {
            match Glob::new(&glob) {
                Ok(g) => {
                    builder.add(g);
                }
                Err(e) => {
                    tracing::warn!("skipping invalid ignore pattern {pattern:?}: {e}");
                }
            }
        }
    }
    builder.build().unwrap_or_else(|e| {
        tracing::warn!("ignore set failed to compile ({e}), ignoring nothing");
        GlobSet::empty()
    })
}

/// Translate one gitignore-style pattern into globset globs.
fn gitignore_to_globs(pattern: &str) -> Vec<String> {
    let p = pattern.trim();
    if p.is_empty() || p.starts_with('#') || p.starts_with('!') {
        return Vec::new();
    }

    let anchored = p.starts_with('/');
    let p = p.trim_start_matches('/').trim_end_matches('/');
    if p.is_empty() {
        return Vec::new();
    }

    // Bare names (no slash) match at any depth; anything with a slash is
    // root-relative, as is an explicitly anchored pattern. Both the path
    // itself and its subtree match, so the tree walk can prune ignored
    // directories without descending into them.
    let base = if !anchored && !p.contains('/') {
        format!("**/{p}")
    } else {
        p.to_string()
    };
    vec![base.clone(), format!("{base}/**")]
}
