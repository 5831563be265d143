//! Deterministic rule-based query preprocessing.
//!
//! Expands a user query into a bounded, insertion-ordered set of search
//! variants plus detected pattern tags (`filename:<path>`,
//! `language:<tag>`). Every stage can be disabled independently; the
//! pipeline is pure string processing with fixed tables, so identical
//! input always yields identical output.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::PreprocessingResult;

/// Whole-word abbreviation expansions.
const ABBREVIATIONS: &[(&str, &str)] = &[
    ("js", "javascript"),
    ("ts", "typescript"),
    ("py", "python"),
    ("fn", "function"),
    ("var", "variable"),
    ("api", "API"),
    ("db", "database"),
    ("auth", "authentication"),
    ("async", "asynchronous"),
    ("config", "configuration"),
    ("util", "utility"),
    ("req", "request"),
    ("res", "response"),
    ("err", "error"),
    ("ctx", "context"),
];

/// Natural-language concept -> technical terms.
const CONCEPTS: &[(&str, &[&str])] = &[
    (
        "error handling",
        &["try catch", "exception", "error propagation", "panic handling"],
    ),
    (
        "database connection",
        &["connection pool", "sql client", "database driver"],
    ),
    (
        "configuration",
        &["config file", "settings", "environment variables"],
    ),
    (
        "authentication",
        &["login", "oauth", "token validation", "session management"],
    ),
    (
        "async processing",
        &["async await", "concurrency", "task queue", "future"],
    ),
    (
        "file system",
        &["file io", "directory traversal", "path handling"],
    ),
    (
        "logging",
        &["logger", "log level", "structured logging", "trace output"],
    ),
    (
        "data processing",
        &["data pipeline", "transformation", "parsing", "serialization"],
    ),
    (
        "web development",
        &["http server", "rest api", "routing", "middleware"],
    ),
    (
        "machine learning",
        &["model training", "inference", "neural network", "embedding"],
    ),
    (
        "data visualization",
        &["chart", "plot", "dashboard", "rendering"],
    ),
    (
        "data analysis",
        &["statistics", "aggregation", "dataframe", "metrics"],
    ),
    ("testing", &["unit test", "integration test", "mock", "assertion"]),
    (
        "security",
        &["encryption", "sanitization", "access control", "vulnerability"],
    ),
    (
        "performance optimization",
        &["caching", "profiling", "benchmark", "latency"],
    ),
    (
        "database optimization",
        &["query plan", "indexing", "batch insert", "connection pool"],
    ),
];

/// Language name -> detection regex (applied case-insensitively).
const LANGUAGE_PATTERNS: &[(&str, &str)] = &[
    ("python", r"\b(python|py|django|flask|pandas|numpy)\b"),
    ("javascript", r"\b(javascript|js|node|nodejs|react|vue)\b"),
    ("typescript", r"\b(typescript|ts|tsx|angular)\b"),
    ("java", r"\b(java|spring|maven)\b"),
    ("cpp", r"\b(c\+\+|cpp|stl)\b"),
    ("go", r"\b(golang|go)\b"),
    ("rust", r"\b(rust|cargo|tokio)\b"),
    ("php", r"\b(php|laravel|composer)\b"),
    ("ruby", r"\b(ruby|rails|rspec)\b"),
    ("swift", r"\b(swift|ios|xcode)\b"),
    ("kotlin", r"\b(kotlin|android)\b"),
    ("scala", r"\b(scala|spark|akka)\b"),
    ("csharp", r"\b(csharp|dotnet|aspnet)\b"),
];

/// Extensions recognized by the filename detector.
const FILENAME_EXTENSIONS: &str =
    "ts|tsx|js|jsx|py|java|cpp|c|h|hpp|cs|go|rs|php|rb|swift|kt|scala|m|mm|md|markdown|ipynb";

/// Terms signalling an implementation-seeking query.
const IMPLEMENTATION_HINTS: &[&str] = &["how to", "implement", "create", "build", "write"];

/// Stage toggles for the preprocessor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessConfig {
    pub expand_abbreviations: bool,
    pub map_concepts: bool,
    pub split_cases: bool,
    pub detect_filenames: bool,
    pub detect_languages: bool,
    pub implementation_focus: bool,
    pub max_variants: usize,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            expand_abbreviations: true,
            map_concepts: true,
            split_cases: true,
            detect_filenames: true,
            detect_languages: true,
            implementation_focus: true,
            max_variants: 20,
        }
    }
}

pub struct QueryPreprocessor {
    config: PreprocessConfig,
    abbreviation_res: Vec<(Regex, &'static str)>,
    language_res: Vec<(&'static str, Regex)>,
    filename_res: Vec<Regex>,
    camel_boundary_re: Regex,
    implementation_re: Regex,
}

impl QueryPreprocessor {
    pub fn new(config: PreprocessConfig) -> Self {
        let abbreviation_res = ABBREVIATIONS
            .iter()
            .map(|(abbr, full)| {
                (
                    Regex::new(&format!(r"(?i)\b{abbr}\b")).expect("static regex"),
                    *full,
                )
            })
            .collect();

        let language_res = LANGUAGE_PATTERNS
            .iter()
            .map(|(name, pattern)| {
                (
                    *name,
                    Regex::new(&format!("(?i){pattern}")).expect("static regex"),
                )
            })
            .collect();

        // Tried in order: path with directories, single directory, bare
        // filename.
        let ext = FILENAME_EXTENSIONS;
        let filename_res = vec![
            Regex::new(&format!(r"\b([\w.-]+(?:/[\w.-]+){{2,}}\.(?:{ext}))\b"))
                .expect("static regex"),
            Regex::new(&format!(r"\b([\w.-]+/[\w.-]+\.(?:{ext}))\b")).expect("static regex"),
            Regex::new(&format!(r"\b([\w.-]+\.(?:{ext}))\b")).expect("static regex"),
        ];

        Self {
            config,
            abbreviation_res,
            language_res,
            filename_res,
            camel_boundary_re: Regex::new(r"([a-z])([A-Z])").expect("static regex"),
            implementation_re: Regex::new(r"\b(async|def|class|function)\s+\w+")
                .expect("static regex"),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(PreprocessConfig::default())
    }

    /// Run every enabled stage in order, collecting variants into an
    /// insertion-ordered deduplicated set seeded with the trimmed query.
    pub fn preprocess(&self, query: &str) -> PreprocessingResult {
        let original = query.to_string();
        let trimmed = query.trim().to_string();
        let normalized = normalize(&trimmed);

        let mut variants = VariantSet::new(&trimmed);
        let mut patterns: Vec<String> = Vec::new();
        let mut reasoning: Vec<String> = Vec::new();

        if trimmed.is_empty() {
            return PreprocessingResult {
                original_query: original,
                normalized_query: normalized,
                expanded_terms: variants.into_vec(self.config.max_variants),
                detected_patterns: patterns,
                reasoning: vec!["Empty query".to_string()],
            };
        }

        if self.config.expand_abbreviations {
            let expanded = self.expand_abbreviations(&trimmed);
            if expanded != trimmed && variants.push(expanded) {
                reasoning.push("Expanded abbreviations".to_string());
            }
        }

        if self.config.map_concepts {
            let lower = trimmed.to_lowercase();
            for (concept, terms) in CONCEPTS {
                if lower.contains(concept) {
                    for term in *terms {
                        variants.push(term.to_string());
                    }
                    variants.push(concept.to_string());
                    reasoning.push(format!("Mapped concept \"{concept}\""));
                }
            }
        }

        if self.config.split_cases {
            for term in trimmed.split_whitespace() {
                if self.camel_boundary_re.is_match(term) {
                    let split = self
                        .camel_boundary_re
                        .replace_all(term, "$1 $2")
                        .into_owned();
                    if variants.push(trimmed.replace(term, &split)) {
                        reasoning.push(format!("Split camelCase term \"{term}\""));
                    }
                }
                if term.contains('_') && !term.starts_with('_') {
                    let split = term.replace('_', " ");
                    if variants.push(trimmed.replace(term, &split)) {
                        reasoning.push(format!("Split snake_case term \"{term}\""));
                    }
                }
            }
        }

        if self.config.detect_languages {
            for (name, re) in &self.language_res {
                if re.is_match(&trimmed) {
                    patterns.push(format!("language:{name}"));
                    variants.push(format!("{trimmed} {name}"));
                    reasoning.push(format!("Detected language \"{name}\""));
                }
            }
        }

        if self.config.detect_filenames {
            let filenames = self.detect_filenames(&trimmed);
            for filename in &filenames {
                patterns.push(format!("filename:{filename}"));
                let base = basename_without_extension(filename);
                if !base.is_empty() {
                    variants.push(format!("{trimmed} {base}"));
                }
                reasoning.push(format!("Detected filename \"{filename}\""));
            }
        }

        if self.config.implementation_focus {
            let lower = trimmed.to_lowercase();
            if IMPLEMENTATION_HINTS.iter().any(|h| lower.contains(h)) {
                variants.push(format!("{trimmed} function class method implementation"));
                reasoning.push("Implementation-seeking query".to_string());
            }
            if self.implementation_re.is_match(&trimmed) {
                variants.push(format!("{trimmed} implementation definition"));
                reasoning.push("Definition-shaped query".to_string());
            }
        }

        PreprocessingResult {
            original_query: original,
            normalized_query: normalized,
            expanded_terms: variants.into_vec(self.config.max_variants),
            detected_patterns: patterns,
            reasoning,
        }
    }

    fn expand_abbreviations(&self, query: &str) -> String {
        let mut out = query.to_string();
        for (re, full) in &self.abbreviation_res {
            out = re.replace_all(&out, *full).into_owned();
        }
        out
    }

    /// Try the filename regexes in precedence order; the first one that
    /// matches wins so a full path is not re-reported as a bare filename.
    fn detect_filenames(&self, query: &str) -> Vec<String> {
        for re in &self.filename_res {
            let mut found: Vec<String> = Vec::new();
            for cap in re.captures_iter(query) {
                let m = cap[1].to_string();
                if !found.contains(&m) {
                    found.push(m);
                }
            }
            if !found.is_empty() {
                return found;
            }
        }
        Vec::new()
    }
}

/// Pick the best single variant for a one-shot search.
///
/// Priority: (a) a variant containing a detected filename, (b) one
/// containing a detected language and differing from the original, (c) one
/// containing an implementation keyword and differing, (d) one containing
/// a high-signal technology term and differing, (e) the longest variant if
/// longer than the original, (f) the normalized query.
pub fn select_best_variant(result: &PreprocessingResult) -> String {
    select_variants(result, 1)
        .into_iter()
        .next()
        .unwrap_or_else(|| result.normalized_query.clone())
}

/// Produce up to `max` distinct variants by running the single-variant
/// priorities once each, then filling with the longest remaining variants.
pub fn select_variants(result: &PreprocessingResult, max: usize) -> Vec<String> {
    const IMPLEMENTATION_TERMS: &[&str] =
        &["function", "class", "method", "implementation", "definition"];
    const TECHNOLOGY_TERMS: &[&str] = &[
        "javascript",
        "python",
        "typescript",
        "authentication",
        "configuration",
        "database",
    ];

    let original = &result.original_query;
    let variants = &result.expanded_terms;

    let filenames: Vec<&str> = result
        .detected_patterns
        .iter()
        .filter_map(|p| p.strip_prefix("filename:"))
        .collect();
    let languages: Vec<&str> = result
        .detected_patterns
        .iter()
        .filter_map(|p| p.strip_prefix("language:"))
        .collect();

    let mut selected: Vec<String> = Vec::new();
    let push = |candidate: Option<&String>, selected: &mut Vec<String>| {
        if let Some(v) = candidate {
            if !selected.contains(v) {
                selected.push(v.clone());
            }
        }
    };

    // (a) filename match
    push(
        variants
            .iter()
            .find(|v| filenames.iter().any(|f| v.contains(f))),
        &mut selected,
    );
    // (b) language match, differing from the original
    push(
        variants
            .iter()
            .find(|v| *v != original && languages.iter().any(|l| v.contains(l))),
        &mut selected,
    );
    // (c) implementation keyword, differing
    push(
        variants
            .iter()
            .find(|v| *v != original && IMPLEMENTATION_TERMS.iter().any(|t| v.contains(t))),
        &mut selected,
    );
    // (d) technology term, differing
    push(
        variants
            .iter()
            .find(|v| *v != original && TECHNOLOGY_TERMS.iter().any(|t| v.contains(t))),
        &mut selected,
    );

    // (e)/fill: longest remaining variants. Only single-variant selection
    // requires the candidate to be longer than the original; the N-variant
    // fill appends unconditionally.
    let mut remaining: Vec<&String> = variants
        .iter()
        .filter(|v| !selected.contains(*v))
        .collect();
    remaining.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()));
    for v in remaining {
        if selected.len() >= max {
            break;
        }
        if max == 1
            && selected.is_empty()
            && v.chars().count() <= original.chars().count()
        {
            continue;
        }
        selected.push(v.clone());
    }

    selected.truncate(max);
    if selected.is_empty() {
        selected.push(result.normalized_query.clone());
    }
    selected
}

/// Insertion-ordered set of variants, seeded with the trimmed query.
struct VariantSet {
    items: Vec<String>,
}

impl VariantSet {
    fn new(seed: &str) -> Self {
        Self {
            items: vec![seed.to_string()],
        }
    }

    /// Returns true if the variant was new.
    fn push(&mut self, variant: String) -> bool {
        if self.items.contains(&variant) {
            return false;
        }
        self.items.push(variant);
        true
    }

    fn into_vec(self, max: usize) -> Vec<String> {
        let mut items = self.items;
        items.truncate(max);
        items
    }
}

fn normalize(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn basename_without_extension(filename: &str) -> String {
    let base = filename.rsplit('/').next().unwrap_or(filename);
    match base.rfind('.') {
        Some(idx) => base[..idx].to_string(),
        None => base.to_string(),
    }
}
