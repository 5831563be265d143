//! Code chunking module: AST-aware for supported languages, character-based
//! fallback for the rest.
//!
//! The chunker never fails: parse errors and unsupported languages degrade
//! to the fallback splitter, and every emitted chunk obeys the configured
//! size bound after refinement (a single line longer than the bound is
//! kept whole).

pub mod ast;
pub mod fallback;

use std::collections::HashSet;

use crate::models::CodeChunk;

/// Intermediate output of the splitting passes, before language and file
/// path are attached.
#[derive(Debug, Clone)]
pub struct ChunkOutput {
    pub content: String,
    /// 1-based start line in the original file.
    pub start_line: usize,
    /// 1-based end line in the original file.
    pub end_line: usize,
}

/// Grammars with tree-sitter support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyntaxGrammar {
    JavaScript,
    TypeScript,
    Tsx,
    Python,
    Java,
    Cpp,
    C,
    Go,
    Rust,
    CSharp,
    Ruby,
    Scala,
}

impl SyntaxGrammar {
    /// Map a language tag (name or extension) to a grammar.
    pub fn from_language_tag(tag: &str) -> Option<Self> {
        match tag.to_lowercase().as_str() {
            "javascript" | "js" | "jsx" | "mjs" => Some(SyntaxGrammar::JavaScript),
            "typescript" | "ts" => Some(SyntaxGrammar::TypeScript),
            "tsx" => Some(SyntaxGrammar::Tsx),
            "python" | "py" => Some(SyntaxGrammar::Python),
            "java" => Some(SyntaxGrammar::Java),
            "cpp" | "c++" | "cc" | "cxx" | "hpp" => Some(SyntaxGrammar::Cpp),
            "c" | "h" => Some(SyntaxGrammar::C),
            "go" => Some(SyntaxGrammar::Go),
            "rust" | "rs" => Some(SyntaxGrammar::Rust),
            "csharp" | "c#" | "cs" => Some(SyntaxGrammar::CSharp),
            "ruby" | "rb" => Some(SyntaxGrammar::Ruby),
            "scala" => Some(SyntaxGrammar::Scala),
            _ => None,
        }
    }

    /// Return the tree-sitter Language for this grammar.
    pub fn tree_sitter_language(&self) -> tree_sitter::Language {
        match self {
            SyntaxGrammar::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            SyntaxGrammar::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            SyntaxGrammar::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            SyntaxGrammar::Python => tree_sitter_python::LANGUAGE.into(),
            SyntaxGrammar::Java => tree_sitter_java::LANGUAGE.into(),
            SyntaxGrammar::Cpp => tree_sitter_cpp::LANGUAGE.into(),
            SyntaxGrammar::C => tree_sitter_c::LANGUAGE.into(),
            SyntaxGrammar::Go => tree_sitter_go::LANGUAGE.into(),
            SyntaxGrammar::Rust => tree_sitter_rust::LANGUAGE.into(),
            SyntaxGrammar::CSharp => tree_sitter_c_sharp::LANGUAGE.into(),
            SyntaxGrammar::Ruby => tree_sitter_ruby::LANGUAGE.into(),
            SyntaxGrammar::Scala => tree_sitter_scala::LANGUAGE.into(),
        }
    }

    /// Node kinds treated as chunk boundaries for this grammar.
    pub fn splittable_kinds(&self) -> &'static [&'static str] {
        match self {
            SyntaxGrammar::JavaScript | SyntaxGrammar::Tsx => &[
                "import_statement",
                "function_declaration",
                "arrow_function",
                "class_declaration",
                "method_definition",
                "export_statement",
                "variable_declaration",
                "lexical_declaration",
            ],
            SyntaxGrammar::TypeScript => &[
                "import_statement",
                "function_declaration",
                "arrow_function",
                "class_declaration",
                "method_definition",
                "export_statement",
                "variable_declaration",
                "lexical_declaration",
                "interface_declaration",
                "type_alias_declaration",
            ],
            SyntaxGrammar::Python => &[
                "import_statement",
                "import_from_statement",
                "function_definition",
                "class_definition",
                "decorated_definition",
                "async_function_definition",
                "assignment",
            ],
            SyntaxGrammar::Java => &[
                "import_declaration",
                "package_declaration",
                "method_declaration",
                "class_declaration",
                "interface_declaration",
                "constructor_declaration",
                "field_declaration",
                "local_variable_declaration",
            ],
            SyntaxGrammar::Cpp | SyntaxGrammar::C => &[
                "preproc_include",
                "function_definition",
                "class_specifier",
                "namespace_definition",
                "declaration",
            ],
            SyntaxGrammar::Go => &[
                "import_declaration",
                "function_declaration",
                "method_declaration",
                "type_declaration",
                "var_declaration",
                "const_declaration",
            ],
            SyntaxGrammar::Rust => &[
                "use_declaration",
                "function_item",
                "impl_item",
                "struct_item",
                "enum_item",
                "trait_item",
                "mod_item",
                "static_item",
                "const_item",
            ],
            SyntaxGrammar::CSharp => &[
                "using_directive",
                "method_declaration",
                "class_declaration",
                "interface_declaration",
                "struct_declaration",
                "enum_declaration",
            ],
            SyntaxGrammar::Ruby => &["method", "class", "module", "def", "singleton_method"],
            SyntaxGrammar::Scala => &[
                "import_declaration",
                "function_definition",
                "class_definition",
                "trait_definition",
                "object_definition",
                "enum_definition",
            ],
        }
    }

    /// Node kinds accumulated by the consecutive-import grouping pass.
    pub fn import_kinds(&self) -> &'static [&'static str] {
        match self {
            SyntaxGrammar::JavaScript | SyntaxGrammar::TypeScript | SyntaxGrammar::Tsx => {
                &["import_statement"]
            }
            SyntaxGrammar::Python => &["import_statement", "import_from_statement"],
            SyntaxGrammar::Java => &["import_declaration"],
            SyntaxGrammar::Cpp | SyntaxGrammar::C => &["preproc_include"],
            SyntaxGrammar::Go => &["import_declaration"],
            SyntaxGrammar::Rust => &["use_declaration"],
            SyntaxGrammar::CSharp => &["using_directive"],
            SyntaxGrammar::Ruby => &[],
            SyntaxGrammar::Scala => &["import_declaration"],
        }
    }
}

/// Syntax-aware chunker with a character-based fallback.
#[derive(Debug, Clone)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Chunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
        }
    }

    /// Split a source file into ordered chunks. Never fails: parser errors
    /// degrade to the fallback splitter.
    pub fn chunk(&self, content: &str, language: &str, file_path: &str) -> Vec<CodeChunk> {
        if content.trim().is_empty() {
            return Vec::new();
        }

        let raw = match SyntaxGrammar::from_language_tag(language) {
            Some(grammar) => match ast::chunk_with_ast(content, grammar) {
                Some(chunks) => chunks,
                None => {
                    tracing::debug!("AST chunking unavailable for {file_path}, using fallback");
                    fallback::chunk_fallback(content, self.chunk_size)
                }
            },
            None => fallback::chunk_fallback(content, self.chunk_size),
        };

        let refined = refine_oversized(raw, self.chunk_size);
        let deduped = dedup_by_line_range(refined);
        let with_overlap = if self.chunk_overlap > 0 {
            add_overlap(deduped, self.chunk_overlap)
        } else {
            deduped
        };

        with_overlap
            .into_iter()
            .filter(|c| !c.content.is_empty())
            .map(|c| CodeChunk {
                content: c.content,
                start_line: c.start_line,
                end_line: c.end_line,
                language: language.to_string(),
                file_path: file_path.to_string(),
            })
            .collect()
    }
}

/// Split chunks whose content exceeds `chunk_size` by accumulating lines.
/// The current sub-chunk closes when adding the next line would exceed the
/// bound, unless it is empty (an oversized single line is force-included).
fn refine_oversized(chunks: Vec<ChunkOutput>, chunk_size: usize) -> Vec<ChunkOutput> {
    let mut out = Vec::with_capacity(chunks.len());

    for chunk in chunks {
        if chunk.content.len() <= chunk_size {
            out.push(chunk);
            continue;
        }

        let lines: Vec<&str> = chunk.content.lines().collect();
        let mut current: Vec<&str> = Vec::new();
        let mut current_len = 0usize;
        let mut sub_start = chunk.start_line;

        for (i, line) in lines.iter().enumerate() {
            // +1 for the joining newline
            let added = line.len() + if current.is_empty() { 0 } else { 1 };
            if !current.is_empty() && current_len + added > chunk_size {
                out.push(ChunkOutput {
                    content: current.join("\n"),
                    start_line: sub_start,
                    end_line: sub_start + current.len() - 1,
                });
                sub_start = chunk.start_line + i;
                current = vec![line];
                current_len = line.len();
            } else {
                current.push(line);
                current_len += added;
            }
        }

        if !current.is_empty() {
            out.push(ChunkOutput {
                content: current.join("\n"),
                start_line: sub_start,
                end_line: sub_start + current.len() - 1,
            });
        }
    }

    out
}

/// Drop chunks whose `(start_line, end_line)` pair already appeared;
/// first occurrence wins. This collapses nested pairs like an
/// `export_statement` wrapping a `function_declaration` on the same lines.
fn dedup_by_line_range(chunks: Vec<ChunkOutput>) -> Vec<ChunkOutput> {
    let mut seen: HashSet<(usize, usize)> = HashSet::new();
    chunks
        .into_iter()
        .filter(|c| seen.insert((c.start_line, c.end_line)))
        .collect()
}

/// Prepend the tail of each previous chunk to the next one. The
/// `start_line` adjustment is derived from the newline count of the
/// prepended slice, clamped to 1.
fn add_overlap(chunks: Vec<ChunkOutput>, overlap_chars: usize) -> Vec<ChunkOutput> {
    if chunks.len() < 2 {
        return chunks;
    }

    let mut out: Vec<ChunkOutput> = Vec::with_capacity(chunks.len());
    for (i, chunk) in chunks.iter().enumerate() {
        if i == 0 {
            out.push(chunk.clone());
            continue;
        }

        let prev = &chunks[i - 1].content;
        let tail = char_tail(prev, overlap_chars);
        let overlap_lines = tail.matches('\n').count();

        out.push(ChunkOutput {
            content: format!("{tail}{}", chunk.content),
            start_line: chunk.start_line.saturating_sub(overlap_lines).max(1),
            end_line: chunk.end_line,
        });
    }
    out
}

/// Last `n` characters of `s`, on a char boundary.
fn char_tail(s: &str, n: usize) -> &str {
    let char_count = s.chars().count();
    if char_count <= n {
        return s;
    }
    let skip = char_count - n;
    let (idx, _) = s.char_indices().nth(skip).expect("index within bounds");
    &s[idx..]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker() -> Chunker {
        Chunker::new(2500, 0)
    }

    // ── grammar dispatch ─────────────────────────────────

    #[test]
    fn test_grammar_from_tag() {
        assert_eq!(
            SyntaxGrammar::from_language_tag("rust"),
            Some(SyntaxGrammar::Rust)
        );
        assert_eq!(
            SyntaxGrammar::from_language_tag("ts"),
            Some(SyntaxGrammar::TypeScript)
        );
        assert_eq!(
            SyntaxGrammar::from_language_tag("tsx"),
            Some(SyntaxGrammar::Tsx)
        );
        assert_eq!(
            SyntaxGrammar::from_language_tag("C#"),
            Some(SyntaxGrammar::CSharp)
        );
        assert_eq!(SyntaxGrammar::from_language_tag("cobol"), None);
    }

    #[test]
    fn test_typescript_adds_interface_and_type_alias() {
        let ts = SyntaxGrammar::TypeScript.splittable_kinds();
        assert!(ts.contains(&"interface_declaration"));
        assert!(ts.contains(&"type_alias_declaration"));
        let js = SyntaxGrammar::JavaScript.splittable_kinds();
        assert!(!js.contains(&"interface_declaration"));
    }

    // ── end-to-end chunking ──────────────────────────────

    #[test]
    fn test_chunk_rust_functions() {
        let source = "fn hello() {\n    println!(\"hello\");\n}\n\nfn world() {\n    println!(\"world\");\n}\n";
        let chunks = chunker().chunk(source, "rust", "src/demo.rs");
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].content.contains("fn hello"));
        assert!(chunks[1].content.contains("fn world"));
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[1].start_line, 5);
    }

    #[test]
    fn test_chunk_unknown_language_uses_fallback() {
        let chunks = chunker().chunk("plain text\nmore text\n", "markdown", "notes.md");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_line, 1);
    }

    #[test]
    fn test_chunk_empty_content() {
        assert!(chunker().chunk("", "rust", "empty.rs").is_empty());
        assert!(chunker().chunk("  \n ", "rust", "blank.rs").is_empty());
    }

    #[test]
    fn test_chunk_attaches_language_and_path() {
        let chunks = chunker().chunk("fn a() {}\n", "rust", "src/a.rs");
        assert_eq!(chunks[0].language, "rust");
        assert_eq!(chunks[0].file_path, "src/a.rs");
    }

    #[test]
    fn test_content_matches_source_lines() {
        let source = "fn one() {\n    1\n}\n\nfn two() {\n    2\n}\n";
        let lines: Vec<&str> = source.lines().collect();
        for chunk in chunker().chunk(source, "rust", "x.rs") {
            let expected = lines[chunk.start_line - 1..chunk.end_line].join("\n");
            assert_eq!(chunk.content, expected);
        }
    }

    // ── boundary scenario: duplicate-range dedup ─────────

    #[test]
    fn test_export_function_same_range_dedups() {
        let source = "export function C(){return 1;}\n";
        let chunks = chunker().chunk(source, "tsx", "C.tsx");
        let on_line_one: Vec<_> = chunks
            .iter()
            .filter(|c| c.start_line == 1 && c.end_line == 1)
            .collect();
        assert_eq!(on_line_one.len(), 1);
    }

    // ── refinement ───────────────────────────────────────

    #[test]
    fn test_refine_splits_oversized_chunk() {
        let line = "let x = 0;";
        let big = vec![ChunkOutput {
            content: vec![line; 100].join("\n"),
            start_line: 1,
            end_line: 100,
        }];
        let refined = refine_oversized(big, 120);
        assert!(refined.len() > 1);
        for c in &refined {
            assert!(c.content.len() <= 120);
            assert!(c.start_line >= 1);
            assert!(c.start_line <= c.end_line);
        }
        // line accounting stays contiguous
        assert_eq!(refined.first().unwrap().start_line, 1);
        assert_eq!(refined.last().unwrap().end_line, 100);
    }

    #[test]
    fn test_refine_force_includes_oversized_line() {
        let big_line = "x".repeat(500);
        let chunks = vec![ChunkOutput {
            content: big_line.clone(),
            start_line: 7,
            end_line: 7,
        }];
        let refined = refine_oversized(chunks, 100);
        assert_eq!(refined.len(), 1);
        assert_eq!(refined[0].content, big_line);
        assert_eq!(refined[0].start_line, 7);
    }

    #[test]
    fn test_refine_keeps_small_chunks_intact() {
        let chunks = vec![ChunkOutput {
            content: "short".to_string(),
            start_line: 1,
            end_line: 1,
        }];
        let refined = refine_oversized(chunks.clone(), 2500);
        assert_eq!(refined.len(), 1);
        assert_eq!(refined[0].content, "short");
    }

    // ── dedup ────────────────────────────────────────────

    #[test]
    fn test_dedup_first_occurrence_wins() {
        let chunks = vec![
            ChunkOutput {
                content: "export function f() {}".to_string(),
                start_line: 1,
                end_line: 1,
            },
            ChunkOutput {
                content: "function f() {}".to_string(),
                start_line: 1,
                end_line: 1,
            },
            ChunkOutput {
                content: "other".to_string(),
                start_line: 2,
                end_line: 2,
            },
        ];
        let deduped = dedup_by_line_range(chunks);
        assert_eq!(deduped.len(), 2);
        assert!(deduped[0].content.starts_with("export"));
    }

    // ── overlap ──────────────────────────────────────────

    #[test]
    fn test_overlap_prepends_previous_tail() {
        let chunks = vec![
            ChunkOutput {
                content: "aaaa\nbbbb".to_string(),
                start_line: 1,
                end_line: 2,
            },
            ChunkOutput {
                content: "cccc".to_string(),
                start_line: 3,
                end_line: 3,
            },
        ];
        let overlapped = add_overlap(chunks, 4);
        assert_eq!(overlapped[0].content, "aaaa\nbbbb");
        assert_eq!(overlapped[1].content, "bbbbcccc");
        assert!(overlapped[1].start_line >= 1);
    }

    #[test]
    fn test_overlap_start_line_clamped_to_one() {
        let chunks = vec![
            ChunkOutput {
                content: "a\nb\nc\nd".to_string(),
                start_line: 1,
                end_line: 4,
            },
            ChunkOutput {
                content: "e".to_string(),
                start_line: 5,
                end_line: 5,
            },
        ];
        // Overlap longer than the whole previous chunk
        let overlapped = add_overlap(chunks, 100);
        assert_eq!(overlapped[1].start_line, 1);
        assert!(overlapped[1].content.ends_with('e'));
    }

    #[test]
    fn test_overlap_equals_tail_of_previous() {
        let source = "fn first() {\n    let a = 1;\n}\n\nfn second() {\n    let b = 2;\n}\n";
        let chunks = Chunker::new(2500, 8).chunk(source, "rust", "x.rs");
        assert!(chunks.len() >= 2);
        let prev_plain = "fn first() {\n    let a = 1;\n}";
        let tail: String = prev_plain
            .chars()
            .skip(prev_plain.chars().count() - 8)
            .collect();
        assert!(chunks[1].content.starts_with(&tail));
    }

    #[test]
    fn test_char_tail_utf8() {
        assert_eq!(char_tail("héllo", 3), "llo");
        assert_eq!(char_tail("héllo", 5), "héllo");
        assert_eq!(char_tail("héllo", 99), "héllo");
    }
}
