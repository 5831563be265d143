//! AST-aware chunking using tree-sitter.
//!
//! Pipeline per file:
//! 1. Parse with the grammar's tree-sitter language
//! 2. Group runs of >= 2 consecutive top-level imports into one chunk
//! 3. Pre-order traversal emitting a chunk for every splittable node
//!    (nested splittable nodes emit their own chunks too)
//!
//! Returns None when the parse fails, the root is an error node, or the
//! traversal finds no splittable node; the caller then runs the
//! character-based fallback. Grammar versions occasionally rename node
//! kinds, so the empty-traversal case is treated identically to a parse
//! failure and those shifts degrade instead of breaking.

use std::collections::HashSet;

use super::{ChunkOutput, SyntaxGrammar};

/// Node kinds skipped while scanning for consecutive imports.
const COMMENT_KINDS: &[&str] = &["comment", "line_comment", "block_comment"];

/// Chunk source code along syntactic boundaries.
pub fn chunk_with_ast(content: &str, grammar: SyntaxGrammar) -> Option<Vec<ChunkOutput>> {
    let mut parser = tree_sitter::Parser::new();
    parser.set_language(&grammar.tree_sitter_language()).ok()?;

    let tree = parser.parse(content, None)?;
    let root = tree.root_node();
    if root.is_error() {
        tracing::debug!("parse produced an error root, deferring to fallback");
        return None;
    }

    let mut chunks = Vec::new();
    let consumed = group_leading_imports(content, root, grammar, &mut chunks);

    let splittable: HashSet<&str> = grammar.splittable_kinds().iter().copied().collect();
    emit_splittable(content, root, &splittable, &consumed, &mut chunks);

    if chunks.is_empty() {
        return None;
    }

    Some(chunks)
}

/// Walk top-level siblings from the first child, accumulating import
/// nodes and skipping comments. A run of >= 2 imports becomes one chunk
/// spanning from the first import's start to the last import's end; the
/// grouped nodes are marked consumed so the traversal does not re-emit
/// them.
fn group_leading_imports(
    content: &str,
    root: tree_sitter::Node,
    grammar: SyntaxGrammar,
    chunks: &mut Vec<ChunkOutput>,
) -> HashSet<usize> {
    let import_kinds = grammar.import_kinds();
    let mut consumed = HashSet::new();
    if import_kinds.is_empty() {
        return consumed;
    }

    let mut imports: Vec<tree_sitter::Node> = Vec::new();
    let mut cursor = root.walk();
    for child in root.children(&mut cursor) {
        let kind = child.kind();
        if COMMENT_KINDS.contains(&kind) {
            continue;
        }
        if import_kinds.contains(&kind) {
            imports.push(child);
        } else {
            // First non-import, non-comment sibling ends the run.
            break;
        }
    }

    if imports.len() >= 2 {
        let first = imports.first().expect("non-empty run");
        let last = imports.last().expect("non-empty run");
        let text = &content[first.start_byte()..last.end_byte()];
        if !text.trim().is_empty() {
            chunks.push(ChunkOutput {
                content: text.to_string(),
                start_line: first.start_position().row + 1,
                end_line: last.end_position().row + 1,
            });
            for node in &imports {
                consumed.insert(node.id());
            }
        }
    }

    consumed
}

/// Pre-order traversal emitting a chunk for every splittable node with
/// non-empty trimmed text that was not consumed by import grouping.
/// Traversal continues into children regardless.
fn emit_splittable(
    content: &str,
    node: tree_sitter::Node,
    splittable: &HashSet<&str>,
    consumed: &HashSet<usize>,
    chunks: &mut Vec<ChunkOutput>,
) {
    if splittable.contains(node.kind()) && !consumed.contains(&node.id()) {
        let text = &content[node.start_byte()..node.end_byte()];
        if !text.trim().is_empty() {
            chunks.push(ChunkOutput {
                content: text.to_string(),
                start_line: node.start_position().row + 1,
                end_line: node.end_position().row + 1,
            });
        }
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        emit_splittable(content, child, splittable, consumed, chunks);
    }
}
