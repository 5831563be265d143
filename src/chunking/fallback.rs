//! Character-based fallback chunker for unsupported languages and
//! unparseable files.
//!
//! Splits at blank-line paragraph boundaries first, merging small
//! paragraphs up to the size bound; a paragraph that alone exceeds the
//! bound is split at single line boundaries. Pure string processing, never
//! fails.

use super::ChunkOutput;

/// Chunk content using paragraph and line boundaries.
pub fn chunk_fallback(content: &str, chunk_size: usize) -> Vec<ChunkOutput> {
    if content.trim().is_empty() {
        return Vec::new();
    }

    let lines: Vec<&str> = content.lines().collect();
    let segments = split_at_blank_lines(&lines);

    let mut chunks = Vec::new();
    let mut current_start = 0usize;
    let mut current_end = 0usize;
    let mut current_len = 0usize;
    let mut started = false;

    for seg in &segments {
        let seg_len = segment_len(&lines, seg.start, seg.end);

        if seg_len > chunk_size {
            if started {
                chunks.push(make_chunk(&lines, current_start, current_end));
                started = false;
                current_len = 0;
            }
            split_large_segment(&lines, seg.start, seg.end, chunk_size, &mut chunks);
        } else if started && current_len + seg_len > chunk_size {
            chunks.push(make_chunk(&lines, current_start, current_end));
            current_start = seg.start;
            current_end = seg.end;
            current_len = seg_len;
        } else {
            if !started {
                current_start = seg.start;
                started = true;
            }
            current_end = seg.end;
            current_len += seg_len;
        }
    }

    if started {
        chunks.push(make_chunk(&lines, current_start, current_end));
    }

    chunks
}

struct Segment {
    start: usize,
    end: usize,
}

fn split_at_blank_lines(lines: &[&str]) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut seg_start = None;

    for (i, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            if let Some(start) = seg_start.take() {
                segments.push(Segment {
                    start,
                    end: i.saturating_sub(1),
                });
            }
        } else if seg_start.is_none() {
            seg_start = Some(i);
        }
    }

    if let Some(start) = seg_start {
        segments.push(Segment {
            start,
            end: lines.len() - 1,
        });
    }

    segments
}

/// Joined length of a line range, counting the joining newlines.
fn segment_len(lines: &[&str], start: usize, end: usize) -> usize {
    let text_len: usize = (start..=end).map(|i| lines[i].len()).sum();
    text_len + (end - start)
}

fn make_chunk(lines: &[&str], start: usize, end: usize) -> ChunkOutput {
    ChunkOutput {
        content: lines[start..=end].join("\n"),
        start_line: start + 1,
        end_line: end + 1,
    }
}

/// Split an oversized paragraph at single line boundaries. An oversized
/// single line stays whole.
fn split_large_segment(
    lines: &[&str],
    start: usize,
    end: usize,
    chunk_size: usize,
    chunks: &mut Vec<ChunkOutput>,
) {
    let mut chunk_start = start;
    let mut len = 0usize;

    for i in start..=end {
        let added = lines[i].len() + usize::from(i > chunk_start);
        if i > chunk_start && len + added > chunk_size {
            chunks.push(make_chunk(lines, chunk_start, i - 1));
            chunk_start = i;
            len = lines[i].len();
        } else {
            len += added;
        }
    }

    if chunk_start <= end {
        chunks.push(make_chunk(lines, chunk_start, end));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIZE: usize = 1500;

    #[test]
    fn test_fallback_empty() {
        assert!(chunk_fallback("", SIZE).is_empty());
        assert!(chunk_fallback("   \n\n  ", SIZE).is_empty());
    }

    #[test]
    fn test_fallback_small_file_single_chunk() {
        let content = "line 1\nline 2\nline 3";
        let chunks = chunk_fallback(content, SIZE);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 3);
        assert_eq!(chunks[0].content, content);
    }

    #[test]
    fn test_fallback_splits_at_paragraphs() {
        let para1: String = (0..60)
            .map(|i| format!("first block line {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        let para2: String = (0..60)
            .map(|i| format!("second block line {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        let content = format!("{para1}\n\n{para2}");

        let chunks = chunk_fallback(&content, SIZE);
        assert!(chunks.len() >= 2);
        assert!(chunks[0].content.contains("first block"));
        assert!(!chunks[0].content.contains("second block"));
    }

    #[test]
    fn test_fallback_respects_size_bound() {
        let content: String = (0..200)
            .map(|i| format!("filler line number {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        for chunk in chunk_fallback(&content, 400) {
            assert!(chunk.content.len() <= 400, "chunk too big: {}", chunk.content.len());
        }
    }

    #[test]
    fn test_fallback_oversized_single_line_kept_whole() {
        let content = "y".repeat(5000);
        let chunks = chunk_fallback(&content, SIZE);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content.len(), 5000);
    }

    #[test]
    fn test_fallback_line_numbers_monotone() {
        let content: String = (0..100)
            .map(|i| format!("line {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = chunk_fallback(&content, 120);
        let mut last_end = 0;
        for chunk in &chunks {
            assert!(chunk.start_line > last_end);
            assert!(chunk.start_line <= chunk.end_line);
            last_end = chunk.end_line;
        }
    }
}
