//! Paragraph-boundary text chunker with overlap.
//!
//! Splits document text into [`DocumentChunk`]s bounded by `max_tokens`.
//! Splitting prefers paragraph boundaries (`\n\n`); paragraphs larger than
//! the bound are hard-split at the last whitespace before the limit.
//! Consecutive chunks share up to `overlap_tokens` of trailing text so
//! that context spanning a boundary is retrievable from either side.
//!
//! Chunks come back with contiguous `chunk_index` values in source order,
//! a token estimate, a SHA-256 content hash, and no embedding.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::DocumentChunk;

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Estimated token count for `text`.
pub fn estimate_tokens(text: &str) -> i64 {
    text.chars().count().div_ceil(CHARS_PER_TOKEN) as i64
}

/// Split text into chunks. Blank input yields no chunks.
pub fn chunk_text(
    document_id: &str,
    text: &str,
    max_tokens: usize,
    overlap_tokens: usize,
) -> Vec<DocumentChunk> {
    let max_chars = max_tokens.max(1) * CHARS_PER_TOKEN;
    let overlap_chars = (overlap_tokens * CHARS_PER_TOKEN).min(max_chars / 2);

    let mut pieces: Vec<String> = Vec::new();
    let mut current_buf = String::new();

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        if trimmed.len() > max_chars {
            if !current_buf.is_empty() {
                pieces.push(std::mem::take(&mut current_buf));
            }
            pieces.extend(hard_split(trimmed, max_chars, overlap_chars));
            continue;
        }

        let would_be = if current_buf.is_empty() {
            trimmed.len()
        } else {
            current_buf.len() + 2 + trimmed.len()
        };

        if would_be > max_chars && !current_buf.is_empty() {
            let seed = overlap_tail(&current_buf, overlap_chars);
            pieces.push(std::mem::take(&mut current_buf));
            if !seed.is_empty() && seed.len() + 2 + trimmed.len() <= max_chars {
                current_buf = seed;
            }
        }

        if !current_buf.is_empty() {
            current_buf.push_str("\n\n");
        }
        current_buf.push_str(trimmed);
    }

    if !current_buf.is_empty() {
        pieces.push(current_buf);
    }

    pieces
        .into_iter()
        .enumerate()
        .map(|(i, piece)| make_chunk(document_id, i as i64, &piece))
        .collect()
}

/// Split one oversized paragraph at whitespace, stepping back by
/// `overlap_chars` between pieces.
fn hard_split(text: &str, max_chars: usize, overlap_chars: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let limit = floor_boundary(text, (start + max_chars).min(text.len()));
        let end = if limit < text.len() {
            text[start..limit]
                .char_indices()
                .rev()
                .find(|(_, c)| c.is_whitespace())
                .map(|(pos, c)| start + pos + c.len_utf8())
                .filter(|&e| e > start)
                .unwrap_or(limit)
        } else {
            text.len()
        };

        let piece = text[start..end].trim();
        if !piece.is_empty() {
            out.push(piece.to_string());
        }
        if end >= text.len() {
            break;
        }

        // Step back for overlap, then forward to the next word start.
        let mut next = ceil_boundary(text, end.saturating_sub(overlap_chars));
        if next > 0 && !text[..next].ends_with(char::is_whitespace) {
            if let Some(pos) = text[next..end].find(char::is_whitespace) {
                next += pos;
            }
        }
        start = if next > start { next } else { end };
    }

    out
}

/// Trailing text of `buf` to repeat at the head of the next chunk,
/// starting at a word boundary.
fn overlap_tail(buf: &str, overlap_chars: usize) -> String {
    if overlap_chars == 0 || buf.len() <= overlap_chars {
        return String::new();
    }
    let cut = ceil_boundary(buf, buf.len() - overlap_chars);
    let tail = &buf[cut..];
    let tail = match tail.find(char::is_whitespace) {
        Some(pos) => &tail[pos..],
        None => tail,
    };
    tail.trim().to_string()
}

fn floor_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_boundary(s: &str, mut idx: usize) -> usize {
    while idx < s.len() && !s.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

fn make_chunk(document_id: &str, index: i64, text: &str) -> DocumentChunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());
    let now = chrono::Utc::now().timestamp();

    DocumentChunk {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        chunk_index: index,
        content: text.to_string(),
        hash,
        token_count: estimate_tokens(text),
        embedding: None,
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_text("doc1", "Hello, world!", 700, 0);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].content, "Hello, world!");
        assert_eq!(chunks[0].token_count, 4);
        assert!(chunks[0].embedding.is_none());
    }

    #[test]
    fn test_blank_text_yields_nothing() {
        assert!(chunk_text("doc1", "", 700, 0).is_empty());
        assert!(chunk_text("doc1", "\n\n   \n\n", 700, 0).is_empty());
    }

    #[test]
    fn test_multiple_paragraphs_under_limit() {
        let text = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";
        let chunks = chunk_text("doc1", text, 700, 0);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].content.contains("First paragraph."));
        assert!(chunks[0].content.contains("Third paragraph."));
    }

    #[test]
    fn test_chunk_indices_contiguous() {
        let text = (0..50)
            .map(|i| format!("Paragraph number {}.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_text("doc1", &text, 10, 2);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64, "Index mismatch at position {}", i);
            assert_eq!(c.document_id, "doc1");
        }
    }

    #[test]
    fn test_chunks_respect_bound() {
        let text = (0..40)
            .map(|i| format!("Sentence {} talks about deployment pipelines.", i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = chunk_text("doc1", &text, 20, 5);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.content.len() <= 80, "chunk too long: {}", c.content.len());
        }
    }

    #[test]
    fn test_overlap_repeats_tail_across_paragraphs() {
        let text = "alpha beta gamma delta epsilon\n\nzeta eta theta iota kappa";
        // max 10 tokens = 40 chars, overlap 3 tokens = 12 chars
        let chunks = chunk_text("doc1", text, 10, 3);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].content, "alpha beta gamma delta epsilon");
        assert!(chunks[1].content.starts_with("epsilon"));
        assert!(chunks[1].content.ends_with("kappa"));
    }

    #[test]
    fn test_overlap_in_hard_split() {
        let text = "one two three four five six seven eight nine ten eleven twelve";
        let chunks = chunk_text("doc1", text, 5, 2);
        assert!(chunks.len() > 2);
        for pair in chunks.windows(2) {
            let last_word = pair[0].content.split_whitespace().last().unwrap();
            assert!(
                pair[1].content.contains(last_word),
                "expected '{}' to carry into '{}'",
                last_word,
                pair[1].content
            );
        }
    }

    #[test]
    fn test_multibyte_text_does_not_panic() {
        let text = "ñandú ".repeat(200);
        let chunks = chunk_text("doc1", &text, 7, 2);
        assert!(!chunks.is_empty());
        let joined: String = chunks.iter().map(|c| c.content.as_str()).collect();
        assert!(joined.contains("ñandú"));
    }

    #[test]
    fn test_deterministic_content() {
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta";
        let c1 = chunk_text("doc1", text, 2, 0);
        let c2 = chunk_text("doc1", text, 2, 0);
        assert_eq!(c1.len(), c2.len());
        for (a, b) in c1.iter().zip(c2.iter()) {
            assert_eq!(a.content, b.content);
            assert_eq!(a.hash, b.hash);
            assert_eq!(a.chunk_index, b.chunk_index);
        }
    }

    #[test]
    fn test_estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }
}
