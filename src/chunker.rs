//! Overlapping chunk splitting for embedding.
//!
//! Sizes and offsets are counted in characters. Each chunk ends at the best
//! boundary found in its window (paragraph, line, sentence, clause, word) or
//! at a hard cut, and the next chunk starts exactly `overlap` characters
//! before that end, so the chunks cover the text with no gaps.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

const CHUNK_NAMESPACE: Uuid = Uuid::from_u128(0x6c2f_3b1e_9a4d_4e0b_8f7a_51c3_d2e8_0b17);

/// Separators in order of preference. The separator stays with the left chunk.
const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", "! ", "? ", "; ", ", ", " "];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Uuid,
    pub index: usize,
    pub text: String,
    /// Character offset of the first character in the source text.
    pub start: usize,
    /// Character offset one past the last character.
    pub end: usize,
}

impl Chunk {
    pub fn new(index: usize, text: impl Into<String>, start: usize, end: usize) -> Self {
        let text = text.into();
        let id = Uuid::new_v5(&CHUNK_NAMESPACE, format!("{index}:{text}").as_bytes());
        Self {
            id,
            index,
            text,
            start,
            end,
        }
    }

    pub fn char_len(&self) -> usize {
        self.end - self.start
    }
}

pub fn validate_params(chunk_size: usize, overlap: usize) -> Result<()> {
    if chunk_size == 0 || overlap >= chunk_size {
        return Err(Error::Config(format!(
            "chunk_size ({chunk_size}) must be greater than overlap ({overlap})"
        )));
    }
    Ok(())
}

/// Split `text` into chunks of at most `chunk_size` characters, overlapping
/// their predecessor by exactly `overlap` characters.
pub fn split(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<Chunk>> {
    validate_params(chunk_size, overlap)?;

    // Byte offset of every char, plus the end of the string.
    let offsets: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let total = offsets.len() - 1;
    if total == 0 {
        return Ok(Vec::new());
    }

    let min_len = (overlap + 1).max(chunk_size / 2);
    let mut chunks = Vec::new();
    let mut start = 0;

    loop {
        let hard_end = (start + chunk_size).min(total);
        let end = if hard_end == total {
            total
        } else {
            find_break(text, &offsets, start, hard_end, min_len).unwrap_or(hard_end)
        };

        let body = &text[offsets[start]..offsets[end]];
        chunks.push(Chunk::new(chunks.len(), body, start, end));

        if end == total {
            break;
        }
        // end - start > overlap always holds, so this makes progress
        start = end - overlap;
    }

    Ok(chunks)
}

/// Character position just past the preferred separator in `start..hard_end`,
/// if it leaves a chunk of at least `min_len` characters.
fn find_break(
    text: &str,
    offsets: &[usize],
    start: usize,
    hard_end: usize,
    min_len: usize,
) -> Option<usize> {
    let window = &text[offsets[start]..offsets[hard_end]];

    for sep in SEPARATORS {
        if let Some(pos) = window.rfind(sep) {
            let cut = start + window[..pos + sep.len()].chars().count();
            if cut - start >= min_len {
                return Some(cut);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_text() -> String {
        let mut text = String::new();
        for i in 0..40 {
            text.push_str(&format!(
                "Section {i}. Breast cancer screening helps early detection; mammography is common, \
                 and self-examination matters! Who is at risk? Women over forty.\n"
            ));
            if i % 5 == 4 {
                text.push('\n');
            }
        }
        text
    }

    fn reconstruct(chunks: &[Chunk], overlap: usize) -> String {
        let mut out = String::new();
        for (i, chunk) in chunks.iter().enumerate() {
            if i == 0 {
                out.push_str(&chunk.text);
            } else {
                out.extend(chunk.text.chars().skip(overlap));
            }
        }
        out
    }

    #[test]
    fn test_chunks_bounded_and_cover_source() {
        let text = sample_text();
        for (size, overlap) in [(1000, 100), (200, 50), (64, 0), (30, 29), (7, 3), (1, 0)] {
            let chunks = split(&text, size, overlap).unwrap();
            assert!(!chunks.is_empty());
            assert!(chunks.iter().all(|c| c.text.chars().count() <= size));
            assert_eq!(reconstruct(&chunks, overlap), text, "size={size} overlap={overlap}");
            assert_eq!(chunks.first().unwrap().start, 0);
            assert_eq!(chunks.last().unwrap().end, text.chars().count());
        }
    }

    #[test]
    fn test_consecutive_chunks_share_exact_overlap() {
        let text = sample_text();
        let overlap = 40;
        let chunks = split(&text, 300, overlap).unwrap();
        assert!(chunks.len() > 2);

        for pair in chunks.windows(2) {
            let prev: Vec<char> = pair[0].text.chars().collect();
            let next: Vec<char> = pair[1].text.chars().collect();
            assert_eq!(&prev[prev.len() - overlap..], &next[..overlap]);
            assert_eq!(pair[1].start, pair[0].end - overlap);
            assert_eq!(pair[1].index, pair[0].index + 1);
        }
    }

    #[test]
    fn test_split_is_deterministic() {
        let text = sample_text();
        let first = split(&text, 250, 25).unwrap();
        let second = split(&text, 250, 25).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_prefers_paragraph_boundary() {
        let text = format!("{}\n\n{}", "a".repeat(60), "b".repeat(60));
        let chunks = split(&text, 100, 10).unwrap();
        assert!(chunks[0].text.ends_with("\n\n"));
        assert_eq!(chunks[0].char_len(), 62);
    }

    #[test]
    fn test_hard_cut_without_boundaries() {
        let text = "x".repeat(25);
        let chunks = split(&text, 10, 3).unwrap();
        let starts: Vec<usize> = chunks.iter().map(|c| c.start).collect();
        assert_eq!(starts, vec![0, 7, 14, 21]);
        assert_eq!(chunks.last().unwrap().char_len(), 4);
    }

    #[test]
    fn test_multibyte_text_counts_chars() {
        let text = "Meme kanseri göğüs dokusundaki hücrelerin kontrolsüz çoğalmasıdır. ".repeat(10);
        let chunks = split(&text, 50, 10).unwrap();
        assert!(chunks.iter().all(|c| c.text.chars().count() <= 50));
        assert_eq!(reconstruct(&chunks, 10), text);
    }

    #[test]
    fn test_short_text_is_single_chunk() {
        let chunks = split("Short text", 1000, 100).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Short text");
    }

    #[test]
    fn test_empty_text_returns_empty() {
        assert!(split("", 100, 10).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_params_are_config_errors() {
        assert!(matches!(split("abc", 10, 10), Err(Error::Config(_))));
        assert!(matches!(split("abc", 10, 11), Err(Error::Config(_))));
        assert!(matches!(split("abc", 0, 0), Err(Error::Config(_))));
    }

    #[test]
    fn test_chunk_ids_stable_and_distinct() {
        let a = Chunk::new(0, "same", 0, 4);
        let b = Chunk::new(0, "same", 0, 4);
        let c = Chunk::new(1, "same", 4, 8);
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
    }
}
