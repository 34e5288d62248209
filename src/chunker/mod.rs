//! Section-aware Chunker
//!
//! Splits a [`Document`] into overlapping token windows that never cross a
//! section boundary and never cut through fenced code or a stack trace.
//!
//! # Pipeline
//! ```text
//! Document text → sections (heading trail) → blocks → pieces → windows → Chunk
//! ```
//!
//! A piece is one token plus its trailing punctuation/whitespace inside a
//! paragraph, or a whole atomic block. Windows are runs of pieces.

mod markdown;
pub mod tokenize;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

use crate::config::ChunkingConfig;
use crate::source::Document;

use markdown::{parse_sections, Block, BlockKind};
pub use markdown::ROOT_SECTION;
pub use tokenize::{chunk_id, content_hash, count_tokens, TOKENIZER_ID};

/// A retrievable span of one document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub doc_id: String,
    pub chunk_id: String,
    pub text: String,
    pub section_path: Vec<String>,
    #[serde(rename = "tokens")]
    pub token_count: usize,
    pub source_path: String,
    /// Position of the chunk within its document
    pub ordinal: usize,
    /// Other source paths whose text produced the same chunk id
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
struct Piece {
    block: usize,
    start: usize,
    end: usize,
    tokens: usize,
}

/// Token-window chunker
#[derive(Debug, Clone)]
pub struct Chunker {
    window_tokens: usize,
    overlap_tokens: usize,
    min_tail_tokens: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(&ChunkingConfig::default())
    }
}

impl Chunker {
    pub fn new(config: &ChunkingConfig) -> Self {
        let window_tokens = config.window_tokens.max(1);
        Self {
            window_tokens,
            overlap_tokens: window_tokens * config.overlap_percent as usize / 100,
            min_tail_tokens: (window_tokens as f32 * config.min_tail_fraction).ceil() as usize,
        }
    }

    /// Convenience constructor with the default tail fraction.
    pub fn with_window(window_tokens: usize, overlap_percent: u32) -> Self {
        Self::new(&ChunkingConfig {
            window_tokens,
            overlap_percent,
            ..ChunkingConfig::default()
        })
    }

    pub fn window_tokens(&self) -> usize {
        self.window_tokens
    }

    pub fn overlap_tokens(&self) -> usize {
        self.overlap_tokens
    }

    /// Chunk one document. Pure: the same document always yields the same
    /// chunks in the same order.
    pub fn chunk(&self, doc: &Document) -> Vec<Chunk> {
        let text = doc.text.as_str();
        let mut chunks = Vec::new();

        for section in parse_sections(text) {
            let pieces = build_pieces(text, &section.blocks);
            for (start, end) in self.windows(&pieces) {
                let window = &pieces[start..end];
                let tokens: usize = window.iter().map(|p| p.tokens).sum();
                if tokens == 0 {
                    continue;
                }
                let chunk_text = render(text, window);
                chunks.push(Chunk {
                    doc_id: doc.doc_id.clone(),
                    chunk_id: chunk_id(&chunk_text),
                    text: chunk_text,
                    section_path: section.path.clone(),
                    token_count: tokens,
                    source_path: doc.metadata.source_path.clone(),
                    ordinal: chunks.len(),
                    aliases: Vec::new(),
                });
            }
        }

        chunks
    }

    /// Compute `[start, end)` piece ranges for one section.
    fn windows(&self, pieces: &[Piece]) -> Vec<(usize, usize)> {
        let mut windows: Vec<(usize, usize)> = Vec::new();
        let mut start = 0;

        while start < pieces.len() {
            let mut end = start;
            let mut tokens = 0;
            while end < pieces.len() {
                let next = pieces[end].tokens;
                if tokens > 0 && tokens + next > self.window_tokens {
                    break;
                }
                tokens += next;
                end += 1;
            }
            windows.push((start, end));
            if end == pieces.len() {
                break;
            }

            // back up over trailing pieces to form the overlap
            let mut next_start = end;
            let mut overlap = 0;
            while next_start > start + 1 {
                let prev = pieces[next_start - 1].tokens;
                if overlap + prev > self.overlap_tokens {
                    break;
                }
                overlap += prev;
                next_start -= 1;
            }
            // an oversized unit must not be pushed out by its own overlap
            if overlap + pieces[end].tokens > self.window_tokens {
                next_start = end;
            }
            start = next_start;
        }

        if windows.len() > 1 {
            let last = windows[windows.len() - 1];
            let prev_end = windows[windows.len() - 2].1;
            let fresh: usize = pieces[prev_end..last.1].iter().map(|p| p.tokens).sum();
            if fresh < self.min_tail_tokens {
                windows.pop();
                if let Some(prev) = windows.last_mut() {
                    prev.1 = last.1;
                }
            }
        }

        windows
    }
}

fn build_pieces(text: &str, blocks: &[Block]) -> Vec<Piece> {
    let mut pieces = Vec::new();

    for (index, block) in blocks.iter().enumerate() {
        let body = &text[block.start..block.end];
        if block.kind.is_atomic() {
            pieces.push(Piece {
                block: index,
                start: block.start,
                end: block.end,
                tokens: count_tokens(body).max(1),
            });
            continue;
        }

        let mut current: Option<Piece> = None;
        for (offset, segment) in body.split_word_bound_indices() {
            let seg_start = block.start + offset;
            let seg_end = seg_start + segment.len();
            let is_token = tokenize::is_token(segment);
            // punctuation and whitespace attach to the preceding token
            if let Some(piece) = current.as_mut().filter(|p| !is_token || p.tokens == 0) {
                piece.end = seg_end;
                piece.tokens = piece.tokens.max(usize::from(is_token));
            } else {
                pieces.extend(current.take());
                current = Some(Piece {
                    block: index,
                    start: seg_start,
                    end: seg_end,
                    tokens: usize::from(is_token),
                });
            }
        }
        if let Some(done) = current {
            pieces.push(done);
        }
    }

    pieces
}

/// Concatenate pieces; blocks are separated by a blank line.
fn render(text: &str, pieces: &[Piece]) -> String {
    let mut out = String::new();
    let mut last_block = None;
    for piece in pieces {
        if last_block.is_some() && last_block != Some(piece.block) {
            let trimmed = out.trim_end().len();
            out.truncate(trimmed);
            out.push_str("\n\n");
        }
        out.push_str(&text[piece.start..piece.end]);
        last_block = Some(piece.block);
    }
    out.trim().to_string()
}

/// Drop repeated chunk ids, keeping the first occurrence. Source paths of
/// dropped duplicates are recorded on the survivor. Returns the number of
/// chunks dropped.
pub fn dedup_chunks(chunks: &mut Vec<Chunk>) -> usize {
    let mut first: HashMap<String, usize> = HashMap::with_capacity(chunks.len());
    let mut kept: Vec<Chunk> = Vec::with_capacity(chunks.len());
    let mut dropped = 0;

    for chunk in chunks.drain(..) {
        match first.get(&chunk.chunk_id) {
            Some(&idx) => {
                dropped += 1;
                let survivor = &mut kept[idx];
                tracing::warn!(
                    chunk_id = %chunk.chunk_id,
                    kept = %survivor.doc_id,
                    dropped = %chunk.doc_id,
                    "duplicate chunk dropped"
                );
                if survivor.source_path != chunk.source_path
                    && !survivor.aliases.contains(&chunk.source_path)
                {
                    survivor.aliases.push(chunk.source_path);
                }
            }
            None => {
                first.insert(chunk.chunk_id.clone(), kept.len());
                kept.push(chunk);
            }
        }
    }

    *chunks = kept;
    dropped
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn doc(id: &str, text: &str) -> Document {
        Document::new(id, text, format!("docs/{id}"))
    }

    fn words(prefix: &str, n: usize) -> String {
        (0..n).map(|i| format!("{prefix}{i}")).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn test_empty_text() {
        let chunker = Chunker::default();
        assert!(chunker.chunk(&doc("a.md", "")).is_empty());
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunker = Chunker::default();
        let chunks = chunker.chunk(&doc("a.md", "Short text."));

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Short text.");
        assert_eq!(chunks[0].token_count, 2);
        assert_eq!(chunks[0].section_path, vec![ROOT_SECTION]);
        assert_eq!(chunks[0].chunk_id, chunk_id("Short text."));
    }

    #[test]
    fn test_windows_overlap() {
        let chunker = Chunker::with_window(50, 10);
        let text = format!("# Doc\n{}", words("w", 90));
        let chunks = chunker.chunk(&doc("a.md", &text));

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].token_count, 50);
        assert!(chunks[0].text.starts_with("# Doc\n\nw0 "));
        // 5 tokens of overlap carried into the second window
        assert!(chunks[1].text.starts_with("w44 w45"));
        assert!(chunks[1].text.ends_with("w89"));
        assert_eq!(chunks[1].token_count, 46);
    }

    #[test]
    fn test_small_tail_merges_into_previous() {
        let chunker = Chunker::with_window(50, 0);
        let chunks = chunker.chunk(&doc("a.md", &words("t", 55)));

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].token_count, 55);
        assert!(chunks[0].text.ends_with("t54"));
    }

    #[test]
    fn test_tail_does_not_merge_across_sections() {
        let chunker = Chunker::with_window(50, 0);
        let text = format!("# A\n{}\n# B\nshort tail", words("a", 40));
        let chunks = chunker.chunk(&doc("a.md", &text));

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].section_path, vec!["A"]);
        assert_eq!(chunks[1].section_path, vec!["B"]);
        assert_eq!(chunks[1].text, "# B\n\nshort tail");
    }

    #[test]
    fn test_code_fence_is_never_split() {
        let chunker = Chunker::with_window(20, 10);
        let code: String = (0..40).map(|i| format!("let v{i} = {i};\n")).collect();
        let text = format!("intro words here\n\n```rust\n{code}```\n\nclosing words");
        let chunks = chunker.chunk(&doc("a.md", &text));

        let with_fence: Vec<&Chunk> = chunks.iter().filter(|c| c.text.contains("```")).collect();
        assert_eq!(with_fence.len(), 1);
        let fence_chunk = with_fence[0];
        assert!(fence_chunk.text.contains("let v0 = 0;"));
        assert!(fence_chunk.text.contains("let v39 = 39;"));
        assert_eq!(fence_chunk.text.matches("```").count(), 2);
        assert!(fence_chunk.token_count > 20);
    }

    #[test]
    fn test_stack_trace_is_never_split() {
        let chunker = Chunker::with_window(10, 20);
        let frames: String = (0..12)
            .map(|i| format!("    at frame{i} (module{i}.js:{i}:1)\n"))
            .collect();
        let text = format!("Crash report follows\n{frames}\nThe end.");
        let chunks = chunker.chunk(&doc("a.md", &text));

        let holders: Vec<&Chunk> = chunks.iter().filter(|c| c.text.contains("at frame")).collect();
        assert_eq!(holders.len(), 1);
        assert!(holders[0].text.contains("frame0"));
        assert!(holders[0].text.contains("frame11"));
    }

    #[test]
    fn test_chunks_record_document_fields() {
        let chunker = Chunker::default();
        let chunks = chunker.chunk(&doc("guides/x.md", "# Title\ncontent"));
        assert_eq!(chunks[0].doc_id, "guides/x.md");
        assert_eq!(chunks[0].source_path, "docs/guides/x.md");
        assert_eq!(chunks[0].ordinal, 0);
    }

    #[test]
    fn test_dedup_keeps_first_and_records_alias() {
        let chunker = Chunker::default();
        let mut chunks = chunker.chunk(&doc("a.md", "shared paragraph text"));
        chunks.extend(chunker.chunk(&doc("b.md", "shared paragraph text")));
        chunks.extend(chunker.chunk(&doc("c.md", "unique text")));

        let dropped = dedup_chunks(&mut chunks);

        assert_eq!(dropped, 1);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].doc_id, "a.md");
        assert_eq!(chunks[0].aliases, vec!["docs/b.md"]);
    }

    #[test]
    fn test_chunk_ids_stable_across_unrelated_edits() {
        let chunker = Chunker::with_window(50, 10);
        let before = chunker.chunk(&doc("a.md", "# One\nalpha beta\n# Two\ngamma delta"));
        let after = chunker.chunk(&doc("a.md", "# One\nalpha beta\n# Two\ngamma delta epsilon"));

        assert_eq!(before[0].chunk_id, after[0].chunk_id);
        assert_ne!(before[1].chunk_id, after[1].chunk_id);
    }

    proptest! {
        #[test]
        fn prop_chunking_is_deterministic(text in "[a-z #\n`.]{0,400}", window in 5usize..60, overlap in 0u32..40) {
            let chunker = Chunker::with_window(window, overlap);
            let d = doc("p.md", &text);
            prop_assert_eq!(chunker.chunk(&d), chunker.chunk(&d));
        }

        #[test]
        fn prop_every_token_is_covered(n in 1usize..300, window in 5usize..60, overlap in 0u32..40) {
            let chunker = Chunker::with_window(window, overlap);
            let text = words("x", n);
            let chunks = chunker.chunk(&doc("p.md", &text));
            for i in 0..n {
                let needle = format!("x{i}");
                let covered = chunks.iter().any(|c| c.text.split(' ').any(|w| w == needle));
                prop_assert!(covered, "token {} missing", needle);
            }
        }
    }
}
