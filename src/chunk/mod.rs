//! Deterministic document chunking
//!
//! Splits parsed pages into ordered, bounded chunks. For a fixed input and
//! fixed `CHUNKER_VERSION` the output is bit-identical across runs: chunk
//! count, boundaries, text, and hashes. That determinism is what makes
//! re-ingestion idempotent and chunk identity a pure function of
//! `(doc_id, chunk_index)`.
//!
//! Boundary policy: pages first, then paragraph/sentence breaks, falling
//! back to a fixed-size window with overlap when no structural break lands
//! inside the chunk budget. Chunks never span pages.

mod boundaries;

pub use boundaries::*;

use crate::config::ChunkConfig;
use crate::hash::hash_text;
use crate::parse::ParsedDocument;

/// Chunking algorithm version. Bump when boundary policy changes so existing
/// documents become eligible for reprocessing.
pub const CHUNKER_VERSION: &str = "v1";

/// A chunk of document text with positional metadata
#[derive(Debug, Clone, PartialEq)]
pub struct DocChunk {
    /// Order within the document, 0-based
    pub chunk_index: usize,

    /// First page this chunk spans (1-based)
    pub page_start: u32,

    /// Last page this chunk spans (1-based)
    pub page_end: u32,

    /// Character start offset within the page's normalized text
    pub char_start: usize,

    /// Character end offset within the page's normalized text
    pub char_end: usize,

    /// The chunk text
    pub text: String,

    /// Blake3 hash of the chunk text, used to skip re-embedding unchanged
    /// content across reprocessing
    pub text_hash: String,
}

/// Chunk a parsed document into an ordered sequence.
///
/// Pages without a text layer and empty pages contribute zero chunks; that
/// is a valid outcome, not an error.
pub fn chunk_document(doc: &ParsedDocument, config: &ChunkConfig) -> Vec<DocChunk> {
    let mut chunks = Vec::new();
    let mut chunk_index = 0usize;

    for page in &doc.pages {
        if !page.text_layer_available || page.text.trim().is_empty() {
            continue;
        }
        chunk_page(page.page, &page.text, config, &mut chunk_index, &mut chunks);
    }

    chunks
}

/// Chunk a single page's text
fn chunk_page(
    page: u32,
    text: &str,
    config: &ChunkConfig,
    chunk_index: &mut usize,
    out: &mut Vec<DocChunk>,
) {
    let break_points = find_break_points(text);
    let mut current_start = 0usize;

    while current_start < text.len() {
        current_start = ensure_char_boundary(text, current_start);
        if current_start >= text.len() {
            break;
        }

        let (chunk_end, structural) = if current_start + config.max_chars >= text.len() {
            (text.len(), true)
        } else {
            find_best_break(text, current_start, config.max_chars, &break_points)
        };

        let chunk_end = ensure_char_boundary(text, chunk_end);
        if chunk_end <= current_start {
            // Degenerate window (e.g. a long multi-byte run); skip forward
            current_start = ensure_char_boundary(text, current_start + config.max_chars.max(1));
            continue;
        }

        let window = &text[current_start..chunk_end];
        let chunk_text = window.trim();
        // Offsets point at the trimmed span so `page_text[start..end]`
        // reproduces the stored text exactly
        let text_start = current_start + (window.len() - window.trim_start().len());
        let text_end = text_start + chunk_text.len();

        // Drop tiny fragments unless this is the page's final span
        let keep = !chunk_text.is_empty()
            && (chunk_text.len() >= config.min_chars || chunk_end >= text.len());

        if keep {
            out.push(DocChunk {
                chunk_index: *chunk_index,
                page_start: page,
                page_end: page,
                char_start: text_start,
                char_end: text_end,
                text: chunk_text.to_string(),
                text_hash: hash_text(chunk_text),
            });
            *chunk_index += 1;
        }

        if chunk_end >= text.len() {
            break;
        }

        // Overlap only applies to forced window splits; a structural break
        // is a clean seam
        current_start = if structural || chunk_end <= config.overlap_chars {
            chunk_end
        } else {
            ensure_char_boundary(text, chunk_end - config.overlap_chars)
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::{ParsedDocument, ParsedPage};

    fn page(n: u32, text: &str) -> ParsedPage {
        ParsedPage {
            page: n,
            text: text.to_string(),
            text_layer_available: !text.trim().is_empty(),
        }
    }

    fn test_config() -> ChunkConfig {
        ChunkConfig {
            max_chars: 200,
            overlap_chars: 30,
            min_chars: 20,
        }
    }

    #[test]
    fn test_short_page_single_chunk() {
        let doc = ParsedDocument {
            pages: vec![page(1, "A short page with a little text on it.")],
        };
        let chunks = chunk_document(&doc, &test_config());

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].page_start, 1);
        assert_eq!(chunks[0].page_end, 1);
    }

    #[test]
    fn test_deterministic_across_runs() {
        let text = "Sentence one is here. Sentence two follows it. ".repeat(40);
        let doc = ParsedDocument {
            pages: vec![page(1, &text), page(2, &text)],
        };
        let config = test_config();

        let a = chunk_document(&doc, &config);
        let b = chunk_document(&doc, &config);

        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x, y);
        }
        // Indexes are contiguous document order
        for (i, chunk) in a.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i);
        }
    }

    #[test]
    fn test_empty_and_scanned_pages_produce_no_chunks() {
        let doc = ParsedDocument {
            pages: vec![
                page(1, ""),
                ParsedPage {
                    page: 2,
                    text: String::new(),
                    text_layer_available: false,
                },
                page(3, "Only this page has text, enough to keep."),
            ],
        };
        let chunks = chunk_document(&doc, &test_config());

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].page_start, 3);
    }

    #[test]
    fn test_oversized_paragraph_is_force_split() {
        // One paragraph with no sentence breaks, far over budget
        let text = "word".repeat(300);
        let doc = ParsedDocument {
            pages: vec![page(1, &text)],
        };
        let config = test_config();
        let chunks = chunk_document(&doc, &config);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.text.len() <= config.max_chars);
        }
        // Forced splits carry overlap: consecutive windows share text
        assert!(chunks[0].char_end > chunks[1].char_start);
    }

    #[test]
    fn test_chunks_respect_page_boundaries() {
        let text = "Page text that is long enough to survive the minimum. ".repeat(10);
        let doc = ParsedDocument {
            pages: vec![page(1, &text), page(2, &text)],
        };
        let chunks = chunk_document(&doc, &test_config());

        for chunk in &chunks {
            assert_eq!(chunk.page_start, chunk.page_end);
        }
        assert!(chunks.iter().any(|c| c.page_start == 1));
        assert!(chunks.iter().any(|c| c.page_start == 2));
    }

    #[test]
    fn test_offsets_slice_back_to_chunk_text() {
        // Whitespace padding around paragraphs must not leak into offsets:
        // slicing the page by [char_start, char_end) reproduces the text
        let text = format!(
            "   Leading spaces before this paragraph.\n\n{}\n\n   Trailing paragraph here.   ",
            "A middle paragraph long enough to stand alone as its own chunk. ".repeat(4),
        );
        let doc = ParsedDocument {
            pages: vec![page(1, &text)],
        };
        let chunks = chunk_document(&doc, &test_config());

        assert!(!chunks.is_empty());
        for chunk in &chunks {
            assert_eq!(&text[chunk.char_start..chunk.char_end], chunk.text);
        }
    }

    #[test]
    fn test_text_hash_tracks_content() {
        let doc = ParsedDocument {
            pages: vec![page(1, "Stable content for hashing, long enough to keep.")],
        };
        let chunks = chunk_document(&doc, &test_config());
        assert_eq!(chunks[0].text_hash, hash_text(&chunks[0].text));
    }
}
