//! PDF parsing
//!
//! Extracts per-page text layers via lopdf. Pages whose text cannot be
//! extracted (scanned/image pages) are kept in the page list with
//! `text_layer_available = false` so downstream code can account for them;
//! they contribute no chunks. OCR is out of scope.

use crate::error::{Error, Result};
use lopdf::Document as PdfDocument;
use tracing::{debug, warn};

/// PDF magic bytes
pub const PDF_MAGIC: &[u8] = b"%PDF-";

/// A parsed page with its normalized text layer
#[derive(Debug, Clone)]
pub struct ParsedPage {
    /// Page number, 1-based per PDF convention
    pub page: u32,

    /// Normalized page text; empty when no text layer exists
    pub text: String,

    /// Whether a usable text layer was extracted
    pub text_layer_available: bool,
}

/// A parsed document: ordered pages
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub pages: Vec<ParsedPage>,
}

impl ParsedDocument {
    pub fn num_pages(&self) -> u32 {
        self.pages.len() as u32
    }

    /// Whether any page carries extractable text
    pub fn has_text(&self) -> bool {
        self.pages.iter().any(|p| p.text_layer_available)
    }
}

/// Check the `%PDF-` prefix. This is the upload precondition, run before any
/// hashing or storage work
pub fn is_pdf_magic(bytes: &[u8]) -> bool {
    bytes.starts_with(PDF_MAGIC)
}

/// Parse a PDF from raw bytes into per-page text.
///
/// An unloadable file or a file with zero pages is a structural error,
/// terminal for the ingestion attempt.
pub fn parse_pdf(bytes: &[u8]) -> Result<ParsedDocument> {
    let doc = PdfDocument::load_mem(bytes)
        .map_err(|e| Error::Parse(format!("failed to load PDF: {}", e)))?;

    let page_map = doc.get_pages();
    if page_map.is_empty() {
        return Err(Error::Parse("PDF contains no pages".to_string()));
    }

    let mut pages = Vec::with_capacity(page_map.len());
    for (&page_no, _) in page_map.iter() {
        match doc.extract_text(&[page_no]) {
            Ok(raw) => {
                let text = normalize_text(&raw);
                let available = !text.trim().is_empty();
                if !available {
                    debug!(page = page_no, "page has no text layer");
                }
                pages.push(ParsedPage {
                    page: page_no,
                    text: if available { text } else { String::new() },
                    text_layer_available: available,
                });
            }
            Err(e) => {
                warn!(page = page_no, error = %e, "text extraction failed for page");
                pages.push(ParsedPage {
                    page: page_no,
                    text: String::new(),
                    text_layer_available: false,
                });
            }
        }
    }

    Ok(ParsedDocument { pages })
}

/// Normalize extracted text deterministically: unify line endings, collapse
/// horizontal whitespace runs, trim line ends. Chunk hashes depend on this
/// being stable across runs.
pub fn normalize_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());

    for line in raw.replace("\r\n", "\n").replace('\r', "\n").lines() {
        let mut last_was_space = false;
        let trimmed = line.trim_end();
        for c in trimmed.chars() {
            if c == ' ' || c == '\t' {
                if !last_was_space {
                    out.push(' ');
                }
                last_was_space = true;
            } else {
                out.push(c);
                last_was_space = false;
            }
        }
        out.push('\n');
    }

    // Collapse 3+ blank lines down to a single paragraph break
    while out.contains("\n\n\n") {
        out = out.replace("\n\n\n", "\n\n");
    }

    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magic_bytes() {
        assert!(is_pdf_magic(b"%PDF-1.7\n..."));
        assert!(!is_pdf_magic(b"PK\x03\x04"));
        assert!(!is_pdf_magic(b""));
    }

    #[test]
    fn test_normalize_collapses_whitespace() {
        let raw = "Hello   world\t\tagain  \r\nSecond line\r\n\r\n\r\n\r\nThird";
        let normalized = normalize_text(raw);
        assert_eq!(normalized, "Hello world again\nSecond line\n\nThird");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let raw = "A  b\r\n\r\nc\td";
        let once = normalize_text(raw);
        let twice = normalize_text(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let result = parse_pdf(b"this is not a pdf at all");
        assert!(matches!(result, Err(Error::Parse(_))));
    }
}
