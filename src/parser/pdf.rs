//! PDF parser using the `pdf-extract` crate.
//!
//! Text is extracted page by page and joined with a literal `[[PAGE_BREAK]]`
//! sentinel line, so page structure survives normalization (the sentinel
//! contains no CR, LF, or NUL) and the `pdf_pages` profile can split on it.

use std::path::Path;

use crate::error::{ParseError, ParserResult};
use crate::parser::{DocumentParser, ParseMeta, ParseOutput, read_bytes};

/// Sentinel inserted between extracted pages, on its own line.
pub const PAGE_BREAK_TOKEN: &str = "[[PAGE_BREAK]]";

/// PDF document parser backed by `pdf-extract`.
#[derive(Debug)]
pub struct PdfParser;

impl DocumentParser for PdfParser {
    fn name(&self) -> &'static str {
        "pdf"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &[".pdf"]
    }

    fn parse(&self, path: &Path) -> ParserResult<ParseOutput> {
        let raw = read_bytes(path)?;

        // One extraction pass; each page is right-trimmed before joining.
        let pages: Vec<String> = pdf_extract::extract_text_from_mem_by_pages(&raw)
            .map_err(|e| ParseError::Malformed {
                format: "pdf".into(),
                path: path.display().to_string(),
                message: e.to_string(),
            })?
            .into_iter()
            .map(|page| page.trim_end().to_string())
            .collect();

        let text = pages.join(&format!("\n{PAGE_BREAK_TOKEN}\n"));
        let meta = ParseMeta {
            parser: self.name(),
            bytes: raw.len(),
            pages: Some(pages.len()),
            page_break_token: Some(PAGE_BREAK_TOKEN),
            ..Default::default()
        };
        Ok(ParseOutput { raw, text, meta })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_survives_normalization() {
        assert_eq!(
            crate::normalize::normalize_text(PAGE_BREAK_TOKEN),
            PAGE_BREAK_TOKEN
        );
    }

    #[test]
    fn non_pdf_bytes_are_a_parse_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("fake.pdf");
        std::fs::write(&path, b"This is not a PDF").unwrap();

        let err = PdfParser.parse(&path).unwrap_err();
        assert!(matches!(err, ParseError::Malformed { format, .. } if format == "pdf"));
    }
}
