//! Document parser trait and extension registry.
//!
//! Each supported format (txt/md, PDF, DOCX) implements `DocumentParser`. The
//! registry is an explicit capability table keyed by lowercased extension,
//! built once at startup; `for_path()` resolves a parser or reports an
//! unsupported file type.

pub mod docx;
pub mod pdf;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, LazyLock};

use serde::Serialize;

use crate::error::{ParseError, ParserResult};
use crate::normalize::decode_detected;

/// Parser-reported metadata, recorded into the ingest run parameters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ParseMeta {
    pub parser: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    pub bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pages: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_break_token: Option<&'static str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Output of any file parser: original bytes, extracted text, metadata.
#[derive(Debug, Clone)]
pub struct ParseOutput {
    pub raw: Vec<u8>,
    pub text: String,
    pub meta: ParseMeta,
}

/// Trait for format-specific document parsers.
pub trait DocumentParser: std::fmt::Debug + Send + Sync {
    /// Short parser name recorded in run metadata.
    fn name(&self) -> &'static str;

    /// Extensions this parser handles, lowercased with leading dot.
    fn extensions(&self) -> &'static [&'static str];

    /// Parse the file at `path` into raw bytes + extracted text.
    fn parse(&self, path: &Path) -> ParserResult<ParseOutput>;
}

/// Explicit extension → parser table.
pub struct ParserRegistry {
    by_ext: BTreeMap<String, Arc<dyn DocumentParser>>,
}

impl ParserRegistry {
    /// Build the registry of built-in parsers.
    pub fn builtin() -> Self {
        let mut registry = Self {
            by_ext: BTreeMap::new(),
        };
        registry.register(Arc::new(TxtMdParser));
        registry.register(Arc::new(pdf::PdfParser));
        registry.register(Arc::new(docx::DocxParser));
        registry
    }

    /// Register a parser under all of its extensions.
    pub fn register(&mut self, parser: Arc<dyn DocumentParser>) {
        for ext in parser.extensions() {
            self.by_ext.insert(ext.to_lowercase(), Arc::clone(&parser));
        }
    }

    /// Resolve the parser for a path by lowercased extension.
    pub fn for_path(&self, path: &Path) -> ParserResult<&dyn DocumentParser> {
        let ext = extension_of(path);
        self.by_ext
            .get(&ext)
            .map(|p| p.as_ref())
            .ok_or(ParseError::UnsupportedFileType { ext })
    }

    /// All registered extensions, sorted.
    pub fn extensions(&self) -> Vec<String> {
        self.by_ext.keys().cloned().collect()
    }
}

/// The lowercased, dot-prefixed extension of `path` (empty when absent).
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_lowercase()))
        .unwrap_or_default()
}

static REGISTRY: LazyLock<ParserRegistry> = LazyLock::new(ParserRegistry::builtin);

/// The process-wide built-in registry.
pub fn registry() -> &'static ParserRegistry {
    &REGISTRY
}

/// Convenience: resolve a parser for `path` and run it.
pub fn parse_path(path: &Path) -> ParserResult<ParseOutput> {
    registry().for_path(path)?.parse(path)
}

fn read_bytes(path: &Path) -> ParserResult<Vec<u8>> {
    std::fs::read(path).map_err(|e| ParseError::Io {
        path: path.display().to_string(),
        source: e,
    })
}

// ---------------------------------------------------------------------------
// txt / md
// ---------------------------------------------------------------------------

/// Plain text and markdown: detect the encoding, decode with replacement.
#[derive(Debug)]
pub struct TxtMdParser;

impl DocumentParser for TxtMdParser {
    fn name(&self) -> &'static str {
        "txtmd"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &[".txt", ".md"]
    }

    fn parse(&self, path: &Path) -> ParserResult<ParseOutput> {
        let raw = read_bytes(path)?;
        let (text, encoding) = decode_detected(&raw);
        let meta = ParseMeta {
            parser: self.name(),
            encoding: Some(encoding.to_string()),
            bytes: raw.len(),
            ext: Some(extension_of(path)),
            ..Default::default()
        };
        Ok(ParseOutput { raw, text, meta })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn registry_lists_builtin_extensions() {
        assert_eq!(
            registry().extensions(),
            vec![".docx", ".md", ".pdf", ".txt"]
        );
    }

    #[test]
    fn extension_is_lowercased() {
        let registry = ParserRegistry::builtin();
        let parser = registry.for_path(Path::new("NOTES.TXT")).unwrap();
        assert_eq!(parser.name(), "txtmd");
    }

    #[test]
    fn unknown_extension_is_unsupported() {
        let registry = ParserRegistry::builtin();
        let err = registry.for_path(Path::new("image.png")).unwrap_err();
        assert!(matches!(err, ParseError::UnsupportedFileType { ext } if ext == ".png"));
    }

    #[test]
    fn missing_extension_is_unsupported() {
        let registry = ParserRegistry::builtin();
        let err = registry.for_path(Path::new("Makefile")).unwrap_err();
        assert!(matches!(err, ParseError::UnsupportedFileType { ext } if ext.is_empty()));
    }

    #[test]
    fn txt_parse_records_meta() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("doc.txt");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all("Hello\n\nWorld".as_bytes()).unwrap();

        let out = parse_path(&path).unwrap();
        assert_eq!(out.text, "Hello\n\nWorld");
        assert_eq!(out.meta.parser, "txtmd");
        assert_eq!(out.meta.encoding.as_deref(), Some("UTF-8"));
        assert_eq!(out.meta.bytes, 12);
        assert_eq!(out.meta.ext.as_deref(), Some(".txt"));
    }

    #[test]
    fn txt_parse_decodes_windows_1252() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("latin.txt");
        std::fs::write(&path, b"caf\xe9 cr\xe8me, d\xe9j\xe0 vu, \xe7a alors").unwrap();

        let out = parse_path(&path).unwrap();
        assert!(out.text.contains("café"));
        assert_eq!(out.meta.encoding.as_deref(), Some("windows-1252"));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = parse_path(Path::new("/nonexistent/story.txt")).unwrap_err();
        assert!(matches!(err, ParseError::Io { .. }));
    }
}
