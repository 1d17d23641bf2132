//! DOCX parser using the `docx-rs` crate.
//!
//! Walks the document body collecting run text; paragraphs join with single
//! newlines. An optional heuristic (enabled via `DOCX_STRIP_HF`) drops lines
//! that look like exported header/footer noise: bare page numbers, `Page N`,
//! `N/M`, or lines opening with "header"/"footer".

use std::path::Path;

use docx_rs::{
    DocumentChild, Paragraph, ParagraphChild, RunChild, Table, TableCellContent, TableChild,
    TableRowChild, read_docx,
};

use crate::error::{ParseError, ParserResult};
use crate::parser::{DocumentParser, ParseMeta, ParseOutput, read_bytes};

/// DOCX document parser backed by `docx-rs`.
#[derive(Debug)]
pub struct DocxParser;

impl DocumentParser for DocxParser {
    fn name(&self) -> &'static str {
        "docx"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &[".docx"]
    }

    fn parse(&self, path: &Path) -> ParserResult<ParseOutput> {
        let raw = read_bytes(path)?;

        let document = read_docx(&raw).map_err(|e| ParseError::Malformed {
            format: "docx".into(),
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        let mut lines: Vec<String> = Vec::new();
        for child in &document.document.children {
            match child {
                DocumentChild::Paragraph(paragraph) => {
                    lines.push(paragraph_text(paragraph));
                }
                DocumentChild::Table(table) => {
                    collect_table(table, &mut lines);
                }
                _ => {}
            }
        }
        let mut text = lines.join("\n");

        if strip_hf_enabled() {
            text = strip_headers_footers(&text);
        }

        let mut warnings = Vec::new();
        if text.trim().is_empty() {
            warnings.push("docx extraction returned empty text".to_string());
        }

        let meta = ParseMeta {
            parser: self.name(),
            bytes: raw.len(),
            warnings,
            ..Default::default()
        };
        Ok(ParseOutput { raw, text, meta })
    }
}

fn strip_hf_enabled() -> bool {
    std::env::var("DOCX_STRIP_HF")
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

fn paragraph_text(paragraph: &Paragraph) -> String {
    let mut out = String::new();
    collect_paragraph_children(&paragraph.children, &mut out);
    out
}

fn collect_paragraph_children(children: &[ParagraphChild], out: &mut String) {
    for child in children {
        match child {
            ParagraphChild::Run(run) => {
                for rc in &run.children {
                    match rc {
                        RunChild::Text(t) => out.push_str(&t.text),
                        RunChild::Tab(_) => out.push('\t'),
                        RunChild::Break(_) => out.push('\n'),
                        _ => {}
                    }
                }
            }
            ParagraphChild::Hyperlink(link) => {
                collect_paragraph_children(&link.children, out);
            }
            _ => {}
        }
    }
}

fn collect_table(table: &Table, lines: &mut Vec<String>) {
    for row in &table.rows {
        let TableChild::TableRow(row) = row;
        for cell in &row.cells {
            let TableRowChild::TableCell(cell) = cell;
            for content in &cell.children {
                match content {
                    TableCellContent::Paragraph(paragraph) => {
                        lines.push(paragraph_text(paragraph));
                    }
                    TableCellContent::Table(nested) => collect_table(nested, lines),
                    _ => {}
                }
            }
        }
    }
}

/// Drop common header/footer noise lines: pure page numbers, `Page N`,
/// `N/M` pairs, and lines opening with "header" or "footer".
fn strip_headers_footers(text: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for line in text.lines() {
        let s = line.trim();
        if s.is_empty() {
            out.push(line);
            continue;
        }
        if s.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        let lower = s.to_lowercase();
        if let Some(rest) = lower.strip_prefix("page ") {
            if !rest.trim().is_empty() && rest.trim().chars().all(|c| c.is_ascii_digit()) {
                continue;
            }
        }
        if s.contains('/') {
            let parts: Vec<&str> = s.split('/').map(str::trim).collect();
            if parts.len() == 2
                && parts
                    .iter()
                    .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
            {
                continue;
            }
        }
        if lower.starts_with("header") || lower.starts_with("footer") {
            continue;
        }
        out.push(line);
    }
    out.join("\n")
}
