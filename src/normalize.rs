//! Text normalization: encoding detection and offset-stable cleanup.
//!
//! Scene and chunk spans reference codepoint offsets into the normalized text,
//! so normalization keeps every surviving character in place: CRLF/CR become a
//! single LF and NULs are dropped, nothing else is touched. No smart-quote
//! folding, no whitespace collapsing.

use chardetng::EncodingDetector;
use encoding_rs::{Encoding, UTF_8};

/// Best-effort statistical encoding detection.
///
/// Empty input is reported as UTF-8. Otherwise the detector picks the most
/// likely encoding; pure-ASCII and valid UTF-8 inputs come back as UTF-8,
/// single-byte Latin text typically as windows-1252.
pub fn detect_encoding(raw: &[u8]) -> &'static Encoding {
    if raw.is_empty() {
        return UTF_8;
    }
    let mut detector = EncodingDetector::new();
    detector.feed(raw, true);
    detector.guess(None, true)
}

/// Decode raw bytes with the detected encoding, replacing malformed sequences.
///
/// Returns the decoded text and the name of the encoding actually used.
pub fn decode_detected(raw: &[u8]) -> (String, &'static str) {
    let encoding = detect_encoding(raw);
    let (text, used, _had_errors) = encoding.decode(raw);
    (text.into_owned(), used.name())
}

/// Normalize line endings and strip NULs, preserving all other characters.
///
/// CRLF and lone CR both become LF; U+0000 is removed. Offsets into the
/// returned string are the durable reference used by scenes and chunks.
pub fn normalize_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                out.push('\n');
            }
            '\0' => {}
            other => out.push(other),
        }
    }
    out
}

/// Slice `text` by codepoint offsets, clamping `start`/`end` into range.
///
/// Guarantees `start <= end` after clamping; never panics on multi-byte
/// characters or out-of-range spans.
pub fn slice_chars(text: &str, start: usize, end: usize) -> &str {
    let total = text.chars().count();
    let start = start.min(total);
    let end = end.clamp(start, total);
    if start == end {
        return "";
    }

    let mut byte_start = text.len();
    let mut byte_end = text.len();
    for (count, (offset, _)) in text.char_indices().enumerate() {
        if count == start {
            byte_start = offset;
        }
        if count == end {
            byte_end = offset;
            break;
        }
    }
    &text[byte_start..byte_end]
}
