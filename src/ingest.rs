//! Ingestion orchestrator: parse → normalize → segment → chunk → persist.
//!
//! Idempotent on content: the SHA-1 of the original bytes is the dedup key, so
//! re-ingesting identical bytes returns the existing work untouched.
//! `resegment_work` reuses the stored normalized text and atomically rewrites
//! only the scene/chunk layers.

use std::path::Path;

use serde_json::{Map, Value, json};
use sha1::{Digest, Sha1};

use crate::chunk::make_chunks;
use crate::error::{IngestError, IngestResult};
use crate::normalize::normalize_text;
use crate::parser::{self, extension_of};
use crate::persist::{
    self, NewWork, Sizes, ensure_schema, find_existing_work, open_db, persist_work_and_children,
    replace_segmentation,
};
use crate::profile::get_profile;
use crate::segment::segment_to_scenes;

/// Options for a single ingest call.
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// Title stored on the work (otherwise NULL).
    pub title: Option<String>,
    /// Author stored on the work (otherwise NULL).
    pub author: Option<String>,
    /// Chunk window override; falls back to the profile's rules.
    pub window_chars: Option<usize>,
    /// Chunk stride override; falls back to the profile's rules.
    pub stride_chars: Option<usize>,
    /// Segmentation profile name (unknown names resolve to `default`).
    pub profile: Option<String>,
    /// Extra key/values recorded into the ingest run parameters.
    pub run_params: Map<String, Value>,
}

/// Result of a successful ingest.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub work_id: String,
    pub content_sha1: String,
    pub sizes: Sizes,
}

/// Result of a successful resegmentation.
#[derive(Debug, Clone)]
pub struct ResegmentOutcome {
    pub work_id: String,
    pub sizes: Sizes,
}

/// Hex SHA-1 over the original file bytes: the content dedup key.
pub fn compute_sha1(raw: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(raw);
    hex::encode(hasher.finalize())
}

/// Ingest one file into the database at `db_path`.
///
/// Steps: parse, digest, normalize, ensure schema, dedup lookup, segment,
/// chunk, persist in a single transaction. When a work with the same content
/// digest already exists, returns its id with recomputed sizes and leaves the
/// stored segmentation untouched.
pub fn ingest_file(db_path: &Path, path: &Path, opts: &IngestOptions) -> IngestResult<IngestOutcome> {
    let parsed = parser::parse_path(path)?;
    let content_sha1 = compute_sha1(&parsed.raw);
    let norm = normalize_text(&parsed.text);

    let mut conn = open_db(db_path).map_err(IngestError::Persist)?;
    ensure_schema(&conn).map_err(IngestError::Persist)?;

    if let Some(existing) =
        find_existing_work(&conn, Some(&content_sha1), None).map_err(IngestError::Persist)?
    {
        let sizes = persist::sizes_for_work(&conn, &existing).map_err(IngestError::Persist)?;
        tracing::debug!(work_id = %existing, sha1 = %content_sha1, "dedup hit, skipping ingest");
        return Ok(IngestOutcome {
            work_id: existing,
            content_sha1,
            sizes,
        });
    }

    let profile = get_profile(opts.profile.as_deref());
    let scenes = segment_to_scenes(&norm, profile);
    let chunks = make_chunks(&scenes, opts.window_chars, opts.stride_chars, profile);

    let mut run_meta = Map::new();
    run_meta.insert(
        "profile".into(),
        json!(opts.profile.as_deref().unwrap_or("default")),
    );
    run_meta.insert("parser".into(), json!(parsed.meta.parser));
    run_meta.insert("encoding".into(), json!(parsed.meta.encoding));
    run_meta.insert("source_ext".into(), json!(extension_of(path)));
    for (key, value) in &opts.run_params {
        run_meta.insert(key.clone(), value.clone());
    }

    let source = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| path.display().to_string());

    let work = NewWork {
        title: opts.title.as_deref(),
        author: opts.author.as_deref(),
        source: Some(&source),
        license: None,
        raw_text: &parsed.raw,
        norm_text: &norm,
        content_sha1: Some(&content_sha1),
    };
    let work_id =
        persist_work_and_children(&mut conn, &work, &scenes, &chunks, &Value::Object(run_meta))
            .map_err(IngestError::Persist)?;

    let sizes = Sizes {
        chars: norm.chars().count() as u64,
        scenes: scenes.len() as u64,
        chunks: chunks.len() as u64,
    };
    tracing::info!(
        work_id = %work_id,
        sha1 = %content_sha1,
        chars = sizes.chars,
        scenes = sizes.scenes,
        chunks = sizes.chunks,
        "ingested"
    );
    Ok(IngestOutcome {
        work_id,
        content_sha1,
        sizes,
    })
}

/// Re-run segmentation and chunking for a stored work.
///
/// Loads the stored normalized text, applies the profile and window/stride,
/// and replaces the scene/chunk rows in one transaction. The work row itself
/// is untouched.
pub fn resegment_work(
    db_path: &Path,
    work_id: &str,
    profile_name: Option<&str>,
    window_chars: Option<usize>,
    stride_chars: Option<usize>,
) -> IngestResult<ResegmentOutcome> {
    let mut conn = open_db(db_path).map_err(IngestError::Persist)?;
    ensure_schema(&conn).map_err(IngestError::Persist)?;

    let norm = persist::load_norm_text(&conn, work_id)
        .map_err(IngestError::Persist)?
        .ok_or_else(|| IngestError::WorkNotFound {
            id: work_id.to_string(),
        })?;

    let profile = get_profile(profile_name);
    let scenes = segment_to_scenes(&norm, profile);
    let chunks = make_chunks(&scenes, window_chars, stride_chars, profile);

    replace_segmentation(&mut conn, work_id, &norm, &scenes, &chunks)
        .map_err(IngestError::Persist)?;

    let sizes = Sizes {
        chars: norm.chars().count() as u64,
        scenes: scenes.len() as u64,
        chunks: chunks.len() as u64,
    };
    tracing::info!(work_id = %work_id, scenes = sizes.scenes, chunks = sizes.chunks, "resegmented");
    Ok(ResegmentOutcome {
        work_id: work_id.to_string(),
        sizes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha1_matches_known_vector() {
        // sha1("abc")
        assert_eq!(
            compute_sha1(b"abc"),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let db = dir.path().join("t.db");
        let input = dir.path().join("image.png");
        std::fs::write(&input, b"not text").unwrap();

        let err = ingest_file(&db, &input, &IngestOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            IngestError::Parse(crate::error::ParseError::UnsupportedFileType { .. })
        ));
    }

    #[test]
    fn resegment_of_unknown_work_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let db = dir.path().join("t.db");
        let err = resegment_work(&db, "no-such-id", None, None, None).unwrap_err();
        assert!(matches!(err, IngestError::WorkNotFound { .. }));
    }
}
