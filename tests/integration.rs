//! End-to-end integration tests for the ingestion pipeline.
//!
//! These exercise the full path from a file on disk through parsing,
//! segmentation, chunking, and persistence, validating the layer invariants,
//! content-digest idempotency, resegmentation, and the inbox watcher.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use scriptorium::chunk::make_chunks;
use scriptorium::ingest::{IngestOptions, ingest_file, resegment_work};
use scriptorium::persist::open_db;
use scriptorium::profile::{get_profile, profile_names};
use scriptorium::segment::segment_to_scenes;
use scriptorium::watcher::{WatcherConfig, run_watcher};

const STORY: &str = "The quick brown fox jumps over the lazy dog in the morning light.\n\
\n\
A second paragraph follows, comfortably longer than the default minimum scene length for this profile.\n\
\n\
And a third paragraph closes the little story with enough characters to stand on its own as well.\n";

fn ingest_story(db: &Path, dir: &Path, name: &str, body: &str) -> scriptorium::ingest::IngestOutcome {
    let file = dir.join(name);
    std::fs::write(&file, body).unwrap();
    ingest_file(db, &file, &IngestOptions::default()).unwrap()
}

#[test]
fn end_to_end_ingest_holds_layer_invariants() {
    let dir = tempfile::TempDir::new().unwrap();
    let db = dir.path().join("works.db");

    let res = ingest_story(&db, dir.path(), "story.txt", STORY);
    assert_eq!(res.sizes.chars, STORY.chars().count() as u64);
    assert_eq!(res.sizes.scenes, 3);
    assert!(res.sizes.chunks >= 3);

    let conn = open_db(&db).unwrap();

    // Work row: char_count matches, digest recorded.
    let (char_count, sha1): (i64, Option<String>) = conn
        .query_row(
            "SELECT char_count, content_sha1 FROM work WHERE id = ?",
            [&res.work_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .unwrap();
    assert_eq!(char_count as u64, res.sizes.chars);
    assert_eq!(sha1.as_deref(), Some(res.content_sha1.as_str()));

    // Scenes: dense indices, ordered, non-overlapping, in range.
    let mut stmt = conn
        .prepare("SELECT idx, char_start, char_end FROM scene WHERE work_id = ? ORDER BY idx")
        .unwrap();
    let scenes: Vec<(i64, i64, i64)> = stmt
        .query_map([&res.work_id], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(scenes.len(), 3);
    for (i, (idx, start, end)) in scenes.iter().enumerate() {
        assert_eq!(*idx, i as i64);
        assert!(0 <= *start && start < end && *end <= char_count);
        if i > 0 {
            assert!(scenes[i - 1].2 <= *start);
        }
    }

    // Chunks: dense global indices, strictly inside their scene, text slice
    // and digest consistent.
    let mut stmt = conn
        .prepare(
            "SELECT c.idx, c.char_start, c.char_end, c.text, c.sha256, s.char_start, s.char_end
             FROM chunk c JOIN scene s ON s.id = c.scene_id
             WHERE c.work_id = ? ORDER BY c.idx",
        )
        .unwrap();
    let chunks: Vec<(i64, i64, i64, String, String, i64, i64)> = stmt
        .query_map([&res.work_id], |r| {
            Ok((
                r.get(0)?,
                r.get(1)?,
                r.get(2)?,
                r.get(3)?,
                r.get(4)?,
                r.get(5)?,
                r.get(6)?,
            ))
        })
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(chunks.len() as u64, res.sizes.chunks);
    for (i, (idx, start, end, text, sha, s_start, s_end)) in chunks.iter().enumerate() {
        assert_eq!(*idx, i as i64);
        assert!(s_start <= start && start < end && end <= s_end);

        let expected: String = STORY
            .chars()
            .skip(*start as usize)
            .take((end - start) as usize)
            .collect();
        assert_eq!(*text, expected);

        use sha2::Digest;
        let digest = hex::encode(sha2::Sha256::digest(text.as_bytes()));
        assert_eq!(*sha, digest);
    }
}

#[test]
fn ingest_is_idempotent_on_content_digest() {
    let dir = tempfile::TempDir::new().unwrap();
    let db = dir.path().join("works.db");

    let first = ingest_story(&db, dir.path(), "doc.txt", "Hello\n\nWorld");
    let second = ingest_story(&db, dir.path(), "doc.txt", "Hello\n\nWorld");
    assert_eq!(first.work_id, second.work_id);
    assert_eq!(first.content_sha1, second.content_sha1);
    assert_eq!(first.sizes, second.sizes);

    // A copy under a different name has the same bytes: still one work.
    let third = ingest_story(&db, dir.path(), "copy.txt", "Hello\n\nWorld");
    assert_eq!(third.work_id, first.work_id);

    let conn = open_db(&db).unwrap();
    let works: i64 = conn
        .query_row("SELECT COUNT(*) FROM work", [], |r| r.get(0))
        .unwrap();
    assert_eq!(works, 1);
}

#[test]
fn resegment_matches_fresh_ingest_counts() {
    let markdown = "# One\nAlpha prose here.\n# Two\nBeta prose here.\n# Three\nGamma prose here.\n";

    let dir = tempfile::TempDir::new().unwrap();

    // Ingest under the default profile, then resegment as markdown.
    let db_a = dir.path().join("a.db");
    let res_a = ingest_story(&db_a, dir.path(), "doc.md", markdown);
    let reseg = resegment_work(&db_a, &res_a.work_id, Some("markdown"), None, None).unwrap();

    // Fresh ingest of the same content directly under markdown.
    let db_b = dir.path().join("b.db");
    let file = dir.path().join("fresh.md");
    std::fs::write(&file, markdown).unwrap();
    let res_b = ingest_file(
        &db_b,
        &file,
        &IngestOptions {
            profile: Some("markdown".to_string()),
            ..Default::default()
        },
    )
    .unwrap();

    assert_eq!(reseg.sizes, res_b.sizes);
    assert_eq!(reseg.work_id, res_a.work_id);

    // Resegment rewrote children in place: still one work in db_a.
    let conn = open_db(&db_a).unwrap();
    let works: i64 = conn
        .query_row("SELECT COUNT(*) FROM work", [], |r| r.get(0))
        .unwrap();
    assert_eq!(works, 1);
}

#[test]
fn segmentation_invariants_hold_across_profiles() {
    let text = "INT. LAB - NIGHT\nScreens glow in the dark, humming quietly.\n\
                \n\
                # A Heading\nProse paragraph of respectable length for any profile.\n\
                \n\
                [[PAGE_BREAK]]\n\
                Closing page content, again with plenty of characters to survive.\n";

    for name in profile_names() {
        let profile = get_profile(Some(name));
        let scenes = segment_to_scenes(text, profile);
        let chunks = make_chunks(&scenes, None, None, profile);
        let total = text.chars().count();

        assert!(!scenes.is_empty(), "profile {name}");
        for (i, scene) in scenes.iter().enumerate() {
            assert_eq!(scene.idx, i, "profile {name}");
            assert!(scene.start < scene.end || (scene.start == 0 && scene.end == 0));
            assert!(scene.end <= total, "profile {name}");
            if i > 0 {
                assert!(scenes[i - 1].end <= scene.start, "profile {name}");
                // Minimum-length rule holds for every scene after the first.
                assert!(
                    scene.end - scene.start >= profile.scene.min_scene_chars,
                    "profile {name}"
                );
            }
        }
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.idx, i, "profile {name}");
            let owner = &scenes[chunk.scene_idx.unwrap()];
            assert!(
                owner.start <= chunk.start && chunk.start < chunk.end && chunk.end <= owner.end,
                "profile {name}"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Watcher
// ---------------------------------------------------------------------------

fn watcher_config(root: &Path) -> WatcherConfig {
    WatcherConfig {
        inbox: root.join("inbox"),
        success_dir: root.join("success"),
        fail_dir: root.join("fail"),
        db_path: root.join("watch.db"),
        stable_ms: 0,
        poll_seconds: 0.05,
        ..Default::default()
    }
}

fn wait_for<F: Fn() -> bool>(timeout: Duration, predicate: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    false
}

#[test]
fn watcher_moves_ingested_file_to_success() {
    let dir = tempfile::TempDir::new().unwrap();
    let cfg = watcher_config(dir.path());
    let success = cfg.success_dir.clone();
    let fail = cfg.fail_dir.clone();
    let inbox = cfg.inbox.clone();
    let db = cfg.db_path.clone();

    let stop = Arc::new(AtomicBool::new(false));
    let stop_watcher = Arc::clone(&stop);
    let handle = std::thread::spawn(move || run_watcher(cfg, stop_watcher));

    std::fs::create_dir_all(&inbox).unwrap();
    std::fs::write(inbox.join("story.txt"), "A scene.\n\n\nAnother scene.").unwrap();

    let arrived = wait_for(Duration::from_secs(10), || {
        success
            .read_dir()
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false)
    });

    stop.store(true, Ordering::Relaxed);
    handle.join().unwrap().unwrap();

    assert!(arrived, "processed file was not moved to success/");

    let moved: Vec<String> = success
        .read_dir()
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(moved.len(), 1);
    assert!(moved[0].ends_with("__story.txt"));

    let conn = open_db(&db).unwrap();
    let (works, scenes, chunks): (i64, i64, i64) = conn
        .query_row(
            "SELECT (SELECT COUNT(*) FROM work),
                    (SELECT COUNT(*) FROM scene),
                    (SELECT COUNT(*) FROM chunk)",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .unwrap();
    assert_eq!(works, 1);
    assert!(scenes >= 1 && chunks >= 1);

    // The success filename carries the work id.
    let work_id: String = conn
        .query_row("SELECT id FROM work", [], |r| r.get(0))
        .unwrap();
    assert!(moved[0].starts_with(&format!("{work_id}__")));

    assert!(
        fail.read_dir().map(|mut e| e.next().is_none()).unwrap_or(true),
        "fail directory should be empty"
    );
}

#[test]
fn watcher_quarantines_unsupported_extension() {
    let dir = tempfile::TempDir::new().unwrap();
    let cfg = watcher_config(dir.path());
    let fail = cfg.fail_dir.clone();
    let inbox = cfg.inbox.clone();
    let db = cfg.db_path.clone();

    let stop = Arc::new(AtomicBool::new(false));
    let stop_watcher = Arc::clone(&stop);
    let handle = std::thread::spawn(move || run_watcher(cfg, stop_watcher));

    std::fs::create_dir_all(&inbox).unwrap();
    std::fs::write(inbox.join("image.png"), b"\x89PNG").unwrap();

    let quarantined = wait_for(Duration::from_secs(10), || {
        fail.read_dir()
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false)
    });

    stop.store(true, Ordering::Relaxed);
    handle.join().unwrap().unwrap();

    assert!(quarantined, "file was not moved to fail/");

    let names: Vec<String> = fail
        .read_dir()
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    let moved = names
        .iter()
        .find(|n| n.ends_with("__image.png"))
        .expect("quarantined file present");
    let sidecar = names
        .iter()
        .find(|n| n.ends_with(".err.json"))
        .expect("err sidecar present");
    assert_eq!(*sidecar, format!("{moved}.err.json"));

    let body: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(fail.join(sidecar)).unwrap()).unwrap();
    assert_eq!(body["stage"], "precheck");
    assert!(body["message"].as_str().unwrap().contains(".png"));

    // Nothing was ingested.
    if db.exists() {
        let conn = open_db(&db).unwrap();
        let works: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='work'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        if works > 0 {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM work", [], |r| r.get(0))
                .unwrap();
            assert_eq!(count, 0);
        }
    }
}
