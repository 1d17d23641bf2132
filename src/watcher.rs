//! Inbox watcher: poll-scan dispatcher, bounded queue, ingest worker pool.
//!
//! The dispatcher scans the inbox on a fixed cadence, filters ignorable and
//! precheck-failing files, waits for size stability, and enqueues work items
//! onto a bounded channel; a full channel defers the file to the next scan
//! (backpressure). Workers ingest with retry + jittered exponential backoff
//! and disposition each file into `success_dir` or `fail_dir` by atomic
//! rename. Content-digest idempotency makes reprocessing after a crash safe.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use rand::Rng;
use serde_json::{Map, json};

use crate::error::{IngestError, ParseError, WatchError, WatchResult};
use crate::events::{build_failed_event, build_ingested_event, emit_async, utc_now_iso};
use crate::ingest::{IngestOptions, ingest_file};
use crate::metrics::push_ingest;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Watcher configuration, normally loaded from the environment.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub inbox: PathBuf,
    pub success_dir: PathBuf,
    pub fail_dir: PathBuf,
    pub db_path: PathBuf,
    /// Allowed extensions, lowercased with leading dot.
    pub allowed_ext: HashSet<String>,
    pub max_file_mb: u64,
    pub profile: Option<String>,
    pub workers: usize,
    pub max_queue: usize,
    pub stable_ms: u64,
    pub poll_seconds: f64,
    pub retries: u32,
    pub backoff_base_ms: u64,
    pub recursive: bool,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            inbox: PathBuf::from("./inbox"),
            success_dir: PathBuf::from("./success"),
            fail_dir: PathBuf::from("./fail"),
            db_path: PathBuf::from("./scriptorium.db"),
            allowed_ext: [".txt", ".md", ".pdf", ".docx"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_file_mb: 20,
            profile: None,
            workers: 2,
            max_queue: 100,
            stable_ms: 750,
            poll_seconds: 1.0,
            retries: 2,
            backoff_base_ms: 250,
            recursive: false,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl WatcherConfig {
    /// Load configuration from `INBOX`, `SUCCESS_DIR`, `FAIL_DIR`, `DB_PATH`,
    /// `ALLOWED_EXT`, `MAX_FILE_MB`, `INGEST_PROFILE` and the `WATCH_*`
    /// variables, with the same defaults as `Default`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let allowed_ext = std::env::var("ALLOWED_EXT")
            .map(|raw| {
                raw.split(',')
                    .map(|e| e.trim().to_lowercase())
                    .filter(|e| !e.is_empty())
                    .collect::<HashSet<_>>()
            })
            .unwrap_or(defaults.allowed_ext);

        Self {
            inbox: env_or("INBOX", defaults.inbox),
            success_dir: env_or("SUCCESS_DIR", defaults.success_dir),
            fail_dir: env_or("FAIL_DIR", defaults.fail_dir),
            db_path: env_or("DB_PATH", defaults.db_path),
            allowed_ext,
            max_file_mb: env_or("MAX_FILE_MB", defaults.max_file_mb),
            profile: std::env::var("INGEST_PROFILE")
                .ok()
                .filter(|p| !p.trim().is_empty()),
            workers: env_or("WATCH_WORKERS", defaults.workers).max(1),
            max_queue: env_or("WATCH_MAX_QUEUE", defaults.max_queue).max(1),
            stable_ms: env_or("WATCH_STABLE_MS", defaults.stable_ms),
            poll_seconds: env_or("WATCH_POLL_SECONDS", defaults.poll_seconds),
            retries: env_or("WATCH_RETRIES", defaults.retries),
            backoff_base_ms: env_or("WATCH_BACKOFF_BASE_MS", defaults.backoff_base_ms).max(1),
            recursive: std::env::var("WATCH_RECURSIVE")
                .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(defaults.recursive),
        }
    }

    fn ensure_dirs(&self) -> WatchResult<()> {
        for dir in [&self.inbox, &self.success_dir, &self.fail_dir] {
            std::fs::create_dir_all(dir).map_err(|e| WatchError::CreateDir {
                path: dir.display().to_string(),
                source: e,
            })?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Filesystem helpers
// ---------------------------------------------------------------------------

/// Names the scanner skips outright: dotfiles, editor/office droppings,
/// partial downloads.
pub fn is_ignorable(name: &str) -> bool {
    let n = name.to_lowercase();
    n.starts_with('.')
        || n.starts_with("~$")
        || n.ends_with(".tmp")
        || n.ends_with(".crdownload")
        || n.ends_with(".partial")
}

/// Move `src` into `dst_dir` as `{prefix}{name}`, appending `-1`, `-2`, … on
/// collision. The rename is atomic within one filesystem.
pub fn unique_move(dst_dir: &Path, src: &Path, prefix: &str) -> WatchResult<PathBuf> {
    std::fs::create_dir_all(dst_dir).map_err(|e| WatchError::CreateDir {
        path: dst_dir.display().to_string(),
        source: e,
    })?;

    let name = src
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unnamed");
    let rename = |target: &Path| -> WatchResult<()> {
        std::fs::rename(src, target).map_err(|e| WatchError::Disposition {
            from: src.display().to_string(),
            to: target.display().to_string(),
            source: e,
        })
    };

    let target = dst_dir.join(format!("{prefix}{name}"));
    if !target.exists() {
        rename(&target)?;
        return Ok(target);
    }

    let stem = target
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unnamed")
        .to_string();
    let suffix = target
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| format!(".{s}"))
        .unwrap_or_default();
    let mut i = 1;
    loop {
        let alt = dst_dir.join(format!("{stem}-{i}{suffix}"));
        if !alt.exists() {
            rename(&alt)?;
            return Ok(alt);
        }
        i += 1;
    }
}

/// Quarantine `src` into `fail_dir` as `<unix_ts>__<name>` and write the
/// `<name>.err.json` sidecar describing the failure.
pub fn write_fail_err(
    fail_dir: &Path,
    src: &Path,
    reason: &str,
    stage: &str,
) -> WatchResult<PathBuf> {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let moved = unique_move(fail_dir, src, &format!("{ts}__"))?;

    let sidecar = PathBuf::from(format!("{}.err.json", moved.display()));
    let body = serde_json::to_string_pretty(&json!({
        "message": reason,
        "stage": stage,
        "created_at": utc_now_iso(),
    }))
    .unwrap_or_default();
    if let Err(e) = std::fs::write(&sidecar, body) {
        tracing::warn!(error = %e, path = %sidecar.display(), "failed to write err sidecar");
    }
    Ok(moved)
}

fn mtime_key(path: &Path, meta: &std::fs::Metadata) -> String {
    let ns = meta
        .modified()
        .ok()
        .and_then(|m| m.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("{}:{ns}", path.display())
}

fn collect_files(dir: &Path, recursive: bool, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if recursive {
                collect_files(&path, true, out);
            }
        } else if path.is_file() {
            out.push(path);
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatcher + workers
// ---------------------------------------------------------------------------

/// Queue entry: a candidate file and its retry attempt (0-based).
#[derive(Debug, Clone)]
struct WorkItem {
    path: PathBuf,
    attempt: u32,
}

fn emit_precheck_failure(cfg: &WatcherConfig, path: &Path, reason: &str) {
    if let Err(e) = write_fail_err(&cfg.fail_dir, path, reason, "precheck") {
        tracing::warn!(error = %e, path = %path.display(), "precheck disposition failed");
        return;
    }
    tracing::info!(path = %path.display(), reason, "precheck fail");
    emit_async(build_failed_event(
        &path.display().to_string(),
        None,
        None,
        reason,
        "precheck",
        cfg.profile.as_deref(),
        None,
    ));
    push_ingest("fail", None, "watcher");
}

/// Filter, stability-check, and enqueue one candidate path.
fn enqueue_candidate(
    cfg: &WatcherConfig,
    path: &Path,
    queue: &Sender<WorkItem>,
    seen: &mut HashSet<String>,
) {
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(n) => n,
        None => return,
    };
    if is_ignorable(name) {
        return;
    }

    let ext = crate::parser::extension_of(path);
    if !cfg.allowed_ext.contains(&ext) {
        let err = ParseError::UnsupportedFileType { ext };
        emit_precheck_failure(cfg, path, &err.to_string());
        return;
    }

    let Ok(meta) = path.metadata() else {
        return; // vanished between scan and stat
    };
    let size = meta.len();
    let key = mtime_key(path, &meta);
    if seen.contains(&key) {
        return;
    }

    if size > cfg.max_file_mb * 1024 * 1024 {
        let err = IngestError::OversizedInput {
            path: path.display().to_string(),
            limit_mb: cfg.max_file_mb,
        };
        emit_precheck_failure(cfg, path, &err.to_string());
        return;
    }

    // Stability: size unchanged across the settle window, else defer.
    if cfg.stable_ms > 0 {
        std::thread::sleep(Duration::from_millis(cfg.stable_ms));
        let Ok(meta2) = path.metadata() else {
            return;
        };
        if meta2.len() != size {
            return;
        }
    }

    match queue.try_send(WorkItem {
        path: path.to_path_buf(),
        attempt: 0,
    }) {
        Ok(()) => {
            seen.insert(key);
        }
        Err(_) => {
            // Backpressure: queue full, the next scan will retry.
        }
    }
}

fn worker_loop(
    wid: usize,
    cfg: Arc<WatcherConfig>,
    queue_rx: Receiver<WorkItem>,
    queue_tx: Sender<WorkItem>,
    stop: Arc<AtomicBool>,
) {
    while !stop.load(Ordering::Relaxed) {
        let item = match queue_rx.recv_timeout(Duration::from_millis(500)) {
            Ok(item) => item,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let path = &item.path;
        // Re-check quickly; another worker or the user may have moved it.
        if !path.is_file() {
            continue;
        }

        let mut opts = IngestOptions {
            profile: cfg.profile.clone(),
            ..Default::default()
        };
        opts.run_params
            .insert("invoked_by".into(), json!("watcher"));

        let outcome = ingest_file(&cfg.db_path, path, &opts)
            .map_err(|e| e.to_string())
            .and_then(|res| {
                unique_move(&cfg.success_dir, path, &format!("{}__", res.work_id))
                    .map(|dst| (res, dst))
                    .map_err(|e| e.to_string())
            });

        match outcome {
            Ok((res, dst)) => {
                tracing::info!(
                    worker = wid,
                    work_id = %res.work_id,
                    moved_to = %dst.display(),
                    "ingested from inbox"
                );
                push_ingest("ok", None, "watcher");
                let mut extra = Map::new();
                extra.insert("moved_to".into(), json!(dst.display().to_string()));
                emit_async(build_ingested_event(
                    &cfg.db_path,
                    &res.work_id,
                    &path.display().to_string(),
                    None,
                    None,
                    Some(&res.content_sha1),
                    &res.sizes,
                    cfg.profile.as_deref(),
                    Some(extra),
                ));
            }
            Err(reason) if item.attempt < cfg.retries => {
                let jitter: f64 = rand::thread_rng().gen_range(0.8..1.2);
                let backoff_ms =
                    cfg.backoff_base_ms as f64 * 2f64.powi(item.attempt as i32) * jitter;
                tracing::warn!(
                    worker = wid,
                    path = %path.display(),
                    attempt = item.attempt + 1,
                    retries = cfg.retries,
                    backoff_ms = backoff_ms as u64,
                    error = %reason,
                    "ingest failed, backing off"
                );
                std::thread::sleep(Duration::from_millis(backoff_ms as u64));
                let retry = WorkItem {
                    path: path.clone(),
                    attempt: item.attempt + 1,
                };
                // A saturated queue drops the retry; the file is still in the
                // inbox and will be rediscovered.
                let _ = queue_tx.try_send(retry);
            }
            Err(reason) => {
                match write_fail_err(&cfg.fail_dir, path, &reason, "ingest") {
                    Ok(moved) => tracing::warn!(
                        worker = wid,
                        path = %path.display(),
                        moved_to = %moved.display(),
                        error = %reason,
                        "ingest failed terminally"
                    ),
                    Err(e) => tracing::error!(
                        worker = wid,
                        path = %path.display(),
                        error = %e,
                        "failed to quarantine after terminal ingest error"
                    ),
                }
                push_ingest("fail", None, "watcher");
                emit_async(build_failed_event(
                    &path.display().to_string(),
                    None,
                    None,
                    &reason,
                    "ingest",
                    cfg.profile.as_deref(),
                    None,
                ));
            }
        }
    }
}

/// Run the watcher until `stop` is raised.
///
/// The calling thread becomes the dispatcher; `workers` ingest threads are
/// spawned and joined before returning. Files mid-ingest at shutdown either
/// complete their disposition or stay in the inbox for the next run.
pub fn run_watcher(cfg: WatcherConfig, stop: Arc<AtomicBool>) -> WatchResult<()> {
    cfg.ensure_dirs()?;
    let cfg = Arc::new(cfg);

    tracing::info!(
        inbox = %cfg.inbox.display(),
        success = %cfg.success_dir.display(),
        fail = %cfg.fail_dir.display(),
        profile = cfg.profile.as_deref().unwrap_or("default"),
        workers = cfg.workers,
        queue = cfg.max_queue,
        recursive = cfg.recursive,
        "watching inbox"
    );

    let (queue_tx, queue_rx) = bounded::<WorkItem>(cfg.max_queue);

    let mut handles = Vec::with_capacity(cfg.workers);
    for wid in 0..cfg.workers {
        let cfg = Arc::clone(&cfg);
        let rx = queue_rx.clone();
        let tx = queue_tx.clone();
        let stop = Arc::clone(&stop);
        handles.push(std::thread::spawn(move || {
            worker_loop(wid, cfg, rx, tx, stop)
        }));
    }

    let mut seen: HashSet<String> = HashSet::new();
    while !stop.load(Ordering::Relaxed) {
        if !cfg.inbox.exists() {
            // Inbox removed underneath us: recreate and continue.
            let _ = std::fs::create_dir_all(&cfg.inbox);
        }

        let mut candidates = Vec::new();
        collect_files(&cfg.inbox, cfg.recursive, &mut candidates);
        for path in &candidates {
            if stop.load(Ordering::Relaxed) {
                break;
            }
            enqueue_candidate(&cfg, path, &queue_tx, &mut seen);
        }

        // Sleep the poll interval in short slices so shutdown stays prompt.
        let mut remaining_ms = (cfg.poll_seconds * 1000.0) as u64;
        while remaining_ms > 0 && !stop.load(Ordering::Relaxed) {
            let slice = remaining_ms.min(100);
            std::thread::sleep(Duration::from_millis(slice));
            remaining_ms -= slice;
        }
    }

    drop(queue_tx);
    for handle in handles {
        let _ = handle.join();
    }
    Ok(())
}
