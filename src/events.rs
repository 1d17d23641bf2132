//! Event emission: best-effort fan-out of ingest outcomes to pluggable sinks.
//!
//! Sinks are selected by `EMIT_SINK` (comma list of `stdout|http|redis|nats`,
//! or `none`/`off`/`false` to disable). Emission happens on a detached thread
//! and sink failures never reach the caller; they are logged to stderr as a
//! JSON record instead.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde_json::{Map, Value, json};
use thiserror::Error;

use crate::persist::Sizes;

/// Current UTC time, `YYYY-MM-DDTHH:MM:SSZ`.
pub fn utc_now_iso() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Transport failure inside a sink. Swallowed by the manager.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct SinkError {
    message: String,
}

impl SinkError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Capability: deliver one JSON payload somewhere.
pub trait EventSink: Send + Sync {
    fn name(&self) -> &'static str;
    fn emit(&self, payload: &Value) -> Result<(), SinkError>;
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// One compact JSON line per payload on standard output.
pub struct StdoutSink;

impl EventSink for StdoutSink {
    fn name(&self) -> &'static str {
        "stdout"
    }

    fn emit(&self, payload: &Value) -> Result<(), SinkError> {
        println!("{payload}");
        Ok(())
    }
}

/// POST the payload as JSON with a short timeout.
pub struct HttpSink {
    url: String,
    timeout: Duration,
}

impl HttpSink {
    pub fn new(url: String) -> Self {
        Self {
            url,
            timeout: Duration::from_secs(5),
        }
    }
}

impl EventSink for HttpSink {
    fn name(&self) -> &'static str {
        "http"
    }

    fn emit(&self, payload: &Value) -> Result<(), SinkError> {
        ureq::post(&self.url)
            .timeout(self.timeout)
            .send_json(payload.clone())
            .map_err(|e| SinkError::new(e.to_string()))?;
        Ok(())
    }
}

/// RPUSH the payload onto a Redis list.
pub struct RedisSink {
    client: redis::Client,
    list: String,
}

impl RedisSink {
    pub fn new(url: &str, list: String) -> Result<Self, SinkError> {
        let client = redis::Client::open(url).map_err(|e| SinkError::new(e.to_string()))?;
        Ok(Self { client, list })
    }
}

impl EventSink for RedisSink {
    fn name(&self) -> &'static str {
        "redis"
    }

    fn emit(&self, payload: &Value) -> Result<(), SinkError> {
        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| SinkError::new(e.to_string()))?;
        redis::cmd("RPUSH")
            .arg(&self.list)
            .arg(payload.to_string())
            .query::<i64>(&mut conn)
            .map_err(|e| SinkError::new(e.to_string()))?;
        Ok(())
    }
}

/// Publish the payload on a NATS subject over a long-lived connection.
pub struct NatsSink {
    conn: nats::Connection,
    subject: String,
}

impl NatsSink {
    pub fn new(url: &str, subject: String) -> Result<Self, SinkError> {
        let conn = nats::connect(url).map_err(|e| SinkError::new(e.to_string()))?;
        Ok(Self { conn, subject })
    }
}

impl EventSink for NatsSink {
    fn name(&self) -> &'static str {
        "nats"
    }

    fn emit(&self, payload: &Value) -> Result<(), SinkError> {
        self.conn
            .publish(&self.subject, payload.to_string())
            .map_err(|e| SinkError::new(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Process-wide sink list, built once from the environment.
pub struct EventManager {
    sinks: Vec<Box<dyn EventSink>>,
}

impl EventManager {
    /// Build from `EMIT_SINK` and the per-sink environment variables.
    ///
    /// Unknown sink names are ignored. A sink whose construction fails is
    /// skipped with a warning; if that leaves the (enabled) list empty, the
    /// manager degrades to stdout only.
    pub fn from_env() -> Self {
        let raw = std::env::var("EMIT_SINK").unwrap_or_else(|_| "stdout".to_string());
        let raw = raw.trim().to_string();
        if raw.is_empty() || matches!(raw.to_lowercase().as_str(), "none" | "off" | "false") {
            return Self { sinks: Vec::new() };
        }

        let mut sinks: Vec<Box<dyn EventSink>> = Vec::new();
        for name in raw.split(',').map(|p| p.trim().to_lowercase()) {
            match name.as_str() {
                "stdout" => sinks.push(Box::new(StdoutSink)),
                "http" => {
                    let url = std::env::var("EMIT_HTTP_URL").unwrap_or_default();
                    if url.trim().is_empty() {
                        tracing::warn!("EMIT_SINK includes http but EMIT_HTTP_URL is unset");
                        continue;
                    }
                    sinks.push(Box::new(HttpSink::new(url.trim().to_string())));
                }
                "redis" => {
                    let url = std::env::var("EMIT_REDIS_URL")
                        .unwrap_or_else(|_| "redis://redis:6379/0".to_string());
                    let list = std::env::var("EMIT_REDIS_LIST")
                        .unwrap_or_else(|_| "ingest_events".to_string());
                    match RedisSink::new(url.trim(), list.trim().to_string()) {
                        Ok(sink) => sinks.push(Box::new(sink)),
                        Err(e) => tracing::warn!(error = %e, "redis sink construction failed"),
                    }
                }
                "nats" => {
                    let url = std::env::var("EMIT_NATS_URL")
                        .unwrap_or_else(|_| "nats://nats:4222".to_string());
                    let subject = std::env::var("EMIT_NATS_SUBJECT")
                        .unwrap_or_else(|_| "ingest.events".to_string());
                    match NatsSink::new(url.trim(), subject.trim().to_string()) {
                        Ok(sink) => sinks.push(Box::new(sink)),
                        Err(e) => tracing::warn!(error = %e, "nats sink construction failed"),
                    }
                }
                _ => {}
            }
        }

        if sinks.is_empty() {
            sinks.push(Box::new(StdoutSink));
        }
        Self { sinks }
    }

    /// Build from an explicit sink list (tests, embedders).
    pub fn with_sinks(sinks: Vec<Box<dyn EventSink>>) -> Self {
        Self { sinks }
    }

    /// Names of the configured sinks.
    pub fn sink_names(&self) -> Vec<&'static str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }

    /// Deliver to every sink, swallowing and logging failures.
    pub fn emit_blocking(&self, payload: &Value) {
        for sink in &self.sinks {
            if let Err(e) = sink.emit(payload) {
                // Sink errors never reach the caller; record and move on.
                eprintln!(
                    "{}",
                    json!({"event": "event.emit.error", "sink": sink.name(), "error": e.to_string()})
                );
            }
        }
    }
}

static MANAGER: Mutex<Option<Arc<EventManager>>> = Mutex::new(None);

/// The process-wide manager, built lazily from the environment.
pub fn event_manager() -> Arc<EventManager> {
    let mut guard = MANAGER.lock().unwrap_or_else(|e| e.into_inner());
    guard
        .get_or_insert_with(|| Arc::new(EventManager::from_env()))
        .clone()
}

/// Re-read the environment and rebuild the sink list (used by tests).
pub fn reload_sinks() {
    let mut guard = MANAGER.lock().unwrap_or_else(|e| e.into_inner());
    *guard = Some(Arc::new(EventManager::from_env()));
}

/// Fan the payload out to all sinks without blocking the caller.
pub fn emit_async(payload: Value) {
    let manager = event_manager();
    if manager.sinks.is_empty() {
        return;
    }
    std::thread::spawn(move || manager.emit_blocking(&payload));
}

// ---------------------------------------------------------------------------
// Payload builders
// ---------------------------------------------------------------------------

/// Build a `document.ingested` payload.
///
/// Includes the work's `run_id` when the stored row has one (best-effort read,
/// never fails the caller).
#[allow(clippy::too_many_arguments)]
pub fn build_ingested_event(
    db_path: &Path,
    work_id: &str,
    source_path: &str,
    title: Option<&str>,
    author: Option<&str>,
    content_sha1: Option<&str>,
    sizes: &Sizes,
    profile: Option<&str>,
    extra: Option<Map<String, Value>>,
) -> Value {
    let mut payload = json!({
        "type": "document.ingested",
        "work_id": work_id,
        "path": source_path,
        "title": title,
        "author": author,
        "content_sha1": content_sha1,
        "sizes": sizes,
        "profile": profile,
        "created_at": utc_now_iso(),
    });

    if let Some(run_id) = lookup_run_id(db_path, work_id) {
        payload["run_id"] = json!(run_id);
    }
    if let Some(extra) = extra {
        merge_extra(&mut payload, extra);
    }
    payload
}

/// Build a `document.failed` payload for parse errors, oversized files,
/// unsupported types, and the like.
pub fn build_failed_event(
    source_path: &str,
    title: Option<&str>,
    author: Option<&str>,
    reason: &str,
    stage: &str,
    profile: Option<&str>,
    extra: Option<Map<String, Value>>,
) -> Value {
    let mut payload = json!({
        "type": "document.failed",
        "path": source_path,
        "title": title,
        "author": author,
        "reason": reason,
        "stage": stage,
        "profile": profile,
        "created_at": utc_now_iso(),
    });
    if let Some(extra) = extra {
        merge_extra(&mut payload, extra);
    }
    payload
}

fn merge_extra(payload: &mut Value, extra: Map<String, Value>) {
    if let Some(object) = payload.as_object_mut() {
        for (key, value) in extra {
            object.insert(key, value);
        }
    }
}

fn lookup_run_id(db_path: &Path, work_id: &str) -> Option<String> {
    // Read-only so a best-effort enrichment can never create a database file.
    let conn = rusqlite::Connection::open_with_flags(
        db_path,
        rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
    )
    .ok()?;
    conn.query_row(
        "SELECT ingest_run_id FROM work WHERE id = ?",
        [work_id],
        |row| row.get::<_, Option<String>>(0),
    )
    .ok()
    .flatten()
    .filter(|id| !id.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingSink;

    impl EventSink for FailingSink {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn emit(&self, _payload: &Value) -> Result<(), SinkError> {
            Err(SinkError::new("transport down"))
        }
    }

    struct RecordingSink(Mutex<Vec<Value>>);

    impl EventSink for RecordingSink {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn emit(&self, payload: &Value) -> Result<(), SinkError> {
            self.0.lock().unwrap().push(payload.clone());
            Ok(())
        }
    }

    #[test]
    fn timestamp_has_expected_shape() {
        let ts = utc_now_iso();
        assert_eq!(ts.len(), 20);
        assert!(ts.ends_with('Z'));
        assert_eq!(&ts[4..5], "-");
        assert_eq!(&ts[10..11], "T");
    }

    #[test]
    fn ingested_payload_shape() {
        let sizes = Sizes {
            chars: 10,
            scenes: 2,
            chunks: 3,
        };
        let payload = build_ingested_event(
            Path::new("/nonexistent.db"),
            "w-1",
            "/inbox/story.txt",
            Some("Story"),
            None,
            Some("cafebabe"),
            &sizes,
            Some("default"),
            None,
        );
        assert_eq!(payload["type"], "document.ingested");
        assert_eq!(payload["work_id"], "w-1");
        assert_eq!(payload["sizes"]["scenes"], 2);
        assert_eq!(payload["author"], Value::Null);
        assert!(payload.get("run_id").is_none());
    }

    #[test]
    fn failed_payload_carries_stage_and_extra() {
        let mut extra = Map::new();
        extra.insert("attempt".into(), json!(2));
        let payload = build_failed_event(
            "/inbox/bad.xyz",
            None,
            None,
            "Unsupported extension: .xyz",
            "precheck",
            None,
            Some(extra),
        );
        assert_eq!(payload["type"], "document.failed");
        assert_eq!(payload["stage"], "precheck");
        assert_eq!(payload["attempt"], 2);
    }

    #[test]
    fn failing_sink_does_not_stop_fanout() {
        let recorder = Arc::new(RecordingSink(Mutex::new(Vec::new())));
        struct Shared(Arc<RecordingSink>);
        impl EventSink for Shared {
            fn name(&self) -> &'static str {
                self.0.name()
            }
            fn emit(&self, payload: &Value) -> Result<(), SinkError> {
                self.0.emit(payload)
            }
        }

        let manager = EventManager::with_sinks(vec![
            Box::new(FailingSink),
            Box::new(Shared(Arc::clone(&recorder))),
        ]);
        manager.emit_blocking(&json!({"type": "document.ingested"}));
        assert_eq!(recorder.0.lock().unwrap().len(), 1);
    }
}
