//! Post-ingest workflow hook.
//!
//! After a successful ingest the caller may notify an external workflow
//! service. The hook is fire-and-forget: implementations must never block the
//! ingest path or surface errors.

use std::time::Duration;

use serde_json::json;

/// Capability: react to a successful ingest.
pub trait IngestHook: Send + Sync {
    fn on_ingest_success(&self, work_id: &str, content_sha1: Option<&str>, profile: Option<&str>);
}

/// Default hook: does nothing.
pub struct NoopHook;

impl IngestHook for NoopHook {
    fn on_ingest_success(&self, _work_id: &str, _content_sha1: Option<&str>, _profile: Option<&str>) {}
}

/// POSTs a small JSON notification to a workflow starter endpoint on a
/// detached thread. Failures are logged and dropped.
pub struct HttpHook {
    url: String,
}

impl HttpHook {
    pub fn new(url: String) -> Self {
        Self { url }
    }
}

impl IngestHook for HttpHook {
    fn on_ingest_success(&self, work_id: &str, content_sha1: Option<&str>, profile: Option<&str>) {
        let url = self.url.clone();
        let payload = json!({
            "work_id": work_id,
            "content_sha1": content_sha1,
            "profile": profile,
        });
        std::thread::spawn(move || {
            if let Err(e) = ureq::post(&url)
                .timeout(Duration::from_secs(5))
                .send_json(payload)
            {
                tracing::warn!(error = %e, url = %url, "workflow start failed");
            }
        });
    }
}

/// Build the configured hook: `WORKFLOW_START_URL` selects the HTTP hook,
/// otherwise the no-op.
pub fn from_env() -> Box<dyn IngestHook> {
    match std::env::var("WORKFLOW_START_URL") {
        Ok(url) if !url.trim().is_empty() => Box::new(HttpHook::new(url.trim().to_string())),
        _ => Box::new(NoopHook),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_hook_is_inert() {
        NoopHook.on_ingest_success("w-1", Some("sha"), None);
    }
}
