//! scriptorium HTTP surface.
//!
//! Read-side queries, ingest, resegment, and FTS search over the chunk layer:
//!
//! **Health:**
//! - `GET  /v1/healthz` — liveness
//! - `GET  /v1/readyz` — read+write probe (BEGIN IMMEDIATE on a scratch table)
//!
//! **Discovery:**
//! - `GET  /v1/parsers` — registered parser extensions
//! - `GET  /v1/profiles` — built-in profile names
//!
//! **Works:**
//! - `GET  /v1/works` — list with `q`, `author`, `limit`, `offset`
//! - `GET  /v1/works/{id}` — single work
//! - `GET  /v1/works/{id}/scenes` — ordered scenes
//! - `GET  /v1/works/{id}/chunks` — ordered chunks
//! - `GET  /v1/works/{id}/slice?start&end` — substring of the normalized text
//!
//! **Operations:**
//! - `POST /v1/ingest` — JSON `{path,...}` or multipart `file` / form `path`
//! - `POST /v1/works/{id}/resegment` — re-run segmentation
//! - `GET  /v1/search?q&work_id&limit&offset&rebuild` — FTS search
//! - `GET  /metrics` — Prometheus exposition
//!
//! Failures use the envelope `{ok:false, error:{type, message, details?}}` and
//! every response echoes an `X-Request-ID`.
//!
//! Build and run: `cargo run --features server --bin scriptorium-server`

use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::extract::{DefaultBodyLimit, FromRequest, Multipart, Path, Query, Request, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use scriptorium::error::PersistError;
use scriptorium::events::{build_failed_event, build_ingested_event, emit_async};
use scriptorium::hook::IngestHook;
use scriptorium::ingest::{IngestOptions, ingest_file, resegment_work};
use scriptorium::metrics::{
    self, HTTP_LATENCY, HTTP_REQUESTS, INGEST_LATENCY, INGEST_TOTAL, RESEGMENT_LATENCY,
    RESEGMENT_TOTAL, SEARCH_LATENCY, SEARCH_TOTAL, push_ingest, push_resegment,
};
use scriptorium::normalize::slice_chars;
use scriptorium::persist::{self, ensure_schema, open_db};

// ── Server state ──────────────────────────────────────────────────────────

struct ServerState {
    db_path: PathBuf,
    inbox: PathBuf,
    hook: Box<dyn IngestHook>,
}

type AppState = Arc<ServerState>;

// ── Error envelope ────────────────────────────────────────────────────────

struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
    details: Option<Value>,
}

impl ApiError {
    fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
            details: None,
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NotFound", message)
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BadRequest", message)
    }

    fn server(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "ServerError", message)
    }
}

impl From<PersistError> for ApiError {
    fn from(e: PersistError) -> Self {
        Self::server(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut error = json!({"type": self.kind, "message": self.message});
        if let Some(details) = self.details {
            error["details"] = details;
        }
        (self.status, Json(json!({"ok": false, "error": error}))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ── Request ID + access log + metrics middleware ──────────────────────────

async fn request_meta(request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    let mut response = next.run(request).await;

    let status = response.status().as_u16().to_string();
    let duration = start.elapsed();
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }

    // Structured access log, one JSON object per request.
    println!(
        "{}",
        json!({
            "event": "access",
            "req_id": request_id,
            "method": method,
            "path": path,
            "status": response.status().as_u16(),
            "duration_ms": duration.as_millis() as u64,
        })
    );

    HTTP_REQUESTS
        .with_label_values(&[method.as_str(), path.as_str(), status.as_str()])
        .inc();
    HTTP_LATENCY
        .with_label_values(&[method.as_str(), path.as_str(), status.as_str()])
        .observe(duration.as_secs_f64());

    response
}

// ── Health ────────────────────────────────────────────────────────────────

async fn healthz(State(state): State<AppState>) -> Json<Value> {
    Json(json!({"ok": true, "db": state.db_path.display().to_string()}))
}

async fn readyz(State(state): State<AppState>) -> Response {
    let db_path = state.db_path.clone();
    let probe = tokio::task::spawn_blocking(move || -> Result<(), PersistError> {
        let conn = open_db(&db_path)?;
        persist::ready_check(&conn)
    })
    .await;

    match probe {
        Ok(Ok(())) => Json(json!({"ready": true})).into_response(),
        Ok(Err(e)) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"ready": false, "error": e.to_string()})),
        )
            .into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"ready": false, "error": e.to_string()})),
        )
            .into_response(),
    }
}

// ── Discovery ─────────────────────────────────────────────────────────────

async fn list_parsers() -> Json<Value> {
    Json(json!({"parsers": scriptorium::parser::registry().extensions()}))
}

async fn list_profiles() -> Json<Value> {
    Json(json!({"profiles": scriptorium::profile::profile_names()}))
}

// ── Works ─────────────────────────────────────────────────────────────────

fn default_limit() -> u32 {
    50
}

#[derive(Deserialize)]
struct WorksQuery {
    q: Option<String>,
    author: Option<String>,
    #[serde(default = "default_limit")]
    limit: u32,
    #[serde(default)]
    offset: u32,
}

async fn list_works(
    State(state): State<AppState>,
    Query(query): Query<WorksQuery>,
) -> ApiResult<Json<Value>> {
    let conn = open_db(&state.db_path)?;
    ensure_schema(&conn)?;
    let limit = query.limit.clamp(1, 1000);
    let rows = persist::list_works(
        &conn,
        query.q.as_deref(),
        query.author.as_deref(),
        limit,
        query.offset,
    )?;
    Ok(Json(json!(rows)))
}

async fn get_work(
    State(state): State<AppState>,
    Path(work_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let conn = open_db(&state.db_path)?;
    ensure_schema(&conn)?;
    let work = persist::get_work(&conn, &work_id)?
        .ok_or_else(|| ApiError::not_found("work not found"))?;
    Ok(Json(json!(work)))
}

async fn get_scenes(
    State(state): State<AppState>,
    Path(work_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let conn = open_db(&state.db_path)?;
    ensure_schema(&conn)?;
    Ok(Json(json!(persist::scenes_for_work(&conn, &work_id)?)))
}

async fn get_chunks(
    State(state): State<AppState>,
    Path(work_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let conn = open_db(&state.db_path)?;
    ensure_schema(&conn)?;
    Ok(Json(json!(persist::chunks_for_work(&conn, &work_id)?)))
}

#[derive(Deserialize)]
struct SliceQuery {
    start: u64,
    end: u64,
}

async fn get_slice(
    State(state): State<AppState>,
    Path(work_id): Path<String>,
    Query(query): Query<SliceQuery>,
) -> ApiResult<Json<Value>> {
    let conn = open_db(&state.db_path)?;
    ensure_schema(&conn)?;
    let text = persist::load_norm_text(&conn, &work_id)?
        .ok_or_else(|| ApiError::not_found("work not found"))?;
    let chars = text.chars().count() as u64;

    if query.end <= query.start || query.end > chars {
        return Err(ApiError::new(
            StatusCode::RANGE_NOT_SATISFIABLE,
            "RangeError",
            "slice out of range",
        ));
    }
    Ok(Json(json!({
        "text": slice_chars(&text, query.start as usize, query.end as usize)
    })))
}

// ── FTS search ────────────────────────────────────────────────────────────

fn default_search_limit() -> u32 {
    25
}

#[derive(Deserialize)]
struct SearchQuery {
    q: String,
    work_id: Option<String>,
    #[serde(default = "default_search_limit")]
    limit: u32,
    #[serde(default)]
    offset: u32,
    #[serde(default)]
    rebuild: bool,
}

async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<Value>> {
    let started = Instant::now();
    let db_path = state.db_path.clone();
    let limit = query.limit.clamp(1, 200);
    let q = query.q.clone();
    let work_id = query.work_id.clone();
    let offset = query.offset;
    let rebuild = query.rebuild;

    let hits = tokio::task::spawn_blocking(move || {
        let conn = open_db(&db_path)?;
        ensure_schema(&conn)?;
        persist::ensure_chunk_fts(&conn, rebuild)?;
        persist::search_chunks(&conn, &q, work_id.as_deref(), limit, offset)
    })
    .await
    .map_err(|e| ApiError::server(e.to_string()))?;

    match hits {
        Ok(hits) => {
            SEARCH_TOTAL.with_label_values(&["ok"]).inc();
            SEARCH_LATENCY
                .with_label_values(&["ok"])
                .observe(started.elapsed().as_secs_f64());
            Ok(Json(json!({
                "q": query.q,
                "work_id": query.work_id,
                "count": hits.len(),
                "hits": hits,
            })))
        }
        Err(e) => {
            SEARCH_TOTAL.with_label_values(&["fail"]).inc();
            SEARCH_LATENCY
                .with_label_values(&["fail"])
                .observe(started.elapsed().as_secs_f64());
            Err(ApiError::server(format!("FTS search failed: {e}")))
        }
    }
}

// ── Ingest ────────────────────────────────────────────────────────────────

#[derive(Deserialize, Default, Clone)]
struct IngestBody {
    path: Option<String>,
    title: Option<String>,
    author: Option<String>,
    profile: Option<String>,
}

struct IngestCall {
    /// Filesystem path handed to the pipeline.
    file: PathBuf,
    /// Source label used in events/responses (multipart uploads differ).
    source: String,
    /// Temp file to remove afterwards, if any.
    cleanup: Option<PathBuf>,
    body: IngestBody,
}

async fn run_ingest(state: &AppState, call: IngestCall) -> ApiResult<Json<Value>> {
    let started = Instant::now();
    let db_path = state.db_path.clone();
    let file = call.file.clone();
    let opts = IngestOptions {
        title: call.body.title.clone(),
        author: call.body.author.clone(),
        profile: call.body.profile.clone(),
        ..Default::default()
    };

    let result = tokio::task::spawn_blocking(move || ingest_file(&db_path, &file, &opts))
        .await
        .map_err(|e| ApiError::server(e.to_string()))?;

    if let Some(tmp) = &call.cleanup {
        let _ = std::fs::remove_file(tmp);
    }

    let elapsed = started.elapsed().as_secs_f64();
    match result {
        Ok(res) => {
            emit_async(build_ingested_event(
                &state.db_path,
                &res.work_id,
                &call.source,
                call.body.title.as_deref(),
                call.body.author.as_deref(),
                Some(&res.content_sha1),
                &res.sizes,
                call.body.profile.as_deref(),
                None,
            ));
            INGEST_TOTAL.with_label_values(&["ok"]).inc();
            INGEST_LATENCY.with_label_values(&["ok"]).observe(elapsed);
            push_ingest("ok", Some(elapsed), "http");

            state.hook.on_ingest_success(
                &res.work_id,
                Some(&res.content_sha1),
                call.body.profile.as_deref(),
            );

            Ok(Json(json!({
                "work_id": res.work_id,
                "content_sha1": res.content_sha1,
                "sizes": res.sizes,
            })))
        }
        Err(e) => {
            emit_async(build_failed_event(
                &call.source,
                call.body.title.as_deref(),
                call.body.author.as_deref(),
                &e.to_string(),
                "ingest",
                call.body.profile.as_deref(),
                None,
            ));
            INGEST_TOTAL.with_label_values(&["fail"]).inc();
            INGEST_LATENCY.with_label_values(&["fail"]).observe(elapsed);
            push_ingest("fail", Some(elapsed), "http");
            Err(ApiError::server(format!("Ingest failed: {e}")))
        }
    }
}

async fn ingest(State(state): State<AppState>, request: Request) -> ApiResult<Response> {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_lowercase();

    if content_type.starts_with("application/json") {
        let bytes = axum::body::to_bytes(request.into_body(), usize::MAX)
            .await
            .map_err(|e| ApiError::bad_request(format!("Invalid body: {e}")))?;
        let body: IngestBody = serde_json::from_slice(&bytes)
            .map_err(|_| ApiError::bad_request("Invalid JSON body"))?;
        let path = body
            .path
            .clone()
            .ok_or_else(|| ApiError::bad_request("JSON requires 'path'"))?;

        let call = IngestCall {
            file: PathBuf::from(&path),
            source: path,
            cleanup: None,
            body,
        };
        return Ok((StatusCode::CREATED, run_ingest(&state, call).await?).into_response());
    }

    if content_type.contains("multipart/form-data") {
        let mut multipart = Multipart::from_request(request, &())
            .await
            .map_err(|e| ApiError::bad_request(e.to_string()))?;

        let mut body = IngestBody::default();
        let mut upload: Option<(String, Vec<u8>)> = None;
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::bad_request(e.to_string()))?
        {
            match field.name().unwrap_or_default() {
                "file" => {
                    let filename = field.file_name().unwrap_or("upload").to_string();
                    let bytes = field
                        .bytes()
                        .await
                        .map_err(|e| ApiError::bad_request(e.to_string()))?;
                    upload = Some((filename, bytes.to_vec()));
                }
                "path" => body.path = field.text().await.ok(),
                "title" => body.title = field.text().await.ok(),
                "author" => body.author = field.text().await.ok(),
                "profile" => body.profile = field.text().await.ok(),
                _ => {}
            }
        }

        if let Some((filename, bytes)) = upload {
            std::fs::create_dir_all(&state.inbox)
                .map_err(|e| ApiError::server(e.to_string()))?;
            let suffix = FsPath::new(&filename)
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| format!(".{e}"))
                .unwrap_or_default();
            let tmp = state
                .inbox
                .join(format!(".upload-{}{suffix}", Uuid::new_v4()));
            std::fs::write(&tmp, &bytes).map_err(|e| ApiError::server(e.to_string()))?;

            let call = IngestCall {
                file: tmp.clone(),
                source: format!("multipart:{filename}"),
                cleanup: Some(tmp),
                body,
            };
            return Ok((StatusCode::CREATED, run_ingest(&state, call).await?).into_response());
        }

        let path = body
            .path
            .clone()
            .ok_or_else(|| ApiError::bad_request("Provide file=@... or form field 'path'"))?;
        let call = IngestCall {
            file: PathBuf::from(&path),
            source: path,
            cleanup: None,
            body,
        };
        return Ok((StatusCode::CREATED, run_ingest(&state, call).await?).into_response());
    }

    // Last attempt: JSON body without the header.
    let bytes = axum::body::to_bytes(request.into_body(), usize::MAX)
        .await
        .unwrap_or_default();
    if let Ok(body) = serde_json::from_slice::<IngestBody>(&bytes) {
        if let Some(path) = body.path.clone() {
            let call = IngestCall {
                file: PathBuf::from(&path),
                source: path,
                cleanup: None,
                body,
            };
            return Ok((StatusCode::CREATED, run_ingest(&state, call).await?).into_response());
        }
    }

    Err(ApiError::new(
        StatusCode::UNSUPPORTED_MEDIA_TYPE,
        "UnsupportedMediaType",
        "Unsupported Content-Type. Use application/json or multipart/form-data.",
    ))
}

// ── Resegment ─────────────────────────────────────────────────────────────

fn default_window() -> usize {
    512
}

fn default_stride() -> usize {
    384
}

#[derive(Deserialize)]
struct ResegmentBody {
    profile: Option<String>,
    #[serde(default = "default_window")]
    window_chars: usize,
    #[serde(default = "default_stride")]
    stride_chars: usize,
}

async fn resegment(
    State(state): State<AppState>,
    Path(work_id): Path<String>,
    Json(body): Json<ResegmentBody>,
) -> ApiResult<Json<Value>> {
    let started = Instant::now();

    let conn = open_db(&state.db_path)?;
    ensure_schema(&conn)?;
    let work = persist::get_work(&conn, &work_id)?
        .ok_or_else(|| ApiError::not_found("work not found"))?;
    drop(conn);

    let db_path = state.db_path.clone();
    let id = work_id.clone();
    let profile = body.profile.clone();
    let result = tokio::task::spawn_blocking(move || {
        resegment_work(
            &db_path,
            &id,
            profile.as_deref(),
            Some(body.window_chars),
            Some(body.stride_chars),
        )
    })
    .await
    .map_err(|e| ApiError::server(e.to_string()))?;

    let elapsed = started.elapsed().as_secs_f64();
    let source = work
        .source
        .clone()
        .unwrap_or_else(|| format!("resegment:{work_id}"));

    match result {
        Ok(res) => {
            let mut extra = Map::new();
            extra.insert("resegment".into(), json!(true));
            emit_async(build_ingested_event(
                &state.db_path,
                &work_id,
                &source,
                work.title.as_deref(),
                work.author.as_deref(),
                work.content_sha1.as_deref(),
                &res.sizes,
                body.profile.as_deref(),
                Some(extra),
            ));
            RESEGMENT_TOTAL.with_label_values(&["ok"]).inc();
            RESEGMENT_LATENCY.with_label_values(&["ok"]).observe(elapsed);
            push_resegment("ok", Some(elapsed), "http");

            Ok(Json(json!({
                "ok": true,
                "work_id": work_id,
                "sizes": res.sizes,
                "profile": body.profile.as_deref().unwrap_or("default"),
            })))
        }
        Err(e) => {
            emit_async(build_failed_event(
                &source,
                work.title.as_deref(),
                work.author.as_deref(),
                &e.to_string(),
                "resegment",
                body.profile.as_deref(),
                None,
            ));
            RESEGMENT_TOTAL.with_label_values(&["fail"]).inc();
            RESEGMENT_LATENCY
                .with_label_values(&["fail"])
                .observe(elapsed);
            push_resegment("fail", Some(elapsed), "http");
            Err(ApiError::server(format!("Resegment failed: {e}")))
        }
    }
}

// ── Metrics ───────────────────────────────────────────────────────────────

async fn metrics_handler() -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather_text(),
    )
        .into_response()
}

// ── Main ──────────────────────────────────────────────────────────────────

fn cors_layer() -> Option<CorsLayer> {
    let enabled = std::env::var("CORS_ENABLED")
        .map(|v| !matches!(v.to_lowercase().as_str(), "0" | "false" | "no"))
        .unwrap_or(true);
    if !enabled {
        return None;
    }
    let origins = std::env::var("CORS_ALLOW_ORIGINS").unwrap_or_else(|_| "*".to_string());
    if origins.trim() == "*" {
        return Some(CorsLayer::permissive());
    }
    let parsed: Vec<HeaderValue> = origins
        .split(',')
        .filter_map(|o| o.trim().parse().ok())
        .collect();
    Some(CorsLayer::new().allow_origin(parsed))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let db_path = std::env::var("DB_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./scriptorium.db"));
    let inbox = std::env::var("INBOX")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./inbox"));

    // Ensure the schema up front so read routes work on a fresh database.
    match open_db(&db_path) {
        Ok(conn) => {
            if let Err(e) = ensure_schema(&conn) {
                tracing::error!(error = %e, "schema init failed");
            }
        }
        Err(e) => tracing::error!(error = %e, "cannot open database"),
    }

    let state: AppState = Arc::new(ServerState {
        db_path,
        inbox,
        hook: scriptorium::hook::from_env(),
    });

    let mut app = axum::Router::new()
        .route("/v1/healthz", get(healthz))
        .route("/v1/readyz", get(readyz))
        .route("/v1/parsers", get(list_parsers))
        .route("/v1/profiles", get(list_profiles))
        .route("/v1/works", get(list_works))
        .route("/v1/works/{id}", get(get_work))
        .route("/v1/works/{id}/scenes", get(get_scenes))
        .route("/v1/works/{id}/chunks", get(get_chunks))
        .route("/v1/works/{id}/slice", get(get_slice))
        .route("/v1/works/{id}/resegment", post(resegment))
        .route("/v1/search", get(search))
        .route("/v1/ingest", post(ingest))
        .route("/metrics", get(metrics_handler))
        .layer(middleware::from_fn(request_meta))
        .layer(DefaultBodyLimit::max(64 * 1024 * 1024))
        .with_state(state);

    if let Some(cors) = cors_layer() {
        app = app.layer(cors);
    }

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8000);
    let addr = format!("0.0.0.0:{port}");
    tracing::info!(addr = %addr, "scriptorium server listening");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, addr = %addr, "bind failed");
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "server error");
        std::process::exit(1);
    }
}
