//! scriptorium CLI: ingest, resegment, inspect, and watch.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use serde_json::{Map, json};

use scriptorium::events::{build_failed_event, build_ingested_event, emit_async};
use scriptorium::ingest::{IngestOptions, ingest_file, resegment_work};
use scriptorium::metrics::{push_ingest, push_resegment};
use scriptorium::persist::{ensure_schema, list_works, open_db};
use scriptorium::watcher::{WatcherConfig, run_watcher};

fn default_db() -> PathBuf {
    std::env::var("DB_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./scriptorium.db"))
}

#[derive(Parser)]
#[command(name = "scriptorium", version, about = "Document ingestion service")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a single file. Emits document.ingested on success and
    /// document.failed on error.
    Ingest {
        /// File to ingest (.txt, .md, .pdf, .docx).
        path: PathBuf,

        /// Title stored on the work.
        #[arg(long)]
        title: Option<String>,

        /// Author stored on the work.
        #[arg(long)]
        author: Option<String>,

        /// SQLite database path (default: $DB_PATH or ./scriptorium.db).
        #[arg(long)]
        db: Option<PathBuf>,

        /// Segmentation profile (default, dense, sparse, markdown,
        /// screenplay, pdf_pages).
        #[arg(long)]
        profile: Option<String>,

        /// Print the emitted event payload.
        #[arg(long)]
        echo_event: bool,
    },

    /// Re-run segmentation and chunking for a stored work.
    Resegment {
        /// Work id to resegment.
        #[arg(long)]
        work_id: String,

        /// SQLite database path (default: $DB_PATH or ./scriptorium.db).
        #[arg(long)]
        db: Option<PathBuf>,

        /// Segmentation profile.
        #[arg(long)]
        profile: Option<String>,

        /// Chunk window in characters.
        #[arg(long, default_value = "512")]
        window_chars: usize,

        /// Chunk stride in characters.
        #[arg(long, default_value = "384")]
        stride_chars: usize,

        /// Print the emitted event payload.
        #[arg(long)]
        echo_event: bool,
    },

    /// List recent works with layer counts.
    Works {
        /// SQLite database path (default: $DB_PATH or ./scriptorium.db).
        #[arg(long)]
        db: Option<PathBuf>,

        /// Substring match on title or author.
        #[arg(long)]
        q: Option<String>,

        /// Maximum rows to list.
        #[arg(long, default_value = "50")]
        limit: u32,

        /// Print only work ids.
        #[arg(long)]
        ids_only: bool,
    },

    /// List registered parser extensions.
    Parsers,

    /// List built-in segmentation profiles.
    Profiles,

    /// Run the inbox watcher (configuration from the environment).
    Watch,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Ingest {
            path,
            title,
            author,
            db,
            profile,
            echo_event,
        } => {
            let db = db.unwrap_or_else(default_db);
            let opts = IngestOptions {
                title: title.clone(),
                author: author.clone(),
                profile: profile.clone(),
                ..Default::default()
            };
            match ingest_file(&db, &path, &opts) {
                Ok(res) => {
                    println!(
                        "work_id={} sha1={} sizes={}",
                        res.work_id,
                        res.content_sha1,
                        json!(res.sizes)
                    );

                    // Fill title/author from the stored row when not given.
                    let stored = open_db(&db)
                        .ok()
                        .and_then(|conn| scriptorium::persist::get_work(&conn, &res.work_id).ok())
                        .flatten();
                    let title = title.or_else(|| stored.as_ref().and_then(|w| w.title.clone()));
                    let author = author.or_else(|| stored.as_ref().and_then(|w| w.author.clone()));

                    let event = build_ingested_event(
                        &db,
                        &res.work_id,
                        &path.display().to_string(),
                        title.as_deref(),
                        author.as_deref(),
                        Some(&res.content_sha1),
                        &res.sizes,
                        profile.as_deref(),
                        None,
                    );
                    emit_async(event.clone());
                    push_ingest("ok", None, "cli");
                    if echo_event {
                        println!("{event}");
                    }
                    Ok(())
                }
                Err(e) => {
                    emit_async(build_failed_event(
                        &path.display().to_string(),
                        title.as_deref(),
                        author.as_deref(),
                        &e.to_string(),
                        "cli-ingest",
                        profile.as_deref(),
                        None,
                    ));
                    push_ingest("fail", None, "cli");
                    Err(e.into())
                }
            }
        }

        Commands::Resegment {
            work_id,
            db,
            profile,
            window_chars,
            stride_chars,
            echo_event,
        } => {
            let db = db.unwrap_or_else(default_db);
            match resegment_work(
                &db,
                &work_id,
                profile.as_deref(),
                Some(window_chars),
                Some(stride_chars),
            ) {
                Ok(res) => {
                    println!(
                        "resegmented work_id={} sizes={} profile={}",
                        work_id,
                        json!(res.sizes),
                        profile.as_deref().unwrap_or("default")
                    );

                    let stored = open_db(&db)
                        .ok()
                        .and_then(|conn| scriptorium::persist::get_work(&conn, &work_id).ok())
                        .flatten();
                    let source = stored
                        .as_ref()
                        .and_then(|w| w.source.clone())
                        .unwrap_or_else(|| format!("resegment:{work_id}"));

                    let mut extra = Map::new();
                    extra.insert("resegment".into(), json!(true));
                    let event = build_ingested_event(
                        &db,
                        &work_id,
                        &source,
                        stored.as_ref().and_then(|w| w.title.as_deref()),
                        stored.as_ref().and_then(|w| w.author.as_deref()),
                        stored.as_ref().and_then(|w| w.content_sha1.as_deref()),
                        &res.sizes,
                        profile.as_deref(),
                        Some(extra),
                    );
                    emit_async(event.clone());
                    push_resegment("ok", None, "cli");
                    if echo_event {
                        println!("{event}");
                    }
                    Ok(())
                }
                Err(e) => {
                    emit_async(build_failed_event(
                        &format!("resegment:{work_id}"),
                        None,
                        None,
                        &e.to_string(),
                        "cli-resegment",
                        profile.as_deref(),
                        None,
                    ));
                    push_resegment("fail", None, "cli");
                    Err(e.into())
                }
            }
        }

        Commands::Works {
            db,
            q,
            limit,
            ids_only,
        } => {
            let db = db.unwrap_or_else(default_db);
            let conn = open_db(&db)?;
            ensure_schema(&conn)?;
            let rows = list_works(&conn, q.as_deref(), None, limit, 0)?;

            if ids_only {
                for row in &rows {
                    println!("{}", row.id);
                }
                return Ok(());
            }
            if rows.is_empty() {
                println!("(no works)");
                return Ok(());
            }
            println!(
                "{:36}  {:30}  {:>7}  {:>3}  {:>3}  CREATED_AT",
                "ID", "TITLE", "CHARS", "SCN", "CHK"
            );
            println!("{}", "-".repeat(100));
            for row in &rows {
                let title: String = row
                    .title
                    .clone()
                    .unwrap_or_default()
                    .chars()
                    .take(30)
                    .collect();
                println!(
                    "{:36}  {:30}  {:>7}  {:>3}  {:>3}  {}",
                    row.id, title, row.chars, row.scenes, row.chunks, row.created_at
                );
            }
            Ok(())
        }

        Commands::Parsers => {
            for ext in scriptorium::parser::registry().extensions() {
                println!("{ext}");
            }
            Ok(())
        }

        Commands::Profiles => {
            for name in scriptorium::profile::profile_names() {
                println!("{name}");
            }
            Ok(())
        }

        Commands::Watch => {
            let cfg = WatcherConfig::from_env();
            let stop = Arc::new(AtomicBool::new(false));
            for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
                signal_hook::flag::register(signal, Arc::clone(&stop)).into_diagnostic()?;
            }
            run_watcher(cfg, stop)?;
            Ok(())
        }
    }
}
