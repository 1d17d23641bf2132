//! Rich diagnostic error types for the ingestion service.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes, help text, and source chains so users know exactly what
//! went wrong and how to fix it.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the scriptorium service.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain (error codes, help text, source spans) through to the user.
#[derive(Debug, Error, Diagnostic)]
pub enum ScriptoriumError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Persist(#[from] PersistError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Watch(#[from] WatchError),
}

// ---------------------------------------------------------------------------
// Parser errors
// ---------------------------------------------------------------------------

/// Errors from file parsing.
#[derive(Debug, Error, Diagnostic)]
pub enum ParseError {
    #[error("no parser registered for extension \"{ext}\"")]
    #[diagnostic(
        code(scriptorium::parse::unsupported_file_type),
        help(
            "Supported extensions are .txt, .md, .pdf, and .docx. \
             List the registered parsers with `scriptorium parsers`."
        )
    )]
    UnsupportedFileType { ext: String },

    #[error("parser backend for {parser} is unavailable: {message}")]
    #[diagnostic(
        code(scriptorium::parse::dependency_missing),
        help("An optional parser backend could not be loaded. Check the build features.")
    )]
    DependencyMissing { parser: String, message: String },

    #[error("failed to parse {format} file \"{path}\": {message}")]
    #[diagnostic(
        code(scriptorium::parse::malformed),
        help("Verify the file is valid {format} and not truncated or corrupted.")
    )]
    Malformed {
        format: String,
        path: String,
        message: String,
    },

    #[error("failed to read \"{path}\": {source}")]
    #[diagnostic(
        code(scriptorium::parse::io),
        help("Check that the file exists and you have read permission.")
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience alias for parser results.
pub type ParserResult<T> = std::result::Result<T, ParseError>;

// ---------------------------------------------------------------------------
// Persistence errors
// ---------------------------------------------------------------------------

/// Errors from the SQLite persistence layer.
#[derive(Debug, Error, Diagnostic)]
pub enum PersistError {
    #[error("failed to open database at \"{path}\": {source}")]
    #[diagnostic(
        code(scriptorium::persist::open),
        help(
            "Check that the parent directory exists, the path is writable, \
             and the file is a SQLite database."
        )
    )]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("database operation failed: {0}")]
    #[diagnostic(
        code(scriptorium::persist::sqlite),
        help(
            "A SQL statement failed. If this is a constraint violation, the \
             database may already contain conflicting rows; otherwise check \
             disk space and file permissions."
        )
    )]
    Sqlite(#[from] rusqlite::Error),
}

/// Convenience alias for persistence results.
pub type PersistResult<T> = std::result::Result<T, PersistError>;

// ---------------------------------------------------------------------------
// Ingest errors
// ---------------------------------------------------------------------------

/// Errors from the ingestion orchestrator.
#[derive(Debug, Error, Diagnostic)]
pub enum IngestError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Persist(#[from] PersistError),

    #[error("file exceeds the {limit_mb} MB ingest limit: \"{path}\"")]
    #[diagnostic(
        code(scriptorium::ingest::oversized),
        help("Raise MAX_FILE_MB or split the input into smaller documents.")
    )]
    OversizedInput { path: String, limit_mb: u64 },

    #[error("work not found: \"{id}\"")]
    #[diagnostic(
        code(scriptorium::ingest::work_not_found),
        help("No work with this id exists. List works with `scriptorium works --ids-only`.")
    )]
    WorkNotFound { id: String },
}

/// Convenience alias for ingest results.
pub type IngestResult<T> = std::result::Result<T, IngestError>;

// ---------------------------------------------------------------------------
// Watcher errors
// ---------------------------------------------------------------------------

/// Errors from the inbox watcher.
#[derive(Debug, Error, Diagnostic)]
pub enum WatchError {
    #[error("failed to create directory \"{path}\": {source}")]
    #[diagnostic(
        code(scriptorium::watch::create_dir),
        help("Check that the parent directory exists and you have write permission.")
    )]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to move \"{from}\" to \"{to}\": {source}")]
    #[diagnostic(
        code(scriptorium::watch::disposition),
        help(
            "The terminal rename into the success/fail directory failed. \
             Both directories should live on the same filesystem as the inbox."
        )
    )]
    Disposition {
        from: String,
        to: String,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience alias for watcher results.
pub type WatchResult<T> = std::result::Result<T, WatchError>;
