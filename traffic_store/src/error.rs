use std::path::PathBuf;

use thiserror::Error;

/// Failures of the loader, the table store and the queries over it.
///
/// An empty query result is never an error; queries return an empty `Vec`.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A required column is absent from an input file header.
    #[error("schema mismatch in {table}: required column `{column}` not found")]
    SchemaMismatch { table: &'static str, column: String },

    /// A cell could not be parsed into the column's type.
    #[error("invalid value {value:?} for column `{column}` in {table} (line {line})")]
    InvalidValue {
        table: &'static str,
        line: u64,
        column: String,
        value: String,
    },

    /// The store was queried before a successful load/publish.
    #[error("table store unavailable at {}", .0.display())]
    StoreUnavailable(PathBuf),

    /// Another rebuild holds the write lock. `owner` is the pid recorded in
    /// the lock file, if readable.
    #[error(
        "table store at {} is being rebuilt (lock {} held by {}); if no build is running the lock is stale and can be removed",
        .store.display(),
        .lock.display(),
        .owner.map_or_else(|| "unknown pid".to_string(), |pid| format!("pid {pid}"))
    )]
    StoreBusy {
        store: PathBuf,
        lock: PathBuf,
        owner: Option<u32>,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unknown table `{0}`")]
    UnknownTable(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("store encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
