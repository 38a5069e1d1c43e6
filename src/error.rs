use thiserror::Error;

/// Errors surfaced by the memory engine.
///
/// `Redacted` is intentionally absent here — it is advisory, not a failure,
/// and is reported through `DiagnosticSink` instead (see `diagnostics.rs`).
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("embedding service unavailable: {0}")]
    EmbedderUnavailable(String),

    #[error("embedding service returned an unusable response: {0}")]
    EmbedderProtocol(String),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

pub type EngineResult<T> = Result<T, EngineError>;
