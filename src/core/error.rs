use thiserror::Error;

/// Top-level error for the backfill engine.
#[derive(Debug, Error)]
pub enum FillError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Adapter(#[from] crate::adapter::AdapterError),

    #[error(transparent)]
    Store(#[from] crate::store::StoreError),

    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    #[error("interrupt requested")]
    Interrupted,

    #[error("invalid parameters: {0}")]
    InvalidParams(String),
}
