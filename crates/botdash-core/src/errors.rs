use std::path::PathBuf;

/// Core error type for the dashboard.
///
/// Adapter crates map their specific errors into this type so the HTTP layer
/// can turn every failure into a status code the same way.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("not signed in")]
    Unauthenticated,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("upstream unavailable: {0}")]
    Upstream(String),

    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid path: {path}: {reason}")]
    InvalidPath { path: PathBuf, reason: String },

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    /// Whether the failure came from the caller's input rather than from us or a collaborator.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::Unauthenticated
                | Error::Forbidden(_)
                | Error::Validation(_)
                | Error::InvalidPath { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
