use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::llm::ProviderFailure;

/// Quota window that was exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaWindow {
    Hourly,
    Daily,
}

impl std::fmt::Display for QuotaWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuotaWindow::Hourly => write!(f, "hourly"),
            QuotaWindow::Daily => write!(f, "daily"),
        }
    }
}

/// Errors surfaced by the conversation pipeline.
///
/// The display strings are user-facing; per-provider failure details stay
/// in the `AllProvidersFailed` payload and go to the structured log only.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("conversation is busy, try again shortly")]
    LockTimeout,

    #[error("{window} limit of {limit} reached, resets at {reset_at}")]
    QuotaExceeded {
        window: QuotaWindow,
        limit: u32,
        reset_at: DateTime<Utc>,
    },

    #[error("service unavailable, no provider could answer")]
    AllProvidersFailed(Vec<ProviderFailure>),

    #[error("not authorized")]
    Unauthorized,

    #[error("unknown provider: '{0}'")]
    UnknownProvider(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Persistence(#[from] RepositoryError),
}

/// Errors from repository operations (used by trait definitions in colloquy-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}
