//! Extraction error taxonomy shared by extractors, the refresh path and the
//! persisted `scraping_errors` entries.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{IdentifierError, Source};

/// Error kinds as recorded in `scraping_errors[].kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidIdentifier,
    UserNotFound,
    RateLimited,
    TransientNetwork,
    SchemaError,
    RendererError,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidIdentifier => "invalid_identifier",
            ErrorKind::UserNotFound => "user_not_found",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::TransientNetwork => "transient_network",
            ErrorKind::SchemaError => "schema_error",
            ErrorKind::RendererError => "renderer_error",
            ErrorKind::Cancelled => "cancelled",
        }
    }

    /// Terminal kinds stop the tier pipeline instead of falling through.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ErrorKind::InvalidIdentifier | ErrorKind::UserNotFound | ErrorKind::Cancelled
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tier's failure, kept for the exhausted-pipeline diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierAttempt {
    pub tier: String,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(transparent)]
    Identifier(#[from] IdentifierError),
    #[error("{platform} user not found: {handle}")]
    UserNotFound { platform: Source, handle: String },
    #[error("rate limited by {url} after {attempts} attempts")]
    RateLimited { url: String, attempts: usize },
    #[error("network error: {0}")]
    TransientNetwork(String),
    #[error("unexpected response shape: {0}")]
    Schema(String),
    #[error("headless browser error: {0}")]
    Renderer(String),
    #[error("extraction cancelled")]
    Cancelled,
    #[error("all {platform} tiers failed: {}", summarize(attempts))]
    TiersExhausted {
        platform: Source,
        attempts: Vec<TierAttempt>,
    },
}

fn summarize(attempts: &[TierAttempt]) -> String {
    attempts
        .iter()
        .map(|a| format!("{} [{}]: {}", a.tier, a.kind, a.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl ExtractError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExtractError::Identifier(_) => ErrorKind::InvalidIdentifier,
            ExtractError::UserNotFound { .. } => ErrorKind::UserNotFound,
            ExtractError::RateLimited { .. } => ErrorKind::RateLimited,
            ExtractError::TransientNetwork(_) => ErrorKind::TransientNetwork,
            ExtractError::Schema(_) => ErrorKind::SchemaError,
            ExtractError::Renderer(_) => ErrorKind::RendererError,
            ExtractError::Cancelled => ErrorKind::Cancelled,
            ExtractError::TiersExhausted { attempts, .. } => attempts
                .last()
                .map(|a| a.kind)
                .unwrap_or(ErrorKind::SchemaError),
        }
    }

    pub fn schema(message: impl Into<String>) -> Self {
        ExtractError::Schema(message.into())
    }

    pub fn not_found(platform: Source, handle: impl Into<String>) -> Self {
        ExtractError::UserNotFound {
            platform,
            handle: handle.into(),
        }
    }
}
