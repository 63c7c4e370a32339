mod classifier;

pub use classifier::{classify_failure, classify_provider_error};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Langbase error: {0}")]
    Langbase(#[from] LangbaseError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Langbase API errors
#[derive(Debug, Error)]
pub enum LangbaseError {
    #[error("Langbase unavailable: {message} (retries: {retries})")]
    Unavailable { message: String, retries: u32 },

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Errors surfaced by pipeline collaborators (classifier, expander, search
/// provider, reasoning strategies).
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Provider request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },

    #[error("Invalid provider response: {message}")]
    InvalidResponse { message: String },

    #[error("Provider unavailable: {message}")]
    Unavailable { message: String },
}

impl From<LangbaseError> for ProviderError {
    fn from(err: LangbaseError) -> Self {
        match err {
            LangbaseError::Api { status, message } => ProviderError::Api { status, message },
            LangbaseError::Timeout { timeout_ms } => ProviderError::Timeout { timeout_ms },
            LangbaseError::InvalidResponse { message } => {
                ProviderError::InvalidResponse { message }
            }
            LangbaseError::Unavailable { message, .. } => ProviderError::Unavailable { message },
            LangbaseError::Http(e) if e.is_connect() => ProviderError::Connection {
                message: e.to_string(),
            },
            LangbaseError::Http(e) if e.is_timeout() => ProviderError::Timeout { timeout_ms: 0 },
            LangbaseError::Http(e) => ProviderError::Unavailable {
                message: e.to_string(),
            },
        }
    }
}

/// Typed failure categories the workflow engine uses to decide stop vs continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The provider rejected our credentials.
    ProviderAuthFailed,
    /// The provider quota or rate limit is exhausted.
    ProviderQuotaExceeded,
    /// The provider could not be reached.
    ProviderConnectionError,
    /// A single stage produced reduced output; the pipeline continues.
    StageDegraded,
}

impl ErrorKind {
    /// Whether this kind halts the pipeline.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ErrorKind::StageDegraded)
    }

    /// Deterministic user-facing explanation. Never includes provider text.
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorKind::ProviderAuthFailed => {
                "The knowledge service rejected our credentials, so this question could not be answered. Please ask an administrator to check the API key configuration."
            }
            ErrorKind::ProviderQuotaExceeded => {
                "The knowledge service usage quota has been reached, so this question could not be answered right now. Please wait a few minutes and try again."
            }
            ErrorKind::ProviderConnectionError => {
                "The knowledge service could not be reached, so this question could not be answered. Please check connectivity and try again."
            }
            ErrorKind::StageDegraded => {
                "Part of the answer pipeline was unavailable; the response may be less complete than usual."
            }
        }
    }

    /// Get the kind name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ProviderAuthFailed => "provider_auth_failed",
            ErrorKind::ProviderQuotaExceeded => "provider_quota_exceeded",
            ErrorKind::ProviderConnectionError => "provider_connection_error",
            ErrorKind::StageDegraded => "stage_degraded",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Typed error recorded on a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineError {
    pub kind: ErrorKind,
    /// Internal detail for logs and traces; not shown to end users.
    pub message: String,
}

impl PipelineError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Build a pipeline error from a raw collaborator failure.
    pub fn from_provider(err: &ProviderError) -> Self {
        Self::new(classify_provider_error(err), err.to_string())
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::StageDegraded, message)
    }

    pub fn is_fatal(&self) -> bool {
        self.kind.is_fatal()
    }
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for Langbase operations
pub type LangbaseResult<T> = Result<T, LangbaseError>;

/// Result type alias for collaborator calls
pub type ProviderResult<T> = Result<T, ProviderError>;
