//! Agent error types.
//!
//! [`ProviderError`] is what an adapter returns when a call fails; the agent
//! loop classifies it and either rotates to another model or gives up with
//! an [`AgentError`].  Every `AgentError` renders as a single line and carries
//! a stable diagnostic [`code`](AgentError::code).

use rotor_rotation::{Category, RotationError};

use crate::classifier::ErrorKind;

/// A failed provider call, as reported by a [`ProviderAdapter`](crate::ProviderAdapter).
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    /// The provider answered with a non-success HTTP status.
    #[error("provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The call did not complete in time.
    #[error("provider request timed out: {reason}")]
    Timeout { reason: String },

    /// The provider could not be reached.
    #[error("provider connection failed: {reason}")]
    Connection { reason: String },

    /// The provider answered, but the response could not be understood.
    #[error("malformed provider response: {reason}")]
    Malformed { reason: String },

    /// Anything else.
    #[error("provider error: {reason}")]
    Other { reason: String },
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                reason: err.to_string(),
            }
        } else if err.is_connect() {
            Self::Connection {
                reason: err.to_string(),
            }
        } else if err.is_decode() {
            Self::Malformed {
                reason: err.to_string(),
            }
        } else {
            Self::Other {
                reason: err.to_string(),
            }
        }
    }
}

/// A terminal failure of one request.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// No active, non-blacklisted model serves the requested category.
    #[error("no model available for category `{category}`")]
    NoModelAvailable { category: Category },

    /// Every candidate failed, or the retry budget ran out.
    #[error("all models exhausted for category `{category}` after {attempts} failed attempts; last error: {last_error}")]
    AllModelsExhausted {
        category: Category,
        attempts: u32,
        last_error: String,
    },

    /// The provider rejected the credentials.  The model has been deactivated.
    #[error("authentication failed for model `{model_id}` ({provider}): {reason}")]
    AuthenticationFailed {
        model_id: String,
        provider: String,
        reason: String,
    },

    /// A non-retryable provider failure.
    #[error("model `{model_id}` failed ({kind}): {reason}")]
    ProviderFailed {
        model_id: String,
        kind: ErrorKind,
        reason: String,
    },

    /// An explicit model override does not name a catalogue entry.
    #[error("unknown model `{model_id}`")]
    UnknownModel { model_id: String },

    /// The caller stopped the request.
    #[error("request cancelled")]
    Cancelled,

    /// Catch-all for unexpected internal errors.
    #[error("internal agent error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Stable machine-readable identifier for the failure.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoModelAvailable { .. } => "no_model_available",
            Self::AllModelsExhausted { .. } => "all_models_exhausted",
            Self::AuthenticationFailed { .. } => "authentication_failed",
            Self::ProviderFailed { .. } => "provider_failed",
            Self::UnknownModel { .. } => "unknown_model",
            Self::Cancelled => "cancelled",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<RotationError> for AgentError {
    fn from(err: RotationError) -> Self {
        match err {
            RotationError::UnknownModel { model_id, .. } => Self::UnknownModel { model_id },
            other => Self::Internal(other.to_string()),
        }
    }
}

/// Convenience alias used throughout the agent crate.
pub type Result<T> = std::result::Result<T, AgentError>;
