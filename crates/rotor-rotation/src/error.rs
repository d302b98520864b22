//! Rotation error types.
//!
//! Every fallible operation on the catalogue, the rotation manager, or the
//! persisted state file surfaces a [`RotationError`].

use std::path::PathBuf;

/// Unified error type for the rotation crate.
#[derive(Debug, thiserror::Error)]
pub enum RotationError {
    /// A model id (or an explicit `(provider, model)` override) is not in
    /// the catalogue.
    #[error(
        "unknown model `{model_id}`{}",
        .provider.as_deref().map(|p| format!(" for provider `{p}`")).unwrap_or_default()
    )]
    UnknownModel {
        model_id: String,
        provider: Option<String>,
    },

    /// A model references a provider that is not declared.
    #[error("unknown provider: {provider}")]
    UnknownProvider { provider: String },

    /// The catalogue contains no models at all.
    #[error("model catalogue is empty")]
    EmptyCatalogue,

    /// The catalogue failed validation (duplicate ids, bad references).
    #[error("invalid catalogue: {reason}")]
    InvalidCatalogue { reason: String },

    /// Writing the state file failed.
    #[error("failed to persist rotation state to {path}: {reason}")]
    Persist { path: PathBuf, reason: String },

    /// An I/O operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML catalogue parsing failed.
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Convenience alias used throughout the rotation crate.
pub type Result<T> = std::result::Result<T, RotationError>;
