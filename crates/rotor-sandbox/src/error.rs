//! Sandbox error types.
//!
//! Two error types live here:
//!
//! - [`ToolError`] describes why a single tool call failed.  It never crosses
//!   the sandbox boundary: [`CommandSandbox`](crate::CommandSandbox) turns it
//!   into a failed [`ToolOutcome`](crate::ToolOutcome) carrying a
//!   [`ToolErrorKind`].
//! - [`SandboxError`] is returned only while building the sandbox (bad tool
//!   table, unusable workspace root, HTTP client construction).

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Coarse classification of a failed tool call, attached to the result the
/// model sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    /// Rejected by policy before any I/O.
    Unsafe,
    /// Unknown tool, or a missing file or directory.
    NotFound,
    /// Arguments missing or of the wrong type.
    InvalidArguments,
    /// The action ran and failed.
    ExecutionFailed,
    /// The action exceeded its time limit and was terminated.
    Timeout,
}

impl std::fmt::Display for ToolErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unsafe => write!(f, "unsafe"),
            Self::NotFound => write!(f, "not_found"),
            Self::InvalidArguments => write!(f, "invalid_arguments"),
            Self::ExecutionFailed => write!(f, "execution_failed"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// Why a tool call did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// The request was refused by the safety policy.  Nothing was executed.
    #[error("rejected as unsafe: {reason}")]
    Unsafe { reason: String },

    /// The tool or the target resource does not exist.
    #[error("not found: {what}")]
    NotFound { what: String },

    /// The arguments supplied to a tool are invalid.
    #[error("invalid arguments for `{tool}`: {reason}")]
    InvalidArguments { tool: String, reason: String },

    /// The action ran but failed.
    #[error("execution failed: {reason}")]
    ExecutionFailed { reason: String },

    /// The action exceeded its time limit.
    #[error("{what} timed out after {}s", .after.as_secs_f64())]
    Timeout { what: String, after: Duration },
}

impl ToolError {
    /// The kind reported alongside the failed outcome.
    pub fn kind(&self) -> ToolErrorKind {
        match self {
            Self::Unsafe { .. } => ToolErrorKind::Unsafe,
            Self::NotFound { .. } => ToolErrorKind::NotFound,
            Self::InvalidArguments { .. } => ToolErrorKind::InvalidArguments,
            Self::ExecutionFailed { .. } => ToolErrorKind::ExecutionFailed,
            Self::Timeout { .. } => ToolErrorKind::Timeout,
        }
    }

    pub(crate) fn unsafe_(reason: impl Into<String>) -> Self {
        Self::Unsafe {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid(tool: &str, reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            tool: tool.to_owned(),
            reason: reason.into(),
        }
    }

    pub(crate) fn failed(reason: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            reason: reason.into(),
        }
    }
}

/// Errors raised while constructing a [`CommandSandbox`](crate::CommandSandbox).
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// The tool table is inconsistent with [`ToolKind`](crate::ToolKind).
    #[error("invalid tool table: {0}")]
    InvalidToolTable(String),

    /// The workspace root does not exist or is not a directory.
    #[error("unusable workspace root `{}`: {reason}", .path.display())]
    WorkspaceRoot { path: PathBuf, reason: String },

    /// A command policy pattern failed to compile.
    #[error("invalid command policy pattern: {0}")]
    Policy(#[from] regex::Error),

    /// The HTTP client could not be built.
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result of an individual tool handler.
pub type Result<T> = std::result::Result<T, ToolError>;
