//! Sandbox configuration.
//!
//! [`SandboxConfig`] controls the limits and permissions applied to every tool
//! call.  Defaults come from the [`Default`] implementation; the struct also
//! deserialises from the `[sandbox]` table of the config file (every field
//! optional), and a builder-style API lets callers adjust fields fluently.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Executables a command may pipe into when no list is configured.
pub const DEFAULT_PIPE_TARGETS: &[&str] = &[
    "cat", "column", "cut", "egrep", "fgrep", "grep", "head", "jq", "nl", "sort", "tail", "tr",
    "uniq", "wc",
];

/// Limits and permissions for the command sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Directory all file operations and commands are confined to.
    ///
    /// Default: the current directory.
    pub workspace_root: PathBuf,

    /// Time limit for a terminal command when the call does not give one.
    ///
    /// Default: **30 s**.
    pub command_timeout_secs: u64,

    /// Maximum bytes kept from each of stdout and stderr.
    ///
    /// Default: **100 KiB**.
    pub max_output_bytes: usize,

    /// Maximum characters returned by a file read.
    ///
    /// Default: **16 000**.
    pub max_file_read_chars: usize,

    /// Time limit for a single web request.
    ///
    /// Default: **30 s**.
    pub fetch_timeout_secs: u64,

    /// Maximum characters returned by `browse_website` when the call does not
    /// give a limit.
    ///
    /// Default: **20 000**.
    pub max_content_length: usize,

    /// Number of search results when the call does not ask for a count.
    ///
    /// Default: **10**.
    pub max_search_results: usize,

    /// Executables allowed on the right-hand side of a pipe.
    pub allowed_pipe_targets: Vec<String>,

    /// Additional paths no file operation may touch, on top of the built-in
    /// system locations.
    pub extra_sensitive_paths: Vec<PathBuf>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("."),
            command_timeout_secs: 30,
            max_output_bytes: 100 * 1024,
            max_file_read_chars: 16_000,
            fetch_timeout_secs: 30,
            max_content_length: 20_000,
            max_search_results: 10,
            allowed_pipe_targets: DEFAULT_PIPE_TARGETS.iter().map(|s| (*s).to_owned()).collect(),
            extra_sensitive_paths: Vec::new(),
        }
    }
}

impl SandboxConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Confine file operations and commands to `root`.
    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = root.into();
        self
    }

    /// Set the default command timeout (in seconds).
    pub fn with_command_timeout_secs(mut self, secs: u64) -> Self {
        self.command_timeout_secs = secs;
        self
    }

    /// Set the per-stream output cap (in bytes).
    pub fn with_max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }

    /// Set the file read cap (in characters).
    pub fn with_max_file_read_chars(mut self, chars: usize) -> Self {
        self.max_file_read_chars = chars;
        self
    }

    /// Set the web request timeout (in seconds).
    pub fn with_fetch_timeout_secs(mut self, secs: u64) -> Self {
        self.fetch_timeout_secs = secs;
        self
    }

    /// Set the default page content cap (in characters).
    pub fn with_max_content_length(mut self, chars: usize) -> Self {
        self.max_content_length = chars;
        self
    }

    /// Replace the pipe target allow-list.
    pub fn with_allowed_pipe_targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_pipe_targets = targets.into_iter().map(Into::into).collect();
        self
    }

    /// Add a path no file operation may touch.
    pub fn with_sensitive_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.extra_sensitive_paths.push(path.into());
        self
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}
