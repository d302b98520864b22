//! Command sandbox for rotor.
//!
//! Validates and executes the tool calls a model requests during an agent
//! turn:
//!
//! - **`run_terminal_command`** -- deny-list and pipe allow-list checks, then
//!   `sh -c` in the workspace root under a timeout.
//! - **`file_operation`** -- read, write, append, exists and list, confined
//!   to the workspace root with traversal and symlink escapes refused.
//! - **`browse_website`** -- fetches public http(s) pages, refusing local and
//!   private addresses (redirects included), and extracts readable text.
//! - **`web_search`** -- DuckDuckGo HTML or the Brave Search API.
//!
//! All failures are reported as a [`ToolOutcome`] with a [`ToolErrorKind`];
//! nothing in the sandbox aborts the caller.

pub mod config;
pub mod error;
pub mod filesystem;
pub mod policy;
pub mod sandbox;
pub mod search;
pub mod shell;
pub mod tools;
pub mod web;

pub use config::{DEFAULT_PIPE_TARGETS, SandboxConfig};
pub use error::{Result, SandboxError, ToolError, ToolErrorKind};
pub use filesystem::{FileOp, Workspace};
pub use policy::CommandPolicy;
pub use sandbox::CommandSandbox;
pub use search::{SearchEngine, SearchHit, WebSearcher};
pub use shell::ShellRunner;
pub use tools::{ToolDefinition, ToolKind, ToolOutcome, ToolTable};
pub use web::{WebFetcher, is_private_ip};
