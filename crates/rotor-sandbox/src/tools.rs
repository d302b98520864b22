//! Tool kinds, their schema, and the outcome record returned to the model.
//!
//! The set of tools is closed: [`ToolKind`] enumerates every action a model
//! may request, and the [`ToolTable`] maps each kind to exactly one
//! [`ToolDefinition`].  The table is built and validated once at startup, so
//! an unknown or duplicated tool is a configuration error rather than a
//! silent no-op at request time.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{SandboxError, ToolError, ToolErrorKind};

// ---------------------------------------------------------------------------
// ToolKind
// ---------------------------------------------------------------------------

/// Every action the sandbox can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    RunTerminalCommand,
    FileOperation,
    BrowseWebsite,
    WebSearch,
}

impl ToolKind {
    pub const ALL: [ToolKind; 4] = [
        ToolKind::RunTerminalCommand,
        ToolKind::FileOperation,
        ToolKind::BrowseWebsite,
        ToolKind::WebSearch,
    ];

    /// The name the model uses to call the tool.
    pub fn name(&self) -> &'static str {
        match self {
            Self::RunTerminalCommand => "run_terminal_command",
            Self::FileOperation => "file_operation",
            Self::BrowseWebsite => "browse_website",
            Self::WebSearch => "web_search",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

/// A tool exposed to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Machine-readable tool name (e.g. `run_terminal_command`).
    pub name: String,
    /// Human-readable description of what the tool does.
    pub description: String,
    /// JSON Schema describing the tool's input parameters.
    pub parameters: Value,
}

impl ToolDefinition {
    /// The `{type: "function", function: {..}}` form sent to providers.
    pub fn to_function_schema(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

fn definition(kind: ToolKind) -> ToolDefinition {
    let (description, parameters) = match kind {
        ToolKind::RunTerminalCommand => (
            "Run a shell command in the workspace and return its output. \
             Destructive commands, command substitution and pipes into \
             unknown programs are refused.",
            json!({
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "description": "The shell command to execute"
                    },
                    "timeout": {
                        "type": "number",
                        "description": "Timeout in seconds (default: 30)"
                    }
                },
                "required": ["command"]
            }),
        ),
        ToolKind::FileOperation => (
            "Read, write, append to, check or list files inside the workspace.",
            json!({
                "type": "object",
                "properties": {
                    "operation": {
                        "type": "string",
                        "enum": ["read", "write", "append", "exists", "list"],
                        "description": "The operation to perform"
                    },
                    "path": {
                        "type": "string",
                        "description": "Path relative to the workspace root"
                    },
                    "content": {
                        "type": "string",
                        "description": "Content for write and append"
                    }
                },
                "required": ["operation", "path"]
            }),
        ),
        ToolKind::BrowseWebsite => (
            "Fetch a public web page and return its readable text. \
             Local and private network addresses are refused.",
            json!({
                "type": "object",
                "properties": {
                    "url": {
                        "type": "string",
                        "description": "The http(s) URL to fetch"
                    },
                    "selector": {
                        "type": "string",
                        "description": "Optional selector: tag, .class, #id, tag.class or tag#id"
                    },
                    "maxContentLength": {
                        "type": "integer",
                        "description": "Maximum characters to return (default: 20000)"
                    }
                },
                "required": ["url"]
            }),
        ),
        ToolKind::WebSearch => (
            "Search the web and return numbered titles, URLs and snippets.",
            json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The search query"
                    },
                    "numResults": {
                        "type": "integer",
                        "description": "Number of results, 1 to 20 (default: 10)"
                    },
                    "engine": {
                        "type": "string",
                        "enum": ["duckduckgo", "brave"],
                        "description": "Search backend (default: brave when configured, else duckduckgo)"
                    }
                },
                "required": ["query"]
            }),
        ),
    };

    ToolDefinition {
        name: kind.name().to_owned(),
        description: description.to_owned(),
        parameters,
    }
}

// ---------------------------------------------------------------------------
// ToolTable
// ---------------------------------------------------------------------------

/// Validated mapping from [`ToolKind`] to its definition.
#[derive(Debug, Clone)]
pub struct ToolTable {
    entries: Vec<(ToolKind, ToolDefinition)>,
}

impl ToolTable {
    /// The table of all built-in tools.
    pub fn standard() -> std::result::Result<Self, SandboxError> {
        Self::from_entries(ToolKind::ALL.into_iter().map(|k| (k, definition(k))).collect())
    }

    /// Build a table, checking that every kind appears exactly once and
    /// that each definition carries its kind's name.
    pub fn from_entries(
        entries: Vec<(ToolKind, ToolDefinition)>,
    ) -> std::result::Result<Self, SandboxError> {
        for kind in ToolKind::ALL {
            let count = entries.iter().filter(|(k, _)| *k == kind).count();
            if count != 1 {
                return Err(SandboxError::InvalidToolTable(format!(
                    "`{kind}` has {count} definitions"
                )));
            }
        }
        if let Some((kind, def)) = entries.iter().find(|(k, d)| d.name != k.name()) {
            return Err(SandboxError::InvalidToolTable(format!(
                "definition `{}` registered for `{kind}`",
                def.name
            )));
        }
        Ok(Self { entries })
    }

    /// Resolve a tool name from a model response.
    pub fn kind_for(&self, name: &str) -> Option<ToolKind> {
        self.entries
            .iter()
            .find(|(_, def)| def.name == name)
            .map(|(kind, _)| *kind)
    }

    pub fn definitions(&self) -> impl Iterator<Item = &ToolDefinition> {
        self.entries.iter().map(|(_, def)| def)
    }

    /// The tool schema array sent with every provider call.
    pub fn schema(&self) -> Vec<Value> {
        self.definitions()
            .map(ToolDefinition::to_function_schema)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// ToolOutcome
// ---------------------------------------------------------------------------

/// What a tool call produced.  Failures are values, not errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutcome {
    /// Output on success, a human-readable reason on failure.
    pub output: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ToolErrorKind>,
}

impl ToolOutcome {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            success: true,
            error_kind: None,
        }
    }

    pub fn failed(error: &ToolError) -> Self {
        Self {
            output: error.to_string(),
            success: false,
            error_kind: Some(error.kind()),
        }
    }
}

impl From<crate::error::Result<String>> for ToolOutcome {
    fn from(result: crate::error::Result<String>) -> Self {
        match result {
            Ok(output) => Self::ok(output),
            Err(e) => Self::failed(&e),
        }
    }
}
