//! Core types for provider interaction.
//!
//! These types model the data flowing between the agent loop and provider
//! adapters.  They are provider-agnostic; each adapter translates them into
//! its own wire format.

use rotor_sandbox::{ToolErrorKind, ToolOutcome};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// The role of a participant in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System-level instructions that shape model behavior.
    System,
    /// Input from the human user.
    User,
    /// Output from the model.
    Assistant,
    /// Result of a tool invocation, fed back to the model.
    Tool,
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,

    /// The textual content.  For [`Role::Tool`] messages this is the tool
    /// output; for assistant messages carrying only tool calls it may be
    /// empty.
    #[serde(default)]
    pub content: String,

    /// Tool calls requested by the assistant.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Which tool call this message answers (only for [`Role::Tool`]).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// An assistant turn that requests tools, with any accompanying text.
    pub fn assistant_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::new(Role::Assistant, content)
        }
    }

    /// The message that feeds `result` back to the model.
    pub fn tool_result(result: &ToolResult) -> Self {
        let content = if result.success {
            result.output.clone()
        } else {
            format!("Error: {}", result.output)
        };
        Self {
            tool_call_id: Some(result.tool_call_id.clone()),
            ..Self::new(Role::Tool, content)
        }
    }
}

// ---------------------------------------------------------------------------
// Tool calls
// ---------------------------------------------------------------------------

/// A tool call as returned by a provider, arguments still unparsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawToolCall {
    /// Identifier assigned by the provider.  May be empty.
    #[serde(default)]
    pub id: String,
    pub name: String,
    /// JSON-encoded arguments.  May be empty.
    #[serde(default)]
    pub arguments: String,
}

/// A tool invocation with parsed arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique within its turn.
    pub id: String,
    pub name: String,
    pub arguments: Map<String, Value>,
}

/// The result of one tool call.  Produced for every call, including
/// rejected and failed ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub output: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ToolErrorKind>,
}

impl ToolResult {
    pub fn from_outcome(tool_call_id: impl Into<String>, outcome: ToolOutcome) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            output: outcome.output,
            success: outcome.success,
            error_kind: outcome.error_kind,
        }
    }
}

// ---------------------------------------------------------------------------
// Provider reply and parameters
// ---------------------------------------------------------------------------

/// What a provider returned for one call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderReply {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub tool_calls: Vec<RawToolCall>,
}

impl ProviderReply {
    /// A final text answer.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
        }
    }

    /// A reply that requests tools.
    pub fn tool_calls(tool_calls: Vec<RawToolCall>) -> Self {
        Self {
            text: String::new(),
            tool_calls,
        }
    }
}

/// Sampling parameters passed with every call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeParams {
    pub temperature: f32,
    pub max_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
}

impl Default for InvokeParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 4096,
            stop: None,
        }
    }
}
