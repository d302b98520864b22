//! Tool-calling agent loop for rotor.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  select / blacklist  ┌──────────────────┐
//! │  Agent loop  │─────────────────────>│ RotationManager  │
//! │  (runtime)   │                      └──────────────────┘
//! │              │  invoke              ┌──────────────────┐
//! │              │─────────────────────>│ ProviderAdapter  │
//! │              │                      └──────────────────┘
//! │              │  execute tool        ┌──────────────────┐
//! │              │─────────────────────>│ CommandSandbox   │
//! └──────┬───────┘                      └──────────────────┘
//!        │ classify failure
//!        v
//! ┌─────────────────┐
//! │ ErrorClassifier │
//! └─────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`runtime`] -- The [`Agent`] and its request loop.
//! - [`classifier`] -- Failure classification, rotate/fatal verdicts, statistics.
//! - [`conversation`] -- Append-only message history and argument parsing.
//! - [`llm`] -- Provider contract, registry, wire types, OpenAI-compatible adapter.
//! - [`error`] -- Agent and provider error types.

pub mod classifier;
pub mod conversation;
pub mod error;
pub mod llm;
pub mod runtime;

pub use classifier::{
    Classification, ErrorClassifier, ErrorKind, ErrorRecord, ErrorStatistics, Verdict,
};
pub use conversation::{Conversation, parse_arguments};
pub use error::{AgentError, ProviderError, Result};
pub use llm::{
    InvokeParams, Message, OpenAiCompatibleProvider, ProviderAdapter, ProviderRegistry,
    ProviderReply, RawToolCall, Role, ToolCall, ToolResult,
};
pub use runtime::{Agent, AgentConfig, AgentResponse, RequestLimits};
