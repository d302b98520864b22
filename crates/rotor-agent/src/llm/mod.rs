//! Provider integration layer.
//!
//! - [`types`] -- Messages, tool calls, replies and sampling parameters.
//! - [`provider`] -- The [`ProviderAdapter`] contract and [`ProviderRegistry`].
//! - [`openai`] -- Adapter for OpenAI-compatible Chat Completions endpoints.

pub mod openai;
pub mod provider;
pub mod types;

pub use openai::OpenAiCompatibleProvider;
pub use provider::{ProviderAdapter, ProviderRegistry};
pub use types::{
    InvokeParams, Message, ProviderReply, RawToolCall, Role, ToolCall, ToolResult,
};
