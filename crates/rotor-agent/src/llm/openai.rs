//! Adapter for OpenAI-compatible Chat Completions endpoints.
//!
//! Most hosted free tiers (Groq, OpenRouter, DeepSeek, Gemini's OpenAI
//! surface) and local servers such as Ollama speak this format, so one
//! adapter per configured provider covers the whole built-in catalogue.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use rotor_rotation::ProviderConfig;
use serde_json::{Value, json};

use crate::error::ProviderError;
use crate::llm::provider::ProviderAdapter;
use crate::llm::types::{InvokeParams, Message, ProviderReply, RawToolCall, Role};

/// Sends chat completions to `{base_url}/chat/completions`.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleProvider {
    name: String,
    base_url: String,
    api_key: Option<String>,
    http: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    /// Create an adapter.  `api_key` may be `None` for keyless local servers.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Other {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            api_key: api_key.filter(|k| !k.is_empty()),
            http,
        })
    }

    /// Build an adapter from a catalogue entry, reading the key from the
    /// provider's `api_key_env`.  Returns `Ok(None)` when a key is required
    /// but the variable is unset.
    pub fn from_config(
        config: &ProviderConfig,
        timeout: Duration,
    ) -> Result<Option<Self>, ProviderError> {
        let api_key = if config.api_key_env.is_empty() {
            None
        } else {
            match std::env::var(&config.api_key_env) {
                Ok(key) if !key.trim().is_empty() => Some(key.trim().to_owned()),
                _ => return Ok(None),
            }
        };
        Self::new(&config.name, &config.base_url, api_key, timeout).map(Some)
    }

    fn headers(&self) -> Result<HeaderMap, ProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = &self.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {key}")).map_err(|e| {
                ProviderError::Other {
                    reason: format!("invalid authorization header: {e}"),
                }
            })?;
            headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(
        &self,
        model_id: &str,
        conversation: &[Message],
        tools: &[Value],
        params: &InvokeParams,
    ) -> Result<ProviderReply, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = build_request_body(model_id, conversation, tools, params);

        tracing::debug!(
            url = %url,
            provider = %self.name,
            model = model_id,
            messages = conversation.len(),
            "sending chat completion"
        );

        let resp = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(ProviderError::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        let value: Value = serde_json::from_str(&text).map_err(|e| ProviderError::Malformed {
            reason: format!("invalid JSON response: {e}"),
        })?;
        parse_reply(&value)
    }
}

// ---------------------------------------------------------------------------
// Wire format (free functions)
// ---------------------------------------------------------------------------

/// Build the Chat Completions request body.
pub fn build_request_body(
    model_id: &str,
    conversation: &[Message],
    tools: &[Value],
    params: &InvokeParams,
) -> Value {
    let mut body = json!({
        "model": model_id,
        "messages": messages_to_wire(conversation),
        "temperature": params.temperature,
        "max_tokens": params.max_tokens,
    });

    if !tools.is_empty() {
        body["tools"] = json!(tools);
        body["tool_choice"] = json!("auto");
    }
    if let Some(stop) = params.stop.as_ref().filter(|s| !s.is_empty()) {
        body["stop"] = json!(stop);
    }

    body
}

/// Convert messages to the Chat Completions format: tool calls live in
/// `assistant.tool_calls` with JSON-string arguments, and tool results use
/// `role: "tool"` with a `tool_call_id`.
pub fn messages_to_wire(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|msg| match msg.role {
            Role::System => json!({"role": "system", "content": msg.content}),
            Role::User => json!({"role": "user", "content": msg.content}),
            Role::Assistant if msg.tool_calls.is_empty() => {
                json!({"role": "assistant", "content": msg.content})
            }
            Role::Assistant => {
                let tool_calls: Vec<Value> = msg
                    .tool_calls
                    .iter()
                    .map(|tc| {
                        json!({
                            "id": tc.id,
                            "type": "function",
                            "function": {
                                "name": tc.name,
                                "arguments": Value::Object(tc.arguments.clone()).to_string(),
                            }
                        })
                    })
                    .collect();

                let content = if msg.content.is_empty() {
                    Value::Null
                } else {
                    json!(msg.content)
                };
                json!({"role": "assistant", "content": content, "tool_calls": tool_calls})
            }
            Role::Tool => json!({
                "role": "tool",
                "tool_call_id": msg.tool_call_id,
                "content": msg.content,
            }),
        })
        .collect()
}

/// Parse a Chat Completions response.  Arguments are passed through as the
/// raw string the provider sent.
pub fn parse_reply(v: &Value) -> Result<ProviderReply, ProviderError> {
    // Some providers report errors with a 200 status.
    if let Some(error) = v.get("error").filter(|e| !e.is_null()) {
        tracing::debug!(error = %error, "provider embedded an error in a success response");
        return Err(ProviderError::Http {
            status: error["code"]
                .as_u64()
                .and_then(|c| u16::try_from(c).ok())
                .unwrap_or(500),
            body: json!({"error": error}).to_string(),
        });
    }

    let message = &v["choices"][0]["message"];
    if !message.is_object() {
        return Err(ProviderError::Malformed {
            reason: "missing `choices[0].message` in response".into(),
        });
    }

    let text = message["content"].as_str().unwrap_or_default().to_owned();
    let tool_calls = match message["tool_calls"].as_array() {
        None => Vec::new(),
        Some(calls) => calls
            .iter()
            .map(|tc| {
                let function = &tc["function"];
                let name = function["name"].as_str().ok_or_else(|| ProviderError::Malformed {
                    reason: "tool call without a function name".into(),
                })?;
                // Arguments are normally a JSON string; tolerate an inline object.
                let arguments = match &function["arguments"] {
                    Value::String(s) => s.clone(),
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                Ok(RawToolCall {
                    id: tc["id"].as_str().unwrap_or_default().to_owned(),
                    name: name.to_owned(),
                    arguments,
                })
            })
            .collect::<Result<Vec<_>, ProviderError>>()?,
    };

    Ok(ProviderReply { text, tool_calls })
}
