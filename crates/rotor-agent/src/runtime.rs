//! The tool-calling agent loop.
//!
//! For one request the loop selects a model from the [`RotationManager`],
//! sends the conversation and tool schema to the provider, executes any
//! requested tools in the [`CommandSandbox`], folds the results back into
//! the conversation and repeats until the model answers in plain text.
//! Provider failures are classified; transient ones blacklist the model and
//! rotate to the next candidate.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use rotor_rotation::{Category, ModelDescriptor, RotationManager};
use rotor_sandbox::{CommandSandbox, ToolError, ToolOutcome};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::classifier::{ErrorClassifier, ErrorKind, Verdict};
use crate::conversation::{Conversation, parse_arguments};
use crate::error::{AgentError, ProviderError, Result};
use crate::llm::provider::{ProviderAdapter, ProviderRegistry};
use crate::llm::types::{InvokeParams, Message, ProviderReply, RawToolCall, ToolCall, ToolResult};

/// Text returned when the tool-turn limit stops a request before the model
/// said anything.
const TRUNCATION_NOTICE: &str =
    "Stopped after reaching the tool-call limit before the model produced an answer.";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Agent loop settings, read from the `[agent]` table of the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Tool rounds allowed per request before the loop stops.
    pub max_tool_turns: u32,
    /// Failed provider calls allowed per request.
    pub max_retries: u32,
    /// How long a failed model stays blacklisted.
    pub blacklist_cooldown_secs: u64,
    pub temperature: f32,
    pub max_tokens: u32,
    pub stop: Option<Vec<String>>,
    /// Upper bound on a single provider call.
    pub provider_timeout_secs: u64,
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_turns: 8,
            max_retries: 3,
            blacklist_cooldown_secs: 300,
            temperature: 0.7,
            max_tokens: 4096,
            stop: None,
            provider_timeout_secs: 120,
            system_prompt: None,
        }
    }
}

impl AgentConfig {
    pub fn blacklist_cooldown(&self) -> Duration {
        Duration::from_secs(self.blacklist_cooldown_secs)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs.max(1))
    }

    pub fn limits(&self) -> RequestLimits {
        RequestLimits {
            max_tool_turns: self.max_tool_turns,
            max_retries: self.max_retries,
        }
    }

    fn invoke_params(&self) -> InvokeParams {
        InvokeParams {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stop: self.stop.clone(),
        }
    }
}

/// Per-request bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestLimits {
    pub max_tool_turns: u32,
    pub max_retries: u32,
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

/// The outcome of a completed request.
#[derive(Debug, Clone, Serialize)]
pub struct AgentResponse {
    /// The model's final text, or the last text before the tool-turn limit.
    pub text: String,
    /// The model that produced the final reply.
    pub model_id: String,
    /// Tool rounds executed.
    pub tool_turns: u32,
    /// Provider calls made, successful or not.
    pub attempts: u32,
    /// `true` when the tool-turn limit ended the request.
    pub truncated: bool,
    /// Every tool result, in call order.
    pub tool_results: Vec<ToolResult>,
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

/// Drives tool-calling conversations against rotating providers.
///
/// One `Agent` serves any number of concurrent requests; each request owns
/// its [`Conversation`].
pub struct Agent {
    config: AgentConfig,
    rotation: Arc<RotationManager>,
    sandbox: Arc<CommandSandbox>,
    providers: ProviderRegistry,
    classifier: Arc<ErrorClassifier>,
    tool_schema: Vec<Value>,
}

impl Agent {
    pub fn new(
        config: AgentConfig,
        rotation: Arc<RotationManager>,
        sandbox: Arc<CommandSandbox>,
        providers: ProviderRegistry,
    ) -> Self {
        let tool_schema = sandbox.tool_schema();
        Self {
            config,
            rotation,
            sandbox,
            providers,
            classifier: Arc::new(ErrorClassifier::new()),
            tool_schema,
        }
    }

    /// Share an existing classifier.
    pub fn with_classifier(mut self, classifier: Arc<ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn rotation(&self) -> &RotationManager {
        &self.rotation
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    /// Answer a single user message in a fresh conversation.
    pub async fn ask(
        &self,
        message: &str,
        category: Category,
        cancel: &CancellationToken,
    ) -> Result<AgentResponse> {
        let conversation = Conversation::from_user(self.config.system_prompt.as_deref(), message);
        self.process(conversation, category, cancel).await
    }

    /// Run `conversation` to completion with the configured limits.
    pub async fn process(
        &self,
        conversation: Conversation,
        category: Category,
        cancel: &CancellationToken,
    ) -> Result<AgentResponse> {
        self.process_with_limits(conversation, category, self.config.limits(), cancel)
            .await
    }

    /// Run `conversation` to completion.
    ///
    /// # Errors
    ///
    /// - [`AgentError::NoModelAvailable`] if no usable model serves `category`.
    /// - [`AgentError::AllModelsExhausted`] if transient failures used up the
    ///   retry budget or the candidates.
    /// - [`AgentError::AuthenticationFailed`] on rejected credentials.
    /// - [`AgentError::ProviderFailed`] on repeated malformed/unknown failures.
    /// - [`AgentError::Cancelled`] if `cancel` fires.
    pub async fn process_with_limits(
        &self,
        mut conversation: Conversation,
        category: Category,
        limits: RequestLimits,
        cancel: &CancellationToken,
    ) -> Result<AgentResponse> {
        let request_id = Uuid::now_v7();
        let params = self.config.invoke_params();
        let mut tried: HashSet<String> = HashSet::new();

        let (mut model, mut adapter) = self
            .first_model(category, &mut tried)
            .ok_or(AgentError::NoModelAvailable { category })?;

        info!(
            request = %request_id,
            %category,
            model = %model.id,
            provider = %model.provider,
            max_tool_turns = limits.max_tool_turns,
            max_retries = limits.max_retries,
            "starting agent loop"
        );

        let mut attempts: u32 = 0;
        let mut failures: u32 = 0;
        let mut pending_retry = false;
        let mut tool_turns: u32 = 0;
        let mut tool_results: Vec<ToolResult> = Vec::new();

        loop {
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }

            attempts += 1;
            debug!(request = %request_id, model = %model.id, attempt = attempts, "awaiting provider");
            let call = self.invoke(adapter.as_ref(), &model, &conversation, &params);
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(request = %request_id, "request cancelled during provider call");
                    return Err(AgentError::Cancelled);
                }
                outcome = call => outcome,
            };

            let reply = match outcome {
                Ok(reply) => {
                    self.rotation.record_usage(&model.id, true);
                    if std::mem::take(&mut pending_retry) {
                        self.classifier.record_successful_retry(&model.id);
                    }
                    reply
                }
                Err(err) => {
                    self.rotation.record_usage(&model.id, false);
                    failures += 1;
                    pending_retry = true;
                    let classification = self.classifier.classify(&err);
                    let reason = first_line(&err.to_string());
                    self.classifier
                        .record_error(classification.kind, &model.id, err.to_string());
                    warn!(
                        request = %request_id,
                        model = %model.id,
                        kind = ?classification.kind,
                        attempt = failures,
                        error = %reason,
                        "provider call failed"
                    );

                    match ErrorClassifier::decide(classification.kind, failures, limits.max_retries)
                    {
                        Verdict::Rotate => {
                            if let Err(e) = self
                                .rotation
                                .blacklist(&model.id, self.config.blacklist_cooldown())
                            {
                                warn!(model = %model.id, error = %e, "failed to blacklist model");
                            }
                            tried.insert(model.id.clone());
                            let Some(next) = self.next_model(category, &mut tried) else {
                                return Err(AgentError::AllModelsExhausted {
                                    category,
                                    attempts: failures,
                                    last_error: reason,
                                });
                            };
                            info!(
                                request = %request_id,
                                from = %model.id,
                                to = %next.0.id,
                                "rotating to next model"
                            );
                            (model, adapter) = next;
                            continue;
                        }
                        Verdict::Fatal => {
                            return Err(self.fatal(
                                category,
                                &model,
                                classification.kind,
                                failures,
                                reason,
                            ));
                        }
                    }
                }
            };

            if reply.tool_calls.is_empty() {
                conversation.push(Message::assistant(reply.text.clone()));
                info!(
                    request = %request_id,
                    model = %model.id,
                    tool_turns,
                    attempts,
                    "agent loop completed"
                );
                return Ok(AgentResponse {
                    text: reply.text,
                    model_id: model.id,
                    tool_turns,
                    attempts,
                    truncated: false,
                    tool_results,
                });
            }

            if tool_turns >= limits.max_tool_turns {
                let text = if reply.text.trim().is_empty() {
                    conversation
                        .last_assistant_text()
                        .unwrap_or(TRUNCATION_NOTICE)
                        .to_owned()
                } else {
                    reply.text
                };
                warn!(
                    request = %request_id,
                    tool_turns,
                    max_tool_turns = limits.max_tool_turns,
                    "tool-turn limit reached"
                );
                return Ok(AgentResponse {
                    text,
                    model_id: model.id,
                    tool_turns,
                    attempts,
                    truncated: true,
                    tool_results,
                });
            }

            let prepared = prepare_calls(reply.tool_calls);
            debug!(
                request = %request_id,
                turn = tool_turns,
                tools = ?prepared.iter().map(|p| p.call.name.as_str()).collect::<Vec<_>>(),
                "executing tool calls"
            );
            conversation.push(Message::assistant_tool_calls(
                reply.text,
                prepared.iter().map(|p| p.call.clone()).collect(),
            ));

            // Dropping the futures on cancellation kills any spawned process.
            let executions = join_all(prepared.iter().map(|p| self.execute_call(p)));
            let results = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(request = %request_id, "request cancelled during tool execution");
                    return Err(AgentError::Cancelled);
                }
                results = executions => results,
            };

            for result in results {
                conversation.push(Message::tool_result(&result));
                tool_results.push(result);
            }
            tool_turns += 1;
        }
    }

    async fn invoke(
        &self,
        adapter: &dyn ProviderAdapter,
        model: &ModelDescriptor,
        conversation: &Conversation,
        params: &InvokeParams,
    ) -> std::result::Result<ProviderReply, ProviderError> {
        let timeout = self.config.provider_timeout();
        let call = adapter.invoke(&model.id, conversation.messages(), &self.tool_schema, params);
        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout {
                reason: format!("no response within {}s", timeout.as_secs()),
            }),
        }
    }

    async fn execute_call(&self, prepared: &PreparedCall) -> ToolResult {
        let outcome = match &prepared.argument_error {
            Some(reason) => ToolOutcome::failed(&ToolError::InvalidArguments {
                tool: prepared.call.name.clone(),
                reason: reason.clone(),
            }),
            None => {
                self.sandbox
                    .execute(&prepared.call.name, &prepared.call.arguments)
                    .await
            }
        };
        if !outcome.success {
            debug!(tool = %prepared.call.name, error = %outcome.output, "tool call failed");
        }
        ToolResult::from_outcome(prepared.call.id.clone(), outcome)
    }

    fn fatal(
        &self,
        category: Category,
        model: &ModelDescriptor,
        kind: ErrorKind,
        failures: u32,
        reason: String,
    ) -> AgentError {
        match kind {
            ErrorKind::AuthFailure => {
                if let Err(e) = self.rotation.deactivate(&model.id) {
                    warn!(model = %model.id, error = %e, "failed to deactivate model");
                }
                AgentError::AuthenticationFailed {
                    model_id: model.id.clone(),
                    provider: model.provider.clone(),
                    reason,
                }
            }
            kind if kind.is_retryable() => AgentError::AllModelsExhausted {
                category,
                attempts: failures,
                last_error: reason,
            },
            kind => AgentError::ProviderFailed {
                model_id: model.id.clone(),
                kind,
                reason,
            },
        }
    }

    // -- Model selection ----------------------------------------------------

    /// The preferred model for `category`, skipping models whose provider
    /// has no registered adapter.
    fn first_model(
        &self,
        category: Category,
        tried: &mut HashSet<String>,
    ) -> Option<(ModelDescriptor, Arc<dyn ProviderAdapter>)> {
        let model = self.rotation.select(category)?;
        match self.providers.get(&model.provider) {
            Some(adapter) => Some((model, adapter)),
            None => {
                self.skip_unregistered(&model, tried);
                self.next_model(category, tried)
            }
        }
    }

    /// The next candidate not in `tried`.  Models without an adapter are
    /// added to `tried` and skipped.
    fn next_model(
        &self,
        category: Category,
        tried: &mut HashSet<String>,
    ) -> Option<(ModelDescriptor, Arc<dyn ProviderAdapter>)> {
        loop {
            let model = self.rotation.select_next(category, tried)?;
            match self.providers.get(&model.provider) {
                Some(adapter) => return Some((model, adapter)),
                None => self.skip_unregistered(&model, tried),
            }
        }
    }

    fn skip_unregistered(&self, model: &ModelDescriptor, tried: &mut HashSet<String>) {
        warn!(
            model = %model.id,
            provider = %model.provider,
            "no adapter registered for provider, skipping model"
        );
        tried.insert(model.id.clone());
    }
}

// ---------------------------------------------------------------------------
// Tool call preparation
// ---------------------------------------------------------------------------

struct PreparedCall {
    call: ToolCall,
    /// Set when the raw arguments were not a JSON object.
    argument_error: Option<String>,
}

/// Parse arguments and make ids unique within the turn.  Calls with an empty
/// or repeated id get a fresh one.
fn prepare_calls(raw_calls: Vec<RawToolCall>) -> Vec<PreparedCall> {
    let mut seen: HashSet<String> = HashSet::with_capacity(raw_calls.len());
    raw_calls
        .into_iter()
        .map(|raw| {
            let mut id = raw.id.trim().to_owned();
            if id.is_empty() || seen.contains(&id) {
                id = format!("call_{}", Uuid::now_v7().simple());
            }
            seen.insert(id.clone());

            let (arguments, argument_error) = match parse_arguments(&raw.arguments) {
                Ok(map) => (map, None),
                Err(reason) => (Default::default(), Some(reason)),
            };

            PreparedCall {
                call: ToolCall {
                    id,
                    name: raw.name,
                    arguments,
                },
                argument_error,
            }
        })
        .collect()
}

fn first_line(text: &str) -> String {
    text.lines().next().unwrap_or_default().trim().to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(id: &str, name: &str, arguments: &str) -> RawToolCall {
        RawToolCall {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    #[test]
    fn defaults_are_documented_values() {
        let config = AgentConfig::default();
        assert_eq!(config.max_tool_turns, 8);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.blacklist_cooldown(), Duration::from_secs(300));
        assert_eq!(config.provider_timeout(), Duration::from_secs(120));
    }

    #[test]
    fn duplicate_and_empty_ids_are_replaced() {
        let prepared = prepare_calls(vec![
            raw("a", "web_search", "{}"),
            raw("a", "web_search", "{}"),
            raw("", "web_search", "{}"),
        ]);
        let ids: HashSet<&str> = prepared.iter().map(|p| p.call.id.as_str()).collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(prepared[0].call.id, "a");
        assert!(prepared[2].call.id.starts_with("call_"));
    }

    #[test]
    fn bad_arguments_are_flagged_not_dropped() {
        let prepared = prepare_calls(vec![raw("x", "file_operation", "[1]"), raw("y", "web_search", "")]);
        assert_eq!(prepared.len(), 2);
        assert!(prepared[0].argument_error.is_some());
        assert!(prepared[0].call.arguments.is_empty());
        assert!(prepared[1].argument_error.is_none());
    }

    #[test]
    fn first_line_strips_bodies() {
        assert_eq!(first_line("provider returned HTTP 500: a\nb"), "provider returned HTTP 500: a");
        assert_eq!(first_line(""), "");
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let config: AgentConfig = serde_json::from_str(r#"{"max_retries": 5}"#).unwrap();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.max_tool_turns, 8);
    }
}
