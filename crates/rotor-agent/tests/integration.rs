//! End-to-end tests for the agent loop with scripted providers, a real
//! rotation manager and a real command sandbox.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use rotor_agent::{
    Agent, AgentConfig, AgentError, Conversation, InvokeParams, Message, ProviderAdapter,
    ProviderError, ProviderRegistry, ProviderReply, RawToolCall, RequestLimits, Role,
};
use rotor_rotation::{Catalogue, Category, ModelStatus, RotationManager};
use rotor_sandbox::{CommandSandbox, SandboxConfig, ToolErrorKind};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const CATALOGUE: &str = r#"
[[providers]]
name = "alpha"
base_url = "https://alpha.example.com/v1"

[[providers]]
name = "beta"
base_url = "https://beta.example.com/v1"

[[models]]
id = "alpha-large"
provider = "alpha"
categories = ["dialog", "code"]

[[models]]
id = "beta-small"
provider = "beta"
categories = ["dialog", "simple"]
"#;

// ═══════════════════════════════════════════════════════════════════════
//  Scripted provider
// ═══════════════════════════════════════════════════════════════════════

/// Replays queued replies in order; answers "done" once the queue is empty.
struct Scripted {
    name: &'static str,
    replies: Mutex<VecDeque<Result<ProviderReply, ProviderError>>>,
    seen: Mutex<Vec<(String, Vec<Message>)>>,
    delay: Option<Duration>,
}

impl Scripted {
    fn new(name: &'static str, replies: Vec<Result<ProviderReply, ProviderError>>) -> Arc<Self> {
        Arc::new(Self {
            name,
            replies: Mutex::new(replies.into()),
            seen: Mutex::new(Vec::new()),
            delay: None,
        })
    }

    fn hanging(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            replies: Mutex::new(VecDeque::new()),
            seen: Mutex::new(Vec::new()),
            delay: Some(Duration::from_secs(60)),
        })
    }

    fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    fn conversation(&self, call: usize) -> Vec<Message> {
        self.seen.lock().unwrap()[call].1.clone()
    }
}

#[async_trait]
impl ProviderAdapter for Scripted {
    fn name(&self) -> &str {
        self.name
    }

    async fn invoke(
        &self,
        model_id: &str,
        conversation: &[Message],
        tools: &[Value],
        _params: &InvokeParams,
    ) -> Result<ProviderReply, ProviderError> {
        assert_eq!(tools.len(), 4);
        self.seen
            .lock()
            .unwrap()
            .push((model_id.to_owned(), conversation.to_vec()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.replies.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(ProviderReply::text("done")))
    }
}

fn rate_limited() -> Result<ProviderReply, ProviderError> {
    Err(ProviderError::Http {
        status: 429,
        body: r#"{"error": {"message": "Rate limit reached", "type": "requests"}}"#.into(),
    })
}

fn tool_call(id: &str, name: &str, arguments: Value) -> RawToolCall {
    RawToolCall {
        id: id.into(),
        name: name.into(),
        arguments: arguments.to_string(),
    }
}

fn tools(calls: Vec<RawToolCall>) -> Result<ProviderReply, ProviderError> {
    Ok(ProviderReply::tool_calls(calls))
}

// ═══════════════════════════════════════════════════════════════════════
//  Harness
// ═══════════════════════════════════════════════════════════════════════

struct Harness {
    _dir: TempDir,
    rotation: Arc<RotationManager>,
    agent: Agent,
}

fn harness(adapters: Vec<Arc<Scripted>>, config: AgentConfig) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let rotation =
        Arc::new(RotationManager::new(Catalogue::from_toml_str(CATALOGUE).unwrap()).unwrap());
    let sandbox = Arc::new(
        CommandSandbox::with_brave_api_key(
            SandboxConfig::default()
                .with_workspace_root(dir.path())
                .with_command_timeout_secs(10),
            None,
        )
        .unwrap(),
    );

    let mut registry = ProviderRegistry::new();
    for adapter in adapters {
        registry.register(adapter);
    }

    let agent = Agent::new(config, rotation.clone(), sandbox, registry);
    Harness {
        _dir: dir,
        rotation,
        agent,
    }
}

async fn ask(h: &Harness, message: &str, category: Category) -> rotor_agent::Result<rotor_agent::AgentResponse> {
    h.agent
        .ask(message, category, &CancellationToken::new())
        .await
}

// ═══════════════════════════════════════════════════════════════════════
//  Rotation
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn rate_limited_model_is_blacklisted_and_next_attempt_uses_another() {
    let alpha = Scripted::new("alpha", vec![rate_limited()]);
    let beta = Scripted::new("beta", vec![Ok(ProviderReply::text("hi from beta"))]);
    let h = harness(vec![alpha.clone(), beta.clone()], AgentConfig::default());

    let response = ask(&h, "hello", Category::Dialog).await.unwrap();
    assert_eq!(response.text, "hi from beta");
    assert_eq!(response.model_id, "beta-small");
    assert_eq!(response.attempts, 2);
    assert_eq!(alpha.calls(), 1);
    assert_eq!(beta.calls(), 1);

    let until = h.rotation.blacklisted_until("alpha-large").unwrap();
    assert!(until > Utc::now());
    assert_eq!(h.rotation.current_state().model_id, "beta-small");

    let usage = h.rotation.usage("alpha-large").unwrap();
    assert_eq!((usage.calls, usage.failures), (1, 1));

    let stats = h.agent.classifier().statistics();
    assert_eq!(stats.total_errors, 1);
    assert_eq!(stats.successful_retries, 1);
}

#[tokio::test]
async fn recovery_counts_as_one_retry_across_later_tool_turns() {
    let step = |id| tool_call(id, "run_terminal_command", json!({"command": "echo step"}));
    let alpha = Scripted::new("alpha", vec![rate_limited()]);
    let beta = Scripted::new(
        "beta",
        vec![
            tools(vec![step("call_1")]),
            tools(vec![step("call_2")]),
            Ok(ProviderReply::text("all steps done")),
        ],
    );
    let h = harness(vec![alpha, beta.clone()], AgentConfig::default());

    let response = ask(&h, "run the steps", Category::Dialog).await.unwrap();
    assert_eq!(response.text, "all steps done");
    assert_eq!(response.attempts, 4);
    assert_eq!(response.tool_turns, 2);
    assert_eq!(beta.calls(), 3);

    let stats = h.agent.classifier().statistics();
    assert_eq!(stats.total_errors, 1);
    assert_eq!(stats.successful_retries, 1);
}

#[tokio::test]
async fn every_candidate_failing_exhausts_models() {
    let alpha = Scripted::new("alpha", vec![rate_limited()]);
    let beta = Scripted::new("beta", vec![rate_limited()]);
    let h = harness(vec![alpha, beta], AgentConfig::default());

    let err = ask(&h, "hello", Category::Dialog).await.unwrap_err();
    assert_eq!(err.code(), "all_models_exhausted");
    assert!(h.rotation.blacklisted_until("alpha-large").is_some());
    assert!(h.rotation.blacklisted_until("beta-small").is_some());
    assert!(h.rotation.available_models(Category::Dialog).is_empty());
}

#[tokio::test]
async fn retry_budget_bounds_attempts() {
    let alpha = Scripted::new("alpha", vec![rate_limited()]);
    let beta = Scripted::new("beta", vec![]);
    let config = AgentConfig {
        max_retries: 1,
        ..AgentConfig::default()
    };
    let h = harness(vec![alpha, beta.clone()], config);

    let err = ask(&h, "hello", Category::Dialog).await.unwrap_err();
    assert!(matches!(err, AgentError::AllModelsExhausted { attempts: 1, .. }));
    assert_eq!(beta.calls(), 0);
}

#[tokio::test]
async fn only_model_blacklisted_yields_no_model_available() {
    let alpha = Scripted::new("alpha", vec![]);
    let h = harness(vec![alpha.clone()], AgentConfig::default());
    h.rotation
        .blacklist("alpha-large", Duration::from_secs(60))
        .unwrap();

    let err = ask(&h, "write code", Category::Code).await.unwrap_err();
    assert!(matches!(
        err,
        AgentError::NoModelAvailable {
            category: Category::Code
        }
    ));
    assert_eq!(alpha.calls(), 0);
}

#[tokio::test]
async fn auth_failure_is_fatal_and_deactivates_model() {
    let alpha = Scripted::new(
        "alpha",
        vec![Err(ProviderError::Http {
            status: 401,
            body: "invalid api key".into(),
        })],
    );
    let beta = Scripted::new("beta", vec![]);
    let h = harness(vec![alpha, beta.clone()], AgentConfig::default());

    let err = ask(&h, "hello", Category::Dialog).await.unwrap_err();
    assert_eq!(err.code(), "authentication_failed");
    assert_eq!(beta.calls(), 0);
    assert_eq!(h.rotation.status("alpha-large"), Some(ModelStatus::Inactive));
    assert!(h.rotation.blacklisted_until("alpha-large").is_none());

    let remaining: Vec<String> = h
        .rotation
        .available_models(Category::Dialog)
        .into_iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(remaining, ["beta-small"]);
}

#[tokio::test]
async fn malformed_reply_is_retried_once_then_fatal() {
    let malformed = || {
        Err(ProviderError::Malformed {
            reason: "missing choices".into(),
        })
    };
    let alpha = Scripted::new("alpha", vec![malformed()]);
    let beta = Scripted::new("beta", vec![malformed()]);
    let h = harness(vec![alpha, beta], AgentConfig::default());

    let err = ask(&h, "hello", Category::Dialog).await.unwrap_err();
    assert_eq!(err.code(), "provider_failed");
}

#[tokio::test]
async fn models_without_adapter_are_skipped() {
    let beta = Scripted::new("beta", vec![Ok(ProviderReply::text("beta here"))]);
    let h = harness(vec![beta], AgentConfig::default());

    let response = ask(&h, "hello", Category::Dialog).await.unwrap();
    assert_eq!(response.model_id, "beta-small");
    assert_eq!(response.attempts, 1);
    assert!(h.rotation.blacklisted_until("alpha-large").is_none());
}

// ═══════════════════════════════════════════════════════════════════════
//  Tools
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn echo_hello_result_reaches_model() {
    let alpha = Scripted::new(
        "alpha",
        vec![
            tools(vec![tool_call(
                "call_1",
                "run_terminal_command",
                json!({"command": "echo hello"}),
            )]),
            Ok(ProviderReply::text("It printed hello.")),
        ],
    );
    let h = harness(vec![alpha.clone()], AgentConfig::default());

    let response = ask(&h, "run `echo hello`", Category::Dialog).await.unwrap();
    assert_eq!(response.text, "It printed hello.");
    assert_eq!(response.tool_turns, 1);
    assert_eq!(response.tool_results.len(), 1);
    assert!(response.tool_results[0].success);
    assert!(response.tool_results[0].output.contains("hello"));

    let second = alpha.conversation(1);
    let tool_message = second.last().unwrap();
    assert_eq!(tool_message.role, Role::Tool);
    assert_eq!(tool_message.tool_call_id.as_deref(), Some("call_1"));
    assert!(tool_message.content.contains("hello"));
    assert_eq!(second[second.len() - 2].tool_calls[0].id, "call_1");
}

#[tokio::test]
async fn localhost_fetch_is_rejected_and_handed_back() {
    let alpha = Scripted::new(
        "alpha",
        vec![tools(vec![tool_call(
            "c",
            "browse_website",
            json!({"url": "http://localhost:8080/admin"}),
        )])],
    );
    let h = harness(vec![alpha.clone()], AgentConfig::default());

    let response = ask(&h, "fetch the admin page", Category::Dialog).await.unwrap();
    assert_eq!(response.text, "done");
    let result = &response.tool_results[0];
    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ToolErrorKind::Unsafe));

    // A failed tool is not a provider failure.
    assert!(h.rotation.blacklisted_until("alpha-large").is_none());
    assert!(alpha.conversation(1).last().unwrap().content.starts_with("Error:"));
}

#[tokio::test]
async fn results_follow_call_order() {
    let alpha = Scripted::new(
        "alpha",
        vec![tools(vec![
            tool_call("slow", "run_terminal_command", json!({"command": "sleep 0.3; echo first"})),
            tool_call("fast", "run_terminal_command", json!({"command": "echo second"})),
            tool_call("bad", "file_operation", json!({"operation": "read", "path": "../../etc/passwd"})),
        ])],
    );
    let h = harness(vec![alpha.clone()], AgentConfig::default());

    let response = ask(&h, "go", Category::Dialog).await.unwrap();
    let ids: Vec<&str> = response
        .tool_results
        .iter()
        .map(|r| r.tool_call_id.as_str())
        .collect();
    assert_eq!(ids, ["slow", "fast", "bad"]);
    assert_eq!(response.tool_results[0].output, "first");
    assert_eq!(response.tool_results[2].error_kind, Some(ToolErrorKind::Unsafe));

    let tool_ids: Vec<String> = alpha
        .conversation(1)
        .iter()
        .filter(|m| m.role == Role::Tool)
        .filter_map(|m| m.tool_call_id.clone())
        .collect();
    assert_eq!(tool_ids, ["slow", "fast", "bad"]);
}

#[tokio::test]
async fn non_object_arguments_become_failed_result() {
    let alpha = Scripted::new(
        "alpha",
        vec![tools(vec![RawToolCall {
            id: String::new(),
            name: "web_search".into(),
            arguments: "[\"rust\"]".into(),
        }])],
    );
    let h = harness(vec![alpha], AgentConfig::default());

    let response = ask(&h, "search", Category::Dialog).await.unwrap();
    let result = &response.tool_results[0];
    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ToolErrorKind::InvalidArguments));
    assert!(result.tool_call_id.starts_with("call_"));
}

#[tokio::test]
async fn tool_turn_limit_stops_the_loop() {
    let step = |id: &str| tool_call(id, "run_terminal_command", json!({"command": "echo step"}));
    let alpha = Scripted::new(
        "alpha",
        vec![
            Ok(ProviderReply {
                text: "Looking around first.".into(),
                tool_calls: vec![step("a")],
            }),
            tools(vec![step("b")]),
            tools(vec![step("c")]),
        ],
    );
    let h = harness(vec![alpha.clone()], AgentConfig::default());

    let limits = RequestLimits {
        max_tool_turns: 2,
        max_retries: 3,
    };
    let response = h
        .agent
        .process_with_limits(
            Conversation::from_user(None, "loop forever"),
            Category::Dialog,
            limits,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(response.truncated);
    assert_eq!(response.tool_turns, 2);
    assert_eq!(response.tool_results.len(), 2);
    assert_eq!(response.text, "Looking around first.");
    assert_eq!(alpha.calls(), 3);
}

// ═══════════════════════════════════════════════════════════════════════
//  Cancellation
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn cancel_interrupts_provider_call() {
    let alpha = Scripted::hanging("alpha");
    let h = harness(vec![alpha], AgentConfig::default());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let err = h
        .agent
        .ask("hello", Category::Dialog, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn cancel_interrupts_running_command() {
    let alpha = Scripted::new(
        "alpha",
        vec![tools(vec![tool_call(
            "c",
            "run_terminal_command",
            json!({"command": "sleep 8"}),
        )])],
    );
    let h = harness(vec![alpha.clone()], AgentConfig::default());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let err = h
        .agent
        .ask("sleep", Category::Dialog, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(alpha.calls(), 1);
}

#[tokio::test]
async fn already_cancelled_request_never_calls_provider() {
    let alpha = Scripted::new("alpha", vec![]);
    let h = harness(vec![alpha.clone()], AgentConfig::default());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = h.agent.ask("hi", Category::Dialog, &cancel).await.unwrap_err();
    assert!(matches!(err, AgentError::Cancelled));
    assert_eq!(alpha.calls(), 0);
}
