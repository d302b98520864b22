//! Provider failure classification.
//!
//! Turns a raw [`ProviderError`] into an [`ErrorKind`], decides whether the
//! agent loop should rotate to another model or give up, and keeps failure
//! statistics for observability.  The statistics are never consulted for
//! control flow.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProviderError;

/// How many [`ErrorRecord`]s are retained before the oldest is dropped.
pub const DEFAULT_RECORD_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Kinds and verdicts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RateLimited,
    AuthFailure,
    Timeout,
    Connection,
    Malformed,
    Unknown,
}

impl ErrorKind {
    /// Transient failures that another model (or a later attempt) may avoid.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Timeout | Self::Connection)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::AuthFailure => "auth_failure",
            Self::Timeout => "timeout",
            Self::Connection => "connection",
            Self::Malformed => "malformed",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub kind: ErrorKind,
    pub retryable: bool,
}

impl From<ErrorKind> for Classification {
    fn from(kind: ErrorKind) -> Self {
        Self {
            kind,
            retryable: kind.is_retryable(),
        }
    }
}

/// What the agent loop does after a failed provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Blacklist the model and retry with another one.
    Rotate,
    /// Stop and report the failure.
    Fatal,
}

// ---------------------------------------------------------------------------
// Records and statistics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub model_id: String,
    pub message: String,
    pub retryable: bool,
    pub timestamp: DateTime<Utc>,
}

/// Snapshot of the classifier's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ErrorStatistics {
    pub total_errors: u64,
    pub by_kind: BTreeMap<ErrorKind, u64>,
    pub by_model: BTreeMap<String, u64>,
    pub successful_retries: u64,
}

#[derive(Debug, Default)]
struct Inner {
    stats: ErrorStatistics,
    records: VecDeque<ErrorRecord>,
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

/// Classifies provider failures and accumulates statistics.
///
/// Shared across concurrent requests; every method takes `&self`.
#[derive(Debug)]
pub struct ErrorClassifier {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorClassifier {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_RECORD_CAPACITY)
    }

    /// Retain at most `capacity` records (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Classify a provider failure.
    ///
    /// HTTP failures consult a structured JSON error body first, then the
    /// status code, then the body text.  Transport failures map directly.
    pub fn classify(&self, error: &ProviderError) -> Classification {
        let kind = match error {
            ProviderError::Http { status, body } => classify_structured(body)
                .or_else(|| classify_status(*status))
                .unwrap_or_else(|| classify_message(body)),
            ProviderError::Timeout { .. } => ErrorKind::Timeout,
            ProviderError::Connection { .. } => ErrorKind::Connection,
            ProviderError::Malformed { .. } => ErrorKind::Malformed,
            ProviderError::Other { reason } => classify_message(reason),
        };
        kind.into()
    }

    /// Rotate or give up after the `attempts`-th failed call of a request.
    ///
    /// Transient kinds rotate while `attempts < max_retries`.  Credential
    /// failures are fatal at once.  Malformed and unknown failures get a
    /// single retry.
    pub fn decide(kind: ErrorKind, attempts: u32, max_retries: u32) -> Verdict {
        let allowed = match kind {
            ErrorKind::RateLimited | ErrorKind::Timeout | ErrorKind::Connection => {
                attempts < max_retries
            }
            ErrorKind::AuthFailure => false,
            ErrorKind::Malformed | ErrorKind::Unknown => attempts < 2 && attempts < max_retries,
        };
        if allowed { Verdict::Rotate } else { Verdict::Fatal }
    }

    /// Append an [`ErrorRecord`] and bump the counters.
    pub fn record_error(&self, kind: ErrorKind, model_id: &str, message: impl Into<String>) {
        let record = ErrorRecord {
            kind,
            model_id: model_id.to_owned(),
            message: message.into(),
            retryable: kind.is_retryable(),
            timestamp: Utc::now(),
        };

        let mut inner = self.lock();
        inner.stats.total_errors += 1;
        *inner.stats.by_kind.entry(kind).or_default() += 1;
        *inner.stats.by_model.entry(model_id.to_owned()).or_default() += 1;
        if inner.records.len() == self.capacity {
            inner.records.pop_front();
        }
        inner.records.push_back(record);
    }

    /// Count a request that succeeded on `model_id` after an earlier failure.
    pub fn record_successful_retry(&self, model_id: &str) {
        let mut inner = self.lock();
        inner.stats.successful_retries += 1;
        tracing::debug!(
            model = model_id,
            successful_retries = inner.stats.successful_retries,
            "retry succeeded"
        );
    }

    pub fn statistics(&self) -> ErrorStatistics {
        self.lock().stats.clone()
    }

    /// The last `n` records, oldest first.
    pub fn recent(&self, n: usize) -> Vec<ErrorRecord> {
        let inner = self.lock();
        let skip = inner.records.len().saturating_sub(n);
        inner.records.iter().skip(skip).cloned().collect()
    }
}

// ---------------------------------------------------------------------------
// Classification rules
// ---------------------------------------------------------------------------

fn classify_status(status: u16) -> Option<ErrorKind> {
    match status {
        429 => Some(ErrorKind::RateLimited),
        401 | 403 => Some(ErrorKind::AuthFailure),
        408 | 504 => Some(ErrorKind::Timeout),
        500 | 502 | 503 | 529 => Some(ErrorKind::Connection),
        400 | 422 => Some(ErrorKind::Malformed),
        _ => None,
    }
}

/// Inspect `{"error": {"type": .., "code": .., "status": ..}}` bodies.
fn classify_structured(body: &str) -> Option<ErrorKind> {
    let value: Value = serde_json::from_str(body).ok()?;
    let error = value.get("error")?;
    ["type", "code", "status"]
        .iter()
        .filter_map(|field| match error.get(*field)? {
            Value::String(s) => Some(s.to_ascii_lowercase()),
            Value::Number(n) => n.as_u64().and_then(|c| u16::try_from(c).ok()).and_then(|c| {
                classify_status(c).map(|k| k.as_str().to_owned())
            }),
            _ => None,
        })
        .find_map(|tag| classify_error_tag(&tag))
}

fn classify_error_tag(tag: &str) -> Option<ErrorKind> {
    const RULES: &[(&[&str], ErrorKind)] = &[
        (
            &["rate_limit", "rate_limited", "resource_exhausted", "quota", "too_many_requests"],
            ErrorKind::RateLimited,
        ),
        (
            &[
                "auth",
                "invalid_api_key",
                "unauthenticated",
                "permission_denied",
                "permission_error",
            ],
            ErrorKind::AuthFailure,
        ),
        (&["timeout", "deadline_exceeded"], ErrorKind::Timeout),
        (
            &["overloaded", "unavailable", "server_error", "connection"],
            ErrorKind::Connection,
        ),
        (
            &["invalid_request", "invalid_argument", "malformed", "context_length"],
            ErrorKind::Malformed,
        ),
    ];

    RULES
        .iter()
        .find(|(needles, _)| needles.iter().any(|n| tag.contains(n)))
        .map(|(_, kind)| *kind)
}

/// Fallback pattern matching on free-form error text.
pub fn classify_message(message: &str) -> ErrorKind {
    const RULES: &[(&[&str], ErrorKind)] = &[
        (
            &[
                "429",
                "rate limit",
                "rate_limit",
                "ratelimit",
                "too many requests",
                "quota",
                "throttl",
                "resource_exhausted",
            ],
            ErrorKind::RateLimited,
        ),
        (
            &[
                "401",
                "403",
                "unauthorized",
                "forbidden",
                "invalid api key",
                "invalid_api_key",
                "authentication",
                "permission denied",
                "token has expired",
            ],
            ErrorKind::AuthFailure,
        ),
        (
            &["timed out", "timeout", "deadline exceeded"],
            ErrorKind::Timeout,
        ),
        (
            &[
                "connection refused",
                "connection reset",
                "connection closed",
                "broken pipe",
                "network",
                "dns",
                "unreachable",
                "service unavailable",
                "bad gateway",
                "overloaded",
                "capacity",
            ],
            ErrorKind::Connection,
        ),
        (
            &[
                "invalid json",
                "malformed",
                "parse error",
                "unexpected response",
                "missing field",
            ],
            ErrorKind::Malformed,
        ),
    ];

    let lower = message.to_ascii_lowercase();
    RULES
        .iter()
        .find(|(needles, _)| needles.iter().any(|n| lower.contains(n)))
        .map(|(_, kind)| *kind)
        .unwrap_or(ErrorKind::Unknown)
}
