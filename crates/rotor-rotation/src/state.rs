//! Provider state, usage records, and the persisted state file.
//!
//! The state file is a small JSON document:
//!
//! ```json
//! {
//!   "provider": "groq",
//!   "modelId": "llama-3.3-70b-versatile",
//!   "blacklist": { "deepseek-chat": "2025-01-01T12:00:00Z" },
//!   "usage": { "deepseek-chat": { "calls": 4, "failures": 1, "lastUsedAt": "..." } },
//!   "lastUpdated": "2025-01-01T11:55:00Z"
//! }
//! ```
//!
//! Writes go to a temporary file in the same directory which is then renamed
//! over the target, so a crash mid-write leaves the previous file intact.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, RotationError};

// ---------------------------------------------------------------------------
// In-memory records
// ---------------------------------------------------------------------------

/// The model used when a request does not name one explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderState {
    /// Provider name of the current model.
    pub provider: String,
    /// Current model id.
    pub model_id: String,
}

/// Per-model usage counters and blacklist window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageRecord {
    /// Completed provider calls (successful or not).
    pub calls: u64,
    /// Failed provider calls.  Only decreases through an explicit reset.
    pub failures: u64,
    /// When the model was last called.
    pub last_used_at: Option<DateTime<Utc>>,
    /// The model is excluded from selection until this instant.
    pub blacklisted_until: Option<DateTime<Utc>>,
}

impl UsageRecord {
    /// Returns `true` if the blacklist window is still open at `now`.
    pub fn is_blacklisted_at(&self, now: DateTime<Utc>) -> bool {
        self.blacklisted_until.is_some_and(|until| until > now)
    }
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

/// Usage counters as written to disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedUsage {
    #[serde(default)]
    pub calls: u64,
    #[serde(default)]
    pub failures: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
}

/// The full persisted rotation state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    pub provider: String,
    pub model_id: String,
    #[serde(default)]
    pub blacklist: BTreeMap<String, DateTime<Utc>>,
    #[serde(default)]
    pub usage: BTreeMap<String, PersistedUsage>,
    pub last_updated: DateTime<Utc>,
}

impl PersistedState {
    /// Build the on-disk form from the in-memory records, dropping blacklist
    /// entries that have already expired.
    pub fn capture<'a>(
        state: &ProviderState,
        records: impl IntoIterator<Item = (&'a String, &'a UsageRecord)>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut blacklist = BTreeMap::new();
        let mut usage = BTreeMap::new();

        for (model_id, record) in records {
            if let Some(until) = record.blacklisted_until.filter(|until| *until > now) {
                blacklist.insert(model_id.clone(), until);
            }
            usage.insert(
                model_id.clone(),
                PersistedUsage {
                    calls: record.calls,
                    failures: record.failures,
                    last_used_at: record.last_used_at,
                },
            );
        }

        Self {
            provider: state.provider.clone(),
            model_id: state.model_id.clone(),
            blacklist,
            usage,
            last_updated: now,
        }
    }

    /// Expand the on-disk form back into per-model records.
    pub fn records(&self) -> BTreeMap<String, UsageRecord> {
        let mut records: BTreeMap<String, UsageRecord> = self
            .usage
            .iter()
            .map(|(id, u)| {
                (
                    id.clone(),
                    UsageRecord {
                        calls: u.calls,
                        failures: u.failures,
                        last_used_at: u.last_used_at,
                        blacklisted_until: None,
                    },
                )
            })
            .collect();

        for (id, until) in &self.blacklist {
            records.entry(id.clone()).or_default().blacklisted_until = Some(*until);
        }

        records
    }

    /// The provider pointer stored in this snapshot.
    pub fn provider_state(&self) -> ProviderState {
        ProviderState {
            provider: self.provider.clone(),
            model_id: self.model_id.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// State file
// ---------------------------------------------------------------------------

/// A JSON file holding the [`PersistedState`].
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    /// Use the file at `path`.  Nothing is read or created until
    /// [`load`](Self::load) or [`save`](Self::save) is called.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted state.  A missing file yields `Ok(None)`.
    pub fn load(&self) -> Result<Option<PersistedState>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if content.trim().is_empty() {
            return Ok(None);
        }

        let state = serde_json::from_str(&content)?;
        debug!(path = %self.path.display(), "rotation state loaded");
        Ok(Some(state))
    }

    /// Atomically replace the file contents with `state`.
    pub fn save(&self, state: &PersistedState) -> Result<()> {
        let persist_err = |reason: String| RotationError::Persist {
            path: self.path.clone(),
            reason,
        };

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let json = serde_json::to_vec_pretty(state)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)
            .map_err(|e| persist_err(format!("failed to create temp file: {e}")))?;
        tmp.write_all(&json)
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| persist_err(format!("failed to write temp file: {e}")))?;
        tmp.persist(&self.path)
            .map_err(|e| persist_err(format!("failed to replace state file: {e}")))?;

        debug!(path = %self.path.display(), "rotation state saved");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
