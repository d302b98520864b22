//! The rotation manager.
//!
//! Owns the catalogue together with the only cross-request mutable state in
//! the process: the current [`ProviderState`], per-model [`UsageRecord`]s
//! (including blacklist windows), and the set of models deactivated at
//! runtime.  All of it sits behind a single mutex, and every mutation is
//! written back to the state file (when one is configured) while the lock is
//! held, so concurrent requests never race on the file.
//!
//! Selection order is the catalogue's declaration order; repeated calls with
//! no intervening mutation return identical lists.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::catalogue::{Catalogue, Category, ModelDescriptor};
use crate::error::{Result, RotationError};
use crate::state::{PersistedState, ProviderState, StateFile, UsageRecord};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Effective selection status of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelStatus {
    /// Selectable.
    Available,
    /// Temporarily excluded until the given instant.
    Blacklisted { until: DateTime<Utc> },
    /// Disabled in the catalogue or deactivated at runtime.
    Inactive,
}

impl std::fmt::Display for ModelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Available => write!(f, "available"),
            Self::Blacklisted { until } => write!(f, "blacklisted until {}", until.to_rfc3339()),
            Self::Inactive => write!(f, "inactive"),
        }
    }
}

/// Mutable state guarded by the manager's lock.
#[derive(Debug)]
struct Inner {
    state: ProviderState,
    usage: BTreeMap<String, UsageRecord>,
    /// Models switched off at runtime (e.g. after an authentication failure).
    deactivated: HashSet<String>,
}

/// Selects, blacklists, and restores models across task categories.
///
/// Construct one per process and share it by `Arc`.
#[derive(Debug)]
pub struct RotationManager {
    catalogue: Catalogue,
    store: Option<StateFile>,
    inner: Mutex<Inner>,
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

impl RotationManager {
    /// Create a manager with no persistence.  The current model starts at the
    /// first catalogue entry.
    pub fn new(catalogue: Catalogue) -> Result<Self> {
        catalogue.validate()?;
        let state = initial_state(&catalogue, None);
        Ok(Self {
            catalogue,
            store: None,
            inner: Mutex::new(Inner {
                state,
                usage: BTreeMap::new(),
                deactivated: HashSet::new(),
            }),
        })
    }

    /// Create a manager backed by a state file, restoring whatever the file
    /// holds.  A persisted pointer to a model that is no longer in the
    /// catalogue falls back to the first catalogue entry.
    pub fn with_state_file(catalogue: Catalogue, store: StateFile) -> Result<Self> {
        catalogue.validate()?;
        let persisted = store.load()?;

        let state = initial_state(&catalogue, persisted.as_ref());
        let usage = persisted
            .as_ref()
            .map(PersistedState::records)
            .unwrap_or_default();

        info!(
            path = %store.path().display(),
            provider = %state.provider,
            model = %state.model_id,
            restored = persisted.is_some(),
            "rotation manager initialised"
        );

        Ok(Self {
            catalogue,
            store: Some(store),
            inner: Mutex::new(Inner {
                state,
                usage,
                deactivated: HashSet::new(),
            }),
        })
    }

    /// The catalogue this manager selects from.
    pub fn catalogue(&self) -> &Catalogue {
        &self.catalogue
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn require_model(&self, model_id: &str) -> Result<&ModelDescriptor> {
        self.catalogue
            .model(model_id)
            .ok_or_else(|| RotationError::UnknownModel {
                model_id: model_id.to_owned(),
                provider: None,
            })
    }

    /// Write the current state to disk.  Must be called with the lock held.
    fn persist(&self, inner: &Inner) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let snapshot = PersistedState::capture(&inner.state, &inner.usage, Utc::now());
        store.save(&snapshot)
    }

    /// Persist, logging instead of failing.  Used by bookkeeping paths where
    /// losing one write is preferable to failing the request.
    fn persist_best_effort(&self, inner: &Inner) {
        if let Err(e) = self.persist(inner) {
            warn!(error = %e, "failed to persist rotation state");
        }
    }
}

fn initial_state(catalogue: &Catalogue, persisted: Option<&PersistedState>) -> ProviderState {
    if let Some(p) = persisted {
        let valid = catalogue
            .model(&p.model_id)
            .is_some_and(|m| m.provider == p.provider);
        if valid {
            return p.provider_state();
        }
        warn!(
            provider = %p.provider,
            model = %p.model_id,
            "persisted model not in catalogue, falling back to first entry"
        );
    }

    // `validate` guarantees at least one model.
    catalogue
        .models
        .first()
        .map(|m| ProviderState {
            provider: m.provider.clone(),
            model_id: m.id.clone(),
        })
        .unwrap_or_else(|| ProviderState {
            provider: String::new(),
            model_id: String::new(),
        })
}

fn expiry_after(now: DateTime<Utc>, cooldown: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(cooldown)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

impl RotationManager {
    fn status_locked(
        &self,
        inner: &Inner,
        model: &ModelDescriptor,
        now: DateTime<Utc>,
    ) -> ModelStatus {
        if !model.is_active || inner.deactivated.contains(&model.id) {
            return ModelStatus::Inactive;
        }
        match inner.usage.get(&model.id) {
            Some(record) if record.is_blacklisted_at(now) => ModelStatus::Blacklisted {
                // `is_blacklisted_at` implies the window is set.
                until: record.blacklisted_until.unwrap_or(now),
            },
            _ => ModelStatus::Available,
        }
    }

    fn available_locked(&self, inner: &Inner, category: Category) -> Vec<ModelDescriptor> {
        let now = Utc::now();
        self.catalogue
            .models
            .iter()
            .filter(|m| m.serves(category))
            .filter(|m| self.status_locked(inner, m, now) == ModelStatus::Available)
            .cloned()
            .collect()
    }

    /// Active, non-blacklisted models serving `category`, in catalogue order.
    pub fn available_models(&self, category: Category) -> Vec<ModelDescriptor> {
        let inner = self.lock();
        self.available_locked(&inner, category)
    }

    /// Every catalogue model serving `category`, including blacklisted and
    /// inactive ones.  `is_active` reflects runtime deactivation.
    pub fn list_models(&self, category: Category) -> Vec<ModelDescriptor> {
        let inner = self.lock();
        self.catalogue
            .models
            .iter()
            .filter(|m| m.serves(category))
            .map(|m| {
                let mut model = m.clone();
                model.is_active = m.is_active && !inner.deactivated.contains(&m.id);
                model
            })
            .collect()
    }

    /// Effective status of a model, or `None` if it is not in the catalogue.
    pub fn status(&self, model_id: &str) -> Option<ModelStatus> {
        let model = self.catalogue.model(model_id)?;
        let inner = self.lock();
        Some(self.status_locked(&inner, model, Utc::now()))
    }

    /// The current provider/model pointer.
    pub fn current_state(&self) -> ProviderState {
        self.lock().state.clone()
    }

    /// Usage counters for a model, if it has ever been used or blacklisted.
    pub fn usage(&self, model_id: &str) -> Option<UsageRecord> {
        self.lock().usage.get(model_id).cloned()
    }

    /// End of the model's blacklist window, if one is open.
    pub fn blacklisted_until(&self, model_id: &str) -> Option<DateTime<Utc>> {
        let now = Utc::now();
        self.lock()
            .usage
            .get(model_id)
            .filter(|r| r.is_blacklisted_at(now))
            .and_then(|r| r.blacklisted_until)
    }
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

impl RotationManager {
    /// Pick a model for a new request.
    ///
    /// Prefers the current [`ProviderState`] model when it is available for
    /// `category`; otherwise the first available model.  Does not move the
    /// pointer.
    pub fn select(&self, category: Category) -> Option<ModelDescriptor> {
        let inner = self.lock();
        let available = self.available_locked(&inner, category);
        let chosen = available
            .iter()
            .find(|m| m.id == inner.state.model_id)
            .or_else(|| available.first())
            .cloned();

        match &chosen {
            Some(model) => debug!(%category, model = %model.id, "model selected"),
            None => warn!(%category, "no model available"),
        }
        chosen
    }

    /// Pick the first available model for `category` that is not in
    /// `excluding`, used when rotating away from a failed model.
    ///
    /// The returned model becomes the current [`ProviderState`].  Returns
    /// `None` when every candidate is excluded, blacklisted, or inactive.
    pub fn select_next(
        &self,
        category: Category,
        excluding: &HashSet<String>,
    ) -> Option<ModelDescriptor> {
        let mut inner = self.lock();
        let next = self
            .available_locked(&inner, category)
            .into_iter()
            .find(|m| !excluding.contains(&m.id));

        let Some(model) = next else {
            warn!(%category, excluded = excluding.len(), "rotation found no candidate");
            return None;
        };

        if inner.state.model_id != model.id {
            info!(
                from = %inner.state.model_id,
                to = %model.id,
                provider = %model.provider,
                "rotated current model"
            );
            inner.state = ProviderState {
                provider: model.provider.clone(),
                model_id: model.id.clone(),
            };
            self.persist_best_effort(&inner);
        }

        Some(model)
    }

    /// Explicitly set the current provider/model.
    ///
    /// Fails with [`RotationError::UnknownModel`] if the pair is not in the
    /// catalogue.  The state is written to disk before it takes effect; a
    /// failed write leaves the previous state in place.
    pub fn set_state(&self, provider: &str, model_id: &str) -> Result<ProviderState> {
        let known = self
            .catalogue
            .model(model_id)
            .is_some_and(|m| m.provider == provider);
        if !known {
            return Err(RotationError::UnknownModel {
                model_id: model_id.to_owned(),
                provider: Some(provider.to_owned()),
            });
        }

        let mut inner = self.lock();
        let previous = std::mem::replace(
            &mut inner.state,
            ProviderState {
                provider: provider.to_owned(),
                model_id: model_id.to_owned(),
            },
        );

        if let Err(e) = self.persist(&inner) {
            inner.state = previous;
            return Err(e);
        }

        info!(provider, model = model_id, "provider state set");
        Ok(inner.state.clone())
    }
}

// ---------------------------------------------------------------------------
// Bookkeeping
// ---------------------------------------------------------------------------

impl RotationManager {
    /// Exclude a model from selection for `cooldown`.
    ///
    /// Re-blacklisting only ever extends the window: if the model is already
    /// blacklisted past `now + cooldown` the existing expiry is kept.
    /// Returns the effective expiry.
    pub fn blacklist(&self, model_id: &str, cooldown: Duration) -> Result<DateTime<Utc>> {
        self.require_model(model_id)?;
        let proposed = expiry_after(Utc::now(), cooldown);

        let mut inner = self.lock();
        let record = inner.usage.entry(model_id.to_owned()).or_default();
        let effective = match record.blacklisted_until {
            Some(existing) if existing >= proposed => existing,
            _ => {
                record.blacklisted_until = Some(proposed);
                proposed
            }
        };

        warn!(
            model = model_id,
            until = %effective.to_rfc3339(),
            cooldown_secs = cooldown.as_secs(),
            "model blacklisted"
        );
        self.persist_best_effort(&inner);
        Ok(effective)
    }

    /// Close a model's blacklist window immediately.
    pub fn clear_blacklist(&self, model_id: &str) -> Result<()> {
        self.require_model(model_id)?;
        let mut inner = self.lock();
        if let Some(record) = inner.usage.get_mut(model_id) {
            record.blacklisted_until = None;
        }
        info!(model = model_id, "blacklist cleared");
        self.persist(&inner)
    }

    /// Count a completed call against a model.
    pub fn record_usage(&self, model_id: &str, success: bool) {
        if self.catalogue.model(model_id).is_none() {
            warn!(model = model_id, "usage recorded for unknown model, ignoring");
            return;
        }

        let mut inner = self.lock();
        let record = inner.usage.entry(model_id.to_owned()).or_default();
        record.calls += 1;
        if !success {
            record.failures += 1;
        }
        record.last_used_at = Some(Utc::now());
        debug!(
            model = model_id,
            success,
            calls = record.calls,
            failures = record.failures,
            "usage recorded"
        );
        self.persist_best_effort(&inner);
    }

    /// Reset a model's counters and blacklist window.
    pub fn reset_usage(&self, model_id: &str) -> Result<()> {
        self.require_model(model_id)?;
        let mut inner = self.lock();
        inner.usage.remove(model_id);
        info!(model = model_id, "usage reset");
        self.persist(&inner)
    }

    /// Switch a model off until [`reactivate`](Self::reactivate) is called.
    /// Used for persistent failures such as rejected credentials.
    pub fn deactivate(&self, model_id: &str) -> Result<()> {
        self.require_model(model_id)?;
        let mut inner = self.lock();
        if inner.deactivated.insert(model_id.to_owned()) {
            warn!(model = model_id, "model deactivated");
        }
        Ok(())
    }

    /// Undo a runtime deactivation.
    pub fn reactivate(&self, model_id: &str) -> Result<()> {
        self.require_model(model_id)?;
        let mut inner = self.lock();
        if inner.deactivated.remove(model_id) {
            info!(model = model_id, "model reactivated");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
