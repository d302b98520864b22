//! The `rotor.toml` config file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rotor_agent::AgentConfig;
use rotor_rotation::{Catalogue, ModelDescriptor, ProviderConfig};
use rotor_sandbox::SandboxConfig;
use serde::Deserialize;

/// Settings for the rotation state file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RotationSettings {
    pub state_file: PathBuf,
}

impl Default for RotationSettings {
    fn default() -> Self {
        Self {
            state_file: PathBuf::from("data/rotation_state.json"),
        }
    }
}

/// Everything read from the config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RotorConfig {
    pub agent: AgentConfig,
    pub sandbox: SandboxConfig,
    pub rotation: RotationSettings,
    pub providers: Vec<ProviderConfig>,
    pub models: Vec<ModelDescriptor>,
}

impl RotorConfig {
    /// Load the config from `path`.  A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml_str(&raw)
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// The model catalogue: the configured one, or the built-in table when no
    /// models are declared.
    ///
    /// Built-in providers stay available to configured models, and a
    /// configured provider replaces a built-in one of the same name.
    pub fn catalogue(&self) -> Result<Catalogue> {
        if self.models.is_empty() {
            let mut catalogue = Catalogue::builtin();
            merge_providers(&mut catalogue.providers, &self.providers);
            catalogue.validate()?;
            return Ok(catalogue);
        }

        let mut providers = Catalogue::builtin().providers;
        merge_providers(&mut providers, &self.providers);
        Ok(Catalogue::new(providers, self.models.clone())?)
    }
}

fn merge_providers(into: &mut Vec<ProviderConfig>, overrides: &[ProviderConfig]) {
    for provider in overrides {
        match into.iter_mut().find(|p| p.name == provider.name) {
            Some(existing) => *existing = provider.clone(),
            None => into.push(provider.clone()),
        }
    }
}
