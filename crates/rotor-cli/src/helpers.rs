//! Startup helpers: logging, provider registration, shared services.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rotor_agent::{Agent, OpenAiCompatibleProvider, ProviderRegistry};
use rotor_rotation::{Catalogue, RotationManager, StateFile};
use rotor_sandbox::CommandSandbox;
use tracing_subscriber::EnvFilter;

use crate::config::RotorConfig;

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Initialise the tracing subscriber.  `RUST_LOG` wins over `default_level`.
pub fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

// ---------------------------------------------------------------------------
// Services
// ---------------------------------------------------------------------------

/// Build the rotation manager, resolving a relative state file against the
/// directory holding the config file.
pub fn rotation_manager(config: &RotorConfig, config_path: &Path) -> Result<RotationManager> {
    let catalogue = config.catalogue()?;
    let state_path = if config.rotation.state_file.is_absolute() {
        config.rotation.state_file.clone()
    } else {
        config_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(&config.rotation.state_file)
    };
    RotationManager::with_state_file(catalogue, StateFile::new(&state_path)).with_context(|| {
        format!(
            "failed to load rotation state from {}",
            state_path.display()
        )
    })
}

/// Register an adapter for every provider whose credentials are present.
///
/// Providers without a key are skipped; the agent then passes over their
/// models during selection.
pub fn provider_registry(catalogue: &Catalogue, timeout: Duration) -> Result<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();
    for provider in &catalogue.providers {
        match OpenAiCompatibleProvider::from_config(provider, timeout)? {
            Some(adapter) => {
                tracing::debug!(provider = %provider.name, "provider registered");
                registry.register(Arc::new(adapter));
            }
            None => {
                tracing::info!(
                    provider = %provider.name,
                    env = %provider.api_key_env,
                    "provider skipped, API key not set"
                );
            }
        }
    }
    Ok(registry)
}

/// Assemble an agent from the config.
pub fn build_agent(config: &RotorConfig, rotation: Arc<RotationManager>) -> Result<Agent> {
    let sandbox = CommandSandbox::new(config.sandbox.clone())
        .context("failed to initialise the command sandbox")?;
    let providers = provider_registry(rotation.catalogue(), config.agent.provider_timeout())?;
    if providers.is_empty() {
        tracing::warn!("no provider has credentials configured");
    }
    Ok(Agent::new(
        config.agent.clone(),
        rotation,
        Arc::new(sandbox),
        providers,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rotor_rotation::ProviderConfig;

    #[test]
    fn keyless_providers_are_registered() {
        let catalogue = Catalogue {
            providers: vec![
                ProviderConfig {
                    name: "local".into(),
                    base_url: "http://127.0.0.1:11434/v1".into(),
                    api_key_env: String::new(),
                },
                ProviderConfig {
                    name: "keyed".into(),
                    base_url: "https://api.example.com/v1".into(),
                    api_key_env: "ROTOR_TEST_KEY_THAT_IS_NEVER_SET".into(),
                },
            ],
            models: Vec::new(),
        };
        let registry = provider_registry(&catalogue, Duration::from_secs(5)).unwrap();
        assert!(registry.contains("local"));
        assert!(!registry.contains("keyed"));
    }

    #[test]
    fn relative_state_file_sits_next_to_config() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("rotor.toml");
        let manager = rotation_manager(&RotorConfig::default(), &config_path).unwrap();
        manager
            .set_state("groq", &Catalogue::builtin().models[0].id)
            .unwrap();
        assert!(dir.path().join("data/rotation_state.json").exists());
    }
}
