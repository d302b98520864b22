//! The provider adapter contract and the registry the agent loop resolves
//! adapters from.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ProviderError;
use crate::llm::types::{InvokeParams, Message, ProviderReply};

/// A uniform call interface over one upstream provider.
///
/// Adapters own the wire format.  Dropping the returned future must abandon
/// the request.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// The provider name models refer to in the catalogue.
    fn name(&self) -> &str;

    /// Send `conversation` and the tool schema to `model_id`.
    async fn invoke(
        &self,
        model_id: &str,
        conversation: &[Message],
        tools: &[Value],
        params: &InvokeParams,
    ) -> Result<ProviderReply, ProviderError>;
}

/// Adapters keyed by provider name.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: BTreeMap<String, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `adapter` under its own name, replacing any previous one.
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        let name = adapter.name().to_owned();
        if self.adapters.insert(name.clone(), adapter).is_some() {
            tracing::debug!(provider = %name, "replaced provider adapter");
        }
    }

    pub fn with(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, provider: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(provider).cloned()
    }

    pub fn contains(&self, provider: &str) -> bool {
        self.adapters.contains_key(provider)
    }

    /// Registered provider names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.adapters.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str);

    #[async_trait]
    impl ProviderAdapter for Fixed {
        fn name(&self) -> &str {
            self.0
        }

        async fn invoke(
            &self,
            _model_id: &str,
            _conversation: &[Message],
            _tools: &[Value],
            _params: &InvokeParams,
        ) -> Result<ProviderReply, ProviderError> {
            Ok(ProviderReply::text(self.0))
        }
    }

    #[test]
    fn registry_resolves_by_name() {
        let registry = ProviderRegistry::new()
            .with(Arc::new(Fixed("groq")))
            .with(Arc::new(Fixed("deepseek")));
        assert_eq!(registry.len(), 2);
        assert!(registry.contains("groq"));
        assert!(registry.get("openai").is_none());
        assert_eq!(registry.names(), ["deepseek", "groq"]);
    }

    #[tokio::test]
    async fn registered_adapter_is_invoked() {
        let registry = ProviderRegistry::new().with(Arc::new(Fixed("groq")));
        let adapter = registry.get("groq").unwrap();
        let reply = adapter
            .invoke("m", &[], &[], &InvokeParams::default())
            .await
            .unwrap();
        assert_eq!(reply.text, "groq");
    }
}
