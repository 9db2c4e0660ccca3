//! Provider registry.
//!
//! Constructs and holds one adapter per configured mesh endpoint. At
//! startup the registry reads the [`EndpointsConfig`], resolves auth, and
//! instantiates the matching vendor adapter. Endpoints that fail to
//! initialize (e.g. missing API key) are logged and skipped rather than
//! aborting the whole gateway.

use crate::anthropic::AnthropicProvider;
use crate::google::GoogleProvider;
use crate::openai_compat::OpenAiCompatProvider;
use crate::traits::LlmProvider;
use llmesh_domain::config::{EndpointsConfig, ProviderKind};
use std::collections::HashMap;
use std::sync::Arc;

pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    init_errors: Vec<ProviderInitError>,
}

#[derive(Debug, Clone)]
pub struct ProviderInitError {
    pub endpoint_id: String,
    pub error: String,
}

impl ProviderRegistry {
    pub fn from_config(config: &EndpointsConfig) -> Self {
        let mut providers: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();
        let mut init_errors = Vec::new();

        for endpoint in &config.endpoints {
            let result: llmesh_domain::error::Result<Arc<dyn LlmProvider>> = match endpoint.provider {
                ProviderKind::Anthropic => {
                    AnthropicProvider::from_config(endpoint).map(|p| Arc::new(p) as Arc<dyn LlmProvider>)
                }
                ProviderKind::Google => {
                    GoogleProvider::from_config(endpoint).map(|p| Arc::new(p) as Arc<dyn LlmProvider>)
                }
                ProviderKind::OpenaiCompat => {
                    OpenAiCompatProvider::from_config(endpoint).map(|p| Arc::new(p) as Arc<dyn LlmProvider>)
                }
            };

            match result {
                Ok(provider) => {
                    tracing::info!(endpoint_id = %endpoint.id, provider = ?endpoint.provider, "registered LLM endpoint");
                    providers.insert(endpoint.id.clone(), provider);
                }
                Err(e) => {
                    tracing::warn!(endpoint_id = %endpoint.id, error = %e, "failed to initialize LLM endpoint, skipping");
                    init_errors.push(ProviderInitError {
                        endpoint_id: endpoint.id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        Self { providers, init_errors }
    }

    /// Register an already-constructed provider directly, bypassing
    /// config-driven initialization. Used by tests and by callers that
    /// build adapters outside the `EndpointsConfig` flow.
    pub fn insert(&mut self, endpoint_id: String, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(endpoint_id, provider);
    }

    pub fn get(&self, endpoint_id: &str) -> Option<Arc<dyn LlmProvider>> {
        self.providers.get(endpoint_id).cloned()
    }

    pub fn list_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn init_errors(&self) -> &[ProviderInitError] {
        &self.init_errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmesh_domain::config::EndpointConfig;
    use std::collections::HashSet;

    #[test]
    fn unconfigured_openai_compat_endpoint_is_skipped_not_fatal() {
        let config = EndpointsConfig {
            endpoints: vec![EndpointConfig {
                id: "local".into(),
                provider: ProviderKind::OpenaiCompat,
                model: "llama3".into(),
                role: None,
                capability_tags: HashSet::new(),
                rate_limit_per_min: 60,
                api_key_env: None,
                base_url: None,
            }],
        };
        let registry = ProviderRegistry::from_config(&config);
        assert!(registry.is_empty());
        assert_eq!(registry.init_errors().len(), 1);
    }
}
