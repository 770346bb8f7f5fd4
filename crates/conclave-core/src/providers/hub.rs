//! The service handle that owns model clients
//!
//! Clients are built lazily from a profile's model settings and kept in an
//! LRU cache keyed by provider, model and sampling settings.

use anyhow::{Result, anyhow};
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use super::anthropic::AnthropicProvider;
use super::openai::OpenAiProvider;
use super::openai_compat::OpenAiCompatProvider;
use super::types::{ChatMessage, LlmProvider, Sampling};
use crate::agents::profile::ModelSettings;
use crate::error::ConclaveError;

const DEFAULT_CACHE_SIZE: usize = 32;

/// Where a provider lives and how to authenticate against it
#[derive(Clone, Default)]
pub struct ProviderEndpoint {
    pub api_key: String,
    pub base_url: Option<String>,
}

impl std::fmt::Debug for ProviderEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderEndpoint")
            .field("api_key", &mask(&self.api_key))
            .field("base_url", &self.base_url)
            .finish()
    }
}

fn mask(secret: &str) -> &'static str {
    if secret.is_empty() { "(not set)" } else { "***" }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ClientKey {
    provider: String,
    model: String,
    temperature: u32,
    max_tokens: u32,
    top_p: u32,
}

impl ClientKey {
    fn new(provider: &str, model: &str, sampling: Sampling) -> Self {
        Self {
            provider: provider.to_string(),
            model: model.to_string(),
            temperature: sampling.temperature.to_bits(),
            max_tokens: sampling.max_tokens,
            top_p: sampling.top_p.to_bits(),
        }
    }
}

/// Owns provider endpoint configuration and cached clients
pub struct ModelHub {
    endpoints: HashMap<String, ProviderEndpoint>,
    /// Clients installed up front for a (provider, model) pair, bypassing construction
    installed: HashMap<(String, String), Arc<dyn LlmProvider>>,
    cache: Mutex<LruCache<ClientKey, Arc<dyn LlmProvider>>>,
}

impl std::fmt::Debug for ModelHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHub")
            .field("endpoints", &self.endpoints)
            .field("installed", &self.installed.len())
            .finish()
    }
}

impl Default for ModelHub {
    fn default() -> Self {
        Self::new(HashMap::new())
    }
}

impl ModelHub {
    pub fn new(endpoints: HashMap<String, ProviderEndpoint>) -> Self {
        Self::with_capacity(endpoints, DEFAULT_CACHE_SIZE)
    }

    pub fn with_capacity(endpoints: HashMap<String, ProviderEndpoint>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            endpoints,
            installed: HashMap::new(),
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Serve every request for `provider`/`model` from the given client
    pub fn install(
        mut self,
        provider: impl Into<String>,
        model: impl Into<String>,
        client: Arc<dyn LlmProvider>,
    ) -> Self {
        self.installed.insert((provider.into(), model.into()), client);
        self
    }

    /// Get (or build) the client for a profile's model settings
    pub fn client(&self, settings: &ModelSettings) -> Result<Arc<dyn LlmProvider>> {
        if let Some(client) = self
            .installed
            .get(&(settings.provider.clone(), settings.name.clone()))
        {
            return Ok(client.clone());
        }

        let sampling = Sampling::from(settings);
        let key = ClientKey::new(&settings.provider, &settings.name, sampling);

        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(client) = cache.get(&key) {
            return Ok(client.clone());
        }

        let client = self.build(&settings.provider, &settings.name, sampling)?;
        info!(
            "ModelHub: built {} client for model {}",
            settings.provider, settings.name
        );
        cache.put(key, client.clone());
        Ok(client)
    }

    /// One model call, with infrastructure errors mapped into the core taxonomy
    pub async fn complete(
        &self,
        settings: &ModelSettings,
        messages: &[ChatMessage],
        system: &str,
    ) -> crate::error::Result<String> {
        let client = self.client(settings).map_err(ConclaveError::provider)?;
        debug!(
            "ModelHub: calling {}/{} with {} messages",
            client.provider_name(),
            client.model(),
            messages.len()
        );
        let response = client
            .chat(messages, system)
            .await
            .map_err(ConclaveError::provider)?;
        Ok(response.text)
    }

    /// Number of cached clients
    pub fn cached(&self) -> usize {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn endpoint(&self, provider: &str) -> ProviderEndpoint {
        self.endpoints.get(provider).cloned().unwrap_or_default()
    }

    fn build(&self, provider: &str, model: &str, sampling: Sampling) -> Result<Arc<dyn LlmProvider>> {
        let endpoint = self.endpoint(provider);
        let client: Arc<dyn LlmProvider> = match provider {
            "openai" => {
                if endpoint.api_key.is_empty() {
                    return Err(anyhow!("OpenAI API key not configured"));
                }
                Arc::new(OpenAiProvider::new(
                    endpoint.api_key,
                    model.to_string(),
                    endpoint
                        .base_url
                        .unwrap_or_else(|| "https://api.openai.com".to_string()),
                    sampling,
                )?)
            }
            "anthropic" => {
                if endpoint.api_key.is_empty() {
                    return Err(anyhow!("Anthropic API key not configured"));
                }
                Arc::new(AnthropicProvider::new(
                    endpoint.api_key,
                    model.to_string(),
                    endpoint
                        .base_url
                        .unwrap_or_else(|| "https://api.anthropic.com".to_string()),
                    sampling,
                )?)
            }
            "ollama" => Arc::new(OpenAiCompatProvider::new(
                "ollama".to_string(),
                endpoint.api_key,
                model.to_string(),
                endpoint
                    .base_url
                    .unwrap_or_else(|| "http://localhost:11434/v1".to_string()),
                sampling,
            )?),
            "openai_compat" => {
                let base_url = endpoint
                    .base_url
                    .ok_or_else(|| anyhow!("openai_compat provider needs a base_url"))?;
                Arc::new(OpenAiCompatProvider::new(
                    "openai_compat".to_string(),
                    endpoint.api_key,
                    model.to_string(),
                    base_url,
                    sampling,
                )?)
            }
            other => return Err(anyhow!("unknown model provider '{}'", other)),
        };
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::types::ChatResponse;
    use async_trait::async_trait;

    struct EchoProvider;

    #[async_trait]
    impl LlmProvider for EchoProvider {
        fn provider_name(&self) -> &str {
            "mock"
        }
        fn model(&self) -> &str {
            "echo"
        }
        async fn chat(&self, messages: &[ChatMessage], system: &str) -> Result<ChatResponse> {
            let last = messages.last().map(|m| m.content.as_str()).unwrap_or("");
            Ok(ChatResponse::text(format!("{}|{}", system, last)))
        }
    }

    fn settings(provider: &str, model: &str) -> ModelSettings {
        ModelSettings {
            provider: provider.to_string(),
            name: model.to_string(),
            ..ModelSettings::default()
        }
    }

    #[test]
    fn test_clients_are_cached_per_settings() {
        let hub = ModelHub::default();
        let a = hub.client(&settings("ollama", "llama3")).unwrap();
        let b = hub.client(&settings("ollama", "llama3")).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(hub.cached(), 1);

        let mut warmer = settings("ollama", "llama3");
        warmer.temperature = 1.2;
        let c = hub.client(&warmer).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(hub.cached(), 2);
    }

    #[test]
    fn test_cache_evicts_least_recent() {
        let hub = ModelHub::with_capacity(HashMap::new(), 1);
        hub.client(&settings("ollama", "a")).unwrap();
        hub.client(&settings("ollama", "b")).unwrap();
        assert_eq!(hub.cached(), 1);
    }

    #[test]
    fn test_unknown_provider_fails() {
        let hub = ModelHub::default();
        let err = hub.client(&settings("carrier-pigeon", "x")).err().unwrap();
        assert!(err.to_string().contains("carrier-pigeon"));
    }

    #[test]
    fn test_missing_keys_and_urls() {
        let hub = ModelHub::default();
        assert!(hub.client(&settings("openai", "gpt-4o")).is_err());
        assert!(hub.client(&settings("openai_compat", "x")).is_err());

        let mut endpoints = HashMap::new();
        endpoints.insert(
            "openai".to_string(),
            ProviderEndpoint {
                api_key: "sk-test".to_string(),
                base_url: None,
            },
        );
        let hub = ModelHub::new(endpoints);
        let client = hub.client(&settings("openai", "gpt-4o")).unwrap();
        assert_eq!(client.provider_name(), "openai");
    }

    #[test]
    fn test_endpoint_debug_masks_key() {
        let endpoint = ProviderEndpoint {
            api_key: "sk-very-secret".to_string(),
            base_url: None,
        };
        let debug = format!("{:?}", endpoint);
        assert!(!debug.contains("sk-very-secret"));
        assert!(debug.contains("***"));
    }

    #[tokio::test]
    async fn test_installed_client_is_used() {
        let hub = ModelHub::default().install("mock", "echo", Arc::new(EchoProvider));
        let text = hub
            .complete(&settings("mock", "echo"), &[ChatMessage::user("ping")], "sys")
            .await
            .unwrap();
        assert_eq!(text, "sys|ping");
        assert_eq!(hub.cached(), 0);
    }

    #[tokio::test]
    async fn test_complete_maps_provider_errors() {
        let hub = ModelHub::default();
        let err = hub
            .complete(&settings("nope", "x"), &[], "")
            .await
            .unwrap_err();
        assert!(matches!(err, ConclaveError::Provider(_)));
    }
}
