//! Provider router: selects the LLM provider named in configuration.

use concierge_core::provider::Provider;
use std::collections::HashMap;
use std::sync::Arc;
use crate::openai_compat::OpenAiCompatProvider;

/// Holds the configured providers and knows which one is the default.
pub struct ProviderRouter {
    providers: HashMap<String, Arc<dyn Provider>>,
    default_provider: String,
}

impl ProviderRouter {
    pub fn new(default_provider: impl Into<String>) -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: default_provider.into(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(name.into(), provider);
    }

    /// Get the default provider.
    pub fn default_provider(&self) -> Option<Arc<dyn Provider>> {
        self.providers.get(&self.default_provider).cloned()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    /// Registered provider names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

/// Build providers from configuration.
///
/// Every configured provider speaks the OpenAI chat-completions protocol.
/// The default provider is always registered, even with no `[providers]`
/// entry, using the top-level API key.
pub fn build_from_config(config: &concierge_config::AppConfig) -> ProviderRouter {
    let mut router = ProviderRouter::new(&config.default_provider);

    for (name, provider_config) in &config.providers {
        let api_key = provider_config
            .api_key
            .clone()
            .or_else(|| config.api_key.clone())
            .unwrap_or_default();
        let base_url = provider_config
            .api_url
            .clone()
            .unwrap_or_else(|| default_base_url(name));

        router.register(name.clone(), Arc::new(OpenAiCompatProvider::new(name, base_url, api_key)));
    }

    if router.get(&config.default_provider).is_none() {
        let api_key = config.api_key.clone().unwrap_or_default();
        let base_url = default_base_url(&config.default_provider);
        router.register(
            config.default_provider.clone(),
            Arc::new(OpenAiCompatProvider::new(&config.default_provider, base_url, api_key)),
        );
    }

    router
}

/// Base URL for well-known OpenAI-compatible providers.
fn default_base_url(provider_name: &str) -> String {
    match provider_name {
        "openai" => "https://api.openai.com/v1".into(),
        "openrouter" => "https://openrouter.ai/api/v1".into(),
        "groq" => "https://api.groq.com/openai/v1".into(),
        "together" => "https://api.together.xyz/v1".into(),
        "ollama" => "http://localhost:11434/v1".into(),
        _ => "https://api.openai.com/v1".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concierge_config::{AppConfig, ProviderConfig};

    #[test]
    fn router_register_and_lookup() {
        let mut router = ProviderRouter::new("openai");
        router.register("openai", Arc::new(OpenAiCompatProvider::openai("sk-test")));

        assert!(router.get("openai").is_some());
        assert!(router.get("nonexistent").is_none());
        assert!(router.default_provider().is_some());
    }

    #[test]
    fn default_base_urls() {
        assert!(default_base_url("openrouter").contains("openrouter.ai"));
        assert!(default_base_url("openai").contains("api.openai.com"));
        assert!(default_base_url("ollama").contains("localhost:11434"));
    }

    #[test]
    fn build_from_default_config() {
        let router = build_from_config(&AppConfig::default());
        let provider = router.default_provider().unwrap();
        assert_eq!(provider.name(), "openai");
    }

    #[test]
    fn configured_provider_uses_its_url() {
        let mut config = AppConfig::default();
        config.default_provider = "proxy".into();
        config.providers.insert(
            "proxy".into(),
            ProviderConfig {
                api_key: Some("k".into()),
                api_url: Some("http://localhost:4000/v1".into()),
                default_model: None,
            },
        );
        let router = build_from_config(&config);
        assert_eq!(router.list(), vec!["proxy"]);
        assert_eq!(router.default_provider().unwrap().name(), "proxy");
    }
}
