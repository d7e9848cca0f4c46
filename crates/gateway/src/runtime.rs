//! Wires every subsystem from one [`AppConfig`].
//!
//! Shared pieces (HTTP client, provider, stores, memory, event bus) are
//! built once and handed out as `Arc`s.

use concierge_agent::{AgentLoop, BriefingGenerator, ContextAssembler, UserToolset};
use concierge_channels::{CloudApiClient, WhatsAppSender};
use concierge_config::AppConfig;
use concierge_core::credential::CredentialResolver;
use concierge_core::event::EventBus;
use concierge_core::provider::Provider;
use concierge_credentials::{OAuthTokenRefresher, StoredCredentialResolver};
use concierge_memory::MemoryService;
use concierge_store::Stores;
use concierge_tools::ToolContext;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const HTTP_TIMEOUT_SECS: u64 = 30;

pub struct Runtime {
    pub config: AppConfig,
    pub http: reqwest::Client,
    pub provider: Arc<dyn Provider>,
    pub stores: Stores,
    pub memory: MemoryService,
    pub credentials: Arc<dyn CredentialResolver>,
    pub toolset: Arc<UserToolset>,
    pub events: Arc<EventBus>,
    pub agent: Arc<AgentLoop>,
    pub whatsapp: Option<Arc<dyn WhatsAppSender>>,
}

impl Runtime {
    /// Build from configuration, opening the configured database.
    pub async fn build(config: AppConfig) -> Result<Self, concierge_core::Error> {
        let stores = concierge_store::open(&config.database).await?;
        let router = concierge_providers::build_from_config(&config);
        let provider = router.default_provider().ok_or_else(|| concierge_core::Error::Config {
            message: format!("no provider named '{}' is configured", config.default_provider),
        })?;
        Ok(Self::assemble(config, stores, provider))
    }

    /// Build around already-open stores and a chosen provider.
    pub fn assemble(config: AppConfig, stores: Stores, provider: Arc<dyn Provider>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to a default HTTP client");
                reqwest::Client::new()
            });

        let memory = concierge_memory::build_from_config(&config.memory);
        let events = Arc::new(EventBus::default());

        let refresher = Arc::new(OAuthTokenRefresher::new(http.clone(), config.oauth.clone()));
        let credentials: Arc<dyn CredentialResolver> =
            Arc::new(StoredCredentialResolver::new(stores.accounts.clone(), refresher));

        let toolset = Arc::new(UserToolset::new(
            credentials.clone(),
            http.clone(),
            Arc::new(config.endpoints.clone()),
            memory.clone(),
        ));

        let assembler = Arc::new(
            ContextAssembler::new(memory.clone(), stores.threads.clone(), events.clone())
                .with_recall_limit(config.agent.recall_limit),
        );
        let agent = Arc::new(
            AgentLoop::new(
                provider.clone(),
                &config.default_model,
                assembler,
                stores.checkpoints.clone(),
                toolset.clone(),
                events.clone(),
            )
            .with_temperature(config.default_temperature)
            .with_max_tokens(config.default_max_tokens)
            .with_max_iterations(config.agent.max_iterations)
            .with_history_window(config.agent.history_window),
        );

        let whatsapp: Option<Arc<dyn WhatsAppSender>> = match CloudApiClient::from_config(http.clone(), &config.whatsapp) {
            Ok(client) => Some(Arc::new(client)),
            Err(e) => {
                info!(reason = %e, "WhatsApp sending disabled");
                None
            }
        };

        Self {
            config,
            http,
            provider,
            stores,
            memory,
            credentials,
            toolset,
            events,
            agent,
            whatsapp,
        }
    }

    /// Replace the outbound WhatsApp client.
    pub fn with_whatsapp(mut self, sender: Arc<dyn WhatsAppSender>) -> Self {
        self.whatsapp = Some(sender);
        self
    }

    /// Adapter context bound to one user.
    pub fn tool_context(&self, user_id: &str) -> ToolContext {
        self.toolset.context_for(user_id)
    }

    pub fn briefing_generator(&self) -> BriefingGenerator {
        BriefingGenerator::new(self.provider.clone(), &self.config.default_model)
            .with_temperature(self.config.default_temperature)
    }
}
