//! Per-turn tool registries.
//!
//! Tools carry the identity of the user they act for, so a registry is
//! built for every turn instead of shared across requests.

use concierge_config::EndpointsConfig;
use concierge_core::credential::CredentialResolver;
use concierge_core::tool::ToolRegistry;
use concierge_core::user::User;
use concierge_memory::MemoryService;
use concierge_tools::ToolContext;
use std::sync::Arc;

/// Builds the tools one user may use in one turn.
pub trait ToolsetFactory: Send + Sync {
    fn build(&self, user: &User) -> ToolRegistry;
}

impl<F> ToolsetFactory for F
where
    F: Fn(&User) -> ToolRegistry + Send + Sync,
{
    fn build(&self, user: &User) -> ToolRegistry {
        self(user)
    }
}

/// The production toolset: every adapter the user's preferences enable.
#[derive(Clone)]
pub struct UserToolset {
    credentials: Arc<dyn CredentialResolver>,
    http: reqwest::Client,
    endpoints: Arc<EndpointsConfig>,
    memory: MemoryService,
}

impl UserToolset {
    pub fn new(
        credentials: Arc<dyn CredentialResolver>,
        http: reqwest::Client,
        endpoints: Arc<EndpointsConfig>,
        memory: MemoryService,
    ) -> Self {
        Self {
            credentials,
            http,
            endpoints,
            memory,
        }
    }

    /// Adapter context bound to `user_id`.
    pub fn context_for(&self, user_id: &str) -> ToolContext {
        ToolContext::new(
            user_id,
            self.credentials.clone(),
            self.http.clone(),
            self.endpoints.clone(),
        )
    }
}

impl ToolsetFactory for UserToolset {
    fn build(&self, user: &User) -> ToolRegistry {
        concierge_tools::registry_for_preferences(&self.context_for(&user.id), &self.memory, &user.preferences)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concierge_core::user::Capability;
    use concierge_credentials::StaticCredentialResolver;
    use concierge_memory::NoopMemory;

    #[test]
    fn registry_follows_preferences() {
        let toolset = UserToolset::new(
            Arc::new(StaticCredentialResolver::unlinked()),
            reqwest::Client::new(),
            Arc::new(EndpointsConfig::default()),
            MemoryService::new(Arc::new(NoopMemory)),
        );
        let mut user = User::new("alice");
        user.preferences.capabilities = [Capability::Github].into_iter().collect();

        let registry = toolset.build(&user);
        assert_eq!(
            registry.names(),
            vec!["get_github_pull_request_details", "list_github_pull_requests"]
        );
    }

    #[test]
    fn closures_are_factories() {
        let factory = |_user: &User| ToolRegistry::new();
        assert!(ToolsetFactory::build(&factory, &User::new("bob")).is_empty());
    }
}
