//! Morning briefing scripts.
//!
//! Gathering goes through the same capability functions the tools use, so
//! a section fails the same way a tool call would: the failure becomes a
//! short note and the rest of the briefing carries on.

use chrono::Utc;
use concierge_core::error::ProviderError;
use concierge_core::message::Message;
use concierge_core::provider::{Provider, ProviderRequest, Usage};
use concierge_core::user::{Capability, User};
use concierge_tools::google::{calendar, gmail};
use concierge_tools::{ToolContext, ToolEnvelope, github};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::prompts::{BRIEFING_INSTRUCTIONS, profile_snapshot};

const MAX_EVENTS: i64 = 10;
const MAX_UNREAD: i64 = 10;
const UNREAD_QUERY: &str = "is:unread in:inbox newer_than:1d";

/// One section of gathered material.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Section {
    Available { data: serde_json::Value },
    Unavailable { reason: String },
    /// The user has not enabled this capability.
    Disabled,
}

impl Section {
    fn from_result(name: &str, result: Result<ToolEnvelope, concierge_core::error::ToolError>) -> Self {
        match result {
            Ok(envelope) if envelope.success => Section::Available {
                data: envelope.data.unwrap_or(serde_json::Value::Null),
            },
            Ok(envelope) => {
                debug!(section = name, code = ?envelope.code_str(), "Briefing section unavailable");
                Section::Unavailable {
                    reason: envelope.render(),
                }
            }
            Err(e) => {
                warn!(section = name, error = %e, "Briefing section failed");
                Section::Unavailable {
                    reason: format!("{name} could not be loaded right now."),
                }
            }
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Section::Available { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BriefingMaterial {
    pub calendar: Section,
    pub inbox: Section,
    pub pull_requests: Section,
}

#[derive(Debug, Clone)]
pub struct Briefing {
    pub script: String,
    pub usage: Option<Usage>,
}

pub struct BriefingGenerator {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
}

impl BriefingGenerator {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.7,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Collect today's material for `user`. Never fails.
    pub async fn gather(&self, ctx: &ToolContext, user: &User) -> BriefingMaterial {
        let prefs = &user.preferences;

        let calendar = async {
            if !prefs.allows(Capability::Calendar) {
                return Section::Disabled;
            }
            Section::from_result("Calendar", calendar::list_events(ctx, Some(MAX_EVENTS)).await)
        };
        let inbox = async {
            if !prefs.allows(Capability::Email) {
                return Section::Disabled;
            }
            let result = gmail::list_messages(ctx, Some(MAX_UNREAD), Some(UNREAD_QUERY), &[]).await;
            Section::from_result("Inbox", result)
        };
        let pull_requests = async {
            if !prefs.allows(Capability::Github) {
                return Section::Disabled;
            }
            Section::from_result("Pull requests", github::list_pull_requests(ctx).await)
        };

        let (calendar, inbox, pull_requests) = tokio::join!(calendar, inbox, pull_requests);
        BriefingMaterial {
            calendar,
            inbox,
            pull_requests,
        }
    }

    /// Write the spoken script with one tool-less completion.
    pub async fn generate(&self, user: &User, material: &BriefingMaterial) -> Result<Briefing, ProviderError> {
        let now = Utc::now();
        let material_json = serde_json::to_string_pretty(material).unwrap_or_else(|_| "{}".into());
        let prompt = format!(
            "Today is {}.\n\nAbout the user:\n{}\n\nMaterial:\n{}",
            now.format("%A, %B %-d, %Y"),
            profile_snapshot(user),
            material_json,
        );

        let mut request = ProviderRequest::new(
            self.model.clone(),
            vec![Message::system(BRIEFING_INSTRUCTIONS), Message::user(prompt)],
        );
        request.temperature = self.temperature;

        let response = self.provider.complete(request).await?;
        info!(user_id = %user.id, chars = response.message.content.len(), "Briefing script generated");
        Ok(Briefing {
            script: response.message.content.trim().to_string(),
            usage: response.usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::SequentialMockProvider;
    use concierge_config::EndpointsConfig;
    use concierge_core::message::Role;
    use concierge_credentials::StaticCredentialResolver;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ctx(base: &str, resolver: StaticCredentialResolver) -> ToolContext {
        ToolContext::new(
            "alice",
            Arc::new(resolver),
            reqwest::Client::new(),
            Arc::new(EndpointsConfig::all_at(base)),
        )
    }

    #[tokio::test]
    async fn unlinked_accounts_become_unavailable_sections() {
        let generator = BriefingGenerator::new(Arc::new(SequentialMockProvider::new(vec![])), "mock-model");
        let ctx = ctx("http://127.0.0.1:1", StaticCredentialResolver::unlinked());

        let material = generator.gather(&ctx, &User::new("alice")).await;
        match &material.calendar {
            Section::Unavailable { reason } => assert!(reason.contains("Google account")),
            other => panic!("expected unavailable, got {other:?}"),
        }
        assert!(!material.inbox.is_available());
    }

    #[tokio::test]
    async fn disabled_capabilities_are_not_fetched() {
        let generator = BriefingGenerator::new(Arc::new(SequentialMockProvider::new(vec![])), "mock-model");
        let ctx = ctx("http://127.0.0.1:1", StaticCredentialResolver::unlinked());
        let mut user = User::new("alice");
        user.preferences.capabilities = [Capability::Calendar].into_iter().collect();

        let material = generator.gather(&ctx, &user).await;
        assert!(matches!(material.inbox, Section::Disabled));
        assert!(matches!(material.pull_requests, Section::Disabled));
    }

    #[tokio::test]
    async fn calendar_section_is_gathered() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/calendar/v3/calendars/primary/events"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{
                    "id": "evt_1",
                    "summary": "Standup",
                    "start": {"dateTime": "2025-03-14T09:00:00+01:00"},
                    "end": {"dateTime": "2025-03-14T09:15:00+01:00"}
                }]
            })))
            .mount(&server)
            .await;

        let generator = BriefingGenerator::new(Arc::new(SequentialMockProvider::new(vec![])), "mock-model");
        let ctx = ctx(&server.uri(), StaticCredentialResolver::new("tok"));
        let mut user = User::new("alice");
        user.preferences.capabilities = [Capability::Calendar].into_iter().collect();

        let material = generator.gather(&ctx, &user).await;
        match material.calendar {
            Section::Available { data } => assert_eq!(data["count"], 1),
            other => panic!("expected calendar data, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn generate_is_a_single_toolless_call() {
        let provider = Arc::new(SequentialMockProvider::single_text("  Good morning, Alice.  "));
        let generator = BriefingGenerator::new(provider.clone(), "mock-model");
        let mut user = User::new("alice");
        user.name = Some("Alice".into());
        user.preferences.interests = vec!["sailing".into()];
        let material = BriefingMaterial {
            calendar: Section::Available { data: json!({"count": 0, "events": []}) },
            inbox: Section::Unavailable { reason: "not connected".into() },
            pull_requests: Section::Disabled,
        };

        let briefing = generator.generate(&user, &material).await.unwrap();
        assert_eq!(briefing.script, "Good morning, Alice.");

        let requests = provider.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].tools.is_empty());
        assert_eq!(requests[0].messages[0].role, Role::System);
        assert!(requests[0].messages[1].content.contains("sailing"));
        assert!(requests[0].messages[1].content.contains("\"status\": \"unavailable\""));
    }
}
