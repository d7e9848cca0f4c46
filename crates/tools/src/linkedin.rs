//! LinkedIn: the member's basic profile via the OpenID `userinfo` endpoint.

use async_trait::async_trait;
use concierge_core::credential::ProviderKind;
use concierge_core::error::ToolError;
use concierge_core::tool::{Tool, ToolResult};
use serde::Deserialize;
use serde_json::json;

use crate::context::{ToolContext, endpoint, read_json, send, with_defaults};
use crate::envelope::{Attempt, ToolEnvelope, settle};

const PROVIDER: ProviderKind = ProviderKind::Linkedin;

#[derive(Deserialize)]
struct LinkedinErrorBody {
    message: Option<String>,
    error_description: Option<String>,
}

fn parse_linkedin_error(body: &str) -> Option<String> {
    let parsed: LinkedinErrorBody = serde_json::from_str(body).ok()?;
    parsed.message.or(parsed.error_description)
}

#[derive(Deserialize)]
struct UserInfo {
    sub: Option<String>,
    name: Option<String>,
    given_name: Option<String>,
    family_name: Option<String>,
    email: Option<String>,
    picture: Option<String>,
    locale: Option<serde_json::Value>,
}

pub async fn get_profile(ctx: &ToolContext) -> Result<ToolEnvelope, ToolError> {
    settle(try_get_profile(ctx).await)
}

async fn try_get_profile(ctx: &ToolContext) -> Attempt<serde_json::Value> {
    let token = ctx.token(PROVIDER, "get_linkedin_profile").await?;
    let url = endpoint(&ctx.endpoints.linkedin, &["userinfo"])?;
    let response = send(with_defaults(ctx.http.get(url), &token), parse_linkedin_error)
        .await
        .map_err(|e| e.into_failure(PROVIDER))?;
    let info: UserInfo = read_json(PROVIDER, response).await?;

    let name = info.name.or_else(|| {
        let joined = [info.given_name.as_deref(), info.family_name.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        (!joined.is_empty()).then_some(joined)
    });
    Ok(json!({
        "id": info.sub,
        "name": name,
        "email": info.email,
        "picture": info.picture,
        "locale": info.locale,
    }))
}

pub struct GetLinkedinProfileTool {
    ctx: ToolContext,
}

impl GetLinkedinProfileTool {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for GetLinkedinProfileTool {
    fn name(&self) -> &str {
        "get_linkedin_profile"
    }

    fn description(&self) -> &str {
        "Get the user's LinkedIn profile basics: name, email and picture."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        Ok(get_profile(&self.ctx).await?.into_tool_result())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::context_at;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn reads_userinfo() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/linkedin/v2/userinfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sub": "abc123",
                "given_name": "Ada",
                "family_name": "Lovelace",
                "email": "ada@example.com",
                "locale": {"country": "GB", "language": "en"}
            })))
            .mount(&server)
            .await;

        let env = get_profile(&context_at(&server.uri())).await.unwrap();
        let data = env.data.unwrap();
        assert_eq!(data["name"], "Ada Lovelace");
        assert_eq!(data["email"], "ada@example.com");
    }

    #[tokio::test]
    async fn server_error_is_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_json(json!({"message": "Service unavailable"})))
            .mount(&server)
            .await;

        let env = get_profile(&context_at(&server.uri())).await.unwrap();
        assert_eq!(env.code_str().as_deref(), Some("LINKEDIN_API_ERROR"));
    }
}
