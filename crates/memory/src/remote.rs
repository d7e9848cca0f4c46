//! Networked vector-store backend (mem0-compatible REST API).
//!
//! Transport failures are classified for the retry wrapper: a refused
//! connection or DNS failure is `Unreachable`, timeouts and 5xx/429 are
//! `Transient`, 404 is `NotFound`, and other 4xx are `InvalidRequest`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use concierge_core::error::MemoryError;
use concierge_core::memory::{MemoryBackend, MemoryQuery, MemoryRecord};
use concierge_core::message::{Message, Role};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

pub struct RemoteMemoryBackend {
    http: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
}

impl RemoteMemoryBackend {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self, MemoryError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| MemoryError::InvalidRequest(format!("bad memory url '{base_url}': {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MemoryError::Unreachable(e.to_string()))?;
        Ok(Self { http, base_url, api_key })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, MemoryError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| MemoryError::InvalidRequest("memory url cannot be a base".into()))?;
            path.pop_if_empty();
            for segment in segments {
                path.push(segment);
            }
            // mem0 routes end in a slash
            path.push("");
        }
        Ok(url)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("Authorization", format!("Token {key}")),
            None => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder, what: &str) -> Result<reqwest::Response, MemoryError> {
        let response = self.authorize(builder).send().await.map_err(classify_transport)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        debug!(status = status.as_u16(), what, "Memory store returned error");
        Err(classify_status(status.as_u16(), what, &body))
    }
}

/// Map a reqwest transport error to a memory error.
fn classify_transport(err: reqwest::Error) -> MemoryError {
    if err.is_timeout() {
        MemoryError::Transient(format!("timed out: {err}"))
    } else if err.is_connect() {
        MemoryError::Unreachable(err.to_string())
    } else if err.is_decode() {
        MemoryError::Storage(err.to_string())
    } else {
        MemoryError::Transient(err.to_string())
    }
}

fn classify_status(status: u16, what: &str, body: &str) -> MemoryError {
    let detail = format!("{what}: HTTP {status} {}", body.chars().take(200).collect::<String>());
    match status {
        404 => MemoryError::NotFound(what.to_string()),
        408 | 429 | 500..=599 => MemoryError::Transient(detail),
        _ => MemoryError::InvalidRequest(detail),
    }
}

/// A memory as the API returns it.
#[derive(Debug, Deserialize)]
struct ApiMemory {
    id: String,
    #[serde(alias = "content", alias = "text")]
    memory: String,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    metadata: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    score: Option<f32>,
}

impl ApiMemory {
    fn into_record(self, fallback_user: &str) -> MemoryRecord {
        let created_at = self
            .created_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        MemoryRecord {
            id: self.id,
            user_id: self.user_id.unwrap_or_else(|| fallback_user.to_string()),
            content: self.memory,
            metadata: self.metadata.unwrap_or_default(),
            created_at,
            score: self.score.unwrap_or(0.0),
        }
    }
}

/// List endpoints answer either a bare array or `{"results": [...]}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ApiList<T> {
    Bare(Vec<T>),
    Wrapped { results: Vec<T> },
}

impl<T> ApiList<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            ApiList::Bare(v) => v,
            ApiList::Wrapped { results } => results,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiAddEvent {
    id: String,
}

async fn decode<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T, MemoryError> {
    response
        .json::<T>()
        .await
        .map_err(|e| MemoryError::Storage(format!("unexpected memory response: {e}")))
}

#[async_trait]
impl MemoryBackend for RemoteMemoryBackend {
    fn name(&self) -> &str {
        "remote"
    }

    async fn search(&self, query: MemoryQuery) -> Result<Vec<MemoryRecord>, MemoryError> {
        let url = self.endpoint(&["v1", "memories", "search"])?;
        let mut body = serde_json::json!({
            "query": query.text,
            "user_id": query.user_id,
            "limit": query.limit,
        });
        if !query.filters.is_empty() {
            body["filters"] = serde_json::Value::Object(query.filters.clone());
        }

        let response = self.send(self.http.post(url).json(&body), "search").await?;
        let list: ApiList<ApiMemory> = decode(response).await?;
        Ok(list
            .into_vec()
            .into_iter()
            .map(|m| m.into_record(&query.user_id))
            .collect())
    }

    async fn add(
        &self,
        messages: &[Message],
        user_id: &str,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Result<Vec<String>, MemoryError> {
        let turns: Vec<serde_json::Value> = messages
            .iter()
            .filter(|m| matches!(m.role, Role::User | Role::Assistant) && !m.content.trim().is_empty())
            .map(|m| serde_json::json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();
        if turns.is_empty() {
            return Ok(Vec::new());
        }

        let url = self.endpoint(&["v1", "memories"])?;
        let body = serde_json::json!({
            "messages": turns,
            "user_id": user_id,
            "metadata": metadata,
        });
        let response = self.send(self.http.post(url).json(&body), "add").await?;
        let list: ApiList<ApiAddEvent> = decode(response).await?;
        Ok(list.into_vec().into_iter().map(|e| e.id).collect())
    }

    async fn get_all(&self, user_id: &str, limit: usize) -> Result<Vec<MemoryRecord>, MemoryError> {
        let mut url = self.endpoint(&["v1", "memories"])?;
        url.query_pairs_mut()
            .append_pair("user_id", user_id)
            .append_pair("page_size", &limit.to_string());

        let response = self.send(self.http.get(url), "get_all").await?;
        let list: ApiList<ApiMemory> = decode(response).await?;
        let mut records: Vec<MemoryRecord> = list
            .into_vec()
            .into_iter()
            .map(|m| m.into_record(user_id))
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit);
        Ok(records)
    }

    async fn update(&self, memory_id: &str, content: &str) -> Result<(), MemoryError> {
        let url = self.endpoint(&["v1", "memories", memory_id])?;
        let body = serde_json::json!({ "text": content });
        self.send(self.http.put(url).json(&body), "update").await?;
        Ok(())
    }

    async fn delete(&self, memory_id: &str) -> Result<(), MemoryError> {
        let url = self.endpoint(&["v1", "memories", memory_id])?;
        self.send(self.http.delete(url), "delete").await?;
        Ok(())
    }
}
