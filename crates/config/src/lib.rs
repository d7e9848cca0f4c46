//! Configuration loading, validation, and management for Concierge.
//!
//! Loads configuration from `~/.concierge/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use concierge_core::ProviderKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.concierge/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the default provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default LLM provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub whatsapp: WhatsAppConfig,

    /// OAuth client registrations, keyed by provider
    #[serde(default)]
    pub oauth: OAuthConfig,

    /// Upstream API base URLs
    #[serde(default)]
    pub endpoints: EndpointsConfig,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_model() -> String {
    "gpt-4o".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("providers", &self.providers)
            .field("agent", &self.agent)
            .field("memory", &self.memory)
            .field("database", &self.database)
            .field("gateway", &self.gateway)
            .field("whatsapp", &self.whatsapp)
            .field("oauth", &self.oauth)
            .field("endpoints", &self.endpoints)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

/// Agent loop limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Model steps allowed per turn before giving up
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Checkpointed messages sent to the model per turn
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Memories retrieved to augment each turn
    #[serde(default = "default_recall_limit")]
    pub recall_limit: usize,
}

fn default_max_iterations() -> usize {
    10
}
fn default_history_window() -> usize {
    40
}
fn default_recall_limit() -> usize {
    5
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            history_window: default_history_window(),
            recall_limit: default_recall_limit(),
        }
    }
}

/// Which memory backend to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryBackendKind {
    /// Process-local index (development)
    #[default]
    InMemory,
    /// Networked vector store
    Remote,
    /// Memory disabled
    None,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default)]
    pub backend: MemoryBackendKind,

    /// Base URL of the networked store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Total attempts per call, first try included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_memory_timeout")]
    pub request_timeout_secs: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    250
}
fn default_max_delay_ms() -> u64 {
    2_000
}
fn default_memory_timeout() -> u64 {
    10
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: MemoryBackendKind::default(),
            url: None,
            api_key: None,
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            request_timeout_secs: default_memory_timeout(),
        }
    }
}

impl std::fmt::Debug for MemoryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConfig")
            .field("backend", &self.backend)
            .field("url", &self.url)
            .field("api_key", &redact(&self.api_key))
            .field("max_attempts", &self.max_attempts)
            .field("base_delay_ms", &self.base_delay_ms)
            .field("max_delay_ms", &self.max_delay_ms)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// sqlx connection URL; `sqlite::memory:` for an ephemeral store
    #[serde(default = "default_database_url")]
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_url() -> String {
    format!(
        "sqlite://{}?mode=rwc",
        AppConfig::config_dir().join("concierge.db").display()
    )
}
fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Service tokens accepted as `Authorization: Bearer`. Empty = open.
    #[serde(default)]
    pub api_tokens: Vec<String>,

    /// CORS origins allowed to call the chat API. Empty = none.
    #[serde(default)]
    pub allowed_origins: Vec<String>,

    /// Requests per client per minute. 0 = unlimited.
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: u32,
}

fn default_port() -> u16 {
    8787
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_rate_limit() -> u32 {
    60
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            api_tokens: Vec::new(),
            allowed_origins: Vec::new(),
            rate_limit_per_minute: default_rate_limit(),
        }
    }
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("port", &self.port)
            .field("host", &self.host)
            .field("api_tokens", &format!("[{} REDACTED]", self.api_tokens.len()))
            .field("allowed_origins", &self.allowed_origins)
            .field("rate_limit_per_minute", &self.rate_limit_per_minute)
            .finish()
    }
}

/// WhatsApp Cloud API settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number_id: Option<String>,

    /// Echoed back during webhook verification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify_token: Option<String>,

    /// Signs webhook deliveries (`X-Hub-Signature-256`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_secret: Option<String>,

    #[serde(default = "default_whatsapp_api_base")]
    pub api_base: String,

    /// Budget for one background turn; must stay under the platform's
    /// five-minute request timeout.
    #[serde(default = "default_turn_timeout")]
    pub turn_timeout_secs: u64,
}

fn default_whatsapp_api_base() -> String {
    "https://graph.facebook.com/v21.0".into()
}
fn default_turn_timeout() -> u64 {
    240
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            access_token: None,
            phone_number_id: None,
            verify_token: None,
            app_secret: None,
            api_base: default_whatsapp_api_base(),
            turn_timeout_secs: default_turn_timeout(),
        }
    }
}

impl WhatsAppConfig {
    /// Whether outbound messages can be sent.
    pub fn is_configured(&self) -> bool {
        self.access_token.is_some() && self.phone_number_id.is_some()
    }
}

impl std::fmt::Debug for WhatsAppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhatsAppConfig")
            .field("access_token", &redact(&self.access_token))
            .field("phone_number_id", &self.phone_number_id)
            .field("verify_token", &redact(&self.verify_token))
            .field("app_secret", &redact(&self.app_secret))
            .field("api_base", &self.api_base)
            .field("turn_timeout_secs", &self.turn_timeout_secs)
            .finish()
    }
}

/// One OAuth client registration.
#[derive(Clone, Serialize, Deserialize)]
pub struct OAuthClientConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    pub token_url: String,
}

impl OAuthClientConfig {
    fn with_token_url(url: &str) -> Self {
        Self {
            client_id: None,
            client_secret: None,
            token_url: url.into(),
        }
    }
}

impl std::fmt::Debug for OAuthClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthClientConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &redact(&self.client_secret))
            .field("token_url", &self.token_url)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    #[serde(default = "default_google_oauth")]
    pub google: OAuthClientConfig,

    #[serde(default = "default_github_oauth")]
    pub github: OAuthClientConfig,

    #[serde(default = "default_linkedin_oauth")]
    pub linkedin: OAuthClientConfig,
}

fn default_google_oauth() -> OAuthClientConfig {
    OAuthClientConfig::with_token_url("https://oauth2.googleapis.com/token")
}
fn default_github_oauth() -> OAuthClientConfig {
    OAuthClientConfig::with_token_url("https://github.com/login/oauth/access_token")
}
fn default_linkedin_oauth() -> OAuthClientConfig {
    OAuthClientConfig::with_token_url("https://www.linkedin.com/oauth/v2/accessToken")
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            google: default_google_oauth(),
            github: default_github_oauth(),
            linkedin: default_linkedin_oauth(),
        }
    }
}

impl OAuthConfig {
    pub fn client(&self, provider: ProviderKind) -> &OAuthClientConfig {
        match provider {
            ProviderKind::Google => &self.google,
            ProviderKind::Github => &self.github,
            ProviderKind::Linkedin => &self.linkedin,
        }
    }

    fn client_mut(&mut self, provider: ProviderKind) -> &mut OAuthClientConfig {
        match provider {
            ProviderKind::Google => &mut self.google,
            ProviderKind::Github => &mut self.github,
            ProviderKind::Linkedin => &mut self.linkedin,
        }
    }
}

/// Base URLs of the upstream APIs the tools call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointsConfig {
    #[serde(default = "default_calendar_base")]
    pub google_calendar: String,

    #[serde(default = "default_gmail_base")]
    pub gmail: String,

    #[serde(default = "default_drive_base")]
    pub google_drive: String,

    #[serde(default = "default_docs_base")]
    pub google_docs: String,

    #[serde(default = "default_github_base")]
    pub github: String,

    #[serde(default = "default_linkedin_base")]
    pub linkedin: String,
}

fn default_calendar_base() -> String {
    "https://www.googleapis.com/calendar/v3".into()
}
fn default_gmail_base() -> String {
    "https://gmail.googleapis.com/gmail/v1".into()
}
fn default_drive_base() -> String {
    "https://www.googleapis.com/drive/v3".into()
}
fn default_docs_base() -> String {
    "https://docs.googleapis.com/v1".into()
}
fn default_github_base() -> String {
    "https://api.github.com".into()
}
fn default_linkedin_base() -> String {
    "https://api.linkedin.com/v2".into()
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            google_calendar: default_calendar_base(),
            gmail: default_gmail_base(),
            google_drive: default_drive_base(),
            google_docs: default_docs_base(),
            github: default_github_base(),
            linkedin: default_linkedin_base(),
        }
    }
}

impl EndpointsConfig {
    /// Point every upstream at one base URL (mock servers, proxies).
    pub fn all_at(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            google_calendar: format!("{base}/calendar/v3"),
            gmail: format!("{base}/gmail/v1"),
            google_drive: format!("{base}/drive/v3"),
            google_docs: format!("{base}/docs/v1"),
            github: format!("{base}/github"),
            linkedin: format!("{base}/linkedin/v2"),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.concierge/config.toml),
    /// then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "No config file found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`.
    ///
    /// API keys only fill gaps; everything else replaces the file value.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.api_key.is_none() {
            self.api_key = lookup("CONCIERGE_API_KEY")
                .or_else(|| lookup("OPENAI_API_KEY"))
                .or_else(|| lookup("OPENROUTER_API_KEY"));
        }
        if let Some(provider) = lookup("CONCIERGE_PROVIDER") {
            self.default_provider = provider;
        }
        if let Some(model) = lookup("CONCIERGE_MODEL") {
            self.default_model = model;
        }
        if let Some(url) = lookup("CONCIERGE_DATABASE_URL") {
            self.database.url = url;
        }

        if let Some(key) = lookup("MEMORY_API_KEY") {
            self.memory.api_key = Some(key);
        }
        if let Some(url) = lookup("MEMORY_URL") {
            self.memory.url = Some(url);
            if self.memory.backend == MemoryBackendKind::InMemory {
                self.memory.backend = MemoryBackendKind::Remote;
            }
        }

        let wa = &mut self.whatsapp;
        for (var, slot) in [
            ("WHATSAPP_ACCESS_TOKEN", &mut wa.access_token),
            ("WHATSAPP_PHONE_NUMBER_ID", &mut wa.phone_number_id),
            ("WHATSAPP_VERIFY_TOKEN", &mut wa.verify_token),
            ("WHATSAPP_APP_SECRET", &mut wa.app_secret),
        ] {
            if let Some(value) = lookup(var) {
                *slot = Some(value);
            }
        }

        for provider in ProviderKind::ALL {
            let prefix = provider.code_prefix();
            let client = self.oauth.client_mut(provider);
            if let Some(id) = lookup(&format!("{prefix}_CLIENT_ID")) {
                client.client_id = Some(id);
            }
            if let Some(secret) = lookup(&format!("{prefix}_CLIENT_SECRET")) {
                client.client_secret = Some(secret);
            }
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".concierge")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.default_temperature) {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be at least 1".into(),
            ));
        }

        if self.memory.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "memory.max_attempts must be at least 1".into(),
            ));
        }

        if self.memory.backend == MemoryBackendKind::Remote && self.memory.url.is_none() {
            return Err(ConfigError::ValidationError(
                "memory.url is required when memory.backend = \"remote\"".into(),
            ));
        }

        if self.whatsapp.turn_timeout_secs == 0 || self.whatsapp.turn_timeout_secs >= 300 {
            return Err(ConfigError::ValidationError(
                "whatsapp.turn_timeout_secs must be between 1 and 299".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            providers: HashMap::new(),
            agent: AgentConfig::default(),
            memory: MemoryConfig::default(),
            database: DatabaseConfig::default(),
            gateway: GatewayConfig::default(),
            whatsapp: WhatsAppConfig::default(),
            oauth: OAuthConfig::default(),
            endpoints: EndpointsConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.agent.max_iterations, 10);
        assert_eq!(config.memory.max_attempts, 3);
        assert_eq!(config.memory.backend, MemoryBackendKind::InMemory);
        assert_eq!(config.whatsapp.turn_timeout_secs, 240);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.default_provider, config.default_provider);
        assert_eq!(parsed.gateway.port, config.gateway.port);
        assert_eq!(parsed.oauth.google.token_url, config.oauth.google.token_url);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = AppConfig {
            default_temperature: 5.0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn remote_memory_requires_url() {
        let mut config = AppConfig::default();
        config.memory.backend = MemoryBackendKind::Remote;
        assert!(config.validate().is_err());
        config.memory.url = Some("http://localhost:8888".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn turn_timeout_must_stay_under_platform_limit() {
        let mut config = AppConfig::default();
        config.whatsapp.turn_timeout_secs = 300;
        assert!(config.validate().is_err());
        config.whatsapp.turn_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_memory_attempts_rejected() {
        let mut config = AppConfig::default();
        config.memory.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.default_provider, "openai");
    }

    #[test]
    fn load_from_file_with_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
default_model = "gpt-4o-mini"

[agent]
max_iterations = 6

[memory]
backend = "remote"
url = "http://memory.internal"
max_attempts = 2

[gateway]
api_tokens = ["svc-token"]
allowed_origins = ["https://app.example.com"]

[whatsapp]
phone_number_id = "1234"
turn_timeout_secs = 120

[oauth.github]
client_id = "gh-client"
token_url = "https://github.example/token"
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.default_model, "gpt-4o-mini");
        assert_eq!(config.agent.max_iterations, 6);
        assert_eq!(config.agent.history_window, 40);
        assert_eq!(config.memory.backend, MemoryBackendKind::Remote);
        assert_eq!(config.memory.max_attempts, 2);
        assert_eq!(config.gateway.api_tokens, vec!["svc-token"]);
        assert_eq!(config.whatsapp.turn_timeout_secs, 120);
        assert_eq!(config.oauth.github.client_id.as_deref(), Some("gh-client"));
        assert_eq!(config.oauth.github.token_url, "https://github.example/token");
        assert_eq!(config.oauth.google.token_url, "https://oauth2.googleapis.com/token");
    }

    #[test]
    fn invalid_file_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "default_model = [").unwrap();
        assert!(matches!(
            AppConfig::load_from(file.path()),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = AppConfig::default();
        config.apply_env_overrides(env(&[
            ("OPENAI_API_KEY", "sk-openai"),
            ("CONCIERGE_MODEL", "gpt-4.1"),
            ("MEMORY_URL", "https://api.mem0.ai"),
            ("MEMORY_API_KEY", "m0-key"),
            ("WHATSAPP_ACCESS_TOKEN", "EAAB"),
            ("GITHUB_CLIENT_SECRET", "gh-secret"),
        ]));
        assert_eq!(config.api_key.as_deref(), Some("sk-openai"));
        assert_eq!(config.default_model, "gpt-4.1");
        assert_eq!(config.memory.backend, MemoryBackendKind::Remote);
        assert_eq!(config.memory.url.as_deref(), Some("https://api.mem0.ai"));
        assert_eq!(config.whatsapp.access_token.as_deref(), Some("EAAB"));
        assert_eq!(
            config.oauth.client(ProviderKind::Github).client_secret.as_deref(),
            Some("gh-secret")
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn concierge_key_takes_priority() {
        let mut config = AppConfig::default();
        config.apply_env_overrides(env(&[
            ("CONCIERGE_API_KEY", "primary"),
            ("OPENAI_API_KEY", "secondary"),
        ]));
        assert_eq!(config.api_key.as_deref(), Some("primary"));
    }

    #[test]
    fn memory_url_does_not_reenable_disabled_memory() {
        let mut config = AppConfig::default();
        config.memory.backend = MemoryBackendKind::None;
        config.apply_env_overrides(env(&[("MEMORY_URL", "https://api.mem0.ai")]));
        assert_eq!(config.memory.backend, MemoryBackendKind::None);
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let mut config = AppConfig::default();
        config.api_key = Some("sk-live-123".into());
        config.whatsapp.app_secret = Some("wa-secret".into());
        config.memory.api_key = Some("m0-secret".into());
        config.gateway.api_tokens = vec!["svc-token".into()];
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("sk-live-123"));
        assert!(!rendered.contains("wa-secret"));
        assert!(!rendered.contains("m0-secret"));
        assert!(!rendered.contains("svc-token"));
    }

    #[test]
    fn endpoints_all_at_mock_base() {
        let endpoints = EndpointsConfig::all_at("http://127.0.0.1:9999/");
        assert_eq!(endpoints.google_calendar, "http://127.0.0.1:9999/calendar/v3");
        assert_eq!(endpoints.github, "http://127.0.0.1:9999/github");
    }
}
