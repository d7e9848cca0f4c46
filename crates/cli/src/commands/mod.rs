pub mod briefing;
pub mod chat;
pub mod gateway;
pub mod status;
pub mod user;

use concierge_config::AppConfig;
use concierge_core::user::User;
use concierge_gateway::Runtime;
use std::path::Path;

/// Load configuration from `path`, or from the default location.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => {
            let mut config = AppConfig::load_from(path)?;
            config.apply_env_overrides(|key| std::env::var(key).ok());
            config.validate()?;
            config
        }
        None => AppConfig::load()?,
    };
    Ok(config)
}

pub async fn build_runtime(path: Option<&Path>) -> Result<Runtime, Box<dyn std::error::Error>> {
    let config = load_config(path)?;
    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    CONCIERGE_API_KEY, OPENAI_API_KEY or OPENROUTER_API_KEY");
        eprintln!();
        eprintln!("  Or add `api_key` to {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }
    Ok(Runtime::build(config).await?)
}

/// Fetch `user_id`, creating a default profile the first time.
pub async fn local_user(runtime: &Runtime, user_id: &str) -> Result<User, Box<dyn std::error::Error>> {
    if let Some(user) = runtime.stores.users.get_user(user_id).await? {
        return Ok(user);
    }
    let user = User::new(user_id);
    runtime.stores.users.upsert_user(&user).await?;
    tracing::info!(user_id, "Created local user");
    Ok(user)
}
