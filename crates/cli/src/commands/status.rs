//! `concierge status`: Show configuration status.

use concierge_config::AppConfig;
use concierge_core::credential::ProviderKind;
use std::path::Path;

pub async fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config_path)?;
    let yes_no = |b: bool| if b { "configured" } else { "not configured" };

    println!("Concierge Status");
    println!("================");
    println!("  Config dir:   {}", AppConfig::config_dir().display());
    println!("  Provider:     {}", config.default_provider);
    println!("  Model:        {}", config.default_model);
    println!("  API key:      {}", yes_no(config.has_api_key()));
    println!("  Temperature:  {}", config.default_temperature);
    println!(
        "  Agent:        {} iterations, {} message window, {} memories recalled",
        config.agent.max_iterations, config.agent.history_window, config.agent.recall_limit
    );
    println!("  Memory:       {:?}", config.memory.backend);
    println!("  Database:     {}", config.database.url);
    println!("  Gateway:      {}:{}", config.gateway.host, config.gateway.port);
    println!("  API tokens:   {}", config.gateway.api_tokens.len());
    println!("  WhatsApp:     {}", yes_no(config.whatsapp.is_configured()));
    for provider in ProviderKind::ALL {
        let client = config.oauth.client(provider);
        println!(
            "  {:<13} {}",
            format!("{}:", provider.display_name()),
            yes_no(client.client_id.is_some() && client.client_secret.is_some())
        );
    }

    let config_file = match config_path {
        Some(path) => path.to_path_buf(),
        None => AppConfig::config_dir().join("config.toml"),
    };
    if config_file.exists() {
        println!("\n  Config file found: {}", config_file.display());
    } else {
        println!("\n  No config file at {}. A starting point:\n", config_file.display());
        println!("{}", AppConfig::default_toml());
    }

    Ok(())
}
