//! `concierge gateway`: Start the HTTP server.

use std::path::Path;

pub async fn run(config_path: Option<&Path>, port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut runtime = super::build_runtime(config_path).await?;
    if let Some(port) = port_override {
        runtime.config.gateway.port = port;
    }

    let config = &runtime.config;
    println!("Concierge Gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Chat API:  /v1/chat, /v1/chat/stream");
    println!(
        "   WhatsApp:  {}",
        if runtime.whatsapp.is_some() { "/webhooks/whatsapp" } else { "not configured" }
    );

    concierge_gateway::start(runtime).await?;

    Ok(())
}
