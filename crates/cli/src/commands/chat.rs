//! `concierge chat`: Single-message or interactive chat as one user.

use concierge_agent::AgentStreamEvent;
use concierge_core::channel::ChannelKind;
use concierge_core::user::User;
use concierge_gateway::Runtime;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;

pub async fn run(
    config_path: Option<&Path>,
    user_id: &str,
    message: Option<String>,
    whatsapp: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = super::build_runtime(config_path).await?;
    let user = super::local_user(&runtime, user_id).await?;

    if let Some(msg) = message {
        send(&runtime, &user, msg, whatsapp).await?;
        return Ok(());
    }

    println!();
    println!("  Concierge: Interactive Mode");
    println!();
    println!("  User:      {}", user.display_name());
    println!("  Provider:  {}", runtime.config.default_provider);
    println!("  Model:     {}", runtime.config.default_model);
    println!("  Channel:   {}", if whatsapp { "whatsapp" } else { "web" });
    println!();
    println!("  Type your message and press Enter.");
    println!("  Type 'exit' or Ctrl+C to quit.");
    println!();

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else { break };
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }
        if let Err(e) = send(&runtime, &user, line, whatsapp).await {
            eprintln!("  [Error] {e}");
        }
        println!();
    }

    println!();
    println!("  Goodbye!");
    Ok(())
}

async fn send(runtime: &Runtime, user: &User, text: String, whatsapp: bool) -> Result<(), Box<dyn std::error::Error>> {
    if whatsapp {
        let outcome = runtime.agent.run(user, ChannelKind::WhatsApp, &text).await?;
        println!("{}", outcome.reply);
        // Let memory ingestion land before the process can exit.
        let _ = outcome.ingestion.await;
        return Ok(());
    }

    let mut rx = Arc::clone(&runtime.agent).run_stream(user.clone(), text);
    print!("  Assistant > ");
    std::io::stdout().flush()?;
    while let Some(event) = rx.recv().await {
        match event {
            AgentStreamEvent::Chunk { content } => {
                print!("{content}");
                std::io::stdout().flush()?;
            }
            AgentStreamEvent::ToolCall { name, .. } => eprintln!("\n  [tool] {name}"),
            AgentStreamEvent::ToolResult { name, success, .. } => {
                if !success {
                    eprintln!("  [tool] {name} reported a problem");
                }
            }
            AgentStreamEvent::Done { .. } => println!(),
            AgentStreamEvent::Error { message } => return Err(message.into()),
        }
    }
    Ok(())
}
