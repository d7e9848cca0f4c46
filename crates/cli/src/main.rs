//! Concierge CLI: the main entry point.
//!
//! Commands:
//! - `gateway`  : Start the HTTP server (web chat + WhatsApp webhook)
//! - `chat`     : Talk to the agent as a user, single-message or interactive
//! - `briefing` : Generate a user's morning briefing script
//! - `user`     : Inspect and edit users
//! - `status`   : Show configuration status

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "concierge",
    about = "Concierge: a personal executive assistant over WhatsApp and the web",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Config file to use instead of ~/.concierge/config.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway server
    Gateway {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Chat with the agent
    Chat {
        /// The user to act as
        #[arg(short, long, default_value = "local")]
        user: String,

        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Answer as on WhatsApp (structured JSON replies)
        #[arg(long)]
        whatsapp: bool,
    },

    /// Generate the morning briefing script for a user
    Briefing {
        #[arg(short, long, default_value = "local")]
        user: String,

        /// Print the gathered material instead of the script
        #[arg(long)]
        material: bool,
    },

    /// Manage users
    User {
        #[command(subcommand)]
        action: commands::user::UserAction,
    },

    /// Show configuration status
    Status,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Gateway { port } => commands::gateway::run(config_path, port).await?,
        Commands::Chat {
            user,
            message,
            whatsapp,
        } => commands::chat::run(config_path, &user, message, whatsapp).await?,
        Commands::Briefing { user, material } => commands::briefing::run(config_path, &user, material).await?,
        Commands::User { action } => commands::user::run(config_path, action).await?,
        Commands::Status => commands::status::run(config_path).await?,
    }

    Ok(())
}
