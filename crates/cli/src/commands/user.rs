//! `concierge user`: Inspect and edit users.

use clap::Subcommand;
use concierge_core::user::{Capability, User};
use std::path::Path;

#[derive(Subcommand)]
pub enum UserAction {
    /// Print a user's profile and preferences
    Show { id: String },

    /// Create or update a user
    Set {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
        /// E.164 phone number, e.g. +15551234567
        #[arg(long)]
        phone: Option<String>,
        /// Mark the phone number as verified
        #[arg(long)]
        verified: bool,
        /// IANA timezone, e.g. Europe/Berlin
        #[arg(long)]
        timezone: Option<String>,
    },

    /// Enable capabilities (calendar, email, documents, github, linkedin, memory, briefing)
    Enable {
        id: String,
        #[arg(required = true)]
        capabilities: Vec<String>,
    },

    /// Disable capabilities
    Disable {
        id: String,
        #[arg(required = true)]
        capabilities: Vec<String>,
    },

    /// Replace the user's interests
    Interests { id: String, interests: Vec<String> },
}

pub async fn run(config_path: Option<&Path>, action: UserAction) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config_path)?;
    let stores = concierge_store::open(&config.database).await?;
    let users = stores.users;

    match action {
        UserAction::Show { id } => {
            let user = users.get_user(&id).await?.ok_or_else(|| format!("no user '{id}'"))?;
            println!("{}", serde_json::to_string_pretty(&user)?);
        }
        UserAction::Set {
            id,
            name,
            email,
            phone,
            verified,
            timezone,
        } => {
            let mut user = users.get_user(&id).await?.unwrap_or_else(|| User::new(&id));
            if name.is_some() {
                user.name = name;
            }
            if email.is_some() {
                user.email = email;
            }
            if let Some(phone) = phone {
                if !is_e164(&phone) {
                    return Err(format!("'{phone}' is not an E.164 number like +15551234567").into());
                }
                if user.phone_number.as_deref() != Some(phone.as_str()) {
                    user.phone_verified = false;
                }
                user.phone_number = Some(phone);
            }
            if verified {
                user.phone_verified = user.phone_number.is_some();
            }
            if timezone.is_some() {
                user.timezone = timezone;
            }
            users.upsert_user(&user).await?;
            println!("Saved user {}", user.id);
        }
        UserAction::Enable { id, capabilities } => {
            let mut user = users.get_user(&id).await?.ok_or_else(|| format!("no user '{id}'"))?;
            for capability in parse_capabilities(&capabilities)? {
                user.preferences.capabilities.insert(capability);
                if capability == Capability::Briefing {
                    user.preferences.communication.briefing_enabled = true;
                }
            }
            users.upsert_user(&user).await?;
            print_capabilities(&user);
        }
        UserAction::Disable { id, capabilities } => {
            let mut user = users.get_user(&id).await?.ok_or_else(|| format!("no user '{id}'"))?;
            for capability in parse_capabilities(&capabilities)? {
                user.preferences.capabilities.remove(&capability);
                if capability == Capability::Briefing {
                    user.preferences.communication.briefing_enabled = false;
                }
            }
            users.upsert_user(&user).await?;
            print_capabilities(&user);
        }
        UserAction::Interests { id, interests } => {
            let mut user = users.get_user(&id).await?.ok_or_else(|| format!("no user '{id}'"))?;
            user.preferences.interests = interests;
            users.upsert_user(&user).await?;
            println!("Interests: {}", user.preferences.interests.join(", "));
        }
    }
    Ok(())
}

fn parse_capabilities(keys: &[String]) -> Result<Vec<Capability>, String> {
    keys.iter()
        .map(|key| {
            Capability::parse(&key.to_lowercase()).ok_or_else(|| {
                let known: Vec<&str> = Capability::ALL.iter().map(|c| c.as_str()).collect();
                format!("unknown capability '{key}' (known: {})", known.join(", "))
            })
        })
        .collect()
}

fn print_capabilities(user: &User) {
    let enabled: Vec<&str> = user.preferences.capabilities.iter().map(|c| c.as_str()).collect();
    println!("Enabled: {}", enabled.join(", "));
}

fn is_e164(phone: &str) -> bool {
    phone
        .strip_prefix('+')
        .is_some_and(|digits| (8..=15).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit()))
}
