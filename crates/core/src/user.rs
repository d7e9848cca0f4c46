//! Users and their preferences.
//!
//! Preferences are persisted as JSON. Loading is tolerant: each known
//! top-level key present in the stored document replaces the default for
//! that key, and a key that fails to parse keeps its default.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

use crate::channel::ChannelKind;
use crate::error::StoreError;

/// A capability the user can switch on or off in settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Calendar,
    Email,
    Documents,
    Github,
    Linkedin,
    Memory,
    Briefing,
}

impl Capability {
    pub const ALL: [Capability; 7] = [
        Capability::Calendar,
        Capability::Email,
        Capability::Documents,
        Capability::Github,
        Capability::Linkedin,
        Capability::Memory,
        Capability::Briefing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Calendar => "calendar",
            Capability::Email => "email",
            Capability::Documents => "documents",
            Capability::Github => "github",
            Capability::Linkedin => "linkedin",
            Capability::Memory => "memory",
            Capability::Briefing => "briefing",
        }
    }

    pub fn parse(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == key)
    }
}

/// How and when the assistant reaches out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommunicationSettings {
    #[serde(default = "default_preferred_channel")]
    pub preferred_channel: ChannelKind,

    #[serde(default)]
    pub briefing_enabled: bool,

    /// Local time of day, "HH:MM"
    #[serde(default = "default_briefing_time")]
    pub briefing_time: String,

    #[serde(default = "default_tone")]
    pub tone: String,
}

fn default_preferred_channel() -> ChannelKind {
    ChannelKind::WhatsApp
}

fn default_briefing_time() -> String {
    "07:30".into()
}

fn default_tone() -> String {
    "concise".into()
}

impl Default for CommunicationSettings {
    fn default() -> Self {
        Self {
            preferred_channel: default_preferred_channel(),
            briefing_enabled: false,
            briefing_time: default_briefing_time(),
            tone: default_tone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPreferences {
    pub capabilities: BTreeSet<Capability>,
    pub interests: Vec<String>,
    pub communication: CommunicationSettings,
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            capabilities: Capability::ALL.into_iter().filter(|c| *c != Capability::Briefing).collect(),
            interests: Vec::new(),
            communication: CommunicationSettings::default(),
        }
    }
}

impl UserPreferences {
    /// Build preferences from a stored JSON document, shallow-merged over
    /// the defaults.
    pub fn from_stored(stored: &serde_json::Value) -> Self {
        let mut prefs = Self::default();
        let Some(obj) = stored.as_object() else {
            return prefs;
        };

        if let Some(value) = obj.get("capabilities") {
            match parse_capabilities(value) {
                Some(caps) => prefs.capabilities = caps,
                None => debug!("Ignoring malformed capabilities preference"),
            }
        }
        if let Some(value) = obj.get("interests") {
            match serde_json::from_value::<Vec<String>>(value.clone()) {
                Ok(interests) => prefs.interests = interests,
                Err(e) => debug!(error = %e, "Ignoring malformed interests preference"),
            }
        }
        if let Some(value) = obj.get("communication") {
            match serde_json::from_value::<CommunicationSettings>(value.clone()) {
                Ok(comm) => prefs.communication = comm,
                Err(e) => debug!(error = %e, "Ignoring malformed communication preference"),
            }
        }
        prefs
    }

    pub fn to_stored(&self) -> serde_json::Value {
        serde_json::json!({
            "capabilities": self.capabilities.iter().map(|c| c.as_str()).collect::<Vec<_>>(),
            "interests": self.interests,
            "communication": self.communication,
        })
    }

    pub fn allows(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Capabilities are stored either as a list of enabled keys or as a map of
/// key to bool. Unknown keys are dropped.
fn parse_capabilities(value: &serde_json::Value) -> Option<BTreeSet<Capability>> {
    let mut caps = BTreeSet::new();
    match value {
        serde_json::Value::Array(items) => {
            for item in items {
                let key = item.as_str()?;
                match Capability::parse(key) {
                    Some(cap) => {
                        caps.insert(cap);
                    }
                    None => debug!(key, "Dropping unknown capability"),
                }
            }
        }
        serde_json::Value::Object(map) => {
            for (key, enabled) in map {
                let enabled = enabled.as_bool()?;
                match Capability::parse(key) {
                    Some(cap) if enabled => {
                        caps.insert(cap);
                    }
                    Some(_) => {}
                    None => debug!(key = %key, "Dropping unknown capability"),
                }
            }
        }
        _ => return None,
    }
    Some(caps)
}

/// The identity anchor for everything the assistant does.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub email: Option<String>,

    /// E.164 phone number, e.g. "+15551234567"
    #[serde(default)]
    pub phone_number: Option<String>,

    #[serde(default)]
    pub phone_verified: bool,

    /// IANA zone name
    #[serde(default)]
    pub timezone: Option<String>,

    #[serde(default)]
    pub preferences: UserPreferences,
}

impl User {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            email: None,
            phone_number: None,
            phone_verified: false,
            timezone: None,
            preferences: UserPreferences::default(),
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// The phone number, only once verified.
    pub fn verified_phone(&self) -> Option<&str> {
        if self.phone_verified {
            self.phone_number.as_deref()
        } else {
            None
        }
    }
}

/// Lookup and persistence of users.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user(&self, user_id: &str) -> Result<Option<User>, StoreError>;

    /// Find the user owning a verified phone number.
    async fn find_by_phone(&self, phone_number: &str) -> Result<Option<User>, StoreError>;

    async fn upsert_user(&self, user: &User) -> Result<(), StoreError>;
}
