use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountType {
    #[default]
    Attendee,
    Host,
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountType::Attendee => f.write_str("Attendee"),
            AccountType::Host => f.write_str("Host"),
        }
    }
}

impl FromStr for AccountType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Attendee" => Ok(AccountType::Attendee),
            "Host" => Ok(AccountType::Host),
            other => Err(format!("unknown account type '{}'", other)),
        }
    }
}

/// Per-user settings kept next to the event catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: Uuid,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub account_type: AccountType,
    #[serde(default)]
    pub notifications: bool,
    #[serde(default)]
    pub dietary_restrictions: Vec<String>,
    #[serde(default)]
    pub food_preferences: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    pub fn empty(user_id: Uuid) -> Self {
        Self {
            user_id,
            display_name: None,
            account_type: AccountType::default(),
            notifications: false,
            dietary_restrictions: Vec::new(),
            food_preferences: Vec::new(),
            updated_at: Utc::now(),
        }
    }
}
