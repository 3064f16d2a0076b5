// src/models/user.rs

//! Recipients and their notification preferences.

use serde::{Deserialize, Serialize};

/// A user who may receive messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub email: Option<String>,
    /// Opted out of per-event notifications
    #[serde(default)]
    pub no_mention_notifications: bool,
    /// Opted out of newsletters
    #[serde(default)]
    pub no_newsletters: bool,
}

impl Recipient {
    /// Deliverable address, ignoring blank values.
    pub fn address(&self) -> Option<&str> {
        self.email
            .as_deref()
            .map(str::trim)
            .filter(|email| !email.is_empty())
    }
}

/// Per-user platform settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserSettings {
    /// UI locale, e.g. `fr`
    #[serde(default)]
    pub locale: Option<String>,
    /// The platform already e-mails this user its own notifications
    #[serde(default)]
    pub email_notifications: bool,
}
