//! Who may receive a message.

use std::collections::HashMap;
use std::fmt;

use crate::error::Result;
use crate::models::{Channel, Recipient, UserSettings};
use crate::services::UserDirectory;

/// Why a subscriber gets no message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ineligible {
    UnknownUser,
    NoEmail,
    /// The subscriber caused the event
    Author,
    OptedOut,
    /// The platform already e-mails this user about interpretations
    PlatformEmail,
}

impl fmt::Display for Ineligible {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Ineligible::UnknownUser => "user not found",
            Ineligible::NoEmail => "user has no email",
            Ineligible::Author => "self-notification",
            Ineligible::OptedOut => "user has opted out",
            Ineligible::PlatformEmail => "user already receives platform notifications",
        };
        f.write_str(reason)
    }
}

/// User settings fetched during one dispatch run, keyed by username.
///
/// Owned by the caller and dropped with the run.
#[derive(Debug, Default)]
pub struct UserSettingsCache {
    entries: HashMap<String, UserSettings>,
}

impl UserSettingsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings of `username`, fetched on first use.
    pub async fn get(
        &mut self,
        directory: &dyn UserDirectory,
        username: &str,
    ) -> Result<UserSettings> {
        if let Some(settings) = self.entries.get(username) {
            return Ok(settings.clone());
        }
        let settings = directory.fetch_user_settings(username).await?;
        log::debug!(
            "Settings of {}: locale={:?}, email_notifications={}",
            username,
            settings.locale,
            settings.email_notifications
        );
        self.entries.insert(username.to_string(), settings.clone());
        Ok(settings)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Checks that need no remote lookup.
pub fn check_profile(
    channel: Channel,
    recipient: Option<&Recipient>,
    author_id: Option<&str>,
) -> std::result::Result<(), Ineligible> {
    let recipient = recipient.ok_or(Ineligible::UnknownUser)?;
    if recipient.address().is_none() {
        return Err(Ineligible::NoEmail);
    }
    if author_id == Some(recipient.id.as_str()) {
        return Err(Ineligible::Author);
    }
    let opted_out = match channel {
        Channel::Notifications => recipient.no_mention_notifications,
        Channel::Newsletters => recipient.no_newsletters,
    };
    if opted_out {
        return Err(Ineligible::OptedOut);
    }
    Ok(())
}

/// Full eligibility check of one recipient.
///
/// Returns `None` when the recipient may receive the message, and the
/// recipient's settings are then cached for rendering.
pub async fn screen(
    channel: Channel,
    recipient: Option<&Recipient>,
    author_id: Option<&str>,
    settings: &mut UserSettingsCache,
    directory: &dyn UserDirectory,
) -> Result<Option<Ineligible>> {
    if let Err(reason) = check_profile(channel, recipient, author_id) {
        return Ok(Some(reason));
    }
    let Some(recipient) = recipient else {
        return Ok(Some(Ineligible::UnknownUser));
    };

    let user_settings = settings.get(directory, &recipient.username).await?;
    if channel == Channel::Notifications && user_settings.email_notifications {
        return Ok(Some(Ineligible::PlatformEmail));
    }
    Ok(None)
}
