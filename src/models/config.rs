//! Application configuration structures.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::Channel;

/// Upper bound of a channel's window: one year.
pub const MAX_WINDOW_MINUTES: i64 = 366 * 24 * 60;

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Remote record source
    #[serde(default)]
    pub api: ApiConfig,

    /// Local cache locations
    #[serde(default)]
    pub paths: PathsConfig,

    /// Delivery behavior shared by all channels
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Per-event notification channel
    #[serde(default = "defaults::notifications")]
    pub notifications: ChannelConfig,

    /// Digest channel
    #[serde(default = "defaults::newsletters")]
    pub newsletters: ChannelConfig,

    /// Outbound SMTP server
    #[serde(default)]
    pub smtp: SmtpConfig,

    /// Values exposed to message rendering
    #[serde(default)]
    pub mail: MailConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.api.url.trim().is_empty() {
            return Err(AppError::config("api.url is empty"));
        }
        url::Url::parse(&self.api.url)?;
        if self.api.timeout_secs == 0 {
            return Err(AppError::config("api.timeout_secs must be > 0"));
        }
        if self.dispatch.concurrency == 0 {
            return Err(AppError::config("dispatch.concurrency must be > 0"));
        }
        for (name, channel) in [
            ("notifications", &self.notifications),
            ("newsletters", &self.newsletters),
        ] {
            if !(1..=MAX_WINDOW_MINUTES).contains(&channel.max_window_minutes) {
                return Err(AppError::config(format!(
                    "{name}.max_window_minutes must be between 1 and {MAX_WINDOW_MINUTES}"
                )));
            }
        }
        if self.smtp.from_email.trim().is_empty() {
            return Err(AppError::config("smtp.from_email is empty"));
        }
        Ok(())
    }

    /// Settings of one delivery channel.
    pub fn channel(&self, channel: Channel) -> &ChannelConfig {
        match channel {
            Channel::Notifications => &self.notifications,
            Channel::Newsletters => &self.newsletters,
        }
    }

    /// Directory holding the snapshot cache, event log and watermarks.
    pub fn cache_dir(&self) -> PathBuf {
        PathBuf::from(&self.paths.cache_dir)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            paths: PathsConfig::default(),
            dispatch: DispatchConfig::default(),
            notifications: defaults::notifications(),
            newsletters: defaults::newsletters(),
            smtp: SmtpConfig::default(),
            mail: MailConfig::default(),
        }
    }
}

/// Remote API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the instance, e.g. `https://play.dhis2.org/demo`
    #[serde(default = "defaults::api_url")]
    pub url: String,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            url: defaults::api_url(),
            username: String::new(),
            password: String::new(),
            timeout_secs: defaults::timeout(),
        }
    }
}

/// File locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "defaults::cache_dir")]
    pub cache_dir: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            cache_dir: defaults::cache_dir(),
        }
    }
}

/// Delivery behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Maximum concurrent bucket reads and sends
    #[serde(default = "defaults::concurrency")]
    pub concurrency: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            concurrency: defaults::concurrency(),
        }
    }
}

/// Window bounds of a delivery channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Oldest activity considered by a run, in minutes before now
    pub max_window_minutes: i64,
}

impl ChannelConfig {
    /// Window bound, clamped to `1..=MAX_WINDOW_MINUTES`.
    pub fn max_window(&self) -> Duration {
        Duration::minutes(self.max_window_minutes.clamp(1, MAX_WINDOW_MINUTES))
    }
}

/// Outbound SMTP settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    #[serde(default = "defaults::smtp_host")]
    pub host: String,

    #[serde(default = "defaults::smtp_port")]
    pub port: u16,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "defaults::from_email")]
    pub from_email: String,

    #[serde(default = "defaults::from_name")]
    pub from_name: String,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: defaults::smtp_host(),
            port: defaults::smtp_port(),
            username: None,
            password: None,
            from_email: defaults::from_email(),
            from_name: defaults::from_name(),
        }
    }
}

/// Links and texts available to message rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    /// Public URL used in links; defaults to `api.url`
    #[serde(default)]
    pub public_url: Option<String>,

    /// Where static assets (images) are published
    #[serde(default)]
    pub assets_url: Option<String>,

    /// Locale used when the user has none
    #[serde(default = "defaults::locale")]
    pub locale: String,

    #[serde(default)]
    pub footer_text: String,

    #[serde(default)]
    pub privacy_policy_url: Option<String>,

    /// Directory of `{locale}.toml` translation files
    #[serde(default)]
    pub translations_dir: Option<String>,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            public_url: None,
            assets_url: None,
            locale: defaults::locale(),
            footer_text: String::new(),
            privacy_policy_url: None,
            translations_dir: None,
        }
    }
}

mod defaults {
    use super::ChannelConfig;
    use crate::models::Channel;

    // API defaults
    pub fn api_url() -> String {
        "http://localhost:8080".into()
    }
    pub fn timeout() -> u64 {
        30
    }

    pub fn cache_dir() -> String {
        "cache".into()
    }

    // Dispatch defaults
    pub fn concurrency() -> usize {
        1
    }
    pub fn notifications() -> ChannelConfig {
        ChannelConfig {
            max_window_minutes: Channel::Notifications.default_max_window().num_minutes(),
        }
    }
    pub fn newsletters() -> ChannelConfig {
        ChannelConfig {
            max_window_minutes: Channel::Newsletters.default_max_window().num_minutes(),
        }
    }

    // SMTP defaults
    pub fn smtp_host() -> String {
        "localhost".into()
    }
    pub fn smtp_port() -> u16 {
        25
    }
    pub fn from_email() -> String {
        "noreply@localhost".into()
    }
    pub fn from_name() -> String {
        "Interpretations".into()
    }

    pub fn locale() -> String {
        "en".into()
    }
}
