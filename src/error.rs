// src/error.rs

//! Unified error handling for the notifier.

use std::fmt;

use thiserror::Error;

/// Result type alias for notifier operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Reading or writing the cache, event log or watermark store failed
    #[error("Persistence error for {store}: {message}")]
    Persistence { store: String, message: String },

    /// The remote record source could not be queried
    #[error("Source fetch error for {context}: {message}")]
    SourceFetch { context: String, message: String },

    /// A stored event carries a model or type outside the known set
    #[error("Unknown event {field} '{value}'")]
    UnknownEventModel { field: &'static str, value: String },

    /// A single message could not be transmitted
    #[error("Transmission to {recipient} failed: {message}")]
    Transmission { recipient: String, message: String },
}

impl AppError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a persistence error for a named store or key.
    pub fn persistence(store: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Persistence {
            store: store.into(),
            message: message.to_string(),
        }
    }

    /// Create a source fetch error with context.
    pub fn source_fetch(context: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::SourceFetch {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Create an unknown event model/type error.
    pub fn unknown_event(field: &'static str, value: impl Into<String>) -> Self {
        Self::UnknownEventModel {
            field,
            value: value.into(),
        }
    }

    /// Create a transmission error for one recipient.
    pub fn transmission(recipient: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Transmission {
            recipient: recipient.into(),
            message: message.to_string(),
        }
    }
}
