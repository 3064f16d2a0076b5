// src/models/watermark.rs

//! Per-stream progress markers.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Logical pipeline with its own watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stream {
    /// Change detection (`generate-events`)
    Events,
    Notifications,
    Newsletters,
}

impl Stream {
    /// Key of the stream in the watermark store.
    pub fn key(&self) -> &'static str {
        match self {
            Stream::Events => "getEvents",
            Stream::Notifications => "notifications",
            Stream::Newsletters => "newsletters",
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// A stream that delivers messages to recipients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// One message per event and subscriber
    Notifications,
    /// One digest per subscriber
    Newsletters,
}

impl Channel {
    pub fn stream(&self) -> Stream {
        match self {
            Channel::Notifications => Stream::Notifications,
            Channel::Newsletters => Stream::Newsletters,
        }
    }

    /// Default upper bound of the dispatch window.
    pub fn default_max_window(&self) -> Duration {
        match self {
            Channel::Notifications => Duration::hours(1),
            Channel::Newsletters => Duration::days(7),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.stream().fmt(f)
    }
}

/// Durable cursor of a stream plus per-recipient delivery progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Watermark {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_success: Option<DateTime<Utc>>,

    /// Recipient id to the `created` of the latest event delivered to them
    #[serde(default)]
    pub users: BTreeMap<String, DateTime<Utc>>,
}

impl Watermark {
    /// Move `last_success` forward; it never moves back.
    pub fn advance(&mut self, at: DateTime<Utc>) {
        self.last_success = Some(match self.last_success {
            Some(previous) => previous.max(at),
            None => at,
        });
    }

    pub fn last_notified(&self, recipient: &str) -> Option<DateTime<Utc>> {
        self.users.get(recipient).copied()
    }

    /// Whether an event created at `at` was already delivered to the recipient.
    pub fn covers(&self, recipient: &str, at: DateTime<Utc>) -> bool {
        self.last_notified(recipient)
            .is_some_and(|notified| at <= notified)
    }

    /// Record a delivery; the per-recipient timestamp never moves back.
    pub fn record_delivery(&mut self, recipient: &str, at: DateTime<Utc>) {
        self.users
            .entry(recipient.to_string())
            .and_modify(|notified| *notified = (*notified).max(at))
            .or_insert(at);
    }
}

/// Every stream's watermark, keyed by `Stream::key`.
pub type Watermarks = BTreeMap<String, Watermark>;
