// src/models/event.rs

//! Change events detected between two snapshots.

use std::fmt;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// What happened to the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Insert,
    Update,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Insert => "insert",
            EventKind::Update => "update",
        }
    }
}

/// Which record level an event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventModel {
    Interpretation,
    Comment,
}

impl EventModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventModel::Interpretation => "interpretation",
            EventModel::Comment => "comment",
        }
    }
}

/// The record an event refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventTarget {
    Interpretation {
        interpretation_id: String,
    },
    Comment {
        interpretation_id: String,
        comment_id: String,
    },
}

/// An immutable detected change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawEvent", into = "RawEvent")]
pub struct Event {
    pub kind: EventKind,
    pub target: EventTarget,
    pub created: DateTime<Utc>,
}

impl Event {
    pub fn interpretation(
        kind: EventKind,
        interpretation_id: impl Into<String>,
        created: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            target: EventTarget::Interpretation {
                interpretation_id: interpretation_id.into(),
            },
            created,
        }
    }

    pub fn comment(
        kind: EventKind,
        interpretation_id: impl Into<String>,
        comment_id: impl Into<String>,
        created: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            target: EventTarget::Comment {
                interpretation_id: interpretation_id.into(),
                comment_id: comment_id.into(),
            },
            created,
        }
    }

    pub fn model(&self) -> EventModel {
        match self.target {
            EventTarget::Interpretation { .. } => EventModel::Interpretation,
            EventTarget::Comment { .. } => EventModel::Comment,
        }
    }

    pub fn interpretation_id(&self) -> &str {
        match &self.target {
            EventTarget::Interpretation { interpretation_id }
            | EventTarget::Comment {
                interpretation_id, ..
            } => interpretation_id,
        }
    }

    pub fn comment_id(&self) -> Option<&str> {
        match &self.target {
            EventTarget::Interpretation { .. } => None,
            EventTarget::Comment { comment_id, .. } => Some(comment_id),
        }
    }

    /// Month bucket this event is stored in.
    pub fn bucket(&self) -> BucketKey {
        BucketKey::of(&self.created)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} {}",
            self.kind.as_str(),
            self.model().as_str(),
            self.interpretation_id()
        )?;
        if let Some(comment_id) = self.comment_id() {
            write!(f, "/{comment_id}")?;
        }
        write!(f, " @ {}", self.created.to_rfc3339())
    }
}

/// On-disk event shape: `{type, model, created, interpretationId, commentId}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub model: String,
    pub created: DateTime<Utc>,
    pub interpretation_id: String,
    #[serde(default)]
    pub comment_id: Option<String>,
}

impl TryFrom<RawEvent> for Event {
    type Error = AppError;

    fn try_from(raw: RawEvent) -> Result<Self, Self::Error> {
        let kind = match raw.kind.as_str() {
            "insert" => EventKind::Insert,
            "update" => EventKind::Update,
            other => return Err(AppError::unknown_event("type", other)),
        };

        let target = match (raw.model.as_str(), raw.comment_id) {
            ("interpretation", _) => EventTarget::Interpretation {
                interpretation_id: raw.interpretation_id,
            },
            ("comment", Some(comment_id)) => EventTarget::Comment {
                interpretation_id: raw.interpretation_id,
                comment_id,
            },
            ("comment", None) => {
                return Err(AppError::unknown_event("model", "comment without commentId"));
            }
            (other, _) => return Err(AppError::unknown_event("model", other)),
        };

        Ok(Event {
            kind,
            target,
            created: raw.created,
        })
    }
}

impl From<Event> for RawEvent {
    fn from(event: Event) -> Self {
        let kind = event.kind.as_str().to_string();
        let model = event.model().as_str().to_string();
        let (interpretation_id, comment_id) = match event.target {
            EventTarget::Interpretation { interpretation_id } => (interpretation_id, None),
            EventTarget::Comment {
                interpretation_id,
                comment_id,
            } => (interpretation_id, Some(comment_id)),
        };
        RawEvent {
            kind,
            model,
            created: event.created,
            interpretation_id,
            comment_id,
        }
    }
}

/// Convert stored entries, dropping the ones with an unknown model or type.
pub fn events_from_raw(raw_events: Vec<RawEvent>, source: &str) -> Vec<Event> {
    raw_events
        .into_iter()
        .filter_map(|raw| match Event::try_from(raw) {
            Ok(event) => Some(event),
            Err(e) => {
                log::warn!("Dropping event from {}: {}", source, e);
                None
            }
        })
        .collect()
}

/// Calendar-month partition of the event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketKey {
    pub year: i32,
    pub month: u32,
}

impl BucketKey {
    pub fn new(year: i32, month: u32) -> Self {
        Self { year, month }
    }

    pub fn of(at: &DateTime<Utc>) -> Self {
        Self::new(at.year(), at.month())
    }

    /// Following calendar month.
    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self::new(self.year + 1, 1)
        } else {
            Self::new(self.year, self.month + 1)
        }
    }

    /// Every bucket from `start`'s month through `end`'s month, inclusive.
    pub fn range(start: &DateTime<Utc>, end: &DateTime<Utc>) -> Vec<Self> {
        let last = Self::of(end);
        let mut current = Self::of(start);
        let mut buckets = Vec::new();
        while current <= last {
            buckets.push(current);
            current = current.next();
        }
        buckets
    }

    /// Storage file name of the bucket.
    pub fn file_name(&self) -> String {
        format!("ev-month-{self}.json")
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}
