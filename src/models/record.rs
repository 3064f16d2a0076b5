// src/models/record.rs

//! Interpretation and comment records mirrored from the remote source.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::ObjectKind;

/// A shared interpretation of an object, with its nested comments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Interpretation {
    /// Source identifier
    pub id: String,

    /// Interpretation body text
    #[serde(default)]
    pub text: String,

    /// Source-clock timestamp of the last change
    #[serde(with = "source_time")]
    pub last_updated: DateTime<Utc>,

    /// Users subscribed to this interpretation (used when no object is attached)
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub subscribers: BTreeSet<String>,

    /// Comments in source order
    #[serde(default)]
    pub comments: Vec<Comment>,

    /// Creation timestamp, only present on dispatch-time fetches
    #[serde(
        default,
        with = "source_time::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created: Option<DateTime<Utc>>,

    /// Author, only present on dispatch-time fetches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserRef>,

    /// Interpreted object, only present on dispatch-time fetches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<ObjectRef>,

    #[serde(default)]
    pub likes: u32,
}

impl Interpretation {
    /// Create a bare interpretation as returned by change-detection fetches.
    pub fn new(
        id: impl Into<String>,
        text: impl Into<String>,
        last_updated: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            last_updated,
            subscribers: BTreeSet::new(),
            comments: Vec::new(),
            created: None,
            user: None,
            object: None,
            likes: 0,
        }
    }

    /// Find a nested comment by id.
    pub fn comment(&self, comment_id: &str) -> Option<&Comment> {
        self.comments.iter().find(|c| c.id == comment_id)
    }

    /// Users to notify about activity on this interpretation.
    ///
    /// Subscriptions live on the interpreted object when one is known.
    pub fn recipients(&self) -> &BTreeSet<String> {
        match &self.object {
            Some(object) => &object.subscribers,
            None => &self.subscribers,
        }
    }
}

/// A comment nested under exactly one interpretation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,

    #[serde(default)]
    pub text: String,

    /// Source-clock timestamp; the source does not bump it when the text is edited
    #[serde(with = "source_time")]
    pub last_updated: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserRef>,
}

impl Comment {
    pub fn new(
        id: impl Into<String>,
        text: impl Into<String>,
        last_updated: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            last_updated,
            user: None,
        }
    }
}

/// Author reference attached to interpretations and comments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserRef {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub username: String,
}

/// The object (map, chart, table...) an interpretation is about.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRef {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub kind: ObjectKind,
    #[serde(default)]
    pub subscribers: BTreeSet<String>,
}

/// Serde helpers for source-clock timestamps.
///
/// The source emits `2020-03-30T10:37:38.790` without an offset; such values are UTC.
/// RFC 3339 input is accepted as well.
pub mod source_time {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de};

    const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

    /// Parse a source timestamp.
    pub fn parse(value: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(value)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|naive| naive.and_utc())
            })
    }

    /// Format a timestamp the way the source emits it.
    pub fn format(value: &DateTime<Utc>) -> String {
        value.format(FORMAT).to_string()
    }

    pub fn serialize<S: Serializer>(
        value: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| de::Error::custom(format!("invalid timestamp '{raw}'")))
    }

    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer, de};

        pub fn serialize<S: Serializer>(
            value: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(value) => serializer.serialize_str(&super::format(value)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            match Option::<String>::deserialize(deserializer)? {
                Some(raw) => super::parse(&raw)
                    .map(Some)
                    .ok_or_else(|| de::Error::custom(format!("invalid timestamp '{raw}'"))),
                None => Ok(None),
            }
        }
    }
}
