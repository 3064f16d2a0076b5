//! Resolution of logged events against freshly fetched records.
//!
//! Events whose interpretation or comment no longer exists upstream are
//! skipped. The survivors are reduced to one event per target, inserts first.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{Comment, Event, EventKind, EventModel, Interpretation, Recipient, UserRef};
use crate::pipeline::diff::dedupe_by_target;
use crate::services::{RecordStore, UserDirectory};

/// An event with the records it refers to.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEvent {
    pub event: Event,
    pub interpretation: Interpretation,
    /// Set for comment events
    pub comment: Option<Comment>,
}

impl ResolvedEvent {
    pub fn created(&self) -> DateTime<Utc> {
        self.event.created
    }

    pub fn kind(&self) -> EventKind {
        self.event.kind
    }

    pub fn model(&self) -> EventModel {
        self.event.model()
    }

    /// Who wrote the interpretation or comment.
    pub fn author(&self) -> Option<&UserRef> {
        match &self.comment {
            Some(comment) => comment.user.as_ref(),
            None => self.interpretation.user.as_ref(),
        }
    }

    pub fn author_id(&self) -> Option<&str> {
        self.author().map(|user| user.id.as_str())
    }

    /// Text of the interpretation or comment.
    pub fn text(&self) -> &str {
        match &self.comment {
            Some(comment) => &comment.text,
            None => &self.interpretation.text,
        }
    }

    pub fn recipients(&self) -> &BTreeSet<String> {
        self.interpretation.recipients()
    }
}

/// Events ready for composition, with the profiles of everyone they concern.
#[derive(Debug, Clone, Default)]
pub struct ResolvedBatch {
    pub events: Vec<ResolvedEvent>,
    pub users: HashMap<String, Recipient>,
    /// Events dropped because their records are gone
    pub missing: usize,
}

/// Fetch the records and recipients of `events`.
pub async fn resolve_events(
    events: Vec<Event>,
    records: &dyn RecordStore,
    directory: &dyn UserDirectory,
) -> Result<ResolvedBatch> {
    if events.is_empty() {
        return Ok(ResolvedBatch::default());
    }

    let mut ids: Vec<String> = Vec::new();
    for event in &events {
        if !ids.iter().any(|id| id == event.interpretation_id()) {
            ids.push(event.interpretation_id().to_string());
        }
    }

    let interpretations = records.fetch_by_ids(&ids).await?;
    log::debug!(
        "Fetched {}/{} interpretations referenced by {} events",
        interpretations.len(),
        ids.len(),
        events.len()
    );

    let (resolved, missing) = attach(events, &interpretations);

    let user_ids: BTreeSet<&String> = resolved.iter().flat_map(|e| e.recipients()).collect();
    let user_ids: Vec<String> = user_ids.into_iter().cloned().collect();
    let users = if user_ids.is_empty() {
        HashMap::new()
    } else {
        directory
            .fetch_users(&user_ids)
            .await?
            .into_iter()
            .map(|user| (user.id.clone(), user))
            .collect()
    };

    Ok(ResolvedBatch {
        events: resolved,
        users,
        missing,
    })
}

/// Pair events with their records, then keep one event per target.
///
/// Returns the resolved events and the number of events left unresolved.
pub fn attach(
    events: Vec<Event>,
    interpretations: &[Interpretation],
) -> (Vec<ResolvedEvent>, usize) {
    let by_id: HashMap<&str, &Interpretation> =
        interpretations.iter().map(|i| (i.id.as_str(), i)).collect();

    let total = events.len();
    let found: Vec<Event> = events
        .into_iter()
        .filter(|event| {
            let Some(interpretation) = by_id.get(event.interpretation_id()) else {
                log::debug!("Skipping {}: interpretation not found", event);
                return false;
            };
            match event.comment_id() {
                Some(comment_id) if interpretation.comment(comment_id).is_none() => {
                    log::debug!("Skipping {}: comment not found", event);
                    false
                }
                _ => true,
            }
        })
        .collect();
    let missing = total - found.len();

    let resolved = dedupe_by_target(found)
        .into_iter()
        .filter_map(|event| {
            let interpretation = (*by_id.get(event.interpretation_id())?).clone();
            let comment = match event.comment_id() {
                Some(comment_id) => Some(interpretation.comment(comment_id)?.clone()),
                None => None,
            };
            Some(ResolvedEvent {
                event,
                interpretation,
                comment,
            })
        })
        .collect();

    (resolved, missing)
}
