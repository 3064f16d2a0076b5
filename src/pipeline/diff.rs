//! Diff calculation between the cached and the freshly fetched snapshot.
//!
//! Four passes produce the events, in this order:
//!
//! 1. interpretations missing from the cache: `insert/interpretation`
//! 2. interpretations whose text changed: `update/interpretation`
//! 3. comments missing from the cached interpretation: `insert/comment`
//! 4. comments whose text changed: `update/comment`
//!
//! The result is stably sorted by `created`, so events with equal timestamps
//! keep pass order. Only text changes count; subscriber or like changes are ignored.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use crate::models::{Event, EventKind, EventModel, Interpretation};

/// Events detected between two snapshots.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiffResult {
    /// Events sorted by `created`
    pub events: Vec<Event>,
}

impl DiffResult {
    /// Check if there are any changes.
    pub fn has_changes(&self) -> bool {
        !self.events.is_empty()
    }

    /// Get the total number of changes.
    pub fn change_count(&self) -> usize {
        self.events.len()
    }

    /// Number of events of one kind and model.
    pub fn count(&self, kind: EventKind, model: EventModel) -> usize {
        self.events
            .iter()
            .filter(|e| e.kind == kind && e.model() == model)
            .count()
    }
}

/// Calculate the events that turn `cached` into `fetched`.
pub fn calculate_diff(cached: &[Interpretation], fetched: &[Interpretation]) -> DiffResult {
    let cached_map: HashMap<&str, &Interpretation> =
        cached.iter().map(|i| (i.id.as_str(), i)).collect();

    let mut events = Vec::new();
    events.extend(created_interpretations(&cached_map, fetched));
    events.extend(edited_interpretations(&cached_map, fetched));
    events.extend(created_comments(&cached_map, fetched));
    events.extend(edited_comments(&cached_map, fetched));

    // Vec::sort_by_key is stable: equal timestamps keep pass order
    events.sort_by_key(|event| event.created);

    DiffResult {
        events: dedupe_by_target(events),
    }
}

fn created_interpretations<'a>(
    cached: &'a HashMap<&str, &Interpretation>,
    fetched: &'a [Interpretation],
) -> impl Iterator<Item = Event> + 'a {
    fetched
        .iter()
        .filter(|i| !cached.contains_key(i.id.as_str()))
        .map(|i| Event::interpretation(EventKind::Insert, &i.id, i.last_updated))
}

fn edited_interpretations<'a>(
    cached: &'a HashMap<&str, &Interpretation>,
    fetched: &'a [Interpretation],
) -> impl Iterator<Item = Event> + 'a {
    fetched
        .iter()
        .filter(|i| {
            cached
                .get(i.id.as_str())
                .is_some_and(|previous| previous.text != i.text)
        })
        .map(|i| Event::interpretation(EventKind::Update, &i.id, i.last_updated))
}

fn created_comments<'a>(
    cached: &'a HashMap<&str, &Interpretation>,
    fetched: &'a [Interpretation],
) -> impl Iterator<Item = Event> + 'a {
    fetched.iter().flat_map(move |interpretation| {
        let known: HashSet<&str> = cached
            .get(interpretation.id.as_str())
            .map(|previous| previous.comments.iter().map(|c| c.id.as_str()).collect())
            .unwrap_or_default();

        interpretation
            .comments
            .iter()
            .filter(move |comment| !known.contains(comment.id.as_str()))
            .map(move |comment| {
                Event::comment(
                    EventKind::Insert,
                    &interpretation.id,
                    &comment.id,
                    comment.last_updated,
                )
            })
    })
}

fn edited_comments<'a>(
    cached: &'a HashMap<&str, &Interpretation>,
    fetched: &'a [Interpretation],
) -> impl Iterator<Item = Event> + 'a {
    fetched.iter().flat_map(move |interpretation| {
        let previous = cached.get(interpretation.id.as_str()).copied();

        interpretation
            .comments
            .iter()
            .filter(move |comment| {
                previous
                    .and_then(|p| p.comment(&comment.id))
                    .is_some_and(|old| old.text != comment.text)
            })
            // The source keeps the comment's lastUpdated on edits; the
            // interpretation's timestamp is the only one that moves.
            .map(move |comment| {
                Event::comment(
                    EventKind::Update,
                    &interpretation.id,
                    &comment.id,
                    interpretation.last_updated,
                )
            })
    })
}

/// Keep one event per interpretation/comment, preferring inserts.
///
/// Among events of the same kind the first one wins. Order is preserved.
pub fn dedupe_by_target(events: Vec<Event>) -> Vec<Event> {
    let keep: HashSet<usize> = {
        let mut chosen: HashMap<_, usize> = HashMap::new();
        for (index, event) in events.iter().enumerate() {
            match chosen.entry(&event.target) {
                Entry::Vacant(slot) => {
                    slot.insert(index);
                }
                Entry::Occupied(mut slot) => {
                    let chosen_kind = events[*slot.get()].kind;
                    if event.kind == EventKind::Insert && chosen_kind != EventKind::Insert {
                        slot.insert(index);
                    }
                }
            }
        }
        chosen.into_values().collect()
    };

    events
        .into_iter()
        .enumerate()
        .filter(|(index, _)| keep.contains(index))
        .map(|(_, event)| event)
        .collect()
}
