// src/pipeline/sync.rs

//! One change-detection execution (`generate-events`).

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::error::Result;
use crate::models::{Interpretation, Stream};
use crate::pipeline::diff::calculate_diff;
use crate::services::RecordStore;
use crate::storage::Storage;
use crate::utils::{Clock, SystemClock};

/// How a run obtained its baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// No usable watermark: the fetched snapshot becomes the cache
    FirstRun,
    /// Only records changed since the last success are fetched and diffed
    Incremental,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::FirstRun => f.write_str("first run"),
            SyncMode::Incremental => f.write_str("incremental"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Rebuild the cache from a full fetch, as on a first run
    pub ignore_cache: bool,
}

/// Outcome of a sync run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub mode: SyncMode,
    pub fetched: usize,
    pub events_generated: usize,
    pub cached_records: usize,
}

/// Detects changes in the remote source and records them as events.
pub struct SyncController<'a> {
    storage: &'a dyn Storage,
    records: &'a dyn RecordStore,
    clock: &'a dyn Clock,
}

impl<'a> SyncController<'a> {
    pub fn new(storage: &'a dyn Storage, records: &'a dyn RecordStore) -> Self {
        Self {
            storage,
            records,
            clock: &SystemClock,
        }
    }

    pub fn with_clock(mut self, clock: &'a dyn Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Run one execution and advance the `getEvents` watermark.
    ///
    /// Errors leave the watermark untouched.
    pub async fn run(&self, options: SyncOptions) -> Result<SyncReport> {
        let now = self.clock.now();
        let previous = self.storage.load_watermark(Stream::Events).await?;
        let since = if options.ignore_cache {
            None
        } else {
            previous.as_ref().and_then(|w| w.last_success)
        };

        let report = match since {
            None => {
                log::info!("First run: fetching every interpretation");
                let fetched = self.records.fetch_all().await?;
                self.storage.save_snapshot(&fetched).await?;
                SyncReport {
                    mode: SyncMode::FirstRun,
                    fetched: fetched.len(),
                    events_generated: 0,
                    cached_records: fetched.len(),
                }
            }
            Some(since) => {
                let date = since.date_naive();
                log::info!("Fetching interpretations updated since {}", date.format("%Y-%m-%d"));
                let fetched = self.records.fetch_changed_since(date).await?;
                let cached = self.storage.load_snapshot().await?;

                if fetched.is_empty() {
                    log::info!("No changes");
                    SyncReport {
                        mode: SyncMode::Incremental,
                        fetched: 0,
                        events_generated: 0,
                        cached_records: cached.len(),
                    }
                } else {
                    let diff = calculate_diff(&cached, &fetched);
                    for event in &diff.events {
                        log::debug!("Event: {}", event);
                    }
                    if diff.has_changes() {
                        self.storage.append(&diff.events).await?;
                    }

                    let merged = merge_snapshot(&cached, &fetched);
                    self.storage.save_snapshot(&merged).await?;

                    SyncReport {
                        mode: SyncMode::Incremental,
                        fetched: fetched.len(),
                        events_generated: diff.change_count(),
                        cached_records: merged.len(),
                    }
                }
            }
        };

        let mut watermark = previous.unwrap_or_default();
        watermark.advance(now);
        self.storage.save_watermark(Stream::Events, &watermark).await?;

        log::info!(
            "Sync ({}): {} fetched, {} events, {} cached",
            report.mode,
            report.fetched,
            report.events_generated,
            report.cached_records
        );
        Ok(report)
    }
}

/// Cached records with fetched ones replacing them by id; new ids are appended.
pub fn merge_snapshot(
    cached: &[Interpretation],
    fetched: &[Interpretation],
) -> Vec<Interpretation> {
    let mut fetched_by_id: HashMap<&str, &Interpretation> = HashMap::new();
    for interpretation in fetched {
        fetched_by_id
            .entry(interpretation.id.as_str())
            .or_insert(interpretation);
    }

    let mut merged: Vec<Interpretation> = cached
        .iter()
        .map(|old| {
            fetched_by_id
                .get(old.id.as_str())
                .map_or_else(|| old.clone(), |new| (*new).clone())
        })
        .collect();

    let mut known: HashSet<&str> = cached.iter().map(|i| i.id.as_str()).collect();
    for interpretation in fetched {
        if known.insert(interpretation.id.as_str()) {
            merged.push(interpretation.clone());
        }
    }
    merged
}
