//! Storage abstractions for the snapshot cache, event log and watermarks.
//!
//! ## Directory Structure
//!
//! ```text
//! cache/
//! ├── interpretations.json      # Snapshot of every known interpretation
//! ├── last-executions.json      # Watermarks keyed by stream
//! └── events/                   # Event log, one bucket per month
//!     ├── ev-month-2024-01.json
//!     └── ev-month-2024-02.json
//! ```
//!
//! Every write replaces the whole file.

pub mod local;
pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{BucketKey, Event, Interpretation, Stream, Watermark};

// Re-export for convenience
pub use local::LocalStorage;
pub use memory::MemoryStorage;

/// Metadata about an event log append.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppendMetadata {
    /// Number of events written
    pub events_written: usize,
    /// Number of bucket files rewritten
    pub buckets_updated: usize,
}

/// Last observed state of every interpretation.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Load the cached snapshot; empty when nothing was cached yet.
    async fn load_snapshot(&self) -> Result<Vec<Interpretation>>;

    /// Replace the cached snapshot.
    async fn save_snapshot(&self, interpretations: &[Interpretation]) -> Result<()>;
}

/// Append-only, month-bucketed event log.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append events after the stored events of their buckets.
    async fn append(&self, events: &[Event]) -> Result<AppendMetadata>;

    /// Events of one bucket sorted by `created`; empty for an unknown bucket.
    async fn read(&self, bucket: BucketKey) -> Result<Vec<Event>>;
}

/// Per-stream watermarks.
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    async fn load_watermark(&self, stream: Stream) -> Result<Option<Watermark>>;

    /// Replace the watermark of one stream, keeping the others.
    async fn save_watermark(&self, stream: Stream, watermark: &Watermark) -> Result<()>;
}

/// A backend holding all three stores.
pub trait Storage: SnapshotStore + EventStore + WatermarkStore {}

impl<T: SnapshotStore + EventStore + WatermarkStore> Storage for T {}

/// Group events by bucket, keeping input order inside each bucket.
pub fn group_by_bucket(events: &[Event]) -> BTreeMap<BucketKey, Vec<Event>> {
    let mut buckets: BTreeMap<BucketKey, Vec<Event>> = BTreeMap::new();
    for event in events {
        buckets.entry(event.bucket()).or_default().push(event.clone());
    }
    buckets
}

/// Stable sort by `created`.
pub fn sort_by_created(events: &mut [Event]) {
    events.sort_by_key(|event| event.created);
}
