//! In-memory storage backend.
//!
//! Behaves like [`LocalStorage`](super::LocalStorage) without touching the
//! filesystem. Failures can be injected per bucket and for writes, which makes
//! it the backend of choice for exercising the sync and dispatch error paths.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::models::{BucketKey, Event, Interpretation, Stream, Watermark, Watermarks};
use crate::storage::{
    AppendMetadata, EventStore, SnapshotStore, WatermarkStore, group_by_bucket, sort_by_created,
};

#[derive(Debug, Default)]
struct State {
    snapshot: Vec<Interpretation>,
    buckets: BTreeMap<BucketKey, Vec<Event>>,
    watermarks: Watermarks,
    unreadable: HashSet<BucketKey>,
    fail_writes: bool,
}

/// Storage kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    state: Mutex<State>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|e| AppError::persistence("memory", e))
    }

    fn check_writable(state: &State, store: &str) -> Result<()> {
        if state.fail_writes {
            return Err(AppError::persistence(store, "writes disabled"));
        }
        Ok(())
    }

    /// Make reads of `bucket` fail.
    pub fn make_unreadable(&self, bucket: BucketKey) -> Result<()> {
        self.lock()?.unreadable.insert(bucket);
        Ok(())
    }

    /// Make every subsequent write fail.
    pub fn fail_writes(&self, fail: bool) -> Result<()> {
        self.lock()?.fail_writes = fail;
        Ok(())
    }

    /// Every stored event, bucket by bucket, in storage order.
    pub fn all_events(&self) -> Result<Vec<Event>> {
        Ok(self.lock()?.buckets.values().flatten().cloned().collect())
    }
}

#[async_trait]
impl SnapshotStore for MemoryStorage {
    async fn load_snapshot(&self) -> Result<Vec<Interpretation>> {
        Ok(self.lock()?.snapshot.clone())
    }

    async fn save_snapshot(&self, interpretations: &[Interpretation]) -> Result<()> {
        let mut state = self.lock()?;
        Self::check_writable(&state, "snapshot")?;
        state.snapshot = interpretations.to_vec();
        Ok(())
    }
}

#[async_trait]
impl EventStore for MemoryStorage {
    async fn append(&self, events: &[Event]) -> Result<AppendMetadata> {
        let mut state = self.lock()?;
        Self::check_writable(&state, "events")?;

        let mut metadata = AppendMetadata::default();
        for (bucket, new_events) in group_by_bucket(events) {
            metadata.events_written += new_events.len();
            metadata.buckets_updated += 1;
            state.buckets.entry(bucket).or_default().extend(new_events);
        }
        Ok(metadata)
    }

    async fn read(&self, bucket: BucketKey) -> Result<Vec<Event>> {
        let state = self.lock()?;
        if state.unreadable.contains(&bucket) {
            return Err(AppError::persistence(bucket.file_name(), "unreadable"));
        }
        let mut events = state.buckets.get(&bucket).cloned().unwrap_or_default();
        sort_by_created(&mut events);
        Ok(events)
    }
}

#[async_trait]
impl WatermarkStore for MemoryStorage {
    async fn load_watermark(&self, stream: Stream) -> Result<Option<Watermark>> {
        Ok(self.lock()?.watermarks.get(stream.key()).cloned())
    }

    async fn save_watermark(&self, stream: Stream, watermark: &Watermark) -> Result<()> {
        let mut state = self.lock()?;
        Self::check_writable(&state, "watermarks")?;
        state
            .watermarks
            .insert(stream.key().to_string(), watermark.clone());
        Ok(())
    }
}
