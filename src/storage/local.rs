//! Local filesystem storage implementation.
//!
//! ## Storage Layout
//!
//! ```text
//! {root}/
//! ├── interpretations.json      # Snapshot cache
//! ├── last-executions.json      # Watermarks
//! └── events/
//!     └── ev-month-YYYY-MM.json # Event log buckets
//! ```
//!
//! Files are written to a temporary sibling and renamed into place.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::models::{
    BucketKey, Event, Interpretation, RawEvent, Stream, Watermark, Watermarks, events_from_raw,
};
use crate::storage::{
    AppendMetadata, EventStore, SnapshotStore, WatermarkStore, group_by_bucket, sort_by_created,
};

const SNAPSHOT_KEY: &str = "interpretations.json";
const WATERMARKS_KEY: &str = "last-executions.json";
const EVENTS_DIR: &str = "events";

/// Local filesystem storage backend.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root_dir: PathBuf,
}

impl LocalStorage {
    /// Create a new LocalStorage rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    /// Get the full path for a relative key.
    fn path(&self, key: &str) -> PathBuf {
        self.root_dir.join(key)
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::persistence(parent.display().to_string(), e))?;
        }
        Ok(())
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(key);
        self.ensure_dir(&path).await?;

        let tmp = path.with_extension("tmp");
        let write = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(bytes).await?;
            file.flush().await?;
            drop(file);
            tokio::fs::rename(&tmp, &path).await?;
            Ok::<(), std::io::Error>(())
        };
        write.await.map_err(|e| AppError::persistence(key, e))
    }

    /// Write JSON data.
    async fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let mut bytes =
            serde_json::to_vec_pretty(value).map_err(|e| AppError::persistence(key, e))?;
        bytes.push(b'\n');
        self.write_bytes(key, &bytes).await
    }

    /// Read bytes, returning None if file doesn't exist.
    async fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::persistence(key, e)),
        }
    }

    /// Read JSON data.
    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.read_bytes(key).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| AppError::persistence(key, e)),
            None => Ok(None),
        }
    }

    /// Key of an event log bucket.
    fn bucket_path(bucket: BucketKey) -> String {
        format!("{}/{}", EVENTS_DIR, bucket.file_name())
    }

    async fn load_watermarks(&self) -> Result<Watermarks> {
        Ok(self.read_json(WATERMARKS_KEY).await?.unwrap_or_default())
    }
}

#[async_trait]
impl SnapshotStore for LocalStorage {
    async fn load_snapshot(&self) -> Result<Vec<Interpretation>> {
        match self.read_json(SNAPSHOT_KEY).await? {
            Some(interpretations) => Ok(interpretations),
            None => {
                log::debug!("No {} found", SNAPSHOT_KEY);
                Ok(Vec::new())
            }
        }
    }

    async fn save_snapshot(&self, interpretations: &[Interpretation]) -> Result<()> {
        self.write_json(SNAPSHOT_KEY, interpretations).await?;
        log::info!(
            "Snapshot: {} interpretations written to {}",
            interpretations.len(),
            SNAPSHOT_KEY
        );
        Ok(())
    }
}

#[async_trait]
impl EventStore for LocalStorage {
    async fn append(&self, events: &[Event]) -> Result<AppendMetadata> {
        let mut metadata = AppendMetadata::default();

        for (bucket, new_events) in group_by_bucket(events) {
            let key = Self::bucket_path(bucket);

            // Raw entries are kept untouched so unknown ones survive the rewrite
            let mut stored: Vec<RawEvent> = self.read_json(&key).await?.unwrap_or_default();
            let added = new_events.len();
            stored.extend(new_events.into_iter().map(RawEvent::from));

            self.write_json(&key, &stored).await?;
            log::info!("Event log: {} events appended to {}", added, key);

            metadata.events_written += added;
            metadata.buckets_updated += 1;
        }

        Ok(metadata)
    }

    async fn read(&self, bucket: BucketKey) -> Result<Vec<Event>> {
        let key = Self::bucket_path(bucket);
        match self.read_json::<Vec<RawEvent>>(&key).await? {
            Some(raw) => {
                let mut events = events_from_raw(raw, &key);
                sort_by_created(&mut events);
                Ok(events)
            }
            None => {
                log::debug!("No event bucket {}", key);
                Ok(Vec::new())
            }
        }
    }
}

#[async_trait]
impl WatermarkStore for LocalStorage {
    async fn load_watermark(&self, stream: Stream) -> Result<Option<Watermark>> {
        Ok(self.load_watermarks().await?.remove(stream.key()))
    }

    async fn save_watermark(&self, stream: Stream, watermark: &Watermark) -> Result<()> {
        let mut watermarks = self.load_watermarks().await?;
        watermarks.insert(stream.key().to_string(), watermark.clone());
        self.write_json(WATERMARKS_KEY, &watermarks).await
    }
}
