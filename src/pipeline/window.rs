//! Dispatch time window.

use chrono::{DateTime, Duration, Utc};

use crate::models::BucketKey;

/// Half-open interval `[start, end)` of event creation times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DispatchWindow {
    /// Window ending now, starting at the last success but no earlier than `now - max_window`.
    pub fn compute(
        last_success: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        max_window: Duration,
    ) -> Self {
        let earliest = now
            .checked_sub_signed(max_window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let start = match last_success {
            Some(last) => last.max(earliest),
            None => earliest,
        };
        Self { start, end: now }
    }

    pub fn contains(&self, at: &DateTime<Utc>) -> bool {
        self.start <= *at && *at < self.end
    }

    /// Month buckets overlapping the window.
    pub fn buckets(&self) -> Vec<BucketKey> {
        BucketKey::range(&self.start, &self.end)
    }
}
