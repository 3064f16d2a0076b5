//! Utility functions and helpers.

use chrono::{DateTime, Utc};
use url::Url;

use crate::error::Result;

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock frozen at a given instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Base URL without trailing slashes, so paths can be appended with `/`.
pub fn trim_base(base_url: &str) -> &str {
    base_url.trim_end_matches('/')
}

/// Join a relative path onto a base URL string.
pub fn join_path(base_url: &str, path: &str) -> String {
    format!("{}/{}", trim_base(base_url), path.trim_start_matches('/'))
}

/// Build an API endpoint URL under `{base}/api/`.
pub fn api_url(base_url: &str, endpoint: &str) -> Result<Url> {
    let base = Url::parse(&format!("{}/api/", trim_base(base_url)))?;
    Ok(base.join(endpoint.trim_start_matches('/'))?)
}
