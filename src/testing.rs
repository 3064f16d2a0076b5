//! In-memory fakes of the remote collaborators, shared by unit tests.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use crate::error::{AppError, Result};
use crate::models::{Interpretation, ObjectKind, ObjectRef, Recipient, UserRef, UserSettings};
use crate::services::{MailMessage, MailTransport, RecordStore, UserDirectory};

/// A January 2024 instant.
pub fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, hour, 0, 0).unwrap()
}

pub fn recipient(id: &str, email: &str) -> Recipient {
    Recipient {
        id: id.to_string(),
        username: id.to_string(),
        display_name: format!("User {id}"),
        email: Some(email.to_string()),
        no_mention_notifications: false,
        no_newsletters: false,
    }
}

pub fn user_ref(id: &str) -> UserRef {
    UserRef {
        id: id.to_string(),
        display_name: format!("User {id}"),
        username: id.to_string(),
    }
}

/// An interpretation of a chart, as returned by dispatch-time fetches.
pub fn shared_interpretation(id: &str, author: &str, subscribers: &[&str]) -> Interpretation {
    let mut interpretation = Interpretation::new(id, format!("Text of {id}"), at(1, 0));
    interpretation.created = Some(at(1, 0));
    interpretation.user = Some(user_ref(author));
    interpretation.object = Some(ObjectRef {
        id: format!("obj-{id}"),
        name: format!("Chart {id}"),
        kind: ObjectKind::Chart,
        subscribers: subscribers.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
    });
    interpretation
}

#[derive(Default)]
struct SourceState {
    all: Vec<Interpretation>,
    changed: Vec<Interpretation>,
    shared: Vec<Interpretation>,
    since: Vec<NaiveDate>,
    requested_ids: Vec<Vec<String>>,
    fail: bool,
}

/// Record source serving canned snapshots.
#[derive(Default)]
pub struct FakeSource {
    state: Mutex<SourceState>,
}

impl FakeSource {
    /// Result of `fetch_all`.
    pub fn set_all(&self, interpretations: Vec<Interpretation>) {
        self.state.lock().unwrap().all = interpretations;
    }

    /// Result of `fetch_changed_since`.
    pub fn set_changed(&self, interpretations: Vec<Interpretation>) {
        self.state.lock().unwrap().changed = interpretations;
    }

    /// Records available to `fetch_by_ids`.
    pub fn set_shared(&self, interpretations: Vec<Interpretation>) {
        self.state.lock().unwrap().shared = interpretations;
    }

    pub fn fail(&self, fail: bool) {
        self.state.lock().unwrap().fail = fail;
    }

    pub fn since_dates(&self) -> Vec<NaiveDate> {
        self.state.lock().unwrap().since.clone()
    }

    pub fn requested_ids(&self) -> Vec<Vec<String>> {
        self.state.lock().unwrap().requested_ids.clone()
    }
}

#[async_trait]
impl RecordStore for FakeSource {
    async fn fetch_all(&self) -> Result<Vec<Interpretation>> {
        let state = self.state.lock().unwrap();
        if state.fail {
            return Err(AppError::source_fetch("interpretations", "unavailable"));
        }
        Ok(state.all.clone())
    }

    async fn fetch_changed_since(&self, date: NaiveDate) -> Result<Vec<Interpretation>> {
        let mut state = self.state.lock().unwrap();
        if state.fail {
            return Err(AppError::source_fetch("interpretations", "unavailable"));
        }
        state.since.push(date);
        Ok(state.changed.clone())
    }

    async fn fetch_by_ids(&self, ids: &[String]) -> Result<Vec<Interpretation>> {
        let mut state = self.state.lock().unwrap();
        if state.fail {
            return Err(AppError::source_fetch("interpretations", "unavailable"));
        }
        state.requested_ids.push(ids.to_vec());
        Ok(state
            .shared
            .iter()
            .filter(|i| ids.contains(&i.id))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct DirectoryState {
    users: HashMap<String, Recipient>,
    settings: HashMap<String, UserSettings>,
    settings_requests: Vec<String>,
    fail_settings: bool,
}

/// User directory backed by a map.
#[derive(Default)]
pub struct FakeDirectory {
    state: Mutex<DirectoryState>,
}

impl FakeDirectory {
    pub fn add_user(&self, user: Recipient) {
        self.state.lock().unwrap().users.insert(user.id.clone(), user);
    }

    pub fn set_settings(&self, username: &str, settings: UserSettings) {
        self.state
            .lock()
            .unwrap()
            .settings
            .insert(username.to_string(), settings);
    }

    pub fn fail_settings(&self, fail: bool) {
        self.state.lock().unwrap().fail_settings = fail;
    }

    pub fn settings_requests(&self) -> Vec<String> {
        self.state.lock().unwrap().settings_requests.clone()
    }
}

#[async_trait]
impl UserDirectory for FakeDirectory {
    async fn fetch_users(&self, ids: &[String]) -> Result<Vec<Recipient>> {
        let state = self.state.lock().unwrap();
        Ok(ids.iter().filter_map(|id| state.users.get(id).cloned()).collect())
    }

    async fn fetch_user_settings(&self, username: &str) -> Result<UserSettings> {
        let mut state = self.state.lock().unwrap();
        if state.fail_settings {
            return Err(AppError::source_fetch("userSettings", "unavailable"));
        }
        state.settings_requests.push(username.to_string());
        Ok(state.settings.get(username).cloned().unwrap_or_default())
    }
}

/// Mail transport recording every message; chosen addresses fail.
#[derive(Default)]
pub struct FakeMailer {
    sent: Mutex<Vec<MailMessage>>,
    failing: Mutex<HashSet<String>>,
}

impl FakeMailer {
    pub fn fail_for(&self, address: &str) {
        self.failing.lock().unwrap().insert(address.to_string());
    }

    pub fn recover(&self) {
        self.failing.lock().unwrap().clear();
    }

    pub fn sent(&self) -> Vec<MailMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, address: &str) -> Vec<MailMessage> {
        self.sent()
            .into_iter()
            .filter(|m| m.recipients.iter().any(|r| r == address))
            .collect()
    }
}

#[async_trait]
impl MailTransport for FakeMailer {
    async fn send(&self, message: &MailMessage) -> Result<()> {
        let failing = self.failing.lock().unwrap().clone();
        if let Some(address) = message.recipients.iter().find(|r| failing.contains(*r)) {
            return Err(AppError::transmission(address.clone(), "mailbox unavailable"));
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}
