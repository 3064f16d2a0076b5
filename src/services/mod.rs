//! Service layer: the remote source, mail delivery and message rendering.
//!
//! - `RecordStore` / `UserDirectory`: remote data (`DhisClient`)
//! - `MailTransport`: outbound mail (`SmtpMailer`)
//! - `Renderer`: message bodies (`TextRenderer`)

mod api;
mod mailer;
mod render;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::Result;
use crate::models::{Interpretation, Recipient, UserSettings};

pub use api::DhisClient;
#[cfg(feature = "smtp")]
pub use mailer::SmtpMailer;
pub use mailer::{MailMessage, MailTransport};
pub use render::{Digest, DigestEntry, RenderContext, RenderedMail, Renderer, TextRenderer};

/// Remote source of interpretations.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Every interpretation with its comments.
    async fn fetch_all(&self) -> Result<Vec<Interpretation>>;

    /// Interpretations updated on or after `date`.
    async fn fetch_changed_since(&self, date: NaiveDate) -> Result<Vec<Interpretation>>;

    /// Interpretations with authors, objects and subscribers, for the given ids.
    ///
    /// Unknown ids are left out of the result.
    async fn fetch_by_ids(&self, ids: &[String]) -> Result<Vec<Interpretation>>;
}

/// Remote user profiles and settings.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Profiles of the given users; unknown ids are left out.
    async fn fetch_users(&self, ids: &[String]) -> Result<Vec<Recipient>>;

    async fn fetch_user_settings(&self, username: &str) -> Result<UserSettings>;
}
