// src/models/mod.rs

//! Domain models for the notifier.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod event;
mod object_kind;
mod record;
mod user;
mod watermark;

// Re-export all public types
pub use config::{
    ApiConfig, ChannelConfig, Config, DispatchConfig, MailConfig, PathsConfig, SmtpConfig,
};
pub use event::{BucketKey, Event, EventKind, EventModel, EventTarget, RawEvent, events_from_raw};
pub use object_kind::ObjectKind;
pub use record::{Comment, Interpretation, ObjectRef, UserRef, source_time};
pub use user::{Recipient, UserSettings};
pub use watermark::{Channel, Stream, Watermark, Watermarks};
