// src/lib.rs

//! Interpretation notifier library
//!
//! Detects new and edited interpretations and comments on a DHIS2 instance,
//! records them as events and e-mails subscribers about them.

pub mod error;
pub mod locale;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;

#[cfg(test)]
mod testing;
