//! Pipeline entry points.
//!
//! - `SyncController`: detect changes and append them to the event log
//! - `Dispatcher`: deliver notifications or newsletters for logged events

pub mod compose;
pub mod diff;
pub mod dispatch;
pub mod eligibility;
pub mod resolve;
pub mod sync;
pub mod window;

pub use compose::{Composer, OutgoingMessage};
pub use diff::{DiffResult, calculate_diff};
pub use dispatch::{DispatchResult, Dispatcher};
pub use eligibility::{Ineligible, UserSettingsCache};
pub use resolve::{ResolvedBatch, ResolvedEvent};
pub use sync::{SyncController, SyncMode, SyncOptions, SyncReport};
pub use window::DispatchWindow;
