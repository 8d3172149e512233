//! Time-span tracking engine for the Open Worklog client.
//!
//! The remote record store owns the data; this crate keeps a faithful local
//! mirror of it. Sessions, interval edits, and merges are dispatched to the
//! store and the cache settles on whatever the store answers.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::commands::AppState;
pub use application::editor::TimelineEditor;
pub use application::mutation::SpanMutationCoordinator;
pub use application::session::SessionService;
pub use domain::models::{EntryId, SpanBounds, SpanId, TimeSpan};
pub use infrastructure::error::InfraError;
pub use infrastructure::worklog_client::{ReqwestWorklogClient, WorklogClient};
