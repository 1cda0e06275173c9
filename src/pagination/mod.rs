//! Page-addressable views over an entity's history.
//!
//! A [`HistoryService`] owns the shared clients and the resolved-entry cache
//! and hands out one [`HistorySession`] per entity. Sessions move through
//! `Idle -> Loading -> Ready`, with `Loading -> Error` on an unrecoverable
//! failure; a new page request supersedes (and cancels) the one in flight.

mod service;
mod session;

pub use service::HistoryService;
pub use session::{HistorySession, SessionState};
