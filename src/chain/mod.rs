//! Backward traversal of snapshot chains.
//!
//! Each snapshot names its predecessor by content identifier, forming a
//! singly linked list that is walked by hand. The `recent_versions`
//! shortcut is only ever a prefetch hint; the `previous_version` pointer is
//! ground truth.

mod cache;
mod walker;

pub use cache::ResolvedCache;
pub use walker::{merge_entries, ChainWalker, WalkOutcome, WalkStop};
