//! Snapshot construction.
//!
//! A snapshot is built as a pure function of the mutation, its field-level
//! changes and the latest known snapshot. Serialization is deterministic so
//! identical inputs always map to the same content identifier.

mod builder;
mod diff;

pub use builder::{build_snapshot, format_timestamp, BuiltSnapshot};
pub use diff::diff_fields;
