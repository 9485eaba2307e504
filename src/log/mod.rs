//! Log Module
//!
//! Log entry types and the in-memory append-only store every node wraps.

pub mod entry;
mod store;

pub use entry::{EntryId, LogEntry, Payload};
pub use store::LogStore;
