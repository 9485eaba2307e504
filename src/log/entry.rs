//! Log Entry Types
//!
//! Defines the structure of entries appended to the log and replicated
//! across nodes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ordinal entry identifier, assigned densely by the master starting at 0
pub type EntryId = u64;

/// Opaque key/value payload carried by an entry
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// A single log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Ordinal assigned by the master
    pub id: EntryId,
    /// Client payload
    pub payload: Payload,
    /// Node that allocated the entry
    #[serde(default)]
    pub origin_node_id: String,
    /// Allocation time on the master
    pub created_at: DateTime<Utc>,
    /// Write concern requested by the client (not stored)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_concern: Option<usize>,
}

impl LogEntry {
    /// Create a new entry stamped with the current time
    pub fn new(id: EntryId, payload: Payload, origin_node_id: impl Into<String>) -> Self {
        Self {
            id,
            payload,
            origin_node_id: origin_node_id.into(),
            created_at: Utc::now(),
            write_concern: None,
        }
    }

    /// Attach the write concern a client asked for
    pub fn with_write_concern(mut self, w: usize) -> Self {
        self.write_concern = Some(w);
        self
    }

    /// Build a payload holding a single `msg` field
    pub fn message_payload(msg: impl Into<String>) -> Payload {
        let mut payload = Payload::new();
        payload.insert("msg".to_string(), serde_json::Value::String(msg.into()));
        payload
    }
}

// Equality ignores the request-scoped write concern so the same entry
// compares equal on every node that stored it.
impl PartialEq for LogEntry {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.payload == other.payload
            && self.origin_node_id == other.origin_node_id
            && self.created_at == other.created_at
    }
}

impl Eq for LogEntry {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_ignores_write_concern() {
        let entry = LogEntry::new(3, LogEntry::message_payload("x"), "master");
        let with_w = entry.clone().with_write_concern(3);
        assert_eq!(entry, with_w);

        let mut other = entry.clone();
        other.payload = LogEntry::message_payload("y");
        assert_ne!(entry, other);
    }

    #[test]
    fn test_json_shape() {
        let entry = LogEntry::new(0, LogEntry::message_payload("hello"), "node-1");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["id"], 0);
        assert_eq!(json["payload"]["msg"], "hello");
        assert_eq!(json["origin_node_id"], "node-1");
        assert!(json.get("write_concern").is_none());

        let parsed: LogEntry = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, entry);
    }
}
