//! Shared types for the RFID association gateway

use chrono::{DateTime, Utc};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Generate a new UUIDv7 (time-sortable) event id
pub fn new_event_id() -> String {
    Uuid::now_v7().to_string()
}

/// Get current epoch milliseconds
#[inline]
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Normalized RFID tag identifier (EPC with embedded whitespace stripped).
/// Immutable once produced by the classifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TagId(pub String);

impl TagId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for TagId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Semantic kind of a tag, derived solely from the normalized EPC length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    /// Long-form EPC on a physical load unit
    Pallet,
    /// Short-form EPC on a worker badge
    Operator,
    /// Any other length; logged and dropped
    Unknown,
}

impl TagKind {
    pub fn as_str(&self) -> &str {
        match self {
            TagKind::Pallet => "pallet",
            TagKind::Operator => "operator",
            TagKind::Unknown => "unknown",
        }
    }
}

/// Events consumed by the association engine.
///
/// Everything that can mutate pairing state flows through one bounded mpsc
/// channel with the engine as the single consumer; that channel is the
/// serialization boundary for the seen set, the pending set, and timer
/// bookkeeping.
#[derive(Debug)]
pub enum EngineEvent {
    /// A raw tag-report batch from the reader, EPCs in read order
    TagsReported(Vec<String>),
    /// A pallet's expiry timer elapsed; the engine re-checks pending
    /// membership before acting on it
    ExpiryElapsed(TagId),
    /// The reader link dropped; pending-flush behavior is policy-configurable
    LinkLost,
}

/// Terminal outcome for a pallet, emitted to the notification sink.
/// Exactly one of these is produced per registered pallet.
#[derive(Debug, Clone, PartialEq)]
pub enum AssociationEvent {
    /// An operator read paired with this pallet
    Completed { pallet: TagId, operator: TagId, ts: DateTime<Utc> },
    /// The pallet's wait window elapsed with no operator read
    Incomplete { pallet: TagId, ts: DateTime<Utc> },
}

impl AssociationEvent {
    pub fn kind_str(&self) -> &'static str {
        match self {
            AssociationEvent::Completed { .. } => "completed",
            AssociationEvent::Incomplete { .. } => "incomplete",
        }
    }

    pub fn pallet(&self) -> &TagId {
        match self {
            AssociationEvent::Completed { pallet, .. } => pallet,
            AssociationEvent::Incomplete { pallet, .. } => pallet,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_kind_as_str() {
        assert_eq!(TagKind::Pallet.as_str(), "pallet");
        assert_eq!(TagKind::Operator.as_str(), "operator");
        assert_eq!(TagKind::Unknown.as_str(), "unknown");
    }

    #[test]
    fn test_association_event_accessors() {
        let pallet = TagId("AAAABBBBCCCCDDDD".to_string());
        let operator = TagId("111122223333".to_string());
        let completed =
            AssociationEvent::Completed { pallet: pallet.clone(), operator, ts: Utc::now() };
        assert_eq!(completed.kind_str(), "completed");
        assert_eq!(completed.pallet(), &pallet);

        let incomplete = AssociationEvent::Incomplete { pallet: pallet.clone(), ts: Utc::now() };
        assert_eq!(incomplete.kind_str(), "incomplete");
        assert_eq!(incomplete.pallet(), &pallet);
    }
}
