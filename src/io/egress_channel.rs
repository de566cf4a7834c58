//! Typed channel for egress messages
//!
//! Decouples the association engine from the MQTT publisher: the engine
//! enqueues with a non-blocking try_send and never touches the network.
//! Delivery is at-most-once, best-effort: if the channel is full the
//! message is dropped.

use crate::domain::types::{epoch_ms, new_event_id, AssociationEvent};
use crate::infra::metrics::MetricsSummary;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

/// Messages that can be sent to the MQTT publisher
#[derive(Debug)]
pub enum EgressMessage {
    /// Pallet/operator association outcome
    Association(AssociationPayload),
    /// Periodic metrics snapshot
    Metrics(MetricsPayload),
}

/// Outbound association record
#[derive(Debug, Clone, Serialize)]
pub struct AssociationPayload {
    /// Site identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    /// Event id (UUIDv7, time-sortable)
    pub id: String,
    /// Outcome: "completed" or "incomplete"
    pub t: String,
    /// Pallet EPC
    pub pallet: String,
    /// Operator EPC; absent for incomplete associations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    /// Emission timestamp (UTC)
    pub ts: DateTime<Utc>,
    /// Origin of the record: "engine" or "manual"
    pub src: String,
}

impl AssociationPayload {
    /// Build a payload from an engine-produced event
    pub fn from_event(event: AssociationEvent) -> Self {
        match event {
            AssociationEvent::Completed { pallet, operator, ts } => Self {
                site: None,
                id: new_event_id(),
                t: "completed".to_string(),
                pallet: pallet.into_string(),
                operator: Some(operator.into_string()),
                ts,
                src: "engine".to_string(),
            },
            AssociationEvent::Incomplete { pallet, ts } => Self {
                site: None,
                id: new_event_id(),
                t: "incomplete".to_string(),
                pallet: pallet.into_string(),
                operator: None,
                ts,
                src: "engine".to_string(),
            },
        }
    }

    /// Build a manually injected association (control surface bypass)
    pub fn manual(pallet: String, operator: String, ts: DateTime<Utc>) -> Self {
        Self {
            site: None,
            id: new_event_id(),
            t: "completed".to_string(),
            pallet,
            operator: Some(operator),
            ts,
            src: "manual".to_string(),
        }
    }
}

/// Payload for metrics snapshots
#[derive(Debug, Serialize)]
pub struct MetricsPayload {
    pub site: String,
    /// Timestamp (epoch ms)
    pub ts: u64,
    pub tags_total: u64,
    pub tags_per_sec: f64,
    pub batches_total: u64,
    pub unknown_tags_total: u64,
    pub duplicate_pallets_total: u64,
    pub pallets_registered_total: u64,
    pub completed_total: u64,
    pub incomplete_total: u64,
    pub manual_total: u64,
    pub reports_dropped_total: u64,
    pub keepalives_total: u64,
    pub link_drops_total: u64,
    pub pending_pallets: u64,
}

impl MetricsPayload {
    pub fn from_summary(summary: MetricsSummary, site: String) -> Self {
        Self {
            site,
            ts: epoch_ms(),
            tags_total: summary.tags_total,
            tags_per_sec: summary.tags_per_sec,
            batches_total: summary.batches_total,
            unknown_tags_total: summary.unknown_tags_total,
            duplicate_pallets_total: summary.duplicate_pallets_total,
            pallets_registered_total: summary.pallets_registered_total,
            completed_total: summary.completed_total,
            incomplete_total: summary.incomplete_total,
            manual_total: summary.manual_total,
            reports_dropped_total: summary.reports_dropped_total,
            keepalives_total: summary.keepalives_total,
            link_drops_total: summary.link_drops_total,
            pending_pallets: summary.pending_pallets,
        }
    }
}

/// Sender handle for egress messages
///
/// Clone this to share across multiple producers.
/// Non-blocking - if the channel is full, messages are dropped.
#[derive(Clone)]
pub struct EgressSender {
    tx: mpsc::Sender<EgressMessage>,
    site_id: String,
}

impl EgressSender {
    pub fn new(tx: mpsc::Sender<EgressMessage>, site_id: String) -> Self {
        Self { tx, site_id }
    }

    /// Send an engine-produced association event. Non-blocking: the engine
    /// enqueues and moves on.
    pub fn send_association(&self, event: AssociationEvent) {
        self.send_payload(AssociationPayload::from_event(event));
    }

    /// Send a pre-built association payload (manual injection path).
    /// Injects site_id into the payload.
    pub fn send_payload(&self, mut payload: AssociationPayload) {
        payload.site = Some(self.site_id.clone());
        let _ = self.tx.try_send(EgressMessage::Association(payload));
    }

    /// Send a metrics snapshot
    pub fn send_metrics(&self, summary: MetricsSummary) {
        let payload = MetricsPayload::from_summary(summary, self.site_id.clone());
        let _ = self.tx.try_send(EgressMessage::Metrics(payload));
    }
}

/// Create a new egress channel pair
///
/// Returns (sender, receiver) where the sender can be cloned and shared.
/// site_id is stamped onto every association payload for downstream
/// consumers.
pub fn create_egress_channel(
    buffer_size: usize,
    site_id: String,
) -> (EgressSender, mpsc::Receiver<EgressMessage>) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (EgressSender::new(tx, site_id), rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::TagId;

    #[test]
    fn test_association_payload_from_completed() {
        let event = AssociationEvent::Completed {
            pallet: TagId("AAAABBBBCCCCDDDD".to_string()),
            operator: TagId("111122223333".to_string()),
            ts: Utc::now(),
        };
        let payload = AssociationPayload::from_event(event);
        assert_eq!(payload.t, "completed");
        assert_eq!(payload.pallet, "AAAABBBBCCCCDDDD");
        assert_eq!(payload.operator.as_deref(), Some("111122223333"));
        assert_eq!(payload.src, "engine");
        assert!(!payload.id.is_empty());
    }

    #[test]
    fn test_incomplete_payload_omits_operator() {
        let event = AssociationEvent::Incomplete {
            pallet: TagId("AAAABBBBCCCCDDDD".to_string()),
            ts: Utc::now(),
        };
        let payload = AssociationPayload::from_event(event);
        assert_eq!(payload.t, "incomplete");
        assert!(payload.operator.is_none());

        let json = serde_json::to_string(&payload).unwrap();
        assert!(!json.contains("operator"));
    }

    #[tokio::test]
    async fn test_sender_injects_site_id() {
        let (sender, mut rx) = create_egress_channel(4, "site-a".to_string());
        sender.send_payload(AssociationPayload::manual(
            "AAAABBBBCCCCDDDD".to_string(),
            "111122223333".to_string(),
            Utc::now(),
        ));

        match rx.recv().await.unwrap() {
            EgressMessage::Association(payload) => {
                assert_eq!(payload.site.as_deref(), Some("site-a"));
                assert_eq!(payload.src, "manual");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }
}
