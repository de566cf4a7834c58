//! Pallet/operator association engine
//!
//! The single serialization point for pairing correctness: every state
//! mutation (report batches, expiry timers, link-loss flushes) arrives as
//! an `EngineEvent` on one bounded mpsc channel and is processed by this
//! actor alone. Expiry timers are spawned sleep tasks that post back into
//! the same channel, so a timer firing can never interleave with a pairing
//! round; the still-pending check on arrival is the authoritative guard
//! against a timer that was aborted too late.

use crate::domain::types::{AssociationEvent, EngineEvent, TagId, TagKind};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::egress_channel::EgressSender;
use crate::services::classifier::TagClassifier;
use chrono::Utc;
use rustc_hash::FxHashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// A pallet tag awaiting operator pairing or expiry.
/// Created once per EPC ever seen; terminated exactly once.
struct PendingPallet {
    id: TagId,
    registered_at: Instant,
    /// Expiry timer task; aborted when the pallet terminates by pairing
    timer: JoinHandle<()>,
}

/// Association engine actor
pub struct Associator {
    classifier: TagClassifier,
    timeout: Duration,
    flush_on_link_loss: bool,
    /// Every pallet EPC observed this run. Never shrinks: an EPC that
    /// already terminated is a duplicate forever (seen-once-ever dedup).
    seen: FxHashSet<TagId>,
    /// Pallets awaiting pairing, in registration order (fan-out order)
    pending: Vec<PendingPallet>,
    /// Clone of the engine channel sender; expiry timers post back through it
    event_tx: mpsc::Sender<EngineEvent>,
    egress: EgressSender,
    metrics: Arc<Metrics>,
    accepting: bool,
}

impl Associator {
    pub fn new(
        config: &Config,
        event_tx: mpsc::Sender<EngineEvent>,
        egress: EgressSender,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            classifier: TagClassifier::new(config.pallet_id_len(), config.operator_id_len()),
            timeout: config.association_timeout(),
            flush_on_link_loss: config.flush_on_link_loss(),
            seen: FxHashSet::default(),
            pending: Vec::new(),
            event_tx,
            egress,
            metrics,
            accepting: true,
        }
    }

    /// Run the engine, consuming events until the channel closes or
    /// shutdown is signaled
    pub async fn run(
        &mut self,
        mut event_rx: mpsc::Receiver<EngineEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(
            timeout_ms = %self.timeout.as_millis(),
            flush_on_link_loss = %self.flush_on_link_loss,
            "associator_started"
        );

        loop {
            tokio::select! {
                event = event_rx.recv() => {
                    match event {
                        Some(e) => self.process_event(e),
                        None => break,
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.shutdown();
    }

    /// Process a single engine event, dispatching to the appropriate handler
    pub fn process_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::TagsReported(tags) => self.on_tags_reported(&tags),
            EngineEvent::ExpiryElapsed(id) => self.on_expiry_elapsed(id),
            EngineEvent::LinkLost => self.on_link_lost(),
        }
        self.metrics.set_pending_pallets(self.pending.len() as u64);
    }

    /// Process a raw report batch, tag by tag in read order
    pub fn on_tags_reported(&mut self, tags: &[String]) {
        if !self.accepting {
            debug!(count = %tags.len(), "report_after_shutdown_dropped");
            return;
        }

        self.metrics.record_batch(tags.len() as u64);

        for raw in tags {
            let (id, kind) = self.classifier.classify(raw);
            debug!(epc = %id, kind = %kind.as_str(), "tag_read");

            match kind {
                TagKind::Pallet => self.register_pallet(id),
                TagKind::Operator => self.pair_operator(id),
                TagKind::Unknown => {
                    self.metrics.record_unknown_tag();
                    debug!(epc = %id, len = %id.as_str().len(), "unknown_epc_skipped");
                }
            }
        }
    }

    /// Register a new pallet and start its expiry timer.
    /// Test-and-insert into the seen set suppresses duplicates.
    fn register_pallet(&mut self, id: TagId) {
        if !self.seen.insert(id.clone()) {
            self.metrics.record_duplicate_pallet();
            debug!(pallet = %id, "duplicate_pallet_ignored");
            return;
        }

        let timer = self.spawn_expiry_timer(id.clone());
        info!(pallet = %id, timeout_ms = %self.timeout.as_millis(), "pallet_registered");

        self.pending.push(PendingPallet { id, registered_at: Instant::now(), timer });
        self.metrics.record_pallet_registered();
    }

    fn spawn_expiry_timer(&self, id: TagId) -> JoinHandle<()> {
        let tx = self.event_tx.clone();
        let timeout = self.timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(EngineEvent::ExpiryElapsed(id)).await;
        })
    }

    /// Pair an operator read against every currently pending pallet.
    ///
    /// Fan-out: one operator scan clears the whole pending set, emitting one
    /// completed association per pallet in registration order. Pallets
    /// arriving after this round belong to the next operator read.
    fn pair_operator(&mut self, operator: TagId) {
        if self.pending.is_empty() {
            // Normal case, not an error: badge read with no active pallet
            debug!(operator = %operator, "operator_without_pending_pallets");
            return;
        }

        let round = std::mem::take(&mut self.pending);
        let ts = Utc::now();

        for pallet in round {
            pallet.timer.abort();
            let wait_ms = pallet.registered_at.elapsed().as_millis() as u64;
            info!(
                pallet = %pallet.id,
                operator = %operator,
                wait_ms = %wait_ms,
                "association_completed"
            );
            self.egress.send_association(AssociationEvent::Completed {
                pallet: pallet.id,
                operator: operator.clone(),
                ts,
            });
            self.metrics.record_association_completed();
        }
    }

    /// Handle an elapsed expiry timer. Only acts if the pallet is still
    /// pending; a message that raced a pairing (abort landed after the send)
    /// is discarded here, which is what makes the terminal transition
    /// exactly-once.
    fn on_expiry_elapsed(&mut self, id: TagId) {
        let Some(idx) = self.pending.iter().position(|p| p.id == id) else {
            if self.seen.contains(&id) {
                debug!(pallet = %id, "expiry_after_termination_ignored");
            } else {
                // A timer for a pallet that was never registered is a bug
                debug_assert!(false, "expiry for unregistered pallet {id}");
                error!(pallet = %id, "expiry_for_unregistered_pallet");
            }
            return;
        };

        let pallet = self.pending.remove(idx);
        let waited_ms = pallet.registered_at.elapsed().as_millis() as u64;
        info!(pallet = %pallet.id, waited_ms = %waited_ms, "association_timed_out");

        self.egress
            .send_association(AssociationEvent::Incomplete { pallet: pallet.id, ts: Utc::now() });
        self.metrics.record_association_incomplete();
    }

    /// Handle a reader link drop. The engine is reconnect-agnostic; whether
    /// pending pallets survive the outage is a configured policy.
    fn on_link_lost(&mut self) {
        if !self.flush_on_link_loss || self.pending.is_empty() {
            debug!(pending = %self.pending.len(), "link_lost_pending_kept");
            return;
        }

        warn!(pending = %self.pending.len(), "link_lost_flushing_pending");
        let flushed = std::mem::take(&mut self.pending);
        let ts = Utc::now();

        for pallet in flushed {
            pallet.timer.abort();
            self.egress
                .send_association(AssociationEvent::Incomplete { pallet: pallet.id, ts });
            self.metrics.record_association_incomplete();
        }
    }

    /// Cancel all outstanding timers and stop accepting reports. Idempotent.
    pub fn shutdown(&mut self) {
        if !self.accepting {
            return;
        }
        self.accepting = false;

        for pallet in self.pending.drain(..) {
            pallet.timer.abort();
        }
        self.metrics.set_pending_pallets(0);

        info!("associator_shutdown");
    }

    /// Number of pallets currently awaiting pairing
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::egress_channel::{create_egress_channel, AssociationPayload, EgressMessage};

    const PALLET_A: &str = "AAAAAAAAAAAAAAAA";
    const PALLET_B: &str = "CCCCCCCCCCCCCCCC";
    const OPERATOR: &str = "BBBBBBBBBBBB";

    fn test_associator(
        config: Config,
    ) -> (Associator, mpsc::Receiver<EngineEvent>, mpsc::Receiver<EgressMessage>) {
        let (event_tx, event_rx) = mpsc::channel(64);
        let (egress, egress_rx) = create_egress_channel(64, "test".to_string());
        let metrics = Arc::new(Metrics::new());
        (Associator::new(&config, event_tx, egress, metrics), event_rx, egress_rx)
    }

    fn batch(tags: &[&str]) -> Vec<String> {
        tags.iter().map(|t| t.to_string()).collect()
    }

    fn drain_associations(rx: &mut mpsc::Receiver<EgressMessage>) -> Vec<AssociationPayload> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            if let EgressMessage::Association(payload) = msg {
                out.push(payload);
            }
        }
        out
    }

    #[tokio::test]
    async fn test_pallet_then_operator_completes() {
        let (mut assoc, _event_rx, mut egress_rx) = test_associator(Config::default());

        assoc.on_tags_reported(&batch(&[PALLET_A]));
        assert_eq!(assoc.pending_count(), 1);

        assoc.on_tags_reported(&batch(&[OPERATOR]));
        assert_eq!(assoc.pending_count(), 0);

        let events = drain_associations(&mut egress_rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].t, "completed");
        assert_eq!(events[0].pallet, PALLET_A);
        assert_eq!(events[0].operator.as_deref(), Some(OPERATOR));
    }

    #[tokio::test]
    async fn test_operator_with_no_pending_is_noop() {
        let (mut assoc, _event_rx, mut egress_rx) = test_associator(Config::default());

        assoc.on_tags_reported(&batch(&[OPERATOR]));

        assert_eq!(assoc.pending_count(), 0);
        assert!(drain_associations(&mut egress_rx).is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_pallet_registered_once() {
        let (mut assoc, _event_rx, mut egress_rx) = test_associator(Config::default());

        assoc.on_tags_reported(&batch(&[PALLET_A]));
        assoc.on_tags_reported(&batch(&[PALLET_A]));
        assert_eq!(assoc.pending_count(), 1);

        assoc.on_tags_reported(&batch(&[OPERATOR]));
        let events = drain_associations(&mut egress_rx);
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_fanout_clears_all_pending() {
        let (mut assoc, _event_rx, mut egress_rx) = test_associator(Config::default());

        assoc.on_tags_reported(&batch(&[PALLET_A, PALLET_B]));
        assert_eq!(assoc.pending_count(), 2);

        assoc.on_tags_reported(&batch(&[OPERATOR]));
        assert_eq!(assoc.pending_count(), 0);

        let events = drain_associations(&mut egress_rx);
        assert_eq!(events.len(), 2);
        // Registration order is preserved in the fan-out round
        assert_eq!(events[0].pallet, PALLET_A);
        assert_eq!(events[1].pallet, PALLET_B);
        for e in &events {
            assert_eq!(e.t, "completed");
            assert_eq!(e.operator.as_deref(), Some(OPERATOR));
        }
    }

    #[tokio::test]
    async fn test_unknown_length_is_state_free() {
        let (mut assoc, _event_rx, mut egress_rx) = test_associator(Config::default());

        assoc.on_tags_reported(&batch(&["AABBCCDD"]));

        assert_eq!(assoc.pending_count(), 0);
        assert!(assoc.seen.is_empty());
        assert!(drain_associations(&mut egress_rx).is_empty());
    }

    #[tokio::test]
    async fn test_expiry_emits_incomplete() {
        let (mut assoc, _event_rx, mut egress_rx) = test_associator(Config::default());

        assoc.on_tags_reported(&batch(&[PALLET_A]));
        assoc.process_event(EngineEvent::ExpiryElapsed(TagId(PALLET_A.to_string())));

        assert_eq!(assoc.pending_count(), 0);
        let events = drain_associations(&mut egress_rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].t, "incomplete");
        assert_eq!(events[0].pallet, PALLET_A);
        assert!(events[0].operator.is_none());
    }

    #[tokio::test]
    async fn test_stale_expiry_after_pairing_is_ignored() {
        let (mut assoc, _event_rx, mut egress_rx) = test_associator(Config::default());

        assoc.on_tags_reported(&batch(&[PALLET_A]));
        assoc.on_tags_reported(&batch(&[OPERATOR]));

        // The timer message was already in flight when the pairing aborted it
        assoc.process_event(EngineEvent::ExpiryElapsed(TagId(PALLET_A.to_string())));

        let events = drain_associations(&mut egress_rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].t, "completed");
    }

    #[tokio::test]
    async fn test_terminated_pallet_is_not_resurrected() {
        let (mut assoc, _event_rx, mut egress_rx) = test_associator(Config::default());

        assoc.on_tags_reported(&batch(&[PALLET_A]));
        assoc.process_event(EngineEvent::ExpiryElapsed(TagId(PALLET_A.to_string())));
        drain_associations(&mut egress_rx);

        // Seen-once-ever: a terminated EPC reappearing is a duplicate
        assoc.on_tags_reported(&batch(&[PALLET_A]));
        assert_eq!(assoc.pending_count(), 0);
        assert!(drain_associations(&mut egress_rx).is_empty());
    }

    #[tokio::test]
    async fn test_operator_before_pallet_in_batch_does_not_pair() {
        let (mut assoc, _event_rx, mut egress_rx) = test_associator(Config::default());

        // Batch order matters: the operator is processed first, against an
        // empty pending set
        assoc.on_tags_reported(&batch(&[OPERATOR, PALLET_A]));

        assert_eq!(assoc.pending_count(), 1);
        assert!(drain_associations(&mut egress_rx).is_empty());
    }

    #[tokio::test]
    async fn test_link_lost_flush_policy_enabled() {
        let config = Config::default().with_flush_on_link_loss(true);
        let (mut assoc, _event_rx, mut egress_rx) = test_associator(config);

        assoc.on_tags_reported(&batch(&[PALLET_A, PALLET_B]));
        assoc.process_event(EngineEvent::LinkLost);

        assert_eq!(assoc.pending_count(), 0);
        let events = drain_associations(&mut egress_rx);
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.t == "incomplete"));
    }

    #[tokio::test]
    async fn test_link_lost_default_keeps_pending() {
        let (mut assoc, _event_rx, mut egress_rx) = test_associator(Config::default());

        assoc.on_tags_reported(&batch(&[PALLET_A]));
        assoc.process_event(EngineEvent::LinkLost);

        assert_eq!(assoc.pending_count(), 1);
        assert!(drain_associations(&mut egress_rx).is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_stops_intake() {
        let (mut assoc, _event_rx, mut egress_rx) = test_associator(Config::default());

        assoc.on_tags_reported(&batch(&[PALLET_A]));
        assoc.shutdown();
        assoc.shutdown();

        assert_eq!(assoc.pending_count(), 0);

        assoc.on_tags_reported(&batch(&[PALLET_B]));
        assert_eq!(assoc.pending_count(), 0);
        assert!(drain_associations(&mut egress_rx).is_empty());
    }

    #[tokio::test]
    async fn test_whitespace_in_epc_is_normalized() {
        let (mut assoc, _event_rx, mut egress_rx) = test_associator(Config::default());

        assoc.on_tags_reported(&batch(&["AAAA AAAA AAAA AAAA"]));
        assert_eq!(assoc.pending_count(), 1);

        assoc.on_tags_reported(&batch(&[OPERATOR]));
        let events = drain_associations(&mut egress_rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].pallet, PALLET_A);
    }
}
