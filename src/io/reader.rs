//! RFID reader link monitor
//!
//! Maintains the TCP link to the tag scanner and forwards report batches to
//! the association engine. The link lifecycle is an explicit state machine
//! (idle -> connected -> reconnecting -> connected) owned here; the engine
//! never sees reconnect mechanics, only `LinkLost` events.
//!
//! Line protocol (newline-delimited UTF-8):
//! - `TAGS <epc> [<epc> ...]` - one report batch, EPCs in read order
//! - `KEEPALIVE` - link keepalive, logged and counted

use crate::domain::types::EngineEvent;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Commands from the control surface
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReaderCommand {
    Start,
    Stop,
}

/// Current reader link state, published for the control status endpoint
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LinkState {
    Idle,
    Connected,
    Reconnecting,
}

impl LinkState {
    pub fn as_str(&self) -> &str {
        match self {
            LinkState::Idle => "idle",
            LinkState::Connected => "connected",
            LinkState::Reconnecting => "reconnecting",
        }
    }
}

/// Why the read loop returned
enum LoopExit {
    /// Stop command received; back to idle
    Stopped,
    /// Shutdown signal; monitor exits
    Shutdown,
    /// Connection failed; reconnect after delay
    LinkLost,
}

pub struct ReaderMonitor {
    addr: String,
    reconnect_delay: Duration,
    auto_start: bool,
    event_tx: mpsc::Sender<EngineEvent>,
    cmd_rx: mpsc::Receiver<ReaderCommand>,
    link_state: Arc<RwLock<LinkState>>,
    metrics: Arc<Metrics>,
    /// Rate-limits channel-full warnings to one per second
    last_drop_warn: Instant,
}

impl ReaderMonitor {
    pub fn new(
        config: &Config,
        event_tx: mpsc::Sender<EngineEvent>,
        cmd_rx: mpsc::Receiver<ReaderCommand>,
        link_state: Arc<RwLock<LinkState>>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            addr: config.reader_addr(),
            reconnect_delay: config.reader_reconnect_delay(),
            auto_start: config.reader_auto_start(),
            event_tx,
            cmd_rx,
            link_state,
            metrics,
            last_drop_warn: Instant::now() - Duration::from_secs(2),
        }
    }

    fn set_link_state(&self, state: LinkState) {
        *self.link_state.write() = state;
    }

    /// Run the monitor until shutdown
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            addr = %self.addr,
            auto_start = %self.auto_start,
            reconnect_delay_ms = %self.reconnect_delay.as_millis(),
            "reader_monitor_started"
        );

        let mut running = self.auto_start;

        loop {
            if !running {
                self.set_link_state(LinkState::Idle);
                tokio::select! {
                    cmd = self.cmd_rx.recv() => {
                        match cmd {
                            Some(ReaderCommand::Start) => {
                                info!(addr = %self.addr, "reader_start_requested");
                                running = true;
                            }
                            Some(ReaderCommand::Stop) => {
                                debug!("reader_stop_while_idle");
                            }
                            None => return,
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            return;
                        }
                    }
                }
                continue;
            }

            match TcpStream::connect(&self.addr).await {
                Ok(stream) => {
                    info!(addr = %self.addr, "reader_connected");
                    self.set_link_state(LinkState::Connected);

                    match self.read_loop(stream, &mut shutdown).await {
                        LoopExit::Stopped => {
                            info!(addr = %self.addr, "reader_stopped");
                            running = false;
                        }
                        LoopExit::Shutdown => return,
                        LoopExit::LinkLost => {
                            warn!(
                                addr = %self.addr,
                                retry_ms = %self.reconnect_delay.as_millis(),
                                "reader_link_lost"
                            );
                            self.metrics.record_link_drop();
                            let _ = self.event_tx.try_send(EngineEvent::LinkLost);

                            if !self.wait_before_reconnect(&mut shutdown).await {
                                running = false;
                            }
                        }
                    }
                }
                Err(e) => {
                    error!(addr = %self.addr, error = %e, "reader_connect_failed");
                    if !self.wait_before_reconnect(&mut shutdown).await {
                        running = false;
                    }
                }
            }

            if running && *shutdown.borrow() {
                return;
            }
        }
    }

    /// Sleep out the reconnect delay, still honoring stop commands and
    /// shutdown. Returns false if a stop command arrived (back to idle);
    /// the caller re-checks the shutdown flag.
    async fn wait_before_reconnect(&mut self, shutdown: &mut watch::Receiver<bool>) -> bool {
        self.set_link_state(LinkState::Reconnecting);

        tokio::select! {
            _ = tokio::time::sleep(self.reconnect_delay) => true,
            cmd = self.cmd_rx.recv() => {
                match cmd {
                    Some(ReaderCommand::Stop) | None => false,
                    Some(ReaderCommand::Start) => true,
                }
            }
            _ = shutdown.changed() => true,
        }
    }

    /// Consume lines from an established connection until it drops, a stop
    /// command arrives, or shutdown is signaled
    async fn read_loop(
        &mut self,
        stream: TcpStream,
        shutdown: &mut watch::Receiver<bool>,
    ) -> LoopExit {
        let reader = BufReader::new(stream);
        let mut lines = reader.lines();

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => self.handle_line(line.trim()),
                        Ok(None) => return LoopExit::LinkLost,
                        Err(e) => {
                            warn!(error = %e, "reader_read_error");
                            return LoopExit::LinkLost;
                        }
                    }
                }
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(ReaderCommand::Stop) => return LoopExit::Stopped,
                        Some(ReaderCommand::Start) => {
                            debug!("reader_start_while_connected");
                        }
                        None => return LoopExit::Shutdown,
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return LoopExit::Shutdown;
                    }
                }
            }
        }
    }

    fn handle_line(&mut self, line: &str) {
        if let Some(rest) = line.strip_prefix("TAGS") {
            let tags: Vec<String> = rest.split_whitespace().map(str::to_string).collect();
            if tags.is_empty() {
                debug!("empty_tag_report");
                return;
            }

            debug!(count = %tags.len(), "tag_report_received");

            match self.event_tx.try_send(EngineEvent::TagsReported(tags)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.metrics.record_report_dropped();
                    if self.last_drop_warn.elapsed() > Duration::from_secs(1) {
                        warn!("tag_report_dropped: engine channel full");
                        self.last_drop_warn = Instant::now();
                    }
                }
                Err(TrySendError::Closed(_)) => {
                    warn!("tag_report_channel_closed");
                }
            }
        } else if line == "KEEPALIVE" {
            self.metrics.record_keepalive();
            debug!(addr = %self.addr, "keepalive_received");
        } else if !line.is_empty() {
            debug!(line = %line, "reader_unknown_line");
        }
    }
}
