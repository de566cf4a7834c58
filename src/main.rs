//! RFID association gateway
//!
//! Correlates pallet tags (long EPC) with operator badges (short EPC)
//! streamed from a fixed-rate RFID scanner, and publishes association
//! events over MQTT.
//!
//! Module structure:
//! - `domain/` - Core types (TagId, TagKind, AssociationEvent)
//! - `io/` - External interfaces (reader link, MQTT egress, control HTTP)
//! - `services/` - Business logic (classifier, association engine)
//! - `infra/` - Infrastructure (config, metrics, embedded broker)

use clap::Parser;
use parking_lot::RwLock;
use rfid_gateway::infra::{broker, Config, Metrics};
use rfid_gateway::io::{
    create_egress_channel, start_control_server, ControlContext, LinkState, MqttPublisher,
    ReaderMonitor,
};
use rfid_gateway::services::Associator;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// RFID association gateway - pallet/operator pairing over MQTT
#[derive(Parser, Debug)]
#[command(name = "rfid-gateway", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Config is loaded before logging so the configured level can seed the
    // default filter; RUST_LOG always wins.
    let config = Config::load_from_path(&args.config);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level().filter_directive()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(version = %env!("CARGO_PKG_VERSION"), git = %env!("GIT_HASH"), "rfid-gateway starting");

    info!(
        config_file = %config.config_file(),
        reader_addr = %config.reader_addr(),
        auto_start = %config.reader_auto_start(),
        timeout_ms = %config.association_timeout().as_millis(),
        pallet_id_len = %config.pallet_id_len(),
        operator_id_len = %config.operator_id_len(),
        flush_on_link_loss = %config.flush_on_link_loss(),
        control_port = %config.control_port(),
        mqtt_egress = %config.mqtt_egress_enabled(),
        "config_loaded"
    );

    // Embedded broker so observers can subscribe without external infra
    broker::start_embedded_broker(&config);

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let metrics = Arc::new(Metrics::new());

    // Engine event channel (bounded for backpressure); the engine is the
    // single consumer, sources and expiry timers are producers
    let (event_tx, event_rx) = mpsc::channel(1000);

    // Egress channel and MQTT publisher
    let (egress_sender, egress_rx) = create_egress_channel(1000, config.site_id().to_string());
    if config.mqtt_egress_enabled() {
        let publisher = MqttPublisher::new(&config, egress_rx);
        let publisher_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            publisher.run(publisher_shutdown).await;
        });

        // Periodic metrics snapshots to MQTT
        let metrics_egress = egress_sender.clone();
        let metrics_for_egress = metrics.clone();
        let egress_interval = config.mqtt_egress_metrics_interval_secs();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(egress_interval));
            loop {
                interval.tick().await;
                metrics_egress.send_metrics(metrics_for_egress.report());
            }
        });
    } else {
        // Keep the channel drained so senders stay non-blocking
        let mut egress_rx = egress_rx;
        tokio::spawn(async move {
            while egress_rx.recv().await.is_some() {}
        });
        info!("mqtt_egress_disabled");
    }

    // Reader link monitor
    let (reader_cmd_tx, reader_cmd_rx) = mpsc::channel(8);
    let link_state = Arc::new(RwLock::new(LinkState::Idle));
    let reader_monitor = ReaderMonitor::new(
        &config,
        event_tx.clone(),
        reader_cmd_rx,
        link_state.clone(),
        metrics.clone(),
    );
    let reader_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        reader_monitor.run(reader_shutdown).await;
    });

    // Control HTTP surface
    let control_ctx = Arc::new(ControlContext {
        reader_cmd_tx,
        egress: egress_sender.clone(),
        metrics: metrics.clone(),
        link_state,
        site_id: config.site_id().to_string(),
    });
    let control_port = config.control_port();
    let control_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) = start_control_server(control_port, control_ctx, control_shutdown).await {
            tracing::error!(error = %e, "control_server_error");
        }
    });

    // Metrics reporter (periodic summary log)
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    // Handle shutdown on Ctrl+C
    let shutdown_signal = shutdown_tx;
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_signal.send(true);
    });

    // Run the association engine - consumes events until shutdown
    let mut associator = Associator::new(&config, event_tx, egress_sender, metrics);
    info!("associator_running");
    associator.run(event_rx, shutdown_rx).await;

    info!("rfid-gateway shutdown complete");
    Ok(())
}
