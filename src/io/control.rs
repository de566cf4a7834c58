//! Control HTTP surface
//!
//! Thin administrative API over hyper:
//! - POST /reader/start, /reader/stop - reader lifecycle commands
//! - POST /associations - manual association injection (bypasses the engine)
//! - GET /status - reader link state
//! - GET /metrics - Prometheus text exposition
//! - GET /health - liveness probe
//!
//! Validation stops at this boundary: a malformed injection request is
//! rejected with 400 and never reaches the engine or the sink.

use crate::infra::metrics::Metrics;
use crate::io::egress_channel::{AssociationPayload, EgressSender};
use crate::io::reader::{LinkState, ReaderCommand};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http_body_util::{BodyExt, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use parking_lot::RwLock;
use serde::Deserialize;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

/// Shared handles the control endpoints act on
pub struct ControlContext {
    pub reader_cmd_tx: mpsc::Sender<ReaderCommand>,
    pub egress: EgressSender,
    pub metrics: Arc<Metrics>,
    pub link_state: Arc<RwLock<LinkState>>,
    pub site_id: String,
}

/// Manual association injection request body
#[derive(Debug, Deserialize)]
struct ManualAssociation {
    pallet: String,
    operator: String,
    /// Optional; defaults to time of receipt
    #[serde(default)]
    ts: Option<DateTime<Utc>>,
}

fn json_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .expect("static response should not fail")
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(body)))
        .expect("static response should not fail")
}

/// Forward a reader command, reporting channel failure as 503
fn send_reader_command(ctx: &ControlContext, cmd: ReaderCommand) -> Response<Full<Bytes>> {
    match ctx.reader_cmd_tx.try_send(cmd) {
        Ok(()) => {
            info!(cmd = ?cmd, "reader_command_accepted");
            json_response(StatusCode::OK, r#"{"ok":true}"#.to_string())
        }
        Err(e) => {
            error!(error = %e, "reader_command_rejected");
            json_response(
                StatusCode::SERVICE_UNAVAILABLE,
                r#"{"ok":false,"error":"reader_unavailable"}"#.to_string(),
            )
        }
    }
}

/// Validate and publish a manual association
fn inject_association(ctx: &ControlContext, body: &[u8]) -> Response<Full<Bytes>> {
    let request: ManualAssociation = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "manual_association_malformed");
            return json_response(
                StatusCode::BAD_REQUEST,
                r#"{"ok":false,"error":"invalid_json"}"#.to_string(),
            );
        }
    };

    let pallet = request.pallet.trim();
    let operator = request.operator.trim();
    if pallet.is_empty() || operator.is_empty() {
        warn!("manual_association_missing_fields");
        return json_response(
            StatusCode::BAD_REQUEST,
            r#"{"ok":false,"error":"pallet and operator are required"}"#.to_string(),
        );
    }

    let ts = request.ts.unwrap_or_else(Utc::now);
    let payload = AssociationPayload::manual(pallet.to_string(), operator.to_string(), ts);
    let id = payload.id.clone();

    info!(pallet = %pallet, operator = %operator, id = %id, "manual_association_published");
    ctx.egress.send_payload(payload);
    ctx.metrics.record_manual_injection();

    json_response(StatusCode::OK, format!(r#"{{"ok":true,"id":"{}"}}"#, id))
}

/// Write a counter or gauge in Prometheus text exposition format
fn write_metric(output: &mut String, name: &str, help: &str, typ: &str, site: &str, val: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {typ}");
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Format gateway counters for Prometheus scraping
fn format_prometheus_metrics(metrics: &Metrics, site: &str) -> String {
    let summary = metrics.report();
    let mut out = String::with_capacity(2048);

    write_metric(&mut out, "rfid_tags_total", "Total tag reads processed", "counter", site, summary.tags_total);
    write_metric(&mut out, "rfid_batches_total", "Total report batches received", "counter", site, summary.batches_total);
    write_metric(&mut out, "rfid_unknown_tags_total", "Reads with unclassifiable EPC length", "counter", site, summary.unknown_tags_total);
    write_metric(&mut out, "rfid_duplicate_pallets_total", "Pallet reads suppressed as duplicates", "counter", site, summary.duplicate_pallets_total);
    write_metric(&mut out, "rfid_pallets_registered_total", "Pallets registered for pairing", "counter", site, summary.pallets_registered_total);
    write_metric(&mut out, "rfid_associations_completed_total", "Completed associations emitted", "counter", site, summary.completed_total);
    write_metric(&mut out, "rfid_associations_incomplete_total", "Incomplete associations emitted", "counter", site, summary.incomplete_total);
    write_metric(&mut out, "rfid_manual_injections_total", "Manually injected associations", "counter", site, summary.manual_total);
    write_metric(&mut out, "rfid_reports_dropped_total", "Report batches dropped on a full engine channel", "counter", site, summary.reports_dropped_total);
    write_metric(&mut out, "rfid_keepalives_total", "Reader keepalives received", "counter", site, summary.keepalives_total);
    write_metric(&mut out, "rfid_link_drops_total", "Reader link drops observed", "counter", site, summary.link_drops_total);
    write_metric(&mut out, "rfid_pending_pallets", "Pallets currently awaiting pairing", "gauge", site, summary.pending_pallets);

    out
}

/// Handle a single HTTP request
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    ctx: Arc<ControlContext>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    match (&method, path.as_str()) {
        (&Method::POST, "/reader/start") => Ok(send_reader_command(&ctx, ReaderCommand::Start)),
        (&Method::POST, "/reader/stop") => Ok(send_reader_command(&ctx, ReaderCommand::Stop)),
        (&Method::POST, "/associations") => {
            let body = match req.into_body().collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => {
                    warn!(error = %e, "manual_association_body_error");
                    return Ok(json_response(
                        StatusCode::BAD_REQUEST,
                        r#"{"ok":false,"error":"unreadable_body"}"#.to_string(),
                    ));
                }
            };
            Ok(inject_association(&ctx, &body))
        }
        (&Method::GET, "/status") => {
            let state = *ctx.link_state.read();
            Ok(json_response(
                StatusCode::OK,
                format!(r#"{{"reader":"{}"}}"#, state.as_str()),
            ))
        }
        (&Method::GET, "/metrics") => {
            let body = format_prometheus_metrics(&ctx.metrics, &ctx.site_id);
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
                .body(Full::new(Bytes::from(body)))
                .expect("static response should not fail"))
        }
        (&Method::GET, "/health") => Ok(text_response(StatusCode::OK, "ok")),
        _ => Ok(text_response(StatusCode::NOT_FOUND, "Not Found")),
    }
}

/// Start the control HTTP server
pub async fn start_control_server(
    port: u16,
    ctx: Arc<ControlContext>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!(port = %port, "control_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let ctx = ctx.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let ctx = ctx.clone();
                                async move { handle_request(req, ctx).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "control_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "control_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("control_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
