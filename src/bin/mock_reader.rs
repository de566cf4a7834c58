//! Mock RFID reader TCP server
//!
//! Simulates the tag scanner for local testing: accepts connections from
//! the gateway and streams scripted tag reports in the reader line protocol.
//!
//! Protocol (newline-delimited UTF-8):
//! - `TAGS <epc> [<epc> ...]` - one report batch
//! - `KEEPALIVE` - periodic keepalive
//!
//! Behavior per cycle:
//! 1. Emit a fresh 16-char pallet EPC
//! 2. After a short delay, emit a 12-char operator EPC - except every Nth
//!    cycle (--unpaired-every), which is left unpaired so the gateway's
//!    timeout path fires
//!
//! Usage:
//!   cargo run --bin mock-reader -- --port 5084 --cycle-ms 2000

use clap::Parser;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

#[derive(Parser, Debug, Clone)]
#[command(name = "mock-reader")]
#[command(about = "Mock RFID reader for local simulation")]
struct Args {
    /// TCP port to listen on
    #[arg(short, long, default_value = "5084")]
    port: u16,

    /// Milliseconds between report cycles
    #[arg(long, default_value = "2000")]
    cycle_ms: u64,

    /// Delay between a pallet report and its operator report (ms)
    #[arg(long, default_value = "500")]
    operator_delay_ms: u64,

    /// Leave every Nth pallet unpaired (0 = pair everything)
    #[arg(long, default_value = "4")]
    unpaired_every: u64,

    /// Keepalive interval (seconds)
    #[arg(long, default_value = "5")]
    keepalive_interval_secs: u64,
}

/// Deterministic scripted EPCs: unique pallets, a small rotating pool of
/// operator badges
fn pallet_epc(cycle: u64) -> String {
    format!("{:016X}", 0xA000_0000_0000_0000u64 | cycle)
}

fn operator_epc(cycle: u64) -> String {
    format!("{:012X}", 0xB000_0000_0000u64 | (cycle % 5))
}

async fn serve_connection(mut stream: TcpStream, args: Args) -> std::io::Result<()> {
    let peer = stream.peer_addr()?;
    println!("gateway connected from {peer}");

    let mut cycle_timer = tokio::time::interval(Duration::from_millis(args.cycle_ms));
    let mut keepalive_timer =
        tokio::time::interval(Duration::from_secs(args.keepalive_interval_secs));
    let mut cycle: u64 = 0;

    loop {
        tokio::select! {
            _ = cycle_timer.tick() => {
                cycle += 1;
                let pallet = pallet_epc(cycle);
                println!("cycle {cycle}: pallet {pallet}");
                stream.write_all(format!("TAGS {pallet}\n").as_bytes()).await?;

                let unpaired =
                    args.unpaired_every > 0 && cycle % args.unpaired_every == 0;
                if unpaired {
                    println!("cycle {cycle}: leaving pallet unpaired");
                    continue;
                }

                tokio::time::sleep(Duration::from_millis(args.operator_delay_ms)).await;
                let operator = operator_epc(cycle);
                println!("cycle {cycle}: operator {operator}");
                stream.write_all(format!("TAGS {operator}\n").as_bytes()).await?;
            }
            _ = keepalive_timer.tick() => {
                stream.write_all(b"KEEPALIVE\n").await?;
            }
        }
    }
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let args = Args::parse();

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = TcpListener::bind(&addr).await?;
    println!("mock reader listening on {addr}");

    loop {
        let (stream, _) = listener.accept().await?;
        let conn_args = args.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_connection(stream, conn_args).await {
                println!("connection ended: {e}");
            }
        });
    }
}
