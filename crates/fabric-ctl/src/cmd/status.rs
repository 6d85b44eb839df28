//! Daemon status and shutdown commands.

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, get_json, post_json};

// ── Response types ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct StatusResponse {
    uptime_secs: u64,
    engine: EngineStatus,
}

#[derive(Deserialize)]
struct EngineStatus {
    state: String,
    stopped: bool,
    receive_mode: String,
    interfaces: Vec<String>,
    memberships: usize,
    tx_queued: usize,
    rx_queued: usize,
    hints: usize,
    pending_round: Option<String>,
    secs_since_round: Option<f64>,
    stats: EngineStats,
}

#[derive(Deserialize)]
#[allow(dead_code)]
struct EngineStats {
    beacons_sent: u64,
    send_failures: u64,
    beacons_received: u64,
    beacons_rejected: u64,
    multicast_rounds: u64,
}

#[derive(Deserialize)]
struct ShutdownResponse {
    message: String,
}

// ── Commands ──────────────────────────────────────────────────────────────────

pub async fn cmd_status(port: u16) -> Result<()> {
    let resp: StatusResponse = get_json(&format!("{}/status", base_url(port))).await?;
    let e = &resp.engine;

    println!("═══════════════════════════════════════");
    println!("  Fabric Daemon Status");
    println!("═══════════════════════════════════════");
    println!("  State            : {}{}", e.state, if e.stopped { " (stopped)" } else { "" });
    println!("  Uptime           : {}s", resp.uptime_secs);
    println!("  Receive mode     : {}", e.receive_mode);
    println!("  Group memberships: {}", e.memberships);
    println!("  Beacons in flight: {} tx / {} rx", e.tx_queued, e.rx_queued);
    println!("  Topology hints   : {}", e.hints);
    println!(
        "  Beacons          : {} sent, {} received, {} rejected, {} send failures",
        e.stats.beacons_sent, e.stats.beacons_received, e.stats.beacons_rejected, e.stats.send_failures
    );
    match (&e.pending_round, e.secs_since_round) {
        (Some(kind), _) => println!("  Next round       : {} (pending)", kind),
        (None, Some(secs)) => println!("  Last round       : {:.1}s ago", secs),
        (None, None) => println!("  Last round       : never"),
    }

    if e.interfaces.is_empty() {
        println!("\n  No interfaces enabled.");
    } else {
        println!("\n  Interfaces:");
        for name in &e.interfaces {
            println!("    {}", name);
        }
    }

    Ok(())
}

pub async fn cmd_shutdown(port: u16) -> Result<()> {
    let resp: ShutdownResponse = post_json(&format!("{}/daemon/shutdown", base_url(port))).await?;
    println!("{}", resp.message);
    Ok(())
}
