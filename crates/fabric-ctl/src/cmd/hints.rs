//! Topology hint listing and round requests.

use std::collections::BTreeMap;

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, get_json, post_json};

#[derive(Deserialize)]
struct HintsResponse {
    hints: Vec<Hint>,
    counts: BTreeMap<String, usize>,
}

#[derive(Deserialize)]
struct Hint {
    ifname: Option<String>,
    vid: Option<u16>,
    hint: String,
    related_ifname: Option<String>,
    related_vid: Option<u16>,
    related_mac: Option<String>,
}

#[derive(Deserialize)]
struct BroadcastResponse {
    requested: String,
}

fn side(name: &Option<String>, vid: Option<u16>) -> String {
    let name = name.as_deref().unwrap_or("?");
    match vid {
        Some(v) => format!("{}.{}", name, v),
        None => name.to_string(),
    }
}

pub async fn cmd_hints(port: u16) -> Result<()> {
    let resp: HintsResponse = get_json(&format!("{}/hints", base_url(port))).await?;

    if resp.hints.is_empty() {
        println!("No topology hints yet.");
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Topology Hints ({})", resp.hints.len());
    println!("═══════════════════════════════════════");
    for (kind, count) in &resp.counts {
        println!("  {:<34} {}", kind, count);
    }
    println!();

    for h in &resp.hints {
        let mac = h
            .related_mac
            .as_deref()
            .map(|m| format!("  ({})", m))
            .unwrap_or_default();
        println!(
            "  {:<12} {:<34} {}{}",
            side(&h.ifname, h.vid),
            h.hint,
            side(&h.related_ifname, h.related_vid),
            mac
        );
    }

    Ok(())
}

pub async fn cmd_solicit(port: u16) -> Result<()> {
    let resp: BroadcastResponse = post_json(&format!("{}/solicit", base_url(port))).await?;
    println!("Requested a {} round.", resp.requested);
    Ok(())
}

pub async fn cmd_advertise(port: u16) -> Result<()> {
    let resp: BroadcastResponse = post_json(&format!("{}/advertise", base_url(port))).await?;
    println!("Requested an {} round.", resp.requested);
    Ok(())
}
