//! nimbusd — runs a scripted storage-cluster simulation.
//!
//! Usage: `nimbusd [config.toml]`. Without an argument the user config is
//! loaded (and written with defaults on first run).

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use nimbus_core::NimbusConfig;
use nimbus_services::{DriverSettings, TransferDriver};

mod cluster;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => NimbusConfig::load_from(Path::new(&path))
            .with_context(|| format!("failed to load config from {path}"))?,
        None => {
            if let Err(e) = NimbusConfig::write_default_if_missing() {
                tracing::warn!(error = %e, "failed to write default config");
            }
            NimbusConfig::load().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "failed to load config, using defaults");
                NimbusConfig::default()
            })
        }
    };
    tracing::info!("nimbusd starting");

    let network = cluster::build(&config)?;
    let driver = TransferDriver::new(
        Arc::clone(&network),
        DriverSettings::from(&config.simulation),
    );

    let accepted = cluster::launch(&driver, &config.transfers);
    tracing::info!(
        requested = config.transfers.len(),
        accepted = accepted.len(),
        "workload submitted"
    );

    let ticks = driver
        .run_with(|tick| cluster::apply_outages(&network, &config.outages, tick))
        .await;

    let files: Vec<serde_json::Value> = driver
        .take_finished()
        .into_iter()
        .map(|job| {
            let status = network
                .file_status(&job.file_id)
                .map(|s| serde_json::json!(s))
                .unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }));
            serde_json::json!({ "job": job, "status": status })
        })
        .collect();

    let report = serde_json::json!({
        "ticks": ticks,
        "stats": network.stats(),
        "nodes": network.list_nodes(),
        "files": files,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    tracing::info!(ticks, "simulation finished");
    Ok(())
}
