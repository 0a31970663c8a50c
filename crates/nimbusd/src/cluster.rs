//! Building a network from config and feeding it the scripted workload.

use std::sync::Arc;

use anyhow::{Context, Result};

use nimbus_core::{NimbusConfig, OutagePlan, TransferRequest};
use nimbus_services::{StorageNetwork, TransferDriver};

/// Register every configured node, then wire the links.
pub fn build(config: &NimbusConfig) -> Result<Arc<StorageNetwork>> {
    let network = StorageNetwork::with_model(config.delivery);

    for spec in &config.nodes {
        network
            .add_node(spec)
            .with_context(|| format!("adding node {}", spec.node_id))?;
    }
    for link in &config.links {
        network
            .connect_nodes(&link.a, &link.b, link.bandwidth_mbps)
            .with_context(|| format!("linking {} <-> {}", link.a, link.b))?;
    }

    tracing::info!(
        nodes = config.nodes.len(),
        links = config.links.len(),
        strict_admission = config.delivery.strict_admission,
        "cluster built"
    );
    Ok(Arc::new(network))
}

/// Initiate each request and hand accepted ones to the driver.
/// Returns the file ids that were accepted.
pub fn launch(driver: &TransferDriver, requests: &[TransferRequest]) -> Vec<String> {
    let mut accepted = Vec::with_capacity(requests.len());
    for request in requests {
        match driver.network().initiate_transfer(request) {
            Ok(transfer) => {
                driver.track(&request.source_node_id, &transfer.file_id);
                accepted.push(transfer.file_id);
            }
            Err(e) => tracing::warn!(
                source = %request.source_node_id,
                file = %request.file_name,
                error = %e,
                "transfer refused"
            ),
        }
    }
    accepted
}

/// Apply the outages scheduled for `tick`.
pub fn apply_outages(network: &StorageNetwork, outages: &[OutagePlan], tick: u64) {
    for outage in outages.iter().filter(|o| o.at_tick == tick) {
        if let Err(e) = network.set_node_alive(&outage.node_id, outage.alive) {
            tracing::warn!(node = %outage.node_id, error = %e, "outage skipped");
        }
    }
}
