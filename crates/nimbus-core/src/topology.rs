//! Cluster topology descriptions — nodes and the links between them.

use serde::{Deserialize, Serialize};

/// Bytes per configured storage GB (binary gigabyte).
pub const BYTES_PER_GB: u64 = 1024 * 1024 * 1024;

/// Bits per second per configured Mbps.
pub const BPS_PER_MBPS: u64 = 1_000_000;

/// Everything needed to add a node to the network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub node_id: String,
    pub ip_address: String,
    /// vCPUs. Informational.
    #[serde(default)]
    pub cpu_capacity: u32,
    /// GB of memory. Informational, never checked against transfers.
    #[serde(default)]
    pub memory_gb: u32,
    pub storage_gb: u64,
    pub bandwidth_mbps: u64,
}

impl NodeSpec {
    pub fn new(
        node_id: impl Into<String>,
        ip_address: impl Into<String>,
        storage_gb: u64,
        bandwidth_mbps: u64,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            ip_address: ip_address.into(),
            cpu_capacity: 4,
            memory_gb: 16,
            storage_gb,
            bandwidth_mbps,
        }
    }

    pub fn storage_bytes(&self) -> u64 {
        self.storage_gb.saturating_mul(BYTES_PER_GB)
    }

    pub fn bandwidth_bps(&self) -> u64 {
        mbps_to_bps(self.bandwidth_mbps)
    }
}

/// A bidirectional link between two nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSpec {
    pub a: String,
    pub b: String,
    pub bandwidth_mbps: u64,
}

pub fn mbps_to_bps(mbps: u64) -> u64 {
    mbps.saturating_mul(BPS_PER_MBPS)
}
