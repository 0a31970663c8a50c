//! Snapshot types returned by node and network accessors.
//!
//! All of these are computed from live state at call time. Nothing is cached.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageUtilization {
    pub used_bytes: u64,
    pub total_bytes: u64,
    pub utilization_percent: f64,
    pub files_stored: usize,
    pub active_transfers: usize,
    pub alive: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkUtilization {
    pub current_utilization_bps: f64,
    pub max_bandwidth_bps: u64,
    pub utilization_percent: f64,
    /// Connected peer ids, sorted.
    pub connections: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PerformanceMetrics {
    pub total_requests_processed: u64,
    pub total_data_transferred_bytes: u64,
    pub failed_transfers: u64,
    pub current_active_transfers: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeMetrics {
    pub storage: StorageUtilization,
    pub network: NetworkUtilization,
    pub performance: PerformanceMetrics,
}

/// One registry entry as seen by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeDescriptor {
    pub node_id: String,
    pub ip: String,
    pub alive: bool,
    pub storage_total: u64,
    pub storage_used: u64,
}

/// Discovery entry plus the node's links.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeSummary {
    pub node_id: String,
    pub ip: String,
    pub alive: bool,
    pub storage_used_bytes: u64,
    pub storage_total_bytes: u64,
    pub connections: Vec<String>,
}

/// Cluster-wide totals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkStats {
    pub total_nodes: usize,
    pub alive_nodes: usize,
    pub total_bandwidth_bps: u64,
    pub used_bandwidth_bps: f64,
    pub bandwidth_utilization_pct: f64,
    pub total_storage_bytes: u64,
    pub used_storage_bytes: u64,
    pub storage_utilization_pct: f64,
    /// Transfers the network is still driving.
    pub active_transfers: usize,
}

/// Where a file currently is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    /// Still being delivered.
    InProgress {
        chunks_total: usize,
        chunks_done: usize,
    },
    /// Fully stored on these nodes, sorted by id.
    Stored { nodes: Vec<String> },
}

/// Result of one `advance_transfer` step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StepOutcome {
    /// Chunks newly completed on the tracked transfer in this step.
    pub delivered: usize,
    pub completed: bool,
}

pub(crate) fn percent(part: f64, whole: f64) -> f64 {
    if whole > 0.0 {
        part / whole * 100.0
    } else {
        0.0
    }
}
