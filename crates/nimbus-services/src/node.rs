//! Storage node — capacity accounting, links, liveness and chunk intake.
//!
//! Every mutable field sits behind the node's own lock, so deliveries to
//! different nodes proceed in parallel. A node never calls back into the
//! network.
//!
//! Bandwidth accounting is decay-free: each accepted chunk adds a share
//! (`utilization_factor`) of the bandwidth that was available at that
//! instant. Available bandwidth is `min(bandwidth - utilization, link)`.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use nimbus_core::{DeliveryModel, NodeSpec, Transfer};

use crate::error::AdmissionRejected;
use crate::report::{
    percent, NetworkUtilization, NodeDescriptor, NodeMetrics, NodeSummary, PerformanceMetrics,
    StorageUtilization,
};

/// Why a node turned a chunk away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    NodeDown,
    UnknownTransfer,
    UnknownChunk,
    NoBandwidth,
    AlreadyStored,
}

/// Outcome of offering one chunk to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Accepted. `file_completed` is set when this was the file's last chunk.
    Delivered { file_completed: bool },
    Rejected(RejectReason),
}

impl Delivery {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Delivery::Delivered { .. })
    }
}

#[derive(Debug)]
struct NodeState {
    /// Only grows, and only when a transfer fully lands here.
    used_storage: u64,
    active_transfers: HashMap<String, Transfer>,
    stored_files: HashMap<String, Transfer>,
    /// peer node id → link bits/sec
    connections: HashMap<String, u64>,
    network_utilization: f64,
    alive: bool,

    requests_processed: u64,
    bytes_transferred: u64,
    failed_deliveries: u64,
}

impl NodeState {
    fn reserved_bytes(&self) -> u64 {
        self.active_transfers.values().map(|t| t.total_size).sum()
    }

    fn available_bandwidth(&self, bandwidth: u64, peer: &str) -> f64 {
        let remaining = (bandwidth as f64 - self.network_utilization).max(0.0);
        let link = self.connections.get(peer).copied().unwrap_or(0) as f64;
        remaining.min(link)
    }
}

/// A simulated storage server.
#[derive(Debug)]
pub struct StorageNode {
    node_id: String,
    ip_address: String,
    cpu_capacity: u32,
    memory_capacity: u32,
    /// Bytes.
    total_storage: u64,
    /// Bits/sec.
    bandwidth: u64,
    model: DeliveryModel,
    state: Mutex<NodeState>,
}

impl StorageNode {
    pub fn new(spec: &NodeSpec, model: DeliveryModel) -> Self {
        Self {
            node_id: spec.node_id.clone(),
            ip_address: spec.ip_address.clone(),
            cpu_capacity: spec.cpu_capacity,
            memory_capacity: spec.memory_gb,
            total_storage: spec.storage_bytes(),
            bandwidth: spec.bandwidth_bps(),
            model,
            state: Mutex::new(NodeState {
                used_storage: 0,
                active_transfers: HashMap::new(),
                stored_files: HashMap::new(),
                connections: HashMap::new(),
                network_utilization: 0.0,
                alive: true,
                requests_processed: 0,
                bytes_transferred: 0,
                failed_deliveries: 0,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, NodeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn ip_address(&self) -> &str {
        &self.ip_address
    }

    pub fn cpu_capacity(&self) -> u32 {
        self.cpu_capacity
    }

    pub fn memory_capacity(&self) -> u32 {
        self.memory_capacity
    }

    pub fn total_storage(&self) -> u64 {
        self.total_storage
    }

    pub fn bandwidth(&self) -> u64 {
        self.bandwidth
    }

    // ── Liveness & links ──────────────────────────────────────────────────────

    /// Toggle liveness. Existing reservations are left alone.
    pub fn set_alive(&self, alive: bool) {
        self.state().alive = alive;
        tracing::info!(node = %self.node_id, alive, "node liveness changed");
    }

    pub fn is_alive(&self) -> bool {
        self.state().alive
    }

    /// Record (or overwrite) the link capacity toward `peer_id`, in bits/sec.
    pub fn add_connection(&self, peer_id: &str, bandwidth_bps: u64) {
        self.state()
            .connections
            .insert(peer_id.to_string(), bandwidth_bps);
    }

    pub fn remove_connection(&self, peer_id: &str) -> bool {
        self.state().connections.remove(peer_id).is_some()
    }

    pub fn link_bandwidth(&self, peer_id: &str) -> Option<u64> {
        self.state().connections.get(peer_id).copied()
    }

    // ── Capacity ──────────────────────────────────────────────────────────────

    pub fn used_storage(&self) -> u64 {
        self.state().used_storage
    }

    /// Total minus completed usage. Pending reservations are not subtracted.
    pub fn free_storage(&self) -> u64 {
        self.total_storage.saturating_sub(self.state().used_storage)
    }

    /// Reserve space for an incoming file and lay out its chunk plan.
    ///
    /// Admission compares against completed usage only, unless the delivery
    /// model asks for strict admission, in which case pending reservations
    /// count too.
    pub fn reserve_transfer(
        &self,
        file_id: &str,
        file_name: &str,
        file_size: u64,
        source_node_id: &str,
        replication_targets: &[String],
    ) -> Result<Transfer, AdmissionRejected> {
        let mut state = self.state();

        let mut committed = state.used_storage;
        if self.model.strict_admission {
            committed = committed.saturating_add(state.reserved_bytes());
        }
        if committed.saturating_add(file_size) > self.total_storage {
            tracing::debug!(
                node = %self.node_id,
                file_id,
                file_size,
                committed,
                "admission rejected"
            );
            return Err(AdmissionRejected {
                node_id: self.node_id.clone(),
                requested: file_size,
                available: self.total_storage.saturating_sub(committed),
            });
        }

        let transfer = Transfer::new(file_id, file_name, file_size, replication_targets.to_vec());
        state
            .active_transfers
            .insert(file_id.to_string(), transfer.clone());

        tracing::debug!(
            node = %self.node_id,
            file_id,
            source = source_node_id,
            chunks = transfer.chunk_count(),
            "transfer reserved"
        );
        Ok(transfer)
    }

    // ── Chunk intake ──────────────────────────────────────────────────────────

    /// Accept one chunk of a reserved transfer from `source_node_id`.
    ///
    /// When the last chunk lands, the transfer moves to `stored_files` and
    /// `used_storage` grows by the full file size in the same critical section.
    pub fn deliver_chunk(&self, file_id: &str, chunk_id: u32, source_node_id: &str) -> Delivery {
        let mut state = self.state();

        if !state.alive {
            state.failed_deliveries += 1;
            return Delivery::Rejected(RejectReason::NodeDown);
        }

        let size = match state.active_transfers.get(file_id) {
            None => return Delivery::Rejected(RejectReason::UnknownTransfer),
            Some(transfer) => match transfer.chunk(chunk_id) {
                None => return Delivery::Rejected(RejectReason::UnknownChunk),
                Some(chunk) if chunk.is_completed() => {
                    return Delivery::Rejected(RejectReason::AlreadyStored)
                }
                Some(chunk) => chunk.size,
            },
        };

        // Not a failed delivery; only outages are counted.
        let available = state.available_bandwidth(self.bandwidth, source_node_id);
        if available <= 0.0 {
            return Delivery::Rejected(RejectReason::NoBandwidth);
        }

        self.simulate_transfer_time(size, available);

        state.network_utilization += available * self.model.utilization_factor;
        state.bytes_transferred += size;

        let finished = match state.active_transfers.get_mut(file_id) {
            Some(transfer) => {
                transfer.complete_chunk(chunk_id, &self.node_id);
                transfer.is_complete()
            }
            None => false,
        };

        tracing::trace!(
            node = %self.node_id,
            file_id,
            chunk = chunk_id,
            source = source_node_id,
            available_bps = available,
            "chunk accepted"
        );

        if finished {
            if let Some(transfer) = state.active_transfers.remove(file_id) {
                state.used_storage += transfer.total_size;
                state.requests_processed += 1;
                tracing::info!(
                    node = %self.node_id,
                    file_id,
                    bytes = transfer.total_size,
                    "file stored"
                );
                state.stored_files.insert(file_id.to_string(), transfer);
            }
        }

        Delivery::Delivered {
            file_completed: finished,
        }
    }

    /// Sleep for the simulated wire time, capped by the delivery model.
    fn simulate_transfer_time(&self, size: u64, available_bps: f64) {
        if self.model.max_simulated_latency_ms == 0 {
            return;
        }
        let cap = Duration::from_millis(self.model.max_simulated_latency_ms);
        let wire = Duration::try_from_secs_f64((size * 8) as f64 / available_bps).unwrap_or(cap);
        std::thread::sleep(wire.min(cap));
    }

    // ── Holdings ──────────────────────────────────────────────────────────────

    /// Whether an incomplete reservation for `file_id` exists here.
    pub fn holds_reservation(&self, file_id: &str) -> bool {
        self.state().active_transfers.contains_key(file_id)
    }

    /// Drop an incomplete reservation. Stored files are untouched.
    pub fn release_reservation(&self, file_id: &str) -> bool {
        let released = self.state().active_transfers.remove(file_id).is_some();
        if released {
            tracing::debug!(node = %self.node_id, file_id, "reservation released");
        }
        released
    }

    pub fn stores_file(&self, file_id: &str) -> bool {
        self.state().stored_files.contains_key(file_id)
    }

    /// Of `chunk_ids`, those this node still lacks for an active reservation.
    ///
    /// Empty when the file is already stored or was never reserved here.
    pub fn missing_chunks(&self, file_id: &str, chunk_ids: &[u32]) -> Vec<u32> {
        let state = self.state();
        let Some(transfer) = state.active_transfers.get(file_id) else {
            return Vec::new();
        };
        chunk_ids
            .iter()
            .copied()
            .filter(|id| transfer.chunk(*id).is_some_and(|c| !c.is_completed()))
            .collect()
    }

    /// A pending copy of a stored file's chunk plan, as served for a read.
    pub fn retrieve_file(&self, file_id: &str) -> Option<Transfer> {
        self.state().stored_files.get(file_id).map(Transfer::fresh_copy)
    }

    // ── Reports ───────────────────────────────────────────────────────────────

    pub fn current_utilization_bps(&self) -> f64 {
        self.state().network_utilization
    }

    pub fn storage_utilization(&self) -> StorageUtilization {
        let state = self.state();
        self.storage_snapshot(&state)
    }

    pub fn network_utilization(&self) -> NetworkUtilization {
        let state = self.state();
        self.network_snapshot(&state)
    }

    pub fn performance_metrics(&self) -> PerformanceMetrics {
        let state = self.state();
        Self::performance_snapshot(&state)
    }

    /// All three reports taken under one lock acquisition.
    pub fn metrics(&self) -> NodeMetrics {
        let state = self.state();
        NodeMetrics {
            storage: self.storage_snapshot(&state),
            network: self.network_snapshot(&state),
            performance: Self::performance_snapshot(&state),
        }
    }

    pub fn descriptor(&self) -> NodeDescriptor {
        let state = self.state();
        NodeDescriptor {
            node_id: self.node_id.clone(),
            ip: self.ip_address.clone(),
            alive: state.alive,
            storage_total: self.total_storage,
            storage_used: state.used_storage,
        }
    }

    pub fn summary(&self) -> NodeSummary {
        let state = self.state();
        NodeSummary {
            node_id: self.node_id.clone(),
            ip: self.ip_address.clone(),
            alive: state.alive,
            storage_used_bytes: state.used_storage,
            storage_total_bytes: self.total_storage,
            connections: sorted_peers(&state),
        }
    }

    fn storage_snapshot(&self, state: &NodeState) -> StorageUtilization {
        StorageUtilization {
            used_bytes: state.used_storage,
            total_bytes: self.total_storage,
            utilization_percent: percent(state.used_storage as f64, self.total_storage as f64),
            files_stored: state.stored_files.len(),
            active_transfers: state.active_transfers.len(),
            alive: state.alive,
        }
    }

    fn network_snapshot(&self, state: &NodeState) -> NetworkUtilization {
        NetworkUtilization {
            current_utilization_bps: state.network_utilization,
            max_bandwidth_bps: self.bandwidth,
            utilization_percent: percent(state.network_utilization, self.bandwidth as f64),
            connections: sorted_peers(state),
        }
    }

    fn performance_snapshot(state: &NodeState) -> PerformanceMetrics {
        PerformanceMetrics {
            total_requests_processed: state.requests_processed,
            total_data_transferred_bytes: state.bytes_transferred,
            failed_transfers: state.failed_deliveries,
            current_active_transfers: state.active_transfers.len(),
        }
    }
}

fn sorted_peers(state: &NodeState) -> Vec<String> {
    let mut peers: Vec<String> = state.connections.keys().cloned().collect();
    peers.sort();
    peers
}
