//! Storage network — node registry, replica placement and stepwise delivery.
//!
//! Locking:
//!   - one registry lock around the node map, ip index and transfer table
//!   - one lock per tracked transfer, held for the duration of a step
//!   - one lock per node (see [`StorageNode`])
//!
//! Acquisition order is transfer → registry → node. The registry lock is
//! never held across a chunk delivery; a step snapshots what it needs,
//! releases the registry, then calls nodes directly.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use nimbus_core::ids::new_file_id;
use nimbus_core::topology::mbps_to_bps;
use nimbus_core::{DeliveryModel, NodeSpec, Transfer, TransferRequest};

use crate::error::NetworkError;
use crate::node::{Delivery, StorageNode};
use crate::placement;
use crate::report::{
    percent, FileStatus, NetworkStats, NodeDescriptor, NodeMetrics, NodeSummary, StepOutcome,
};

type SharedTransfer = Arc<Mutex<Transfer>>;

#[derive(Debug, Default)]
struct Registry {
    nodes: BTreeMap<String, Arc<StorageNode>>,
    /// ip → node id
    nodes_by_ip: HashMap<String, String>,
    /// source node id → file id → transfer being driven
    transfers: HashMap<String, HashMap<String, SharedTransfer>>,
}

impl Registry {
    fn node(&self, node_id: &str) -> Result<Arc<StorageNode>, NetworkError> {
        self.nodes
            .get(node_id)
            .cloned()
            .ok_or_else(|| NetworkError::UnknownNode(node_id.to_string()))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The simulated cluster.
#[derive(Debug, Default)]
pub struct StorageNetwork {
    model: DeliveryModel,
    registry: Mutex<Registry>,
}

impl StorageNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Nodes added later use `model` for delivery accounting.
    pub fn with_model(model: DeliveryModel) -> Self {
        Self {
            model,
            registry: Mutex::new(Registry::default()),
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        lock(&self.registry)
    }

    // ── Membership ────────────────────────────────────────────────────────────

    pub fn add_node(&self, spec: &NodeSpec) -> Result<Arc<StorageNode>, NetworkError> {
        let mut registry = self.registry();
        if registry.nodes.contains_key(&spec.node_id) {
            return Err(NetworkError::DuplicateNode(spec.node_id.clone()));
        }
        if registry.nodes_by_ip.contains_key(&spec.ip_address) {
            return Err(NetworkError::DuplicateAddress(spec.ip_address.clone()));
        }

        let node = Arc::new(StorageNode::new(spec, self.model));
        registry
            .nodes_by_ip
            .insert(spec.ip_address.clone(), spec.node_id.clone());
        registry
            .nodes
            .insert(spec.node_id.clone(), Arc::clone(&node));

        tracing::info!(
            node = %spec.node_id,
            ip = %spec.ip_address,
            storage_bytes = node.total_storage(),
            bandwidth_bps = node.bandwidth(),
            "node added"
        );
        Ok(node)
    }

    /// Drop a node from the registry and from every peer's link table.
    ///
    /// Transfers that list it as a target keep the id; deliveries to it are
    /// skipped from now on.
    pub fn remove_node(&self, node_id: &str) -> Result<Arc<StorageNode>, NetworkError> {
        let mut registry = self.registry();
        let node = registry
            .nodes
            .remove(node_id)
            .ok_or_else(|| NetworkError::UnknownNode(node_id.to_string()))?;
        registry.nodes_by_ip.remove(node.ip_address());
        for peer in registry.nodes.values() {
            peer.remove_connection(node_id);
        }
        tracing::info!(node = node_id, "node removed");
        Ok(node)
    }

    /// Wire a bidirectional link of `bandwidth_mbps`.
    pub fn connect_nodes(
        &self,
        a: &str,
        b: &str,
        bandwidth_mbps: u64,
    ) -> Result<(), NetworkError> {
        let registry = self.registry();
        let node_a = registry.node(a)?;
        let node_b = registry.node(b)?;
        let bps = mbps_to_bps(bandwidth_mbps);
        node_a.add_connection(b, bps);
        node_b.add_connection(a, bps);
        tracing::debug!(a, b, bandwidth_mbps, "nodes connected");
        Ok(())
    }

    pub fn node(&self, node_id: &str) -> Option<Arc<StorageNode>> {
        self.registry().nodes.get(node_id).cloned()
    }

    pub fn node_by_ip(&self, ip: &str) -> Option<String> {
        self.registry().nodes_by_ip.get(ip).cloned()
    }

    pub fn set_node_alive(&self, node_id: &str, alive: bool) -> Result<(), NetworkError> {
        let node = self.registry().node(node_id)?;
        node.set_alive(alive);
        Ok(())
    }

    // ── Discovery & statistics ────────────────────────────────────────────────

    pub fn discover(&self) -> Vec<NodeDescriptor> {
        self.registry()
            .nodes
            .values()
            .map(|n| n.descriptor())
            .collect()
    }

    pub fn list_nodes(&self) -> Vec<NodeSummary> {
        self.registry()
            .nodes
            .values()
            .map(|n| n.summary())
            .collect()
    }

    /// Cluster totals summed from live node state.
    pub fn stats(&self) -> NetworkStats {
        let registry = self.registry();

        let mut total_bandwidth_bps = 0u64;
        let mut used_bandwidth_bps = 0.0f64;
        let mut total_storage_bytes = 0u64;
        let mut used_storage_bytes = 0u64;
        let mut alive_nodes = 0usize;

        for node in registry.nodes.values() {
            let metrics = node.metrics();
            total_bandwidth_bps += metrics.network.max_bandwidth_bps;
            used_bandwidth_bps += metrics.network.current_utilization_bps;
            total_storage_bytes += metrics.storage.total_bytes;
            used_storage_bytes += metrics.storage.used_bytes;
            if metrics.storage.alive {
                alive_nodes += 1;
            }
        }

        NetworkStats {
            total_nodes: registry.nodes.len(),
            alive_nodes,
            total_bandwidth_bps,
            used_bandwidth_bps,
            bandwidth_utilization_pct: percent(used_bandwidth_bps, total_bandwidth_bps as f64),
            total_storage_bytes,
            used_storage_bytes,
            storage_utilization_pct: percent(
                used_storage_bytes as f64,
                total_storage_bytes as f64,
            ),
            active_transfers: registry.transfers.values().map(HashMap::len).sum(),
        }
    }

    pub fn node_metrics(&self, node_id: &str) -> Result<NodeMetrics, NetworkError> {
        Ok(self.registry().node(node_id)?.metrics())
    }

    // ── Placement ─────────────────────────────────────────────────────────────

    /// Pick replica targets, reserve space on each, and start tracking the
    /// transfer under `(source, file_id)`.
    ///
    /// The returned transfer lists only targets whose reservation succeeded.
    pub fn initiate_transfer(&self, request: &TransferRequest) -> Result<Transfer, NetworkError> {
        let source = request.source_node_id.as_str();
        if request.replication_factor == 0 {
            return Err(NetworkError::InvalidReplicationFactor);
        }
        if request.file_size == 0 {
            return Err(NetworkError::EmptyFile(request.file_name.clone()));
        }

        let (ranked, preferred) = {
            let registry = self.registry();
            registry.node(source)?;
            let ranked = placement::rank_by_free_capacity(registry.nodes.values(), &[source]);
            let preferred = request
                .target_node_id
                .as_deref()
                .filter(|target| *target != source)
                .and_then(|target| registry.nodes.get(target).cloned());
            (ranked, preferred)
        };

        let no_capacity = || NetworkError::NoCapacity {
            file_name: request.file_name.clone(),
            file_size: request.file_size,
        };

        let targets = placement::select_targets(
            &ranked,
            preferred.as_ref(),
            request.replication_factor,
            request.file_size,
        );
        if targets.is_empty() {
            tracing::warn!(
                source,
                file = %request.file_name,
                bytes = request.file_size,
                "no node can take this file"
            );
            return Err(no_capacity());
        }

        let file_id = new_file_id(&request.file_name);
        let planned: Vec<String> = targets.iter().map(|n| n.node_id().to_string()).collect();

        let mut representative: Option<Transfer> = None;
        let mut secured: Vec<String> = Vec::with_capacity(targets.len());
        for node in &targets {
            match node.reserve_transfer(
                &file_id,
                &request.file_name,
                request.file_size,
                source,
                &planned,
            ) {
                Ok(transfer) => {
                    secured.push(node.node_id().to_string());
                    representative.get_or_insert(transfer);
                }
                Err(e) => tracing::debug!(error = %e, "replica target dropped"),
            }
        }

        let mut transfer = representative.ok_or_else(no_capacity)?;
        transfer.replication_targets = secured;

        self.registry()
            .transfers
            .entry(source.to_string())
            .or_default()
            .insert(file_id.clone(), Arc::new(Mutex::new(transfer.clone())));

        tracing::info!(
            source,
            file_id = %file_id,
            file = %request.file_name,
            bytes = request.file_size,
            chunks = transfer.chunk_count(),
            targets = ?transfer.replication_targets,
            "transfer initiated"
        );
        Ok(transfer)
    }

    // ── Stepwise delivery ─────────────────────────────────────────────────────

    /// Deliver up to `chunks_per_step` pending chunks, in chunk-id order.
    ///
    /// Zero progress is a normal outcome; the caller decides whether to keep
    /// polling. On completion the transfer stops being tracked.
    pub fn advance_transfer(
        &self,
        source_node_id: &str,
        file_id: &str,
        chunks_per_step: usize,
    ) -> Result<StepOutcome, NetworkError> {
        let shared = self.tracked(source_node_id, file_id)?;
        let mut transfer = lock(&shared);

        let pending: Vec<(u32, u64)> = transfer
            .pending_chunks()
            .take(chunks_per_step)
            .map(|c| (c.chunk_id, c.size))
            .collect();

        let mut delivered = 0;
        for (chunk_id, size) in pending {
            match self.place_chunk(source_node_id, &mut transfer, chunk_id, size) {
                Some(holder) => {
                    transfer.complete_chunk(chunk_id, &holder);
                    delivered += 1;
                }
                None => tracing::debug!(file_id, chunk = chunk_id, "chunk left pending"),
            }
        }

        self.sync_replicas(source_node_id, &transfer, chunks_per_step);

        let completed = transfer.is_complete();
        if completed && self.untrack(source_node_id, file_id) {
            let dropped = self.finish_replicas(source_node_id, &transfer);
            tracing::info!(
                source = source_node_id,
                file_id,
                replicas = ?transfer.replication_targets,
                ?dropped,
                "transfer completed"
            );
        }

        Ok(StepOutcome {
            delivered,
            completed,
        })
    }

    /// Offer one chunk to each target in order; fail over when all refuse.
    /// Returns the node that accepted it.
    fn place_chunk(
        &self,
        source: &str,
        transfer: &mut Transfer,
        chunk_id: u32,
        size: u64,
    ) -> Option<String> {
        let mut tried: Vec<String> = Vec::with_capacity(transfer.replication_targets.len());

        for target_id in &transfer.replication_targets {
            match self.node(target_id) {
                Some(node) => match node.deliver_chunk(&transfer.file_id, chunk_id, source) {
                    Delivery::Delivered { .. } => return Some(target_id.clone()),
                    Delivery::Rejected(reason) => tracing::debug!(
                        node = %target_id,
                        file_id = %transfer.file_id,
                        chunk = chunk_id,
                        ?reason,
                        "chunk rejected"
                    ),
                },
                None => tracing::debug!(node = %target_id, "target no longer registered"),
            }
            tried.push(target_id.clone());
        }

        self.fail_over(source, transfer, chunk_id, size, &tried)
    }

    /// Recruit the roomiest untried alive node as an extra replica and offer
    /// it the chunk. The new target is kept for all later chunks.
    fn fail_over(
        &self,
        source: &str,
        transfer: &mut Transfer,
        chunk_id: u32,
        size: u64,
        tried: &[String],
    ) -> Option<String> {
        let alternate = {
            let registry = self.registry();
            let mut exclude: Vec<&str> = tried.iter().map(String::as_str).collect();
            exclude.push(source);
            exclude.extend(transfer.replication_targets.iter().map(String::as_str));
            let ranked = placement::rank_by_free_capacity(registry.nodes.values(), &exclude);
            placement::find_alternate(&ranked, size)
        };

        let Some(alternate) = alternate else {
            tracing::debug!(
                file_id = %transfer.file_id,
                chunk = chunk_id,
                "no failover candidate"
            );
            return None;
        };

        if let Err(e) = alternate.reserve_transfer(
            &transfer.file_id,
            &transfer.file_name,
            transfer.total_size,
            source,
            &transfer.replication_targets,
        ) {
            tracing::debug!(error = %e, "failover candidate refused reservation");
            return None;
        }
        transfer.add_replication_target(alternate.node_id());

        tracing::warn!(
            file_id = %transfer.file_id,
            chunk = chunk_id,
            alternate = alternate.node_id(),
            targets = ?transfer.replication_targets,
            "replica targets refused chunk, failing over"
        );

        match alternate.deliver_chunk(&transfer.file_id, chunk_id, source) {
            Delivery::Delivered { .. } => Some(alternate.node_id().to_string()),
            Delivery::Rejected(reason) => {
                tracing::debug!(
                    node = alternate.node_id(),
                    chunk = chunk_id,
                    ?reason,
                    "failover target rejected chunk"
                );
                None
            }
        }
    }

    /// Forward completed chunks to alive replicas that lack them, at most
    /// `budget` per replica. Each chunk comes from its holder when the
    /// replica is linked to it and the holder is up, otherwise from the
    /// source. A replica stops at its first rejection for this round.
    fn sync_replicas(&self, source: &str, transfer: &Transfer, budget: usize) {
        let completed: Vec<u32> = transfer
            .chunks
            .iter()
            .filter(|c| c.is_completed())
            .map(|c| c.chunk_id)
            .collect();
        if completed.is_empty() || budget == 0 {
            return;
        }

        for target_id in &transfer.replication_targets {
            let Some(node) = self.node(target_id) else {
                continue;
            };
            if !node.is_alive() {
                continue;
            }
            for chunk_id in node
                .missing_chunks(&transfer.file_id, &completed)
                .into_iter()
                .take(budget)
            {
                let holder = transfer.chunk(chunk_id).and_then(|c| c.stored_node.as_deref());
                let upstream = self.upstream_for(&node, holder, source);
                if let Delivery::Rejected(reason) =
                    node.deliver_chunk(&transfer.file_id, chunk_id, upstream)
                {
                    tracing::debug!(
                        node = %target_id,
                        file_id = %transfer.file_id,
                        chunk = chunk_id,
                        upstream,
                        ?reason,
                        "replica lagging"
                    );
                    break;
                }
            }
        }
    }

    fn upstream_for<'a>(
        &self,
        replica: &StorageNode,
        holder: Option<&'a str>,
        source: &'a str,
    ) -> &'a str {
        match holder {
            Some(holder)
                if replica.link_bandwidth(holder).is_some()
                    && self.node(holder).is_some_and(|n| n.is_alive()) =>
            {
                holder
            }
            _ => source,
        }
    }

    /// Last sync for a transfer that just completed: every alive replica gets
    /// all chunks it still lacks. Reservations that remain incomplete after
    /// that are released and their node ids returned.
    fn finish_replicas(&self, source: &str, transfer: &Transfer) -> Vec<String> {
        self.sync_replicas(source, transfer, usize::MAX);

        let mut dropped = Vec::new();
        for target_id in &transfer.replication_targets {
            let Some(node) = self.node(target_id) else {
                continue;
            };
            if node.release_reservation(&transfer.file_id) {
                tracing::warn!(
                    node = %target_id,
                    file_id = %transfer.file_id,
                    "replica incomplete at transfer end, reservation released"
                );
                dropped.push(target_id.clone());
            }
        }
        dropped
    }

    fn tracked(&self, source_node_id: &str, file_id: &str) -> Result<SharedTransfer, NetworkError> {
        self.registry()
            .transfers
            .get(source_node_id)
            .and_then(|files| files.get(file_id))
            .cloned()
            .ok_or_else(|| NetworkError::UnknownTransfer {
                source_node_id: source_node_id.to_string(),
                file_id: file_id.to_string(),
            })
    }

    /// Returns true if this call removed the entry.
    fn untrack(&self, source_node_id: &str, file_id: &str) -> bool {
        let mut registry = self.registry();
        let Some(files) = registry.transfers.get_mut(source_node_id) else {
            return false;
        };
        let removed = files.remove(file_id).is_some();
        if files.is_empty() {
            registry.transfers.remove(source_node_id);
        }
        removed
    }

    /// Snapshot of a transfer the network is still driving.
    pub fn tracked_transfer(&self, source_node_id: &str, file_id: &str) -> Option<Transfer> {
        let shared = self.tracked(source_node_id, file_id).ok()?;
        let transfer = lock(&shared).clone();
        Some(transfer)
    }

    // ── File lookups ──────────────────────────────────────────────────────────

    pub fn file_status(&self, file_id: &str) -> Result<FileStatus, NetworkError> {
        let (tracked, nodes) = {
            let registry = self.registry();
            let tracked = registry
                .transfers
                .values()
                .find_map(|files| files.get(file_id).cloned());
            let nodes: Vec<Arc<StorageNode>> = registry.nodes.values().cloned().collect();
            (tracked, nodes)
        };

        if let Some(shared) = tracked {
            let transfer = lock(&shared);
            return Ok(FileStatus::InProgress {
                chunks_total: transfer.chunk_count(),
                chunks_done: transfer.completed_chunks(),
            });
        }

        let holders: Vec<String> = nodes
            .iter()
            .filter(|n| n.stores_file(file_id))
            .map(|n| n.node_id().to_string())
            .collect();
        if holders.is_empty() {
            return Err(NetworkError::UnknownFile(file_id.to_string()));
        }
        Ok(FileStatus::Stored { nodes: holders })
    }

    /// Read a stored file's chunk plan back from one replica.
    pub fn retrieve_file(&self, node_id: &str, file_id: &str) -> Result<Transfer, NetworkError> {
        let node = self.registry().node(node_id)?;
        node.retrieve_file(file_id)
            .ok_or_else(|| NetworkError::UnknownFile(file_id.to_string()))
    }
}
