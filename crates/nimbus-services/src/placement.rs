//! Replica placement — picking target nodes by free capacity.
//!
//! Candidates are alive nodes ordered by descending free storage
//! (`total - used`). The sort is stable, so ties keep registry order.

use std::sync::Arc;

use crate::node::StorageNode;

/// Alive nodes not in `exclude`, most free space first.
pub fn rank_by_free_capacity<'a, I>(nodes: I, exclude: &[&str]) -> Vec<Arc<StorageNode>>
where
    I: IntoIterator<Item = &'a Arc<StorageNode>>,
{
    let mut ranked: Vec<(u64, Arc<StorageNode>)> = nodes
        .into_iter()
        .filter(|n| !exclude.iter().any(|id| *id == n.node_id()) && n.is_alive())
        .map(|n| (n.free_storage(), Arc::clone(n)))
        .collect();
    ranked.sort_by(|a, b| b.0.cmp(&a.0));
    ranked.into_iter().map(|(_, n)| n).collect()
}

/// Choose up to `replication_factor` targets for a file of `file_size` bytes.
///
/// `preferred` goes first when it is alive and has room. The rest come from
/// `ranked` in order, skipping nodes already chosen or lacking space.
pub fn select_targets(
    ranked: &[Arc<StorageNode>],
    preferred: Option<&Arc<StorageNode>>,
    replication_factor: usize,
    file_size: u64,
) -> Vec<Arc<StorageNode>> {
    let mut targets: Vec<Arc<StorageNode>> = Vec::with_capacity(replication_factor);

    if let Some(node) = preferred {
        if node.is_alive() && node.free_storage() >= file_size {
            targets.push(Arc::clone(node));
        } else {
            tracing::debug!(node = node.node_id(), "preferred target unavailable, ignoring");
        }
    }

    for node in ranked {
        if targets.len() >= replication_factor {
            break;
        }
        if targets.iter().any(|t| t.node_id() == node.node_id()) {
            continue;
        }
        if node.free_storage() >= file_size {
            targets.push(Arc::clone(node));
        }
    }

    targets
}

/// First ranked node with room for `needed` bytes.
pub fn find_alternate(ranked: &[Arc<StorageNode>], needed: u64) -> Option<Arc<StorageNode>> {
    ranked
        .iter()
        .find(|n| n.free_storage() >= needed)
        .map(Arc::clone)
}
