//! Error types for the simulation engine.
//!
//! Rejected chunk deliveries are not errors; see [`crate::node::Delivery`].

/// A node refused to reserve space for an incoming transfer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("node {node_id} cannot admit {requested} bytes ({available} available)")]
pub struct AdmissionRejected {
    pub node_id: String,
    pub requested: u64,
    pub available: u64,
}

/// Errors surfaced by [`crate::network::StorageNetwork`] operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkError {
    /// Reference to a node id not present in the registry.
    #[error("unknown node: {0}")]
    UnknownNode(String),

    /// No tracked transfer for this (source, file) pair.
    #[error("unknown transfer: source={source_node_id}, file={file_id}")]
    UnknownTransfer {
        source_node_id: String,
        file_id: String,
    },

    /// File is neither in flight nor stored anywhere.
    #[error("unknown file: {0}")]
    UnknownFile(String),

    /// No replica target could be secured.
    #[error("no capacity for {file_name} ({file_size} bytes)")]
    NoCapacity { file_name: String, file_size: u64 },

    #[error("node already registered: {0}")]
    DuplicateNode(String),

    #[error("ip address already in use: {0}")]
    DuplicateAddress(String),

    #[error("refusing to transfer empty file: {0}")]
    EmptyFile(String),

    #[error("replication factor must be at least 1")]
    InvalidReplicationFactor,
}
