//! nimbus-core — shared types for the Nimbus storage cluster simulator.
//! The transfer data model, chunking policy, topology specs and config.

pub mod config;
pub mod ids;
pub mod topology;
pub mod transfer;

pub use config::{DeliveryModel, NimbusConfig, OutagePlan, SimulationConfig};
pub use topology::{LinkSpec, NodeSpec};
pub use transfer::{Chunk, ChunkStatus, Transfer, TransferRequest, TransferStatus};
