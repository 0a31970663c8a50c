//! nimbus-services — the simulation engine.
//! Storage nodes, the network that places and delivers files across them,
//! and the driver that steps transfers forward.

pub mod driver;
pub mod error;
pub mod network;
pub mod node;
pub mod placement;
pub mod report;

pub use driver::{DriveJob, DriveState, DriverSettings, TransferDriver};
pub use error::{AdmissionRejected, NetworkError};
pub use network::StorageNetwork;
pub use node::{Delivery, RejectReason, StorageNode};
pub use report::{
    FileStatus, NetworkStats, NetworkUtilization, NodeDescriptor, NodeMetrics, NodeSummary,
    PerformanceMetrics, StepOutcome, StorageUtilization,
};
