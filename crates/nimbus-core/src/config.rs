//! Configuration system for Nimbus.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $NIMBUS_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/nimbus/config.toml
//!   3. ~/.config/nimbus/config.toml

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::topology::{LinkSpec, NodeSpec};
use crate::transfer::{TransferRequest, MIB};

/// Top-level configuration.
///
/// Sections missing from a file take their defaults; missing node, link,
/// transfer and outage lists are empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NimbusConfig {
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub delivery: DeliveryModel,
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub links: Vec<LinkSpec>,
    #[serde(default)]
    pub transfers: Vec<TransferRequest>,
    #[serde(default)]
    pub outages: Vec<OutagePlan>,
}

/// How the caller-side driver polls transfers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Chunks attempted per transfer per step.
    pub chunks_per_step: usize,
    /// Delay between driver ticks.
    pub poll_interval_ms: u64,
    /// Max steps running at once across all transfers.
    pub max_concurrent_steps: usize,
    /// Consecutive zero-progress steps before a transfer is declared stalled.
    /// 0 = never give up.
    pub stall_limit: u32,
}

/// Per-node delivery accounting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryModel {
    /// Share of the instantaneous available bandwidth a delivery consumes.
    pub utilization_factor: f64,
    /// Cap on the simulated per-chunk transfer time. 0 = no sleeping.
    pub max_simulated_latency_ms: u64,
    /// Count in-flight reservations against capacity at admission time.
    pub strict_admission: bool,
}

/// A scripted liveness change, applied before driver tick `at_tick`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutagePlan {
    pub node_id: String,
    pub at_tick: u64,
    #[serde(default)]
    pub alive: bool,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NimbusConfig {
    fn default() -> Self {
        Self {
            simulation: SimulationConfig::default(),
            delivery: DeliveryModel::default(),
            nodes: vec![
                NodeSpec::new("n1", "10.0.0.1", 20, 100),
                NodeSpec::new("n2", "10.0.0.2", 20, 100),
                NodeSpec::new("n3", "10.0.0.3", 10, 50),
            ],
            links: vec![
                LinkSpec {
                    a: "n1".into(),
                    b: "n2".into(),
                    bandwidth_mbps: 100,
                },
                LinkSpec {
                    a: "n2".into(),
                    b: "n3".into(),
                    bandwidth_mbps: 50,
                },
            ],
            transfers: vec![TransferRequest {
                source_node_id: "n1".into(),
                target_node_id: None,
                file_name: "x.bin".into(),
                file_size: 5 * MIB,
                replication_factor: 2,
            }],
            outages: Vec::new(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            chunks_per_step: 2,
            poll_interval_ms: 100,
            max_concurrent_steps: 4,
            stall_limit: 50,
        }
    }
}

impl Default for DeliveryModel {
    fn default() -> Self {
        Self {
            utilization_factor: 0.8,
            max_simulated_latency_ms: 0,
            strict_admission: false,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("nimbus")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl NimbusConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            Self::read_file(&path)?
        } else {
            NimbusConfig::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load from an explicit path. The file must exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::read_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Reject values the delivery model cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let factor = self.delivery.utilization_factor;
        if !(factor > 0.0 && factor <= 1.0) {
            return Err(ConfigError::Invalid {
                key: "delivery.utilization_factor",
                reason: format!("{factor} is outside (0, 1]"),
            });
        }
        Ok(())
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("NIMBUS_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            NimbusConfig::default().write_to(&path)?;
        }
        Ok(path)
    }

    /// Serialize this config to `path`, creating parent directories.
    pub fn write_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        }
        let text = toml::to_string_pretty(self).map_err(ConfigError::SerializeFailed)?;
        std::fs::write(path, text).map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))
    }

    /// Apply NIMBUS_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse("NIMBUS_SIMULATION__CHUNKS_PER_STEP") {
            self.simulation.chunks_per_step = v;
        }
        if let Some(v) = env_parse("NIMBUS_SIMULATION__POLL_INTERVAL_MS") {
            self.simulation.poll_interval_ms = v;
        }
        if let Some(v) = env_parse("NIMBUS_SIMULATION__MAX_CONCURRENT_STEPS") {
            self.simulation.max_concurrent_steps = v;
        }
        if let Some(v) = env_parse("NIMBUS_SIMULATION__STALL_LIMIT") {
            self.simulation.stall_limit = v;
        }
        if let Ok(v) = std::env::var("NIMBUS_DELIVERY__STRICT_ADMISSION") {
            self.delivery.strict_admission = v == "true" || v == "1";
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
