//! Transfer driver — advances tracked transfers on a fixed interval.
//!
//! The network never moves chunks on its own. The driver keeps a job per
//! file, and on every tick runs one `advance_transfer` step for each job
//! still running. Steps execute on the blocking pool (chunk delivery may
//! sleep for simulated wire time), bounded by a semaphore.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Semaphore;

use nimbus_core::SimulationConfig;

use crate::error::NetworkError;
use crate::network::StorageNetwork;
use crate::report::StepOutcome;

#[derive(Debug, Clone)]
pub struct DriverSettings {
    pub chunks_per_step: usize,
    pub poll_interval: Duration,
    pub max_concurrent_steps: usize,
    /// 0 = never give up on a transfer.
    pub stall_limit: u32,
}

impl From<&SimulationConfig> for DriverSettings {
    fn from(config: &SimulationConfig) -> Self {
        Self {
            chunks_per_step: config.chunks_per_step,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            max_concurrent_steps: config.max_concurrent_steps,
            stall_limit: config.stall_limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriveState {
    Running,
    Completed,
    /// Too many consecutive steps without progress.
    Stalled,
    /// The network no longer knows the transfer.
    Lost(String),
}

/// Driver-side bookkeeping for one transfer.
#[derive(Debug, Clone, Serialize)]
pub struct DriveJob {
    pub source_node_id: String,
    pub file_id: String,
    pub steps: u64,
    pub chunks_delivered: u64,
    /// Consecutive zero-progress steps.
    pub idle_steps: u32,
    pub state: DriveState,
}

#[derive(Clone)]
pub struct TransferDriver {
    network: Arc<StorageNetwork>,
    /// file_id → job
    jobs: Arc<DashMap<String, DriveJob>>,
    settings: DriverSettings,
    semaphore: Arc<Semaphore>,
}

impl TransferDriver {
    pub fn new(network: Arc<StorageNetwork>, settings: DriverSettings) -> Self {
        let max_steps = if settings.max_concurrent_steps == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            settings.max_concurrent_steps
        };

        tracing::info!(
            max_concurrent = max_steps,
            chunks_per_step = settings.chunks_per_step,
            "transfer driver ready"
        );

        Self {
            network,
            jobs: Arc::new(DashMap::new()),
            settings,
            semaphore: Arc::new(Semaphore::new(max_steps)),
        }
    }

    pub fn network(&self) -> &Arc<StorageNetwork> {
        &self.network
    }

    /// Start driving a transfer. Tracking the same file twice is a no-op.
    pub fn track(&self, source_node_id: &str, file_id: &str) {
        self.jobs.entry(file_id.to_string()).or_insert_with(|| {
            tracing::debug!(source = source_node_id, file_id, "driving transfer");
            DriveJob {
                source_node_id: source_node_id.to_string(),
                file_id: file_id.to_string(),
                steps: 0,
                chunks_delivered: 0,
                idle_steps: 0,
                state: DriveState::Running,
            }
        });
    }

    /// Drop every job that is no longer running and return them.
    pub fn take_finished(&self) -> Vec<DriveJob> {
        let finished: Vec<String> = self
            .jobs
            .iter()
            .filter(|j| j.state != DriveState::Running)
            .map(|j| j.key().clone())
            .collect();

        let mut taken: Vec<DriveJob> = finished
            .iter()
            .filter_map(|id| {
                self.jobs
                    .remove_if(id, |_, j| j.state != DriveState::Running)
                    .map(|(_, job)| job)
            })
            .collect();
        taken.sort_by(|a, b| a.file_id.cmp(&b.file_id));
        taken
    }

    pub fn job(&self, file_id: &str) -> Option<DriveJob> {
        self.jobs.get(file_id).map(|j| j.clone())
    }

    /// All jobs, ordered by file id.
    pub fn jobs(&self) -> Vec<DriveJob> {
        let mut jobs: Vec<DriveJob> = self.jobs.iter().map(|j| j.clone()).collect();
        jobs.sort_by(|a, b| a.file_id.cmp(&b.file_id));
        jobs
    }

    pub fn running(&self) -> usize {
        self.jobs
            .iter()
            .filter(|j| j.state == DriveState::Running)
            .count()
    }

    /// Run one step for every running job and wait for all of them.
    /// Returns the number of steps executed.
    pub async fn tick(&self) -> usize {
        let running: Vec<(String, String)> = self
            .jobs
            .iter()
            .filter(|j| j.state == DriveState::Running)
            .map(|j| (j.source_node_id.clone(), j.file_id.clone()))
            .collect();

        let mut handles = Vec::with_capacity(running.len());
        for (source, file_id) in running {
            let permit = match Arc::clone(&self.semaphore).acquire_owned().await {
                Ok(p) => p,
                Err(_) => break, // semaphore closed
            };
            let network = Arc::clone(&self.network);
            let chunks = self.settings.chunks_per_step;
            let id = file_id.clone();

            let handle = tokio::task::spawn_blocking(move || {
                let outcome = network.advance_transfer(&source, &id, chunks);
                drop(permit);
                outcome
            });
            handles.push((file_id, handle));
        }

        let ran = handles.len();
        for (file_id, handle) in handles {
            match handle.await {
                Ok(outcome) => self.record(&file_id, outcome),
                Err(e) => self.set_state(&file_id, DriveState::Lost(format!("step aborted: {e}"))),
            }
        }
        ran
    }

    /// Tick until no job is running. `before_tick` sees the tick number
    /// before each round of steps. Returns the number of ticks taken.
    ///
    /// With `stall_limit` 0 a transfer that can never progress keeps this
    /// running forever.
    pub async fn run_with<F>(&self, mut before_tick: F) -> u64
    where
        F: FnMut(u64),
    {
        let period = self.settings.poll_interval.max(Duration::from_millis(1));
        let mut interval = tokio::time::interval(period);
        let mut tick = 0u64;

        while self.running() > 0 {
            interval.tick().await;
            before_tick(tick);
            self.tick().await;
            tick += 1;
        }
        tick
    }

    pub async fn run_until_idle(&self) -> u64 {
        self.run_with(|_| {}).await
    }

    fn record(&self, file_id: &str, outcome: Result<StepOutcome, NetworkError>) {
        let Some(mut job) = self.jobs.get_mut(file_id) else {
            return;
        };

        let step = match outcome {
            Ok(step) => step,
            Err(e) => {
                tracing::warn!(file_id, error = %e, "transfer lost");
                job.state = DriveState::Lost(e.to_string());
                return;
            }
        };

        job.steps += 1;
        job.chunks_delivered += step.delivered as u64;

        if step.completed {
            job.state = DriveState::Completed;
            tracing::info!(
                file_id,
                steps = job.steps,
                chunks = job.chunks_delivered,
                "transfer driven to completion"
            );
        } else if step.delivered == 0 {
            job.idle_steps += 1;
            if self.settings.stall_limit > 0 && job.idle_steps >= self.settings.stall_limit {
                job.state = DriveState::Stalled;
                tracing::warn!(file_id, idle_steps = job.idle_steps, "transfer stalled");
            }
        } else {
            job.idle_steps = 0;
        }
    }

    fn set_state(&self, file_id: &str, state: DriveState) {
        if let Some(mut job) = self.jobs.get_mut(file_id) {
            tracing::warn!(file_id, ?state, "transfer job state forced");
            job.state = state;
        }
    }
}
