//! Transfer data model — a file split into addressable chunks.
//!
//! Chunk sizes are tiered by file size so that per-step work stays bounded
//! and progress is visible at a human-legible granularity:
//!
//!   < 10 MiB   — 512 KiB chunks
//!   < 100 MiB  — 2 MiB chunks
//!   otherwise  — 10 MiB chunks
//!
//! Checksums are synthetic identifiers derived from `(file_id, chunk_id)`.
//! They say nothing about chunk content.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;

const SMALL_FILE_LIMIT: u64 = 10 * MIB;
const MEDIUM_FILE_LIMIT: u64 = 100 * MIB;

const SMALL_CHUNK: u64 = 512 * KIB;
const MEDIUM_CHUNK: u64 = 2 * MIB;
const LARGE_CHUNK: u64 = 10 * MIB;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStatus {
    Pending,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    InProgress,
    Completed,
}

/// One addressable slice of a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// 0-based, contiguous within the transfer.
    pub chunk_id: u32,
    pub size: u64,
    pub checksum: String,
    pub status: ChunkStatus,
    /// Node that accepted the chunk. Set on completion.
    pub stored_node: Option<String>,
}

impl Chunk {
    pub fn is_completed(&self) -> bool {
        self.status == ChunkStatus::Completed
    }
}

/// A file being delivered to (or held by) one or more replica nodes.
///
/// `status` is `Completed` exactly when every chunk is `Completed`; the
/// mutators below keep that true.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub file_id: String,
    pub file_name: String,
    pub total_size: u64,
    pub chunks: Vec<Chunk>,
    pub status: TransferStatus,
    /// Unix ms.
    pub created_at: u64,
    /// Unix ms, set when the last chunk completes.
    pub completed_at: Option<u64>,
    /// Nodes intended to hold a full copy, in delivery preference order.
    pub replication_targets: Vec<String>,
}

impl Transfer {
    /// Build a fresh transfer with its chunk plan laid out.
    pub fn new(
        file_id: impl Into<String>,
        file_name: impl Into<String>,
        total_size: u64,
        replication_targets: Vec<String>,
    ) -> Self {
        let file_id = file_id.into();
        let chunks = plan_chunks(&file_id, total_size);
        Self {
            file_id,
            file_name: file_name.into(),
            total_size,
            chunks,
            status: TransferStatus::Pending,
            created_at: now_ms(),
            completed_at: None,
            replication_targets,
        }
    }

    pub fn chunk(&self, chunk_id: u32) -> Option<&Chunk> {
        self.chunks.get(chunk_id as usize)
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn completed_chunks(&self) -> usize {
        self.chunks.iter().filter(|c| c.is_completed()).count()
    }

    /// Pending chunks in ascending chunk-id order.
    pub fn pending_chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter().filter(|c| !c.is_completed())
    }

    pub fn is_complete(&self) -> bool {
        self.chunks.iter().all(Chunk::is_completed)
    }

    /// Mark one chunk as stored on `node_id`.
    ///
    /// Returns false if the chunk is unknown or already completed. When the
    /// last chunk lands, the transfer itself becomes `Completed`.
    pub fn complete_chunk(&mut self, chunk_id: u32, node_id: &str) -> bool {
        let Some(chunk) = self.chunks.get_mut(chunk_id as usize) else {
            return false;
        };
        if chunk.is_completed() {
            return false;
        }
        chunk.status = ChunkStatus::Completed;
        chunk.stored_node = Some(node_id.to_string());

        if self.is_complete() {
            self.status = TransferStatus::Completed;
            self.completed_at = Some(now_ms());
        } else {
            self.status = TransferStatus::InProgress;
        }
        true
    }

    /// Append a replica target. Existing targets are never removed or reordered.
    pub fn add_replication_target(&mut self, node_id: &str) -> bool {
        if self.replication_targets.iter().any(|t| t == node_id) {
            return false;
        }
        self.replication_targets.push(node_id.to_string());
        true
    }

    /// Same file and chunk plan, every chunk pending, no targets.
    pub fn fresh_copy(&self) -> Self {
        Self::new(
            self.file_id.clone(),
            self.file_name.clone(),
            self.total_size,
            Vec::new(),
        )
    }
}

/// A caller's request to place a file on the cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    pub source_node_id: String,
    /// Preferred first replica, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_node_id: Option<String>,
    pub file_name: String,
    pub file_size: u64,
    #[serde(default = "default_replication_factor")]
    pub replication_factor: usize,
}

fn default_replication_factor() -> usize {
    2
}

// ── Chunking policy ───────────────────────────────────────────────────────────

/// Chunk size tier for a file of `file_size` bytes.
pub fn chunk_size_for(file_size: u64) -> u64 {
    if file_size < SMALL_FILE_LIMIT {
        SMALL_CHUNK
    } else if file_size < MEDIUM_FILE_LIMIT {
        MEDIUM_CHUNK
    } else {
        LARGE_CHUNK
    }
}

/// Lay out the chunks for a file. The final chunk carries the remainder.
pub fn plan_chunks(file_id: &str, file_size: u64) -> Vec<Chunk> {
    let chunk_size = chunk_size_for(file_size);
    let count = file_size.div_ceil(chunk_size);

    (0..count)
        .map(|i| {
            let chunk_id = i as u32;
            Chunk {
                chunk_id,
                size: chunk_size.min(file_size - i * chunk_size),
                checksum: synthetic_checksum(file_id, chunk_id),
                status: ChunkStatus::Pending,
                stored_node: None,
            }
        })
        .collect()
}

/// Identifier for a chunk, derived from its position only.
pub fn synthetic_checksum(file_id: &str, chunk_id: u32) -> String {
    let digest = blake3::hash(format!("{file_id}-{chunk_id}").as_bytes());
    hex::encode(&digest.as_bytes()[..16])
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
