//! File identifier generation.

use rand::RngCore;
use std::time::{SystemTime, UNIX_EPOCH};

/// Generate a file id unique across the process lifetime.
///
/// Hash of name, wall-clock nanoseconds and 64 random bits. Only uniqueness
/// matters here.
pub fn new_file_id(file_name: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let salt = rand::thread_rng().next_u64();

    let mut hasher = blake3::Hasher::new();
    hasher.update(file_name.as_bytes());
    hasher.update(&nanos.to_le_bytes());
    hasher.update(&salt.to_le_bytes());
    hex::encode(&hasher.finalize().as_bytes()[..16])
}
