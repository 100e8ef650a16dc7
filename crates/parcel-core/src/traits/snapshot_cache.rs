// # Snapshot Cache Trait
//
// Defines the interface for the key-value store holding canonical
// tracking snapshots.
//
// ## Purpose
//
// The cache is the only source of truth for a shipment's state. The engine
// reads a snapshot, merges new carrier data into it and writes it back with
// a TTL; expiry is the only way an entry disappears.
//
// ## Implementations
//
// - In-memory: `MemoryCache` in this crate
// - External stores (e.g. Redis) implement the same two calls
//
// ## Key Format
//
// `EXPRESS_CACHE_{provider}_{code}_{number}`

use async_trait::async_trait;
use std::time::Duration;

/// Trait for snapshot cache implementations
///
/// Values are serialized snapshots. The engine owns (de)serialization and
/// treats an undecodable value as a miss, so implementations store and
/// return strings verbatim.
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple tasks.
///
/// # Atomicity
///
/// No compare-and-swap is required or used. Two concurrent read-modify-write
/// cycles on one key resolve as last-writer-wins.
#[async_trait]
pub trait SnapshotCache: Send + Sync {
    /// Get the serialized snapshot stored under `key`
    ///
    /// # Returns
    ///
    /// - `Ok(Some(String))`: A live entry
    /// - `Ok(None)`: Missing or expired
    /// - `Err(Error)`: Transport error
    async fn get(&self, key: &str) -> Result<Option<String>, crate::Error>;

    /// Store a serialized snapshot under `key` for `ttl`
    ///
    /// Replaces any existing entry and restarts its TTL.
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), crate::Error>;
}
