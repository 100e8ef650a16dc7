// # Snapshot Cache Implementations
//
// This module provides implementations of the SnapshotCache trait.

pub mod memory;

pub use memory::MemoryCache;
