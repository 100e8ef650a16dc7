//! Core traits for the parcel tracking system
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`ProviderAdapter`]: Talk to one external tracking source
//! - [`SnapshotCache`]: TTL key-value store for canonical snapshots

pub mod adapter;
pub mod snapshot_cache;

pub use adapter::ProviderAdapter;
pub use snapshot_cache::SnapshotCache;
