// # parcel-core
//
// Core library for the parcel tracking aggregator.
//
// ## Architecture Overview
//
// This library answers "where is this parcel?" by routing each request to
// one of several external tracking sources and caching the answer:
// - **ProviderAdapter**: Trait for reaching one tracking source and reading its payloads
// - **SnapshotCache**: Trait for the key-value store holding canonical snapshots
// - **Provider**: Engine that validates, throttles, merges and persists
// - **Dispatcher**: Weight-ordered registry that picks a provider per request
// - **resolver / guess**: Carrier-code fuzzy matching and delivery inference
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Carrier I/O lives in adapter crates, policy lives here
// 2. **Cache as Source of Truth**: Every answer is a snapshot read from or written to the cache
// 3. **Freeze on Delivery**: A delivered snapshot is never written again
// 4. **Soft Failure**: A request nobody accepts yields `None`, not an error
// 5. **Library-First**: The daemon is a thin wrapper around this crate

pub mod traits;
pub mod model;
pub mod config;
pub mod error;
pub mod resolver;
pub mod guess;
pub mod cache;
pub mod provider;
pub mod dispatcher;

// Re-export core types for convenience
pub use traits::{ProviderAdapter, SnapshotCache};
pub use model::{CarrierCode, ProcessEvent, QueryParam, TrackingSnapshot, TrackingState};
pub use config::{
    CodeOverride, ConfigPatch, DispatcherConfig, Policy, PolicyKind, ProviderConfig,
    ProviderOptions, SignTemplate,
};
pub use error::{Error, Result};
pub use cache::MemoryCache;
pub use provider::Provider;
pub use dispatcher::Dispatcher;
