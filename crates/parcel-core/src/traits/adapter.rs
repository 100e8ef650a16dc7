// # Provider Adapter Trait
//
// Defines the interface between the provider engine and one external
// tracking source.
//
// ## Implementations
//
// - Aliyun market express API: `parcel-provider-aliyun` crate
// - TrackingMore (push-based): `parcel-provider-trackingmore` crate
//
// ## Usage
//
// ```rust,ignore
// use parcel_core::{Dispatcher, MemoryCache, ProviderOptions};
// use std::sync::Arc;
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let dispatcher = Dispatcher::new(Arc::new(MemoryCache::new()));
//     let adapter = /* ProviderAdapter implementation */;
//
//     dispatcher
//         .register(Arc::new(adapter), ProviderOptions::named("ALI"))
//         .await?;
//
//     Ok(())
// }
// ```

use async_trait::async_trait;
use serde_json::Value;

use crate::config::ConfigPatch;
use crate::model::{CarrierCode, ProcessEvent, QueryParam, TrackingSnapshot, TrackingState};

/// Trait for carrier adapter implementations
///
/// An adapter knows how to reach one tracking source and how to read its
/// payloads. It owns no state about shipments: caching, throttling,
/// delivery inference and persistence belong to [`crate::Provider`].
///
/// # Thread Safety
///
/// Implementations must be thread-safe and usable across async tasks.
///
/// # Payloads
///
/// Raw payloads travel as [`serde_json::Value`] so the engine can store them
/// in the snapshot unchanged. The extractor methods (`state`, `process`,
/// `identity`) must tolerate `Value::Null` and partial payloads.
///
/// # Failures
///
/// Network calls return an error and never retry. The engine propagates the
/// error to the caller unmodified.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Get the adapter name (for logging/debugging)
    fn adapter_name(&self) -> &'static str;

    /// Configuration defaults this adapter ships with
    ///
    /// Layered between the built-in defaults and the caller's options.
    fn default_options(&self) -> ConfigPatch {
        ConfigPatch::default()
    }

    /// Provider-specific setup, run once before [`Self::load_known_codes`]
    ///
    /// # Parameters
    ///
    /// - `settings`: The adapter-specific settings block from the config
    async fn bootstrap(&self, _settings: &Value) -> Result<(), crate::Error> {
        Ok(())
    }

    /// Load the full carrier code list
    async fn load_known_codes(&self) -> Result<Vec<CarrierCode>, crate::Error>;

    /// Fetch the current tracking payload for a snapshot
    async fn fetch(&self, snapshot: &TrackingSnapshot) -> Result<Value, crate::Error>;

    /// Register a tracking number with a push-based source
    ///
    /// The returned payload is merged like a fetch result. Poll-based
    /// adapters keep the default, which reports the operation as unsupported.
    async fn register_tracking(&self, _snapshot: &TrackingSnapshot) -> Result<Value, crate::Error> {
        Err(crate::Error::unsupported(format!(
            "{} does not accept tracking registrations",
            self.adapter_name()
        )))
    }

    /// Extract the reported state from a payload
    fn state(&self, raw: &Value) -> TrackingState;

    /// Extract the history from a payload, in any order
    fn process(&self, raw: &Value) -> Vec<ProcessEvent>;

    /// Recover the request identity embedded in a pushed payload
    ///
    /// # Parameters
    ///
    /// - `raw`: The pushed payload
    /// - `known`: This provider's carrier code list
    ///
    /// # Returns
    ///
    /// `None` if the payload does not name a known carrier and number
    fn identity(&self, raw: &Value, known: &[CarrierCode]) -> Option<QueryParam>;
}
