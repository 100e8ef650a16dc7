//! Test doubles and common utilities for provider contract tests
//!
//! This module provides minimal test doubles that record how the engine
//! talks to adapters and to the cache, without any network I/O.

#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use parcel_core::cache::MemoryCache;
use parcel_core::config::{ConfigPatch, ProviderConfig};
use parcel_core::provider::{Provider, cache_key};
use parcel_core::error::{Error, Result};
use parcel_core::model::{CarrierCode, ProcessEvent, QueryParam, TrackingSnapshot, TrackingState};
use parcel_core::traits::{ProviderAdapter, SnapshotCache};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Tracking number used across the contract tests
pub const NUMBER: &str = "ZT1234567890";

/// Carrier list shared by the mock adapters
pub fn known_codes() -> Vec<CarrierCode> {
    vec![
        CarrierCode::new("中通快递", "ZTO"),
        CarrierCode::new("圆通速递", "YTO"),
        CarrierCode::new("顺丰速运", "SF"),
        CarrierCode::new("韵达快递", "YUNDA"),
    ]
}

/// A ZTO request for [`NUMBER`]
pub fn param() -> QueryParam {
    QueryParam::new("ZTO", NUMBER)
}

/// Build a mock payload
///
/// Shape: `{"code", "number", "state", "events": [{"time", "content"}]}`
pub fn payload(state: TrackingState, events: &[(DateTime<Utc>, &str)]) -> Value {
    json!({
        "code": "ZTO",
        "number": NUMBER,
        "state": state,
        "events": events
            .iter()
            .map(|(time, content)| json!({ "time": time.to_rfc3339(), "content": content }))
            .collect::<Vec<_>>(),
    })
}

/// A time `hours` in the past
pub fn hours_ago(hours: i64) -> DateTime<Utc> {
    Utc::now() - Duration::hours(hours)
}

/// A mock ProviderAdapter that tracks calls and returns a settable payload
pub struct MockAdapter {
    /// Adapter name
    pub name: &'static str,
    /// Defaults reported through default_options()
    defaults: ConfigPatch,
    /// Carrier codes returned by load_known_codes()
    known: Vec<CarrierCode>,
    /// Payload returned by fetch() and register_tracking()
    response: Arc<Mutex<Value>>,
    /// Make fetch() fail
    fail_fetch: Arc<AtomicBool>,
    /// Make register_tracking() fail
    fail_register: Arc<AtomicBool>,
    /// Call counter for fetch()
    fetch_call_count: Arc<AtomicUsize>,
    /// Call counter for register_tracking()
    register_call_count: Arc<AtomicUsize>,
    /// Call counter for bootstrap()
    bootstrap_call_count: Arc<AtomicUsize>,
    /// Settings seen by bootstrap()
    bootstrap_settings: Arc<Mutex<Option<Value>>>,
}

impl MockAdapter {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            defaults: ConfigPatch::default(),
            known: known_codes(),
            response: Arc::new(Mutex::new(payload(
                TrackingState::Transit,
                &[(hours_ago(2), "快件已到达【杭州中转部】")],
            ))),
            fail_fetch: Arc::new(AtomicBool::new(false)),
            fail_register: Arc::new(AtomicBool::new(false)),
            fetch_call_count: Arc::new(AtomicUsize::new(0)),
            register_call_count: Arc::new(AtomicUsize::new(0)),
            bootstrap_call_count: Arc::new(AtomicUsize::new(0)),
            bootstrap_settings: Arc::new(Mutex::new(None)),
        }
    }

    /// Replace the defaults reported through default_options()
    pub fn with_defaults(mut self, defaults: ConfigPatch) -> Self {
        self.defaults = defaults;
        self
    }

    /// Replace the carrier list
    pub fn with_known(mut self, known: Vec<CarrierCode>) -> Self {
        self.known = known;
        self
    }

    /// Create a new MockAdapter that shares counters and payload with an existing one
    pub fn sharing_counters_with(other: &Self) -> Self {
        Self {
            name: other.name,
            defaults: other.defaults.clone(),
            known: other.known.clone(),
            response: Arc::clone(&other.response),
            fail_fetch: Arc::clone(&other.fail_fetch),
            fail_register: Arc::clone(&other.fail_register),
            fetch_call_count: Arc::clone(&other.fetch_call_count),
            register_call_count: Arc::clone(&other.register_call_count),
            bootstrap_call_count: Arc::clone(&other.bootstrap_call_count),
            bootstrap_settings: Arc::clone(&other.bootstrap_settings),
        }
    }

    /// Set the payload returned by the next calls
    pub fn respond_with(&self, raw: Value) {
        *self.response.lock().unwrap() = raw;
    }

    /// Make fetch() fail (or succeed again)
    pub fn fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    /// Make register_tracking() fail (or succeed again)
    pub fn fail_register(&self, fail: bool) {
        self.fail_register.store(fail, Ordering::SeqCst);
    }

    /// Get the number of times fetch() was called
    pub fn fetch_call_count(&self) -> usize {
        self.fetch_call_count.load(Ordering::SeqCst)
    }

    /// Get the number of times register_tracking() was called
    pub fn register_call_count(&self) -> usize {
        self.register_call_count.load(Ordering::SeqCst)
    }

    /// Get the number of times bootstrap() was called
    pub fn bootstrap_call_count(&self) -> usize {
        self.bootstrap_call_count.load(Ordering::SeqCst)
    }

    /// Settings passed to the last bootstrap()
    pub fn bootstrap_settings(&self) -> Option<Value> {
        self.bootstrap_settings.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for MockAdapter {
    fn adapter_name(&self) -> &'static str {
        self.name
    }

    fn default_options(&self) -> ConfigPatch {
        self.defaults.clone()
    }

    async fn bootstrap(&self, settings: &Value) -> Result<()> {
        self.bootstrap_call_count.fetch_add(1, Ordering::SeqCst);
        *self.bootstrap_settings.lock().unwrap() = Some(settings.clone());
        Ok(())
    }

    async fn load_known_codes(&self) -> Result<Vec<CarrierCode>> {
        Ok(self.known.clone())
    }

    async fn fetch(&self, _snapshot: &TrackingSnapshot) -> Result<Value> {
        self.fetch_call_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(Error::http("mock upstream unavailable"));
        }
        Ok(self.response.lock().unwrap().clone())
    }

    async fn register_tracking(&self, _snapshot: &TrackingSnapshot) -> Result<Value> {
        self.register_call_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_register.load(Ordering::SeqCst) {
            return Err(Error::http("mock registration rejected"));
        }
        Ok(self.response.lock().unwrap().clone())
    }

    fn state(&self, raw: &Value) -> TrackingState {
        raw.get("state")
            .cloned()
            .and_then(|state| serde_json::from_value(state).ok())
            .unwrap_or(TrackingState::Unactive)
    }

    fn process(&self, raw: &Value) -> Vec<ProcessEvent> {
        raw.get("events")
            .and_then(Value::as_array)
            .map(|events| {
                events
                    .iter()
                    .filter_map(|event| {
                        let time = DateTime::parse_from_rfc3339(event.get("time")?.as_str()?).ok()?;
                        let content = event.get("content")?.as_str()?;
                        Some(ProcessEvent::new(time.with_timezone(&Utc), content))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn identity(&self, raw: &Value, known: &[CarrierCode]) -> Option<QueryParam> {
        let code = raw.get("code")?.as_str()?;
        let number = raw.get("number")?.as_str()?;
        known
            .iter()
            .find(|entry| entry.code == code)
            .map(|entry| QueryParam::new(code, number).with_company(entry.company.clone()))
    }
}

/// A SnapshotCache that counts calls and delegates to MemoryCache
#[derive(Clone, Default)]
pub struct CountingCache {
    inner: MemoryCache,
    get_call_count: Arc<AtomicUsize>,
    set_call_count: Arc<AtomicUsize>,
    last_ttl: Arc<Mutex<Option<std::time::Duration>>>,
}

impl CountingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of times get() was called
    pub fn get_call_count(&self) -> usize {
        self.get_call_count.load(Ordering::SeqCst)
    }

    /// Get the number of times set() was called
    pub fn set_call_count(&self) -> usize {
        self.set_call_count.load(Ordering::SeqCst)
    }

    /// TTL passed to the last set()
    pub fn last_ttl(&self) -> Option<std::time::Duration> {
        *self.last_ttl.lock().unwrap()
    }

    /// Read and decode a stored snapshot
    pub async fn snapshot(&self, key: &str) -> Option<TrackingSnapshot> {
        let raw = self.inner.get(key).await.unwrap()?;
        Some(serde_json::from_str(&raw).unwrap())
    }

    /// Store a raw string, bypassing the counters
    pub async fn seed(&self, key: &str, value: &str) {
        self.inner
            .set(key, value.to_string(), std::time::Duration::from_secs(60))
            .await
            .unwrap();
    }
}

#[async_trait::async_trait]
impl SnapshotCache for CountingCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.get_call_count.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: String, ttl: std::time::Duration) -> Result<()> {
        self.set_call_count.fetch_add(1, Ordering::SeqCst);
        *self.last_ttl.lock().unwrap() = Some(ttl);
        self.inner.set(key, value, ttl).await
    }
}

/// Build and initialize a provider the way the dispatcher does
///
/// Config layers: built-in defaults, then the adapter's defaults, then `patch`.
pub async fn init_provider(adapter: MockAdapter, cache: &CountingCache, patch: ConfigPatch) -> Provider {
    let config = ProviderConfig::new(adapter.name)
        .merged(&adapter.default_options())
        .merged(&patch);
    let provider = Provider::new(Arc::new(adapter), Arc::new(cache.clone()), config)
        .expect("provider construction succeeds");
    provider.init().await.expect("init succeeds");
    provider
}

/// Cache key of the ZTO snapshot for [`NUMBER`] on `provider`
pub fn key(provider: &str) -> String {
    cache_key(provider, "ZTO", NUMBER)
}
