//! Minimal embedding example for parcel-core
//!
//! This example wires an in-process adapter to a Dispatcher backed by the
//! in-memory cache, then walks through a poll, a webhook push and the
//! freeze on delivery.

use chrono::{Duration, Utc};
use parcel_core::{
    CarrierCode, ConfigPatch, Dispatcher, MemoryCache, ProcessEvent, ProviderAdapter,
    ProviderOptions, QueryParam, Result, SignTemplate, TrackingSnapshot, TrackingState,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Adapter that answers from a canned script instead of the network
struct ScriptedAdapter {
    fetch_calls: Arc<AtomicUsize>,
}

impl ScriptedAdapter {
    fn new() -> Self {
        Self {
            fetch_calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for ScriptedAdapter {
    fn adapter_name(&self) -> &'static str {
        "scripted"
    }

    fn default_options(&self) -> ConfigPatch {
        ConfigPatch::new().sign_templates(vec![SignTemplate::new("ZTO", ["签收", "(?i)signed"])])
    }

    async fn load_known_codes(&self) -> Result<Vec<CarrierCode>> {
        Ok(vec![
            CarrierCode::new("中通快递", "ZTO"),
            CarrierCode::new("圆通速递", "YTO"),
        ])
    }

    async fn fetch(&self, snapshot: &TrackingSnapshot) -> Result<Value> {
        let call = self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        println!("[Embedded] Fetch #{} for {} {}", call + 1, snapshot.code, snapshot.number);

        Ok(json!({
            "code": snapshot.code,
            "number": snapshot.number,
            "state": "TRANSIT",
            "events": [
                { "time": (Utc::now() - Duration::hours(40)).to_rfc3339(), "content": "Picked up" },
                { "time": (Utc::now() - Duration::hours(30)).to_rfc3339(), "content": "Signed by front desk" }
            ]
        }))
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
            .into_iter()
            .flatten()
            .filter_map(|event| {
                let time = event.get("time")?.as_str()?.parse().ok()?;
                Some(ProcessEvent::new(time, event.get("content")?.as_str()?))
            })
            .collect()
    }

    fn identity(&self, raw: &Value, known: &[CarrierCode]) -> Option<QueryParam> {
        let code = raw.get("code")?.as_str()?;
        let number = raw.get("number")?.as_str()?;
        known
            .iter()
            .any(|entry| entry.code == code)
            .then(|| QueryParam::new(code, number))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    println!("=== Embedded parcel-core Example ===\n");

    let dispatcher = Dispatcher::new(Arc::new(MemoryCache::new()));
    let adapter = ScriptedAdapter::new();
    let fetch_calls = Arc::clone(&adapter.fetch_calls);

    dispatcher
        .register(Arc::new(adapter), ProviderOptions::new("DEMO", ConfigPatch::new().weight(10)))
        .await?;
    println!("Providers: {:?}\n", dispatcher.handler_names());

    // Misspelled carrier code: resolved to ZTO before the fetch
    let param = QueryParam::new("ZT0", "ZT1234567890");
    if let Some(snapshot) = dispatcher.query(&param, false, None).await? {
        println!(
            "Query: {} {} -> {} (reported {}, guessed: {}, requests: {})",
            snapshot.code,
            snapshot.number,
            snapshot.state,
            snapshot.source_state,
            snapshot.guess,
            snapshot.request_count
        );
    }

    // Delivered snapshots are frozen: even a forced query does not refetch
    dispatcher.query(&param, true, None).await?;
    println!("Fetches after forced query: {}", fetch_calls.load(Ordering::SeqCst));

    // Webhook push for another shipment
    let pushed = dispatcher
        .push(
            json!({
                "code": "YTO",
                "number": "YT9876543210",
                "state": "PICKUP",
                "events": [{ "time": Utc::now().to_rfc3339(), "content": "Ready for pickup" }]
            }),
            "DEMO",
        )
        .await?;
    if let Some(snapshot) = pushed {
        println!("Push: {} {} -> {}", snapshot.code, snapshot.number, snapshot.state);
    }

    // Unknown carrier for every provider: soft failure
    let unknown = dispatcher
        .query(&QueryParam::new("YTO", "YT9876543210"), false, Some("MISSING"))
        .await?;
    println!("Query on unknown provider: {:?}", unknown.map(|s| s.state));

    println!("\n=== Example Complete ===");
    Ok(())
}
