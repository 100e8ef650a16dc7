// # TrackingMore Adapter
//
// This crate provides the TrackingMore adapter ("TM") for the parcel
// tracking aggregator.
//
// ## Behavior
//
// - Push-based: shipments are registered once, then TrackingMore calls back
//   through a webhook that the host forwards to `Dispatcher::push`
// - Forced queries fall back to a direct GET
// - Full error propagation to the provider engine (no retry, no backoff)
// - HTTP timeout configured (30 seconds)
//
// ## Defaults
//
// - Weight 0 (tried before every other provider)
// - One merge per snapshot unless forced; callbacks are not capped
// - `sf-express` is blacklisted (SF numbers need a phone suffix TrackingMore
//   does not accept)
//
// ## Security Requirements
//
// - API key NEVER appears in logs or Debug output
// - API key is read from the provider's settings block (`api_key`)
// - Bootstrap fails fast if the API key is missing
//
// ## API Reference
//
// - Get tracking: GET `/trackings/:carrier_code/:tracking_number`
// - Create tracking: POST `/trackings/post`
// - Carrier list: GET `/carriers`
// - Auth header: `Trackingmore-Api-Key: <api_key>`

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::FixedOffset;
use once_cell::sync::OnceCell;
use parcel_core::config::{ConfigPatch, Policy};
use parcel_core::model::{CarrierCode, ProcessEvent, QueryParam, TrackingSnapshot, TrackingState, parse_timestamp};
use parcel_core::traits::ProviderAdapter;
use parcel_core::{Dispatcher, Error, ProviderOptions, Result};
use serde::Deserialize;
use serde_json::{Value, json};

/// Provider name used for cache keys and dispatch
pub const PROVIDER_NAME: &str = "TM";

/// TrackingMore API v2 base URL
const TRACKINGMORE_API_BASE: &str = "https://api.trackingmore.com/v2";

/// Default HTTP timeout for API requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Carrier codes blacklisted by default
const DEFAULT_BLACKLIST: &[&str] = &["sf-express"];

/// UTC offset assumed for naive checkpoint times
const CHECKPOINT_UTC_OFFSET_SECS: i32 = 8 * 3600;

/// `meta.code` values that mean success
const META_SUCCESS: &[i64] = &[200, 201];

/// One checkpoint in `origin_info.trackinfo`
#[derive(Debug, Deserialize)]
struct Checkpoint {
    #[serde(rename = "Date", default)]
    date: String,
    #[serde(rename = "StatusDescription", default)]
    status_description: String,
}

/// One entry of the carrier list
#[derive(Debug, Deserialize)]
struct Carrier {
    name: String,
    code: String,
}

/// TrackingMore adapter
pub struct TrackingMoreAdapter {
    /// API key
    /// ⚠️ NEVER log this value
    api_key: OnceCell<String>,

    /// API base URL (no trailing `/`)
    base_url: String,

    /// HTTP client for API requests
    client: reqwest::Client,
}

// Custom Debug implementation that hides the API key
impl std::fmt::Debug for TrackingMoreAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackingMoreAdapter")
            .field("api_key", &"<REDACTED>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl TrackingMoreAdapter {
    /// Create an adapter that reads its API key from the settings block
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            api_key: OnceCell::new(),
            base_url: TRACKINGMORE_API_BASE.to_string(),
            client,
        })
    }

    /// Create an adapter with a fixed API key
    pub fn with_api_key(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(Error::config("TrackingMore API key cannot be empty"));
        }

        let adapter = Self::new()?;
        let _ = adapter.api_key.set(api_key);
        Ok(adapter)
    }

    /// Point the adapter at another API host (e.g. a test server)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn api_key(&self) -> Result<&str> {
        self.api_key
            .get()
            .map(String::as_str)
            .ok_or_else(|| Error::not_initialized(PROVIDER_NAME))
    }

    /// Send a request and return the `data` member of the envelope
    async fn request(&self, builder: reqwest::RequestBuilder, what: &str) -> Result<Value> {
        let response = builder
            .header("Trackingmore-Api-Key", self.api_key()?)
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|e| Error::adapter(PROVIDER_NAME, format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());

            return Err(match status.as_u16() {
                401 | 403 => Error::adapter(
                    PROVIDER_NAME,
                    format!("Authentication failed: invalid API key. Status: {}", status),
                ),
                429 => Error::adapter(
                    PROVIDER_NAME,
                    format!("Rate limit exceeded. Please retry later. Status: {}", status),
                ),
                500..=599 => Error::adapter(
                    PROVIDER_NAME,
                    format!("TrackingMore server error (transient): {} - {}", status, error_text),
                ),
                _ => Error::adapter(
                    PROVIDER_NAME,
                    format!("{} failed: {} - {}", what, status, error_text),
                ),
            });
        }

        let envelope: Value = response
            .json()
            .await
            .map_err(|e| Error::adapter(PROVIDER_NAME, format!("Failed to parse response: {}", e)))?;

        unwrap_envelope(envelope, what)
    }
}

/// Check `meta.code` and take `data` out of a response envelope
fn unwrap_envelope(mut envelope: Value, what: &str) -> Result<Value> {
    if let Some(code) = envelope.pointer("/meta/code").and_then(Value::as_i64) {
        if !META_SUCCESS.contains(&code) {
            let message = envelope
                .pointer("/meta/message")
                .and_then(Value::as_str)
                .unwrap_or("no message");
            return Err(Error::adapter(
                PROVIDER_NAME,
                format!("{} rejected: {} ({})", what, message, code),
            ));
        }
    }

    Ok(envelope
        .get_mut("data")
        .map(Value::take)
        .unwrap_or(Value::Null))
}

/// Shape a tracking record like a webhook body
///
/// Tracking records list `customer_email` as an array; webhooks carry one.
fn tracking_to_body(mut info: Value) -> Value {
    if let Some(first) = info
        .get("customer_email")
        .and_then(Value::as_array)
        .map(|emails| emails.first().cloned().unwrap_or(Value::Null))
    {
        info["customer_email"] = first;
    }
    info
}

/// The tracking record inside a payload
///
/// Webhook deliveries wrap the record in `{"meta", "data"}`; stored payloads
/// are the record itself.
fn record(raw: &Value) -> &Value {
    match raw.get("data") {
        Some(data) if data.get("tracking_number").is_some() => data,
        _ => raw,
    }
}

/// Map a TrackingMore status string
fn map_status(status: &str) -> TrackingState {
    match status {
        "delivered" => TrackingState::Delivered,
        "notfound" | "pending" => TrackingState::NotFound,
        "pickup" => TrackingState::Pickup,
        "transit" => TrackingState::Transit,
        "exception" => TrackingState::Exception,
        _ => TrackingState::Expired,
    }
}

#[async_trait]
impl ProviderAdapter for TrackingMoreAdapter {
    fn adapter_name(&self) -> &'static str {
        "trackingmore"
    }

    fn default_options(&self) -> ConfigPatch {
        ConfigPatch::new()
            .push_based(true)
            .weight(0)
            .max_request_count(1)
            .min_refetch_interval_secs(0)
            .policy(Policy::blacklist(DEFAULT_BLACKLIST.iter().copied()))
    }

    async fn bootstrap(&self, settings: &Value) -> Result<()> {
        if let Some(api_key) = settings.get("api_key").and_then(Value::as_str) {
            if !api_key.is_empty() && self.api_key.set(api_key.to_string()).is_err() {
                tracing::debug!("TrackingMore API key already set, ignoring settings value");
            }
        }

        if self.api_key.get().is_none() {
            return Err(Error::config("TrackingMore API key is required (settings.api_key)"));
        }
        Ok(())
    }

    async fn load_known_codes(&self) -> Result<Vec<CarrierCode>> {
        let url = format!("{}/carriers", self.base_url);
        let data = self.request(self.client.get(&url), "Carrier list").await?;

        let carriers: Vec<Carrier> = serde_json::from_value(data).map_err(|e| {
            Error::adapter(PROVIDER_NAME, format!("Invalid carrier list: {}", e))
        })?;
        tracing::debug!("TrackingMore reported {} carriers", carriers.len());

        Ok(carriers
            .into_iter()
            .map(|carrier| CarrierCode::new(carrier.name, carrier.code))
            .collect())
    }

    async fn fetch(&self, snapshot: &TrackingSnapshot) -> Result<Value> {
        let url = format!(
            "{}/trackings/{}/{}",
            self.base_url, snapshot.code, snapshot.number
        );
        tracing::debug!("Querying TrackingMore for {} {}", snapshot.code, snapshot.number);

        let data = self.request(self.client.get(&url), "Tracking lookup").await?;
        Ok(tracking_to_body(data))
    }

    async fn register_tracking(&self, snapshot: &TrackingSnapshot) -> Result<Value> {
        let url = format!("{}/trackings/post", self.base_url);
        let body = json!({
            "tracking_number": snapshot.number,
            "carrier_code": snapshot.code,
            "customer_phone": snapshot.phone,
        });
        tracing::debug!("Registering {} {} with TrackingMore", snapshot.code, snapshot.number);

        let data = self
            .request(self.client.post(&url).json(&body), "Tracking registration")
            .await?;
        Ok(tracking_to_body(data))
    }

    fn state(&self, raw: &Value) -> TrackingState {
        match record(raw).get("status").and_then(Value::as_str) {
            Some(status) => map_status(status),
            None => TrackingState::Unactive,
        }
    }

    fn process(&self, raw: &Value) -> Vec<ProcessEvent> {
        let Some(trackinfo) = record(raw).pointer("/origin_info/trackinfo").cloned() else {
            return Vec::new();
        };
        let checkpoints: Vec<Checkpoint> = serde_json::from_value(trackinfo).unwrap_or_default();
        let Some(offset) = FixedOffset::east_opt(CHECKPOINT_UTC_OFFSET_SECS) else {
            return Vec::new();
        };

        checkpoints
            .into_iter()
            .filter_map(|checkpoint| {
                let time = parse_timestamp(&checkpoint.date, offset)?;
                Some(ProcessEvent::new(time, checkpoint.status_description))
            })
            .collect()
    }

    fn identity(&self, raw: &Value, known: &[CarrierCode]) -> Option<QueryParam> {
        let body = record(raw);
        let carrier_code = body.get("carrier_code")?.as_str()?;
        let number = body.get("tracking_number")?.as_str()?;
        let entry = known.iter().find(|entry| entry.code == carrier_code)?;

        let mut param = QueryParam::new(entry.code.clone(), number)
            .with_id(-1)
            .with_company(entry.company.clone());

        let created_at = body
            .get("created_at")
            .and_then(Value::as_str)
            .zip(FixedOffset::east_opt(CHECKPOINT_UTC_OFFSET_SECS))
            .and_then(|(created_at, offset)| parse_timestamp(created_at, offset));
        if let Some(created_at) = created_at {
            param = param.with_delivery_time(created_at);
        }

        Some(param)
    }
}

/// Register the TrackingMore adapter with a dispatcher
///
/// # Example
///
/// ```rust,no_run
/// use parcel_core::{Dispatcher, MemoryCache, ProviderOptions, ConfigPatch};
/// use std::sync::Arc;
///
/// # async fn run() -> parcel_core::Result<()> {
/// let dispatcher = Dispatcher::new(Arc::new(MemoryCache::new()));
/// let options = ProviderOptions::new(
///     parcel_provider_trackingmore::PROVIDER_NAME,
///     ConfigPatch::new().settings(serde_json::json!({ "api_key": "..." })),
/// );
/// parcel_provider_trackingmore::register(&dispatcher, options).await?;
/// # Ok(())
/// # }
/// ```
pub async fn register(dispatcher: &Dispatcher, options: ProviderOptions) -> Result<()> {
    dispatcher
        .register(Arc::new(TrackingMoreAdapter::new()?), options)
        .await
}
