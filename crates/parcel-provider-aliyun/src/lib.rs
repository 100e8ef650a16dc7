// # Aliyun Express Adapter
//
// This crate provides the Aliyun market express API adapter ("ALI") for the
// parcel tracking aggregator.
//
// ## Behavior
//
// - Poll-based: one GET per fetch, no registration endpoint
// - Full error propagation to the provider engine (no retry, no backoff)
// - HTTP timeout configured (30 seconds)
// - SF Express numbers are suffixed with the last four digits of the phone
// - Event times are naive China Standard Time (UTC+8)
//
// ## Defaults
//
// - Refetch interval: 3600 seconds
// - Request cap: 120 merges per snapshot
//
// ## Security Requirements
//
// - App code NEVER appears in logs or Debug output
// - App code is read from the provider's settings block (`app_code`)
// - Bootstrap fails fast if the app code is missing
//
// ## API Reference
//
// - Query: GET `/cexpress?no=...&type=...`
// - Carrier list: GET `/cExpressLists`
// - Auth header: `Authorization: APPCODE <app_code>`

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::FixedOffset;
use once_cell::sync::OnceCell;
use parcel_core::config::ConfigPatch;
use parcel_core::model::{CarrierCode, ProcessEvent, QueryParam, TrackingSnapshot, TrackingState, parse_timestamp};
use parcel_core::traits::ProviderAdapter;
use parcel_core::{Dispatcher, Error, ProviderOptions, Result};
use serde::Deserialize;
use serde_json::Value;

/// Provider name used for cache keys and dispatch
pub const PROVIDER_NAME: &str = "ALI";

/// Aliyun market gateway base URL
const ALIYUN_API_BASE: &str = "https://cexpress.market.alicloudapi.com/";

/// Default HTTP timeout for API requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Carrier code that requires the phone suffix
const SF_CODE: &str = "SF";

/// UTC offset of event times (China Standard Time)
const EVENT_UTC_OFFSET_SECS: i32 = 8 * 3600;

/// One history line in a query response
#[derive(Debug, Deserialize)]
struct AliyunEvent {
    #[serde(default)]
    time: String,
    #[serde(default)]
    content: String,
}

/// Aliyun market express adapter
///
/// The app code is supplied either at construction or through the provider
/// settings block during bootstrap; the first value set wins.
pub struct AliyunAdapter {
    /// Market app code
    /// ⚠️ NEVER log this value
    app_code: OnceCell<String>,

    /// Gateway base URL (ends with `/`)
    base_url: String,

    /// HTTP client for API requests
    client: reqwest::Client,
}

// Custom Debug implementation that hides the app code
impl std::fmt::Debug for AliyunAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AliyunAdapter")
            .field("app_code", &"<REDACTED>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl AliyunAdapter {
    /// Create an adapter that reads its app code from the settings block
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            app_code: OnceCell::new(),
            base_url: ALIYUN_API_BASE.to_string(),
            client,
        })
    }

    /// Create an adapter with a fixed app code
    pub fn with_app_code(app_code: impl Into<String>) -> Result<Self> {
        let app_code = app_code.into();
        if app_code.is_empty() {
            return Err(Error::config("Aliyun app code cannot be empty"));
        }

        let adapter = Self::new()?;
        let _ = adapter.app_code.set(app_code);
        Ok(adapter)
    }

    /// Point the adapter at another gateway (e.g. a test server)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        self.base_url = base_url;
        self
    }

    fn app_code(&self) -> Result<&str> {
        self.app_code
            .get()
            .map(String::as_str)
            .ok_or_else(|| Error::not_initialized(PROVIDER_NAME))
    }

    /// GET a gateway path and decode the JSON body
    async fn request(&self, path: &str, query: &[(&str, &str)]) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .query(query)
            .header("Authorization", format!("APPCODE {}", self.app_code()?))
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
                    format!("Authentication failed: invalid app code or expired quota. Status: {}", status),
                ),
                429 => Error::adapter(
                    PROVIDER_NAME,
                    format!("Rate limit exceeded. Please retry later. Status: {}", status),
                ),
                500..=599 => Error::adapter(
                    PROVIDER_NAME,
                    format!("Gateway server error (transient): {} - {}", status, error_text),
                ),
                _ => Error::adapter(
                    PROVIDER_NAME,
                    format!("Request to {} failed: {} - {}", path, status, error_text),
                ),
            });
        }

        response
            .json()
            .await
            .map_err(|e| Error::adapter(PROVIDER_NAME, format!("Failed to parse response: {}", e)))
    }
}

/// The `no` query value for a snapshot
///
/// SF Express requires `number:last4(phone)`.
fn query_number(snapshot: &TrackingSnapshot) -> String {
    if snapshot.code != SF_CODE {
        return snapshot.number.clone();
    }

    let digits: Vec<char> = snapshot.phone.chars().collect();
    let suffix: String = digits[digits.len().saturating_sub(4)..].iter().collect();
    format!("{}:{}", snapshot.number, suffix)
}

/// Read the carrier list from a `cExpressLists` body (`result: {code: company}`)
fn parse_code_list(body: &Value) -> Result<Vec<CarrierCode>> {
    let result = body
        .get("result")
        .and_then(Value::as_object)
        .ok_or_else(|| Error::adapter(PROVIDER_NAME, "Invalid response format: result is not an object"))?;

    Ok(result
        .iter()
        .filter_map(|(code, company)| {
            company
                .as_str()
                .map(|company| CarrierCode::new(company, code.as_str()))
        })
        .collect())
}

#[async_trait]
impl ProviderAdapter for AliyunAdapter {
    fn adapter_name(&self) -> &'static str {
        "aliyun"
    }

    fn default_options(&self) -> ConfigPatch {
        ConfigPatch::new()
            .min_refetch_interval_secs(3600)
            .max_request_count(120)
    }

    async fn bootstrap(&self, settings: &Value) -> Result<()> {
        if let Some(app_code) = settings.get("app_code").and_then(Value::as_str) {
            if !app_code.is_empty() && self.app_code.set(app_code.to_string()).is_err() {
                tracing::debug!("Aliyun app code already set, ignoring settings value");
            }
        }

        if self.app_code.get().is_none() {
            return Err(Error::config("Aliyun app code is required (settings.app_code)"));
        }
        Ok(())
    }

    async fn load_known_codes(&self) -> Result<Vec<CarrierCode>> {
        let body = self.request("cExpressLists", &[]).await?;
        let codes = parse_code_list(&body)?;
        tracing::debug!("Aliyun reported {} carriers", codes.len());
        Ok(codes)
    }

    async fn fetch(&self, snapshot: &TrackingSnapshot) -> Result<Value> {
        let number = query_number(snapshot);
        tracing::debug!("Querying Aliyun for {} {}", snapshot.code, snapshot.number);
        self.request("cexpress", &[("no", number.as_str()), ("type", snapshot.code.as_str())])
            .await
    }

    fn state(&self, raw: &Value) -> TrackingState {
        let code = match raw.get("state") {
            Some(Value::Number(n)) => n.as_i64(),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        };
        code.and_then(TrackingState::from_code)
            .unwrap_or(TrackingState::Unactive)
    }

    fn process(&self, raw: &Value) -> Vec<ProcessEvent> {
        let Some(list) = raw.get("list").cloned() else {
            return Vec::new();
        };
        let events: Vec<AliyunEvent> = serde_json::from_value(list).unwrap_or_default();
        let Some(offset) = FixedOffset::east_opt(EVENT_UTC_OFFSET_SECS) else {
            return Vec::new();
        };

        events
            .into_iter()
            .filter_map(|event| {
                let time = parse_timestamp(&event.time, offset)?;
                Some(ProcessEvent::new(time, event.content))
            })
            .collect()
    }

    fn identity(&self, raw: &Value, known: &[CarrierCode]) -> Option<QueryParam> {
        let code = raw.get("type")?.as_str()?;
        let number = raw.get("no")?.as_str()?;
        let number = number.split(':').next().unwrap_or(number);

        known
            .iter()
            .find(|entry| entry.code == code)
            .map(|entry| QueryParam::new(code, number).with_company(entry.company.clone()))
    }
}

/// Register the Aliyun adapter with a dispatcher
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
///     parcel_provider_aliyun::PROVIDER_NAME,
///     ConfigPatch::new().settings(serde_json::json!({ "app_code": "..." })),
/// );
/// parcel_provider_aliyun::register(&dispatcher, options).await?;
/// # Ok(())
/// # }
/// ```
pub async fn register(dispatcher: &Dispatcher, options: ProviderOptions) -> Result<()> {
    dispatcher
        .register(Arc::new(AliyunAdapter::new()?), options)
        .await
}
