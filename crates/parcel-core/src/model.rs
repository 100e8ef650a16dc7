//! Tracking data model
//!
//! Types shared by the provider engine, the dispatcher and carrier adapters.
//! A [`TrackingSnapshot`] is the canonical cached record for one
//! `(provider, carrier code, tracking number)` tuple.

use chrono::{DateTime, FixedOffset, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Normalized shipment state
///
/// Carrier APIs report these as small integers; [`TrackingState::code`] and
/// [`TrackingState::from_code`] translate between the two forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackingState {
    /// No usable status yet
    #[serde(rename = "UNACTIVE")]
    Unactive,
    /// Carrier has no information for the number
    #[serde(rename = "NOTFOUND")]
    NotFound,
    /// In transit
    #[serde(rename = "TRANSIT")]
    Transit,
    /// Waiting for pickup by the recipient
    #[serde(rename = "PICKUP")]
    Pickup,
    /// Delivered (terminal)
    #[serde(rename = "DELIVERED")]
    Delivered,
    /// Carrier reported a problem
    #[serde(rename = "EXCEPTION")]
    Exception,
    /// Tracking window expired
    #[serde(rename = "EXPIRED")]
    Expired,
}

impl TrackingState {
    /// Numeric wire code
    pub fn code(self) -> i8 {
        match self {
            Self::Unactive => -1,
            Self::NotFound => 0,
            Self::Transit => 1,
            Self::Pickup => 2,
            Self::Delivered => 3,
            Self::Exception => 4,
            Self::Expired => 5,
        }
    }

    /// Parse a numeric wire code
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            -1 => Some(Self::Unactive),
            0 => Some(Self::NotFound),
            1 => Some(Self::Transit),
            2 => Some(Self::Pickup),
            3 => Some(Self::Delivered),
            4 => Some(Self::Exception),
            5 => Some(Self::Expired),
            _ => None,
        }
    }

    /// Stable upper-case name, identical to the serialized form
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unactive => "UNACTIVE",
            Self::NotFound => "NOTFOUND",
            Self::Transit => "TRANSIT",
            Self::Pickup => "PICKUP",
            Self::Delivered => "DELIVERED",
            Self::Exception => "EXCEPTION",
            Self::Expired => "EXPIRED",
        }
    }

    /// Whether the state is terminal
    pub fn is_delivered(self) -> bool {
        self == Self::Delivered
    }
}

impl std::fmt::Display for TrackingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of a shipment's history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessEvent {
    /// When the carrier recorded the event
    pub time: DateTime<Utc>,
    /// Free-text status description
    pub content: String,
}

impl ProcessEvent {
    /// Create a new process event
    pub fn new(time: DateTime<Utc>, content: impl Into<String>) -> Self {
        Self {
            time,
            content: content.into(),
        }
    }
}

/// One provider's mapping of a carrier name to its code
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CarrierCode {
    /// Carrier display name
    pub company: String,
    /// Carrier code as known to the provider
    pub code: String,
}

impl CarrierCode {
    /// Create a new carrier code entry
    pub fn new(company: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            company: company.into(),
            code: code.into(),
        }
    }
}

/// A tracking request before cache-key normalization
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueryParam {
    /// Caller-side identifier, carried into the snapshot
    pub id: i64,
    /// Carrier name as supplied by the caller
    pub company: String,
    /// Carrier code as supplied by the caller (may be fuzzy)
    pub code: String,
    /// Tracking number
    pub number: String,
    /// Recipient phone (some carriers require its last digits)
    pub phone: String,
    /// Expected or recorded delivery time
    #[serde(default)]
    pub delivery_time: Option<DateTime<Utc>>,
}

impl QueryParam {
    /// Create a query for a carrier code and tracking number
    pub fn new(code: impl Into<String>, number: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            number: number.into(),
            ..Self::default()
        }
    }

    /// Set the caller-side identifier
    pub fn with_id(mut self, id: i64) -> Self {
        self.id = id;
        self
    }

    /// Set the carrier name
    pub fn with_company(mut self, company: impl Into<String>) -> Self {
        self.company = company.into();
        self
    }

    /// Set the recipient phone
    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = phone.into();
        self
    }

    /// Set the delivery time
    pub fn with_delivery_time(mut self, delivery_time: DateTime<Utc>) -> Self {
        self.delivery_time = Some(delivery_time);
        self
    }
}

/// Canonical cached tracking record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingSnapshot {
    /// Caller-side identifier
    pub id: i64,
    /// Tracking number
    pub number: String,
    /// Carrier name
    pub company: String,
    /// Resolved carrier code
    pub code: String,
    /// Final state after delivery inference
    pub state: TrackingState,
    /// State as reported by the adapter
    pub source_state: TrackingState,
    /// Whether `state` was inferred from free text
    pub guess: bool,
    /// History, most recent first
    #[serde(rename = "data")]
    pub process: Vec<ProcessEvent>,
    /// Owning provider name
    #[serde(rename = "type")]
    pub provider: String,
    /// Raw adapter payload (`null` until the first fetch or push)
    #[serde(default)]
    pub source: serde_json::Value,
    /// Recipient phone
    pub phone: String,
    /// Unix seconds of the last merge
    pub last_request: i64,
    /// Content hash of the history and state
    pub fingerprint: Option<String>,
    /// Number of merges applied to this record
    pub request_count: u32,
    /// Last merge time
    pub updated_at: DateTime<Utc>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Expected or recorded delivery time
    #[serde(default)]
    pub delivery_time: Option<DateTime<Utc>>,
}

impl TrackingSnapshot {
    /// Synthesize the record used on a cache miss
    pub fn fresh(param: &QueryParam, provider: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: param.id,
            number: param.number.clone(),
            company: param.company.clone(),
            code: param.code.clone(),
            state: TrackingState::Unactive,
            source_state: TrackingState::Unactive,
            guess: false,
            process: Vec::new(),
            provider: provider.to_string(),
            source: serde_json::Value::Null,
            phone: param.phone.clone(),
            last_request: 0,
            fingerprint: None,
            request_count: 0,
            updated_at: now,
            created_at: now,
            delivery_time: param.delivery_time,
        }
    }

    /// The most recent history line, if any
    pub fn latest(&self) -> Option<&ProcessEvent> {
        self.process.first()
    }
}

/// Content hash over the event times and the final state
///
/// SHA-256 hex of the concatenated RFC 3339 (millisecond, `Z`) event times,
/// followed by `_` and the state name.
pub fn fingerprint(process: &[ProcessEvent], state: TrackingState) -> String {
    let mut hasher = Sha256::new();
    for event in process {
        hasher.update(
            event
                .time
                .to_rfc3339_opts(SecondsFormat::Millis, true)
                .as_bytes(),
        );
    }
    hasher.update(b"_");
    hasher.update(state.as_str().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Naive layouts carriers commonly use for event times
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y/%m/%d %H:%M:%S",
];

/// Parse a carrier timestamp
///
/// RFC 3339 strings carry their own offset. Naive strings are interpreted in
/// `offset`, the carrier's local time zone.
pub fn parse_timestamp(raw: &str, offset: FixedOffset) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }

    NAIVE_FORMATS.iter().find_map(|format| {
        let naive = NaiveDateTime::parse_from_str(raw, format).ok()?;
        offset
            .from_local_datetime(&naive)
            .single()
            .map(|local| local.with_timezone(&Utc))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_state_codes() {
        for code in -1..=5 {
            let state = TrackingState::from_code(code).unwrap();
            assert_eq!(i64::from(state.code()), code);
        }
        assert_eq!(TrackingState::from_code(9), None);
    }

    #[test]
    fn test_state_serializes_as_name() {
        let json = serde_json::to_string(&TrackingState::NotFound).unwrap();
        assert_eq!(json, "\"NOTFOUND\"");
        assert_eq!(TrackingState::Delivered.to_string(), "DELIVERED");
    }

    #[test]
    fn test_fresh_snapshot() {
        let now = Utc::now();
        let param = QueryParam::new("ZTO", "ZT12345678")
            .with_company("ZTO Express")
            .with_phone("13800001234");
        let snapshot = TrackingSnapshot::fresh(&param, "ALI", now);

        assert_eq!(snapshot.state, TrackingState::Unactive);
        assert_eq!(snapshot.request_count, 0);
        assert!(snapshot.process.is_empty());
        assert_eq!(snapshot.provider, "ALI");
        assert!(snapshot.source.is_null());
        assert_eq!(snapshot.created_at, now);
    }

    #[test]
    fn test_snapshot_json_field_names() {
        let snapshot = TrackingSnapshot::fresh(&QueryParam::new("ZTO", "ZT12345678"), "TM", Utc::now());
        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["type"], "TM");
        assert!(value["data"].is_array());

        let back: TrackingSnapshot = serde_json::from_value(value).unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn test_fingerprint_depends_on_times_and_state() {
        let now = Utc::now();
        let process = vec![ProcessEvent::new(now, "arrived")];
        let moved = vec![ProcessEvent::new(now - Duration::hours(1), "arrived")];

        let base = fingerprint(&process, TrackingState::Transit);
        assert_eq!(base.len(), 64);
        assert_eq!(base, fingerprint(&process, TrackingState::Transit));
        assert_ne!(base, fingerprint(&process, TrackingState::Delivered));
        assert_ne!(base, fingerprint(&moved, TrackingState::Transit));
    }

    #[test]
    fn test_parse_timestamp_naive_uses_offset() {
        let china = FixedOffset::east_opt(8 * 3600).unwrap();
        let parsed = parse_timestamp("2024-03-01 08:00:00", china).unwrap();
        assert_eq!(parsed.to_rfc3339(), "2024-03-01T00:00:00+00:00");
    }

    #[test]
    fn test_parse_timestamp_rfc3339() {
        let utc = FixedOffset::east_opt(0).unwrap();
        let parsed = parse_timestamp("2024-03-01T10:30:00+02:00", utc).unwrap();
        assert_eq!(parsed.to_rfc3339(), "2024-03-01T08:30:00+00:00");
        assert!(parse_timestamp("yesterday", utc).is_none());
    }
}
