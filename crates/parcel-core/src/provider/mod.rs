//! Provider engine
//!
//! A [`Provider`] wraps one [`ProviderAdapter`] and owns everything around it:
//! - Validating and code-normalizing requests
//! - Loading or synthesizing the cached snapshot
//! - Throttling (freeze, request cap, refetch interval)
//! - Merging adapter payloads into the canonical snapshot
//! - Writing the snapshot back unless it was already delivered
//!
//! ## Architecture
//!
//! ```text
//!                    ┌──────────────┐
//!   QueryParam ─────▶│   Provider   │
//!                    └──────────────┘
//!                            │
//!        ┌───────────────────┼───────────────────┐
//!        │                   │                   │
//!        ▼                   ▼                   ▼
//! ┌──────────────┐   ┌───────────────┐   ┌──────────────┐
//! │ SnapshotCache│   │ProviderAdapter│   │  SignRules   │
//! │ (get / set)  │   │ (fetch / put) │   │  (guess)     │
//! └──────────────┘   └───────────────┘   └──────────────┘
//! ```
//!
//! ## Query Flow
//!
//! 1. Validate the tracking number
//! 2. Resolve the carrier code against the provider's catalog
//! 3. Load the snapshot from the cache, or start a fresh one
//! 4. Short-circuit (first match wins):
//!    delivered → request cap → refetch interval → push-based cached state
//! 5. Otherwise fetch, merge and persist
//!
//! ## Freeze on Delivery
//!
//! A snapshot that was already DELIVERED before a merge is never written
//! again. The write that moves a snapshot into DELIVERED is the last one.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{ConfigPatch, ProviderConfig};
use crate::error::{Error, Result};
use crate::guess::SignRules;
use crate::model::{CarrierCode, QueryParam, TrackingSnapshot, TrackingState, fingerprint};
use crate::resolver::{CodeCatalog, resolve};
use crate::traits::{ProviderAdapter, SnapshotCache};

/// Prefix of every snapshot cache key
pub const CACHE_KEY_PREFIX: &str = "EXPRESS_CACHE";

/// Accepted tracking number lengths
const TRACKING_NUMBER_LEN: std::ops::RangeInclusive<usize> = 6..=16;

/// Build the cache key for a snapshot
pub fn cache_key(provider: &str, code: &str, number: &str) -> String {
    format!("{}_{}_{}_{}", CACHE_KEY_PREFIX, provider, code, number)
}

/// Check a tracking number against `^[A-Za-z0-9]{6,16}$`
pub fn validate_tracking_number(number: &str) -> Result<()> {
    let well_formed = TRACKING_NUMBER_LEN.contains(&number.len())
        && number.bytes().all(|byte| byte.is_ascii_alphanumeric());

    if well_formed {
        Ok(())
    } else {
        Err(Error::validation(format!(
            "Tracking number {:?} must be 6-16 ASCII letters or digits",
            number
        )))
    }
}

/// What a query does with a loaded snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Already delivered; returned as-is
    Frozen,
    /// Request cap reached and not forced; returned as-is
    RequestCapReached,
    /// Merged too recently; returned as-is
    Throttled,
    /// Push-based and not forced; recompute from the cached payload
    CachedState,
    /// Call the adapter
    Fetch,
}

/// Walk the short-circuit table for a loaded snapshot
pub fn decide(
    config: &ProviderConfig,
    snapshot: &TrackingSnapshot,
    force: bool,
    now: DateTime<Utc>,
) -> Decision {
    if snapshot.state.is_delivered() {
        return Decision::Frozen;
    }

    if snapshot.request_count >= config.max_request_count && !force {
        return Decision::RequestCapReached;
    }

    let elapsed = now.timestamp().saturating_sub(snapshot.last_request);
    let interval = i64::try_from(config.min_refetch_interval_secs).unwrap_or(i64::MAX);
    if elapsed < interval {
        return Decision::Throttled;
    }

    if config.push_based && !force {
        return Decision::CachedState;
    }

    Decision::Fetch
}

/// Config plus the rules compiled from it, swapped as a unit
#[derive(Debug)]
struct ActiveConfig {
    config: ProviderConfig,
    rules: SignRules,
}

impl ActiveConfig {
    fn build(config: ProviderConfig) -> Result<Self> {
        config.validate()?;
        let rules = SignRules::compile(&config.sign_templates)
            .map_err(|e| Error::config(format!("Invalid sign template for {}: {}", config.name, e)))?;
        Ok(Self { config, rules })
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(self.config.cache_ttl_secs)
    }
}

/// One external tracking source plus its caching and throttling policy
pub struct Provider {
    /// Provider name (fixed for the provider's lifetime)
    name: String,

    /// Carrier adapter
    adapter: Arc<dyn ProviderAdapter>,

    /// Snapshot cache shared with the other providers
    cache: Arc<dyn SnapshotCache>,

    /// Current configuration
    active: RwLock<Arc<ActiveConfig>>,

    /// Known carrier codes, set once by `init()`
    catalog: OnceCell<CodeCatalog>,
}

impl Provider {
    /// Create a provider
    ///
    /// The provider rejects requests until [`Provider::init`] completes.
    pub fn new(
        adapter: Arc<dyn ProviderAdapter>,
        cache: Arc<dyn SnapshotCache>,
        config: ProviderConfig,
    ) -> Result<Self> {
        let active = ActiveConfig::build(config)?;

        Ok(Self {
            name: active.config.name.clone(),
            adapter,
            cache,
            active: RwLock::new(Arc::new(active)),
            catalog: OnceCell::new(),
        })
    }

    /// Provider name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current configuration
    pub fn config(&self) -> ProviderConfig {
        self.active().config.clone()
    }

    /// Priority weight
    pub fn weight(&self) -> u32 {
        self.active().config.weight
    }

    /// Whether the provider is driven by carrier callbacks
    pub fn is_push_based(&self) -> bool {
        self.active().config.push_based
    }

    /// Merge a patch into the configuration
    ///
    /// On error (invalid pattern, zero TTL) the previous configuration stays.
    pub fn set_config(&self, patch: &ConfigPatch) -> Result<ProviderConfig> {
        let mut guard = self.active.write().unwrap_or_else(PoisonError::into_inner);
        let next = ActiveConfig::build(guard.config.merged(patch))?;
        let config = next.config.clone();
        *guard = Arc::new(next);
        debug!("Provider {} config updated", self.name);
        Ok(config)
    }

    /// Run the adapter bootstrap and load the carrier code list
    ///
    /// Must complete before `legal`, `query`, `put` or `push` are used.
    /// Calling it again after success is a no-op.
    pub async fn init(&self) -> Result<()> {
        if self.catalog.get().is_some() {
            debug!("Provider {} already initialized", self.name);
            return Ok(());
        }

        let settings = self.active().config.settings.clone();
        self.adapter.bootstrap(&settings).await?;

        let codes = self.adapter.load_known_codes().await?;
        info!(
            "Provider {} initialized with {} carrier codes",
            self.name,
            codes.len()
        );

        if self.catalog.set(CodeCatalog::new(codes)).is_err() {
            debug!("Provider {} initialized concurrently, keeping first catalog", self.name);
        }
        Ok(())
    }

    /// Whether `init()` has completed
    pub fn is_initialized(&self) -> bool {
        self.catalog.get().is_some()
    }

    /// Known carrier codes (empty before `init()`)
    pub fn known_codes(&self) -> &[CarrierCode] {
        self.catalog.get().map(CodeCatalog::entries).unwrap_or_default()
    }

    /// Whether this provider accepts the request
    ///
    /// The policy must accept both the raw code and the resolved code, and
    /// the resolved code must be in the catalog.
    pub fn legal(&self, param: &QueryParam) -> bool {
        let Some(catalog) = self.catalog.get() else {
            return false;
        };
        let active = self.active();
        let policy = &active.config.policy;

        if !policy.accepts(&param.code) {
            return false;
        }

        let resolved = resolve(catalog, &active.config.code_overrides, param);
        catalog.contains(&resolved.code) && policy.accepts(&resolved.code)
    }

    /// Resolve the request's carrier code against this provider's catalog
    pub fn normalize(&self, param: &QueryParam) -> Result<QueryParam> {
        let active = self.active();
        self.resolve_with(&active, param)
    }

    /// Query a shipment
    ///
    /// # Parameters
    ///
    /// - `param`: The request
    /// - `force`: Bypass the request cap and the push-based cached-state path
    ///
    /// # Returns
    ///
    /// - `Ok(TrackingSnapshot)`: The cached or freshly merged snapshot
    /// - `Err(Error::Validation)`: Malformed tracking number (cache untouched)
    /// - `Err(Error)`: Cache or adapter failure, unmodified
    pub async fn query(&self, param: &QueryParam, force: bool) -> Result<TrackingSnapshot> {
        validate_tracking_number(&param.number)?;
        let active = self.active();
        let resolved = self.resolve_with(&active, param)?;
        let snapshot = self.load_or_init(&resolved).await?;

        self.settle(&active, snapshot, force).await
    }

    /// Register a shipment with a push-based source
    ///
    /// Registration happens at most once per snapshot: once the snapshot has
    /// been merged (`request_count > 0`), this behaves like a non-forced query.
    pub async fn put(&self, param: &QueryParam) -> Result<TrackingSnapshot> {
        validate_tracking_number(&param.number)?;
        let active = self.active();
        let resolved = self.resolve_with(&active, param)?;
        let snapshot = self.load_or_init(&resolved).await?;

        if snapshot.request_count > 0 {
            debug!(
                "Provider {} already registered {} {}, skipping registration",
                self.name, snapshot.code, snapshot.number
            );
            return self.settle(&active, snapshot, false).await;
        }

        info!(
            "Provider {} registering {} {}",
            self.name, snapshot.code, snapshot.number
        );
        let raw = self.adapter.register_tracking(&snapshot).await?;
        self.merge_and_persist(&active, snapshot, raw, Utc::now()).await
    }

    /// Merge a payload delivered by the source itself (e.g. a webhook)
    ///
    /// The shipment identity is read from the payload. A snapshot that is
    /// already delivered is returned unchanged.
    pub async fn push(&self, raw: Value) -> Result<TrackingSnapshot> {
        let catalog = self
            .catalog
            .get()
            .ok_or_else(|| Error::not_initialized(self.name.clone()))?;

        let identity = self.adapter.identity(&raw, catalog.entries()).ok_or_else(|| {
            Error::invalid_input(format!(
                "Payload pushed to {} does not identify a known carrier and number",
                self.name
            ))
        })?;
        validate_tracking_number(&identity.number)?;

        let active = self.active();
        let snapshot = self.load_or_init(&identity).await?;
        if snapshot.state.is_delivered() {
            debug!(
                "Provider {} ignoring push for delivered {} {}",
                self.name, snapshot.code, snapshot.number
            );
            return Ok(snapshot);
        }

        self.merge_and_persist(&active, snapshot, raw, Utc::now()).await
    }

    /// Read the cached snapshot (or a fresh one) without fetching or writing
    pub async fn cached(&self, param: &QueryParam) -> Result<TrackingSnapshot> {
        validate_tracking_number(&param.number)?;
        let resolved = self.normalize(param)?;
        self.load_or_init(&resolved).await
    }

    fn active(&self) -> Arc<ActiveConfig> {
        Arc::clone(&self.active.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn resolve_with(&self, active: &ActiveConfig, param: &QueryParam) -> Result<QueryParam> {
        let catalog = self
            .catalog
            .get()
            .ok_or_else(|| Error::not_initialized(self.name.clone()))?;
        Ok(resolve(catalog, &active.config.code_overrides, param))
    }

    /// Apply the short-circuit table to a loaded snapshot
    async fn settle(
        &self,
        active: &ActiveConfig,
        snapshot: TrackingSnapshot,
        force: bool,
    ) -> Result<TrackingSnapshot> {
        let now = Utc::now();
        match decide(&active.config, &snapshot, force, now) {
            Decision::Frozen => {
                debug!("{} {} is delivered, returning frozen snapshot", snapshot.code, snapshot.number);
                Ok(snapshot)
            }
            Decision::RequestCapReached => {
                debug!(
                    "{} {} reached {} requests on {}, skipping fetch",
                    snapshot.code, snapshot.number, snapshot.request_count, self.name
                );
                Ok(snapshot)
            }
            Decision::Throttled => {
                debug!(
                    "{} {} fetched too recently on {} (minimum interval: {}s), skipping fetch",
                    snapshot.code, snapshot.number, self.name, active.config.min_refetch_interval_secs
                );
                Ok(snapshot)
            }
            Decision::CachedState => self.refresh_from_cache(active, snapshot, now).await,
            Decision::Fetch => {
                info!("Provider {} fetching {} {}", self.name, snapshot.code, snapshot.number);
                let raw = self.adapter.fetch(&snapshot).await?;
                self.merge_and_persist(active, snapshot, raw, Utc::now()).await
            }
        }
    }

    /// Recompute state and guess from the payload already in the snapshot
    ///
    /// No fetch, no request accounting. Written back only if the derived
    /// view differs from what is stored, so an unchanged entry keeps its
    /// original expiry instead of having its TTL extended.
    async fn refresh_from_cache(
        &self,
        active: &ActiveConfig,
        snapshot: TrackingSnapshot,
        now: DateTime<Utc>,
    ) -> Result<TrackingSnapshot> {
        if snapshot.source.is_null() {
            debug!(
                "{} {} has no cached payload on {}, nothing to recompute",
                snapshot.code, snapshot.number, self.name
            );
            return Ok(snapshot);
        }

        let previous_state = snapshot.state;
        let raw = snapshot.source.clone();
        let derived = self.derive(active, snapshot.clone(), raw, now);

        if derived == snapshot {
            return Ok(snapshot);
        }

        self.persist(previous_state, &derived, active.ttl()).await?;
        Ok(derived)
    }

    /// Merge a payload, count the request and write the result back
    async fn merge_and_persist(
        &self,
        active: &ActiveConfig,
        previous: TrackingSnapshot,
        raw: Value,
        now: DateTime<Utc>,
    ) -> Result<TrackingSnapshot> {
        let previous_state = previous.state;
        let mut merged = self.derive(active, previous, raw, now);
        merged.request_count = merged.request_count.saturating_add(1);
        merged.updated_at = now;
        merged.last_request = now.timestamp();

        if merged.guess && merged.source_state != TrackingState::Delivered {
            info!(
                "{} {} inferred delivered from \"{}\"",
                merged.code,
                merged.number,
                merged.latest().map(|event| event.content.as_str()).unwrap_or_default()
            );
        }

        self.persist(previous_state, &merged, active.ttl()).await?;
        Ok(merged)
    }

    /// Translate a payload into snapshot fields (no accounting)
    fn derive(
        &self,
        active: &ActiveConfig,
        snapshot: TrackingSnapshot,
        raw: Value,
        now: DateTime<Utc>,
    ) -> TrackingSnapshot {
        let source_state = self.adapter.state(&raw);
        let mut process = self.adapter.process(&raw);
        process.sort_by(|a, b| b.time.cmp(&a.time));

        let guess = active.rules.guess(&process, &snapshot.code, now);
        let state = if source_state != TrackingState::Delivered && guess {
            TrackingState::Delivered
        } else {
            source_state
        };

        TrackingSnapshot {
            fingerprint: Some(fingerprint(&process, state)),
            process,
            state,
            source_state,
            guess,
            source: raw,
            ..snapshot
        }
    }

    /// Load a snapshot, treating missing or undecodable entries as a miss
    async fn load_or_init(&self, param: &QueryParam) -> Result<TrackingSnapshot> {
        let key = cache_key(&self.name, &param.code, &param.number);

        match self.cache.get(&key).await? {
            Some(raw) => match serde_json::from_str::<TrackingSnapshot>(&raw) {
                Ok(snapshot) => Ok(snapshot),
                Err(e) => {
                    warn!("Corrupt cache entry {}, treating as miss: {}", key, e);
                    Ok(TrackingSnapshot::fresh(param, &self.name, Utc::now()))
                }
            },
            None => {
                debug!("Cache miss for {}", key);
                Ok(TrackingSnapshot::fresh(param, &self.name, Utc::now()))
            }
        }
    }

    /// Write a snapshot unless it was delivered before this update
    async fn persist(
        &self,
        previous_state: TrackingState,
        snapshot: &TrackingSnapshot,
        ttl: Duration,
    ) -> Result<()> {
        let key = cache_key(&self.name, &snapshot.code, &snapshot.number);

        if previous_state.is_delivered() {
            debug!("{} is frozen, not writing", key);
            return Ok(());
        }

        let value = serde_json::to_string(snapshot)?;
        self.cache.set(&key, value, ttl).await?;
        debug!("Stored {} (state: {}, requests: {})", key, snapshot.state, snapshot.request_count);
        Ok(())
    }
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.name)
            .field("adapter", &self.adapter.adapter_name())
            .field("initialized", &self.is_initialized())
            .finish()
    }
}
