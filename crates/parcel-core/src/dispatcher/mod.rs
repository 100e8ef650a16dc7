//! Weight-ordered provider dispatcher
//!
//! The dispatcher is the entry point for callers. It keeps the registered
//! [`Provider`]s sorted by ascending weight and routes each request to the
//! first one that accepts it.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use parcel_core::{Dispatcher, MemoryCache, ProviderOptions, QueryParam};
//! use std::sync::Arc;
//!
//! let dispatcher = Dispatcher::new(Arc::new(MemoryCache::new()));
//! dispatcher.register(Arc::new(adapter), ProviderOptions::named("ALI")).await?;
//!
//! let param = QueryParam::new("ZTO", "ZT1234567890");
//! if let Some(snapshot) = dispatcher.query(&param, false, None).await? {
//!     println!("{}", snapshot.state);
//! }
//! ```
//!
//! ## Registration
//!
//! Registering a name that already exists merges the new options into the
//! existing provider instead of replacing it. Registration order breaks
//! weight ties.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{ConfigPatch, ProviderConfig, ProviderOptions};
use crate::error::Result;
use crate::model::{QueryParam, TrackingSnapshot};
use crate::provider::Provider;
use crate::traits::{ProviderAdapter, SnapshotCache};

/// Registry of providers plus the request router
pub struct Dispatcher {
    /// Cache handed to every provider
    cache: Arc<dyn SnapshotCache>,

    /// Providers in ascending weight order
    providers: RwLock<Vec<Arc<Provider>>>,
}

impl Dispatcher {
    /// Create an empty dispatcher backed by `cache`
    pub fn new(cache: Arc<dyn SnapshotCache>) -> Self {
        Self {
            cache,
            providers: RwLock::new(Vec::new()),
        }
    }

    /// Register a provider, or merge options into an existing one
    ///
    /// A new provider's config is layered as built-in defaults, then the
    /// adapter's defaults, then `options`. The provider is initialized
    /// before it becomes visible to queries.
    ///
    /// # Parameters
    ///
    /// - `adapter`: Adapter for the provider (ignored if the name exists)
    /// - `options`: Provider name plus config overrides
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Registered or merged
    /// - `Err(Error::Config)`: Invalid config (nothing registered)
    /// - `Err(Error)`: Adapter bootstrap or code list failure
    pub async fn register(
        &self,
        adapter: Arc<dyn ProviderAdapter>,
        options: ProviderOptions,
    ) -> Result<()> {
        if let Some(existing) = self.provider(&options.name) {
            existing.set_config(&options.patch)?;
            self.sort();
            info!("Merged options into provider {}", options.name);
            return Ok(());
        }

        let config = ProviderConfig::new(options.name.clone())
            .merged(&adapter.default_options())
            .merged(&options.patch);

        let provider = Provider::new(Arc::clone(&adapter), Arc::clone(&self.cache), config)?;
        provider.init().await?;
        let provider = Arc::new(provider);

        {
            let mut providers = self.write();
            if let Some(existing) = providers.iter().find(|p| p.name() == options.name) {
                // Lost a registration race; fold into the winner.
                existing.set_config(&options.patch)?;
            } else {
                providers.push(Arc::clone(&provider));
            }
            providers.sort_by_key(|p| p.weight());
        }

        info!(
            "Registered provider {} ({}, weight: {}, push: {})",
            provider.name(),
            adapter.adapter_name(),
            provider.weight(),
            provider.is_push_based()
        );
        Ok(())
    }

    /// Pick the first provider, in weight order, that accepts `param`
    ///
    /// # Parameters
    ///
    /// - `param`: The request
    /// - `name`: Restrict the choice to the provider with this name
    pub fn select(&self, param: &QueryParam, name: Option<&str>) -> Option<Arc<Provider>> {
        self.read()
            .iter()
            .filter(|p| name.is_none_or(|name| p.name() == name))
            .find(|p| p.legal(param))
            .cloned()
    }

    /// Route a query to the first accepting provider
    ///
    /// Push-based providers are asked to register the shipment unless
    /// `force` is set.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(TrackingSnapshot))`: The chosen provider's answer
    /// - `Ok(None)`: No provider accepts the request
    /// - `Err(Error)`: The chosen provider failed
    pub async fn query(
        &self,
        param: &QueryParam,
        force: bool,
        name: Option<&str>,
    ) -> Result<Option<TrackingSnapshot>> {
        let Some(provider) = self.select(param, name) else {
            warn!(
                "No provider accepts {} {}{}",
                param.code,
                param.number,
                name.map(|n| format!(" (requested: {})", n)).unwrap_or_default()
            );
            return Ok(None);
        };

        debug!("Dispatching {} {} to {}", param.code, param.number, provider.name());

        let snapshot = if provider.is_push_based() && !force {
            provider.put(param).await?
        } else {
            provider.query(param, force).await?
        };
        Ok(Some(snapshot))
    }

    /// Read the cached snapshot from the first accepting provider
    ///
    /// Never fetches and never writes.
    pub async fn lookup(
        &self,
        param: &QueryParam,
        name: Option<&str>,
    ) -> Result<Option<TrackingSnapshot>> {
        match self.select(param, name) {
            Some(provider) => provider.cached(param).await.map(Some),
            None => Ok(None),
        }
    }

    /// Hand a pushed payload to the named provider
    ///
    /// # Returns
    ///
    /// - `Ok(Some(TrackingSnapshot))`: The merged (or frozen) snapshot
    /// - `Ok(None)`: No provider with this name
    /// - `Err(Error::InvalidInput)`: Payload does not identify a shipment
    pub async fn push(&self, raw: Value, name: &str) -> Result<Option<TrackingSnapshot>> {
        let Some(provider) = self.provider(name) else {
            warn!("Push for unknown provider {}", name);
            return Ok(None);
        };

        provider.push(raw).await.map(Some)
    }

    /// Look up a provider by name
    pub fn provider(&self, name: &str) -> Option<Arc<Provider>> {
        self.read().iter().find(|p| p.name() == name).cloned()
    }

    /// Provider names in weight order
    pub fn handler_names(&self) -> Vec<String> {
        self.read().iter().map(|p| p.name().to_string()).collect()
    }

    /// Every provider's current config keyed by name
    pub fn get_config(&self) -> BTreeMap<String, ProviderConfig> {
        self.read()
            .iter()
            .map(|p| (p.name().to_string(), p.config()))
            .collect()
    }

    /// One provider's current config
    pub fn get_config_for(&self, name: &str) -> Option<ProviderConfig> {
        self.provider(name).map(|p| p.config())
    }

    /// Merge a patch into one provider's config
    ///
    /// # Returns
    ///
    /// - `Ok(Some(ProviderConfig))`: The updated config
    /// - `Ok(None)`: No provider with this name
    /// - `Err(Error::Config)`: Invalid patch (config unchanged)
    pub fn set_config(&self, name: &str, patch: &ConfigPatch) -> Result<Option<ProviderConfig>> {
        let Some(provider) = self.provider(name) else {
            return Ok(None);
        };

        let config = provider.set_config(patch)?;
        if patch.weight.is_some() {
            self.sort();
        }
        Ok(Some(config))
    }

    /// Number of registered providers
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Check if no provider is registered
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn sort(&self) {
        self.write().sort_by_key(|p| p.weight());
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Arc<Provider>>> {
        self.providers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Arc<Provider>>> {
        self.providers.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("providers", &self.handler_names())
            .finish()
    }
}
