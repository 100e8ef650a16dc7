//! Configuration types for the parcel tracking core
//!
//! A provider's effective [`ProviderConfig`] is built by layering
//! [`ConfigPatch`]es over the built-in defaults:
//!
//! ```text
//! ProviderConfig::new(name)  <-  adapter defaults  <-  caller options  <-  set_config(..)
//! ```
//!
//! [`ProviderConfig::merged`] is the only way a config changes. Fields a patch
//! leaves as `None` are kept; the adapter `settings` block is write-once.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

/// Default provider priority weight (lower is tried first)
pub const DEFAULT_WEIGHT: u32 = 100;

/// Default maximum number of merges per snapshot
pub const DEFAULT_MAX_REQUEST_COUNT: u32 = 200;

/// Default snapshot cache TTL: 10 days
pub const DEFAULT_CACHE_TTL_SECS: u64 = 864_000;

/// How a policy treats the codes it lists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// Every code is accepted
    #[default]
    AllowAll,
    /// Only listed codes are accepted
    Whitelist,
    /// Listed codes are rejected
    Blacklist,
}

/// Which carrier codes a provider will accept
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Policy {
    /// Policy kind
    #[serde(default)]
    pub kind: PolicyKind,
    /// Codes the kind applies to
    #[serde(default)]
    pub codes: BTreeSet<String>,
}

impl Policy {
    /// Accept every code
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Accept only the given codes
    pub fn whitelist<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind: PolicyKind::Whitelist,
            codes: codes.into_iter().map(Into::into).collect(),
        }
    }

    /// Reject the given codes
    pub fn blacklist<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind: PolicyKind::Blacklist,
            codes: codes.into_iter().map(Into::into).collect(),
        }
    }

    /// Check whether `code` passes this policy
    pub fn accepts(&self, code: &str) -> bool {
        match self.kind {
            PolicyKind::AllowAll => true,
            PolicyKind::Whitelist => self.codes.contains(code),
            PolicyKind::Blacklist => !self.codes.contains(code),
        }
    }
}

/// Regexes that mark a status line as "delivered" for one carrier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignTemplate {
    /// Carrier code the patterns apply to
    pub code: String,
    /// Patterns tried in order against the latest status line
    pub patterns: Vec<String>,
}

impl SignTemplate {
    /// Create a template for a carrier code
    pub fn new<I, S>(code: impl Into<String>, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            code: code.into(),
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }
}

/// Manual carrier-name to code mapping, consulted before fuzzy matching
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeOverride {
    /// Exact carrier name to match
    pub company: String,
    /// Code to substitute
    pub code: String,
}

impl CodeOverride {
    /// Create an override
    pub fn new(company: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            company: company.into(),
            code: code.into(),
        }
    }
}

/// Effective configuration of one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Unique provider name (also part of every cache key)
    pub name: String,

    /// Driven by carrier callbacks rather than polling
    #[serde(default)]
    pub push_based: bool,

    /// Priority weight; providers are tried in ascending order
    #[serde(default = "default_weight")]
    pub weight: u32,

    /// Minimum time between two merges for the same snapshot
    ///
    /// Set to 0 to disable throttling.
    #[serde(default)]
    pub min_refetch_interval_secs: u64,

    /// Merges allowed per snapshot before non-forced queries stop fetching
    #[serde(default = "default_max_request_count")]
    pub max_request_count: u32,

    /// Accepted carrier codes
    #[serde(default)]
    pub policy: Policy,

    /// Delivery inference rules
    #[serde(default)]
    pub sign_templates: Vec<SignTemplate>,

    /// Manual carrier-name overrides
    #[serde(default)]
    pub code_overrides: Vec<CodeOverride>,

    /// Snapshot cache TTL
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Adapter-specific settings, passed through untouched
    #[serde(default)]
    pub settings: serde_json::Value,
}

impl ProviderConfig {
    /// Create a configuration with defaults
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            push_based: false,
            weight: default_weight(),
            min_refetch_interval_secs: 0,
            max_request_count: default_max_request_count(),
            policy: Policy::allow_all(),
            sign_templates: Vec::new(),
            code_overrides: Vec::new(),
            cache_ttl_secs: default_cache_ttl_secs(),
            settings: serde_json::Value::Null,
        }
    }

    /// Apply a patch, returning the merged configuration
    ///
    /// `Some` fields overwrite, `None` fields keep the current value. The
    /// settings block is first-write-wins: a non-null block is never replaced.
    pub fn merged(&self, patch: &ConfigPatch) -> Self {
        let mut next = self.clone();

        if let Some(push_based) = patch.push_based {
            next.push_based = push_based;
        }
        if let Some(weight) = patch.weight {
            next.weight = weight;
        }
        if let Some(interval) = patch.min_refetch_interval_secs {
            next.min_refetch_interval_secs = interval;
        }
        if let Some(max) = patch.max_request_count {
            next.max_request_count = max;
        }
        if let Some(ref policy) = patch.policy {
            next.policy = policy.clone();
        }
        if let Some(ref templates) = patch.sign_templates {
            next.sign_templates = templates.clone();
        }
        if let Some(ref overrides) = patch.code_overrides {
            next.code_overrides = overrides.clone();
        }
        if let Some(ttl) = patch.cache_ttl_secs {
            next.cache_ttl_secs = ttl;
        }
        if next.settings.is_null() {
            if let Some(ref settings) = patch.settings {
                next.settings = settings.clone();
            }
        }

        next
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.name.trim().is_empty() {
            return Err(crate::Error::config("Provider name cannot be empty"));
        }
        if self.cache_ttl_secs == 0 {
            return Err(crate::Error::config(format!(
                "Provider {} cache TTL must be > 0",
                self.name
            )));
        }
        for template in &self.sign_templates {
            if template.code.is_empty() {
                return Err(crate::Error::config(format!(
                    "Provider {} has a sign template without a carrier code",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

/// Partial configuration update
///
/// Every field is optional; see [`ProviderConfig::merged`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConfigPatch {
    /// Driven by carrier callbacks rather than polling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_based: Option<bool>,
    /// Priority weight
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
    /// Minimum refetch interval in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_refetch_interval_secs: Option<u64>,
    /// Merge cap per snapshot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_request_count: Option<u32>,
    /// Accepted carrier codes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<Policy>,
    /// Delivery inference rules
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sign_templates: Option<Vec<SignTemplate>>,
    /// Manual carrier-name overrides
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_overrides: Option<Vec<CodeOverride>>,
    /// Snapshot cache TTL in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_ttl_secs: Option<u64>,
    /// Adapter-specific settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<serde_json::Value>,
}

impl ConfigPatch {
    /// Create an empty patch
    pub fn new() -> Self {
        Self::default()
    }

    /// Set push-based mode
    pub fn push_based(mut self, push_based: bool) -> Self {
        self.push_based = Some(push_based);
        self
    }

    /// Set the priority weight
    pub fn weight(mut self, weight: u32) -> Self {
        self.weight = Some(weight);
        self
    }

    /// Set the minimum refetch interval
    pub fn min_refetch_interval_secs(mut self, secs: u64) -> Self {
        self.min_refetch_interval_secs = Some(secs);
        self
    }

    /// Set the merge cap per snapshot
    pub fn max_request_count(mut self, max: u32) -> Self {
        self.max_request_count = Some(max);
        self
    }

    /// Set the code policy
    pub fn policy(mut self, policy: Policy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Set the delivery inference rules
    pub fn sign_templates(mut self, templates: Vec<SignTemplate>) -> Self {
        self.sign_templates = Some(templates);
        self
    }

    /// Set the manual carrier-name overrides
    pub fn code_overrides(mut self, overrides: Vec<CodeOverride>) -> Self {
        self.code_overrides = Some(overrides);
        self
    }

    /// Set the cache TTL
    pub fn cache_ttl_secs(mut self, secs: u64) -> Self {
        self.cache_ttl_secs = Some(secs);
        self
    }

    /// Set the adapter-specific settings
    pub fn settings(mut self, settings: serde_json::Value) -> Self {
        self.settings = Some(settings);
        self
    }
}

/// Registration input: a provider name plus explicitly supplied fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderOptions {
    /// Unique provider name
    pub name: String,
    /// Explicitly supplied configuration fields
    #[serde(flatten)]
    pub patch: ConfigPatch,
}

impl ProviderOptions {
    /// Create registration options
    pub fn new(name: impl Into<String>, patch: ConfigPatch) -> Self {
        Self {
            name: name.into(),
            patch,
        }
    }

    /// Options with no explicit fields
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(name, ConfigPatch::default())
    }
}

/// File-level configuration: options for every provider to register
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Provider options, in file order
    #[serde(default)]
    pub providers: Vec<ProviderOptions>,
}

impl DispatcherConfig {
    /// Load a configuration from a JSON file
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, crate::Error> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            crate::Error::config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        let mut seen = HashMap::new();
        for (index, options) in self.providers.iter().enumerate() {
            if options.name.trim().is_empty() {
                return Err(crate::Error::config(format!(
                    "Provider entry {} has an empty name",
                    index
                )));
            }
            if let Some(previous) = seen.insert(options.name.as_str(), index) {
                return Err(crate::Error::config(format!(
                    "Provider {} is listed twice (entries {} and {})",
                    options.name, previous, index
                )));
            }
        }
        Ok(())
    }

    /// Options for a provider, if listed
    pub fn options_for(&self, name: &str) -> Option<&ProviderOptions> {
        self.providers.iter().find(|options| options.name == name)
    }
}

fn default_weight() -> u32 {
    DEFAULT_WEIGHT
}

fn default_max_request_count() -> u32 {
    DEFAULT_MAX_REQUEST_COUNT
}

fn default_cache_ttl_secs() -> u64 {
    DEFAULT_CACHE_TTL_SECS
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config = ProviderConfig::new("ALI");
        assert!(!config.push_based);
        assert_eq!(config.weight, 100);
        assert_eq!(config.min_refetch_interval_secs, 0);
        assert_eq!(config.max_request_count, 200);
        assert_eq!(config.policy, Policy::allow_all());
        assert_eq!(config.cache_ttl_secs, 864_000);
        assert!(config.settings.is_null());
    }

    #[test]
    fn test_merge_only_overwrites_supplied_fields() {
        let base = ProviderConfig::new("ALI").merged(
            &ConfigPatch::new()
                .weight(10)
                .min_refetch_interval_secs(3600),
        );

        let next = base.merged(&ConfigPatch::new().max_request_count(5));
        assert_eq!(next.weight, 10);
        assert_eq!(next.min_refetch_interval_secs, 3600);
        assert_eq!(next.max_request_count, 5);
    }

    #[test]
    fn test_merge_settings_first_write_wins() {
        let first = ProviderConfig::new("TM").merged(&ConfigPatch::new().settings(json!({"api_key": "a"})));
        let second = first.merged(&ConfigPatch::new().settings(json!({"api_key": "b"})));
        assert_eq!(second.settings, json!({"api_key": "a"}));
    }

    #[test]
    fn test_policy_accepts() {
        assert!(Policy::allow_all().accepts("anything"));

        let white = Policy::whitelist(["ZTO", "YTO"]);
        assert!(white.accepts("ZTO"));
        assert!(!white.accepts("SF"));

        let black = Policy::blacklist(["sf-express"]);
        assert!(!black.accepts("sf-express"));
        assert!(black.accepts("zto"));
    }

    #[test]
    fn test_validate() {
        assert!(ProviderConfig::new("ALI").validate().is_ok());
        assert!(ProviderConfig::new("  ").validate().is_err());
        assert!(
            ProviderConfig::new("ALI")
                .merged(&ConfigPatch::new().cache_ttl_secs(0))
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_options_deserialize_flattened() {
        let options: ProviderOptions = serde_json::from_value(json!({
            "name": "TM",
            "weight": 0,
            "policy": { "kind": "blacklist", "codes": ["sf-express"] }
        }))
        .unwrap();

        assert_eq!(options.name, "TM");
        assert_eq!(options.patch.weight, Some(0));
        assert_eq!(options.patch.push_based, None);
        assert_eq!(options.patch.policy, Some(Policy::blacklist(["sf-express"])));
    }

    #[tokio::test]
    async fn test_dispatcher_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("providers.json");
        tokio::fs::write(
            &path,
            r#"{"providers": [{"name": "ALI", "min_refetch_interval_secs": 3600}, {"name": "TM"}]}"#,
        )
        .await
        .unwrap();

        let config = DispatcherConfig::from_file(&path).await.unwrap();
        assert_eq!(config.providers.len(), 2);
        assert_eq!(
            config.options_for("ALI").unwrap().patch.min_refetch_interval_secs,
            Some(3600)
        );
    }

    #[test]
    fn test_dispatcher_config_rejects_duplicates() {
        let config = DispatcherConfig {
            providers: vec![ProviderOptions::named("ALI"), ProviderOptions::named("ALI")],
        };
        assert!(config.validate().is_err());
    }
}
