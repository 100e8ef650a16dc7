//! Architectural Contract Test: Request Accounting & Throttling
//!
//! This test verifies how the provider counts and limits upstream calls.
//!
//! Constraints verified:
//! - request_count grows by exactly 1 per fetch-and-merge
//! - Short-circuited queries leave request_count unchanged
//! - The request cap applies unless forced; the refetch interval always applies
//! - Invalid input and adapter failures never write to the cache
//! - Snapshots are stored with the provider's cache TTL
//! - Requests before init() are rejected
//!
//! If this test fails, upstream quotas are at risk.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use parcel_core::config::{ConfigPatch, ProviderConfig};
use parcel_core::error::Error;
use parcel_core::model::QueryParam;
use parcel_core::provider::Provider;

#[tokio::test]
async fn each_fetch_counts_once() {
    let adapter = MockAdapter::new("ALI");
    let counters = MockAdapter::sharing_counters_with(&adapter);
    let cache = CountingCache::new();
    let provider = init_provider(adapter, &cache, ConfigPatch::new()).await;

    let first = provider.query(&param(), false).await.unwrap();
    assert_eq!(first.request_count, 1);
    assert!(first.last_request > 0);
    assert!(first.updated_at >= first.created_at);

    let second = provider.query(&param(), false).await.unwrap();
    assert_eq!(second.request_count, 2);
    assert_eq!(second.created_at, first.created_at, "creation time survives merges");

    assert_eq!(counters.fetch_call_count(), 2);
    assert_eq!(cache.set_call_count(), 2);
}

#[tokio::test]
async fn request_cap_stops_fetching_unless_forced() {
    let adapter = MockAdapter::new("ALI");
    let counters = MockAdapter::sharing_counters_with(&adapter);
    let cache = CountingCache::new();
    let provider = init_provider(adapter, &cache, ConfigPatch::new().max_request_count(2)).await;

    provider.query(&param(), false).await.unwrap();
    provider.query(&param(), false).await.unwrap();
    let capped = provider.query(&param(), false).await.unwrap();

    assert_eq!(capped.request_count, 2);
    assert_eq!(counters.fetch_call_count(), 2);
    assert_eq!(cache.set_call_count(), 2);

    let forced = provider.query(&param(), true).await.unwrap();
    assert_eq!(forced.request_count, 3);
    assert_eq!(counters.fetch_call_count(), 3);
}

#[tokio::test]
async fn refetch_interval_applies_even_when_forced() {
    let adapter = MockAdapter::new("ALI");
    let counters = MockAdapter::sharing_counters_with(&adapter);
    let cache = CountingCache::new();
    let provider = init_provider(
        adapter,
        &cache,
        ConfigPatch::new().min_refetch_interval_secs(3600),
    )
    .await;

    let first = provider.query(&param(), false).await.unwrap();
    let throttled = provider.query(&param(), false).await.unwrap();
    let forced = provider.query(&param(), true).await.unwrap();

    assert_eq!(throttled, first);
    assert_eq!(forced, first);
    assert_eq!(counters.fetch_call_count(), 1);
    assert_eq!(cache.set_call_count(), 1);
}

#[tokio::test]
async fn invalid_number_never_reaches_cache_or_adapter() {
    let adapter = MockAdapter::new("ALI");
    let counters = MockAdapter::sharing_counters_with(&adapter);
    let cache = CountingCache::new();
    let provider = init_provider(adapter, &cache, ConfigPatch::new()).await;

    for number in ["ZT12", "ZT-1234567", "ZT12345678901234567"] {
        let result = provider.query(&QueryParam::new("ZTO", number), false).await;
        assert!(matches!(result, Err(Error::Validation(_))), "{} should be rejected", number);
    }

    assert_eq!(cache.get_call_count(), 0);
    assert_eq!(cache.set_call_count(), 0);
    assert_eq!(counters.fetch_call_count(), 0);
}

#[tokio::test]
async fn adapter_failure_propagates_without_write() {
    let adapter = MockAdapter::new("ALI");
    let counters = MockAdapter::sharing_counters_with(&adapter);
    let cache = CountingCache::new();
    let provider = init_provider(adapter, &cache, ConfigPatch::new()).await;

    counters.fail_fetch(true);
    let result = provider.query(&param(), false).await;
    assert!(matches!(result, Err(Error::Http(_))));
    assert_eq!(cache.set_call_count(), 0);

    counters.fail_fetch(false);
    let recovered = provider.query(&param(), false).await.unwrap();
    assert_eq!(recovered.request_count, 1, "failed fetches are not counted");
}

#[tokio::test]
async fn cached_read_never_fetches_or_writes() {
    let adapter = MockAdapter::new("ALI");
    let counters = MockAdapter::sharing_counters_with(&adapter);
    let cache = CountingCache::new();
    let provider = init_provider(adapter, &cache, ConfigPatch::new()).await;

    let empty = provider.cached(&param()).await.unwrap();
    assert_eq!(empty.request_count, 0);
    assert!(empty.source.is_null());

    let fetched = provider.query(&param(), false).await.unwrap();
    let cached = provider.cached(&param()).await.unwrap();

    assert_eq!(cached, fetched);
    assert_eq!(counters.fetch_call_count(), 1);
    assert_eq!(cache.set_call_count(), 1);
}

#[tokio::test]
async fn requests_before_init_are_rejected() {
    let cache = CountingCache::new();
    let provider = Provider::new(
        Arc::new(MockAdapter::new("ALI")),
        Arc::new(cache.clone()),
        ProviderConfig::new("ALI"),
    )
    .unwrap();

    assert!(!provider.is_initialized());
    assert!(!provider.legal(&param()));
    assert!(matches!(
        provider.query(&param(), false).await,
        Err(Error::NotInitialized(_))
    ));
    assert_eq!(cache.get_call_count(), 0);
}

#[tokio::test]
async fn snapshots_use_the_configured_ttl() {
    let cache = CountingCache::new();
    let provider = init_provider(MockAdapter::new("ALI"), &cache, ConfigPatch::new()).await;

    provider.query(&param(), false).await.unwrap();
    assert_eq!(cache.last_ttl(), Some(Duration::from_secs(864_000)));

    let cache = CountingCache::new();
    let provider = init_provider(
        MockAdapter::new("ALI"),
        &cache,
        ConfigPatch::new().cache_ttl_secs(60),
    )
    .await;

    provider.query(&param(), false).await.unwrap();
    assert_eq!(cache.last_ttl(), Some(Duration::from_secs(60)));

    provider.set_config(&ConfigPatch::new().cache_ttl_secs(120)).unwrap();
    provider.query(&param(), true).await.unwrap();
    assert_eq!(cache.last_ttl(), Some(Duration::from_secs(120)));
}
