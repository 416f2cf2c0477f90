// Copyright 2025 Memophor Labs
// SPDX-License-Identifier: Apache-2.0

//! Process-scoped TTL cache for parsed upstream responses.
//!
//! Entries carry their own TTL, set at insertion. Stale entries are evicted
//! lazily on lookup; nothing sweeps the map in the background, so it lives
//! and grows for the lifetime of the process.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::upstream::UpstreamResult;

#[derive(Clone, Default)]
pub struct CacheStore {
    inner: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

#[derive(Clone)]
struct CacheEntry {
    payload: UpstreamResult,
    stored_at: Instant,
    ttl: Duration,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the payload while `now - stored_at <= ttl`, evicting it otherwise.
    pub async fn get(&self, key: &str) -> Option<UpstreamResult> {
        let mut guard = self.inner.write().await;
        let now = Instant::now();

        if let Some(entry) = guard.get(key) {
            if entry.is_stale(now) {
                guard.remove(key);
                tracing::debug!(key, "evicted stale cache entry");
                return None;
            }

            return Some(entry.payload.clone());
        }

        None
    }

    pub async fn set(&self, key: String, payload: UpstreamResult, ttl: Duration) {
        let entry = CacheEntry {
            payload,
            stored_at: Instant::now(),
            ttl,
        };

        let mut guard = self.inner.write().await;
        let replaced = guard.insert(key, entry).is_some();
        drop(guard);

        tracing::debug!(seconds = ttl.as_secs(), replaced, "stored upstream response");
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

impl CacheEntry {
    fn is_stale(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) > self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(n: u32) -> UpstreamResult {
        UpstreamResult::Json(json!({ "n": n }))
    }

    #[tokio::test(start_paused = true)]
    async fn hit_within_ttl_returns_same_payload() {
        let cache = CacheStore::new();
        cache
            .set("k".into(), payload(1), Duration::from_secs(60))
            .await;

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(cache.get("k").await, Some(payload(1)));
        assert_eq!(cache.get("k").await, Some(payload(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn entry_is_valid_up_to_exactly_ttl() {
        let cache = CacheStore::new();
        cache
            .set("k".into(), payload(1), Duration::from_secs(60))
            .await;

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(cache.get("k").await.is_some());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_lookup_evicts_entry() {
        let cache = CacheStore::new();
        cache
            .set("a".into(), payload(1), Duration::from_secs(10))
            .await;
        cache
            .set("b".into(), payload(2), Duration::from_secs(600))
            .await;

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.len().await, 2);
        assert!(cache.get("a").await.is_none());
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get("b").await, Some(payload(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn set_overwrites_and_restarts_the_clock() {
        let cache = CacheStore::new();
        cache
            .set("k".into(), payload(1), Duration::from_secs(10))
            .await;
        tokio::time::advance(Duration::from_secs(8)).await;
        cache
            .set("k".into(), payload(2), Duration::from_secs(10))
            .await;
        tokio::time::advance(Duration::from_secs(8)).await;

        assert_eq!(cache.get("k").await, Some(payload(2)));
    }

    #[tokio::test]
    async fn clones_share_one_map() {
        let cache = CacheStore::new();
        let other = cache.clone();
        other
            .set("k".into(), payload(7), Duration::from_secs(60))
            .await;

        assert_eq!(cache.get("k").await, Some(payload(7)));
        assert!(CacheStore::new().is_empty().await);
    }

    #[tokio::test]
    async fn concurrent_access_is_safe() {
        let cache = CacheStore::new();
        let mut tasks = Vec::new();
        for n in 0..32u32 {
            let cache = cache.clone();
            tasks.push(tokio::spawn(async move {
                let key = format!("k{}", n % 4);
                cache.set(key.clone(), payload(n), Duration::from_secs(60)).await;
                cache.get(&key).await
            }));
        }

        for task in tasks {
            assert!(task.await.unwrap().is_some());
        }
        assert_eq!(cache.len().await, 4);
    }
}
