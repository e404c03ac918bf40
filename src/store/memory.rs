//! In-process counter store.
//!
//! **Single-process only.** Counters live in this process's memory and are not
//! shared with other instances; use [`RedisStore`](crate::store::RedisStore)
//! when several API processes must see one rate-limit view. Expiry follows the
//! tokio clock, so a paused test runtime controls it through
//! `tokio::time::advance`.
//!
//! Expired entries read as missing but stay in the map until purged. Long-lived
//! stores should be built with [`MemoryStore::with_cleanup`], which evicts them
//! on a fixed period.

use crate::errors::{Result, ThrottleError};
use crate::store::{CounterStore, KeySnapshot, WindowState, TTL_KEY_MISSING, TTL_NO_EXPIRY};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, StoredValue>>,
}

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }

    fn ttl_ms(&self, now: Instant) -> i64 {
        match self.expires_at {
            Some(at) => at.saturating_duration_since(now).as_millis() as i64,
            None => TTL_NO_EXPIRY,
        }
    }

    fn as_counter(&self, key: &str) -> Result<i64> {
        self.value.parse().map_err(|_| {
            ThrottleError::RedisCommandError(format!(
                "value at '{}' is not an integer",
                key
            ))
        })
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that evicts expired entries every `period`.
    ///
    /// Must be called inside a tokio runtime. The cleanup task holds only a weak
    /// reference and exits once every clone of the store has been dropped.
    pub fn with_cleanup(period: Duration) -> Self {
        let store = Self::new();
        let entries = Arc::downgrade(&store.entries);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(entries) = entries.upgrade() else {
                    debug!("Memory store dropped, stopping cleanup task");
                    break;
                };
                let purged = purge(&entries);
                if purged > 0 {
                    debug!("Evicted {} expired entries, {} remaining", purged, entries.len());
                }
            }
        });

        store
    }

    /// Drop every expired entry; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        purge(&self.entries)
    }

    /// Number of entries currently held, expired or not
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn live_ttl(&self, key: &str, now: Instant) -> i64 {
        match self.entries.get(key) {
            Some(stored) if !stored.is_expired(now) => stored.ttl_ms(now),
            _ => TTL_KEY_MISSING,
        }
    }
}

fn purge(entries: &DashMap<String, StoredValue>) -> usize {
    let now = Instant::now();
    let before = entries.len();
    entries.retain(|_, stored| !stored.is_expired(now));
    before.saturating_sub(entries.len())
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn pttl(&self, key: &str) -> Result<i64> {
        Ok(self.live_ttl(key, Instant::now()))
    }

    async fn increment_window(&self, key: &str, window_ms: u64) -> Result<WindowState> {
        let now = Instant::now();
        // The entry guard holds the shard lock, which makes the three steps one unit.
        let mut stored = match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(occupied) => {
                let mut stored = occupied.into_ref();
                if stored.is_expired(now) {
                    *stored = StoredValue { value: "0".to_string(), expires_at: None };
                }
                stored
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(StoredValue { value: "0".to_string(), expires_at: None })
            }
        };

        let total_hits = stored.as_counter(key)? + 1;
        stored.value = total_hits.to_string();
        if stored.expires_at.is_none() {
            stored.expires_at = Some(now + Duration::from_millis(window_ms));
        }

        Ok(WindowState {
            total_hits,
            ttl_ms: stored.ttl_ms(now),
        })
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl_ms: u64) -> Result<()> {
        let expires_at = Some(Instant::now() + Duration::from_millis(ttl_ms));
        self.entries.insert(
            key.to_string(),
            StoredValue { value: value.to_string(), expires_at },
        );
        Ok(())
    }

    async fn decrement_or_delete(&self, key: &str) -> Result<i64> {
        let now = Instant::now();
        let remaining = match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.remove();
                    return Ok(-1);
                }
                let value = occupied.get().as_counter(key)? - 1;
                if value <= 0 {
                    occupied.remove();
                } else {
                    occupied.into_ref().value = value.to_string();
                }
                value
            }
            // DECR on a missing key yields -1, which the refund then deletes.
            MapEntry::Vacant(_) => -1,
        };
        Ok(remaining)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn snapshot(&self, counter_key: &str, block_key: &str) -> Result<KeySnapshot> {
        let now = Instant::now();
        let hits = match self.entries.get(counter_key) {
            Some(stored) if !stored.is_expired(now) => Some(stored.as_counter(counter_key)?),
            _ => None,
        };

        Ok(KeySnapshot {
            hits,
            counter_ttl_ms: self.live_ttl(counter_key, now),
            block_ttl_ms: self.live_ttl(block_key, now),
        })
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_window_ttl_is_anchored_to_first_hit() {
        let store = MemoryStore::new();

        let first = store.increment_window("k", 1000).await.unwrap();
        assert_eq!(first, WindowState { total_hits: 1, ttl_ms: 1000 });

        tokio::time::advance(Duration::from_millis(400)).await;
        let second = store.increment_window("k", 1000).await.unwrap();
        assert_eq!(second, WindowState { total_hits: 2, ttl_ms: 600 });

        tokio::time::advance(Duration::from_millis(600)).await;
        let fresh = store.increment_window("k", 1000).await.unwrap();
        assert_eq!(fresh, WindowState { total_hits: 1, ttl_ms: 1000 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_pttl_sentinels() {
        let store = MemoryStore::new();
        assert_eq!(store.pttl("missing").await.unwrap(), TTL_KEY_MISSING);

        store.set_with_ttl("block", "1", 5000).await.unwrap();
        tokio::time::advance(Duration::from_millis(1000)).await;
        assert_eq!(store.pttl("block").await.unwrap(), 4000);

        tokio::time::advance(Duration::from_millis(4000)).await;
        assert_eq!(store.pttl("block").await.unwrap(), TTL_KEY_MISSING);
    }

    #[tokio::test]
    async fn test_decrement_deletes_at_zero() {
        let store = MemoryStore::new();
        store.increment_window("k", 60_000).await.unwrap();
        store.increment_window("k", 60_000).await.unwrap();

        assert_eq!(store.decrement_or_delete("k").await.unwrap(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.decrement_or_delete("k").await.unwrap(), 0);
        assert!(store.is_empty());
        assert_eq!(store.decrement_or_delete("k").await.unwrap(), -1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_non_integer_counter_is_rejected() {
        let store = MemoryStore::new();
        store.set_with_ttl("k", "blocked", 1000).await.unwrap();

        assert!(store.increment_window("k", 1000).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_and_purge() {
        let store = MemoryStore::new();
        let missing = store.snapshot("c", "b").await.unwrap();
        assert_eq!(missing.hits, None);
        assert_eq!(missing.counter_ttl_ms, TTL_KEY_MISSING);

        store.increment_window("c", 1000).await.unwrap();
        store.set_with_ttl("b", "1", 3000).await.unwrap();
        let snapshot = store.snapshot("c", "b").await.unwrap();
        assert_eq!(snapshot.hits, Some(1));
        assert_eq!(snapshot.block_ttl_ms, 3000);

        tokio::time::advance(Duration::from_millis(1500)).await;
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_task_evicts_expired_windows() {
        let store = MemoryStore::with_cleanup(Duration::from_secs(1));
        for i in 0..1000 {
            store.increment_window(&format!("ip:10.0.{}.{}", i / 256, i % 256), 1000).await.unwrap();
        }
        store.set_with_ttl("block", "1", 10_000).await.unwrap();
        assert_eq!(store.len(), 1001);

        // Paused clock auto-advances through the cleanup ticks at 1s and 2s.
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(store.len(), 1);
        assert_eq!(store.pttl("block").await.unwrap(), 7500);

        tokio::time::sleep(Duration::from_secs(8)).await;
        assert!(store.is_empty());
    }
}
