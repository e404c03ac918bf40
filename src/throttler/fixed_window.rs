use crate::config::DEFAULT_KEY_PREFIX;
use crate::errors::Result;
use crate::store::{CounterStore, TTL_KEY_MISSING};
use crate::throttler::{ThrottleRecord, ThrottlerStorage};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Value written under the block key; only its presence and TTL matter
const BLOCK_SENTINEL: &str = "1";

/// Fixed-window throttler with block escalation, backed by a shared counter store.
///
/// Holds no state besides the store handle and key prefix, so one instance can
/// serve every task in a process and any number of processes can share a store.
pub struct FixedWindowThrottler<S: CounterStore> {
    store: Arc<S>,
    prefix: String,
}

impl<S: CounterStore> FixedWindowThrottler<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_prefix(store, DEFAULT_KEY_PREFIX)
    }

    pub fn with_prefix(store: Arc<S>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn counter_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    pub fn block_key(&self, key: &str) -> String {
        format!("{}block:{}", self.prefix, key)
    }

    async fn try_increment(
        &self,
        key: &str,
        window_ms: u64,
        limit: u64,
        block_duration_ms: u64,
        throttler_name: &str,
    ) -> Result<ThrottleRecord> {
        let block_key = self.block_key(key);

        // Blocked callers are not counted, so traffic cannot stretch the block.
        let block_ttl = self.store.pttl(&block_key).await?;
        if block_ttl > 0 {
            debug!(
                throttler = throttler_name,
                key = key,
                block_ttl_ms = block_ttl,
                "Key is blocked"
            );
            return Ok(ThrottleRecord {
                total_hits: limit,
                time_to_expire: window_ms,
                is_blocked: true,
                time_to_block_expire: block_ttl as u64,
            });
        }

        let state = self
            .store
            .increment_window(&self.counter_key(key), window_ms)
            .await?;

        let total_hits = state.total_hits.max(0) as u64;
        let time_to_expire = if state.ttl_ms > 0 {
            state.ttl_ms as u64
        } else {
            window_ms
        };

        if block_duration_ms > 0 && total_hits > limit {
            self.store
                .set_with_ttl(&block_key, BLOCK_SENTINEL, block_duration_ms)
                .await?;

            warn!(
                throttler = throttler_name,
                key = key,
                "Rate limit exceeded ({}/{}), blocking for {}ms",
                total_hits,
                limit,
                block_duration_ms
            );
            crate::metrics::record_block(throttler_name);

            return Ok(ThrottleRecord {
                total_hits,
                time_to_expire,
                is_blocked: true,
                time_to_block_expire: block_duration_ms,
            });
        }

        Ok(ThrottleRecord {
            total_hits,
            time_to_expire,
            is_blocked: false,
            time_to_block_expire: 0,
        })
    }
}

#[async_trait]
impl<S: CounterStore + 'static> ThrottlerStorage for FixedWindowThrottler<S> {
    async fn increment(
        &self,
        key: &str,
        window_ms: u64,
        limit: u64,
        block_duration_ms: u64,
        throttler_name: &str,
    ) -> ThrottleRecord {
        match self
            .try_increment(key, window_ms, limit, block_duration_ms, throttler_name)
            .await
        {
            Ok(record) => {
                crate::metrics::record_request(throttler_name, record.is_blocked);
                record
            }
            Err(e) => {
                error!(
                    throttler = throttler_name,
                    key = key,
                    "Failing open, counter store error: {}",
                    e
                );
                crate::metrics::record_fail_open("increment");
                ThrottleRecord::fail_open(window_ms)
            }
        }
    }

    async fn decrement(&self, key: &str) {
        match self.store.decrement_or_delete(&self.counter_key(key)).await {
            Ok(remaining) => {
                crate::metrics::record_refund();
                debug!(key = key, remaining = remaining, "Refunded one hit");
            }
            Err(e) => {
                crate::metrics::record_fail_open("decrement");
                warn!(key = key, "Failed to refund hit: {}", e);
            }
        }
    }

    async fn reset(&self, key: &str) {
        match self.store.delete(&self.counter_key(key)).await {
            Ok(()) => {
                crate::metrics::record_reset();
                debug!(key = key, "Window counter reset");
            }
            Err(e) => {
                crate::metrics::record_fail_open("reset");
                warn!(key = key, "Failed to reset window counter: {}", e);
            }
        }
    }

    async fn get_record(&self, key: &str) -> Option<ThrottleRecord> {
        let snapshot = match self
            .store
            .snapshot(&self.counter_key(key), &self.block_key(key))
            .await
        {
            Ok(snapshot) => snapshot,
            Err(e) => {
                crate::metrics::record_fail_open("get_record");
                warn!(key = key, "Failed to read throttle record: {}", e);
                return None;
            }
        };

        let hits = snapshot.hits?;
        if snapshot.counter_ttl_ms == TTL_KEY_MISSING {
            return None;
        }

        Some(ThrottleRecord {
            total_hits: hits.max(0) as u64,
            time_to_expire: snapshot.counter_ttl_ms.max(0) as u64,
            is_blocked: snapshot.block_ttl_ms > 0,
            time_to_block_expire: snapshot.block_ttl_ms.max(0) as u64,
        })
    }

    async fn health_check(&self) -> Result<()> {
        self.store.health_check().await
    }
}
