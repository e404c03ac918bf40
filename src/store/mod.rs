pub mod memory;
pub mod pool;
pub mod redis_store;
pub mod script;

use crate::errors::Result;
use async_trait::async_trait;

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

/// TTL reported for a key that does not exist
pub const TTL_KEY_MISSING: i64 = -2;

/// TTL reported for a key that exists without an expiry
pub const TTL_NO_EXPIRY: i64 = -1;

/// Result of the increment/expire/ttl transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    /// Counter value after the increment
    pub total_hits: i64,

    /// Remaining counter TTL in milliseconds (or a TTL sentinel)
    pub ttl_ms: i64,
}

/// Counter value plus both TTLs, read in one transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySnapshot {
    /// None when the counter key does not exist
    pub hits: Option<i64>,

    pub counter_ttl_ms: i64,

    pub block_ttl_ms: i64,
}

/// Shared counter store the throttler keeps all of its state in.
///
/// Every method is one round trip. Methods documented as a transaction must
/// be indivisible with respect to other clients touching the same key.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Remaining TTL of `key` in milliseconds, or a TTL sentinel
    async fn pttl(&self, key: &str) -> Result<i64>;

    /// Transaction: INCR key, PEXPIRE key window_ms NX, PTTL key
    async fn increment_window(&self, key: &str, window_ms: u64) -> Result<WindowState>;

    /// Unconditionally set `key` with a TTL
    async fn set_with_ttl(&self, key: &str, value: &str, ttl_ms: u64) -> Result<()>;

    /// Atomically decrement `key`, deleting it when the result is <= 0
    async fn decrement_or_delete(&self, key: &str) -> Result<i64>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Transaction: GET counter_key, PTTL counter_key, PTTL block_key
    async fn snapshot(&self, counter_key: &str, block_key: &str) -> Result<KeySnapshot>;

    /// Check if the store is reachable
    async fn health_check(&self) -> Result<()>;
}
