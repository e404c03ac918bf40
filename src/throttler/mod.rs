pub mod fixed_window;
pub mod guard;

use crate::errors::Result;
use async_trait::async_trait;
use serde::Serialize;

pub use self::fixed_window::FixedWindowThrottler;
pub use self::guard::{AdmissionDecision, AdmissionGuard};

/// Point-in-time projection of a key's window counter and block flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThrottleRecord {
    /// Hits counted in the current window
    pub total_hits: u64,

    /// Milliseconds until the window counter expires
    pub time_to_expire: u64,

    pub is_blocked: bool,

    /// Milliseconds until the block flag expires (0 when not blocked)
    pub time_to_block_expire: u64,
}

impl ThrottleRecord {
    /// Decision returned when the store cannot be consulted: let the request through
    pub fn fail_open(window_ms: u64) -> Self {
        Self {
            total_hits: 0,
            time_to_expire: window_ms,
            is_blocked: false,
            time_to_block_expire: 0,
        }
    }
}

/// Shared admission controller operations.
///
/// None of the counting operations report errors: store failures are logged
/// and mapped to the fail-open outcome, so an unreachable store never rejects
/// traffic.
#[async_trait]
pub trait ThrottlerStorage: Send + Sync {
    /// Count one hit for `key` and report whether it is blocked
    async fn increment(
        &self,
        key: &str,
        window_ms: u64,
        limit: u64,
        block_duration_ms: u64,
        throttler_name: &str,
    ) -> ThrottleRecord;

    /// Refund one previously counted hit
    async fn decrement(&self, key: &str);

    /// Drop the window counter; an active block is left in place
    async fn reset(&self, key: &str);

    /// Read-only snapshot; `None` when the key has no live window
    async fn get_record(&self, key: &str) -> Option<ThrottleRecord>;

    /// Check if the backing store is reachable
    async fn health_check(&self) -> Result<()>;
}
