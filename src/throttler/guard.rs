//! Caller-side admission check.
//!
//! Resolves the route's policy, derives the throttle key from the client
//! address and route, and turns the resulting [`ThrottleRecord`] into an
//! allow/deny decision with the usual rate-limit response headers.

use crate::config::{PolicyCache, ThrottlePolicy};
use crate::throttler::{ThrottleRecord, ThrottlerStorage};
use arc_swap::ArcSwap;
use std::sync::Arc;
use tracing::debug;

/// Outcome of one admission check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionDecision {
    /// Throttle key the hit was counted under
    pub key: String,

    /// Policy name
    pub throttler: String,

    pub allowed: bool,

    pub limit: u64,

    /// Hits left in the current window
    pub remaining: u64,

    /// Milliseconds until the window resets
    pub reset_after_ms: u64,

    /// Set when blocked: milliseconds until the block lifts
    pub retry_after_ms: Option<u64>,

    pub record: ThrottleRecord,
}

impl AdmissionDecision {
    pub fn from_record(key: String, policy: &ThrottlePolicy, record: ThrottleRecord) -> Self {
        Self {
            key,
            throttler: policy.name.clone(),
            allowed: !record.is_blocked,
            limit: policy.limit,
            remaining: policy.limit.saturating_sub(record.total_hits),
            reset_after_ms: record.time_to_expire,
            retry_after_ms: record.is_blocked.then_some(record.time_to_block_expire),
            record,
        }
    }

    /// Rate-limit headers for the response; non-default throttlers get a `-<name>` suffix
    pub fn headers(&self) -> Vec<(String, String)> {
        let suffix = if self.throttler == "default" {
            String::new()
        } else {
            format!("-{}", self.throttler)
        };

        let mut headers = vec![
            (format!("X-RateLimit-Limit{}", suffix), self.limit.to_string()),
            (format!("X-RateLimit-Remaining{}", suffix), self.remaining.to_string()),
            (format!("X-RateLimit-Reset{}", suffix), ceil_secs(self.reset_after_ms).to_string()),
        ];

        if let Some(retry_after_ms) = self.retry_after_ms {
            headers.push((format!("Retry-After{}", suffix), ceil_secs(retry_after_ms).to_string()));
        }

        headers
    }
}

/// Admission check used by request middleware before running a handler
pub struct AdmissionGuard<T: ThrottlerStorage> {
    throttler: Arc<T>,
    policies: Arc<ArcSwap<PolicyCache>>,
}

impl<T: ThrottlerStorage> AdmissionGuard<T> {
    pub fn new(throttler: Arc<T>, policies: Arc<ArcSwap<PolicyCache>>) -> Self {
        Self { throttler, policies }
    }

    /// Key under which hits from `client_addr` on `route` are counted
    pub fn throttle_key(client_addr: &str, route: &str) -> String {
        format!("ip:{}:route:{}", client_addr, route)
    }

    /// Count the request and decide whether it may proceed
    pub async fn check(&self, client_addr: &str, route: &str) -> AdmissionDecision {
        let policy = self.policies.load().policy_for(route);
        let key = Self::throttle_key(client_addr, route);

        let record = self
            .throttler
            .increment(
                &key,
                policy.window_ms,
                policy.limit,
                policy.block_duration_ms,
                &policy.name,
            )
            .await;

        let decision = AdmissionDecision::from_record(key, &policy, record);
        debug!(
            throttler = %decision.throttler,
            key = %decision.key,
            allowed = decision.allowed,
            remaining = decision.remaining,
            "Admission decision"
        );
        decision
    }

    /// Give back the hit of an admitted request whose handler never ran.
    /// Rejected requests are left alone.
    pub async fn refund(&self, decision: &AdmissionDecision) {
        if decision.allowed {
            self.throttler.decrement(&decision.key).await;
        }
    }
}

fn ceil_secs(ms: u64) -> u64 {
    ms.div_ceil(1000)
}
