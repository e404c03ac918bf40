pub mod admin_server;
pub mod config;
pub mod errors;
pub mod metrics;
pub mod store;
pub mod throttler;

// Re-export commonly used types
pub use config::{AppConfig, PolicyCache, ThrottlePolicy};
pub use errors::{Result, ThrottleError};
pub use store::{CounterStore, MemoryStore, RedisStore};
pub use throttler::{AdmissionDecision, AdmissionGuard, FixedWindowThrottler, ThrottleRecord, ThrottlerStorage};
