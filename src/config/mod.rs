pub mod loader;
pub mod validator;
pub mod watcher;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use dashmap::DashMap;

/// Default namespace for every key the throttler writes to the shared store
pub const DEFAULT_KEY_PREFIX: &str = "throttler:";

/// Complete application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Redis configuration (loaded from environment variables only)
    pub redis: RedisConfig,

    /// Throttle policies (loaded from file, supports hot reload)
    pub throttlers: ThrottlerConfig,
}

/// Redis connection configuration (loaded from environment variables)
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis URL (e.g., "redis://localhost:6379")
    pub url: String,

    /// Maximum number of connections in pool
    pub max_connections: usize,

    /// Connection timeout in seconds
    pub connection_timeout_secs: u64,

    /// Command timeout in seconds
    pub command_timeout_secs: u64,
}

impl RedisConfig {
    /// Load Redis configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),

            max_connections: env_parse("REDIS_MAX_CONN").unwrap_or(50),

            connection_timeout_secs: env_parse("REDIS_CONNECT_TIMEOUT_SECS").unwrap_or(5),

            command_timeout_secs: env_parse("REDIS_COMMAND_TIMEOUT_SECS").unwrap_or(2),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            max_connections: 50,
            connection_timeout_secs: 5,
            command_timeout_secs: 2,
        }
    }
}

/// Throttling configuration (loaded from JSON file)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottlerConfig {
    /// Namespace prepended to every counter and block key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Policy applied to routes without an override
    #[serde(default = "default_policy")]
    pub default: ThrottlePolicy,

    /// Per-route overrides
    #[serde(default)]
    pub routes: Vec<RoutePolicy>,
}

impl Default for ThrottlerConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            default: default_policy(),
            routes: vec![],
        }
    }
}

/// A named fixed-window policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottlePolicy {
    /// Label used in logs, metrics and header suffixes
    pub name: String,

    /// Window length in milliseconds
    pub window_ms: u64,

    /// Hits allowed per window
    pub limit: u64,

    /// How long a key stays blocked after exceeding the limit (0 disables blocking)
    #[serde(default)]
    pub block_duration_ms: u64,
}

/// Policy override bound to one route
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutePolicy {
    /// Route path as seen by the caller (e.g., "/auth/login")
    pub route: String,

    pub policy: ThrottlePolicy,
}

/// Runtime policy lookup with fast concurrent access
pub struct PolicyCache {
    /// Map from route -> policy
    routes: Arc<DashMap<String, ThrottlePolicy>>,

    /// Fallback for routes without an override
    default_policy: Arc<ThrottlePolicy>,

    full_config: Arc<ThrottlerConfig>,
}

impl PolicyCache {
    pub fn new(config: ThrottlerConfig) -> Self {
        let routes = DashMap::new();

        for route_policy in &config.routes {
            routes.insert(route_policy.route.clone(), route_policy.policy.clone());
        }

        Self {
            routes: Arc::new(routes),
            default_policy: Arc::new(config.default.clone()),
            full_config: Arc::new(config),
        }
    }

    /// Get the policy for a route, falling back to the default
    pub fn policy_for(&self, route: &str) -> ThrottlePolicy {
        self.routes
            .get(route)
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| self.default_policy.as_ref().clone())
    }

    pub fn key_prefix(&self) -> &str {
        &self.full_config.key_prefix
    }

    /// Get the full configuration (for observability)
    pub fn get_full_config(&self) -> Arc<ThrottlerConfig> {
        Arc::clone(&self.full_config)
    }

    pub fn stats(&self) -> ConfigStats {
        ConfigStats {
            route_count: self.routes.len(),
        }
    }
}

/// Statistics about the policy cache
#[derive(Debug, Clone)]
pub struct ConfigStats {
    pub route_count: usize,
}

pub(crate) fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

fn default_policy() -> ThrottlePolicy {
    ThrottlePolicy {
        name: "default".to_string(),
        window_ms: 1000,
        limit: 10,
        block_duration_ms: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn login_policy() -> ThrottlePolicy {
        ThrottlePolicy {
            name: "login".to_string(),
            window_ms: 60_000,
            limit: 5,
            block_duration_ms: 300_000,
        }
    }

    #[test]
    fn test_policy_for_falls_back_to_default() {
        let cache = PolicyCache::new(ThrottlerConfig {
            routes: vec![RoutePolicy {
                route: "/auth/login".to_string(),
                policy: login_policy(),
            }],
            ..ThrottlerConfig::default()
        });

        assert_eq!(cache.policy_for("/auth/login"), login_policy());
        assert_eq!(cache.policy_for("/wells").name, "default");
        assert_eq!(cache.policy_for("/wells").limit, 10);
        assert_eq!(cache.stats().route_count, 1);
        assert_eq!(cache.key_prefix(), DEFAULT_KEY_PREFIX);
    }

    #[test]
    fn test_deserialize_minimal_config() {
        let config: ThrottlerConfig = serde_json::from_str(
            r#"{"routes":[{"route":"/scada/ingest","policy":{"name":"ingest","window_ms":1000,"limit":100}}]}"#,
        )
        .unwrap();

        assert_eq!(config.key_prefix, "throttler:");
        assert_eq!(config.default.window_ms, 1000);
        assert_eq!(config.routes[0].policy.block_duration_ms, 0);
    }
}
