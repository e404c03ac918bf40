use crate::config::{AppConfig, RedisConfig, ThrottlePolicy, ThrottlerConfig};
use crate::errors::{Result, ThrottleError};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Validate the entire application configuration
pub fn validate_config(config: &AppConfig) -> Result<()> {
    debug!("Validating configuration...");

    validate_redis_config(&config.redis)?;
    validate_throttler_config(&config.throttlers)?;

    debug!("Configuration validation successful");
    Ok(())
}

/// Validate Redis configuration
pub fn validate_redis_config(config: &RedisConfig) -> Result<()> {
    if config.url.is_empty() {
        return Err(ThrottleError::ConfigurationError(
            "Redis URL cannot be empty".to_string()
        ));
    }

    if !config.url.starts_with("redis://") && !config.url.starts_with("rediss://") {
        return Err(ThrottleError::ConfigurationError(
            format!("Invalid Redis URL format: {}. Must start with redis:// or rediss://", config.url)
        ));
    }

    if config.max_connections == 0 {
        return Err(ThrottleError::ConfigurationError(
            "max_connections must be greater than 0".to_string()
        ));
    }

    if config.max_connections > 1000 {
        warn!(
            "max_connections is very high ({}). This may consume excessive resources.",
            config.max_connections
        );
    }

    if config.connection_timeout_secs == 0 {
        return Err(ThrottleError::ConfigurationError(
            "connection_timeout_secs must be greater than 0".to_string()
        ));
    }

    if config.command_timeout_secs == 0 {
        return Err(ThrottleError::ConfigurationError(
            "command_timeout_secs must be greater than 0".to_string()
        ));
    }

    debug!("Redis configuration valid");
    Ok(())
}

/// Validate key prefix, default policy and route overrides
pub fn validate_throttler_config(config: &ThrottlerConfig) -> Result<()> {
    if config.key_prefix.is_empty() {
        return Err(ThrottleError::ConfigurationError(
            "key_prefix cannot be empty".to_string()
        ));
    }

    validate_policy(&config.default, "default")?;

    let mut seen = HashSet::new();
    for route_policy in &config.routes {
        if route_policy.route.is_empty() {
            return Err(ThrottleError::ConfigurationError(
                "Route cannot be empty".to_string()
            ));
        }

        if !seen.insert(route_policy.route.as_str()) {
            return Err(ThrottleError::ConfigurationError(
                format!("Duplicate policy for route '{}'", route_policy.route)
            ));
        }

        validate_policy(&route_policy.policy, &route_policy.route)?;
    }

    Ok(())
}

/// Validate an individual policy
fn validate_policy(policy: &ThrottlePolicy, route: &str) -> Result<()> {
    if policy.name.is_empty() {
        return Err(ThrottleError::InvalidPolicy(
            format!("Policy name cannot be empty for route '{}'", route)
        ));
    }

    if policy.window_ms == 0 {
        return Err(ThrottleError::InvalidPolicy(
            format!("window_ms must be positive for route '{}' policy '{}'", route, policy.name)
        ));
    }

    if policy.limit == 0 {
        return Err(ThrottleError::InvalidPolicy(
            format!("limit must be at least 1 for route '{}' policy '{}'", route, policy.name)
        ));
    }

    if policy.window_ms < 100 {
        warn!(
            "Very short window ({}ms) for route '{}' policy '{}'",
            policy.window_ms, route, policy.name
        );
    }

    if policy.block_duration_ms > 86_400_000 {
        warn!(
            "Block duration for route '{}' policy '{}' exceeds 24 hours ({:.2} hours)",
            route, policy.name, policy.block_duration_ms as f64 / 3_600_000.0
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RoutePolicy;

    fn policy(name: &str, window_ms: u64, limit: u64) -> ThrottlePolicy {
        ThrottlePolicy {
            name: name.to_string(),
            window_ms,
            limit,
            block_duration_ms: 0,
        }
    }

    #[test]
    fn test_validate_valid_config() {
        let config = AppConfig {
            redis: RedisConfig::default(),
            throttlers: ThrottlerConfig::default(),
        };

        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_invalid_redis_url() {
        let mut config = AppConfig {
            redis: RedisConfig::default(),
            throttlers: ThrottlerConfig::default(),
        };

        config.redis.url = "invalid_url".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_zero_window() {
        assert!(validate_policy(&policy("test", 0, 10), "/wells").is_err());
    }

    #[test]
    fn test_validate_zero_limit() {
        let err = validate_policy(&policy("test", 1000, 0), "/wells").unwrap_err();
        assert!(matches!(err, ThrottleError::InvalidPolicy(_)));
    }

    #[test]
    fn test_validate_duplicate_routes() {
        let config = ThrottlerConfig {
            routes: vec![
                RoutePolicy { route: "/alerts".to_string(), policy: policy("a", 1000, 5) },
                RoutePolicy { route: "/alerts".to_string(), policy: policy("b", 1000, 5) },
            ],
            ..ThrottlerConfig::default()
        };

        assert!(validate_throttler_config(&config).is_err());
    }

    #[test]
    fn test_validate_empty_prefix() {
        let config = ThrottlerConfig {
            key_prefix: String::new(),
            ..ThrottlerConfig::default()
        };

        assert!(validate_throttler_config(&config).is_err());
    }
}
