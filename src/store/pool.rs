use crate::config::RedisConfig;
use crate::config::loader::mask_password;
use crate::errors::{Result, ThrottleError};
use deadpool::managed::PoolConfig as DeadpoolPoolConfig;
use deadpool_redis::{Config as DeadpoolRedisConfig, Pool, Runtime};
use redis::RedisError;
use std::time::Duration;
use tracing::{debug, info};

/// Create a Redis connection pool from configuration
pub async fn create_redis_pool(config: &RedisConfig) -> Result<Pool> {
    info!("Creating Redis connection pool for {}", mask_password(&config.url));

    let mut cfg = DeadpoolRedisConfig::from_url(config.url.clone());

    let connect_timeout = Duration::from_secs(config.connection_timeout_secs);
    let mut pool_cfg = DeadpoolPoolConfig::new(config.max_connections);
    pool_cfg.timeouts.wait = Some(connect_timeout);
    pool_cfg.timeouts.create = Some(connect_timeout);
    pool_cfg.timeouts.recycle = Some(connect_timeout);
    cfg.pool = Some(pool_cfg);

    let pool = cfg
        .create_pool(Some(Runtime::Tokio1))
        .map_err(|e| ThrottleError::RedisConnectionError(
            RedisError::from((redis::ErrorKind::IoError, "Pool creation failed", e.to_string()))
        ))?;

    info!(
        "Redis connection pool created (max_connections: {})",
        config.max_connections
    );

    debug!("Testing Redis connection...");
    let mut conn = pool.get().await
        .map_err(|e| ThrottleError::RedisConnectionError(
            RedisError::from((redis::ErrorKind::IoError, "Failed to get connection", e.to_string()))
        ))?;

    let _pong: String = redis::cmd("PING")
        .query_async(&mut conn)
        .await
        .map_err(ThrottleError::RedisConnectionError)?;

    info!("Redis connection test successful");

    Ok(pool)
}

pub fn get_pool_stats(pool: &Pool) -> PoolStats {
    let status = pool.status();
    PoolStats {
        size: status.size,
        available: status.available,
        max_size: status.max_size,
    }
}

#[derive(Debug, Clone)]
pub struct PoolStats {
    pub size: usize,
    pub available: usize,
    pub max_size: usize,
}
