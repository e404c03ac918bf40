use crate::errors::{Result, ThrottleError};
use crate::store::script::{decrement_script, load_script};
use crate::store::{CounterStore, KeySnapshot, WindowState};
use async_trait::async_trait;
use deadpool_redis::{Connection, Pool};
use redis::{AsyncCommands, RedisResult, Script, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Redis-backed counter store
pub struct RedisStore {
    pool: Arc<Pool>,
    decrement_script: Script,
    command_timeout: Duration,
}

impl RedisStore {
    /// Create a new store and register the decrement script
    pub async fn new(pool: Pool, command_timeout: Duration) -> Result<Self> {
        let pool = Arc::new(pool);

        let mut conn = pool.get().await
            .map_err(|e| ThrottleError::InternalError(
                format!("Failed to get connection for script loading: {}", e)
            ))?;
        load_script(&mut conn).await?;

        Ok(Self {
            pool,
            decrement_script: decrement_script(),
            command_timeout,
        })
    }

    async fn connection(&self) -> Result<Connection> {
        self.pool.get().await.map_err(|e| {
            error!("Failed to get Redis connection: {}", e);
            crate::metrics::record_store_error("connection");
            ThrottleError::RedisConnectionError(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "Pool exhausted",
                e.to_string(),
            )))
        })
    }

    /// Run one round trip under the command timeout and record its latency
    async fn timed<T, F>(&self, command: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.command_timeout, fut).await;
        crate::metrics::record_store_duration(command, started.elapsed().as_secs_f64());

        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                crate::metrics::record_store_error(command);
                Err(ThrottleError::RedisCommandError(format!("{} failed: {}", command, e)))
            }
            Err(_) => {
                crate::metrics::record_store_error(command);
                Err(ThrottleError::RedisCommandError(format!(
                    "{} timed out after {:?}",
                    command, self.command_timeout
                )))
            }
        }
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn pttl(&self, key: &str) -> Result<i64> {
        let mut conn = self.connection().await?;
        self.timed("pttl", conn.pttl(key)).await
    }

    async fn increment_window(&self, key: &str, window_ms: u64) -> Result<WindowState> {
        let mut conn = self.connection().await?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .incr(key, 1)
            .cmd("PEXPIRE").arg(key).arg(window_ms).arg("NX")
            .cmd("PTTL").arg(key);

        let results: Vec<Value> = self
            .timed("increment_window", pipe.query_async(&mut conn))
            .await?;

        let state = parse_window_results(&results)?;
        debug!(
            "Window transaction: key={}, hits={}, ttl_ms={}",
            key, state.total_hits, state.ttl_ms
        );
        Ok(state)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl_ms: u64) -> Result<()> {
        let mut conn = self.connection().await?;
        self.timed("pset_ex", conn.pset_ex(key, value, ttl_ms)).await
    }

    async fn decrement_or_delete(&self, key: &str) -> Result<i64> {
        let mut conn = self.connection().await?;
        let invocation = self.decrement_script.key(key);
        self.timed("decrement", invocation.invoke_async(&mut conn)).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        self.timed("del", conn.del(key)).await
    }

    async fn snapshot(&self, counter_key: &str, block_key: &str) -> Result<KeySnapshot> {
        let mut conn = self.connection().await?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .get(counter_key)
            .cmd("PTTL").arg(counter_key)
            .cmd("PTTL").arg(block_key);

        let results: Vec<Value> = self
            .timed("snapshot", pipe.query_async(&mut conn))
            .await?;

        parse_snapshot_results(&results)
    }

    async fn health_check(&self) -> Result<()> {
        let mut conn = self.connection().await?;

        let response: String = self
            .timed("ping", redis::cmd("PING").query_async(&mut conn))
            .await?;

        if response != "PONG" {
            return Err(ThrottleError::InternalError(
                format!("Unexpected PING response: {}", response)
            ));
        }

        Ok(())
    }
}

/// Parse `[INCR, PEXPIRE NX, PTTL]` transaction results
fn parse_window_results(results: &[Value]) -> Result<WindowState> {
    if results.len() != 3 {
        return Err(ThrottleError::MalformedResponse(format!(
            "window transaction returned {} results, expected 3",
            results.len()
        )));
    }

    Ok(WindowState {
        total_hits: parse_int(&results[0], "INCR")?,
        ttl_ms: parse_int(&results[2], "PTTL")?,
    })
}

/// Parse `[GET, PTTL, PTTL]` transaction results
fn parse_snapshot_results(results: &[Value]) -> Result<KeySnapshot> {
    if results.len() != 3 {
        return Err(ThrottleError::MalformedResponse(format!(
            "snapshot transaction returned {} results, expected 3",
            results.len()
        )));
    }

    let hits: Option<i64> = redis::from_redis_value(&results[0]).map_err(|e| {
        ThrottleError::MalformedResponse(format!("GET returned a non-integer counter: {}", e))
    })?;

    Ok(KeySnapshot {
        hits,
        counter_ttl_ms: parse_int(&results[1], "PTTL")?,
        block_ttl_ms: parse_int(&results[2], "PTTL")?,
    })
}

fn parse_int(value: &Value, command: &str) -> Result<i64> {
    redis::from_redis_value(value).map_err(|e| {
        ThrottleError::MalformedResponse(format!("{} returned {:?}: {}", command, value, e))
    })
}


/// Runs against a live server: `REDIS_URL=redis://localhost:6379 cargo test -- --ignored`.
/// Needs Redis 7+ for `PEXPIRE ... NX`.
#[cfg(test)]
mod redis_server_tests {
    use super::*;
    use crate::config::RedisConfig;
    use crate::store::pool::create_redis_pool;
    use crate::throttler::{FixedWindowThrottler, ThrottlerStorage};
    use std::time::{SystemTime, UNIX_EPOCH};

    async fn live_throttler() -> Option<FixedWindowThrottler<RedisStore>> {
        let url = std::env::var("REDIS_URL").ok()?;
        let config = RedisConfig { url, ..RedisConfig::default() };
        let pool = create_redis_pool(&config).await.unwrap();
        let store = RedisStore::new(pool, Duration::from_secs(2)).await.unwrap();

        // Unique namespace per run so reruns never see leftover counters.
        let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
        let prefix = format!("throttler-test:{}:{}:", std::process::id(), nanos);
        Some(FixedWindowThrottler::with_prefix(Arc::new(store), prefix))
    }

    async fn cleanup(throttler: &FixedWindowThrottler<RedisStore>, key: &str) {
        throttler.store().delete(&throttler.counter_key(key)).await.unwrap();
        throttler.store().delete(&throttler.block_key(key)).await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn test_transaction_counts_and_anchors_window() {
        let Some(throttler) = live_throttler().await else { return };
        let key = "ip:10.0.0.1:route:/wells";

        assert_eq!(throttler.get_record(key).await, None);

        let first = throttler.increment(key, 10_000, 5, 0, "default").await;
        assert_eq!(first.total_hits, 1);
        assert!(first.time_to_expire > 0 && first.time_to_expire <= 10_000);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = throttler.increment(key, 10_000, 5, 0, "default").await;
        let third = throttler.increment(key, 10_000, 5, 0, "default").await;
        assert_eq!((second.total_hits, third.total_hits), (2, 3));
        // PEXPIRE NX leaves the first hit's expiry in place.
        assert!(second.time_to_expire < first.time_to_expire);
        assert!(third.time_to_expire <= second.time_to_expire);
        assert!(!third.is_blocked);

        let record = throttler.get_record(key).await.unwrap();
        assert_eq!(record.total_hits, 3);
        assert!(!record.is_blocked);

        cleanup(&throttler, key).await;
    }

    #[tokio::test]
    #[ignore]
    async fn test_window_expires_on_server() {
        let Some(throttler) = live_throttler().await else { return };
        let key = "ip:10.0.0.2:route:/wells";

        throttler.increment(key, 200, 5, 0, "default").await;
        throttler.increment(key, 200, 5, 0, "default").await;
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(throttler.get_record(key).await, None);
        let fresh = throttler.increment(key, 200, 5, 0, "default").await;
        assert_eq!(fresh.total_hits, 1);

        cleanup(&throttler, key).await;
    }

    #[tokio::test]
    #[ignore]
    async fn test_block_escalation_on_server() {
        let Some(throttler) = live_throttler().await else { return };
        let key = "ip:10.0.0.3:route:/auth/login";

        for expected in 1..=2 {
            let record = throttler.increment(key, 10_000, 2, 2000, "login").await;
            assert_eq!(record.total_hits, expected);
            assert!(!record.is_blocked);
        }

        let over = throttler.increment(key, 10_000, 2, 2000, "login").await;
        assert!(over.is_blocked);
        assert_eq!(over.total_hits, 3);
        assert_eq!(over.time_to_block_expire, 2000);

        let blocked = throttler.increment(key, 10_000, 2, 2000, "login").await;
        assert!(blocked.is_blocked);
        assert_eq!(blocked.total_hits, 2);
        assert!(blocked.time_to_block_expire > 0 && blocked.time_to_block_expire <= 2000);

        // Hits made while blocked are not counted.
        let record = throttler.get_record(key).await.unwrap();
        assert_eq!(record.total_hits, 3);
        assert!(record.is_blocked);

        // Reset clears the counter but leaves the block running.
        throttler.reset(key).await;
        assert_eq!(throttler.get_record(key).await, None);
        assert!(throttler.increment(key, 10_000, 2, 2000, "login").await.is_blocked);

        cleanup(&throttler, key).await;
    }

    #[tokio::test]
    #[ignore]
    async fn test_refund_script_on_server() {
        let Some(throttler) = live_throttler().await else { return };
        let key = "ip:10.0.0.4:route:/wells";
        let counter_key = throttler.counter_key(key);

        throttler.increment(key, 10_000, 5, 0, "default").await;
        throttler.increment(key, 10_000, 5, 0, "default").await;

        throttler.decrement(key).await;
        let record = throttler.get_record(key).await.unwrap();
        assert_eq!(record.total_hits, 1);
        assert!(record.time_to_expire > 0);

        throttler.decrement(key).await;
        assert_eq!(throttler.get_record(key).await, None);
        assert_eq!(throttler.store().pttl(&counter_key).await.unwrap(), crate::store::TTL_KEY_MISSING);

        // Refunding a missing key leaves nothing behind either.
        assert_eq!(throttler.store().decrement_or_delete(&counter_key).await.unwrap(), -1);
        assert_eq!(throttler.store().pttl(&counter_key).await.unwrap(), crate::store::TTL_KEY_MISSING);

        let fresh = throttler.increment(key, 10_000, 5, 0, "default").await;
        assert_eq!(fresh.total_hits, 1);

        cleanup(&throttler, key).await;
    }
}
