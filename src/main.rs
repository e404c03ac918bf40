use arc_swap::ArcSwap;
use fixed_window_throttler::config::loader::{build_policy_cache, load_config};
use fixed_window_throttler::config::watcher::watch_config_file;
use fixed_window_throttler::store::pool::{create_redis_pool, get_pool_stats};
use fixed_window_throttler::{admin_server, metrics, FixedWindowThrottler, RedisStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fixed_window_throttler=debug,throttler_admin=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Throttler admin starting...");

    let config = load_config().await?;
    let policies = build_policy_cache(&config);
    metrics::update_route_count(policies.stats().route_count);
    let policies = Arc::new(ArcSwap::from_pointee(policies));

    let pool = match create_redis_pool(&config.redis).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!("Could not connect to the counter store: {}", e);
            std::process::exit(1);
        }
    };
    let stats = get_pool_stats(&pool);
    tracing::info!("Pool ready: {}/{} connections", stats.size, stats.max_size);

    let store = RedisStore::new(pool, Duration::from_secs(config.redis.command_timeout_secs)).await?;
    let throttler = Arc::new(FixedWindowThrottler::with_prefix(
        Arc::new(store),
        config.throttlers.key_prefix.clone(),
    ));

    let config_path = PathBuf::from(
        std::env::var("THROTTLE_CONFIG").unwrap_or_else(|_| "config/throttlers.json".to_string()),
    );
    if config_path.exists() {
        let watched = Arc::clone(&policies);
        tokio::spawn(async move {
            if let Err(e) = watch_config_file(config_path, watched).await {
                tracing::error!("Config watcher stopped: {}", e);
            }
        });
    }

    let port = std::env::var("ADMIN_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(9090);

    let bind = std::env::var("ADMIN_BIND").ok();
    let addr = admin_server::admin_bind_addr(bind.as_deref(), port)?;

    admin_server::start_admin_server(addr, throttler, policies).await?;

    Ok(())
}
