//! Hot reload of throttle policies.
//!
//! Watches one JSON file with `notify`; on create/modify the file is reloaded,
//! validated and swapped into the shared [`PolicyCache`]. A file that fails to
//! load leaves the previous policies in place. The key prefix is fixed for the
//! life of the process, so a file that changes it is rejected as a whole.

use crate::config::PolicyCache;
use crate::config::loader::{apply_env_overrides, load_throttler_config_from_file};
use crate::errors::ThrottleError;
use arc_swap::ArcSwap;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Watch the policy file and swap a fresh cache in on every valid change.
pub async fn watch_config_file(
    path: PathBuf,
    shared_cache: Arc<ArcSwap<PolicyCache>>,
) -> Result<(), notify::Error> {
    // Bridges the watcher's callback thread into this task.
    let (tx, mut rx) = mpsc::channel(1);

    let mut watcher = RecommendedWatcher::new(
        move |res: Result<Event, notify::Error>| {
            if let Err(e) = tx.blocking_send(res) {
                debug!("Failed to send config file event: {}", e);
            }
        },
        notify::Config::default(),
    )?;

    watcher.watch(&path, RecursiveMode::NonRecursive)?;
    info!("Watching throttler config for changes: {}", path.display());

    while let Some(res) = rx.recv().await {
        match res {
            Ok(event) => {
                if should_reload(&event) {
                    info!("Throttler config change detected ({:?}), reloading", event.kind);
                    reload_config(&path, &shared_cache).await;
                } else {
                    debug!("Ignoring filesystem event: {:?}", event.kind);
                }
            }
            Err(e) => {
                crate::metrics::record_config_reload(false);
                error!("Error watching config file: {}", e);
            }
        }
    }

    warn!("Configuration watcher task is shutting down.");
    Ok(())
}

fn should_reload(event: &Event) -> bool {
    matches!(
        event.kind,
        notify::EventKind::Modify(_) | notify::EventKind::Create(_)
    )
}

/// Reload the file and swap the cache; returns whether the swap happened.
pub async fn reload_config(path: &Path, shared_cache: &Arc<ArcSwap<PolicyCache>>) -> bool {
    let mut new_config = match load_throttler_config_from_file(path).await {
        Ok(config) => config,
        Err(e) => {
            crate::metrics::record_config_reload(false);
            match e {
                ThrottleError::FileSystemError(io_err) => error!(
                    "Failed to read config file '{}': {}. Keeping old config.",
                    path.display(),
                    io_err
                ),
                ThrottleError::JsonError(json_err) => error!(
                    "Failed to parse JSON from '{}': {}. Keeping old config.",
                    path.display(),
                    json_err
                ),
                other => error!(
                    "New configuration in '{}' is invalid: {}. Keeping old config.",
                    path.display(),
                    other
                ),
            }
            return false;
        }
    };
    apply_env_overrides(&mut new_config);

    let current_prefix = shared_cache.load().key_prefix().to_string();
    if new_config.key_prefix != current_prefix {
        crate::metrics::record_config_reload(false);
        error!(
            "Config file '{}' changes key_prefix from '{}' to '{}', which requires a restart. Keeping old config.",
            path.display(),
            current_prefix,
            new_config.key_prefix
        );
        return false;
    }

    let new_cache = PolicyCache::new(new_config);
    crate::metrics::update_route_count(new_cache.stats().route_count);

    // Readers holding the old Arc finish with it; new readers see the new one.
    shared_cache.store(Arc::new(new_cache));
    crate::metrics::record_config_reload(true);
    info!("Throttler configuration hot-reloaded");
    true
}
