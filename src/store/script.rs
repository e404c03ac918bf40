use crate::errors::{Result, ThrottleError};
use redis::{aio::ConnectionLike, Script};
use tracing::{debug, info};

const DECREMENT_SCRIPT: &str = include_str!("../../scripts/decrement.lua");

/// Register the decrement script with Redis so later invocations hit EVALSHA
pub async fn load_script<C: ConnectionLike>(conn: &mut C) -> Result<String> {
    debug!("Loading decrement script into Redis...");

    let sha = decrement_script()
        .prepare_invoke()
        .load_async(conn)
        .await
        .map_err(|e| ThrottleError::ScriptExecutionError(
            format!("Failed to load Lua script: {}", e)
        ))?;

    info!("Decrement script loaded (SHA: {})", sha);
    Ok(sha)
}

/// DECR the counter and DEL it once it reaches zero, in one server-side step
pub fn decrement_script() -> Script {
    Script::new(DECREMENT_SCRIPT)
}
