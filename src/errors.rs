use thiserror::Error;

#[derive(Error, Debug)]
pub enum ThrottleError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Invalid throttle policy: {0}")]
    InvalidPolicy(String),

    #[error("Redis connection error: {0}")]
    RedisConnectionError(#[from] redis::RedisError),

    #[error("Redis command error: {0}")]
    RedisCommandError(String),

    #[error("Script execution error: {0}")]
    ScriptExecutionError(String),

    #[error("Malformed store response: {0}")]
    MalformedResponse(String),

    #[error("File system error: {0}")]
    FileSystemError(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl ThrottleError {
    /// HTTP status the admin surface answers with for this error
    pub fn status_code(&self) -> u16 {
        match self {
            ThrottleError::RedisConnectionError(_)
            | ThrottleError::RedisCommandError(_)
            | ThrottleError::ScriptExecutionError(_)
            | ThrottleError::MalformedResponse(_) => 503,
            ThrottleError::InvalidPolicy(_) => 400,
            ThrottleError::ConfigurationError(_)
            | ThrottleError::FileSystemError(_)
            | ThrottleError::JsonError(_)
            | ThrottleError::InternalError(_) => 500,
        }
    }
}

/// Result type alias for throttler operations
pub type Result<T> = std::result::Result<T, ThrottleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_errors_map_to_unavailable() {
        let err = ThrottleError::MalformedResponse("expected 3 results, got 2".to_string());
        assert_eq!(err.status_code(), 503);

        let err = ThrottleError::RedisConnectionError(redis::RedisError::from((
            redis::ErrorKind::IoError,
            "Pool exhausted",
        )));
        assert_eq!(err.status_code(), 503);
    }

    #[test]
    fn test_policy_errors_are_client_errors() {
        let err = ThrottleError::InvalidPolicy("limit must be at least 1".to_string());
        assert_eq!(err.status_code(), 400);
        assert_eq!(
            err.to_string(),
            "Invalid throttle policy: limit must be at least 1"
        );
    }
}
