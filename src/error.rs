use std::time::Duration;

/// Failure at the store boundary.
///
/// `Connection` is fatal to the actor that hit it. `Operation` and `Timeout`
/// only cost one cycle; the next scheduled tick retries with fresh work.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store connection failed: {0}")]
    Connection(String),
    #[error("store {operation} failed: {message}")]
    Operation {
        operation: &'static str,
        message: String,
    },
    #[error("store {operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

impl StoreError {
    pub fn operation(operation: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Operation {
            operation,
            message: err.to_string(),
        }
    }

    pub fn connection(err: impl std::fmt::Display) -> Self {
        Self::Connection(err.to_string())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("invalid {key}={value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(key: &'static str, value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            value: value.into(),
            reason: reason.into(),
        }
    }
}
