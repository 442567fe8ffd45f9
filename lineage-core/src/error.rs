use std::time::Duration;

/// Top-level lineage error type.
///
/// All fallible operations in `lineage-core` return [`Result<T, LineageError>`](Result).
/// Only conditions that abort a request live here; cycles, depth truncation and
/// unit gaps are reported as [`TraceWarning`](crate::trace::TraceWarning)s on the
/// result instead.
#[derive(thiserror::Error, Debug)]
pub enum LineageError {
    /// The root batch, a link endpoint, or a looked-up batch number does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The batch registry or lineage link store could not serve the request.
    /// Callers may retry.
    #[error("Dependency unavailable: {0}")]
    DependencyUnavailable(#[from] StoreError),

    /// Request parameters were rejected before any traversal started.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The request's cancellation token fired; partial results were discarded.
    #[error("Request cancelled")]
    Cancelled,

    /// The request exceeded its configured time budget.
    #[error("Request timed out after {0:?}")]
    TimedOut(Duration),

    /// Error in configuration parsing or validation.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl LineageError {
    /// Whether the same request may succeed if issued again unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::DependencyUnavailable(store) => store.is_transient(),
            Self::TimedOut(_) => true,
            _ => false,
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}

/// Errors from the batch registry / lineage link store adapters.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// Underlying `SQLite` operation failed.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Schema migration failed (version mismatch or DDL error).
    #[error("Migration failed: {0}")]
    Migration(String),

    /// JSON serialization/deserialization of a snapshot failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backing service did not answer (network partition, closed pool, ...).
    #[error("Store unreachable: {0}")]
    Unreachable(String),

    /// A stored value could not be mapped back into the domain model.
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Bad stored data and broken schemas stay broken on retry.
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            Self::Corrupt(_) | Self::Serialization(_) | Self::Migration(_)
        )
    }
}

/// Errors in lineage configuration parsing and validation.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// The configuration file does not exist at the expected path.
    #[error("Config file not found: {0}")]
    NotFound(String),

    /// Configuration values are present but semantically invalid.
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// Configuration file syntax could not be parsed (TOML error).
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Convenience alias for `Result<T, LineageError>`.
pub type Result<T> = std::result::Result<T, LineageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependency_and_timeout_are_retryable() {
        let err = LineageError::from(StoreError::Unreachable("link store".into()));
        assert!(err.is_retryable());
        assert!(LineageError::TimedOut(Duration::from_secs(1)).is_retryable());
    }

    #[test]
    fn corrupt_store_data_is_not_retryable() {
        let corrupt = LineageError::from(StoreError::Corrupt("page offset did not advance".into()));
        assert!(!corrupt.is_retryable());
        let bad_json = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(!LineageError::from(StoreError::Serialization(bad_json)).is_retryable());
        assert!(!LineageError::from(StoreError::Migration("version 9".into())).is_retryable());
    }

    #[test]
    fn input_and_missing_batches_are_not_retryable() {
        assert!(!LineageError::invalid("depth must be positive").is_retryable());
        assert!(!LineageError::NotFound("batch 7".into()).is_retryable());
        assert!(!LineageError::Cancelled.is_retryable());
    }

    #[test]
    fn messages_name_the_condition() {
        let err = LineageError::from(ConfigError::Invalid("low_max >= medium_max".into()));
        assert_eq!(
            err.to_string(),
            "Configuration error: Invalid config: low_max >= medium_max"
        );
    }
}
