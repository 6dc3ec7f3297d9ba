//! Error types for the shard pool router

use std::fmt;
use tracing::{error, warn};

/// Result type alias for the router
pub type Result<T> = std::result::Result<T, RouterError>;

/// Main error type for the shard pool router
#[derive(Debug)]
pub enum RouterError {
    /// The driver could not establish or use a connection
    Connection {
        /// The underlying driver error
        source: sqlx::Error,
        /// User-friendly error message
        message: String,
        /// Whether this is a recoverable error
        recoverable: bool,
    },
    /// Driver errors that are not connectivity failures
    Query {
        /// What was being attempted when the driver failed
        operation: String,
        /// The underlying driver error
        source: sqlx::Error,
    },
    /// Configuration errors, never retried
    Configuration {
        /// Configuration parameter that is invalid
        parameter: String,
        /// Error message
        message: String,
    },
    /// Validation errors
    Validation {
        /// The validation error message
        message: String,
        /// The invalid value that caused the error
        invalid_value: Option<String>,
    },
    /// One or more pools failed during a bulk lifecycle operation
    Lifecycle {
        /// Name of the broadcast operation
        operation: String,
        /// Failing pool keys with their errors
        failures: Vec<(String, RouterError)>,
    },
    /// General I/O errors
    Io {
        /// The underlying I/O error
        source: std::io::Error,
        /// Context about the I/O operation
        context: String,
    },
}

impl RouterError {
    /// Create a new connection error
    pub fn connection_error(source: sqlx::Error, recoverable: bool) -> Self {
        let message = Self::format_connection_error(&source, recoverable);
        error!("Connection error: {} (recoverable: {})", source, recoverable);

        Self::Connection {
            source,
            message,
            recoverable,
        }
    }

    /// Create a new driver error that is not a connectivity failure
    pub fn query_error(operation: String, source: sqlx::Error) -> Self {
        error!("Driver operation '{}' failed: {}", operation, source);

        Self::Query { operation, source }
    }

    /// Create a new configuration error
    pub fn configuration_error(parameter: String, message: String) -> Self {
        error!("Configuration error for '{}': {}", parameter, message);

        Self::Configuration { parameter, message }
    }

    /// Create a new validation error
    pub fn validation_error(message: String, invalid_value: Option<String>) -> Self {
        warn!("Validation error: {} | Invalid value: {:?}", message, invalid_value);

        Self::Validation {
            message,
            invalid_value,
        }
    }

    /// Aggregate per-pool failures of a broadcast operation
    pub fn lifecycle_error(operation: String, failures: Vec<(String, RouterError)>) -> Self {
        error!(
            "Lifecycle operation '{}' failed on {} pool(s)",
            operation,
            failures.len()
        );

        Self::Lifecycle {
            operation,
            failures,
        }
    }

    /// Create a new I/O error
    pub fn io_error(source: std::io::Error, context: String) -> Self {
        error!("I/O error in {}: {}", context, source);

        Self::Io { source, context }
    }

    /// Classify a driver error with the given connectivity predicate.
    ///
    /// Connectivity failures become [`RouterError::Connection`]; everything
    /// else is passed through as [`RouterError::Query`].
    pub fn from_driver(
        operation: &str,
        source: sqlx::Error,
        is_connectivity_failure: impl FnOnce(&sqlx::Error) -> bool,
    ) -> Self {
        if is_connectivity_failure(&source) {
            let recoverable = matches!(
                source,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            );
            Self::connection_error(source, recoverable)
        } else {
            Self::query_error(operation.to_string(), source)
        }
    }

    /// Whether this error belongs to the connectivity category that may
    /// trigger failover
    pub fn is_connectivity_failure(&self) -> bool {
        matches!(self, RouterError::Connection { .. })
    }

    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            RouterError::Connection { recoverable, .. } => *recoverable,
            RouterError::Query { .. } => false,
            RouterError::Configuration { .. } => false,
            RouterError::Validation { .. } => false,
            RouterError::Lifecycle { failures, .. } => {
                failures.iter().all(|(_, err)| err.is_recoverable())
            }
            RouterError::Io { .. } => true,
        }
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            RouterError::Connection { message, .. } => message.clone(),
            RouterError::Query { operation, source } => {
                format!("Database operation '{}' failed: {}", operation, source)
            }
            RouterError::Configuration { parameter, message } => {
                format!("Configuration error for '{}': {}", parameter, message)
            }
            RouterError::Validation { message, .. } => message.clone(),
            RouterError::Lifecycle {
                operation,
                failures,
            } => {
                let keys = failures
                    .iter()
                    .map(|(key, _)| key.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("'{}' failed for pools: {}", operation, keys)
            }
            RouterError::Io { context, .. } => format!("I/O error during {}", context),
        }
    }

    /// Get detailed error information for logging
    pub fn detailed_message(&self) -> String {
        match self {
            RouterError::Connection {
                source,
                message,
                recoverable,
            } => {
                format!(
                    "Connection error: {} | Recoverable: {} | Source: {}",
                    message, recoverable, source
                )
            }
            RouterError::Query { operation, source } => {
                format!("Driver error during '{}': {}", operation, source)
            }
            RouterError::Configuration { parameter, message } => {
                format!("Configuration error for '{}': {}", parameter, message)
            }
            RouterError::Validation {
                message,
                invalid_value,
            } => {
                format!("Validation error: {} | Invalid value: {:?}", message, invalid_value)
            }
            RouterError::Lifecycle {
                operation,
                failures,
            } => {
                let details = failures
                    .iter()
                    .map(|(key, err)| format!("{}: {}", key, err.detailed_message()))
                    .collect::<Vec<_>>()
                    .join("; ");
                format!("Lifecycle operation '{}' failed: {}", operation, details)
            }
            RouterError::Io { source, context } => format!("I/O error in {}: {}", context, source),
        }
    }

    fn format_connection_error(source: &sqlx::Error, recoverable: bool) -> String {
        match source {
            sqlx::Error::Io(_) => {
                if recoverable {
                    "Unable to connect to database. Please check network connectivity and try again.".to_string()
                } else {
                    "Database connection failed due to network error.".to_string()
                }
            }
            sqlx::Error::Tls(_) => {
                "Database connection failed due to TLS/SSL error. Please check certificate configuration.".to_string()
            }
            sqlx::Error::PoolTimedOut => {
                "Timed out waiting for a pooled database connection.".to_string()
            }
            sqlx::Error::PoolClosed => "Database connection pool has been closed.".to_string(),
            _ => format!("Database connection failed: {}", source),
        }
    }
}

impl fmt::Display for RouterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for RouterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RouterError::Connection { source, .. } => Some(source),
            RouterError::Query { source, .. } => Some(source),
            RouterError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<std::io::Error> for RouterError {
    fn from(err: std::io::Error) -> Self {
        RouterError::io_error(err, "unknown context".to_string())
    }
}

impl From<toml::de::Error> for RouterError {
    fn from(err: toml::de::Error) -> Self {
        RouterError::configuration_error("config".to_string(), err.to_string())
    }
}
