//! Error types for fedaco

use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

/// Result type alias for fedaco operations
pub type OrmResult<T> = Result<T, OrmError>;

/// Error types for query compilation, relation resolution and database operations
#[derive(Debug, Error)]
pub enum OrmError {
    /// Malformed clause arguments or an unsupported dialect feature.
    ///
    /// Always raised before any SQL reaches the driver.
    #[error("Compile error: {0}")]
    Compile(String),

    /// No model matched the given identifier(s)
    #[error("No query results for model [{model}]{}", format_ids(.ids))]
    ModelNotFound { model: String, ids: Vec<String> },

    /// A relation name that the entity schema does not declare
    #[error("Call to undefined relationship [{relation}] on model [{model}]")]
    RelationNotFound { model: String, relation: String },

    /// Relation configuration error (unresolvable morph alias, unsupported operation)
    #[error("Relation error: {0}")]
    Relation(String),

    /// Mass assignment of a guarded attribute
    #[error("Add [{key}] to fillable property to allow mass assignment on [{model}]")]
    MassAssignment { model: String, key: String },

    /// A driver error wrapped with the statement that caused it
    #[error("{message} (SQL: {sql}) (Bindings: {bindings})")]
    Query {
        sql: String,
        bindings: String,
        message: String,
    },

    /// Raw driver error
    #[error("Database error: {0}")]
    Database(String),

    /// Database connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// A dictionary key that cannot be normalised to a primitive
    #[error("Invalid dictionary key: {0}")]
    InvalidKey(String),

    /// Row decode/mapping error
    #[error("Decode error on column '{column}': {message}")]
    Decode { column: String, message: String },

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Query timeout error
    #[error("Query timeout after {0:?}")]
    Timeout(std::time::Duration),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

fn format_ids(ids: &[String]) -> String {
    if ids.is_empty() {
        String::new()
    } else {
        format!(" {}", ids.join(", "))
    }
}

fn lost_connection_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)(server has gone away|no connection to the server|lost connection|is dead or not enabled|error while sending|decryption failed or bad record mac|server closed the connection unexpectedly|ssl connection has been closed unexpectedly|error writing data to the connection|resource deadlock avoided|transaction\(\) on null|child connection forced to terminate|query_wait_timeout|reset by peer|physical connection is not usable|connection refused|broken pipe|connection is closed|connection timed out)",
        )
        .expect("valid lost-connection regex")
    })
}

fn concurrency_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)(deadlock found when trying to get lock|deadlock detected|the database file is locked|database is locked|database table is locked|a table in the database is locked|has been chosen as the deadlock victim|lock wait timeout exceeded|try restarting transaction|could not serialize access|40001|40p01)",
        )
        .expect("valid concurrency regex")
    })
}

impl OrmError {
    /// Create a compile error
    pub fn compile(message: impl Into<String>) -> Self {
        Self::Compile(message.into())
    }

    /// Create a model-not-found error for the given entity and identifiers
    pub fn model_not_found<I, S>(model: impl Into<String>, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        Self::ModelNotFound {
            model: model.into(),
            ids: ids.into_iter().map(|id| id.to_string()).collect(),
        }
    }

    /// Create a relation configuration error
    pub fn relation(message: impl Into<String>) -> Self {
        Self::Relation(message.into())
    }

    /// Create a decode error for a specific column
    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ModelNotFound { .. })
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    fn driver_message(&self) -> Option<&str> {
        match self {
            Self::Query { message, .. } => Some(message),
            Self::Database(message) | Self::Connection(message) => Some(message),
            _ => None,
        }
    }

    /// Whether the driver reported a lost connection.
    pub fn is_lost_connection(&self) -> bool {
        if matches!(self, Self::Connection(_)) {
            return true;
        }
        self.driver_message()
            .is_some_and(|m| lost_connection_pattern().is_match(m))
    }

    /// Whether the driver reported a deadlock, lock wait timeout or serialization failure.
    pub fn is_concurrency_error(&self) -> bool {
        self.driver_message()
            .is_some_and(|m| concurrency_pattern().is_match(m))
    }
}

impl From<toml::de::Error> for OrmError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<serde_json::Error> for OrmError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode {
            column: "<json>".to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_message_lists_ids() {
        let err = OrmError::model_not_found("User", [1, 2]);
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "No query results for model [User] 1, 2");
    }

    #[test]
    fn not_found_without_ids() {
        let err = OrmError::model_not_found("User", Vec::<String>::new());
        assert_eq!(err.to_string(), "No query results for model [User]");
    }

    #[test]
    fn classifies_lost_connection() {
        let err = OrmError::Query {
            sql: "select 1".into(),
            bindings: "[]".into(),
            message: "SQLSTATE[HY000]: General error: 2006 MySQL server has gone away".into(),
        };
        assert!(err.is_lost_connection());
        assert!(!err.is_concurrency_error());
    }

    #[test]
    fn classifies_deadlock() {
        let err = OrmError::Database("ERROR: deadlock detected".into());
        assert!(err.is_concurrency_error());
        assert!(!err.is_lost_connection());
    }

    #[test]
    fn compile_errors_are_not_driver_errors() {
        let err = OrmError::compile("bad operator");
        assert!(!err.is_lost_connection());
        assert!(!err.is_concurrency_error());
    }
}
