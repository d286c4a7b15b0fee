//! Statement observation: query events, listeners and the `tracing` SQL logger.

use crate::value::{render_bindings, Value};
use std::time::Duration;
use tracing::Level;

/// The type of SQL operation being performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    Select,
    Insert,
    Update,
    Delete,
    /// DDL, transaction control, PRAGMA, MERGE...
    Other,
}

impl QueryType {
    /// Detect the statement type from its leading keyword.
    pub fn from_sql(sql: &str) -> Self {
        let trimmed = sql.trim_start().trim_start_matches('(').trim_start();
        let keyword: String = trimmed
            .chars()
            .take_while(|c| c.is_ascii_alphabetic())
            .collect::<String>()
            .to_ascii_uppercase();
        match keyword.as_str() {
            "SELECT" => QueryType::Select,
            "INSERT" => QueryType::Insert,
            "UPDATE" => QueryType::Update,
            "DELETE" => QueryType::Delete,
            _ => QueryType::Other,
        }
    }
}

/// One executed statement, as seen by listeners.
#[derive(Debug, Clone)]
pub struct QueryEvent {
    /// SQL as compiled, with `?` placeholders.
    pub sql: String,
    pub bindings: Vec<Value>,
    pub elapsed: Duration,
    pub connection_name: String,
    pub query_type: QueryType,
}

impl QueryEvent {
    pub fn new(sql: &str, bindings: &[Value], elapsed: Duration, connection_name: &str) -> Self {
        Self {
            sql: sql.to_string(),
            bindings: bindings.to_vec(),
            elapsed,
            connection_name: connection_name.to_string(),
            query_type: QueryType::from_sql(sql),
        }
    }
}

/// Observer notified after every successful statement on a connection.
///
/// # Example
/// ```ignore
/// struct Slow;
///
/// impl QueryListener for Slow {
///     fn on_query(&self, event: &QueryEvent) {
///         if event.elapsed > Duration::from_millis(500) {
///             tracing::warn!(sql = %event.sql, "slow query");
///         }
///     }
/// }
///
/// connection.listen(Arc::new(Slow));
/// ```
pub trait QueryListener: Send + Sync {
    fn on_query(&self, event: &QueryEvent);
}

pub(crate) fn truncate_sql_bytes(sql: &str, max_bytes: usize) -> &str {
    if sql.len() <= max_bytes {
        return sql;
    }
    let mut end = max_bytes;
    while end > 0 && !sql.is_char_boundary(end) {
        end -= 1;
    }
    &sql[..end]
}

/// `tracing` logger for executed statements (target `fedaco.sql`).
#[derive(Debug, Clone)]
pub struct SqlLogger {
    /// Tracing event level to emit at.
    pub level: Level,
    /// Truncate long SQL strings (in bytes). `None` means no truncation.
    pub max_sql_length: Option<usize>,
}

impl Default for SqlLogger {
    fn default() -> Self {
        Self {
            level: Level::DEBUG,
            max_sql_length: Some(200),
        }
    }
}

impl SqlLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the tracing event level.
    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn max_sql_length(mut self, len: Option<usize>) -> Self {
        self.max_sql_length = len;
        self
    }

    pub fn truncate_sql(&self, sql: &str) -> String {
        match self.max_sql_length {
            Some(max) if sql.len() > max => format!("{}...", truncate_sql_bytes(sql, max)),
            _ => sql.to_string(),
        }
    }

    pub fn log(&self, event: &QueryEvent) {
        /// Dispatch a tracing event at a runtime-determined level.
        macro_rules! emit_at_level {
            ($level:expr, $($field:tt)*) => {
                match $level {
                    Level::ERROR => tracing::error!($($field)*),
                    Level::WARN  => tracing::warn!($($field)*),
                    Level::INFO  => tracing::info!($($field)*),
                    Level::DEBUG => tracing::debug!($($field)*),
                    Level::TRACE => tracing::trace!($($field)*),
                }
            };
        }

        let sql = self.truncate_sql(&event.sql);
        emit_at_level!(
            self.level,
            target: "fedaco.sql",
            connection = %event.connection_name,
            query_type = ?event.query_type,
            binding_count = event.bindings.len(),
            elapsed_ms = event.elapsed.as_secs_f64() * 1000.0,
            sql = %sql,
        );
    }

    /// Log a failed statement at `warn`.
    pub fn log_failure(&self, connection: &str, sql: &str, bindings: &[Value], message: &str) {
        tracing::warn!(
            target: "fedaco.sql",
            connection = %connection,
            sql = %self.truncate_sql(sql),
            bindings = %render_bindings(bindings),
            error = %message,
            "statement failed"
        );
    }
}
