//! Connections: the driver boundary, statement execution and transactions.
//!
//! A [`Connection`] owns one dialect [`Grammar`] and [`Processor`], and runs compiled
//! statements against a [`Driver`]. Drivers receive SQL with the dialect's native
//! placeholders; everything above this module works with `?`.
//!
//! # Example
//! ```ignore
//! use fedaco::{Connection, ConnectionConfig, DriverName};
//!
//! let conn = Arc::new(Connection::new(ConnectionConfig::new("main", DriverName::Pgsql), driver));
//! let n = conn.table("users").where_("votes", ">", 100).count().await?;
//!
//! conn.transaction(3, |tx| async move {
//!     tx.table("accounts").where_eq("id", 1).decrement("balance", 10).await?;
//!     tx.table("accounts").where_eq("id", 2).increment("balance", 10).await?;
//!     Ok(())
//! })
//! .await?;
//! ```

mod monitor;
mod resolver;

#[cfg(test)]
mod tests;

pub use monitor::{QueryEvent, QueryListener, QueryType, SqlLogger};
pub use resolver::ConnectionResolver;

use crate::config::{ConnectionConfig, DriverName};
use crate::error::{OrmError, OrmResult};
use crate::grammar::{self, Grammar};
use crate::processor::{self, Processor};
use crate::query::QueryBuilder;
use crate::row::Row;
use crate::value::{render_bindings, Value};
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// What a driver reports for one statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DriverOutput {
    pub rows: Vec<Row>,
    pub affected: u64,
    pub last_insert_id: Option<Value>,
}

impl DriverOutput {
    pub fn rows(rows: Vec<Row>) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    pub fn affected(affected: u64) -> Self {
        Self {
            affected,
            ..Self::default()
        }
    }

    pub fn inserted(id: impl Into<Value>) -> Self {
        Self {
            affected: 1,
            last_insert_id: Some(id.into()),
            ..Self::default()
        }
    }
}

/// Transport for one database engine.
///
/// Implementations receive SQL in the dialect's wire placeholder style and the bindings
/// in placeholder order.
#[async_trait]
pub trait Driver: Send + Sync {
    async fn query(&self, sql: &str, bindings: &[Value]) -> OrmResult<DriverOutput>;

    /// Re-establish the underlying session after a lost connection.
    async fn reconnect(&self) -> OrmResult<()> {
        Ok(())
    }
}

/// A named database connection.
pub struct Connection {
    config: ConnectionConfig,
    grammar: Arc<dyn Grammar>,
    processor: Arc<dyn Processor>,
    driver: Arc<dyn Driver>,
    read_driver: Option<Arc<dyn Driver>>,
    listeners: RwLock<Vec<Arc<dyn QueryListener>>>,
    logger: SqlLogger,
    transactions: AtomicU32,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.config.name)
            .field("driver", &self.config.driver)
            .field("grammar", &self.grammar)
            .field("read_replica", &self.read_driver.is_some())
            .field("transactions", &self.transaction_level())
            .finish()
    }
}

impl Connection {
    /// Connection with the grammar and processor selected by `config.driver`.
    pub fn new(config: ConnectionConfig, driver: Arc<dyn Driver>) -> Self {
        let grammar = grammar::for_driver(config.driver, config.prefix.clone());
        let processor = processor::for_driver(config.driver);
        let logger = SqlLogger::new().max_sql_length(config.log_sql_length);
        Self {
            config,
            grammar,
            processor,
            driver,
            read_driver: None,
            listeners: RwLock::new(Vec::new()),
            logger,
            transactions: AtomicU32::new(0),
        }
    }

    /// Route reads outside transactions to a replica.
    pub fn with_read_driver(mut self, driver: Arc<dyn Driver>) -> Self {
        self.read_driver = Some(driver);
        self
    }

    pub fn with_logger(mut self, logger: SqlLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn driver_name(&self) -> DriverName {
        self.config.driver
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn grammar(&self) -> &Arc<dyn Grammar> {
        &self.grammar
    }

    pub fn processor(&self) -> &Arc<dyn Processor> {
        &self.processor
    }

    pub fn table_prefix(&self) -> &str {
        &self.config.prefix
    }

    /// Register a listener for executed statements.
    pub fn listen(&self, listener: Arc<dyn QueryListener>) {
        self.listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(listener);
    }

    // ==================== Builders ====================

    /// Empty builder bound to this connection.
    pub fn query(self: &Arc<Self>) -> QueryBuilder {
        QueryBuilder::with_connection(Arc::clone(self))
    }

    /// Builder over `table`.
    pub fn table(self: &Arc<Self>, table: &str) -> QueryBuilder {
        self.query().from(table)
    }

    // ==================== Statements ====================

    /// Run a SELECT; `use_read` allows the read replica outside transactions.
    pub async fn select(&self, sql: &str, bindings: &[Value], use_read: bool) -> OrmResult<Vec<Row>> {
        Ok(self.run_on(sql, bindings, use_read).await?.rows)
    }

    pub async fn select_one(&self, sql: &str, bindings: &[Value]) -> OrmResult<Option<Row>> {
        Ok(self.select(sql, bindings, true).await?.into_iter().next())
    }

    pub async fn insert(&self, sql: &str, bindings: &[Value]) -> OrmResult<bool> {
        self.statement(sql, bindings).await
    }

    pub async fn update(&self, sql: &str, bindings: &[Value]) -> OrmResult<u64> {
        self.affecting_statement(sql, bindings).await
    }

    pub async fn delete(&self, sql: &str, bindings: &[Value]) -> OrmResult<u64> {
        self.affecting_statement(sql, bindings).await
    }

    /// Run a statement for its side effect.
    pub async fn statement(&self, sql: &str, bindings: &[Value]) -> OrmResult<bool> {
        self.run(sql, bindings).await?;
        Ok(true)
    }

    /// Run a statement and return the number of affected rows.
    pub async fn affecting_statement(&self, sql: &str, bindings: &[Value]) -> OrmResult<u64> {
        Ok(self.run(sql, bindings).await?.affected)
    }

    /// Run a statement on the write driver and return the raw driver output.
    pub async fn run(&self, sql: &str, bindings: &[Value]) -> OrmResult<DriverOutput> {
        self.run_on(sql, bindings, false).await
    }

    /// Column names of `table`.
    pub async fn get_column_listing(&self, table: &str) -> OrmResult<Vec<String>> {
        let compiled = self.grammar.compile_column_listing(table);
        let rows = self.select(&compiled.sql, &compiled.bindings, false).await?;
        Ok(self.processor.process_column_listing(rows))
    }

    fn driver_for(&self, use_read: bool) -> &Arc<dyn Driver> {
        match &self.read_driver {
            Some(read) if use_read && self.transaction_level() == 0 => read,
            _ => &self.driver,
        }
    }

    async fn try_run(&self, sql: &str, bindings: &[Value], use_read: bool) -> OrmResult<DriverOutput> {
        let driver = self.driver_for(use_read);
        let wire = self.grammar.to_wire_sql(sql);
        match self.config.query_timeout() {
            Some(limit) => tokio::time::timeout(limit, driver.query(&wire, bindings))
                .await
                .map_err(|_| OrmError::Timeout(limit))?,
            None => driver.query(&wire, bindings).await,
        }
    }

    /// Execute, retrying once after a lost connection when no transaction is open.
    async fn run_on(&self, sql: &str, bindings: &[Value], use_read: bool) -> OrmResult<DriverOutput> {
        let start = Instant::now();
        let result = match self.try_run(sql, bindings, use_read).await {
            Err(e) if e.is_lost_connection() && self.transaction_level() == 0 => {
                tracing::warn!(
                    target: "fedaco.sql",
                    connection = %self.name(),
                    error = %e,
                    "lost connection, reconnecting"
                );
                self.driver_for(use_read).reconnect().await?;
                self.try_run(sql, bindings, use_read).await
            }
            other => other,
        };

        match result {
            Ok(output) => {
                let event = QueryEvent::new(sql, bindings, start.elapsed(), self.name());
                self.logger.log(&event);
                let listeners = self
                    .listeners
                    .read()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                for listener in listeners.iter() {
                    listener.on_query(&event);
                }
                Ok(output)
            }
            Err(e) => {
                self.logger.log_failure(self.name(), sql, bindings, &e.to_string());
                Err(wrap_query_error(e, sql, bindings))
            }
        }
    }

    // ==================== Transactions ====================

    /// Current nesting depth; 0 outside transactions.
    pub fn transaction_level(&self) -> u32 {
        self.transactions.load(Ordering::SeqCst)
    }

    /// Open a transaction, or a savepoint when one is already open.
    pub async fn begin_transaction(&self) -> OrmResult<()> {
        let level = self.transaction_level();
        if level == 0 {
            self.run(self.grammar.compile_begin(), &[]).await?;
        } else if self.grammar.supports_savepoints() {
            let sql = self.grammar.compile_savepoint(&savepoint_name(level + 1));
            self.run(&sql, &[]).await?;
        }
        self.transactions.store(level + 1, Ordering::SeqCst);
        tracing::debug!(
            target: "fedaco.transaction",
            connection = %self.name(),
            level = level + 1,
            "begin"
        );
        Ok(())
    }

    /// Commit the innermost level. Only the outermost level issues `COMMIT`.
    pub async fn commit(&self) -> OrmResult<()> {
        let level = self.transaction_level();
        if level == 0 {
            return Err(OrmError::Other("No active transaction to commit".to_string()));
        }
        if level == 1 {
            self.run("COMMIT", &[]).await?;
        }
        self.transactions.store(level - 1, Ordering::SeqCst);
        tracing::debug!(
            target: "fedaco.transaction",
            connection = %self.name(),
            level,
            "commit"
        );
        Ok(())
    }

    /// Roll back to `to_level` (default: one level up). Out-of-range levels are ignored.
    pub async fn rollback(&self, to_level: Option<u32>) -> OrmResult<()> {
        let level = self.transaction_level();
        if level == 0 {
            return Ok(());
        }
        let to_level = to_level.unwrap_or(level - 1);
        if to_level >= level {
            return Ok(());
        }

        let result = if to_level == 0 {
            self.run("ROLLBACK", &[]).await.map(|_| ())
        } else if self.grammar.supports_savepoints() {
            let sql = self
                .grammar
                .compile_savepoint_rollback(&savepoint_name(to_level + 1));
            self.run(&sql, &[]).await.map(|_| ())
        } else {
            Ok(())
        };

        if let Err(e) = result {
            if e.is_lost_connection() {
                self.transactions.store(0, Ordering::SeqCst);
            }
            return Err(e);
        }

        self.transactions.store(to_level, Ordering::SeqCst);
        tracing::debug!(
            target: "fedaco.transaction",
            connection = %self.name(),
            level = to_level,
            "rollback"
        );
        Ok(())
    }

    /// Run `f` inside a transaction, retrying the whole callback on deadlocks up to
    /// `attempts` times.
    pub async fn transaction<T, F, Fut>(self: &Arc<Self>, attempts: u32, mut f: F) -> OrmResult<T>
    where
        F: FnMut(Arc<Connection>) -> Fut,
        Fut: Future<Output = OrmResult<T>>,
    {
        let attempts = attempts.max(1);
        let mut attempt = 1;
        loop {
            self.begin_transaction().await?;

            let error = match f(Arc::clone(self)).await {
                Ok(value) => match self.commit().await {
                    Ok(()) => return Ok(value),
                    Err(e) => {
                        let level = self.transaction_level();
                        self.transactions
                            .store(level.saturating_sub(1), Ordering::SeqCst);
                        if e.is_concurrency_error() && attempt < attempts {
                            tracing::warn!(
                                target: "fedaco.transaction",
                                connection = %self.name(),
                                attempt,
                                error = %e,
                                "commit failed on a concurrency error, retrying"
                            );
                            attempt += 1;
                            continue;
                        }
                        if e.is_lost_connection() {
                            self.transactions.store(0, Ordering::SeqCst);
                        }
                        return Err(e);
                    }
                },
                Err(e) => e,
            };

            // Nested levels hand deadlocks to the outermost transaction.
            let level = self.transaction_level();
            if error.is_concurrency_error() && level > 1 {
                self.transactions.store(level - 1, Ordering::SeqCst);
                return Err(error);
            }

            self.rollback(None).await?;

            if error.is_concurrency_error() && attempt < attempts {
                tracing::warn!(
                    target: "fedaco.transaction",
                    connection = %self.name(),
                    attempt,
                    error = %error,
                    "deadlock, retrying transaction"
                );
                attempt += 1;
                continue;
            }
            return Err(error);
        }
    }
}

fn savepoint_name(level: u32) -> String {
    format!("trans{level}")
}

/// Attach the statement to raw driver errors. Connection errors keep their kind.
fn wrap_query_error(error: OrmError, sql: &str, bindings: &[Value]) -> OrmError {
    match error {
        OrmError::Database(message) => OrmError::Query {
            sql: sql.to_string(),
            bindings: render_bindings(bindings),
            message,
        },
        other => other,
    }
}
