//! In-memory driver for tests.
//!
//! [`FakeDriver`] records every statement it receives and answers from a FIFO of
//! scripted outputs, falling back to a responder closure (or an empty output).
//!
//! ```ignore
//! let (conn, driver) = fake_connection(DriverName::Sqlite);
//! driver.push_rows(vec![Row::from_pairs([("id", 1)])]);
//! let rows = conn.table("users").get().await?;
//! assert_eq!(driver.sqls(), vec![r#"SELECT * FROM "users""#]);
//! ```

use crate::config::{ConnectionConfig, DriverName};
use crate::connection::{Connection, Driver, DriverOutput};
use crate::error::OrmResult;
use crate::row::Row;
use crate::value::Value;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

type Responder = Box<dyn Fn(&str, &[Value]) -> OrmResult<DriverOutput> + Send + Sync>;

/// A recorded statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Executed {
    pub sql: String,
    pub bindings: Vec<Value>,
}

#[derive(Default)]
pub struct FakeDriver {
    log: Mutex<Vec<Executed>>,
    queue: Mutex<VecDeque<OrmResult<DriverOutput>>>,
    responder: Option<Responder>,
    reconnects: AtomicUsize,
}

impl std::fmt::Debug for FakeDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeDriver")
            .field("executed", &self.statements().len())
            .field("reconnects", &self.reconnects())
            .finish()
    }
}

impl FakeDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer unscripted statements with `responder`.
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&str, &[Value]) -> OrmResult<DriverOutput> + Send + Sync + 'static,
    {
        Self {
            responder: Some(Box::new(responder)),
            ..Self::default()
        }
    }

    fn enqueue(&self, output: OrmResult<DriverOutput>) {
        self.queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(output);
    }

    /// Script the next statement's result rows.
    pub fn push_rows(&self, rows: Vec<Row>) {
        self.enqueue(Ok(DriverOutput::rows(rows)));
    }

    pub fn push_affected(&self, affected: u64) {
        self.enqueue(Ok(DriverOutput::affected(affected)));
    }

    pub fn push_insert_id(&self, id: impl Into<Value>) {
        self.enqueue(Ok(DriverOutput::inserted(id)));
    }

    pub fn push_output(&self, output: DriverOutput) {
        self.enqueue(Ok(output));
    }

    /// Script the next statement to fail.
    pub fn push_error(&self, error: crate::OrmError) {
        self.enqueue(Err(error));
    }

    /// Every statement received so far.
    pub fn statements(&self) -> Vec<Executed> {
        self.log
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn sqls(&self) -> Vec<String> {
        self.statements().into_iter().map(|e| e.sql).collect()
    }

    /// Number of received statements starting with `prefix` (case-insensitive).
    pub fn count_matching(&self, prefix: &str) -> usize {
        let prefix = prefix.to_ascii_uppercase();
        self.sqls()
            .iter()
            .filter(|sql| sql.to_ascii_uppercase().starts_with(&prefix))
            .count()
    }

    pub fn clear(&self) {
        self.log
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }

    pub fn reconnects(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Driver for FakeDriver {
    async fn query(&self, sql: &str, bindings: &[Value]) -> OrmResult<DriverOutput> {
        self.log
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Executed {
                sql: sql.to_string(),
                bindings: bindings.to_vec(),
            });
        let scripted = self
            .queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front();
        match (scripted, &self.responder) {
            (Some(output), _) => output,
            (None, Some(responder)) => responder(sql, bindings),
            (None, None) => Ok(DriverOutput::default()),
        }
    }

    async fn reconnect(&self) -> OrmResult<()> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Connection named `fake` over a fresh [`FakeDriver`].
pub fn fake_connection(driver: DriverName) -> (Arc<Connection>, Arc<FakeDriver>) {
    fake_connection_with(ConnectionConfig::new("fake", driver), FakeDriver::new())
}

/// Connection over an already configured fake driver.
pub fn fake_connection_with(config: ConnectionConfig, driver: FakeDriver) -> (Arc<Connection>, Arc<FakeDriver>) {
    let driver = Arc::new(driver);
    let connection = Arc::new(Connection::new(config, driver.clone()));
    (connection, driver)
}
