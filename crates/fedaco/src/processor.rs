//! Dialect post-processing of raw driver results.

use crate::config::DriverName;
use crate::connection::DriverOutput;
use crate::error::{OrmError, OrmResult};
use crate::row::Row;
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

/// Normalizes what a driver returned before the builder or the model layer sees it.
pub trait Processor: fmt::Debug + Send + Sync {
    /// Post-process SELECT rows.
    fn process_select(&self, rows: Vec<Row>) -> Vec<Row> {
        rows
    }

    /// Extract the generated key of an `insert_get_id` statement.
    fn process_insert_get_id(&self, output: &DriverOutput, key: &str) -> OrmResult<Value>;

    /// Column names out of a column-listing query.
    fn process_column_listing(&self, rows: Vec<Row>) -> Vec<String> {
        column_names(rows, "column_name")
    }
}

fn column_names(rows: Vec<Row>, column: &str) -> Vec<String> {
    rows.into_iter()
        .filter_map(|row| {
            row.get(column)
                .or_else(|| row.get_index(0))
                .and_then(|v| v.as_str().map(str::to_string))
        })
        .collect()
}

/// Reads the key from the first returned row (`RETURNING` / `OUTPUT INSERTED`).
fn returned_key(output: &DriverOutput, key: &str) -> OrmResult<Value> {
    let row = output
        .rows
        .first()
        .ok_or_else(|| OrmError::Other(format!("Insert returned no row for key '{key}'")))?;
    let value = row
        .get(key)
        .or_else(|| row.get_index(0))
        .cloned()
        .unwrap_or_default();
    Ok(normalize_key(value))
}

/// Reads the driver's last-insert-id.
fn last_insert_id(output: &DriverOutput, key: &str) -> OrmResult<Value> {
    output
        .last_insert_id
        .clone()
        .map(normalize_key)
        .ok_or_else(|| OrmError::Other(format!("Driver reported no last insert id for key '{key}'")))
}

/// Numeric keys reported as text come back as integers.
fn normalize_key(value: Value) -> Value {
    match &value {
        Value::Text(s) => s.parse::<i64>().map(Value::Int).unwrap_or(value),
        _ => value,
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlProcessor;

impl Processor for MySqlProcessor {
    fn process_insert_get_id(&self, output: &DriverOutput, key: &str) -> OrmResult<Value> {
        last_insert_id(output, key)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresProcessor;

impl Processor for PostgresProcessor {
    fn process_insert_get_id(&self, output: &DriverOutput, key: &str) -> OrmResult<Value> {
        returned_key(output, key)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteProcessor;

impl Processor for SqliteProcessor {
    fn process_insert_get_id(&self, output: &DriverOutput, key: &str) -> OrmResult<Value> {
        last_insert_id(output, key)
    }

    // PRAGMA table_info reports the column under `name`.
    fn process_column_listing(&self, rows: Vec<Row>) -> Vec<String> {
        rows.into_iter()
            .filter_map(|row| row.get("name").and_then(|v| v.as_str().map(str::to_string)))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SqlServerProcessor;

impl Processor for SqlServerProcessor {
    fn process_insert_get_id(&self, output: &DriverOutput, key: &str) -> OrmResult<Value> {
        returned_key(output, key)
    }
}

/// Processor for a configured driver.
pub fn for_driver(driver: DriverName) -> Arc<dyn Processor> {
    match driver {
        DriverName::Mysql => Arc::new(MySqlProcessor),
        DriverName::Pgsql => Arc::new(PostgresProcessor),
        DriverName::Sqlite => Arc::new(SqliteProcessor),
        DriverName::Sqlsrv => Arc::new(SqlServerProcessor),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(rows: Vec<Row>, last_insert_id: Option<Value>) -> DriverOutput {
        DriverOutput {
            rows,
            affected: 1,
            last_insert_id,
        }
    }

    #[test]
    fn returning_processors_read_the_row() {
        let out = output(vec![Row::from_pairs([("id", 42)])], None);
        assert_eq!(PostgresProcessor.process_insert_get_id(&out, "id").unwrap(), Value::Int(42));
        assert_eq!(SqlServerProcessor.process_insert_get_id(&out, "id").unwrap(), Value::Int(42));
    }

    #[test]
    fn text_keys_are_normalized() {
        let out = output(vec![Row::from_pairs([("id", "7")])], None);
        assert_eq!(PostgresProcessor.process_insert_get_id(&out, "id").unwrap(), Value::Int(7));
    }

    #[test]
    fn last_insert_id_processors() {
        let out = output(Vec::new(), Some(Value::Int(9)));
        assert_eq!(MySqlProcessor.process_insert_get_id(&out, "id").unwrap(), Value::Int(9));
        let missing = output(Vec::new(), None);
        assert!(SqliteProcessor.process_insert_get_id(&missing, "id").is_err());
    }

    #[test]
    fn sqlite_column_listing_reads_name() {
        let rows = vec![
            Row::from_pairs([("cid", Value::Int(0)), ("name", Value::from("id"))]),
            Row::from_pairs([("cid", Value::Int(1)), ("name", Value::from("email"))]),
        ];
        assert_eq!(SqliteProcessor.process_column_listing(rows), vec!["id", "email"]);

        let rows = vec![Row::from_pairs([("column_name", "title")])];
        assert_eq!(PostgresProcessor.process_column_listing(rows), vec!["title"]);
    }
}
