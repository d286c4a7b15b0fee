//! Postgres transport over `tokio-postgres`.
//!
//! ```ignore
//! use fedaco::drivers::PostgresDriver;
//!
//! let config = ConnectionConfig::new("pgsql", DriverName::Pgsql).with_database("app");
//! let conn = PostgresDriver::connect_with(config).await?;
//! let users = conn.table("users").get().await?;
//! ```

use std::error::Error;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use tokio_postgres::types::{IsNull, ToSql, Type};
use tokio_postgres::{Client, NoTls};
use uuid::Uuid;

use crate::config::ConnectionConfig;
use crate::connection::{Connection, Driver, DriverOutput};
use crate::error::{OrmError, OrmResult};
use crate::row::Row;
use crate::value::Value;

/// A [`Driver`] holding one `tokio_postgres::Client`.
///
/// The client is swapped out on [`reconnect`](Driver::reconnect), so statements already in
/// flight keep the session they started on.
pub struct PostgresDriver {
    dsn: String,
    client: RwLock<Arc<Client>>,
}

impl std::fmt::Debug for PostgresDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresDriver").finish_non_exhaustive()
    }
}

impl PostgresDriver {
    /// Open a session from a libpq-style connection string.
    pub async fn connect(dsn: impl Into<String>) -> OrmResult<Self> {
        let dsn = dsn.into();
        let client = open(&dsn).await?;
        Ok(Self {
            dsn,
            client: RwLock::new(Arc::new(client)),
        })
    }

    /// Open a session and wrap it in a [`Connection`] for `config`.
    pub async fn connect_with(config: ConnectionConfig) -> OrmResult<Arc<Connection>> {
        let driver = Self::connect(config.to_connection_string()).await?;
        Ok(Arc::new(Connection::new(config, Arc::new(driver))))
    }

    fn client(&self) -> OrmResult<Arc<Client>> {
        self.client
            .read()
            .map(|client| Arc::clone(&client))
            .map_err(|_| OrmError::Connection("postgres client lock poisoned".into()))
    }
}

async fn open(dsn: &str) -> OrmResult<Client> {
    let (client, connection) = tokio_postgres::connect(dsn, NoTls)
        .await
        .map_err(from_pg_error)?;
    tokio::spawn(async move {
        if let Err(err) = connection.await {
            tracing::error!(target: "fedaco.sql", error = %err, "postgres connection closed");
        }
    });
    Ok(client)
}

fn from_pg_error(err: tokio_postgres::Error) -> OrmError {
    if err.is_closed() {
        return OrmError::Connection(err.to_string());
    }
    match err.as_db_error() {
        Some(db) => OrmError::Database(format!("{}: {}", db.code().code(), db.message())),
        None => OrmError::Database(err.to_string()),
    }
}

#[async_trait]
impl Driver for PostgresDriver {
    async fn query(&self, sql: &str, bindings: &[Value]) -> OrmResult<DriverOutput> {
        let client = self.client()?;
        let params: Vec<&(dyn ToSql + Sync)> =
            bindings.iter().map(|v| v as &(dyn ToSql + Sync)).collect();
        let statement = client.prepare(sql).await.map_err(from_pg_error)?;

        if statement.columns().is_empty() {
            let affected = client
                .execute(&statement, &params)
                .await
                .map_err(from_pg_error)?;
            return Ok(DriverOutput::affected(affected));
        }

        let rows = client
            .query(&statement, &params)
            .await
            .map_err(from_pg_error)?;
        let affected = rows.len() as u64;
        let rows = rows.iter().map(decode_row).collect::<OrmResult<Vec<_>>>()?;
        Ok(DriverOutput {
            rows,
            affected,
            last_insert_id: None,
        })
    }

    async fn reconnect(&self) -> OrmResult<()> {
        let fresh = open(&self.dsn).await?;
        let mut guard = self
            .client
            .write()
            .map_err(|_| OrmError::Connection("postgres client lock poisoned".into()))?;
        *guard = Arc::new(fresh);
        tracing::info!(target: "fedaco.sql", "postgres session re-established");
        Ok(())
    }
}

impl ToSql for Value {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(b) => b.to_sql(ty, out),
            Value::Int(i) => match *ty {
                Type::INT2 => i16::try_from(*i)?.to_sql(ty, out),
                Type::INT4 => i32::try_from(*i)?.to_sql(ty, out),
                Type::FLOAT4 => (*i as f32).to_sql(ty, out),
                Type::FLOAT8 => (*i as f64).to_sql(ty, out),
                Type::BOOL => (*i != 0).to_sql(ty, out),
                Type::TEXT | Type::VARCHAR | Type::BPCHAR => i.to_string().to_sql(ty, out),
                _ => i.to_sql(ty, out),
            },
            Value::Float(f) => match *ty {
                Type::FLOAT4 => (*f as f32).to_sql(ty, out),
                _ => f.to_sql(ty, out),
            },
            Value::Text(s) => match *ty {
                Type::JSON | Type::JSONB => {
                    serde_json::from_str::<serde_json::Value>(s)?.to_sql(ty, out)
                }
                Type::UUID => Uuid::parse_str(s)?.to_sql(ty, out),
                _ => s.to_sql(ty, out),
            },
            Value::Bytes(b) => b.to_sql(ty, out),
            Value::Json(j) => j.to_sql(ty, out),
            Value::Timestamp(ts) => match *ty {
                Type::TIMESTAMPTZ => ts.and_utc().to_sql(ty, out),
                Type::DATE => ts.date().to_sql(ty, out),
                _ => ts.to_sql(ty, out),
            },
            Value::Uuid(u) => match *ty {
                Type::TEXT | Type::VARCHAR => u.to_string().to_sql(ty, out),
                _ => u.to_sql(ty, out),
            },
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    tokio_postgres::types::to_sql_checked!();
}

fn decode_row(row: &tokio_postgres::Row) -> OrmResult<Row> {
    let mut columns = Vec::with_capacity(row.len());
    let mut values = Vec::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        columns.push(column.name().to_string());
        values.push(decode_column(row, idx, column.type_())?);
    }
    Ok(Row::new(columns, values))
}

fn decode_column(row: &tokio_postgres::Row, idx: usize, ty: &Type) -> OrmResult<Value> {
    let value = match *ty {
        Type::BOOL => get::<bool>(row, idx)?.map(Value::Bool),
        Type::INT2 => get::<i16>(row, idx)?.map(|v| Value::Int(v.into())),
        Type::INT4 => get::<i32>(row, idx)?.map(|v| Value::Int(v.into())),
        Type::INT8 => get::<i64>(row, idx)?.map(Value::Int),
        Type::OID => get::<u32>(row, idx)?.map(|v| Value::Int(v.into())),
        Type::FLOAT4 => get::<f32>(row, idx)?.map(|v| Value::Float(v.into())),
        Type::FLOAT8 => get::<f64>(row, idx)?.map(Value::Float),
        Type::BYTEA => get::<Vec<u8>>(row, idx)?.map(Value::Bytes),
        Type::JSON | Type::JSONB => get::<serde_json::Value>(row, idx)?.map(Value::Json),
        Type::TIMESTAMP => get::<NaiveDateTime>(row, idx)?.map(Value::Timestamp),
        Type::TIMESTAMPTZ => {
            get::<DateTime<Utc>>(row, idx)?.map(|v| Value::Timestamp(v.naive_utc()))
        }
        Type::DATE => get::<NaiveDate>(row, idx)?
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(Value::Timestamp),
        Type::UUID => get::<Uuid>(row, idx)?.map(Value::Uuid),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            get::<String>(row, idx)?.map(Value::Text)
        }
        _ => {
            return Err(OrmError::Decode {
                column: row.columns()[idx].name().to_string(),
                message: format!("unsupported postgres type {ty}"),
            });
        }
    };
    Ok(value.unwrap_or(Value::Null))
}

fn get<'a, T>(row: &'a tokio_postgres::Row, idx: usize) -> OrmResult<Option<T>>
where
    T: tokio_postgres::types::FromSql<'a>,
{
    row.try_get::<_, Option<T>>(idx).map_err(|err| OrmError::Decode {
        column: row.columns()[idx].name().to_string(),
        message: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_binds_narrow_to_column_width() {
        let mut out = BytesMut::new();
        let result = Value::Int(7).to_sql(&Type::INT4, &mut out).unwrap();
        assert!(matches!(result, IsNull::No));
        assert_eq!(&out[..], &7_i32.to_be_bytes());
    }

    #[test]
    fn oversized_int_is_rejected_for_int2() {
        let mut out = BytesMut::new();
        assert!(Value::Int(70_000).to_sql(&Type::INT2, &mut out).is_err());
    }

    #[test]
    fn null_binds_as_sql_null() {
        let mut out = BytesMut::new();
        let result = Value::Null.to_sql(&Type::TEXT, &mut out).unwrap();
        assert!(matches!(result, IsNull::Yes));
        assert!(out.is_empty());
    }
}
