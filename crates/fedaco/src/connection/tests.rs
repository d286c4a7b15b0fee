use super::*;
use crate::testing::{fake_connection, fake_connection_with, FakeDriver};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
struct Recorder(Mutex<Vec<QueryEvent>>);

impl QueryListener for Recorder {
    fn on_query(&self, event: &QueryEvent) {
        self.0.lock().unwrap().push(event.clone());
    }
}

#[tokio::test]
async fn test_postgres_wire_placeholders() {
    let (conn, driver) = fake_connection(DriverName::Pgsql);
    conn.table("users")
        .where_eq("id", 1)
        .where_("name", "like", "a%")
        .get()
        .await
        .unwrap();
    let stmts = driver.statements();
    assert_eq!(
        stmts[0].sql,
        r#"SELECT * FROM "users" WHERE "id" = $1 AND "name" LIKE $2"#
    );
    assert_eq!(stmts[0].bindings, vec![Value::Int(1), Value::from("a%")]);
}

#[tokio::test]
async fn test_listeners_see_compiled_sql() {
    let (conn, _driver) = fake_connection(DriverName::Sqlsrv);
    let recorder = Arc::new(Recorder::default());
    conn.listen(recorder.clone());
    conn.table("users").where_eq("id", 5).delete().await.unwrap();

    let events = recorder.0.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].sql, "DELETE FROM [users] WHERE [id] = ?");
    assert_eq!(events[0].query_type, QueryType::Delete);
    assert_eq!(events[0].connection_name, "fake");
}

#[tokio::test]
async fn test_lost_connection_retries_once_outside_transaction() {
    let (conn, driver) = fake_connection(DriverName::Mysql);
    driver.push_error(OrmError::Database("MySQL server has gone away".into()));
    driver.push_rows(vec![Row::from_pairs([("id", 1)])]);

    let rows = conn.table("users").get().await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(driver.reconnects(), 1);
    assert_eq!(driver.statements().len(), 2);
}

#[tokio::test]
async fn test_lost_connection_is_fatal_inside_transaction() {
    let (conn, driver) = fake_connection(DriverName::Mysql);
    conn.begin_transaction().await.unwrap();
    driver.push_error(OrmError::Database("Lost connection to MySQL server".into()));

    let err = conn.table("users").get().await.unwrap_err();
    assert!(err.is_lost_connection());
    assert!(matches!(err, OrmError::Query { ref sql, .. } if sql == "SELECT * FROM `users`"));
    assert_eq!(driver.reconnects(), 0);
}

#[tokio::test]
async fn test_driver_errors_carry_sql_and_bindings() {
    let (conn, driver) = fake_connection(DriverName::Sqlite);
    driver.push_error(OrmError::Database("no such table: users".into()));
    let err = conn.table("users").where_eq("id", 3).get().await.unwrap_err();
    assert_eq!(
        err.to_string(),
        r#"no such table: users (SQL: SELECT * FROM "users" WHERE "id" = ?) (Bindings: [3])"#
    );
}

#[tokio::test]
async fn test_nested_transactions_use_savepoints() {
    let (conn, driver) = fake_connection(DriverName::Pgsql);
    conn.begin_transaction().await.unwrap();
    conn.begin_transaction().await.unwrap();
    assert_eq!(conn.transaction_level(), 2);
    conn.rollback(None).await.unwrap();
    conn.commit().await.unwrap();
    assert_eq!(conn.transaction_level(), 0);
    assert_eq!(
        driver.sqls(),
        vec!["BEGIN", "SAVEPOINT trans2", "ROLLBACK TO SAVEPOINT trans2", "COMMIT"]
    );
}

#[tokio::test]
async fn test_sqlserver_savepoint_syntax() {
    let (conn, driver) = fake_connection(DriverName::Sqlsrv);
    conn.begin_transaction().await.unwrap();
    conn.begin_transaction().await.unwrap();
    conn.rollback(Some(0)).await.unwrap();
    assert_eq!(
        driver.sqls(),
        vec!["BEGIN TRANSACTION", "SAVE TRANSACTION trans2", "ROLLBACK"]
    );
}

#[tokio::test]
async fn test_transaction_commits_on_success() {
    let (conn, driver) = fake_connection(DriverName::Sqlite);
    let n = conn
        .transaction(1, |tx| async move {
            tx.table("users").where_eq("id", 1).update([("name", "x")]).await
        })
        .await
        .unwrap();
    assert_eq!(n, 0);
    assert_eq!(
        driver.sqls(),
        vec!["BEGIN", r#"UPDATE "users" SET "name" = ? WHERE "id" = ?"#, "COMMIT"]
    );
    assert_eq!(conn.transaction_level(), 0);
}

#[tokio::test]
async fn test_transaction_retries_deadlocks() {
    let driver = FakeDriver::new();
    // BEGIN, failing UPDATE, ROLLBACK, then a clean second attempt.
    driver.push_affected(0);
    driver.push_error(OrmError::Database("ERROR: deadlock detected".into()));
    let (conn, driver) = fake_connection_with(ConnectionConfig::new("fake", DriverName::Pgsql), driver);

    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    conn.transaction(3, move |tx| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tx.table("accounts").where_eq("id", 1).decrement("balance", 5).await
        }
    })
    .await
    .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(driver.count_matching("BEGIN"), 2);
    assert_eq!(driver.count_matching("ROLLBACK"), 1);
    assert_eq!(driver.count_matching("COMMIT"), 1);
}

#[tokio::test]
async fn test_transaction_gives_up_after_attempts() {
    let (conn, driver) = fake_connection(DriverName::Mysql);
    let err = conn
        .transaction(2, |_tx| async move {
            Err::<(), _>(OrmError::Database("Deadlock found when trying to get lock".into()))
        })
        .await
        .unwrap_err();
    assert!(err.is_concurrency_error());
    assert_eq!(driver.count_matching("START TRANSACTION"), 2);
    assert_eq!(driver.count_matching("ROLLBACK"), 2);
    assert_eq!(conn.transaction_level(), 0);
}

#[tokio::test]
async fn test_non_concurrency_error_rolls_back_without_retry() {
    let (conn, driver) = fake_connection(DriverName::Sqlite);
    let err = conn
        .transaction(5, |_tx| async move { Err::<(), _>(OrmError::validation("bad input")) })
        .await
        .unwrap_err();
    assert!(matches!(err, OrmError::Validation(_)));
    assert_eq!(driver.sqls(), vec!["BEGIN", "ROLLBACK"]);
}

#[tokio::test]
async fn test_commit_without_transaction_is_error() {
    let (conn, _driver) = fake_connection(DriverName::Sqlite);
    assert!(conn.commit().await.is_err());
    conn.rollback(None).await.unwrap();
}

#[tokio::test]
async fn test_query_timeout() {
    struct Slow;

    #[async_trait]
    impl Driver for Slow {
        async fn query(&self, _sql: &str, _bindings: &[Value]) -> OrmResult<DriverOutput> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(DriverOutput::default())
        }
    }

    let config = ConnectionConfig::new("slow", DriverName::Pgsql)
        .with_query_timeout(Duration::from_millis(20));
    let conn = Arc::new(Connection::new(config, Arc::new(Slow)));
    let err = conn.table("users").get().await.unwrap_err();
    assert!(err.is_timeout());
}

#[tokio::test]
async fn test_reads_go_to_replica_outside_transactions() {
    let (_, write) = fake_connection(DriverName::Sqlite);
    let read = Arc::new(FakeDriver::new());
    let conn = Arc::new(
        Connection::new(ConnectionConfig::new("rw", DriverName::Sqlite), write.clone())
            .with_read_driver(read.clone()),
    );

    conn.table("users").get().await.unwrap();
    conn.table("users").use_write_connection().get().await.unwrap();
    conn.begin_transaction().await.unwrap();
    conn.table("users").get().await.unwrap();

    assert_eq!(read.statements().len(), 1);
    assert_eq!(write.sqls(), vec![r#"SELECT * FROM "users""#, "BEGIN", r#"SELECT * FROM "users""#]);
}

#[tokio::test]
async fn test_insert_get_id_per_dialect() {
    let (conn, driver) = fake_connection(DriverName::Pgsql);
    driver.push_rows(vec![Row::from_pairs([("id", 11)])]);
    let id = conn
        .table("users")
        .insert_get_id([("name", "a")], None)
        .await
        .unwrap();
    assert_eq!(id, Value::Int(11));
    assert_eq!(
        driver.sqls()[0],
        r#"INSERT INTO "users" ("name") VALUES ($1) RETURNING "id""#
    );

    let (conn, driver) = fake_connection(DriverName::Mysql);
    driver.push_insert_id(12);
    let id = conn
        .table("users")
        .insert_get_id([("name", "a")], None)
        .await
        .unwrap();
    assert_eq!(id, Value::Int(12));
}

#[tokio::test]
async fn test_aggregates_read_aggregate_column() {
    let (conn, driver) = fake_connection(DriverName::Sqlite);
    driver.push_rows(vec![Row::from_pairs([("aggregate", 4)])]);
    driver.push_rows(vec![Row::from_pairs([("aggregate", Value::Null)])]);
    driver.push_rows(vec![Row::from_pairs([("exists", 1)])]);

    assert_eq!(conn.table("users").count().await.unwrap(), 4);
    assert_eq!(conn.table("users").sum("votes").await.unwrap(), Value::Int(0));
    assert!(conn.table("users").exists().await.unwrap());
}

#[tokio::test]
async fn test_truncate_and_column_listing_on_sqlite() {
    let (conn, driver) = fake_connection(DriverName::Sqlite);
    conn.table("users").truncate().await.unwrap();
    driver.push_rows(vec![
        Row::from_pairs([("name", "id")]),
        Row::from_pairs([("name", "email")]),
    ]);
    let columns = conn.get_column_listing("users").await.unwrap();
    assert_eq!(columns, vec!["id", "email"]);
    assert_eq!(
        driver.sqls(),
        vec![
            "DELETE FROM sqlite_sequence WHERE name = ?",
            r#"DELETE FROM "users""#,
            r#"PRAGMA table_info("users")"#,
        ]
    );
}

#[tokio::test]
async fn test_upsert_and_insert_or_ignore() {
    let (conn, driver) = fake_connection(DriverName::Sqlite);
    driver.push_affected(2);
    let n = conn
        .table("users")
        .upsert(
            vec![crate::query::record([("email", "a@x"), ("name", "a")])],
            &["email"],
            Some(&["name"][..]),
        )
        .await
        .unwrap();
    assert_eq!(n, 2);

    let (conn, _) = fake_connection(DriverName::Sqlsrv);
    let err = conn
        .table("users")
        .insert_or_ignore(vec![crate::query::record([("email", "a@x")])])
        .await
        .unwrap_err();
    assert!(matches!(err, OrmError::Compile(_)));
}
