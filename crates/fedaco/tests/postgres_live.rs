#![cfg(feature = "postgres")]

use fedaco::drivers::PostgresDriver;
use fedaco::{
    Connection, ConnectionConfig, DriverName, EntitySchema, Orm, OrmResult, RelationDef, Value,
};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

async fn connect() -> OrmResult<Option<Arc<Connection>>> {
    dotenvy::dotenv().ok();
    let database_url = match std::env::var("DATABASE_URL") {
        Ok(v) => v,
        Err(_) => {
            eprintln!("DATABASE_URL is not set; skipping postgres round trip");
            return Ok(None);
        }
    };
    let driver = PostgresDriver::connect(database_url).await?;
    let config = ConnectionConfig::new("pgsql", DriverName::Pgsql);
    Ok(Some(Arc::new(Connection::new(config, Arc::new(driver)))))
}

#[tokio::test]
async fn insert_and_eager_load_roundtrip() -> OrmResult<()> {
    let Some(conn) = connect().await? else {
        return Ok(());
    };
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before UNIX_EPOCH")
        .as_nanos();
    let authors = format!("fedaco_authors_{}_{nanos}", std::process::id());
    let books = format!("fedaco_books_{}_{nanos}", std::process::id());

    conn.statement(
        &format!("CREATE TEMP TABLE {authors} (id BIGSERIAL PRIMARY KEY, name TEXT NOT NULL)"),
        &[],
    )
    .await?;
    conn.statement(
        &format!(
            "CREATE TEMP TABLE {books} (id BIGSERIAL PRIMARY KEY, author_id BIGINT, title TEXT)"
        ),
        &[],
    )
    .await?;

    let orm = Orm::with_connection(conn.clone());
    orm.register(
        EntitySchema::new("Author")
            .table(authors.as_str())
            .timestamps(false)
            .relation("books", RelationDef::has_many("Book")),
    );
    orm.register(EntitySchema::new("Book").table(books.as_str()).timestamps(false));

    let author = orm.create("Author", [("name", "Ursula")]).await?;
    assert!(author.exists());
    author
        .has_one_or_many("books")?
        .create_many(vec![
            vec![("title".to_string(), Value::from("Lathe"))],
            vec![("title".to_string(), Value::from("Dispossessed"))],
        ])
        .await?;

    let loaded = orm.query("Author")?.with(&["books"]).get().await?;
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].related_many("books").len(), 2);
    assert_eq!(orm.query("Book")?.count().await?, 2);
    Ok(())
}
