use fedaco::testing::{fake_connection, fake_connection_with, FakeDriver};
use fedaco::{ConnectionConfig, DriverName, EntitySchema, Orm, RelationDef, Row, Value};

fn orm_for(driver: DriverName) -> Orm {
    let (conn, _) = fake_connection(driver);
    let orm = Orm::with_connection(conn);
    orm.register(
        EntitySchema::new("User")
            .relation("posts", RelationDef::has_many("Post"))
            .relation("roles", RelationDef::belongs_to_many("Role")),
    );
    orm.register(EntitySchema::new("Post"));
    orm.register(EntitySchema::new("Role"));
    orm
}

#[test]
fn where_has_quotes_per_dialect() {
    let cases = [
        (
            DriverName::Mysql,
            "SELECT * FROM `users` WHERE EXISTS (SELECT * FROM `posts` WHERE `users`.`id` = `posts`.`user_id`)",
        ),
        (
            DriverName::Pgsql,
            r#"SELECT * FROM "users" WHERE EXISTS (SELECT * FROM "posts" WHERE "users"."id" = "posts"."user_id")"#,
        ),
        (
            DriverName::Sqlite,
            r#"SELECT * FROM "users" WHERE EXISTS (SELECT * FROM "posts" WHERE "users"."id" = "posts"."user_id")"#,
        ),
        (
            DriverName::Sqlsrv,
            "SELECT * FROM [users] WHERE EXISTS (SELECT * FROM [posts] WHERE [users].[id] = [posts].[user_id])",
        ),
    ];
    for (driver, expected) in cases {
        let q = orm_for(driver).query("User").unwrap().has("posts", ">=", 1).to_sql().unwrap();
        assert_eq!(q.sql, expected, "{driver}");
    }
}

#[test]
fn pivot_join_quotes_per_dialect() {
    let q = orm_for(DriverName::Sqlsrv)
        .query("User")
        .unwrap()
        .doesnt_have("roles")
        .to_sql()
        .unwrap();
    assert_eq!(
        q.sql,
        "SELECT * FROM [users] WHERE NOT EXISTS (SELECT * FROM [roles] INNER JOIN [role_user] ON [roles].[id] = [role_user].[role_id] WHERE [users].[id] = [role_user].[user_id])"
    );
}

#[tokio::test]
async fn postgres_driver_receives_numbered_placeholders() {
    let (conn, driver) = fake_connection(DriverName::Pgsql);
    driver.push_rows(vec![Row::from_pairs([("id", 1)])]);

    conn.table("users")
        .where_eq("name", "it's ?")
        .where_in("id", [1, 2])
        .get()
        .await
        .unwrap();

    let stmt = &driver.statements()[0];
    assert_eq!(
        stmt.sql,
        r#"SELECT * FROM "users" WHERE "name" = $1 AND "id" IN ($2, $3)"#
    );
    assert_eq!(
        stmt.bindings,
        vec![Value::from("it's ?"), Value::Int(1), Value::Int(2)]
    );
}

#[tokio::test]
async fn table_prefix_applies_to_relation_tables() {
    let config = ConnectionConfig::new("app", DriverName::Sqlite).with_prefix("app_");
    let (conn, driver) = fake_connection_with(config, FakeDriver::new());
    let orm = Orm::with_connection(conn);
    orm.register(EntitySchema::new("User").relation("posts", RelationDef::has_many("Post")));
    orm.register(EntitySchema::new("Post"));
    driver.push_rows(vec![Row::from_pairs([("id", 1)])]);
    driver.push_rows(vec![]);

    orm.query("User").unwrap().with(&["posts"]).get().await.unwrap();

    assert_eq!(
        driver.sqls(),
        vec![
            r#"SELECT * FROM "app_users""#.to_string(),
            r#"SELECT * FROM "app_posts" WHERE "app_posts"."user_id" IN (?)"#.to_string(),
        ]
    );
}
