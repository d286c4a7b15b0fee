use fedaco::testing::{fake_connection, FakeDriver};
use fedaco::{record, DriverName, EntitySchema, Orm, OrmError, RelationDef, Row, Value};
use std::sync::Arc;

fn setup() -> (Orm, Arc<FakeDriver>) {
    let (conn, driver) = fake_connection(DriverName::Sqlite);
    let orm = Orm::with_connection(conn);
    orm.register(
        EntitySchema::new("User")
            .timestamps(false)
            .fillable(&["name", "email"])
            .relation("posts", RelationDef::has_many("Post"))
            .relation("roles", RelationDef::belongs_to_many("Role"))
            .relation("teams", RelationDef::belongs_to_many("Team").with_pivot(&["role"])),
    );
    orm.register(
        EntitySchema::new("Post")
            .timestamps(false)
            .soft_deletes()
            .relation("author", RelationDef::belongs_to("User").foreign_key("user_id")),
    );
    orm.register(EntitySchema::new("Role").timestamps(false));
    orm.register(EntitySchema::new("Team").timestamps(false));
    orm.register(EntitySchema::new("Event"));
    (orm, driver)
}

async fn loaded(orm: &Orm, driver: &FakeDriver, entity: &str, row: Row) -> fedaco::Model {
    driver.push_rows(vec![row]);
    let model = orm.query(entity).unwrap().first().await.unwrap().unwrap();
    driver.clear();
    model
}

#[tokio::test]
async fn create_inserts_and_assigns_incrementing_key() {
    let (orm, driver) = setup();
    driver.push_insert_id(42);

    let user = orm
        .create("User", [("name", "Ann"), ("email", "ann@example.com")])
        .await
        .unwrap();

    assert_eq!(
        driver.sqls(),
        vec![r#"INSERT INTO "users" ("email", "name") VALUES (?, ?)"#]
    );
    assert_eq!(user.get_key(), Value::Int(42));
    assert!(user.exists());
    assert!(user.was_recently_created());
    assert!(user.is_clean(&[]));
}

#[tokio::test]
async fn guarded_attribute_is_rejected_on_fill() {
    let (orm, _) = setup();
    let mut user = orm.make("User").unwrap();
    let err = user.fill([("is_admin", true)]).unwrap_err();
    assert!(matches!(err, OrmError::MassAssignment { ref key, .. } if key == "is_admin"));
}

#[tokio::test]
async fn save_updates_only_dirty_columns() {
    let (orm, driver) = setup();
    let mut user = loaded(
        &orm,
        &driver,
        "User",
        Row::from_pairs([
            ("id", Value::Int(1)),
            ("name", "Ann".into()),
            ("email", "ann@example.com".into()),
        ]),
    )
    .await;

    user.set_attribute("name", "Anna").unwrap();
    driver.push_affected(1);
    user.save().await.unwrap();

    let stmts = driver.statements();
    assert_eq!(stmts.len(), 1);
    assert_eq!(stmts[0].sql, r#"UPDATE "users" SET "name" = ? WHERE "id" = ?"#);
    assert_eq!(stmts[0].bindings, vec![Value::from("Anna"), Value::Int(1)]);
    assert!(user.was_changed(&["name"]));
    assert!(user.is_clean(&[]));
}

#[tokio::test]
async fn clean_model_save_runs_no_statement() {
    let (orm, driver) = setup();
    let mut user = loaded(&orm, &driver, "User", Row::from_pairs([("id", 1)])).await;
    user.save().await.unwrap();
    assert!(driver.statements().is_empty());
}

#[tokio::test]
async fn timestamps_are_stamped_on_insert() {
    let (orm, driver) = setup();
    driver.push_insert_id(1);
    let event = orm.create("Event", [("name", "launch")]).await.unwrap();

    assert_eq!(
        driver.sqls()[0],
        r#"INSERT INTO "events" ("created_at", "name", "updated_at") VALUES (?, ?, ?)"#
    );
    assert!(matches!(event.get_raw("created_at"), Some(Value::Timestamp(_))));
    assert_eq!(event.get_raw("created_at"), event.get_raw("updated_at"));
}

#[tokio::test]
async fn soft_delete_stamps_column_and_restore_clears_it() {
    let (orm, driver) = setup();
    let mut post = loaded(&orm, &driver, "Post", Row::from_pairs([("id", 5)])).await;

    driver.push_affected(1);
    assert!(post.delete().await.unwrap());
    assert_eq!(
        driver.sqls()[0],
        r#"UPDATE "posts" SET "deleted_at" = ? WHERE "id" = ?"#
    );
    assert!(post.trashed());
    assert!(post.exists());

    driver.clear();
    driver.push_affected(1);
    post.restore().await.unwrap();
    assert_eq!(
        driver.statements()[0].bindings,
        vec![Value::Null, Value::Int(5)]
    );
    assert!(!post.trashed());
}

#[tokio::test]
async fn force_delete_removes_row() {
    let (orm, driver) = setup();
    let mut post = loaded(&orm, &driver, "Post", Row::from_pairs([("id", 5)])).await;
    driver.push_affected(1);
    assert!(post.force_delete().await.unwrap());
    assert_eq!(driver.sqls(), vec![r#"DELETE FROM "posts" WHERE "id" = ?"#]);
    assert!(!post.exists());
}

#[tokio::test]
async fn soft_deleted_rows_are_scoped_out() {
    let (orm, _) = setup();
    let q = orm.query("Post").unwrap().to_sql().unwrap();
    assert_eq!(q.sql, r#"SELECT * FROM "posts" WHERE "posts"."deleted_at" IS NULL"#);
    let q = orm.query("Post").unwrap().with_trashed().to_sql().unwrap();
    assert_eq!(q.sql, r#"SELECT * FROM "posts""#);
}

#[tokio::test]
async fn increment_updates_row_and_model() {
    let (orm, driver) = setup();
    let mut user = loaded(
        &orm,
        &driver,
        "User",
        Row::from_pairs([("id", 1), ("votes", 3)]),
    )
    .await;
    driver.push_affected(1);
    user.increment("votes", 2).await.unwrap();
    assert_eq!(
        driver.sqls()[0],
        r#"UPDATE "users" SET "votes" = "votes" + ? WHERE "id" = ?"#
    );
    assert_eq!(user.get_raw("votes"), Some(&Value::Int(5)));
    assert!(user.is_clean(&["votes"]));
}

#[tokio::test]
async fn associate_sets_foreign_key_and_relation() {
    let (orm, driver) = setup();
    let author = loaded(&orm, &driver, "User", Row::from_pairs([("id", 9)])).await;
    let mut post = orm.make("Post").unwrap();

    post.associate("author", &author).unwrap();
    assert_eq!(post.get_raw("user_id"), Some(&Value::Int(9)));
    assert!(post.related("author").unwrap().is(&author));

    post.dissociate("author").unwrap();
    assert_eq!(post.get_raw("user_id"), Some(&Value::Null));
}

#[tokio::test]
async fn has_many_create_sets_foreign_key() {
    let (orm, driver) = setup();
    let user = loaded(&orm, &driver, "User", Row::from_pairs([("id", 3)])).await;
    driver.push_insert_id(10);

    let post = user
        .has_one_or_many("posts")
        .unwrap()
        .create([("title", "hello")])
        .await
        .unwrap();

    assert_eq!(
        driver.sqls()[0],
        r#"INSERT INTO "posts" ("title", "user_id") VALUES (?, ?)"#
    );
    assert_eq!(post.get_raw("user_id"), Some(&Value::Int(3)));
}

#[tokio::test]
async fn attach_inserts_pivot_rows() {
    let (orm, driver) = setup();
    let user = loaded(&orm, &driver, "User", Row::from_pairs([("id", 1)])).await;

    user.belongs_to_many("roles")
        .unwrap()
        .attach([2, 3], record([("level", 1)]))
        .await
        .unwrap();

    let stmts = driver.statements();
    assert_eq!(
        stmts[0].sql,
        r#"INSERT INTO "role_user" ("user_id", "role_id", "level") VALUES (?, ?, ?), (?, ?, ?)"#
    );
    assert_eq!(stmts[0].bindings.len(), 6);
}

#[tokio::test]
async fn sync_detaches_stale_and_attaches_missing() {
    let (orm, driver) = setup();
    let user = loaded(&orm, &driver, "User", Row::from_pairs([("id", 1)])).await;
    driver.push_rows(vec![
        Row::from_pairs([("role_id", 1)]),
        Row::from_pairs([("role_id", 2)]),
    ]);
    driver.push_affected(1);
    driver.push_affected(1);

    let changes = user
        .belongs_to_many("roles")
        .unwrap()
        .sync([2, 3])
        .await
        .unwrap();

    assert_eq!(changes.detached, vec![Value::Int(1)]);
    assert_eq!(changes.attached, vec![Value::Int(3)]);
    assert!(changes.updated.is_empty());
    let sqls = driver.sqls();
    assert_eq!(sqls.len(), 3);
    assert_eq!(sqls[0], r#"SELECT "role_id" FROM "role_user" WHERE "user_id" = ?"#);
    assert_eq!(
        sqls[1],
        r#"DELETE FROM "role_user" WHERE "user_id" = ? AND "role_id" IN (?)"#
    );
    assert!(sqls[2].starts_with(r#"INSERT INTO "role_user""#));
}

#[tokio::test]
async fn toggle_flips_attachment() {
    let (orm, driver) = setup();
    let user = loaded(&orm, &driver, "User", Row::from_pairs([("id", 1)])).await;
    driver.push_rows(vec![Row::from_pairs([("role_id", 1)])]);

    let changes = user
        .belongs_to_many("roles")
        .unwrap()
        .toggle([1, 4])
        .await
        .unwrap();

    assert_eq!(changes.detached, vec![Value::Int(1)]);
    assert_eq!(changes.attached, vec![Value::Int(4)]);
}

#[tokio::test]
async fn pivot_writes_require_saved_parent() {
    let (orm, _) = setup();
    let user = orm.make("User").unwrap();
    let err = user
        .belongs_to_many("roles")
        .unwrap()
        .attach([1], Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(err, OrmError::Validation(_)));
}

#[tokio::test]
async fn find_or_fail_names_entity_and_missing_id() {
    let (orm, driver) = setup();
    driver.push_rows(vec![]);

    let err = orm.query("User").unwrap().find_or_fail(99).await.unwrap_err();

    assert!(err.is_not_found());
    match err {
        OrmError::ModelNotFound { model, ids } => {
            assert_eq!(model, "User");
            assert_eq!(ids, vec!["99".to_string()]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(
        driver.sqls(),
        vec![r#"SELECT * FROM "users" WHERE "users"."id" = ? LIMIT 1"#]
    );
}

#[tokio::test]
async fn first_or_fail_on_empty_result_is_not_found() {
    let (orm, driver) = setup();
    driver.push_rows(vec![]);

    let err = orm
        .query("User")
        .unwrap()
        .where_eq("email", "nobody@example.com")
        .first_or_fail()
        .await
        .unwrap_err();

    assert!(matches!(err, OrmError::ModelNotFound { ref model, ref ids } if model == "User" && ids.is_empty()));
}

#[tokio::test]
async fn find_or_new_returns_unsaved_model_when_missing() {
    let (orm, driver) = setup();
    driver.push_rows(vec![]);

    let user = orm.query("User").unwrap().find_or_new(5).await.unwrap();

    assert!(!user.exists());
    assert_eq!(user.entity(), "User");
    assert_eq!(driver.sqls().len(), 1);
}

#[tokio::test]
async fn pivot_column_written_by_attach_is_read_back() {
    let (orm, driver) = setup();
    let mut user = loaded(&orm, &driver, "User", Row::from_pairs([("id", 1)])).await;

    user.belongs_to_many("teams")
        .unwrap()
        .attach([2], record([("role", "admin")]))
        .await
        .unwrap();

    let insert = &driver.statements()[0];
    assert_eq!(
        insert.sql,
        r#"INSERT INTO "team_user" ("user_id", "team_id", "role") VALUES (?, ?, ?)"#
    );
    assert_eq!(
        insert.bindings,
        vec![Value::Int(1), Value::Int(2), Value::from("admin")]
    );

    driver.clear();
    driver.push_rows(vec![Row::from_pairs([
        ("id", Value::Int(2)),
        ("pivot_user_id", Value::Int(1)),
        ("pivot_team_id", Value::Int(2)),
        ("pivot_role", Value::from("admin")),
    ])]);
    user.get_relation_value("teams").await.unwrap();

    assert_eq!(
        driver.sqls()[0],
        r#"SELECT "teams".*, "team_user"."user_id" AS "pivot_user_id", "team_user"."team_id" AS "pivot_team_id", "team_user"."role" AS "pivot_role" FROM "teams" INNER JOIN "team_user" ON "teams"."id" = "team_user"."team_id" WHERE "team_user"."user_id" = ?"#
    );
    let team = &user.related_many("teams")[0];
    assert!(!team.has_attribute("pivot_role"));
    let pivot = team.pivot().unwrap();
    assert_eq!(pivot.get_raw("role"), Some(&Value::from("admin")));
    assert_eq!(pivot.get_raw("user_id"), Some(&Value::Int(1)));
}
