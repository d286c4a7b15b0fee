use super::*;
use crate::config::DriverName;
use crate::orm::Orm;
use crate::row::Row;
use crate::testing::{fake_connection, FakeDriver};

fn setup() -> (Orm, Arc<FakeDriver>) {
    let (conn, driver) = fake_connection(DriverName::Sqlite);
    let orm = Orm::with_connection(conn);
    orm.register(
        EntitySchema::new("User")
            .relation("posts", RelationDef::has_many("Post"))
            .relation("profile", RelationDef::has_one("Profile").with_default(vec![(
                "bio".to_string(),
                Value::from("none"),
            )]))
            .relation("roles", RelationDef::belongs_to_many("Role").with_pivot(&["level"]))
            .relation("parent", RelationDef::belongs_to("User").foreign_key("parent_id")),
    );
    orm.register(
        EntitySchema::new("Post")
            .relation("author", RelationDef::belongs_to("User").foreign_key("user_id"))
            .relation("comments", RelationDef::morph_many("Comment", "commentable"))
            .relation("tags", RelationDef::morph_to_many("Tag", "taggable")),
    );
    orm.register(EntitySchema::new("Video"));
    orm.register(EntitySchema::new("Comment").relation("commentable", RelationDef::morph_to()));
    orm.register(EntitySchema::new("Role"));
    orm.register(EntitySchema::new("Profile"));
    orm.register(
        EntitySchema::new("Tag").relation("posts", RelationDef::morphed_by_many("Post", "taggable")),
    );
    orm.register(
        EntitySchema::new("Country").relation("posts", RelationDef::has_many_through("Post", "User")),
    );
    (orm, driver)
}

fn model(orm: &Orm, entity: &str, attributes: &[(&str, Value)]) -> Model {
    let schema = orm.schema(entity).unwrap();
    let mut m = Model::new(orm.clone(), schema);
    m.set_raw_attributes(attributes.iter().map(|(k, v)| (*k, v.clone())), true);
    m.exists = true;
    m
}

#[test]
fn belongs_to_constrains_owner_key() {
    let (orm, _) = setup();
    let post = model(&orm, "Post", &[("id", 1.into()), ("user_id", 7.into())]);
    let q = post.relation("author").unwrap().to_sql().unwrap();
    assert_eq!(q.sql, r#"SELECT * FROM "users" WHERE "users"."id" = ?"#);
    assert_eq!(q.bindings, vec![Value::Int(7)]);
}

#[test]
fn has_many_constrains_foreign_key_and_excludes_null() {
    let (orm, _) = setup();
    let user = model(&orm, "User", &[("id", 7.into())]);
    let q = user.relation("posts").unwrap().to_sql().unwrap();
    assert_eq!(
        q.sql,
        r#"SELECT * FROM "posts" WHERE "posts"."user_id" = ? AND "posts"."user_id" IS NOT NULL"#
    );
}

#[test]
fn morph_many_adds_type_constraint() {
    let (orm, _) = setup();
    orm.morph_map([("post", "Post")]);
    let post = model(&orm, "Post", &[("id", 1.into())]);
    let q = post.relation("comments").unwrap().to_sql().unwrap();
    assert_eq!(
        q.sql,
        r#"SELECT * FROM "comments" WHERE "comments"."commentable_id" = ? AND "comments"."commentable_id" IS NOT NULL AND "comments"."commentable_type" = ?"#
    );
    assert_eq!(q.bindings, vec![Value::Int(1), Value::from("post")]);
}

#[test]
fn belongs_to_many_joins_pivot_and_aliases_columns() {
    let (orm, _) = setup();
    let user = model(&orm, "User", &[("id", 7.into())]);
    let q = user.relation("roles").unwrap().to_sql().unwrap();
    assert_eq!(
        q.sql,
        r#"SELECT "roles".*, "role_user"."user_id" AS "pivot_user_id", "role_user"."role_id" AS "pivot_role_id", "role_user"."level" AS "pivot_level" FROM "roles" INNER JOIN "role_user" ON "roles"."id" = "role_user"."role_id" WHERE "role_user"."user_id" = ?"#
    );
}

#[test]
fn morphed_by_many_uses_related_morph_class() {
    let (orm, _) = setup();
    let tag = model(&orm, "Tag", &[("id", 4.into())]);
    let q = tag.relation("posts").unwrap().to_sql().unwrap();
    assert!(q.sql.contains(r#"INNER JOIN "taggables" ON "posts"."id" = "taggables"."taggable_id""#));
    assert!(q.sql.ends_with(r#"WHERE "taggables"."tag_id" = ? AND "taggables"."taggable_type" = ?"#));
    assert_eq!(q.bindings, vec![Value::Int(4), Value::from("Post")]);
}

#[test]
fn has_many_through_joins_intermediate_table() {
    let (orm, _) = setup();
    let country = model(&orm, "Country", &[("id", 3.into())]);
    let q = country.relation("posts").unwrap().to_sql().unwrap();
    assert_eq!(
        q.sql,
        r#"SELECT "posts".*, "users"."country_id" AS "fedaco_through_key" FROM "posts" INNER JOIN "users" ON "users"."id" = "posts"."user_id" WHERE "users"."country_id" = ?"#
    );
}

#[test]
fn undeclared_relation_is_not_found() {
    let (orm, _) = setup();
    let user = model(&orm, "User", &[("id", 1.into())]);
    let err = user.relation("missing").unwrap_err();
    assert!(matches!(err, OrmError::RelationNotFound { ref relation, .. } if relation == "missing"));
}

#[test]
fn bare_relation_has_no_key_predicate() {
    let (orm, _) = setup();
    let user = model(&orm, "User", &[("id", 7.into())]);
    let bare = user.bare_relation("posts").unwrap();
    let keyed = resolve(&user, "posts").unwrap();

    assert_eq!(bare.to_sql().unwrap().sql, r#"SELECT * FROM "posts""#);
    assert_eq!(
        keyed.to_sql().unwrap().sql,
        r#"SELECT * FROM "posts" WHERE "posts"."user_id" = ? AND "posts"."user_id" IS NOT NULL"#
    );
}

#[test]
fn keyed_resolve_is_unaffected_by_concurrent_bare_builds() {
    let (orm, _) = setup();
    std::thread::scope(|scope| {
        scope.spawn(|| {
            let user = model(&orm, "User", &[("id", 1.into())]);
            for _ in 0..500 {
                resolve_with(&user, "posts", Constraints::Bare).unwrap();
            }
        });
        scope.spawn(|| {
            let user = model(&orm, "User", &[("id", 2.into())]);
            for _ in 0..500 {
                let q = resolve(&user, "posts").unwrap().to_sql().unwrap();
                assert!(q.sql.contains(r#"WHERE "posts"."user_id" = ?"#), "{}", q.sql);
                assert_eq!(q.bindings, vec![Value::Int(2)]);
            }
        });
    });
}

#[test]
fn has_compiles_exists_subquery() {
    let (orm, _) = setup();
    let q = orm.query("User").unwrap().has("posts", ">=", 1).to_sql().unwrap();
    assert_eq!(
        q.sql,
        r#"SELECT * FROM "users" WHERE EXISTS (SELECT * FROM "posts" WHERE "users"."id" = "posts"."user_id")"#
    );
}

#[test]
fn has_with_count_compares_subquery() {
    let (orm, _) = setup();
    let q = orm.query("User").unwrap().has("posts", ">=", 3).to_sql().unwrap();
    assert_eq!(
        q.sql,
        r#"SELECT * FROM "users" WHERE (SELECT count(*) FROM "posts" WHERE "users"."id" = "posts"."user_id") >= ?"#
    );
    assert_eq!(q.bindings, vec![Value::Int(3)]);
}

#[test]
fn doesnt_have_negates_exists() {
    let (orm, _) = setup();
    let q = orm.query("User").unwrap().doesnt_have("roles").to_sql().unwrap();
    assert_eq!(
        q.sql,
        r#"SELECT * FROM "users" WHERE NOT EXISTS (SELECT * FROM "roles" INNER JOIN "role_user" ON "roles"."id" = "role_user"."role_id" WHERE "users"."id" = "role_user"."user_id")"#
    );
}

#[test]
fn self_referencing_existence_aliases_table() {
    let (orm, _) = setup();
    let q = orm.query("User").unwrap().has("parent", ">=", 1).to_sql().unwrap();
    assert_eq!(
        q.sql,
        r#"SELECT * FROM "users" WHERE EXISTS (SELECT * FROM "users" AS "fedaco_reserved_0" WHERE "users"."parent_id" = "fedaco_reserved_0"."id")"#
    );
}

#[test]
fn where_has_applies_constraint_inside_subquery() {
    let (orm, _) = setup();
    let q = orm
        .query("User")
        .unwrap()
        .where_has("posts", |q| q.where_eq("published", true))
        .to_sql()
        .unwrap();
    assert_eq!(
        q.sql,
        r#"SELECT * FROM "users" WHERE EXISTS (SELECT * FROM "posts" WHERE "published" = ? AND "users"."id" = "posts"."user_id")"#
    );
    assert_eq!(q.bindings, vec![Value::Bool(true)]);
}

#[test]
fn with_count_selects_aliased_subquery() {
    let (orm, _) = setup();
    let q = orm
        .query("User")
        .unwrap()
        .with_count(&["posts", "roles as role_total"])
        .to_sql()
        .unwrap();
    assert_eq!(
        q.sql,
        r#"SELECT "users".*, (SELECT count(*) FROM "posts" WHERE "users"."id" = "posts"."user_id") AS "posts_count", (SELECT count(*) FROM "roles" INNER JOIN "role_user" ON "roles"."id" = "role_user"."role_id" WHERE "users"."id" = "role_user"."user_id") AS "role_total" FROM "users""#
    );
}

#[test]
fn morph_to_has_no_existence_query() {
    let (orm, _) = setup();
    let err = orm
        .query("Comment")
        .unwrap()
        .has("commentable", ">=", 1)
        .to_sql()
        .unwrap_err();
    assert!(matches!(err, OrmError::Compile(_)));
}

#[tokio::test]
async fn eager_has_many_runs_one_in_query() {
    let (orm, driver) = setup();
    driver.push_rows(vec![
        Row::from_pairs([("id", 1)]),
        Row::from_pairs([("id", 2)]),
    ]);
    driver.push_rows(vec![
        Row::from_pairs([("id", 10), ("user_id", 1)]),
        Row::from_pairs([("id", 11), ("user_id", 1)]),
    ]);

    let users = orm.query("User").unwrap().with(&["posts"]).get().await.unwrap();

    let stmts = driver.statements();
    assert_eq!(stmts.len(), 2);
    assert_eq!(stmts[1].sql, r#"SELECT * FROM "posts" WHERE "posts"."user_id" IN (?, ?)"#);
    assert_eq!(stmts[1].bindings, vec![Value::Int(1), Value::Int(2)]);
    assert_eq!(users[0].related_many("posts").len(), 2);
    assert!(users[1].relation_loaded("posts"));
    assert!(users[1].related_many("posts").is_empty());
}

#[tokio::test]
async fn eager_belongs_to_dedupes_keys_and_skips_null() {
    let (orm, driver) = setup();
    driver.push_rows(vec![
        Row::from_pairs([("id", Value::Int(1)), ("user_id", Value::Int(7))]),
        Row::from_pairs([("id", Value::Int(2)), ("user_id", Value::Int(7))]),
        Row::from_pairs([("id", Value::Int(3)), ("user_id", Value::Null)]),
    ]);
    driver.push_rows(vec![Row::from_pairs([("id", 7), ("name", 5)])]);

    let posts = orm.query("Post").unwrap().with(&["author"]).get().await.unwrap();

    let stmts = driver.statements();
    assert_eq!(stmts[1].sql, r#"SELECT * FROM "users" WHERE "users"."id" IN (?)"#);
    assert_eq!(stmts[1].bindings, vec![Value::Int(7)]);
    assert_eq!(posts[0].related("author").unwrap().get_key(), Value::Int(7));
    assert_eq!(posts[1].related("author").unwrap().get_key(), Value::Int(7));
    assert!(posts[2].relation_loaded("author"));
    assert!(posts[2].related("author").is_none());
}

#[tokio::test]
async fn eager_has_one_falls_back_to_default() {
    let (orm, driver) = setup();
    driver.push_rows(vec![Row::from_pairs([("id", 1)])]);
    driver.push_rows(vec![]);

    let users = orm.query("User").unwrap().with(&["profile"]).get().await.unwrap();
    let profile = users[0].related("profile").unwrap();
    assert!(!profile.exists());
    assert_eq!(profile.get_raw("bio"), Some(&Value::from("none")));
}

#[tokio::test]
async fn eager_belongs_to_many_moves_pivot_columns() {
    let (orm, driver) = setup();
    driver.push_rows(vec![Row::from_pairs([("id", 1)])]);
    driver.push_rows(vec![Row::from_pairs([
        ("id", 5),
        ("pivot_user_id", 1),
        ("pivot_role_id", 5),
        ("pivot_level", 2),
    ])]);

    let users = orm.query("User").unwrap().with(&["roles"]).get().await.unwrap();

    assert!(driver.sqls()[1].ends_with(r#"WHERE "role_user"."user_id" IN (?)"#));
    let role = &users[0].related_many("roles")[0];
    assert!(!role.has_attribute("pivot_level"));
    assert!(role.is_clean(&[]));
    let pivot = role.pivot().unwrap();
    assert!(pivot.exists());
    assert_eq!(pivot.table(), "role_user");
    assert_eq!(pivot.get_raw("level"), Some(&Value::Int(2)));
}

#[tokio::test]
async fn eager_morph_to_queries_each_type_once() {
    let (orm, driver) = setup();
    orm.morph_map([("post", "Post")]);
    driver.push_rows(vec![
        Row::from_pairs([("id", Value::Int(1)), ("commentable_type", "post".into()), ("commentable_id", Value::Int(10))]),
        Row::from_pairs([("id", Value::Int(2)), ("commentable_type", "Video".into()), ("commentable_id", Value::Int(20))]),
        Row::from_pairs([("id", Value::Int(3)), ("commentable_type", "post".into()), ("commentable_id", Value::Int(10))]),
    ]);
    driver.push_rows(vec![Row::from_pairs([("id", 10)])]);
    driver.push_rows(vec![Row::from_pairs([("id", 20)])]);

    let comments = orm
        .query("Comment")
        .unwrap()
        .with(&["commentable"])
        .get()
        .await
        .unwrap();

    let sqls = driver.sqls();
    assert_eq!(sqls.len(), 3);
    assert_eq!(sqls[1], r#"SELECT * FROM "posts" WHERE "posts"."id" IN (?)"#);
    assert_eq!(sqls[2], r#"SELECT * FROM "videos" WHERE "videos"."id" IN (?)"#);
    assert_eq!(comments[0].related("commentable").unwrap().entity(), "Post");
    assert_eq!(comments[1].related("commentable").unwrap().entity(), "Video");
    assert_eq!(comments[2].related("commentable").unwrap().get_key(), Value::Int(10));
}

#[tokio::test]
async fn eager_morph_to_rejects_unknown_type() {
    let (orm, driver) = setup();
    driver.push_rows(vec![Row::from_pairs([
        ("id", Value::Int(1)),
        ("commentable_type", "Nope".into()),
        ("commentable_id", Value::Int(1)),
    ])]);
    let err = orm
        .query("Comment")
        .unwrap()
        .with(&["commentable"])
        .get()
        .await
        .unwrap_err();
    assert!(matches!(err, OrmError::Relation(ref m) if m.contains("Nope")));
}

#[tokio::test]
async fn eager_has_many_through_matches_by_through_key() {
    let (orm, driver) = setup();
    driver.push_rows(vec![Row::from_pairs([("id", 3)])]);
    driver.push_rows(vec![Row::from_pairs([("id", 10), ("fedaco_through_key", 3)])]);

    let countries = orm.query("Country").unwrap().with(&["posts"]).get().await.unwrap();
    let posts = countries[0].related_many("posts");
    assert_eq!(posts.len(), 1);
    assert!(!posts[0].has_attribute("fedaco_through_key"));
}

#[tokio::test]
async fn nested_eager_loads_run_after_parents() {
    let (orm, driver) = setup();
    driver.push_rows(vec![Row::from_pairs([("id", 1)])]);
    driver.push_rows(vec![Row::from_pairs([("id", 10), ("user_id", 1)])]);
    driver.push_rows(vec![Row::from_pairs([
        ("id", Value::Int(100)),
        ("commentable_id", Value::Int(10)),
        ("commentable_type", "Post".into()),
    ])]);

    let users = orm
        .query("User")
        .unwrap()
        .with(&["posts.comments"])
        .get()
        .await
        .unwrap();

    assert_eq!(
        driver.sqls()[2],
        r#"SELECT * FROM "comments" WHERE "comments"."commentable_id" IN (?) AND "comments"."commentable_type" = ?"#
    );
    let post = &users[0].related_many("posts")[0];
    assert_eq!(post.related_many("comments").len(), 1);
}

#[tokio::test]
async fn lazy_relation_value_is_cached() {
    let (orm, driver) = setup();
    let mut post = model(&orm, "Post", &[("id", 1.into()), ("user_id", 7.into())]);
    driver.push_rows(vec![Row::from_pairs([("id", 7)])]);

    let author = post.get_relation_value("author").await.unwrap();
    assert_eq!(author.as_one().unwrap().get_key(), Value::Int(7));
    post.get_relation_value("author").await.unwrap();
    assert_eq!(driver.statements().len(), 1);
}

#[tokio::test]
async fn lazy_belongs_to_with_null_key_skips_query() {
    let (orm, driver) = setup();
    let post = model(&orm, "Post", &[("id", 1.into()), ("user_id", Value::Null)]);
    let value = post.relation("author").unwrap().get_results().await.unwrap();
    assert!(value.as_one().is_none());
    assert!(driver.statements().is_empty());
}
