//! Builder-level tests, compiled with the Postgres grammar.

use super::*;
use crate::error::OrmError;
use crate::grammar::PostgresGrammar;
use crate::value::Value;
use std::sync::Arc;

fn pg() -> QueryBuilder {
    QueryBuilder::new(Arc::new(PostgresGrammar::new("")))
}

fn placeholders(sql: &str) -> usize {
    sql.matches('?').count()
}

#[test]
fn test_select_where_order_limit() {
    let q = pg()
        .from("users")
        .where_("id", "=", 1)
        .order_by("name")
        .limit(5)
        .to_sql()
        .unwrap();
    assert_eq!(
        q.sql,
        r#"SELECT * FROM "users" WHERE "id" = ? ORDER BY "name" ASC LIMIT 5"#
    );
    assert_eq!(q.bindings, vec![Value::Int(1)]);
}

#[test]
fn test_clause_order_is_independent_of_call_order() {
    let a = pg()
        .limit(5)
        .order_by("name")
        .where_eq("id", 1)
        .from("users")
        .to_sql()
        .unwrap();
    let b = pg()
        .from("users")
        .where_("id", "=", 1)
        .order_by("name")
        .limit(5)
        .to_sql()
        .unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_nested_where_group() {
    let q = pg()
        .from("users")
        .where_eq("a", 1)
        .or_where_nested(|q| q.where_("b", ">", 2).where_eq("c", 3))
        .to_sql()
        .unwrap();
    assert_eq!(
        q.sql,
        r#"SELECT * FROM "users" WHERE "a" = ? OR ("b" > ? AND "c" = ?)"#
    );
    assert_eq!(q.bindings, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
}

#[test]
fn test_empty_nested_group_is_skipped() {
    let q = pg().from("users").where_nested(|q| q).to_sql().unwrap();
    assert_eq!(q.sql, r#"SELECT * FROM "users""#);
}

#[test]
fn test_join_bindings_precede_where_bindings() {
    let q = pg()
        .from("users")
        .where_eq("active", true)
        .join_with(JoinKind::Inner, "posts", |j| {
            j.on("posts.user_id", "=", "users.id")
                .where_("posts.status", "=", "published")
        })
        .to_sql()
        .unwrap();
    assert_eq!(
        q.sql,
        r#"SELECT * FROM "users" INNER JOIN "posts" ON "posts"."user_id" = "users"."id" AND "posts"."status" = ? WHERE "active" = ?"#
    );
    assert_eq!(
        q.bindings,
        vec![Value::from("published"), Value::Bool(true)]
    );
}

#[test]
fn test_select_sub_bindings_come_first() {
    let count = pg()
        .from("posts")
        .select_raw("count(*)", vec![])
        .where_eq("x", 9);
    let q = pg()
        .from("users")
        .where_eq("id", 1)
        .select_sub(count, "c")
        .to_sql()
        .unwrap();
    assert_eq!(
        q.sql,
        r#"SELECT (SELECT count(*) FROM "posts" WHERE "x" = ?) AS "c" FROM "users" WHERE "id" = ?"#
    );
    assert_eq!(q.bindings, vec![Value::Int(9), Value::Int(1)]);
}

#[test]
fn test_empty_in_lists() {
    let q = pg()
        .from("users")
        .where_in("id", Vec::<i64>::new())
        .to_sql()
        .unwrap();
    assert_eq!(q.sql, r#"SELECT * FROM "users" WHERE 0 = 1"#);
    assert!(q.bindings.is_empty());

    let q = pg()
        .from("users")
        .where_not_in("id", Vec::<i64>::new())
        .to_sql()
        .unwrap();
    assert_eq!(q.sql, r#"SELECT * FROM "users" WHERE 1 = 1"#);
}

#[test]
fn test_where_in_list() {
    let q = pg()
        .from("users")
        .where_in("id", [1, 2, 3])
        .to_sql()
        .unwrap();
    assert_eq!(q.sql, r#"SELECT * FROM "users" WHERE "id" IN (?, ?, ?)"#);
    assert_eq!(q.bindings.len(), 3);
}

#[test]
fn test_null_comparisons_rewrite() {
    let q = pg()
        .from("users")
        .where_("deleted_at", "=", Value::Null)
        .or_where("banned_at", "<>", Option::<i64>::None)
        .to_sql()
        .unwrap();
    assert_eq!(
        q.sql,
        r#"SELECT * FROM "users" WHERE "deleted_at" IS NULL OR "banned_at" IS NOT NULL"#
    );
    assert!(q.bindings.is_empty());
}

#[test]
fn test_invalid_operator_is_compile_error() {
    let err = pg()
        .from("users")
        .where_("id", "=~=", 1)
        .to_sql()
        .unwrap_err();
    assert!(matches!(err, OrmError::Compile(msg) if msg.contains("=~=")));
}

#[test]
fn test_null_with_ordering_operator_is_error() {
    let err = pg()
        .from("users")
        .where_("age", ">", Value::Null)
        .to_sql()
        .unwrap_err();
    assert!(matches!(err, OrmError::Compile(_)));
}

#[test]
fn test_error_in_sub_builder_propagates() {
    let sub = pg().from("posts").where_("x", "nope", 1);
    let err = pg()
        .from("users")
        .where_exists(sub)
        .to_sql()
        .unwrap_err();
    assert!(matches!(err, OrmError::Compile(_)));
}

#[test]
fn test_clone_does_not_affect_original() {
    let base = pg().from("users").where_eq("a", 1);
    let before = base.to_sql().unwrap();
    let derived = base.clone().where_eq("b", 2).order_by("c");
    assert_eq!(base.to_sql().unwrap(), before);
    assert_ne!(derived.to_sql().unwrap(), before);
}

#[test]
fn test_union_with_trailing_order_and_limit() {
    let q = pg()
        .from("a")
        .where_eq("x", 1)
        .union(pg().from("b").where_eq("y", 2))
        .order_by("id")
        .limit(10)
        .to_sql()
        .unwrap();
    assert_eq!(
        q.sql,
        r#"(SELECT * FROM "a" WHERE "x" = ?) UNION (SELECT * FROM "b" WHERE "y" = ?) ORDER BY "id" ASC LIMIT 10"#
    );
    assert_eq!(q.bindings, vec![Value::Int(1), Value::Int(2)]);
}

#[test]
fn test_count_aggregate() {
    let q = pg()
        .from("users")
        .where_eq("a", 1)
        .order_by("name")
        .to_aggregate_sql("count", &["*"])
        .unwrap();
    assert_eq!(
        q.sql,
        r#"SELECT COUNT(*) AS "aggregate" FROM "users" WHERE "a" = ?"#
    );
}

#[test]
fn test_grouped_aggregate_wraps_query() {
    let q = pg()
        .from("users")
        .group_by(&["team"])
        .to_aggregate_sql("count", &["*"])
        .unwrap();
    assert_eq!(
        q.sql,
        r#"SELECT COUNT(*) AS "aggregate" FROM (SELECT * FROM "users" GROUP BY "team") AS "temp_table""#
    );
}

#[test]
fn test_aggregate_respects_limit_and_offset() {
    let q = pg()
        .from("users")
        .where_eq("active", true)
        .limit(5)
        .to_aggregate_sql("count", &["*"])
        .unwrap();
    assert_eq!(
        q.sql,
        r#"SELECT COUNT(*) AS "aggregate" FROM (SELECT * FROM "users" WHERE "active" = ? LIMIT 5) AS "temp_table""#
    );
    assert_eq!(q.bindings, vec![Value::Bool(true)]);

    let q = pg()
        .from("users")
        .offset(20)
        .to_aggregate_sql("max", &["users.age"])
        .unwrap();
    assert_eq!(
        q.sql,
        r#"SELECT MAX("age") AS "aggregate" FROM (SELECT "users"."age" FROM "users" OFFSET 20) AS "temp_table""#
    );
}

#[test]
fn test_distinct_column_count() {
    let q = pg()
        .from("users")
        .distinct()
        .to_aggregate_sql("count", &["email"])
        .unwrap();
    assert_eq!(
        q.sql,
        r#"SELECT COUNT(DISTINCT "email") AS "aggregate" FROM "users""#
    );
}

#[test]
fn test_binding_buckets() {
    let q = pg()
        .from_sub(pg().from("logs").where_eq("level", "warn"), "l")
        .where_eq("l.user_id", 5)
        .having("total", ">", 3)
        .order_by_raw("field(id, ?)", vec![Value::Int(7)]);
    let b = q.bindings();
    assert_eq!(b.from, vec![Value::from("warn")]);
    assert_eq!(b.where_, vec![Value::Int(5)]);
    assert_eq!(b.having, vec![Value::Int(3)]);
    assert_eq!(b.order, vec![Value::Int(7)]);

    let compiled = q.to_sql().unwrap();
    assert_eq!(compiled.bindings, q.get_bindings());
    assert_eq!(placeholders(&compiled.sql), compiled.bindings.len());
}

#[test]
fn test_placeholder_parity_on_complex_query() {
    let q = pg()
        .from("users as u")
        .select(&["u.id", "u.name"])
        .join("teams", "teams.id", "=", "u.team_id")
        .where_between("u.age", 18, 65)
        .where_in_sub(
            "u.id",
            pg().from("posts").select(&["user_id"]).where_eq("published", true),
        )
        .or_where_raw("u.score > ? and u.rank < ?", vec![10.into(), 3.into()])
        .group_by(&["u.id", "u.name"])
        .having_raw("count(*) between ? and ?", vec![1.into(), 9.into()])
        .to_sql()
        .unwrap();
    assert_eq!(placeholders(&q.sql), q.bindings.len());
    assert_eq!(
        q.bindings,
        vec![
            Value::Int(18),
            Value::Int(65),
            Value::Bool(true),
            Value::Int(10),
            Value::Int(3),
            Value::Int(1),
            Value::Int(9),
        ]
    );
}

#[test]
fn test_for_page() {
    let q = pg().from("users").for_page(3, 15).to_sql().unwrap();
    assert_eq!(q.sql, r#"SELECT * FROM "users" LIMIT 15 OFFSET 30"#);
}

#[test]
fn test_bad_order_direction() {
    let err = pg()
        .from("users")
        .order_by_direction("name", "sideways")
        .to_sql()
        .unwrap_err();
    assert!(matches!(err, OrmError::Compile(_)));
}

#[test]
fn test_where_in_sub_and_exists() {
    let q = pg()
        .from("users")
        .where_in_sub("id", pg().from("posts").select(&["user_id"]).where_eq("p", 1))
        .where_not_exists(pg().from("bans").where_column("bans.user_id", "=", "users.id"))
        .to_sql()
        .unwrap();
    assert_eq!(
        q.sql,
        r#"SELECT * FROM "users" WHERE "id" IN (SELECT "user_id" FROM "posts" WHERE "p" = ?) AND NOT EXISTS (SELECT * FROM "bans" WHERE "bans"."user_id" = "users"."id")"#
    );
}

#[test]
fn test_raw_binding_mismatch() {
    let err = pg()
        .from("users")
        .where_raw("a = ? and b = ?", vec![1.into()])
        .to_sql()
        .unwrap_err();
    assert!(matches!(err, OrmError::Compile(_)));
}

#[test]
fn test_json_selector() {
    let q = pg()
        .from("users")
        .where_eq("meta->address->city", "Oslo")
        .to_sql()
        .unwrap();
    assert_eq!(
        q.sql,
        r#"SELECT * FROM "users" WHERE "meta"->'address'->>'city' = ?"#
    );
}

#[test]
fn test_like_operator_is_uppercased() {
    let q = pg()
        .from("users")
        .where_("name", "like", "a%")
        .to_sql()
        .unwrap();
    assert_eq!(q.sql, r#"SELECT * FROM "users" WHERE "name" LIKE ?"#);
}

#[test]
fn test_lock_for_update() {
    let q = pg()
        .from("users")
        .where_eq("id", 1)
        .lock_for_update()
        .to_sql()
        .unwrap();
    assert_eq!(q.sql, r#"SELECT * FROM "users" WHERE "id" = ? FOR UPDATE"#);
}

#[test]
fn test_update_and_delete_sql() {
    let q = pg().from("users").where_eq("id", 1);
    let update = q
        .to_update_sql(&[("name".to_string(), Expr::value("x"))])
        .unwrap();
    assert_eq!(update.sql, r#"UPDATE "users" SET "name" = ? WHERE "id" = ?"#);
    assert_eq!(update.bindings, vec![Value::from("x"), Value::Int(1)]);

    let delete = q.to_delete_sql().unwrap();
    assert_eq!(delete.sql, r#"DELETE FROM "users" WHERE "id" = ?"#);
}

#[tokio::test]
async fn test_execution_requires_connection() {
    let err = pg().from("users").get().await.unwrap_err();
    assert!(matches!(err, OrmError::Connection(_)));
}
