use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use fedaco::testing::fake_connection;
use fedaco::{
    DriverName, EntitySchema, Grammar, MySqlGrammar, Orm, PostgresGrammar, QueryBuilder,
    RelationDef, SqlServerGrammar, SqliteGrammar,
};
use std::sync::Arc;

/// SELECT with `n` equality wheres, an IN list of `n` values and a join.
fn build_select(grammar: Arc<dyn Grammar>, n: usize) -> QueryBuilder {
    let mut query = QueryBuilder::new(grammar)
        .from("users")
        .join("posts", "posts.user_id", "=", "users.id");
    for i in 0..n {
        query = query.where_eq(&format!("col{i}"), i as i64);
    }
    query
        .where_in("users.id", (0..n as i64).collect::<Vec<_>>())
        .order_by("users.id")
        .limit(10)
}

fn grammars() -> Vec<(&'static str, Arc<dyn Grammar>)> {
    vec![
        ("mysql", Arc::new(MySqlGrammar::new(""))),
        ("pgsql", Arc::new(PostgresGrammar::new(""))),
        ("sqlite", Arc::new(SqliteGrammar::new(""))),
        ("sqlsrv", Arc::new(SqlServerGrammar::new(""))),
    ]
}

fn bench_compile_select(c: &mut Criterion) {
    let mut group = c.benchmark_group("grammar/compile_select");

    for (name, grammar) in grammars() {
        for n in [1, 10, 100] {
            let query = build_select(grammar.clone(), n);
            group.bench_with_input(BenchmarkId::new(name, n), &query, |b, query| {
                b.iter(|| black_box(query.to_sql()));
            });
        }
    }

    group.finish();
}

fn bench_wire_placeholders(c: &mut Criterion) {
    let mut group = c.benchmark_group("grammar/to_wire_sql");
    let grammar = PostgresGrammar::new("");

    for n in [10, 100, 500] {
        let sql = build_select(Arc::new(PostgresGrammar::new("")), n)
            .to_sql()
            .map(|q| q.sql)
            .unwrap_or_default();
        group.bench_with_input(BenchmarkId::from_parameter(n), &sql, |b, sql| {
            b.iter(|| black_box(grammar.to_wire_sql(sql)));
        });
    }

    group.finish();
}

fn bench_existence_query(c: &mut Criterion) {
    let (conn, _) = fake_connection(DriverName::Pgsql);
    let orm = Orm::with_connection(conn);
    orm.register(
        EntitySchema::new("User")
            .relation("posts", RelationDef::has_many("Post"))
            .relation("roles", RelationDef::belongs_to_many("Role")),
    );
    orm.register(EntitySchema::new("Post"));
    orm.register(EntitySchema::new("Role"));

    c.bench_function("grammar/where_has_and_count", |b| {
        b.iter(|| {
            let query = orm
                .query("User")
                .map(|q| {
                    q.where_has("posts", |q| q.where_eq("published", true))
                        .with_count(&["roles"])
                })
                .and_then(|q| q.to_sql());
            black_box(query)
        });
    });
}

criterion_group!(
    benches,
    bench_compile_select,
    bench_wire_placeholders,
    bench_existence_query
);
criterion_main!(benches);
