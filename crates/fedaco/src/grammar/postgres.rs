use super::{CompiledQuery, Grammar, PlaceholderStyle, Record, SqlVisitor};
use crate::config::DriverName;
use crate::error::OrmResult;
use crate::query::ast::{Expr, QueryState};

/// PostgreSQL grammar: `"ident"` quoting, `$n` wire placeholders, `ON CONFLICT` upserts.
#[derive(Debug, Clone, Default)]
pub struct PostgresGrammar {
    prefix: String,
}

impl PostgresGrammar {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

/// Render a path segment for `->`: integers index arrays, anything else is a key literal.
fn json_segment(segment: &str) -> String {
    if segment.chars().all(|c| c.is_ascii_digit()) {
        segment.to_string()
    } else {
        format!("'{}'", segment.replace('\'', "''"))
    }
}

impl Grammar for PostgresGrammar {
    fn driver(&self) -> DriverName {
        DriverName::Pgsql
    }

    fn table_prefix(&self) -> &str {
        &self.prefix
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::Dollar
    }

    fn wrap_json_selector(&self, column: &str, path: &[String]) -> String {
        let mut out = column.to_string();
        for (i, seg) in path.iter().enumerate() {
            out.push_str(if i + 1 == path.len() { "->>" } else { "->" });
            out.push_str(&json_segment(seg));
        }
        out
    }

    fn compile_insert_or_ignore(&self, query: &QueryState, rows: &[Record]) -> OrmResult<CompiledQuery> {
        let mut compiled = self.compile_insert(query, rows)?;
        compiled.sql.push_str(" ON CONFLICT DO NOTHING");
        Ok(compiled)
    }

    fn compile_insert_get_id(&self, query: &QueryState, row: &Record, key: &str) -> OrmResult<CompiledQuery> {
        let mut compiled = self.compile_insert(query, std::slice::from_ref(row))?;
        compiled.sql.push_str(" RETURNING ");
        compiled.sql.push_str(&self.quote_identifier(key));
        Ok(compiled)
    }

    fn compile_upsert(
        &self,
        query: &QueryState,
        rows: &[Record],
        unique_by: &[String],
        update: &[String],
    ) -> OrmResult<CompiledQuery> {
        let mut v = SqlVisitor::for_statement(self, query);
        let table = v.insert_table(query)?;
        v.push(&format!("INSERT INTO {table} "));
        v.visit_insert_values(rows)?;
        let unique = v.column_list(unique_by)?;
        v.push(&format!(" ON CONFLICT {unique} DO UPDATE SET "));
        let excluded = self.quote_identifier("excluded");
        let sets: Vec<String> = update
            .iter()
            .map(|c| {
                let col = self.quote_identifier(c);
                format!("{col} = {excluded}.{col}")
            })
            .collect();
        v.push(&sets.join(", "));
        Ok(v.finish())
    }

    fn compile_update_with_joins(&self, query: &QueryState, values: &[(String, Expr)]) -> OrmResult<CompiledQuery> {
        let mut v = SqlVisitor::for_statement(self, query);
        v.visit_keyed_update(query, values, "ctid")?;
        Ok(v.finish())
    }

    fn compile_delete_with_joins(&self, query: &QueryState) -> OrmResult<CompiledQuery> {
        let mut v = SqlVisitor::for_statement(self, query);
        v.visit_keyed_delete(query, "ctid")?;
        Ok(v.finish())
    }

    fn compile_truncate(&self, table: &str) -> OrmResult<Vec<CompiledQuery>> {
        let v = SqlVisitor::new(self);
        let table = v.wrap_table(table)?;
        Ok(vec![CompiledQuery::new(
            format!("TRUNCATE {table} RESTART IDENTITY CASCADE"),
            Vec::new(),
        )])
    }

    fn compile_column_listing(&self, table: &str) -> CompiledQuery {
        CompiledQuery::new(
            "SELECT column_name FROM information_schema.columns WHERE table_schema = current_schema() AND table_name = ?",
            vec![format!("{}{table}", self.prefix).into()],
        )
    }
}
