use super::{CompiledQuery, Grammar, Record, SqlVisitor};
use crate::config::DriverName;
use crate::error::OrmResult;
use crate::query::ast::{Expr, Lock, QueryState};

/// SQLite grammar: `json_extract` selectors, `rowid` keyed join updates, no row locks.
#[derive(Debug, Clone, Default)]
pub struct SqliteGrammar {
    prefix: String,
}

impl SqliteGrammar {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Grammar for SqliteGrammar {
    fn driver(&self) -> DriverName {
        DriverName::Sqlite
    }

    fn table_prefix(&self) -> &str {
        &self.prefix
    }

    fn compile_limit_offset(&self, limit: Option<u64>, offset: Option<u64>, _has_orders: bool) -> String {
        match (limit, offset) {
            (Some(l), Some(o)) => format!(" LIMIT {l} OFFSET {o}"),
            (Some(l), None) => format!(" LIMIT {l}"),
            (None, Some(o)) => format!(" LIMIT -1 OFFSET {o}"),
            (None, None) => String::new(),
        }
    }

    // SQLite serialises writers at the database level.
    fn compile_lock(&self, _lock: Lock) -> &'static str {
        ""
    }

    fn wrap_union_part(&self, sql: String) -> String {
        format!("SELECT * FROM ({sql})")
    }

    fn compile_insert_or_ignore(&self, query: &QueryState, rows: &[Record]) -> OrmResult<CompiledQuery> {
        let mut compiled = self.compile_insert(query, rows)?;
        compiled.sql = compiled.sql.replacen("INSERT INTO", "INSERT OR IGNORE INTO", 1);
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
        v.visit_keyed_update(query, values, "rowid")?;
        Ok(v.finish())
    }

    fn compile_delete_with_joins(&self, query: &QueryState) -> OrmResult<CompiledQuery> {
        let mut v = SqlVisitor::for_statement(self, query);
        v.visit_keyed_delete(query, "rowid")?;
        Ok(v.finish())
    }

    fn compile_truncate(&self, table: &str) -> OrmResult<Vec<CompiledQuery>> {
        let v = SqlVisitor::new(self);
        let wrapped = v.wrap_table(table)?;
        Ok(vec![
            CompiledQuery::new(
                "DELETE FROM sqlite_sequence WHERE name = ?",
                vec![format!("{}{table}", self.prefix).into()],
            ),
            CompiledQuery::new(format!("DELETE FROM {wrapped}"), Vec::new()),
        ])
    }

    fn compile_column_listing(&self, table: &str) -> CompiledQuery {
        let quoted = self.quote_identifier(&format!("{}{table}", self.prefix));
        CompiledQuery::new(format!("PRAGMA table_info({quoted})"), Vec::new())
    }
}
