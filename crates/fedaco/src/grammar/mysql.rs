use super::{json_path_literal, CompiledQuery, Grammar, Record, SqlVisitor};
use crate::config::DriverName;
use crate::error::OrmResult;
use crate::query::ast::{split_table_alias, Expr, Lock, QueryState, TableRef};

/// MySQL grammar: backtick quoting, `ON DUPLICATE KEY UPDATE` upserts, inline join updates.
#[derive(Debug, Clone, Default)]
pub struct MySqlGrammar {
    prefix: String,
}

impl MySqlGrammar {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// ` ORDER BY ... LIMIT n` tail of a single-table UPDATE/DELETE.
    fn visit_dml_tail(&self, v: &mut SqlVisitor<'_, Self>, query: &QueryState) -> OrmResult<()> {
        if query.joins.is_empty() {
            if !query.orders.is_empty() {
                v.push(" ORDER BY ");
                v.visit_orders(&query.orders)?;
            }
            if let Some(limit) = query.limit {
                v.push(&format!(" LIMIT {limit}"));
            }
        }
        Ok(())
    }
}

impl Grammar for MySqlGrammar {
    fn driver(&self) -> DriverName {
        DriverName::Mysql
    }

    fn table_prefix(&self) -> &str {
        &self.prefix
    }

    fn quote_chars(&self) -> (char, char) {
        ('`', '`')
    }

    fn wrap_json_selector(&self, column: &str, path: &[String]) -> String {
        format!("json_unquote(json_extract({column}, {}))", json_path_literal(path))
    }

    fn compile_limit_offset(&self, limit: Option<u64>, offset: Option<u64>, _has_orders: bool) -> String {
        match (limit, offset) {
            (Some(l), Some(o)) => format!(" LIMIT {l} OFFSET {o}"),
            (Some(l), None) => format!(" LIMIT {l}"),
            (None, Some(o)) => format!(" LIMIT 18446744073709551615 OFFSET {o}"),
            (None, None) => String::new(),
        }
    }

    fn compile_lock(&self, lock: Lock) -> &'static str {
        match lock {
            Lock::Update => " FOR UPDATE",
            Lock::Shared => " LOCK IN SHARE MODE",
        }
    }

    fn random_order(&self) -> &'static str {
        "RAND()"
    }

    fn qualify_update_columns(&self) -> bool {
        true
    }

    fn compile_empty_insert(&self, table: &str) -> String {
        format!("INSERT INTO {table} () VALUES ()")
    }

    fn compile_insert_or_ignore(&self, query: &QueryState, rows: &[Record]) -> OrmResult<CompiledQuery> {
        let mut compiled = self.compile_insert(query, rows)?;
        compiled.sql = compiled.sql.replacen("INSERT INTO", "INSERT IGNORE INTO", 1);
        Ok(compiled)
    }

    fn compile_upsert(
        &self,
        query: &QueryState,
        rows: &[Record],
        _unique_by: &[String],
        update: &[String],
    ) -> OrmResult<CompiledQuery> {
        let mut v = SqlVisitor::for_statement(self, query);
        let table = v.insert_table(query)?;
        v.push(&format!("INSERT INTO {table} "));
        v.visit_insert_values(rows)?;
        v.push(" ON DUPLICATE KEY UPDATE ");
        let sets: Vec<String> = update
            .iter()
            .map(|c| {
                let col = self.quote_identifier(c);
                format!("{col} = VALUES({col})")
            })
            .collect();
        v.push(&sets.join(", "));
        Ok(v.finish())
    }

    fn compile_update_with_joins(&self, query: &QueryState, values: &[(String, Expr)]) -> OrmResult<CompiledQuery> {
        let mut v = SqlVisitor::for_statement(self, query);
        let table = v.from_table_sql(query)?;
        v.push(&format!("UPDATE {table}"));
        v.visit_joins(&query.joins)?;
        v.push(" SET ");
        v.visit_update_set(values)?;
        v.visit_wheres(&query.wheres)?;
        self.visit_dml_tail(&mut v, query)?;
        Ok(v.finish())
    }

    fn compile_delete_with_joins(&self, query: &QueryState) -> OrmResult<CompiledQuery> {
        let mut v = SqlVisitor::for_statement(self, query);
        let table = v.from_table_sql(query)?;
        if query.joins.is_empty() {
            v.push(&format!("DELETE FROM {table}"));
        } else {
            let target = match query.from.as_ref() {
                Some(TableRef::Table(t)) => match split_table_alias(t) {
                    (_, Some(alias)) => self.quote_identifier(alias),
                    (name, None) => v.wrap_table(name)?,
                },
                _ => table.clone(),
            };
            v.push(&format!("DELETE {target} FROM {table}"));
            v.visit_joins(&query.joins)?;
        }
        v.visit_wheres(&query.wheres)?;
        self.visit_dml_tail(&mut v, query)?;
        Ok(v.finish())
    }

    fn compile_truncate(&self, table: &str) -> OrmResult<Vec<CompiledQuery>> {
        let v = SqlVisitor::new(self);
        let table = v.wrap_table(table)?;
        Ok(vec![CompiledQuery::new(format!("TRUNCATE TABLE {table}"), Vec::new())])
    }

    fn compile_column_listing(&self, table: &str) -> CompiledQuery {
        CompiledQuery::new(
            "SELECT column_name AS `column_name` FROM information_schema.columns WHERE table_schema = database() AND table_name = ?",
            vec![format!("{}{table}", self.prefix).into()],
        )
    }

    fn compile_begin(&self) -> &'static str {
        "START TRANSACTION"
    }
}
