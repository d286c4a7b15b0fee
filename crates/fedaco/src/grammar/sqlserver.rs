use super::{json_path_literal, CompiledQuery, Grammar, PlaceholderStyle, Record, SqlVisitor};
use crate::config::DriverName;
use crate::error::OrmResult;
use crate::query::ast::{split_table_alias, Expr, Lock, QueryState, TableRef};

/// SQL Server grammar: `[ident]` quoting, `TOP`/`OFFSET FETCH` paging, `MERGE` upserts.
#[derive(Debug, Clone, Default)]
pub struct SqlServerGrammar {
    prefix: String,
}

impl SqlServerGrammar {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Name a multi-table UPDATE/DELETE targets: the alias, or the wrapped table.
    fn dml_target(&self, v: &SqlVisitor<'_, Self>, query: &QueryState) -> OrmResult<String> {
        match query.from.as_ref() {
            Some(TableRef::Table(t)) => match split_table_alias(t) {
                (_, Some(alias)) => Ok(self.quote_identifier(alias)),
                (name, None) => v.wrap_table(name),
            },
            _ => v.from_table_sql(query),
        }
    }
}

impl Grammar for SqlServerGrammar {
    fn driver(&self) -> DriverName {
        DriverName::Sqlsrv
    }

    fn table_prefix(&self) -> &str {
        &self.prefix
    }

    fn quote_chars(&self) -> (char, char) {
        ('[', ']')
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::AtP
    }

    fn wrap_json_selector(&self, column: &str, path: &[String]) -> String {
        format!("json_value({column}, {})", json_path_literal(path))
    }

    fn select_top(&self, limit: Option<u64>, offset: Option<u64>) -> Option<String> {
        match (limit, offset) {
            (Some(limit), None) => Some(format!("TOP {limit}")),
            _ => None,
        }
    }

    /// `OFFSET .. FETCH` paging. A bare limit reaching here (unions) pages from row 0.
    fn compile_limit_offset(&self, limit: Option<u64>, offset: Option<u64>, has_orders: bool) -> String {
        if limit.is_none() && offset.is_none() {
            return String::new();
        }
        let offset = offset.unwrap_or(0);
        let mut out = String::new();
        if !has_orders {
            out.push_str(" ORDER BY (SELECT 0)");
        }
        out.push_str(&format!(" OFFSET {offset} ROWS"));
        if let Some(limit) = limit {
            out.push_str(&format!(" FETCH NEXT {limit} ROWS ONLY"));
        }
        out
    }

    fn compile_lock(&self, _lock: Lock) -> &'static str {
        ""
    }

    fn table_lock_hint(&self, lock: Lock) -> &'static str {
        match lock {
            Lock::Update => " WITH(ROWLOCK,UPDLOCK,HOLDLOCK)",
            Lock::Shared => " WITH(ROWLOCK,HOLDLOCK)",
        }
    }

    fn random_order(&self) -> &'static str {
        "NEWID()"
    }

    fn compile_insert_get_id(&self, query: &QueryState, row: &Record, key: &str) -> OrmResult<CompiledQuery> {
        let mut v = SqlVisitor::for_statement(self, query);
        let table = v.insert_table(query)?;
        let output = format!("OUTPUT INSERTED.{}", self.quote_identifier(key));
        if row.is_empty() {
            v.push(&format!("INSERT INTO {table} {output} DEFAULT VALUES"));
            return Ok(v.finish());
        }
        let rows = std::slice::from_ref(row);
        let columns = SqlVisitor::<Self>::insert_columns(rows)?;
        let list = v.column_list(&columns)?;
        v.push(&format!("INSERT INTO {table} {list} {output} VALUES "));
        v.visit_value_rows(rows, &columns)?;
        Ok(v.finish())
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
        let columns = SqlVisitor::<Self>::insert_columns(rows)?;
        let list = v.column_list(&columns)?;
        let source = self.quote_identifier("fedaco_source");

        v.push(&format!("MERGE {table} USING (VALUES "));
        v.visit_value_rows(rows, &columns)?;
        v.push(&format!(") {source} {list} ON "));

        let on: Vec<String> = unique_by
            .iter()
            .map(|c| {
                let col = self.quote_identifier(c);
                format!("{source}.{col} = {table}.{col}")
            })
            .collect();
        v.push(&on.join(" AND "));

        if !update.is_empty() {
            let sets: Vec<String> = update
                .iter()
                .map(|c| {
                    let col = self.quote_identifier(c);
                    format!("{col} = {source}.{col}")
                })
                .collect();
            v.push(&format!(" WHEN MATCHED THEN UPDATE SET {}", sets.join(", ")));
        }

        let values: Vec<String> = columns
            .iter()
            .map(|c| format!("{source}.{}", self.quote_identifier(c)))
            .collect();
        v.push(&format!(
            " WHEN NOT MATCHED THEN INSERT {list} VALUES ({});",
            values.join(", ")
        ));
        Ok(v.finish())
    }

    fn compile_update_with_joins(&self, query: &QueryState, values: &[(String, Expr)]) -> OrmResult<CompiledQuery> {
        let mut v = SqlVisitor::for_statement(self, query);
        let table = v.from_table_sql(query)?;
        if query.joins.is_empty() {
            let top = query.limit.map(|l| format!("TOP ({l}) ")).unwrap_or_default();
            v.push(&format!("UPDATE {top}{table} SET "));
            v.visit_update_set(values)?;
            v.visit_wheres(&query.wheres)?;
            return Ok(v.finish());
        }
        let target = self.dml_target(&v, query)?;
        v.push(&format!("UPDATE {target} SET "));
        v.visit_update_set(values)?;
        v.push(&format!(" FROM {table}"));
        v.visit_joins(&query.joins)?;
        v.visit_wheres(&query.wheres)?;
        Ok(v.finish())
    }

    fn compile_delete_with_joins(&self, query: &QueryState) -> OrmResult<CompiledQuery> {
        let mut v = SqlVisitor::for_statement(self, query);
        let table = v.from_table_sql(query)?;
        if query.joins.is_empty() {
            let top = query.limit.map(|l| format!("TOP ({l}) ")).unwrap_or_default();
            v.push(&format!("DELETE {top}FROM {table}"));
        } else {
            let target = self.dml_target(&v, query)?;
            v.push(&format!("DELETE {target} FROM {table}"));
            v.visit_joins(&query.joins)?;
        }
        v.visit_wheres(&query.wheres)?;
        Ok(v.finish())
    }

    fn compile_truncate(&self, table: &str) -> OrmResult<Vec<CompiledQuery>> {
        let v = SqlVisitor::new(self);
        let table = v.wrap_table(table)?;
        Ok(vec![CompiledQuery::new(format!("TRUNCATE TABLE {table}"), Vec::new())])
    }

    fn compile_column_listing(&self, table: &str) -> CompiledQuery {
        CompiledQuery::new(
            "SELECT name AS column_name FROM sys.columns WHERE object_id = object_id(?)",
            vec![format!("{}{table}", self.prefix).into()],
        )
    }

    fn compile_exists(&self, query: &QueryState) -> OrmResult<CompiledQuery> {
        let mut v = SqlVisitor::for_statement(self, query);
        v.push("SELECT CASE WHEN EXISTS(");
        v.visit_select(query)?;
        v.push(") THEN 1 ELSE 0 END AS ");
        let alias = v.wrap_segment("exists");
        v.push(&alias);
        Ok(v.finish())
    }

    fn compile_begin(&self) -> &'static str {
        "BEGIN TRANSACTION"
    }

    fn compile_savepoint(&self, name: &str) -> String {
        format!("SAVE TRANSACTION {name}")
    }

    fn compile_savepoint_rollback(&self, name: &str) -> String {
        format!("ROLLBACK TRANSACTION {name}")
    }
}
