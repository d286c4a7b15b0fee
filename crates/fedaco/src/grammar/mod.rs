//! Dialect grammars.
//!
//! A [`Grammar`] is a stateless per-dialect rendering strategy (apart from its table
//! prefix). Compilation walks the builder's [`QueryState`] with a [`SqlVisitor`], which
//! asks the grammar for every dialect-specific fragment: identifier quoting, LIMIT/OFFSET,
//! JSON selectors, upserts, locks.
//!
//! All grammars render `?` placeholders. [`Grammar::to_wire_sql`] converts them to the
//! driver's native style right before execution.

mod mysql;
mod postgres;
mod sqlite;
mod sqlserver;
mod visitor;


pub use mysql::MySqlGrammar;
pub use postgres::PostgresGrammar;
pub use sqlite::SqliteGrammar;
pub use sqlserver::SqlServerGrammar;
pub use visitor::SqlVisitor;

use crate::config::DriverName;
use crate::error::{OrmError, OrmResult};
use crate::query::ast::{Expr, Lock, QueryState};
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

/// One insert row: ordered `(column, value)` pairs.
pub type Record = Vec<(String, Value)>;

/// Compiled SQL text with its positional bindings.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub bindings: Vec<Value>,
}

impl CompiledQuery {
    pub fn new(sql: impl Into<String>, bindings: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            bindings,
        }
    }
}

impl fmt::Display for CompiledQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

/// Placeholder syntax understood by a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `?`
    Question,
    /// `$1, $2, ...`
    Dollar,
    /// `@P1, @P2, ...`
    AtP,
}

/// Per-dialect SQL rendering.
///
/// Required methods are the fragments each dialect must decide for itself; the provided
/// `compile_*` methods assemble statements from them.
pub trait Grammar: fmt::Debug + Send + Sync {
    fn driver(&self) -> DriverName;

    /// Prefix prepended to every table reference.
    fn table_prefix(&self) -> &str;

    /// Opening and closing identifier quote.
    fn quote_chars(&self) -> (char, char) {
        ('"', '"')
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::Question
    }

    /// Render a JSON path selector over an already-wrapped column.
    fn wrap_json_selector(&self, column: &str, path: &[String]) -> String {
        format!("json_extract({column}, {})", json_path_literal(path))
    }

    /// `TOP n` style prefix placed after `SELECT [DISTINCT]`.
    fn select_top(&self, _limit: Option<u64>, _offset: Option<u64>) -> Option<String> {
        None
    }

    /// LIMIT/OFFSET suffix, including the leading space.
    fn compile_limit_offset(&self, limit: Option<u64>, offset: Option<u64>, _has_orders: bool) -> String {
        let mut out = String::new();
        if let Some(limit) = limit {
            out.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = offset {
            out.push_str(&format!(" OFFSET {offset}"));
        }
        out
    }

    /// Trailing lock clause, including the leading space.
    fn compile_lock(&self, lock: Lock) -> &'static str {
        match lock {
            Lock::Update => " FOR UPDATE",
            Lock::Shared => " FOR SHARE",
        }
    }

    /// Table hint placed after the FROM table.
    fn table_lock_hint(&self, _lock: Lock) -> &'static str {
        ""
    }

    /// Wrap one operand of a UNION.
    fn wrap_union_part(&self, sql: String) -> String {
        format!("({sql})")
    }

    fn random_order(&self) -> &'static str {
        "RANDOM()"
    }

    /// Whether SET columns of an UPDATE keep their table qualifier.
    fn qualify_update_columns(&self) -> bool {
        false
    }

    fn compile_empty_insert(&self, table: &str) -> String {
        format!("INSERT INTO {table} DEFAULT VALUES")
    }

    fn compile_insert_or_ignore(&self, _query: &QueryState, _rows: &[Record]) -> OrmResult<CompiledQuery> {
        Err(OrmError::compile(format!(
            "{} does not support inserting while ignoring errors",
            self.driver()
        )))
    }

    /// Insert one row and return its generated key in the result rows, when the dialect can.
    fn compile_insert_get_id(&self, query: &QueryState, row: &Record, _key: &str) -> OrmResult<CompiledQuery> {
        self.compile_insert(query, std::slice::from_ref(row))
    }

    fn compile_upsert(
        &self,
        query: &QueryState,
        rows: &[Record],
        unique_by: &[String],
        update: &[String],
    ) -> OrmResult<CompiledQuery>;

    /// UPDATE for statements carrying joins or a limit.
    fn compile_update_with_joins(&self, query: &QueryState, values: &[(String, Expr)]) -> OrmResult<CompiledQuery>;

    /// DELETE for statements carrying joins or a limit.
    fn compile_delete_with_joins(&self, query: &QueryState) -> OrmResult<CompiledQuery>;

    fn compile_truncate(&self, table: &str) -> OrmResult<Vec<CompiledQuery>>;

    fn compile_column_listing(&self, table: &str) -> CompiledQuery;

    fn compile_exists(&self, query: &QueryState) -> OrmResult<CompiledQuery> {
        let mut v = SqlVisitor::for_statement(self, query);
        v.push("SELECT EXISTS(");
        v.visit_select(query)?;
        v.push(") AS ");
        let alias = v.wrap_segment("exists");
        v.push(&alias);
        Ok(v.finish())
    }

    fn supports_savepoints(&self) -> bool {
        true
    }

    fn compile_begin(&self) -> &'static str {
        "BEGIN"
    }

    fn compile_savepoint(&self, name: &str) -> String {
        format!("SAVEPOINT {name}")
    }

    fn compile_savepoint_rollback(&self, name: &str) -> String {
        format!("ROLLBACK TO SAVEPOINT {name}")
    }

    // ==================== Provided compilation ====================

    fn compile_select(&self, query: &QueryState) -> OrmResult<CompiledQuery> {
        let mut v = SqlVisitor::for_statement(self, query);
        v.visit_select(query)?;
        Ok(v.finish())
    }

    fn compile_insert(&self, query: &QueryState, rows: &[Record]) -> OrmResult<CompiledQuery> {
        let mut v = SqlVisitor::for_statement(self, query);
        let table = v.insert_table(query)?;
        if rows.iter().all(Vec::is_empty) {
            if rows.len() > 1 {
                return Err(OrmError::compile("Cannot insert several empty rows"));
            }
            v.push(&self.compile_empty_insert(&table));
            return Ok(v.finish());
        }
        v.push(&format!("INSERT INTO {table} "));
        v.visit_insert_values(rows)?;
        Ok(v.finish())
    }

    fn compile_update(&self, query: &QueryState, values: &[(String, Expr)]) -> OrmResult<CompiledQuery> {
        if values.is_empty() {
            return Err(OrmError::compile("UPDATE requires at least one column"));
        }
        if !query.joins.is_empty() || query.limit.is_some() {
            return self.compile_update_with_joins(query, values);
        }
        let mut v = SqlVisitor::for_statement(self, query);
        let table = v.from_table_sql(query)?;
        v.push(&format!("UPDATE {table} SET "));
        v.visit_update_set(values)?;
        v.visit_wheres(&query.wheres)?;
        Ok(v.finish())
    }

    fn compile_delete(&self, query: &QueryState) -> OrmResult<CompiledQuery> {
        if !query.joins.is_empty() || query.limit.is_some() {
            return self.compile_delete_with_joins(query);
        }
        let mut v = SqlVisitor::for_statement(self, query);
        let table = v.from_table_sql(query)?;
        v.push(&format!("DELETE FROM {table}"));
        v.visit_wheres(&query.wheres)?;
        Ok(v.finish())
    }

    /// Convert `?` placeholders to the driver's style, skipping quoted literals and identifiers.
    fn to_wire_sql(&self, sql: &str) -> String {
        let style = self.placeholder_style();
        if style == PlaceholderStyle::Question {
            return sql.to_string();
        }
        let (open, close) = self.quote_chars();
        let mut out = String::with_capacity(sql.len() + 8);
        let mut n = 0usize;
        let mut in_literal = false;
        let mut in_ident = false;
        for c in sql.chars() {
            if in_literal {
                in_literal = c != '\'';
            } else if in_ident {
                in_ident = c != close;
            } else if c == '\'' {
                in_literal = true;
            } else if c == open {
                in_ident = true;
            } else if c == '?' {
                n += 1;
                match style {
                    PlaceholderStyle::Dollar => out.push_str(&format!("${n}")),
                    PlaceholderStyle::AtP => out.push_str(&format!("@P{n}")),
                    PlaceholderStyle::Question => out.push('?'),
                }
                continue;
            }
            out.push(c);
        }
        out
    }

    /// Quote a single identifier segment.
    fn quote_identifier(&self, name: &str) -> String {
        let (open, close) = self.quote_chars();
        let mut out = String::with_capacity(name.len() + 2);
        out.push(open);
        for ch in name.chars() {
            if ch == close {
                out.push(close);
            }
            out.push(ch);
        }
        out.push(close);
        out
    }

    fn date_format(&self) -> &'static str {
        "%Y-%m-%d %H:%M:%S"
    }
}

/// `'$."a"."b"'` path literal used by `json_extract`-style functions.
pub(crate) fn json_path_literal(path: &[String]) -> String {
    let mut out = String::from("'$");
    for seg in path {
        if seg.chars().all(|c| c.is_ascii_digit()) {
            out.push_str(&format!("[{seg}]"));
        } else {
            out.push_str(&format!(".\"{}\"", seg.replace('\'', "''")));
        }
    }
    out.push('\'');
    out
}

/// Grammar for a configured driver.
pub fn for_driver(driver: DriverName, prefix: impl Into<String>) -> Arc<dyn Grammar> {
    let prefix = prefix.into();
    match driver {
        DriverName::Mysql => Arc::new(MySqlGrammar::new(prefix)),
        DriverName::Pgsql => Arc::new(PostgresGrammar::new(prefix)),
        DriverName::Sqlite => Arc::new(SqliteGrammar::new(prefix)),
        DriverName::Sqlsrv => Arc::new(SqlServerGrammar::new(prefix)),
    }
}
