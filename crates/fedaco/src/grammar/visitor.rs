//! AST walker shared by every dialect.

use super::{CompiledQuery, Grammar, Record};
use crate::error::{OrmError, OrmResult};
use crate::ident::Ident;
use crate::query::ast::{
    split_table_alias, Expr, InValues, JoinKind, JoinNode, Order, Predicate, QueryState, TableRef,
    WhereClause,
};
use crate::value::Value;
use std::collections::HashSet;

/// Renders AST nodes into SQL text, collecting bindings in placeholder order.
///
/// Aliases declared anywhere in the statement are gathered up front so that
/// qualifiers referring to them never receive the table prefix.
#[derive(Debug)]
pub struct SqlVisitor<'g, G: Grammar + ?Sized> {
    grammar: &'g G,
    sql: String,
    bindings: Vec<Value>,
    aliases: HashSet<String>,
}

impl<'g, G: Grammar + ?Sized> SqlVisitor<'g, G> {
    pub fn new(grammar: &'g G) -> Self {
        Self {
            grammar,
            sql: String::with_capacity(128),
            bindings: Vec::new(),
            aliases: HashSet::new(),
        }
    }

    /// Visitor primed with the aliases declared by `state`.
    pub fn for_statement(grammar: &'g G, state: &QueryState) -> Self {
        let mut v = Self::new(grammar);
        collect_aliases(state, &mut v.aliases);
        v
    }

    pub fn grammar(&self) -> &'g G {
        self.grammar
    }

    pub fn finish(self) -> CompiledQuery {
        CompiledQuery {
            sql: self.sql,
            bindings: self.bindings,
        }
    }

    pub fn push(&mut self, s: &str) {
        self.sql.push_str(s);
    }

    /// Emit a placeholder bound to `value`.
    pub fn bind(&mut self, value: Value) {
        self.sql.push('?');
        self.bindings.push(value);
    }

    /// Emit a raw fragment, checking its placeholder count against its bindings.
    pub fn push_raw(&mut self, sql: &str, bindings: &[Value]) -> OrmResult<()> {
        let placeholders = count_placeholders(sql);
        if placeholders != bindings.len() {
            return Err(OrmError::compile(format!(
                "Raw expression '{sql}' has {placeholders} placeholder(s) but {} binding(s)",
                bindings.len()
            )));
        }
        self.sql.push_str(sql);
        self.bindings.extend(bindings.iter().cloned());
        Ok(())
    }

    /// Render into a detached string; bindings are still appended in order.
    pub fn capture<F>(&mut self, f: F) -> OrmResult<String>
    where
        F: FnOnce(&mut Self) -> OrmResult<()>,
    {
        let outer = std::mem::take(&mut self.sql);
        let result = f(self);
        let inner = std::mem::replace(&mut self.sql, outer);
        result.map(|()| inner)
    }

    // ==================== Identifiers ====================

    /// Quote one segment; `*` stays bare.
    pub fn wrap_segment(&self, segment: &str) -> String {
        if segment == "*" {
            "*".to_string()
        } else {
            self.grammar.quote_identifier(segment)
        }
    }

    fn prefixed(&self, table: &str) -> String {
        if self.aliases.contains(table) {
            table.to_string()
        } else {
            format!("{}{table}", self.grammar.table_prefix())
        }
    }

    /// Wrap a table reference (`schema.table as alias`), prefixing the table but never the alias.
    pub fn wrap_table(&self, table: &str) -> OrmResult<String> {
        let (name, alias) = split_table_alias(table);
        let ident = Ident::parse(name)?;
        let last = ident.segments.len() - 1;
        let wrapped: Vec<String> = ident
            .segments
            .iter()
            .enumerate()
            .map(|(i, seg)| {
                if i == last {
                    self.wrap_segment(&format!("{}{seg}", self.grammar.table_prefix()))
                } else {
                    self.wrap_segment(seg)
                }
            })
            .collect();
        let mut out = wrapped.join(".");
        if let Some(alias) = alias {
            out.push_str(" AS ");
            out.push_str(&self.wrap_segment(alias));
        }
        Ok(out)
    }

    /// Wrap a column reference, applying JSON selectors and `AS` aliases.
    pub fn wrap(&self, column: &str) -> OrmResult<String> {
        let ident = Ident::parse(column)?;
        let mut out = self.wrap_ident(&ident);
        if ident.is_json() {
            out = self.grammar.wrap_json_selector(&out, &ident.json_path);
        }
        if let Some(alias) = &ident.alias {
            out.push_str(" AS ");
            out.push_str(&self.wrap_segment(alias));
        }
        Ok(out)
    }

    fn wrap_ident(&self, ident: &Ident) -> String {
        let n = ident.segments.len();
        ident
            .segments
            .iter()
            .enumerate()
            .map(|(i, seg)| {
                if n >= 2 && i == n - 2 {
                    self.wrap_segment(&self.prefixed(seg))
                } else {
                    self.wrap_segment(seg)
                }
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    // ==================== SELECT ====================

    /// Render a full select statement, including unions and aggregates.
    pub fn visit_select(&mut self, q: &QueryState) -> OrmResult<()> {
        if let Some(aggregate) = &q.aggregate {
            let needs_wrap = !q.unions.is_empty()
                || q.limit.is_some()
                || q.offset.is_some()
                || !q.groups.is_empty()
                || !q.havings.is_empty()
                || (q.distinct && aggregate.columns.iter().all(|c| c == "*"));
            if needs_wrap {
                return self.visit_wrapped_aggregate(q);
            }
            return self.visit_aggregate(q);
        }

        if q.unions.is_empty() {
            return self.visit_select_core(q);
        }

        let core = self.capture(|v| v.visit_select_core(q))?;
        let core = self.grammar.wrap_union_part(core);
        self.push(&core);
        for union in &q.unions {
            self.push(if union.all { " UNION ALL " } else { " UNION " });
            let part = self.capture(|v| v.visit_select(&union.query))?;
            let part = self.grammar.wrap_union_part(part);
            self.push(&part);
        }
        if !q.union_orders.is_empty() {
            self.push(" ORDER BY ");
            self.visit_orders(&q.union_orders)?;
        }
        let suffix =
            self.grammar
                .compile_limit_offset(q.union_limit, q.union_offset, !q.union_orders.is_empty());
        self.push(&suffix);
        Ok(())
    }

    fn visit_select_core(&mut self, q: &QueryState) -> OrmResult<()> {
        self.push("SELECT ");
        if q.distinct {
            self.push("DISTINCT ");
        }
        let top = self.grammar.select_top(q.limit, q.offset);
        if let Some(top) = &top {
            self.push(top);
            self.push(" ");
        }
        self.visit_columns(&q.columns)?;
        self.visit_from(q)?;
        self.visit_joins(&q.joins)?;
        self.visit_wheres(&q.wheres)?;
        if !q.groups.is_empty() {
            self.push(" GROUP BY ");
            self.visit_expr_list(&q.groups)?;
        }
        if !q.havings.is_empty() {
            self.push(" HAVING ");
            self.visit_where_list(&q.havings)?;
        }
        if !q.orders.is_empty() {
            self.push(" ORDER BY ");
            self.visit_orders(&q.orders)?;
        }
        if top.is_none() {
            let suffix = self
                .grammar
                .compile_limit_offset(q.limit, q.offset, !q.orders.is_empty());
            self.push(&suffix);
        }
        if let Some(lock) = q.lock {
            self.push(self.grammar.compile_lock(lock));
        }
        Ok(())
    }

    fn aggregate_sql(&self, function: &str, columns: &[String], distinct: bool) -> OrmResult<String> {
        let mut cols = Vec::with_capacity(columns.len());
        for c in columns {
            cols.push(self.wrap(c)?);
        }
        let cols = if cols.is_empty() { "*".to_string() } else { cols.join(", ") };
        let distinct = if distinct && cols != "*" { "DISTINCT " } else { "" };
        Ok(format!(
            "{}({distinct}{cols}) AS {}",
            function.to_ascii_uppercase(),
            self.wrap_segment("aggregate")
        ))
    }

    fn visit_aggregate(&mut self, q: &QueryState) -> OrmResult<()> {
        let Some(aggregate) = &q.aggregate else {
            return Err(OrmError::compile("Aggregate projection missing"));
        };
        let columns = if q.distinct && aggregate.columns.iter().all(|c| c == "*") {
            Vec::new()
        } else {
            aggregate.columns.clone()
        };
        let projection = self.aggregate_sql(&aggregate.function, &columns, q.distinct)?;
        self.push("SELECT ");
        self.push(&projection);
        self.visit_from(q)?;
        self.visit_joins(&q.joins)?;
        self.visit_wheres(&q.wheres)?;
        Ok(())
    }

    fn visit_wrapped_aggregate(&mut self, q: &QueryState) -> OrmResult<()> {
        let Some(aggregate) = &q.aggregate else {
            return Err(OrmError::compile("Aggregate projection missing"));
        };
        let mut inner = q.clone();
        inner.aggregate = None;
        if inner.columns.is_empty() && !aggregate.columns.iter().all(|c| c == "*") {
            inner.columns = aggregate.columns.iter().map(Expr::column).collect();
        }
        let outer_columns: Vec<String> = aggregate
            .columns
            .iter()
            .map(|c| if c == "*" { c.clone() } else { crate::ident::output_name(c) })
            .collect();
        let projection = self.aggregate_sql(&aggregate.function, &outer_columns, false)?;
        self.push("SELECT ");
        self.push(&projection);
        self.push(" FROM (");
        self.visit_select(&inner)?;
        self.push(") AS ");
        let alias = self.wrap_segment("temp_table");
        self.push(&alias);
        Ok(())
    }

    fn visit_columns(&mut self, columns: &[Expr]) -> OrmResult<()> {
        if columns.is_empty() {
            self.push("*");
            return Ok(());
        }
        self.visit_expr_list(columns)
    }

    fn visit_from(&mut self, q: &QueryState) -> OrmResult<()> {
        if let Some(from) = &q.from {
            self.push(" FROM ");
            self.visit_table(from)?;
            if let Some(lock) = q.lock {
                self.push(self.grammar.table_lock_hint(lock));
            }
        }
        Ok(())
    }

    pub fn visit_table(&mut self, table: &TableRef) -> OrmResult<()> {
        match table {
            TableRef::Table(name) => {
                let wrapped = self.wrap_table(name)?;
                self.push(&wrapped);
            }
            TableRef::Sub { query, alias } => {
                self.push("(");
                self.visit_select(query)?;
                self.push(") AS ");
                let alias = self.wrap_segment(alias);
                self.push(&alias);
            }
            TableRef::Raw { sql, bindings } => self.push_raw(sql, bindings)?,
        }
        Ok(())
    }

    pub fn visit_joins(&mut self, joins: &[JoinNode]) -> OrmResult<()> {
        for join in joins {
            self.push(" ");
            self.push(join.kind.as_sql());
            self.push(" ");
            self.visit_table(&join.table)?;
            if join.kind == JoinKind::Cross {
                continue;
            }
            if join.on.is_empty() {
                return Err(OrmError::compile("JOIN requires at least one ON condition"));
            }
            self.push(" ON ");
            self.visit_where_list(&join.on)?;
        }
        Ok(())
    }

    /// ` WHERE ...`, or nothing for an empty list.
    pub fn visit_wheres(&mut self, wheres: &[WhereClause]) -> OrmResult<()> {
        if wheres.is_empty() {
            return Ok(());
        }
        self.push(" WHERE ");
        self.visit_where_list(wheres)
    }

    pub fn visit_where_list(&mut self, wheres: &[WhereClause]) -> OrmResult<()> {
        for (i, w) in wheres.iter().enumerate() {
            if i > 0 {
                self.push(" ");
                self.push(w.boolean.as_sql());
                self.push(" ");
            }
            self.visit_predicate(&w.predicate)?;
        }
        Ok(())
    }

    pub fn visit_predicate(&mut self, predicate: &Predicate) -> OrmResult<()> {
        match predicate {
            Predicate::Binary { left, op, right } => {
                self.visit_expr(left)?;
                self.push(" ");
                self.push(&render_operator(op));
                self.push(" ");
                self.visit_expr(right)?;
            }
            Predicate::Between {
                expr,
                low,
                high,
                negated,
            } => {
                self.visit_expr(expr)?;
                self.push(if *negated { " NOT BETWEEN " } else { " BETWEEN " });
                self.visit_expr(low)?;
                self.push(" AND ");
                self.visit_expr(high)?;
            }
            Predicate::In {
                expr,
                values,
                negated,
            } => match values {
                InValues::List(list) if list.is_empty() => {
                    self.push(if *negated { "1 = 1" } else { "0 = 1" });
                }
                InValues::List(list) => {
                    self.visit_expr(expr)?;
                    self.push(if *negated { " NOT IN (" } else { " IN (" });
                    self.visit_expr_list(list)?;
                    self.push(")");
                }
                InValues::Sub(query) => {
                    self.visit_expr(expr)?;
                    self.push(if *negated { " NOT IN (" } else { " IN (" });
                    self.visit_select(query)?;
                    self.push(")");
                }
            },
            Predicate::Null { expr, negated } => {
                self.visit_expr(expr)?;
                self.push(if *negated { " IS NOT NULL" } else { " IS NULL" });
            }
            Predicate::Exists { query, negated } => {
                self.push(if *negated { "NOT EXISTS (" } else { "EXISTS (" });
                self.visit_select(query)?;
                self.push(")");
            }
            Predicate::Nested(inner) => {
                if inner.is_empty() {
                    return Err(OrmError::compile("Empty nested predicate group"));
                }
                self.push("(");
                self.visit_where_list(inner)?;
                self.push(")");
            }
            Predicate::Raw { sql, bindings } => self.push_raw(sql, bindings)?,
        }
        Ok(())
    }

    pub fn visit_expr_list(&mut self, exprs: &[Expr]) -> OrmResult<()> {
        for (i, e) in exprs.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.visit_expr(e)?;
        }
        Ok(())
    }

    pub fn visit_expr(&mut self, expr: &Expr) -> OrmResult<()> {
        match expr {
            Expr::Column(c) => {
                let wrapped = self.wrap(c)?;
                self.push(&wrapped);
            }
            Expr::Value(v) => self.bind(v.clone()),
            Expr::Raw { sql, bindings } => self.push_raw(sql, bindings)?,
            Expr::Function {
                name,
                args,
                distinct,
            } => {
                if name.is_empty() {
                    return Err(OrmError::compile("Function call without a name"));
                }
                self.push(&name.to_ascii_uppercase());
                self.push("(");
                if *distinct {
                    self.push("DISTINCT ");
                }
                if args.is_empty() {
                    self.push("*");
                } else {
                    self.visit_expr_list(args)?;
                }
                self.push(")");
            }
            Expr::Sub { query, alias } => {
                self.push("(");
                self.visit_select(query)?;
                self.push(")");
                if let Some(alias) = alias {
                    self.push(" AS ");
                    let alias = self.wrap_segment(alias);
                    self.push(&alias);
                }
            }
            Expr::Arithmetic { left, op, right } => {
                self.visit_expr(left)?;
                self.push(" ");
                self.push(op);
                self.push(" ");
                self.visit_expr(right)?;
            }
        }
        Ok(())
    }

    pub fn visit_orders(&mut self, orders: &[Order]) -> OrmResult<()> {
        for (i, order) in orders.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            match order {
                Order::By { expr, direction } => {
                    self.visit_expr(expr)?;
                    self.push(" ");
                    self.push(direction.as_sql());
                }
                Order::Raw { sql, bindings } => self.push_raw(sql, bindings)?,
                Order::Random => self.push(self.grammar.random_order()),
            }
        }
        Ok(())
    }

    // ==================== DML helpers ====================

    /// Wrapped FROM table of a DML statement.
    pub fn from_table_sql(&self, q: &QueryState) -> OrmResult<String> {
        match &q.from {
            Some(TableRef::Table(t)) => self.wrap_table(t),
            _ => Err(OrmError::compile("Statement requires a plain table in FROM")),
        }
    }

    /// Wrapped insert target; aliases are not allowed on inserts.
    pub fn insert_table(&self, q: &QueryState) -> OrmResult<String> {
        let table = q
            .from_table()
            .ok_or_else(|| OrmError::compile("INSERT requires a table"))?;
        self.wrap_table(table)
    }

    /// Column list shared by every row, in the first row's order.
    pub fn insert_columns(rows: &[Record]) -> OrmResult<Vec<String>> {
        let first = rows
            .first()
            .ok_or_else(|| OrmError::compile("INSERT requires at least one row"))?;
        let columns: Vec<String> = first.iter().map(|(c, _)| c.clone()).collect();
        for row in &rows[1..] {
            if row.len() != columns.len() || row.iter().any(|(c, _)| !columns.contains(c)) {
                return Err(OrmError::compile(
                    "Every inserted row must provide the same columns",
                ));
            }
        }
        Ok(columns)
    }

    /// `(a, b)`
    pub fn column_list(&self, columns: &[String]) -> OrmResult<String> {
        let mut wrapped = Vec::with_capacity(columns.len());
        for c in columns {
            wrapped.push(self.wrap(c)?);
        }
        Ok(format!("({})", wrapped.join(", ")))
    }

    /// `(?, ?), (?, ?)` with rows reordered to `columns`.
    pub fn visit_value_rows(&mut self, rows: &[Record], columns: &[String]) -> OrmResult<()> {
        for (i, row) in rows.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.push("(");
            for (j, column) in columns.iter().enumerate() {
                if j > 0 {
                    self.push(", ");
                }
                let value = row
                    .iter()
                    .find(|(c, _)| c == column)
                    .map(|(_, v)| v.clone())
                    .ok_or_else(|| OrmError::compile(format!("Missing insert column '{column}'")))?;
                self.bind(value);
            }
            self.push(")");
        }
        Ok(())
    }

    /// `(a, b) VALUES (?, ?), ...`
    pub fn visit_insert_values(&mut self, rows: &[Record]) -> OrmResult<Vec<String>> {
        let columns = Self::insert_columns(rows)?;
        let list = self.column_list(&columns)?;
        self.push(&list);
        self.push(" VALUES ");
        self.visit_value_rows(rows, &columns)?;
        Ok(columns)
    }

    /// `a = ?, b = "b" + ?`
    pub fn visit_update_set(&mut self, values: &[(String, Expr)]) -> OrmResult<()> {
        for (i, (column, expr)) in values.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            let ident = Ident::parse(column)?;
            if ident.is_json() || ident.alias.is_some() {
                return Err(OrmError::compile(format!(
                    "Cannot assign to '{column}' in an UPDATE"
                )));
            }
            let wrapped = if self.grammar.qualify_update_columns() {
                self.wrap_ident(&ident)
            } else {
                self.wrap_segment(ident.last())
            };
            self.push(&wrapped);
            self.push(" = ");
            self.visit_expr(expr)?;
        }
        Ok(())
    }

    /// `UPDATE t SET ... WHERE key IN (SELECT t.key FROM t JOIN ... WHERE ...)`.
    pub fn visit_keyed_update(
        &mut self,
        q: &QueryState,
        values: &[(String, Expr)],
        key: &str,
    ) -> OrmResult<()> {
        let table = self.from_table_sql(q)?;
        self.push(&format!("UPDATE {table} SET "));
        self.visit_update_set(values)?;
        self.visit_key_subselect(q, key)
    }

    /// `DELETE FROM t WHERE key IN (SELECT t.key FROM t JOIN ... WHERE ...)`.
    pub fn visit_keyed_delete(&mut self, q: &QueryState, key: &str) -> OrmResult<()> {
        let table = self.from_table_sql(q)?;
        self.push(&format!("DELETE FROM {table}"));
        self.visit_key_subselect(q, key)
    }

    fn visit_key_subselect(&mut self, q: &QueryState, key: &str) -> OrmResult<()> {
        let reference = q
            .from_reference()
            .ok_or_else(|| OrmError::compile("Statement requires a table"))?
            .to_string();
        let mut sub = q.clone();
        sub.columns = vec![Expr::column(format!("{reference}.{key}"))];
        sub.aggregate = None;
        sub.lock = None;
        sub.unions.clear();
        self.push(" WHERE ");
        let wrapped = self.wrap_segment(key);
        self.push(&wrapped);
        self.push(" IN (");
        self.visit_select(&sub)?;
        self.push(")");
        Ok(())
    }
}

/// Upper-case word operators (`like` -> `LIKE`); symbols pass through.
fn render_operator(op: &str) -> String {
    if op.chars().any(|c| c.is_ascii_alphabetic()) {
        op.to_ascii_uppercase()
    } else {
        op.to_string()
    }
}

/// Count `?` placeholders outside single-quoted literals.
pub(crate) fn count_placeholders(sql: &str) -> usize {
    let mut in_literal = false;
    let mut n = 0;
    for c in sql.chars() {
        match c {
            '\'' => in_literal = !in_literal,
            '?' if !in_literal => n += 1,
            _ => {}
        }
    }
    n
}

fn collect_table_alias(table: &TableRef, out: &mut HashSet<String>) {
    match table {
        TableRef::Table(t) => {
            if let (_, Some(alias)) = split_table_alias(t) {
                out.insert(alias.to_string());
            }
        }
        TableRef::Sub { query, alias } => {
            out.insert(alias.clone());
            collect_aliases(query, out);
        }
        TableRef::Raw { .. } => {}
    }
}

fn collect_expr_aliases(expr: &Expr, out: &mut HashSet<String>) {
    match expr {
        Expr::Sub { query, .. } => collect_aliases(query, out),
        Expr::Function { args, .. } => args.iter().for_each(|a| collect_expr_aliases(a, out)),
        Expr::Arithmetic { left, right, .. } => {
            collect_expr_aliases(left, out);
            collect_expr_aliases(right, out);
        }
        Expr::Column(_) | Expr::Value(_) | Expr::Raw { .. } => {}
    }
}

fn collect_where_aliases(wheres: &[WhereClause], out: &mut HashSet<String>) {
    for w in wheres {
        match &w.predicate {
            Predicate::Exists { query, .. } => collect_aliases(query, out),
            Predicate::In {
                values: InValues::Sub(query),
                ..
            } => collect_aliases(query, out),
            Predicate::Binary { left, right, .. } => {
                collect_expr_aliases(left, out);
                collect_expr_aliases(right, out);
            }
            Predicate::Nested(inner) => collect_where_aliases(inner, out),
            _ => {}
        }
    }
}

/// Gather every alias declared in FROM/JOIN sources of a statement and its sub-selects.
pub(crate) fn collect_aliases(state: &QueryState, out: &mut HashSet<String>) {
    if let Some(from) = &state.from {
        collect_table_alias(from, out);
    }
    for join in &state.joins {
        collect_table_alias(&join.table, out);
        collect_where_aliases(&join.on, out);
    }
    state.columns.iter().for_each(|c| collect_expr_aliases(c, out));
    collect_where_aliases(&state.wheres, out);
    collect_where_aliases(&state.havings, out);
    for union in &state.unions {
        collect_aliases(&union.query, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_placeholders_outside_literals() {
        assert_eq!(count_placeholders("a = ? and b = '?'"), 1);
        assert_eq!(count_placeholders("a in (?, ?)"), 2);
    }

    #[test]
    fn operators_are_uppercased() {
        assert_eq!(render_operator("like"), "LIKE");
        assert_eq!(render_operator("not ilike"), "NOT ILIKE");
        assert_eq!(render_operator(">="), ">=");
    }
}
