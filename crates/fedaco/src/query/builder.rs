//! Fluent statement builder.

use super::ast::{
    Aggregate, Boolean, Direction, Expr, InValues, JoinKind, Lock, Order, Predicate, QueryState,
    TableRef, Union, WhereClause,
};
use super::bindings::Bindings;
use super::join::JoinClause;
use crate::connection::Connection;
use crate::error::{OrmError, OrmResult};
use crate::grammar::{CompiledQuery, Grammar, Record};
use crate::ident::output_name;
use crate::row::{FromRow, Row};
use crate::value::Value;
use std::sync::Arc;

const OPERATORS: &[&str] = &[
    "=", "<", ">", "<=", ">=", "<>", "!=", "<=>", "like", "like binary", "not like", "ilike",
    "not ilike", "&", "|", "^", "<<", ">>", "&~", "rlike", "not rlike", "regexp", "not regexp",
    "~", "~*", "!~", "!~*", "similar to", "not similar to", "~~*", "!~~*",
];

/// Check a comparison operator against the supported set (case-insensitive).
pub(crate) fn validate_operator(op: &str) -> Result<(), String> {
    let lower = op.trim().to_ascii_lowercase();
    if OPERATORS.contains(&lower.as_str()) {
        Ok(())
    } else {
        Err(format!("Illegal operator '{op}'"))
    }
}

/// Collect `(column, value)` pairs into an insert record.
pub fn record<I, K, V>(pairs: I) -> Record
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}

/// Fluent builder for one SELECT/INSERT/UPDATE/DELETE statement.
///
/// Every clause method consumes and returns the builder. Clone before diverging into a
/// second statement; clones share no clause state.
///
/// # Example
/// ```ignore
/// let q = conn.table("users").where_("votes", ">", 100).order_by("name").limit(5);
/// let rows = q.get().await?;
/// ```
#[derive(Clone, Debug)]
pub struct QueryBuilder {
    state: QueryState,
    grammar: Arc<dyn Grammar>,
    connection: Option<Arc<Connection>>,
    use_write_connection: bool,
    build_error: Option<String>,
}

impl QueryBuilder {
    /// Detached builder that can compile but not execute.
    pub fn new(grammar: Arc<dyn Grammar>) -> Self {
        Self {
            state: QueryState::default(),
            grammar,
            connection: None,
            use_write_connection: false,
            build_error: None,
        }
    }

    /// Builder bound to a connection.
    pub fn with_connection(connection: Arc<Connection>) -> Self {
        Self {
            state: QueryState::default(),
            grammar: connection.grammar().clone(),
            connection: Some(connection),
            use_write_connection: false,
            build_error: None,
        }
    }

    /// Fresh builder on the same grammar and connection.
    pub fn new_query(&self) -> Self {
        Self {
            state: QueryState::default(),
            grammar: self.grammar.clone(),
            connection: self.connection.clone(),
            use_write_connection: false,
            build_error: None,
        }
    }

    /// Fresh builder on the same FROM source, used for nested predicate groups.
    pub fn fork(&self) -> Self {
        let mut q = self.new_query();
        q.state.from = self.state.from.clone();
        q
    }

    pub fn state(&self) -> &QueryState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut QueryState {
        &mut self.state
    }

    pub fn into_state(self) -> QueryState {
        self.state
    }

    pub fn grammar(&self) -> &Arc<dyn Grammar> {
        &self.grammar
    }

    pub fn connection(&self) -> Option<&Arc<Connection>> {
        self.connection.as_ref()
    }

    /// Plain FROM table name, without alias.
    pub fn from_table(&self) -> Option<&str> {
        self.state.from_table()
    }

    /// First recorded build error, if any.
    pub fn build_error(&self) -> Option<&str> {
        self.build_error.as_deref()
    }

    pub(crate) fn record_error(&mut self, message: impl Into<String>) {
        if self.build_error.is_none() {
            self.build_error = Some(message.into());
        }
    }

    /// Inherit the build error of a sub-builder and take its state.
    fn absorb(&mut self, other: QueryBuilder) -> QueryState {
        if let Some(e) = other.build_error {
            self.record_error(e);
        }
        other.state
    }

    fn validate(&self) -> OrmResult<()> {
        match &self.build_error {
            Some(e) => Err(OrmError::Compile(e.clone())),
            None => Ok(()),
        }
    }

    // ==================== FROM ====================

    /// Set the table (`users` or `users as u`).
    pub fn from(mut self, table: &str) -> Self {
        self.state.from = Some(TableRef::Table(table.to_string()));
        self
    }

    /// Select from an aliased sub-query.
    pub fn from_sub(mut self, query: QueryBuilder, alias: &str) -> Self {
        let state = self.absorb(query);
        self.state.from = Some(TableRef::Sub {
            query: Box::new(state),
            alias: alias.to_string(),
        });
        self
    }

    pub fn from_raw(mut self, sql: &str, bindings: Vec<Value>) -> Self {
        self.state.from = Some(TableRef::Raw {
            sql: sql.to_string(),
            bindings,
        });
        self
    }

    // ==================== SELECT columns ====================

    /// Replace the select list.
    pub fn select(mut self, columns: &[&str]) -> Self {
        self.state.columns = columns.iter().map(|c| Expr::column(*c)).collect();
        self
    }

    /// Append to the select list.
    pub fn add_select(mut self, columns: &[&str]) -> Self {
        self.state
            .columns
            .extend(columns.iter().map(|c| Expr::column(*c)));
        self
    }

    /// Append an arbitrary expression to the select list.
    pub fn add_select_expr(mut self, expr: Expr) -> Self {
        self.state.columns.push(expr);
        self
    }

    pub fn select_raw(mut self, sql: &str, bindings: Vec<Value>) -> Self {
        self.state.columns.push(Expr::Raw {
            sql: sql.to_string(),
            bindings,
        });
        self
    }

    /// Append `(sub-select) AS alias` to the select list.
    pub fn select_sub(mut self, query: QueryBuilder, alias: &str) -> Self {
        let state = self.absorb(query);
        self.state.columns.push(Expr::Sub {
            query: Box::new(state),
            alias: Some(alias.to_string()),
        });
        self
    }

    pub fn distinct(mut self) -> Self {
        self.state.distinct = true;
        self
    }

    // ==================== JOIN ====================

    fn push_join(mut self, join: JoinClause) -> Self {
        let (node, error) = join.into_parts();
        if let Some(e) = error {
            self.record_error(e);
        }
        self.state.joins.push(node);
        self
    }

    /// `INNER JOIN table ON first op second`
    pub fn join(self, table: &str, first: &str, op: &str, second: &str) -> Self {
        let join = JoinClause::new(JoinKind::Inner, TableRef::Table(table.to_string()))
            .on(first, op, second);
        self.push_join(join)
    }

    pub fn left_join(self, table: &str, first: &str, op: &str, second: &str) -> Self {
        let join = JoinClause::new(JoinKind::Left, TableRef::Table(table.to_string()))
            .on(first, op, second);
        self.push_join(join)
    }

    pub fn right_join(self, table: &str, first: &str, op: &str, second: &str) -> Self {
        let join = JoinClause::new(JoinKind::Right, TableRef::Table(table.to_string()))
            .on(first, op, second);
        self.push_join(join)
    }

    pub fn cross_join(self, table: &str) -> Self {
        self.push_join(JoinClause::new(
            JoinKind::Cross,
            TableRef::Table(table.to_string()),
        ))
    }

    /// `INNER JOIN table ON column op ?`
    pub fn join_where(self, table: &str, column: &str, op: &str, value: impl Into<Value>) -> Self {
        let join = JoinClause::new(JoinKind::Inner, TableRef::Table(table.to_string()))
            .where_(column, op, value);
        self.push_join(join)
    }

    /// Join with a closure building the ON list.
    pub fn join_with<F>(self, kind: JoinKind, table: &str, f: F) -> Self
    where
        F: FnOnce(JoinClause) -> JoinClause,
    {
        let join = f(JoinClause::new(kind, TableRef::Table(table.to_string())));
        self.push_join(join)
    }

    /// `INNER JOIN (sub) AS alias ON first op second`
    pub fn join_sub(self, query: QueryBuilder, alias: &str, first: &str, op: &str, second: &str) -> Self {
        self.join_sub_kind(JoinKind::Inner, query, alias, first, op, second)
    }

    pub fn left_join_sub(self, query: QueryBuilder, alias: &str, first: &str, op: &str, second: &str) -> Self {
        self.join_sub_kind(JoinKind::Left, query, alias, first, op, second)
    }

    fn join_sub_kind(
        mut self,
        kind: JoinKind,
        query: QueryBuilder,
        alias: &str,
        first: &str,
        op: &str,
        second: &str,
    ) -> Self {
        let state = self.absorb(query);
        let table = TableRef::Sub {
            query: Box::new(state),
            alias: alias.to_string(),
        };
        let join = JoinClause::new(kind, table).on(first, op, second);
        self.push_join(join)
    }

    // ==================== WHERE ====================

    fn push_where(mut self, boolean: Boolean, predicate: Predicate) -> Self {
        self.state.wheres.push(WhereClause { boolean, predicate });
        self
    }

    fn compare(mut self, boolean: Boolean, column: &str, op: &str, value: Value) -> Self {
        if let Err(e) = validate_operator(op) {
            self.record_error(e);
            return self;
        }
        if value.is_null() {
            match op.trim() {
                "=" => return self.null_check(boolean, column, false),
                "!=" | "<>" => return self.null_check(boolean, column, true),
                _ => {
                    self.record_error(format!(
                        "Operator '{op}' cannot be compared against NULL"
                    ));
                    return self;
                }
            }
        }
        self.push_where(
            boolean,
            Predicate::Binary {
                left: Expr::column(column),
                op: op.trim().to_string(),
                right: Expr::Value(value),
            },
        )
    }

    /// `WHERE column op ?`. A `NULL` value with `=`/`!=`/`<>` becomes `IS [NOT] NULL`.
    pub fn where_(self, column: &str, op: &str, value: impl Into<Value>) -> Self {
        self.compare(Boolean::And, column, op, value.into())
    }

    /// `WHERE column = ?`
    pub fn where_eq(self, column: &str, value: impl Into<Value>) -> Self {
        self.compare(Boolean::And, column, "=", value.into())
    }

    pub fn or_where(self, column: &str, op: &str, value: impl Into<Value>) -> Self {
        self.compare(Boolean::Or, column, op, value.into())
    }

    pub fn or_where_eq(self, column: &str, value: impl Into<Value>) -> Self {
        self.compare(Boolean::Or, column, "=", value.into())
    }

    fn column_compare(mut self, boolean: Boolean, first: &str, op: &str, second: &str) -> Self {
        if let Err(e) = validate_operator(op) {
            self.record_error(e);
            return self;
        }
        self.push_where(
            boolean,
            Predicate::Binary {
                left: Expr::column(first),
                op: op.trim().to_string(),
                right: Expr::column(second),
            },
        )
    }

    /// `WHERE first op second` comparing two columns.
    pub fn where_column(self, first: &str, op: &str, second: &str) -> Self {
        self.column_compare(Boolean::And, first, op, second)
    }

    pub fn or_where_column(self, first: &str, op: &str, second: &str) -> Self {
        self.column_compare(Boolean::Or, first, op, second)
    }

    /// `WHERE column op (sub-select)`
    pub fn where_sub(mut self, column: &str, op: &str, query: QueryBuilder) -> Self {
        if let Err(e) = validate_operator(op) {
            self.record_error(e);
            return self;
        }
        let state = self.absorb(query);
        self.push_where(
            Boolean::And,
            Predicate::Binary {
                left: Expr::column(column),
                op: op.trim().to_string(),
                right: Expr::Sub {
                    query: Box::new(state),
                    alias: None,
                },
            },
        )
    }

    /// `WHERE (sub-select) op ?`, used to compare relation counts.
    pub fn where_sub_value(
        mut self,
        boolean: Boolean,
        query: QueryBuilder,
        op: &str,
        value: impl Into<Value>,
    ) -> Self {
        if let Err(e) = validate_operator(op) {
            self.record_error(e);
            return self;
        }
        let state = self.absorb(query);
        self.push_where(
            boolean,
            Predicate::Binary {
                left: Expr::Sub {
                    query: Box::new(state),
                    alias: None,
                },
                op: op.trim().to_string(),
                right: Expr::Value(value.into()),
            },
        )
    }

    /// Add a predicate node directly.
    pub fn where_predicate(self, boolean: Boolean, predicate: Predicate) -> Self {
        self.push_where(boolean, predicate)
    }

    pub fn where_raw(self, sql: &str, bindings: Vec<Value>) -> Self {
        self.push_where(
            Boolean::And,
            Predicate::Raw {
                sql: sql.to_string(),
                bindings,
            },
        )
    }

    pub fn or_where_raw(self, sql: &str, bindings: Vec<Value>) -> Self {
        self.push_where(
            Boolean::Or,
            Predicate::Raw {
                sql: sql.to_string(),
                bindings,
            },
        )
    }

    fn in_list<I>(self, boolean: Boolean, column: &str, values: I, negated: bool) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        let list = values.into_iter().map(|v| Expr::Value(v.into())).collect();
        self.push_where(
            boolean,
            Predicate::In {
                expr: Expr::column(column),
                values: InValues::List(list),
                negated,
            },
        )
    }

    /// `WHERE column IN (?, ...)`; an empty list renders `0 = 1`.
    pub fn where_in<I>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        self.in_list(Boolean::And, column, values, false)
    }

    /// `WHERE column NOT IN (?, ...)`; an empty list renders `1 = 1`.
    pub fn where_not_in<I>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        self.in_list(Boolean::And, column, values, true)
    }

    pub fn or_where_in<I>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        self.in_list(Boolean::Or, column, values, false)
    }

    pub fn or_where_not_in<I>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        self.in_list(Boolean::Or, column, values, true)
    }

    fn in_sub(mut self, boolean: Boolean, column: &str, query: QueryBuilder, negated: bool) -> Self {
        let state = self.absorb(query);
        self.push_where(
            boolean,
            Predicate::In {
                expr: Expr::column(column),
                values: InValues::Sub(Box::new(state)),
                negated,
            },
        )
    }

    /// `WHERE column IN (sub-select)`
    pub fn where_in_sub(self, column: &str, query: QueryBuilder) -> Self {
        self.in_sub(Boolean::And, column, query, false)
    }

    pub fn where_not_in_sub(self, column: &str, query: QueryBuilder) -> Self {
        self.in_sub(Boolean::And, column, query, true)
    }

    fn null_check(self, boolean: Boolean, column: &str, negated: bool) -> Self {
        self.push_where(
            boolean,
            Predicate::Null {
                expr: Expr::column(column),
                negated,
            },
        )
    }

    pub fn where_null(self, column: &str) -> Self {
        self.null_check(Boolean::And, column, false)
    }

    pub fn where_not_null(self, column: &str) -> Self {
        self.null_check(Boolean::And, column, true)
    }

    pub fn or_where_null(self, column: &str) -> Self {
        self.null_check(Boolean::Or, column, false)
    }

    pub fn or_where_not_null(self, column: &str) -> Self {
        self.null_check(Boolean::Or, column, true)
    }

    fn between(
        self,
        boolean: Boolean,
        column: &str,
        low: Value,
        high: Value,
        negated: bool,
    ) -> Self {
        self.push_where(
            boolean,
            Predicate::Between {
                expr: Expr::column(column),
                low: Expr::Value(low),
                high: Expr::Value(high),
                negated,
            },
        )
    }

    /// `WHERE column BETWEEN ? AND ?`
    pub fn where_between(self, column: &str, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        self.between(Boolean::And, column, low.into(), high.into(), false)
    }

    pub fn where_not_between(self, column: &str, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        self.between(Boolean::And, column, low.into(), high.into(), true)
    }

    pub fn or_where_between(self, column: &str, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        self.between(Boolean::Or, column, low.into(), high.into(), false)
    }

    pub fn or_where_not_between(self, column: &str, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        self.between(Boolean::Or, column, low.into(), high.into(), true)
    }

    fn nested<F>(mut self, boolean: Boolean, f: F) -> Self
    where
        F: FnOnce(QueryBuilder) -> QueryBuilder,
    {
        let inner = f(self.fork());
        let state = self.absorb(inner);
        if state.wheres.is_empty() {
            return self;
        }
        self.push_where(boolean, Predicate::Nested(state.wheres))
    }

    /// Parenthesized group: `WHERE (a = ? OR b = ?)`.
    pub fn where_nested<F>(self, f: F) -> Self
    where
        F: FnOnce(QueryBuilder) -> QueryBuilder,
    {
        self.nested(Boolean::And, f)
    }

    pub fn or_where_nested<F>(self, f: F) -> Self
    where
        F: FnOnce(QueryBuilder) -> QueryBuilder,
    {
        self.nested(Boolean::Or, f)
    }

    /// Append already-built where clauses, grouping them when they contain an OR.
    pub fn merge_wheres(mut self, wheres: Vec<WhereClause>) -> Self {
        if wheres.is_empty() {
            return self;
        }
        if wheres.iter().any(|w| w.boolean == Boolean::Or) && !self.state.wheres.is_empty() {
            return self.push_where(Boolean::And, Predicate::Nested(wheres));
        }
        self.state.wheres.extend(wheres);
        self
    }

    fn exists_clause(mut self, boolean: Boolean, query: QueryBuilder, negated: bool) -> Self {
        let state = self.absorb(query);
        self.push_where(
            boolean,
            Predicate::Exists {
                query: Box::new(state),
                negated,
            },
        )
    }

    pub fn where_exists(self, query: QueryBuilder) -> Self {
        self.exists_clause(Boolean::And, query, false)
    }

    pub fn where_not_exists(self, query: QueryBuilder) -> Self {
        self.exists_clause(Boolean::And, query, true)
    }

    pub fn or_where_exists(self, query: QueryBuilder) -> Self {
        self.exists_clause(Boolean::Or, query, false)
    }

    pub fn or_where_not_exists(self, query: QueryBuilder) -> Self {
        self.exists_clause(Boolean::Or, query, true)
    }

    // ==================== GROUP BY / HAVING ====================

    pub fn group_by(mut self, columns: &[&str]) -> Self {
        self.state
            .groups
            .extend(columns.iter().map(|c| Expr::column(*c)));
        self
    }

    pub fn group_by_raw(mut self, sql: &str, bindings: Vec<Value>) -> Self {
        self.state.groups.push(Expr::Raw {
            sql: sql.to_string(),
            bindings,
        });
        self
    }

    fn push_having(mut self, boolean: Boolean, predicate: Predicate) -> Self {
        self.state.havings.push(WhereClause { boolean, predicate });
        self
    }

    fn having_compare(mut self, boolean: Boolean, column: &str, op: &str, value: Value) -> Self {
        if let Err(e) = validate_operator(op) {
            self.record_error(e);
            return self;
        }
        self.push_having(
            boolean,
            Predicate::Binary {
                left: Expr::column(column),
                op: op.trim().to_string(),
                right: Expr::Value(value),
            },
        )
    }

    /// `HAVING column op ?`
    pub fn having(self, column: &str, op: &str, value: impl Into<Value>) -> Self {
        self.having_compare(Boolean::And, column, op, value.into())
    }

    pub fn or_having(self, column: &str, op: &str, value: impl Into<Value>) -> Self {
        self.having_compare(Boolean::Or, column, op, value.into())
    }

    pub fn having_raw(self, sql: &str, bindings: Vec<Value>) -> Self {
        self.push_having(
            Boolean::And,
            Predicate::Raw {
                sql: sql.to_string(),
                bindings,
            },
        )
    }

    pub fn or_having_raw(self, sql: &str, bindings: Vec<Value>) -> Self {
        self.push_having(
            Boolean::Or,
            Predicate::Raw {
                sql: sql.to_string(),
                bindings,
            },
        )
    }

    pub fn having_between(self, column: &str, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        self.push_having(
            Boolean::And,
            Predicate::Between {
                expr: Expr::column(column),
                low: Expr::Value(low.into()),
                high: Expr::Value(high.into()),
                negated: false,
            },
        )
    }

    // ==================== ORDER BY / LIMIT ====================

    fn push_order(mut self, order: Order) -> Self {
        if self.state.unions.is_empty() {
            self.state.orders.push(order);
        } else {
            self.state.union_orders.push(order);
        }
        self
    }

    /// `ORDER BY column ASC`
    pub fn order_by(self, column: &str) -> Self {
        self.push_order(Order::By {
            expr: Expr::column(column),
            direction: Direction::Asc,
        })
    }

    pub fn order_by_desc(self, column: &str) -> Self {
        self.push_order(Order::By {
            expr: Expr::column(column),
            direction: Direction::Desc,
        })
    }

    /// Order by a direction given as text (`asc`/`desc`, case-insensitive).
    pub fn order_by_direction(mut self, column: &str, direction: &str) -> Self {
        let direction = match direction.to_ascii_lowercase().as_str() {
            "asc" => Direction::Asc,
            "desc" => Direction::Desc,
            other => {
                self.record_error(format!(
                    "Order direction must be \"asc\" or \"desc\", got \"{other}\""
                ));
                return self;
            }
        };
        self.push_order(Order::By {
            expr: Expr::column(column),
            direction,
        })
    }

    pub fn order_by_raw(self, sql: &str, bindings: Vec<Value>) -> Self {
        self.push_order(Order::Raw {
            sql: sql.to_string(),
            bindings,
        })
    }

    /// Newest first by `column`.
    pub fn latest(self, column: &str) -> Self {
        self.order_by_desc(column)
    }

    /// Oldest first by `column`.
    pub fn oldest(self, column: &str) -> Self {
        self.order_by(column)
    }

    pub fn in_random_order(self) -> Self {
        self.push_order(Order::Random)
    }

    /// Drop every existing order.
    pub fn reorder(mut self) -> Self {
        self.state.orders.clear();
        self.state.union_orders.clear();
        self
    }

    /// Set LIMIT; after a union it limits the union as a whole.
    pub fn limit(mut self, limit: u64) -> Self {
        if self.state.unions.is_empty() {
            self.state.limit = Some(limit);
        } else {
            self.state.union_limit = Some(limit);
        }
        self
    }

    /// Set OFFSET; after a union it offsets the union as a whole.
    pub fn offset(mut self, offset: u64) -> Self {
        if self.state.unions.is_empty() {
            self.state.offset = Some(offset);
        } else {
            self.state.union_offset = Some(offset);
        }
        self
    }

    pub fn take(self, n: u64) -> Self {
        self.limit(n)
    }

    pub fn skip(self, n: u64) -> Self {
        self.offset(n)
    }

    /// Page `page` (1-based) of `per_page` rows.
    pub fn for_page(self, page: u64, per_page: u64) -> Self {
        self.offset(page.saturating_sub(1) * per_page).limit(per_page)
    }

    // ==================== UNION / LOCK ====================

    pub fn union(mut self, query: QueryBuilder) -> Self {
        let state = self.absorb(query);
        self.state.unions.push(Union {
            query: Box::new(state),
            all: false,
        });
        self
    }

    pub fn union_all(mut self, query: QueryBuilder) -> Self {
        let state = self.absorb(query);
        self.state.unions.push(Union {
            query: Box::new(state),
            all: true,
        });
        self
    }

    pub fn lock_for_update(mut self) -> Self {
        self.state.lock = Some(Lock::Update);
        self.use_write_connection = true;
        self
    }

    pub fn shared_lock(mut self) -> Self {
        self.state.lock = Some(Lock::Shared);
        self.use_write_connection = true;
        self
    }

    /// Route reads through the write connection.
    pub fn use_write_connection(mut self) -> Self {
        self.use_write_connection = true;
        self
    }

    // ==================== Compilation ====================

    /// Compile the SELECT without executing it.
    pub fn to_sql(&self) -> OrmResult<CompiledQuery> {
        self.validate()?;
        self.grammar.compile_select(&self.state)
    }

    /// Select bindings grouped by clause.
    pub fn bindings(&self) -> Bindings {
        Bindings::collect(&self.state)
    }

    /// Select bindings flattened in render order.
    pub fn get_bindings(&self) -> Vec<Value> {
        self.bindings().flatten()
    }

    fn aggregate_state(&self, function: &str, columns: &[&str]) -> QueryState {
        let mut state = self.state.clone();
        state.aggregate = Some(Aggregate {
            function: function.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        });
        state
    }

    // ==================== Execution ====================

    fn conn(&self) -> OrmResult<&Arc<Connection>> {
        self.connection
            .as_ref()
            .ok_or_else(|| OrmError::Connection("query builder has no connection".to_string()))
    }

    /// Execute the SELECT and return raw rows.
    pub async fn get(&self) -> OrmResult<Vec<Row>> {
        let compiled = self.to_sql()?;
        let conn = self.conn()?;
        let rows = conn
            .select(&compiled.sql, &compiled.bindings, !self.use_write_connection)
            .await?;
        Ok(conn.processor().process_select(rows))
    }

    /// Execute and map every row.
    pub async fn get_as<T: FromRow>(&self) -> OrmResult<Vec<T>> {
        self.get().await?.iter().map(T::from_row).collect()
    }

    /// First row, or `None`.
    pub async fn first(&self) -> OrmResult<Option<Row>> {
        Ok(self.clone().limit(1).get().await?.into_iter().next())
    }

    /// Row whose `id` equals `id`.
    pub async fn find(&self, id: impl Into<Value>) -> OrmResult<Option<Row>> {
        self.clone().where_eq("id", id).first().await
    }

    /// A single column of the first row.
    pub async fn value(&self, column: &str) -> OrmResult<Option<Value>> {
        let key = output_name(column);
        let row = self.clone().select(&[column]).first().await?;
        Ok(row.and_then(|r| r.get(&key).cloned()))
    }

    /// Values of one column across all rows.
    pub async fn pluck(&self, column: &str) -> OrmResult<Vec<Value>> {
        let key = output_name(column);
        let rows = self.clone().select(&[column]).get().await?;
        Ok(rows
            .into_iter()
            .map(|r| r.get(&key).cloned().unwrap_or_default())
            .collect())
    }

    /// Run an aggregate function and return its raw value.
    pub async fn aggregate(&self, function: &str, columns: &[&str]) -> OrmResult<Value> {
        self.validate()?;
        let state = self.aggregate_state(function, columns);
        let compiled = self.grammar.compile_select(&state)?;
        let conn = self.conn()?;
        let rows = conn
            .select(&compiled.sql, &compiled.bindings, !self.use_write_connection)
            .await?;
        Ok(rows
            .first()
            .and_then(|r| r.get("aggregate").or_else(|| r.get_index(0)))
            .cloned()
            .unwrap_or_default())
    }

    /// Compile the aggregate without executing it.
    pub fn to_aggregate_sql(&self, function: &str, columns: &[&str]) -> OrmResult<CompiledQuery> {
        self.validate()?;
        self.grammar
            .compile_select(&self.aggregate_state(function, columns))
    }

    pub async fn count(&self) -> OrmResult<i64> {
        Ok(self.aggregate("count", &["*"]).await?.as_i64().unwrap_or(0))
    }

    pub async fn min(&self, column: &str) -> OrmResult<Value> {
        self.aggregate("min", &[column]).await
    }

    pub async fn max(&self, column: &str) -> OrmResult<Value> {
        self.aggregate("max", &[column]).await
    }

    pub async fn sum(&self, column: &str) -> OrmResult<Value> {
        let v = self.aggregate("sum", &[column]).await?;
        Ok(if v.is_null() { Value::Int(0) } else { v })
    }

    pub async fn avg(&self, column: &str) -> OrmResult<Value> {
        self.aggregate("avg", &[column]).await
    }

    /// Compile the EXISTS query without executing it.
    pub fn to_exists_sql(&self) -> OrmResult<CompiledQuery> {
        self.validate()?;
        self.grammar.compile_exists(&self.state)
    }

    pub async fn exists(&self) -> OrmResult<bool> {
        let compiled = self.to_exists_sql()?;
        let conn = self.conn()?;
        let rows = conn
            .select(&compiled.sql, &compiled.bindings, !self.use_write_connection)
            .await?;
        Ok(rows
            .first()
            .and_then(|r| r.get("exists").or_else(|| r.get_index(0)))
            .is_some_and(Value::is_truthy))
    }

    pub async fn doesnt_exist(&self) -> OrmResult<bool> {
        Ok(!self.exists().await?)
    }

    /// Insert one row.
    pub async fn insert<I, K, V>(&self, values: I) -> OrmResult<bool>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.insert_many(vec![record(values)]).await
    }

    /// Insert several rows in one statement. An empty batch is a no-op.
    pub async fn insert_many(&self, rows: Vec<Record>) -> OrmResult<bool> {
        if rows.is_empty() {
            return Ok(true);
        }
        self.validate()?;
        let compiled = self.grammar.compile_insert(&self.state, &rows)?;
        self.conn()?.insert(&compiled.sql, &compiled.bindings).await
    }

    /// Insert one row and return its generated key.
    pub async fn insert_get_id<I, K, V>(&self, values: I, key: Option<&str>) -> OrmResult<Value>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.validate()?;
        let key = key.unwrap_or("id");
        let row = record(values);
        let compiled = self.grammar.compile_insert_get_id(&self.state, &row, key)?;
        let conn = self.conn()?;
        let output = conn.run(&compiled.sql, &compiled.bindings).await?;
        conn.processor().process_insert_get_id(&output, key)
    }

    /// Insert rows, skipping those that violate a unique constraint.
    pub async fn insert_or_ignore(&self, rows: Vec<Record>) -> OrmResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        self.validate()?;
        let compiled = self.grammar.compile_insert_or_ignore(&self.state, &rows)?;
        self.conn()?
            .affecting_statement(&compiled.sql, &compiled.bindings)
            .await
    }

    /// Insert rows or update `update` columns (all inserted columns when `None`) on conflict.
    pub async fn upsert(&self, rows: Vec<Record>, unique_by: &[&str], update: Option<&[&str]>) -> OrmResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let update: Vec<String> = match update {
            Some(cols) => cols.iter().map(|c| c.to_string()).collect(),
            None => rows[0].iter().map(|(c, _)| c.clone()).collect(),
        };
        if update.is_empty() {
            return self.insert_or_ignore(rows).await;
        }
        self.validate()?;
        let unique: Vec<String> = unique_by.iter().map(|c| c.to_string()).collect();
        let compiled = self
            .grammar
            .compile_upsert(&self.state, &rows, &unique, &update)?;
        self.conn()?
            .affecting_statement(&compiled.sql, &compiled.bindings)
            .await
    }

    /// Compile an UPDATE without executing it.
    pub fn to_update_sql(&self, values: &[(String, Expr)]) -> OrmResult<CompiledQuery> {
        self.validate()?;
        self.grammar.compile_update(&self.state, values)
    }

    /// Update matching rows; returns the affected count.
    pub async fn update<I, K, V>(&self, values: I) -> OrmResult<u64>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let values: Vec<(String, Expr)> = values
            .into_iter()
            .map(|(k, v)| (k.into(), Expr::Value(v.into())))
            .collect();
        self.update_exprs(values).await
    }

    /// Update with arbitrary expressions on the right-hand side.
    pub async fn update_exprs(&self, values: Vec<(String, Expr)>) -> OrmResult<u64> {
        let compiled = self.to_update_sql(&values)?;
        self.conn()?.update(&compiled.sql, &compiled.bindings).await
    }

    /// `SET column = column + amount`
    pub async fn increment(&self, column: &str, amount: impl Into<Value>) -> OrmResult<u64> {
        self.increment_with(column, amount, Vec::new()).await
    }

    /// Increment plus extra assignments.
    pub async fn increment_with(
        &self,
        column: &str,
        amount: impl Into<Value>,
        extra: Vec<(String, Value)>,
    ) -> OrmResult<u64> {
        self.step(column, "+", amount.into(), extra).await
    }

    pub async fn decrement(&self, column: &str, amount: impl Into<Value>) -> OrmResult<u64> {
        self.step(column, "-", amount.into(), Vec::new()).await
    }

    /// Decrement plus extra assignments.
    pub async fn decrement_with(
        &self,
        column: &str,
        amount: impl Into<Value>,
        extra: Vec<(String, Value)>,
    ) -> OrmResult<u64> {
        self.step(column, "-", amount.into(), extra).await
    }

    async fn step(&self, column: &str, op: &'static str, amount: Value, extra: Vec<(String, Value)>) -> OrmResult<u64> {
        if amount.as_f64().is_none() {
            return Err(OrmError::compile(format!(
                "Non-numeric value passed to increment/decrement of '{column}'"
            )));
        }
        let mut values = vec![(
            column.to_string(),
            Expr::Arithmetic {
                left: Box::new(Expr::column(column)),
                op,
                right: Box::new(Expr::Value(amount)),
            },
        )];
        values.extend(extra.into_iter().map(|(k, v)| (k, Expr::Value(v))));
        self.update_exprs(values).await
    }

    /// Compile a DELETE without executing it.
    pub fn to_delete_sql(&self) -> OrmResult<CompiledQuery> {
        self.validate()?;
        self.grammar.compile_delete(&self.state)
    }

    /// Delete matching rows; returns the affected count.
    pub async fn delete(&self) -> OrmResult<u64> {
        let compiled = self.to_delete_sql()?;
        self.conn()?.delete(&compiled.sql, &compiled.bindings).await
    }

    /// Empty the table.
    pub async fn truncate(&self) -> OrmResult<()> {
        self.validate()?;
        let table = self
            .from_table()
            .ok_or_else(|| OrmError::compile("TRUNCATE requires a table"))?;
        let conn = self.conn()?;
        for compiled in self.grammar.compile_truncate(table)? {
            conn.statement(&compiled.sql, &compiled.bindings).await?;
        }
        Ok(())
    }
}
