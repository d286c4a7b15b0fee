//! JOIN clause builder used by [`QueryBuilder::join_with`](super::QueryBuilder::join_with).

use super::ast::{Boolean, Expr, InValues, JoinKind, JoinNode, Predicate, TableRef, WhereClause};
use super::builder::validate_operator;
use crate::value::Value;

/// A join under construction: its table plus its own ON predicate list.
#[derive(Debug, Clone)]
pub struct JoinClause {
    kind: JoinKind,
    table: TableRef,
    on: Vec<WhereClause>,
    build_error: Option<String>,
}

impl JoinClause {
    pub fn new(kind: JoinKind, table: TableRef) -> Self {
        Self {
            kind,
            table,
            on: Vec::new(),
            build_error: None,
        }
    }

    fn push(mut self, boolean: Boolean, predicate: Predicate) -> Self {
        self.on.push(WhereClause { boolean, predicate });
        self
    }

    fn record_error(&mut self, message: String) {
        if self.build_error.is_none() {
            self.build_error = Some(message);
        }
    }

    fn compare(mut self, boolean: Boolean, left: Expr, op: &str, right: Expr) -> Self {
        if let Err(e) = validate_operator(op) {
            self.record_error(e);
            return self;
        }
        self.push(
            boolean,
            Predicate::Binary {
                left,
                op: op.to_string(),
                right,
            },
        )
    }

    /// `ON first op second` comparing two columns.
    pub fn on(self, first: &str, op: &str, second: &str) -> Self {
        self.compare(Boolean::And, Expr::column(first), op, Expr::column(second))
    }

    pub fn or_on(self, first: &str, op: &str, second: &str) -> Self {
        self.compare(Boolean::Or, Expr::column(first), op, Expr::column(second))
    }

    /// `ON column op ?` comparing against a bound value.
    pub fn where_(self, column: &str, op: &str, value: impl Into<Value>) -> Self {
        self.compare(Boolean::And, Expr::column(column), op, Expr::Value(value.into()))
    }

    pub fn or_where(self, column: &str, op: &str, value: impl Into<Value>) -> Self {
        self.compare(Boolean::Or, Expr::column(column), op, Expr::Value(value.into()))
    }

    pub fn where_in<I>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        let list = values.into_iter().map(|v| Expr::Value(v.into())).collect();
        self.push(
            Boolean::And,
            Predicate::In {
                expr: Expr::column(column),
                values: InValues::List(list),
                negated: false,
            },
        )
    }

    pub fn where_null(self, column: &str) -> Self {
        self.push(
            Boolean::And,
            Predicate::Null {
                expr: Expr::column(column),
                negated: false,
            },
        )
    }

    pub fn where_not_null(self, column: &str) -> Self {
        self.push(
            Boolean::And,
            Predicate::Null {
                expr: Expr::column(column),
                negated: true,
            },
        )
    }

    /// Parenthesized group of ON conditions.
    pub fn on_nested<F>(mut self, f: F) -> Self
    where
        F: FnOnce(JoinClause) -> JoinClause,
    {
        let inner = f(JoinClause::new(self.kind, self.table.clone()));
        if let Some(e) = inner.build_error {
            self.record_error(e);
            return self;
        }
        if inner.on.is_empty() {
            return self;
        }
        self.push(Boolean::And, Predicate::Nested(inner.on))
    }

    pub(crate) fn into_parts(self) -> (JoinNode, Option<String>) {
        (
            JoinNode {
                kind: self.kind,
                table: self.table,
                on: self.on,
            },
            self.build_error,
        )
    }
}
