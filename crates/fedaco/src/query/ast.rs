//! Statement AST nodes accumulated by [`QueryBuilder`](super::QueryBuilder).
//!
//! Nodes are plain values: the builder appends them, the grammar visitor walks them.
//! Bound literals live inline as [`Expr::Value`] so that the visitor can emit bindings
//! in exactly the order their placeholders are rendered.

use crate::value::Value;

/// A scalar expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Column reference, parsed and quoted by the grammar (`users.id as uid`, `meta->a`).
    Column(String),
    /// Bound parameter, rendered as a placeholder.
    Value(Value),
    /// Raw SQL fragment with its own `?` bindings.
    Raw { sql: String, bindings: Vec<Value> },
    /// Function call: `COUNT(DISTINCT "id")`.
    Function {
        name: String,
        args: Vec<Expr>,
        distinct: bool,
    },
    /// Parenthesized sub-select, optionally aliased in a select list.
    Sub {
        query: Box<QueryState>,
        alias: Option<String>,
    },
    /// Arithmetic between two expressions: `"votes" + ?`.
    Arithmetic {
        left: Box<Expr>,
        op: &'static str,
        right: Box<Expr>,
    },
}

impl Expr {
    pub fn column(name: impl Into<String>) -> Self {
        Expr::Column(name.into())
    }

    pub fn value(value: impl Into<Value>) -> Self {
        Expr::Value(value.into())
    }

    pub fn raw(sql: impl Into<String>) -> Self {
        Expr::Raw {
            sql: sql.into(),
            bindings: Vec::new(),
        }
    }
}

/// Boolean conjunction joining a clause to its predecessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boolean {
    And,
    Or,
}

impl Boolean {
    pub fn as_sql(self) -> &'static str {
        match self {
            Boolean::And => "AND",
            Boolean::Or => "OR",
        }
    }
}

/// Right-hand side of an `IN` predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum InValues {
    List(Vec<Expr>),
    Sub(Box<QueryState>),
}

/// A predicate node in a WHERE, HAVING or JOIN ON list.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `left op right` where right may be a value, a column or a sub-select.
    Binary {
        left: Expr,
        op: String,
        right: Expr,
    },
    Between {
        expr: Expr,
        low: Expr,
        high: Expr,
        negated: bool,
    },
    In {
        expr: Expr,
        values: InValues,
        negated: bool,
    },
    Null {
        expr: Expr,
        negated: bool,
    },
    Exists {
        query: Box<QueryState>,
        negated: bool,
    },
    /// Parenthesized group built by a nested closure.
    Nested(Vec<WhereClause>),
    Raw {
        sql: String,
        bindings: Vec<Value>,
    },
}

/// A predicate tagged with its conjunction.
#[derive(Debug, Clone, PartialEq)]
pub struct WhereClause {
    pub boolean: Boolean,
    pub predicate: Predicate,
}

impl WhereClause {
    pub fn and(predicate: Predicate) -> Self {
        Self {
            boolean: Boolean::And,
            predicate,
        }
    }

    pub fn or(predicate: Predicate) -> Self {
        Self {
            boolean: Boolean::Or,
            predicate,
        }
    }
}

/// A table source in FROM or JOIN.
#[derive(Debug, Clone, PartialEq)]
pub enum TableRef {
    /// Table name, optionally `name as alias`.
    Table(String),
    /// Aliased sub-select.
    Sub {
        query: Box<QueryState>,
        alias: String,
    },
    Raw {
        sql: String,
        bindings: Vec<Value>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Cross,
}

impl JoinKind {
    pub fn as_sql(self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Right => "RIGHT JOIN",
            JoinKind::Cross => "CROSS JOIN",
        }
    }
}

/// Join node carrying its own ON predicate list.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinNode {
    pub kind: JoinKind,
    pub table: TableRef,
    pub on: Vec<WhereClause>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn as_sql(self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Order {
    By { expr: Expr, direction: Direction },
    Raw { sql: String, bindings: Vec<Value> },
    Random,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Union {
    pub query: Box<QueryState>,
    pub all: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lock {
    Update,
    Shared,
}

/// Aggregate projection replacing the select list at compile time.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub function: String,
    pub columns: Vec<String>,
}

/// The accumulated clause state of a single statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryState {
    pub distinct: bool,
    /// Select list; empty means `*`.
    pub columns: Vec<Expr>,
    pub from: Option<TableRef>,
    pub joins: Vec<JoinNode>,
    pub wheres: Vec<WhereClause>,
    pub groups: Vec<Expr>,
    pub havings: Vec<WhereClause>,
    pub orders: Vec<Order>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub unions: Vec<Union>,
    pub union_orders: Vec<Order>,
    pub union_limit: Option<u64>,
    pub union_offset: Option<u64>,
    pub lock: Option<Lock>,
    pub aggregate: Option<Aggregate>,
}

impl QueryState {
    /// The bare table name of the FROM clause (alias stripped), if it is a plain table.
    pub fn from_table(&self) -> Option<&str> {
        match &self.from {
            Some(TableRef::Table(t)) => Some(split_table_alias(t).0),
            _ => None,
        }
    }

    /// The name the FROM source is referenced by: its alias or its table.
    pub fn from_reference(&self) -> Option<&str> {
        match &self.from {
            Some(TableRef::Table(t)) => {
                let (table, alias) = split_table_alias(t);
                Some(alias.unwrap_or(table))
            }
            Some(TableRef::Sub { alias, .. }) => Some(alias),
            _ => None,
        }
    }
}

/// Split `table as alias` into its parts.
pub fn split_table_alias(table: &str) -> (&str, Option<&str>) {
    let lower = table.to_ascii_lowercase();
    match lower.find(" as ") {
        Some(pos) => (table[..pos].trim(), Some(table[pos + 4..].trim())),
        None => (table.trim(), None),
    }
}
