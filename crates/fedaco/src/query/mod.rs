//! Query construction: the fluent [`QueryBuilder`], its AST nodes and binding buckets.

pub mod ast;
pub mod bindings;
mod builder;
mod join;

#[cfg(test)]
mod tests;

pub use ast::{Boolean, Direction, Expr, JoinKind, Predicate, QueryState, WhereClause};
pub use bindings::{BindingKind, Bindings};
pub use builder::{record, QueryBuilder};
pub use join::JoinClause;

pub use crate::grammar::{CompiledQuery, Record};
