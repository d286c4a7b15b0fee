//! Per-clause binding buckets.
//!
//! Buckets are derived from the clause state rather than tracked on the side, so they can
//! never drift from what the visitor renders. Flattening follows render order.

use super::ast::{Expr, InValues, JoinNode, Order, Predicate, QueryState, TableRef, WhereClause};
use crate::value::Value;

/// Clause a binding belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    Select,
    From,
    Join,
    Where,
    GroupBy,
    Having,
    Order,
    Union,
    UnionOrder,
}

impl BindingKind {
    /// Render order of the buckets.
    pub const ORDER: [BindingKind; 9] = [
        BindingKind::Select,
        BindingKind::From,
        BindingKind::Join,
        BindingKind::Where,
        BindingKind::GroupBy,
        BindingKind::Having,
        BindingKind::Order,
        BindingKind::Union,
        BindingKind::UnionOrder,
    ];
}

/// Bindings grouped by clause.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bindings {
    pub select: Vec<Value>,
    pub from: Vec<Value>,
    pub join: Vec<Value>,
    pub where_: Vec<Value>,
    pub group_by: Vec<Value>,
    pub having: Vec<Value>,
    pub order: Vec<Value>,
    pub union: Vec<Value>,
    pub union_order: Vec<Value>,
}

impl Bindings {
    /// Collect the bindings of a select statement by clause.
    pub fn collect(state: &QueryState) -> Self {
        let mut b = Bindings::default();
        for column in &state.columns {
            expr_values(column, &mut b.select);
        }
        if let Some(from) = &state.from {
            table_values(from, &mut b.from);
        }
        for join in &state.joins {
            join_values(join, &mut b.join);
        }
        wheres_values(&state.wheres, &mut b.where_);
        for group in &state.groups {
            expr_values(group, &mut b.group_by);
        }
        wheres_values(&state.havings, &mut b.having);
        orders_values(&state.orders, &mut b.order);
        for union in &state.unions {
            state_values(&union.query, &mut b.union);
        }
        orders_values(&state.union_orders, &mut b.union_order);
        b
    }

    pub fn get(&self, kind: BindingKind) -> &[Value] {
        match kind {
            BindingKind::Select => &self.select,
            BindingKind::From => &self.from,
            BindingKind::Join => &self.join,
            BindingKind::Where => &self.where_,
            BindingKind::GroupBy => &self.group_by,
            BindingKind::Having => &self.having,
            BindingKind::Order => &self.order,
            BindingKind::Union => &self.union,
            BindingKind::UnionOrder => &self.union_order,
        }
    }

    /// Flatten in render order.
    pub fn flatten(&self) -> Vec<Value> {
        BindingKind::ORDER
            .iter()
            .flat_map(|k| self.get(*k).iter().cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        BindingKind::ORDER.iter().map(|k| self.get(*k).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// All bindings of a select statement in render order.
pub fn state_values(state: &QueryState, out: &mut Vec<Value>) {
    out.extend(Bindings::collect(state).flatten());
}

pub(crate) fn expr_values(expr: &Expr, out: &mut Vec<Value>) {
    match expr {
        Expr::Column(_) => {}
        Expr::Value(v) => out.push(v.clone()),
        Expr::Raw { bindings, .. } => out.extend(bindings.iter().cloned()),
        Expr::Function { args, .. } => args.iter().for_each(|a| expr_values(a, out)),
        Expr::Sub { query, .. } => state_values(query, out),
        Expr::Arithmetic { left, right, .. } => {
            expr_values(left, out);
            expr_values(right, out);
        }
    }
}

fn table_values(table: &TableRef, out: &mut Vec<Value>) {
    match table {
        TableRef::Table(_) => {}
        TableRef::Sub { query, .. } => state_values(query, out),
        TableRef::Raw { bindings, .. } => out.extend(bindings.iter().cloned()),
    }
}

fn join_values(join: &JoinNode, out: &mut Vec<Value>) {
    table_values(&join.table, out);
    wheres_values(&join.on, out);
}

pub(crate) fn wheres_values(wheres: &[WhereClause], out: &mut Vec<Value>) {
    for w in wheres {
        predicate_values(&w.predicate, out);
    }
}

fn predicate_values(predicate: &Predicate, out: &mut Vec<Value>) {
    match predicate {
        Predicate::Binary { left, right, .. } => {
            expr_values(left, out);
            expr_values(right, out);
        }
        Predicate::Between {
            expr, low, high, ..
        } => {
            expr_values(expr, out);
            expr_values(low, out);
            expr_values(high, out);
        }
        Predicate::In { expr, values, .. } => {
            expr_values(expr, out);
            match values {
                InValues::List(list) => list.iter().for_each(|e| expr_values(e, out)),
                InValues::Sub(query) => state_values(query, out),
            }
        }
        Predicate::Null { expr, .. } => expr_values(expr, out),
        Predicate::Exists { query, .. } => state_values(query, out),
        Predicate::Nested(inner) => wheres_values(inner, out),
        Predicate::Raw { bindings, .. } => out.extend(bindings.iter().cloned()),
    }
}

fn orders_values(orders: &[Order], out: &mut Vec<Value>) {
    for order in orders {
        match order {
            Order::By { expr, .. } => expr_values(expr, out),
            Order::Raw { bindings, .. } => out.extend(bindings.iter().cloned()),
            Order::Random => {}
        }
    }
}
