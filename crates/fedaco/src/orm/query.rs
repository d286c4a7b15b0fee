//! Model-aware query builder.
//!
//! [`EntityQuery`] wraps a [`QueryBuilder`] for one entity. Clause methods are a
//! closed set forwarded to the base builder; execution hydrates [`Model`]s, applies
//! global scopes on a clone of the base query and resolves eager loads.

use super::eager::{EagerLoad, eager_load_relations};
use super::model::Model;
use super::schema::{EntitySchema, SOFT_DELETES};
use super::Orm;
use crate::connection::Connection;
use crate::error::{OrmError, OrmResult};
use crate::grammar::{CompiledQuery, Record};
use crate::query::{Boolean, Predicate, QueryBuilder, WhereClause};
use crate::relations::{self, Aggregate, Constraints, Relation};
use crate::row::Row;
use crate::value::Value;
use chrono::Utc;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Callback that narrows a relation or eager load query.
pub type QueryConstraint = Arc<dyn Fn(EntityQuery) -> EntityQuery + Send + Sync>;

/// One page of results.
#[derive(Debug, Clone)]
pub struct Page {
    pub items: Vec<Model>,
    pub total: i64,
    pub per_page: u64,
    pub current_page: u64,
}

impl Page {
    pub fn last_page(&self) -> u64 {
        let total = u64::try_from(self.total).unwrap_or(0);
        total.div_ceil(self.per_page).max(1)
    }
}

/// Generate consuming forwarders to the base builder.
macro_rules! forward_to_base {
    ($( $(#[$meta:meta])* fn $name:ident($($arg:ident : $ty:ty),*); )*) => {
        $(
            $(#[$meta])*
            pub fn $name(mut self, $($arg: $ty),*) -> Self {
                self.query = self.query.$name($($arg),*);
                self
            }
        )*
    };
}

#[derive(Clone)]
pub struct EntityQuery {
    orm: Orm,
    schema: Arc<EntitySchema>,
    query: QueryBuilder,
    eager: Vec<EagerLoad>,
    removed_scopes: BTreeSet<String>,
}

impl fmt::Debug for EntityQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityQuery")
            .field("entity", &self.schema.name())
            .field("query", &self.query.state())
            .field("eager", &self.eager)
            .field("removed_scopes", &self.removed_scopes)
            .finish()
    }
}

impl EntityQuery {
    pub(crate) fn new(orm: Orm, schema: Arc<EntitySchema>, connection: Arc<Connection>) -> Self {
        let query = QueryBuilder::with_connection(connection).from(schema.table_name());
        Self {
            orm,
            schema,
            query,
            eager: Vec::new(),
            removed_scopes: BTreeSet::new(),
        }
    }

    pub fn orm(&self) -> &Orm {
        &self.orm
    }

    pub fn schema(&self) -> &Arc<EntitySchema> {
        &self.schema
    }

    /// The base builder without global scopes.
    pub fn base(&self) -> &QueryBuilder {
        &self.query
    }

    pub fn base_mut(&mut self) -> &mut QueryBuilder {
        &mut self.query
    }

    /// Replace the base builder through `f`.
    pub fn tap_base<F>(mut self, f: F) -> Self
    where
        F: FnOnce(QueryBuilder) -> QueryBuilder,
    {
        self.query = f(self.query);
        self
    }

    pub fn eager_loads(&self) -> &[EagerLoad] {
        &self.eager
    }

    pub(crate) fn record_error(&mut self, message: impl Into<String>) {
        self.query.record_error(message);
    }

    // ==================== Scopes ====================

    fn has_active_scopes(&self) -> bool {
        (self.schema.uses_soft_deletes() && !self.removed_scopes.contains(SOFT_DELETES))
            || self
                .schema
                .global_scopes()
                .iter()
                .any(|(name, _)| !self.removed_scopes.contains(name))
    }

    /// Clone of the base builder with every active global scope applied.
    ///
    /// Existing `OR` clauses are grouped first so scope predicates bind to the whole
    /// user condition.
    pub fn to_base(&self) -> QueryBuilder {
        let mut query = self.query.clone();
        if !self.has_active_scopes() {
            return query;
        }
        if query.state().wheres.iter().any(|w| w.boolean == Boolean::Or) {
            let wheres = std::mem::take(&mut query.state_mut().wheres);
            query
                .state_mut()
                .wheres
                .push(WhereClause::and(Predicate::Nested(wheres)));
        }
        if self.schema.uses_soft_deletes() && !self.removed_scopes.contains(SOFT_DELETES) {
            query = query.where_null(&self.schema.qualify(self.schema.deleted_at()));
        }
        for (name, scope) in self.schema.global_scopes() {
            if !self.removed_scopes.contains(name) {
                query = scope(query, self.schema.as_ref());
            }
        }
        query
    }

    pub fn without_global_scope(mut self, name: &str) -> Self {
        self.removed_scopes.insert(name.to_string());
        self
    }

    pub fn without_global_scopes(mut self) -> Self {
        if self.schema.uses_soft_deletes() {
            self.removed_scopes.insert(SOFT_DELETES.to_string());
        }
        let names: Vec<String> = self
            .schema
            .global_scopes()
            .iter()
            .map(|(n, _)| n.clone())
            .collect();
        self.removed_scopes.extend(names);
        self
    }

    /// Include soft deleted rows.
    pub fn with_trashed(self) -> Self {
        self.without_global_scope(SOFT_DELETES)
    }

    /// Only soft deleted rows.
    pub fn only_trashed(self) -> Self {
        let column = self.schema.qualify(self.schema.deleted_at());
        self.with_trashed().where_not_null(&column)
    }

    /// Apply a named local scope.
    pub fn scope(mut self, name: &str, args: &[Value]) -> Self {
        match self.schema.local_scope_fn(name).cloned() {
            Some(scope) => scope(self, args),
            None => {
                let message = format!(
                    "Call to undefined scope [{name}] on model [{}]",
                    self.schema.name()
                );
                self.record_error(message);
                self
            }
        }
    }

    // ==================== Clauses ====================

    forward_to_base! {
        fn select(columns: &[&str]);
        fn add_select(columns: &[&str]);
        fn select_raw(sql: &str, bindings: Vec<Value>);
        fn select_sub(query: QueryBuilder, alias: &str);
        fn distinct();
        fn join(table: &str, first: &str, op: &str, second: &str);
        fn left_join(table: &str, first: &str, op: &str, second: &str);
        fn right_join(table: &str, first: &str, op: &str, second: &str);
        fn cross_join(table: &str);
        fn where_(column: &str, op: &str, value: impl Into<Value>);
        fn where_eq(column: &str, value: impl Into<Value>);
        fn or_where(column: &str, op: &str, value: impl Into<Value>);
        fn or_where_eq(column: &str, value: impl Into<Value>);
        fn where_column(first: &str, op: &str, second: &str);
        fn or_where_column(first: &str, op: &str, second: &str);
        fn where_raw(sql: &str, bindings: Vec<Value>);
        fn or_where_raw(sql: &str, bindings: Vec<Value>);
        fn where_null(column: &str);
        fn where_not_null(column: &str);
        fn or_where_null(column: &str);
        fn or_where_not_null(column: &str);
        fn where_between(column: &str, low: impl Into<Value>, high: impl Into<Value>);
        fn where_not_between(column: &str, low: impl Into<Value>, high: impl Into<Value>);
        fn or_where_between(column: &str, low: impl Into<Value>, high: impl Into<Value>);
        fn where_exists(query: QueryBuilder);
        fn where_not_exists(query: QueryBuilder);
        fn where_in_sub(column: &str, query: QueryBuilder);
        fn group_by(columns: &[&str]);
        fn having(column: &str, op: &str, value: impl Into<Value>);
        fn or_having(column: &str, op: &str, value: impl Into<Value>);
        fn having_raw(sql: &str, bindings: Vec<Value>);
        fn order_by(column: &str);
        fn order_by_desc(column: &str);
        fn order_by_raw(sql: &str, bindings: Vec<Value>);
        fn in_random_order();
        fn reorder();
        fn limit(limit: u64);
        fn offset(offset: u64);
        fn take(n: u64);
        fn skip(n: u64);
        fn for_page(page: u64, per_page: u64);
        fn lock_for_update();
        fn shared_lock();
        fn use_write_connection();
    }

    pub fn where_in<I>(mut self, column: &str, values: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        self.query = self.query.where_in(column, values);
        self
    }

    pub fn where_not_in<I>(mut self, column: &str, values: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        self.query = self.query.where_not_in(column, values);
        self
    }

    pub fn or_where_in<I>(mut self, column: &str, values: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        self.query = self.query.or_where_in(column, values);
        self
    }

    pub fn where_nested<F>(mut self, f: F) -> Self
    where
        F: FnOnce(QueryBuilder) -> QueryBuilder,
    {
        self.query = self.query.where_nested(f);
        self
    }

    pub fn or_where_nested<F>(mut self, f: F) -> Self
    where
        F: FnOnce(QueryBuilder) -> QueryBuilder,
    {
        self.query = self.query.or_where_nested(f);
        self
    }

    /// Newest first by `created_at`.
    pub fn latest(self) -> Self {
        let column = self.schema.qualify(self.schema.created_at());
        self.order_by_desc(&column)
    }

    pub fn oldest(self) -> Self {
        let column = self.schema.qualify(self.schema.created_at());
        self.order_by(&column)
    }

    /// `WHERE table.key = id`
    pub fn where_key(self, id: impl Into<Value>) -> Self {
        let column = self.schema.qualified_key_name();
        self.where_eq(&column, id)
    }

    pub fn where_key_not(self, id: impl Into<Value>) -> Self {
        let column = self.schema.qualified_key_name();
        self.where_(&column, "!=", id)
    }

    /// Union with another entity query, scopes applied to both.
    pub fn union(mut self, other: &EntityQuery) -> Self {
        self.query = self.query.union(other.to_base());
        self
    }

    // ==================== Eager loading ====================

    /// Eager load relation paths (`"posts"`, `"posts.comments"`).
    pub fn with(mut self, paths: &[&str]) -> Self {
        for path in paths {
            self.eager.push(EagerLoad::new(*path));
        }
        self
    }

    /// Eager load one path with a constraint on its query.
    pub fn with_constraint<F>(mut self, path: &str, constraint: F) -> Self
    where
        F: Fn(EntityQuery) -> EntityQuery + Send + Sync + 'static,
    {
        self.eager
            .push(EagerLoad::new(path).constrained(Arc::new(constraint)));
        self
    }

    pub(crate) fn with_loads(mut self, loads: Vec<EagerLoad>) -> Self {
        self.eager.extend(loads);
        self
    }

    /// Eager load a morph-to path, loading `entries` (entity, nested paths) on the
    /// models of each target entity.
    pub fn with_morph(mut self, path: &str, entries: &[(&str, &[&str])]) -> Self {
        let entries = entries
            .iter()
            .map(|(entity, paths)| {
                (entity.to_string(), paths.iter().map(|p| p.to_string()).collect())
            })
            .collect();
        self.eager.push(EagerLoad::new(path).morph_with(entries));
        self
    }

    /// Drop previously requested eager loads (and their nested paths).
    pub fn without(mut self, paths: &[&str]) -> Self {
        self.eager.retain(|load| {
            !paths
                .iter()
                .any(|p| load.path == *p || load.path.starts_with(&format!("{p}.")))
        });
        self
    }

    /// Select `{relation}_count` for each relation (`"posts"` or `"posts as total"`).
    pub fn with_count(mut self, relations: &[&str]) -> Self {
        for relation in relations {
            self = self.add_count(relation, None);
        }
        self
    }

    /// Count a relation restricted by `constraint`.
    pub fn with_count_where<F>(self, relation: &str, constraint: F) -> Self
    where
        F: Fn(EntityQuery) -> EntityQuery + Send + Sync + 'static,
    {
        self.add_count(relation, Some(Arc::new(constraint)))
    }

    fn add_count(mut self, relation: &str, constraint: Option<QueryConstraint>) -> Self {
        let (name, alias) = count_alias(relation);
        let sub = self
            .blank_relation(name)
            .and_then(|mut rel| {
                if let Some(c) = &constraint {
                    rel.constrain(c);
                }
                rel.existence_query(&self.schema, Aggregate::Count)
            });
        match sub {
            Ok(sub) => {
                if self.query.state().columns.is_empty() {
                    let all = format!("{}.*", self.schema.table_name());
                    self.query = self.query.select(&[all.as_str()]);
                }
                self.query = self.query.select_sub(sub, &alias);
            }
            Err(e) => self.record_error(e.to_string()),
        }
        self
    }

    // ==================== Relation existence ====================

    /// Relation of this entity built without key constraints.
    pub(crate) fn blank_relation(&self, name: &str) -> OrmResult<Box<dyn Relation>> {
        let model = Model::new(self.orm.clone(), self.schema.clone());
        relations::resolve_with(&model, name, Constraints::Bare)
    }

    /// Rows with at least/at most `count` related rows (`has("posts", ">=", 3)`).
    /// Dotted paths nest: `has("posts.comments", ">=", 1)`.
    pub fn has(self, relation: &str, op: &str, count: i64) -> Self {
        self.has_where(relation, op, count, Boolean::And, None)
    }

    pub fn or_has(self, relation: &str, op: &str, count: i64) -> Self {
        self.has_where(relation, op, count, Boolean::Or, None)
    }

    pub fn doesnt_have(self, relation: &str) -> Self {
        self.has_where(relation, "<", 1, Boolean::And, None)
    }

    /// Rows with a related row matching `constraint`.
    pub fn where_has<F>(self, relation: &str, constraint: F) -> Self
    where
        F: Fn(EntityQuery) -> EntityQuery + Send + Sync + 'static,
    {
        self.has_where(relation, ">=", 1, Boolean::And, Some(Arc::new(constraint)))
    }

    pub fn or_where_has<F>(self, relation: &str, constraint: F) -> Self
    where
        F: Fn(EntityQuery) -> EntityQuery + Send + Sync + 'static,
    {
        self.has_where(relation, ">=", 1, Boolean::Or, Some(Arc::new(constraint)))
    }

    pub fn where_doesnt_have<F>(self, relation: &str, constraint: F) -> Self
    where
        F: Fn(EntityQuery) -> EntityQuery + Send + Sync + 'static,
    {
        self.has_where(relation, "<", 1, Boolean::And, Some(Arc::new(constraint)))
    }

    fn has_where(
        mut self,
        relation: &str,
        op: &str,
        count: i64,
        boolean: Boolean,
        constraint: Option<QueryConstraint>,
    ) -> Self {
        if let Some((first, rest)) = relation.split_once('.') {
            let rest = rest.to_string();
            let op = op.to_string();
            let nested: QueryConstraint = Arc::new(move |q: EntityQuery| {
                q.has_where(&rest, &op, count, Boolean::And, constraint.clone())
            });
            return self.has_where(first, ">=", 1, boolean, Some(nested));
        }

        let mut rel = match self.blank_relation(relation) {
            Ok(rel) => rel,
            Err(e) => {
                self.record_error(e.to_string());
                return self;
            }
        };
        if let Some(c) = &constraint {
            rel.constrain(c);
        }
        let exists_form = count == 1 && (op == ">=" || op == "<");
        let aggregate = if exists_form { Aggregate::Exists } else { Aggregate::Count };
        let sub = match rel.existence_query(&self.schema, aggregate) {
            Ok(sub) => sub,
            Err(e) => {
                self.record_error(e.to_string());
                return self;
            }
        };
        self.query = match (exists_form, op == "<", boolean) {
            (true, false, Boolean::And) => self.query.where_exists(sub),
            (true, false, Boolean::Or) => self.query.or_where_exists(sub),
            (true, true, Boolean::And) => self.query.where_not_exists(sub),
            (true, true, Boolean::Or) => self.query.or_where_not_exists(sub),
            (false, _, _) => self.query.where_sub_value(boolean, sub, op, count),
        };
        self
    }

    // ==================== Compilation ====================

    /// Compile the scoped SELECT.
    pub fn to_sql(&self) -> OrmResult<CompiledQuery> {
        self.to_base().to_sql()
    }

    // ==================== Retrieval ====================

    pub(crate) fn hydrate(&self, rows: Vec<Row>) -> Vec<Model> {
        rows.into_iter()
            .map(|row| Model::from_row(self.orm.clone(), self.schema.clone(), row))
            .collect()
    }

    /// Run the scoped query and hydrate models without eager loads.
    pub async fn get_models(&self) -> OrmResult<Vec<Model>> {
        let rows = self.to_base().get().await?;
        Ok(self.hydrate(rows))
    }

    /// Load the requested eager relations onto `models`.
    pub async fn eager_load(&self, models: &mut [Model]) -> OrmResult<()> {
        if models.is_empty() || self.eager.is_empty() {
            return Ok(());
        }
        eager_load_relations(&self.orm, &self.schema, models, &self.eager).await
    }

    pub async fn get(&self) -> OrmResult<Vec<Model>> {
        let mut models = self.get_models().await?;
        self.eager_load(&mut models).await?;
        Ok(models)
    }

    pub async fn first(&self) -> OrmResult<Option<Model>> {
        Ok(self.clone().limit(1).get().await?.into_iter().next())
    }

    pub async fn first_or_fail(&self) -> OrmResult<Model> {
        self.first()
            .await?
            .ok_or_else(|| OrmError::model_not_found(self.schema.name(), Vec::<String>::new()))
    }

    pub async fn find(&self, id: impl Into<Value>) -> OrmResult<Option<Model>> {
        self.clone().where_key(id).first().await
    }

    /// Models whose key is in `ids`; no query runs for an empty list.
    pub async fn find_many<I>(&self, ids: I) -> OrmResult<Vec<Model>>
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        let ids: Vec<Value> = ids.into_iter().map(Into::into).collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let column = self.schema.qualified_key_name();
        self.clone().where_in(&column, ids).get().await
    }

    pub async fn find_or_fail(&self, id: impl Into<Value>) -> OrmResult<Model> {
        let id = id.into();
        self.find(id.clone())
            .await?
            .ok_or_else(|| OrmError::model_not_found(self.schema.name(), [id]))
    }

    /// The model with `id`, or a new unsaved instance.
    pub async fn find_or_new(&self, id: impl Into<Value>) -> OrmResult<Model> {
        Ok(match self.find(id).await? {
            Some(model) => model,
            None => self.new_model(),
        })
    }

    /// First model matching `attributes`, or an unsaved one filled with
    /// `attributes` then `values`.
    pub async fn first_or_new(&self, attributes: Record, values: Record) -> OrmResult<Model> {
        let mut query = self.clone();
        for (column, value) in &attributes {
            query = query.where_eq(column, value.clone());
        }
        if let Some(model) = query.first().await? {
            return Ok(model);
        }
        let mut model = self.new_model();
        model.fill(attributes.into_iter().chain(values))?;
        Ok(model)
    }

    pub async fn first_or_create(&self, attributes: Record, values: Record) -> OrmResult<Model> {
        let mut model = self.first_or_new(attributes, values).await?;
        if !model.exists() {
            model.save().await?;
        }
        Ok(model)
    }

    /// Update the first model matching `attributes` with `values`, or create it.
    pub async fn update_or_create(&self, attributes: Record, values: Record) -> OrmResult<Model> {
        let mut model = self.first_or_new(attributes, Vec::new()).await?;
        model.fill(values)?;
        model.save().await?;
        Ok(model)
    }

    /// Pluck one column, casting values through the schema.
    pub async fn pluck(&self, column: &str) -> OrmResult<Vec<Value>> {
        let values = self.to_base().pluck(column).await?;
        let key = column.rsplit('.').next().unwrap_or(column);
        match self.schema.cast_of(key) {
            Some(cast) => values.iter().map(|v| cast.get(v)).collect(),
            None => Ok(values),
        }
    }

    pub async fn value(&self, column: &str) -> OrmResult<Option<Value>> {
        self.to_base().value(column).await
    }

    pub async fn count(&self) -> OrmResult<i64> {
        self.to_base().count().await
    }

    pub async fn sum(&self, column: &str) -> OrmResult<Value> {
        self.to_base().sum(column).await
    }

    pub async fn max(&self, column: &str) -> OrmResult<Value> {
        self.to_base().max(column).await
    }

    pub async fn min(&self, column: &str) -> OrmResult<Value> {
        self.to_base().min(column).await
    }

    pub async fn avg(&self, column: &str) -> OrmResult<Value> {
        self.to_base().avg(column).await
    }

    pub async fn exists(&self) -> OrmResult<bool> {
        self.to_base().exists().await
    }

    pub async fn doesnt_exist(&self) -> OrmResult<bool> {
        Ok(!self.exists().await?)
    }

    /// Page `page` (1-based) with the total row count.
    pub async fn paginate(&self, page: u64, per_page: Option<u64>) -> OrmResult<Page> {
        let per_page = per_page.unwrap_or_else(|| self.schema.get_per_page()).max(1);
        let page = page.max(1);
        let total = self.clone().reorder().count().await?;
        let items = if total > 0 {
            self.clone().for_page(page, per_page).get().await?
        } else {
            Vec::new()
        };
        Ok(Page {
            items,
            total,
            per_page,
            current_page: page,
        })
    }

    // ==================== Writes ====================

    pub fn new_model(&self) -> Model {
        Model::new(self.orm.clone(), self.schema.clone())
    }

    /// New unsaved model filled with `attributes`.
    pub fn make<I, K, V>(&self, attributes: I) -> OrmResult<Model>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut model = self.new_model();
        model.fill(attributes)?;
        Ok(model)
    }

    /// Fill, save and return a new model.
    pub async fn create<I, K, V>(&self, attributes: I) -> OrmResult<Model>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut model = self.make(attributes)?;
        model.save().await?;
        Ok(model)
    }

    pub async fn force_create<I, K, V>(&self, attributes: I) -> OrmResult<Model>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut model = self.new_model();
        model.force_fill(attributes)?;
        model.save().await?;
        Ok(model)
    }

    fn with_updated_at(&self, mut values: Record) -> Record {
        let column = self.schema.updated_at();
        if self.schema.uses_timestamps() && !values.iter().any(|(c, _)| c == column) {
            values.push((column.to_string(), fresh_timestamp()));
        }
        values
    }

    /// Mass update matching rows, touching `updated_at`.
    pub async fn update<I, K, V>(&self, values: I) -> OrmResult<u64>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let values = self.with_updated_at(crate::query::record(values));
        self.to_base().update(values).await
    }

    pub async fn increment(&self, column: &str, amount: impl Into<Value>) -> OrmResult<u64> {
        let extra = self.with_updated_at(Vec::new());
        self.to_base().increment_with(column, amount, extra).await
    }

    pub async fn decrement(&self, column: &str, amount: impl Into<Value>) -> OrmResult<u64> {
        let extra = self.with_updated_at(Vec::new());
        self.to_base().decrement_with(column, amount, extra).await
    }

    /// Delete matching rows; soft deleting entities stamp `deleted_at` instead.
    pub async fn delete(&self) -> OrmResult<u64> {
        if self.schema.uses_soft_deletes() {
            let now = fresh_timestamp();
            let mut values = vec![(self.schema.deleted_at().to_string(), now)];
            values = self.with_updated_at(values);
            return self.to_base().update(values).await;
        }
        self.to_base().delete().await
    }

    /// Delete matching rows even on soft deleting entities.
    pub async fn force_delete(&self) -> OrmResult<u64> {
        self.clone().with_trashed().to_base().delete().await
    }

    /// Clear `deleted_at` on matching soft deleted rows.
    pub async fn restore(&self) -> OrmResult<u64> {
        if !self.schema.uses_soft_deletes() {
            return Err(OrmError::validation(format!(
                "model [{}] does not use soft deletes",
                self.schema.name()
            )));
        }
        let values = self.with_updated_at(vec![(self.schema.deleted_at().to_string(), Value::Null)]);
        self.clone().with_trashed().to_base().update(values).await
    }
}

/// Relation name and result column of a `with_count` entry (`"posts as total"`).
pub(crate) fn count_alias(relation: &str) -> (&str, String) {
    match relation.to_ascii_lowercase().find(" as ") {
        Some(pos) => (relation[..pos].trim(), relation[pos + 4..].trim().to_string()),
        None => (relation.trim(), format!("{}_count", relation.trim())),
    }
}

/// Current time as a timestamp value.
pub(crate) fn fresh_timestamp() -> Value {
    Value::Timestamp(Utc::now().naive_utc())
}
