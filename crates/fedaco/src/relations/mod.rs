//! Relationships between entities.
//!
//! A [`RelationDef`] is the static declaration stored on an
//! [`EntitySchema`](crate::orm::EntitySchema). [`resolve`] turns it into a live
//! [`Relation`] bound to a parent model:
//!
//! - Lazy path: the relation is built with key constraints for the single parent and
//!   [`Relation::get_results`] runs it.
//! - Eager path: the relation is built bare through [`resolve_with`] and
//!   [`Constraints::Bare`], then
//!   [`Relation::eager_load`] constrains it to every parent key with one `IN` query,
//!   stamps each parent with an empty value and matches the results back through a
//!   key dictionary.

mod belongs_to;
mod belongs_to_many;
mod dictionary;
mod has_many_through;
mod has_one_or_many;
mod morph_to;
mod pivot;

#[cfg(test)]
mod tests;

pub use belongs_to::BelongsTo;
pub use belongs_to_many::{BelongsToMany, SyncChanges};
pub use has_many_through::HasManyThrough;
pub use has_one_or_many::HasOneOrMany;
pub use morph_to::MorphTo;
pub use pivot::PIVOT_ACCESSOR;

use crate::error::{OrmError, OrmResult};
use crate::grammar::{CompiledQuery, Record};
use crate::orm::{EagerLoad, EntityQuery, EntitySchema, Model, QueryConstraint};
use crate::query::{Expr, QueryBuilder};
use crate::value::Value;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Relationship kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    BelongsTo,
    HasOne,
    HasMany,
    BelongsToMany,
    MorphTo,
    MorphOne,
    MorphMany,
    MorphToMany,
    MorphedByMany,
    HasOneThrough,
    HasManyThrough,
}

impl RelationKind {
    /// Whether the relation yields a collection.
    pub fn is_many(self) -> bool {
        matches!(
            self,
            RelationKind::HasMany
                | RelationKind::BelongsToMany
                | RelationKind::MorphMany
                | RelationKind::MorphToMany
                | RelationKind::MorphedByMany
                | RelationKind::HasManyThrough
        )
    }
}

/// Projection of an existence sub-query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    /// `SELECT *`, used inside `EXISTS (...)`.
    Exists,
    /// `SELECT count(*)`, used by `with_count` and count comparisons.
    Count,
}

/// Static relation declaration.
///
/// Unset keys fall back to naming conventions when the relation is resolved:
/// `{relation}_id` for belongs-to, `{parent}_id` for has-one/many, alphabetical
/// `a_b` pivot tables, `{morph}_type`/`{morph}_id` morph columns.
#[derive(Clone)]
pub struct RelationDef {
    pub(crate) kind: RelationKind,
    pub(crate) related: Option<String>,
    /// Child column referencing the parent (belongs-to, has-one/many, morph id column).
    pub(crate) foreign_key: Option<String>,
    /// Parent-side key: owner key, local key or many-to-many parent key.
    pub(crate) owner_key: Option<String>,
    /// Related-side key of a many-to-many, or the through entity key.
    pub(crate) related_key: Option<String>,
    pub(crate) table: Option<String>,
    pub(crate) foreign_pivot_key: Option<String>,
    pub(crate) related_pivot_key: Option<String>,
    pub(crate) through: Option<String>,
    /// Through table column referencing the parent.
    pub(crate) first_key: Option<String>,
    /// Related table column referencing the through entity.
    pub(crate) second_key: Option<String>,
    pub(crate) morph_name: Option<String>,
    pub(crate) morph_type: Option<String>,
    pub(crate) pivot_columns: Vec<String>,
    pub(crate) pivot_timestamps: bool,
    pub(crate) pivot_wheres: Vec<(String, Value)>,
    pub(crate) pivot_accessor: Option<String>,
    pub(crate) default: Option<Record>,
    pub(crate) morph_with: Vec<(String, Vec<String>)>,
    pub(crate) constraint: Option<QueryConstraint>,
}

impl fmt::Debug for RelationDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationDef")
            .field("kind", &self.kind)
            .field("related", &self.related)
            .field("foreign_key", &self.foreign_key)
            .field("owner_key", &self.owner_key)
            .field("table", &self.table)
            .field("through", &self.through)
            .field("morph_name", &self.morph_name)
            .finish_non_exhaustive()
    }
}

impl RelationDef {
    fn new(kind: RelationKind, related: Option<&str>) -> Self {
        Self {
            kind,
            related: related.map(str::to_string),
            foreign_key: None,
            owner_key: None,
            related_key: None,
            table: None,
            foreign_pivot_key: None,
            related_pivot_key: None,
            through: None,
            first_key: None,
            second_key: None,
            morph_name: None,
            morph_type: None,
            pivot_columns: Vec::new(),
            pivot_timestamps: false,
            pivot_wheres: Vec::new(),
            pivot_accessor: None,
            default: None,
            morph_with: Vec::new(),
            constraint: None,
        }
    }

    // ==================== Kinds ====================

    pub fn belongs_to(related: &str) -> Self {
        Self::new(RelationKind::BelongsTo, Some(related))
    }

    pub fn has_one(related: &str) -> Self {
        Self::new(RelationKind::HasOne, Some(related))
    }

    pub fn has_many(related: &str) -> Self {
        Self::new(RelationKind::HasMany, Some(related))
    }

    pub fn belongs_to_many(related: &str) -> Self {
        Self::new(RelationKind::BelongsToMany, Some(related))
    }

    /// Polymorphic owner; the morph name defaults to the relation name.
    pub fn morph_to() -> Self {
        Self::new(RelationKind::MorphTo, None)
    }

    pub fn morph_one(related: &str, morph_name: &str) -> Self {
        Self::new(RelationKind::MorphOne, Some(related)).morph_name(morph_name)
    }

    pub fn morph_many(related: &str, morph_name: &str) -> Self {
        Self::new(RelationKind::MorphMany, Some(related)).morph_name(morph_name)
    }

    /// Polymorphic many-to-many from the owning side (`Post` -> tags via `taggables`).
    pub fn morph_to_many(related: &str, morph_name: &str) -> Self {
        Self::new(RelationKind::MorphToMany, Some(related)).morph_name(morph_name)
    }

    /// Inverse of [`morph_to_many`](Self::morph_to_many) (`Tag` -> posts via `taggables`).
    pub fn morphed_by_many(related: &str, morph_name: &str) -> Self {
        Self::new(RelationKind::MorphedByMany, Some(related)).morph_name(morph_name)
    }

    pub fn has_one_through(related: &str, through: &str) -> Self {
        let mut def = Self::new(RelationKind::HasOneThrough, Some(related));
        def.through = Some(through.to_string());
        def
    }

    pub fn has_many_through(related: &str, through: &str) -> Self {
        let mut def = Self::new(RelationKind::HasManyThrough, Some(related));
        def.through = Some(through.to_string());
        def
    }

    // ==================== Keys ====================

    pub fn foreign_key(mut self, key: &str) -> Self {
        self.foreign_key = Some(key.to_string());
        self
    }

    /// Owner key of a belongs-to.
    pub fn owner_key(mut self, key: &str) -> Self {
        self.owner_key = Some(key.to_string());
        self
    }

    /// Parent key of a has-one/many, many-to-many or through relation.
    pub fn local_key(self, key: &str) -> Self {
        self.owner_key(key)
    }

    /// Related key of a many-to-many; through entity key of a through relation.
    pub fn related_key(mut self, key: &str) -> Self {
        self.related_key = Some(key.to_string());
        self
    }

    pub fn pivot_table(mut self, table: &str) -> Self {
        self.table = Some(table.to_string());
        self
    }

    pub fn pivot_keys(mut self, foreign_pivot_key: &str, related_pivot_key: &str) -> Self {
        self.foreign_pivot_key = Some(foreign_pivot_key.to_string());
        self.related_pivot_key = Some(related_pivot_key.to_string());
        self
    }

    /// Keys of a through relation: the through column pointing at the parent and
    /// the related column pointing at the through entity.
    pub fn through_keys(mut self, first_key: &str, second_key: &str) -> Self {
        self.first_key = Some(first_key.to_string());
        self.second_key = Some(second_key.to_string());
        self
    }

    pub fn morph_name(mut self, name: &str) -> Self {
        self.morph_name = Some(name.to_string());
        self
    }

    /// Override the morph `{name}_type` / `{name}_id` columns.
    pub fn morph_columns(mut self, type_column: &str, id_column: &str) -> Self {
        self.morph_type = Some(type_column.to_string());
        self.foreign_key = Some(id_column.to_string());
        self
    }

    // ==================== Options ====================

    /// Extra pivot columns hydrated onto the pivot model.
    pub fn with_pivot(mut self, columns: &[&str]) -> Self {
        self.pivot_columns
            .extend(columns.iter().map(|c| c.to_string()));
        self
    }

    /// Maintain `created_at`/`updated_at` on the pivot table.
    pub fn with_timestamps(mut self) -> Self {
        self.pivot_timestamps = true;
        self
    }

    /// Restrict the relation (and its attach/detach/sync writes) to pivot rows
    /// with `column = value`.
    pub fn where_pivot(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.pivot_wheres.push((column.to_string(), value.into()));
        self
    }

    /// Relation name under which the pivot model is attached (default `pivot`).
    pub fn as_accessor(mut self, accessor: &str) -> Self {
        self.pivot_accessor = Some(accessor.to_string());
        self
    }

    /// Unsaved model returned instead of nothing by belongs-to and has-one.
    pub fn with_default(mut self, attributes: Record) -> Self {
        self.default = Some(attributes);
        self
    }

    /// Nested eager loads for one morph target entity.
    pub fn morph_with(mut self, entity: &str, paths: &[&str]) -> Self {
        self.morph_with
            .push((entity.to_string(), paths.iter().map(|p| p.to_string()).collect()));
        self
    }

    /// Constraint applied to every query of this relation.
    pub fn constrain<F>(mut self, f: F) -> Self
    where
        F: Fn(EntityQuery) -> EntityQuery + Send + Sync + 'static,
    {
        self.constraint = Some(Arc::new(f));
        self
    }

    pub fn kind(&self) -> RelationKind {
        self.kind
    }

    pub fn related(&self) -> Option<&str> {
        self.related.as_deref()
    }
}

/// A loaded relation value.
#[derive(Debug, Clone)]
pub enum RelationValue {
    One(Option<Box<Model>>),
    Many(Vec<Model>),
}

impl RelationValue {
    pub fn one(model: Option<Model>) -> Self {
        RelationValue::One(model.map(Box::new))
    }

    pub fn as_one(&self) -> Option<&Model> {
        match self {
            RelationValue::One(model) => model.as_deref(),
            RelationValue::Many(models) => models.first(),
        }
    }

    /// Models as a slice; a single relation yields zero or one element.
    pub fn as_many(&self) -> &[Model] {
        match self {
            RelationValue::One(Some(model)) => std::slice::from_ref(model.as_ref()),
            RelationValue::One(None) => &[],
            RelationValue::Many(models) => models,
        }
    }

    pub fn len(&self) -> usize {
        self.as_many().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_many().is_empty()
    }

    pub fn to_json(&self) -> OrmResult<serde_json::Value> {
        match self {
            RelationValue::One(None) => Ok(serde_json::Value::Null),
            RelationValue::One(Some(model)) => model.to_json(),
            RelationValue::Many(models) => models
                .iter()
                .map(Model::to_json)
                .collect::<OrmResult<Vec<_>>>()
                .map(serde_json::Value::Array),
        }
    }
}

/// A relation bound to its parent model.
#[async_trait]
pub trait Relation: Send + Sync + fmt::Debug {
    fn kind(&self) -> RelationKind;

    /// The related query; `None` for morph-to, whose target entity varies per row.
    fn query(&self) -> Option<&EntityQuery>;

    /// Narrow the related query (buffered until the target is known on morph-to).
    fn constrain(&mut self, constraint: &QueryConstraint);

    /// Relations to eager load on the related results.
    fn with_nested(&mut self, loads: Vec<EagerLoad>);

    /// Per-target nested loads; only morph-to supports this.
    fn morph_with(&mut self, _entries: &[(String, Vec<String>)]) -> OrmResult<()> {
        Err(OrmError::relation(format!(
            "morph_with is only supported on morph_to relations, not {:?}",
            self.kind()
        )))
    }

    /// Constrain the query to every parent in `models`.
    fn add_eager_constraints(&mut self, models: &[Model]) -> OrmResult<()>;

    /// Stamp every parent with the empty (or default) relation value.
    fn init_relation(&self, models: &mut [Model], name: &str);

    /// Attach `results` to their parents.
    fn match_results(&self, models: &mut [Model], results: Vec<Model>, name: &str) -> OrmResult<()>;

    /// Run the eager query.
    async fn get_eager(&self) -> OrmResult<Vec<Model>>;

    /// Run the lazy query for the single parent.
    async fn get_results(&self) -> OrmResult<RelationValue>;

    /// Sub-query relating this relation's rows to rows of `parent`, for `has`,
    /// `where_has` and `with_count`.
    fn existence_query(&self, parent: &EntitySchema, aggregate: Aggregate) -> OrmResult<QueryBuilder>;

    /// Eager load onto `models`; returns the number of related rows fetched.
    async fn eager_load(&mut self, models: &mut [Model], name: &str) -> OrmResult<usize> {
        self.add_eager_constraints(models)?;
        let results = self.get_eager().await?;
        let fetched = results.len();
        self.init_relation(models, name);
        self.match_results(models, results, name)?;
        Ok(fetched)
    }

    /// Compile the relation query without running it.
    fn to_sql(&self) -> OrmResult<CompiledQuery> {
        match self.query() {
            Some(query) => query.to_sql(),
            None => Err(OrmError::relation(format!(
                "{:?} relation has no single query",
                self.kind()
            ))),
        }
    }
}

/// Whether a relation is bound to its parent's key when it is built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Constraints {
    /// `related.foreign_key = parent.key` for the single parent.
    #[default]
    Keyed,
    /// No key predicate. Used for eager loading and for reading table and key names.
    Bare,
}

impl Constraints {
    pub fn applies(self) -> bool {
        self == Constraints::Keyed
    }
}

/// Build the relation `name` of `parent`, constrained to the parent's key.
pub fn resolve(parent: &Model, name: &str) -> OrmResult<Box<dyn Relation>> {
    resolve_with(parent, name, Constraints::Keyed)
}

/// Build the relation `name` of `parent` with explicit key constraints.
pub fn resolve_with(parent: &Model, name: &str, constraints: Constraints) -> OrmResult<Box<dyn Relation>> {
    let def = definition(parent, name)?;
    Ok(match def.kind {
        RelationKind::BelongsTo => Box::new(BelongsTo::new(parent, name, def, constraints)?),
        RelationKind::HasOne | RelationKind::HasMany | RelationKind::MorphOne | RelationKind::MorphMany => {
            Box::new(HasOneOrMany::new(parent, def, constraints)?)
        }
        RelationKind::BelongsToMany | RelationKind::MorphToMany | RelationKind::MorphedByMany => {
            Box::new(BelongsToMany::new(parent, def, constraints)?)
        }
        RelationKind::MorphTo => Box::new(MorphTo::new(parent, name, def)?),
        RelationKind::HasOneThrough | RelationKind::HasManyThrough => {
            Box::new(HasManyThrough::new(parent, def, constraints)?)
        }
    })
}

/// The declaration of `name` on the parent's schema.
pub(crate) fn definition<'a>(parent: &'a Model, name: &str) -> OrmResult<&'a RelationDef> {
    parent
        .schema()
        .relation_def(name)
        .ok_or_else(|| OrmError::RelationNotFound {
            model: parent.entity().to_string(),
            relation: name.to_string(),
        })
}

/// Related query for `entity` with the declaration's constraint applied.
pub(crate) fn related_query(parent: &Model, entity: &str, def: &RelationDef) -> OrmResult<EntityQuery> {
    let query = parent.orm().query(entity)?;
    Ok(match &def.constraint {
        Some(constraint) => constraint(query),
        None => query,
    })
}

pub(crate) fn required_related<'a>(def: &'a RelationDef) -> OrmResult<&'a str> {
    def.related
        .as_deref()
        .ok_or_else(|| OrmError::relation(format!("{:?} relation has no related entity", def.kind)))
}

/// Unsaved default model for belongs-to and has-one.
pub(crate) fn default_model(query: &EntityQuery, default: Option<&Record>) -> OrmResult<Option<Model>> {
    match default {
        Some(attributes) => {
            let mut model = query.new_model();
            model.force_fill(attributes.iter().cloned())?;
            Ok(Some(model))
        }
        None => Ok(None),
    }
}

/// Apply the projection of an existence sub-query.
pub(crate) fn project(mut query: QueryBuilder, aggregate: Aggregate) -> QueryBuilder {
    if aggregate == Aggregate::Count {
        query.state_mut().columns = vec![Expr::Raw {
            sql: "count(*)".to_string(),
            bindings: Vec::new(),
        }];
    }
    query
}

/// Alias the related table for self-referencing existence queries.
/// Returns the builder and the name related columns must be qualified with.
pub(crate) fn self_alias(parent: &Model, mut query: QueryBuilder, related_table: &str) -> (QueryBuilder, String) {
    let alias = parent.orm().context().reserved_alias();
    query = query.from(&format!("{related_table} as {alias}"));
    (query, alias)
}
