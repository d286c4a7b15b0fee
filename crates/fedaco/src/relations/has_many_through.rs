use super::dictionary::{self, Dictionary};
use super::{
    default_model, project, related_query, required_related, Aggregate, Constraints, Relation, RelationDef,
    RelationKind, RelationValue,
};
use crate::error::{OrmError, OrmResult};
use crate::grammar::CompiledQuery;
use crate::orm::{EagerLoad, EntityQuery, EntitySchema, Model, QueryConstraint};
use crate::query::QueryBuilder;
use crate::value::{DictKey, Value};
use async_trait::async_trait;
use std::sync::Arc;

/// Alias of the through table's parent key, selected with every related row.
const THROUGH_KEY: &str = "fedaco_through_key";

/// Distant relation through an intermediate entity
/// (`Country` -> `User` -> `Post`).
#[derive(Debug)]
pub struct HasManyThrough {
    kind: RelationKind,
    query: EntityQuery,
    parent: Model,
    through: Arc<EntitySchema>,
    /// Through column referencing the parent.
    first_key: String,
    /// Related column referencing the through entity.
    second_key: String,
    local_key: String,
    second_local_key: String,
    default: Option<Model>,
}

impl HasManyThrough {
    pub(crate) fn new(parent: &Model, def: &RelationDef, constraints: Constraints) -> OrmResult<Self> {
        let mut query = related_query(parent, required_related(def)?, def)?;
        let through_name = def
            .through
            .as_deref()
            .ok_or_else(|| OrmError::relation("through relation has no intermediate entity"))?;
        let through = parent.orm().schema(through_name)?;
        let related = query.schema().clone();

        let first_key = def.first_key.clone().unwrap_or_else(|| parent.foreign_key());
        let second_key = def.second_key.clone().unwrap_or_else(|| through.foreign_key());
        let local_key = def
            .owner_key
            .clone()
            .unwrap_or_else(|| parent.key_name().to_string());
        let second_local_key = def
            .related_key
            .clone()
            .unwrap_or_else(|| through.key_name().to_string());
        let default = default_model(&query, def.default.as_ref())?;

        query = query.join(
            through.table_name(),
            &through.qualify(&second_local_key),
            "=",
            &related.qualify(&second_key),
        );
        if through.uses_soft_deletes() {
            query = query.where_null(&through.qualify(through.deleted_at()));
        }
        if constraints.applies() {
            let value = parent.get_raw(&local_key).cloned().unwrap_or_default();
            query = query.where_eq(&through.qualify(&first_key), value);
        }

        Ok(Self {
            kind: def.kind,
            query,
            parent: parent.clone(),
            through,
            first_key,
            second_key,
            local_key,
            second_local_key,
            default,
        })
    }

    fn is_many(&self) -> bool {
        self.kind.is_many()
    }

    pub fn through(&self) -> &EntitySchema {
        &self.through
    }

    fn select_query(&self) -> EntityQuery {
        let mut query = self.query.clone();
        if query.base().state().columns.is_empty() {
            let all = format!("{}.*", query.schema().table_name());
            query = query.select(&[all.as_str()]);
        }
        let alias = format!("{} as {THROUGH_KEY}", self.through.qualify(&self.first_key));
        query.add_select(&[alias.as_str()])
    }

    /// Remove the through key alias from a related row.
    fn take_through_key(model: &mut Model) -> Option<Value> {
        let value = model.unset_attribute(THROUGH_KEY);
        model.sync_original_attribute(THROUGH_KEY);
        value
    }

    async fn fetch(&self) -> OrmResult<Vec<Model>> {
        self.select_query().get().await
    }
}

#[async_trait]
impl Relation for HasManyThrough {
    fn kind(&self) -> RelationKind {
        self.kind
    }

    fn query(&self) -> Option<&EntityQuery> {
        Some(&self.query)
    }

    fn constrain(&mut self, constraint: &QueryConstraint) {
        self.query = constraint(self.query.clone());
    }

    fn with_nested(&mut self, loads: Vec<EagerLoad>) {
        self.query = self.query.clone().with_loads(loads);
    }

    fn add_eager_constraints(&mut self, models: &[Model]) -> OrmResult<()> {
        let keys = dictionary::collect_keys(models, &self.local_key)?;
        let column = self.through.qualify(&self.first_key);
        self.query = self.query.clone().where_in(&column, keys);
        Ok(())
    }

    fn init_relation(&self, models: &mut [Model], name: &str) {
        for model in models.iter_mut() {
            let empty = if self.is_many() {
                RelationValue::Many(Vec::new())
            } else {
                RelationValue::one(self.default.clone())
            };
            model.set_relation(name, empty);
        }
    }

    fn match_results(&self, models: &mut [Model], results: Vec<Model>, name: &str) -> OrmResult<()> {
        let mut by_parent = Dictionary::new();
        for mut result in results {
            let Some(value) = Self::take_through_key(&mut result) else {
                continue;
            };
            if let Some(key) = DictKey::from_value(&value)? {
                by_parent.entry(key).or_default().push(result);
            }
        }
        dictionary::match_parents(models, &by_parent, &self.local_key, name, self.is_many())
    }

    async fn get_eager(&self) -> OrmResult<Vec<Model>> {
        self.fetch().await
    }

    async fn get_results(&self) -> OrmResult<RelationValue> {
        let parent_key = self.parent.get_raw(&self.local_key).is_some_and(|v| !v.is_null());
        if !parent_key {
            return Ok(if self.is_many() {
                RelationValue::Many(Vec::new())
            } else {
                RelationValue::one(self.default.clone())
            });
        }
        let mut models = if self.is_many() {
            self.fetch().await?
        } else {
            self.select_query().limit(1).get().await?
        };
        for model in &mut models {
            Self::take_through_key(model);
        }
        Ok(if self.is_many() {
            RelationValue::Many(models)
        } else {
            RelationValue::one(models.into_iter().next().or_else(|| self.default.clone()))
        })
    }

    fn to_sql(&self) -> OrmResult<CompiledQuery> {
        self.select_query().to_sql()
    }

    fn existence_query(&self, parent: &EntitySchema, aggregate: Aggregate) -> OrmResult<QueryBuilder> {
        let mut query = self.query.to_base();
        let mut through_ref = self.through.table_name().to_string();
        if parent.table_name() == self.through.table_name() {
            let alias = self.parent.orm().context().reserved_alias();
            let rejoined = query
                .new_query()
                .join(
                    &format!("{} as {alias}", self.through.table_name()),
                    &format!("{alias}.{}", self.second_local_key),
                    "=",
                    &self.query.schema().qualify(&self.second_key),
                )
                .into_state()
                .joins;
            if let (Some(slot), Some(join)) = (query.state_mut().joins.first_mut(), rejoined.into_iter().next()) {
                *slot = join;
            }
            through_ref = alias;
        }
        query = query.where_column(
            &parent.qualify(&self.local_key),
            "=",
            &format!("{through_ref}.{}", self.first_key),
        );
        Ok(project(query, aggregate))
    }
}
