use super::{
    dictionary, default_model, project, related_query, required_related, self_alias, Aggregate,
    Constraints, Relation, RelationDef, RelationKind, RelationValue,
};
use crate::error::OrmResult;
use crate::naming;
use crate::orm::{EagerLoad, EntityQuery, EntitySchema, Model, QueryConstraint};
use crate::query::QueryBuilder;
use async_trait::async_trait;

/// Inverse side of a one-to-one or one-to-many: the parent row holds the key.
#[derive(Debug)]
pub struct BelongsTo {
    query: EntityQuery,
    parent: Model,
    foreign_key: String,
    owner_key: String,
    default: Option<Model>,
}

impl BelongsTo {
    pub(crate) fn new(
        parent: &Model,
        name: &str,
        def: &RelationDef,
        constraints: Constraints,
    ) -> OrmResult<Self> {
        let mut query = related_query(parent, required_related(def)?, def)?;
        let owner_key = def
            .owner_key
            .clone()
            .unwrap_or_else(|| query.schema().key_name().to_string());
        let foreign_key = def
            .foreign_key
            .clone()
            .unwrap_or_else(|| format!("{}_{}", naming::snake(name), owner_key));
        let default = default_model(&query, def.default.as_ref())?;

        if constraints.applies() {
            let column = query.schema().qualify(&owner_key);
            let value = parent.get_raw(&foreign_key).cloned().unwrap_or_default();
            query = query.where_eq(&column, value);
        }

        Ok(Self {
            query,
            parent: parent.clone(),
            foreign_key,
            owner_key,
            default,
        })
    }

    /// Column on the parent holding the owner's key.
    pub fn foreign_key(&self) -> &str {
        &self.foreign_key
    }

    pub fn owner_key(&self) -> &str {
        &self.owner_key
    }
}

#[async_trait]
impl Relation for BelongsTo {
    fn kind(&self) -> RelationKind {
        RelationKind::BelongsTo
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
        let keys = dictionary::collect_keys(models, &self.foreign_key)?;
        let column = self.query.schema().qualify(&self.owner_key);
        self.query = self.query.clone().where_in(&column, keys);
        Ok(())
    }

    fn init_relation(&self, models: &mut [Model], name: &str) {
        for model in models.iter_mut() {
            model.set_relation(name, RelationValue::one(self.default.clone()));
        }
    }

    fn match_results(&self, models: &mut [Model], results: Vec<Model>, name: &str) -> OrmResult<()> {
        let dictionary = dictionary::build(results, &self.owner_key)?;
        dictionary::match_parents(models, &dictionary, &self.foreign_key, name, false)
    }

    async fn get_eager(&self) -> OrmResult<Vec<Model>> {
        self.query.get().await
    }

    async fn get_results(&self) -> OrmResult<RelationValue> {
        let key_missing = self
            .parent
            .get_raw(&self.foreign_key)
            .is_none_or(|v| v.is_null());
        if key_missing {
            return Ok(RelationValue::one(self.default.clone()));
        }
        let found = self.query.first().await?;
        Ok(RelationValue::one(found.or_else(|| self.default.clone())))
    }

    fn existence_query(&self, parent: &EntitySchema, aggregate: Aggregate) -> OrmResult<QueryBuilder> {
        let related_table = self.query.schema().table_name();
        let mut query = self.query.to_base();
        let mut reference = related_table.to_string();
        if parent.table_name() == related_table {
            (query, reference) = self_alias(&self.parent, query, related_table);
        }
        query = query.where_column(
            &parent.qualify(&self.foreign_key),
            "=",
            &format!("{reference}.{}", self.owner_key),
        );
        Ok(project(query, aggregate))
    }
}
