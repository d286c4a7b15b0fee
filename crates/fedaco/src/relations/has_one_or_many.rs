use super::{
    dictionary, default_model, project, related_query, required_related, self_alias, Aggregate,
    Constraints, Relation, RelationDef, RelationKind, RelationValue,
};
use crate::error::{OrmError, OrmResult};
use crate::grammar::Record;
use crate::orm::{EagerLoad, EntityQuery, EntitySchema, Model, QueryConstraint};
use crate::query::QueryBuilder;
use crate::value::Value;
use async_trait::async_trait;

/// Morph discriminator column and the value the parent writes into it.
#[derive(Debug, Clone)]
struct MorphType {
    column: String,
    class: String,
}

/// One-to-one and one-to-many from the side whose key is referenced, including the
/// polymorphic `morph_one` and `morph_many`.
#[derive(Debug)]
pub struct HasOneOrMany {
    kind: RelationKind,
    query: EntityQuery,
    parent: Model,
    foreign_key: String,
    local_key: String,
    morph: Option<MorphType>,
    default: Option<Model>,
}

impl HasOneOrMany {
    pub(crate) fn new(parent: &Model, def: &RelationDef, constraints: Constraints) -> OrmResult<Self> {
        let mut query = related_query(parent, required_related(def)?, def)?;
        let local_key = def
            .owner_key
            .clone()
            .unwrap_or_else(|| parent.key_name().to_string());

        let (foreign_key, morph) = match def.kind {
            RelationKind::MorphOne | RelationKind::MorphMany => {
                let name = def
                    .morph_name
                    .as_deref()
                    .ok_or_else(|| OrmError::relation("morph relation has no morph name"))?;
                let column = def
                    .morph_type
                    .clone()
                    .unwrap_or_else(|| format!("{name}_type"));
                let foreign_key = def.foreign_key.clone().unwrap_or_else(|| format!("{name}_id"));
                let morph = MorphType {
                    column,
                    class: parent.morph_class(),
                };
                (foreign_key, Some(morph))
            }
            _ => (
                def.foreign_key.clone().unwrap_or_else(|| parent.foreign_key()),
                None,
            ),
        };
        let default = default_model(&query, def.default.as_ref())?;

        if constraints.applies() {
            let column = query.schema().qualify(&foreign_key);
            let value = parent.get_raw(&local_key).cloned().unwrap_or_default();
            query = query.where_eq(&column, value).where_not_null(&column);
            if let Some(morph) = &morph {
                let column = query.schema().qualify(&morph.column);
                query = query.where_eq(&column, morph.class.as_str());
            }
        }

        Ok(Self {
            kind: def.kind,
            query,
            parent: parent.clone(),
            foreign_key,
            local_key,
            morph,
            default,
        })
    }

    fn is_many(&self) -> bool {
        self.kind.is_many()
    }

    /// Column on the related table pointing at the parent.
    pub fn foreign_key(&self) -> &str {
        &self.foreign_key
    }

    pub fn local_key(&self) -> &str {
        &self.local_key
    }

    fn parent_key(&self) -> Value {
        self.parent
            .get_raw(&self.local_key)
            .cloned()
            .unwrap_or_default()
    }

    fn set_foreign_attributes(&self, model: &mut Model) -> OrmResult<()> {
        model.set_attribute(self.foreign_key.clone(), self.parent_key())?;
        if let Some(morph) = &self.morph {
            model.set_attribute(morph.column.clone(), morph.class.as_str())?;
        }
        Ok(())
    }

    /// Unsaved related model pointing at the parent.
    pub fn make<I, K, V>(&self, attributes: I) -> OrmResult<Model>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut model = self.query.make(attributes)?;
        self.set_foreign_attributes(&mut model)?;
        Ok(model)
    }

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

    pub async fn create_many(&self, records: Vec<Record>) -> OrmResult<Vec<Model>> {
        let mut models = Vec::with_capacity(records.len());
        for record in records {
            models.push(self.create(record).await?);
        }
        Ok(models)
    }

    /// Point `model` at the parent and save it.
    pub async fn save(&self, model: &mut Model) -> OrmResult<()> {
        self.set_foreign_attributes(model)?;
        model.save().await
    }
}

#[async_trait]
impl Relation for HasOneOrMany {
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
        let column = self.query.schema().qualify(&self.foreign_key);
        let mut query = self.query.clone().where_in(&column, keys);
        if let Some(morph) = &self.morph {
            let column = query.schema().qualify(&morph.column);
            query = query.where_eq(&column, morph.class.as_str());
        }
        self.query = query;
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
        let dictionary = dictionary::build(results, &self.foreign_key)?;
        dictionary::match_parents(models, &dictionary, &self.local_key, name, self.is_many())
    }

    async fn get_eager(&self) -> OrmResult<Vec<Model>> {
        self.query.get().await
    }

    async fn get_results(&self) -> OrmResult<RelationValue> {
        if self.parent_key().is_null() {
            return Ok(if self.is_many() {
                RelationValue::Many(Vec::new())
            } else {
                RelationValue::one(self.default.clone())
            });
        }
        if self.is_many() {
            return Ok(RelationValue::Many(self.query.get().await?));
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
            &parent.qualify(&self.local_key),
            "=",
            &format!("{reference}.{}", self.foreign_key),
        );
        if let Some(morph) = &self.morph {
            query = query.where_eq(&format!("{reference}.{}", morph.column), morph.class.as_str());
        }
        Ok(project(query, aggregate))
    }
}
