use super::{Aggregate, Relation, RelationDef, RelationKind, RelationValue};
use crate::error::{OrmError, OrmResult};
use crate::orm::{EagerLoad, EntityQuery, EntitySchema, Model, QueryConstraint};
use crate::query::QueryBuilder;
use crate::value::{DictKey, Value};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Parents sharing one morph type value.
struct MorphGroup {
    type_value: String,
    schema: Arc<EntitySchema>,
    ids: Vec<Value>,
}

/// Polymorphic owner: `{name}_type` names the entity, `{name}_id` its key.
///
/// Constraints are buffered and replayed on each per-type query, since the target
/// entity is only known once the parents' type column has been read. Eager loading
/// runs one query per distinct type.
pub struct MorphTo {
    parent: Model,
    name: String,
    morph_type: String,
    foreign_key: String,
    owner_key: Option<String>,
    constraints: Vec<QueryConstraint>,
    nested: Vec<EagerLoad>,
    morph_with: Vec<(String, Vec<String>)>,
    groups: Vec<MorphGroup>,
}

impl fmt::Debug for MorphTo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MorphTo")
            .field("name", &self.name)
            .field("morph_type", &self.morph_type)
            .field("foreign_key", &self.foreign_key)
            .field("constraints", &self.constraints.len())
            .field("nested", &self.nested)
            .field("morph_with", &self.morph_with)
            .finish()
    }
}

impl MorphTo {
    pub(crate) fn new(parent: &Model, name: &str, def: &RelationDef) -> OrmResult<Self> {
        let morph_name = def.morph_name.as_deref().unwrap_or(name);
        Ok(Self {
            parent: parent.clone(),
            name: name.to_string(),
            morph_type: def
                .morph_type
                .clone()
                .unwrap_or_else(|| format!("{morph_name}_type")),
            foreign_key: def
                .foreign_key
                .clone()
                .unwrap_or_else(|| format!("{morph_name}_id")),
            owner_key: def.owner_key.clone(),
            constraints: def.constraint.iter().cloned().collect(),
            nested: Vec::new(),
            morph_with: def.morph_with.clone(),
            groups: Vec::new(),
        })
    }

    pub fn morph_type(&self) -> &str {
        &self.morph_type
    }

    pub fn foreign_key(&self) -> &str {
        &self.foreign_key
    }

    fn owner_key_for<'a>(&'a self, schema: &'a EntitySchema) -> &'a str {
        self.owner_key.as_deref().unwrap_or(schema.key_name())
    }

    /// Stored discriminator of `model`, if set.
    fn type_of(&self, model: &Model) -> Option<String> {
        model
            .get_raw(&self.morph_type)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    /// Query for one target entity with buffered constraints and nested loads.
    fn target_query(&self, schema: Arc<EntitySchema>, type_value: &str) -> OrmResult<EntityQuery> {
        let mut query = self.parent.orm().query_for(schema.clone())?;
        for constraint in &self.constraints {
            query = constraint(query);
        }
        let mut loads = self.nested.clone();
        for (entity, paths) in &self.morph_with {
            if entity == schema.name() || entity == type_value {
                loads.extend(paths.iter().map(|p| EagerLoad::new(p.as_str())));
            }
        }
        Ok(query.with_loads(loads))
    }
}

#[async_trait]
impl Relation for MorphTo {
    fn kind(&self) -> RelationKind {
        RelationKind::MorphTo
    }

    fn query(&self) -> Option<&EntityQuery> {
        None
    }

    fn constrain(&mut self, constraint: &QueryConstraint) {
        self.constraints.push(constraint.clone());
    }

    fn with_nested(&mut self, loads: Vec<EagerLoad>) {
        self.nested.extend(loads);
    }

    fn morph_with(&mut self, entries: &[(String, Vec<String>)]) -> OrmResult<()> {
        self.morph_with.extend(entries.iter().cloned());
        Ok(())
    }

    fn add_eager_constraints(&mut self, models: &[Model]) -> OrmResult<()> {
        let context = self.parent.orm().context();
        let mut groups: Vec<MorphGroup> = Vec::new();
        let mut seen: HashMap<String, HashSet<DictKey>> = HashMap::new();
        for model in models {
            let Some(type_value) = self.type_of(model) else {
                continue;
            };
            let Some(id) = model.get_raw(&self.foreign_key) else {
                continue;
            };
            let Some(key) = DictKey::from_value(id)? else {
                continue;
            };
            let index = match groups.iter().position(|g| g.type_value == type_value) {
                Some(index) => index,
                None => {
                    let schema = context.resolve_morph_type(&type_value)?;
                    groups.push(MorphGroup {
                        type_value: type_value.clone(),
                        schema,
                        ids: Vec::new(),
                    });
                    groups.len() - 1
                }
            };
            if seen.entry(type_value).or_default().insert(key) {
                groups[index].ids.push(id.clone());
            }
        }
        self.groups = groups;
        Ok(())
    }

    fn init_relation(&self, models: &mut [Model], name: &str) {
        for model in models.iter_mut() {
            model.set_relation(name, RelationValue::One(None));
        }
    }

    fn match_results(&self, models: &mut [Model], results: Vec<Model>, name: &str) -> OrmResult<()> {
        let mut index: HashMap<(String, DictKey), Model> = HashMap::new();
        for result in results {
            let owner_key = self.owner_key_for(result.schema()).to_string();
            let Some(value) = result.get_raw(&owner_key) else {
                continue;
            };
            if let Some(key) = DictKey::from_value(value)? {
                index.entry((result.entity().to_string(), key)).or_insert(result);
            }
        }
        for model in models.iter_mut() {
            let Some(type_value) = self.type_of(model) else {
                continue;
            };
            let Some(group) = self.groups.iter().find(|g| g.type_value == type_value) else {
                continue;
            };
            let Some(id) = model.get_raw(&self.foreign_key) else {
                continue;
            };
            let Some(key) = DictKey::from_value(id)? else {
                continue;
            };
            if let Some(owner) = index.get(&(group.schema.name().to_string(), key)) {
                model.set_relation(name, RelationValue::one(Some(owner.clone())));
            }
        }
        Ok(())
    }

    async fn get_eager(&self) -> OrmResult<Vec<Model>> {
        let mut results = Vec::new();
        for group in &self.groups {
            let column = group.schema.qualify(self.owner_key_for(&group.schema));
            let query = self
                .target_query(group.schema.clone(), &group.type_value)?
                .where_in(&column, group.ids.clone());
            results.extend(query.get().await?);
        }
        Ok(results)
    }

    async fn get_results(&self) -> OrmResult<RelationValue> {
        let Some(type_value) = self.type_of(&self.parent) else {
            return Ok(RelationValue::One(None));
        };
        let id = self
            .parent
            .get_raw(&self.foreign_key)
            .cloned()
            .unwrap_or_default();
        if id.is_null() {
            return Ok(RelationValue::One(None));
        }
        let schema = self.parent.orm().context().resolve_morph_type(&type_value)?;
        let column = schema.qualify(self.owner_key_for(&schema));
        let found = self
            .target_query(schema, &type_value)?
            .where_eq(&column, id)
            .first()
            .await?;
        Ok(RelationValue::one(found))
    }

    fn existence_query(&self, _parent: &EntitySchema, _aggregate: Aggregate) -> OrmResult<QueryBuilder> {
        Err(OrmError::relation(format!(
            "relation [{}] is morph_to; existence queries need a concrete target entity",
            self.name
        )))
    }
}
