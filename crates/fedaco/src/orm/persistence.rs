//! Saving, deleting, reloading and relation access on [`Model`].

use super::eager::{eager_load_relations, EagerLoad};
use super::model::Model;
use super::query::{count_alias, fresh_timestamp, EntityQuery};
use crate::error::{OrmError, OrmResult};
use crate::grammar::Record;
use crate::query::QueryBuilder;
use crate::relations::{
    self, BelongsTo, BelongsToMany, Constraints, HasManyThrough, HasOneOrMany, MorphTo, Relation, RelationKind,
    RelationValue, PIVOT_ACCESSOR,
};
use crate::value::Value;

impl Model {
    // ==================== Queries ====================

    /// Query for this entity with its global scopes pending.
    pub fn new_query(&self) -> OrmResult<EntityQuery> {
        self.orm().query_for(self.schema().clone())
    }

    pub fn new_query_without_scopes(&self) -> OrmResult<EntityQuery> {
        Ok(self.new_query()?.without_global_scopes())
    }

    /// Key value identifying the stored row: the original key when loaded.
    fn key_for_save(&self, column: &str) -> Value {
        self.get_original(column)
            .or_else(|| self.get_raw(column))
            .cloned()
            .unwrap_or_default()
    }

    /// Builder targeting exactly this row.
    fn key_query(&self) -> OrmResult<QueryBuilder> {
        let mut query = self.new_query_without_scopes()?.to_base();
        let columns: Vec<String> = match self.schema().get_composite_key() {
            Some((first, second)) => vec![first.to_string(), second.to_string()],
            None => vec![self.key_name().to_string()],
        };
        for column in columns {
            let key = self.key_for_save(&column);
            if key.is_null() {
                return Err(OrmError::validation(format!(
                    "model [{}] has no value for key [{column}]",
                    self.entity()
                )));
            }
            query = query.where_eq(&column, key);
        }
        Ok(query)
    }

    // ==================== Persistence ====================

    fn touch_timestamps(&mut self) -> OrmResult<()> {
        if !self.schema().uses_timestamps() {
            return Ok(());
        }
        let now = fresh_timestamp();
        let updated_at = self.schema().updated_at().to_string();
        if !self.is_dirty(&[updated_at.as_str()]) {
            self.set_attribute(updated_at, now.clone())?;
        }
        let created_at = self.schema().created_at().to_string();
        if !self.exists && !self.is_dirty(&[created_at.as_str()]) {
            self.set_attribute(created_at, now)?;
        }
        Ok(())
    }

    async fn perform_insert(&mut self) -> OrmResult<()> {
        self.touch_timestamps()?;
        let attributes: Record = self
            .attributes()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let query = self.new_query_without_scopes()?.to_base();
        if self.schema().is_incrementing() {
            let key_name = self.key_name().to_string();
            let id = query.insert_get_id(attributes, Some(&key_name)).await?;
            self.attributes_mut().insert(key_name, id);
        } else {
            query.insert(attributes).await?;
        }
        self.exists = true;
        self.was_recently_created = true;
        Ok(())
    }

    async fn perform_update(&mut self) -> OrmResult<()> {
        if !self.is_dirty(&[]) {
            return Ok(());
        }
        self.touch_timestamps()?;
        let dirty: Record = self.get_dirty().into_iter().collect();
        self.key_query()?.update(dirty).await?;
        self.sync_changes();
        Ok(())
    }

    /// Insert or update the row, then snapshot the attributes as original.
    pub async fn save(&mut self) -> OrmResult<()> {
        if self.exists {
            self.perform_update().await?;
        } else {
            self.perform_insert().await?;
        }
        self.sync_original();
        tracing::trace!(
            target: "fedaco.sql",
            entity = %self.entity(),
            created = self.was_recently_created,
            "saved model"
        );
        Ok(())
    }

    /// Fill `attributes` and save.
    pub async fn update<I, K, V>(&mut self, attributes: I) -> OrmResult<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        if !self.exists {
            return Err(OrmError::validation(format!(
                "cannot update an unsaved [{}]",
                self.entity()
            )));
        }
        self.fill(attributes)?;
        self.save().await
    }

    /// Add `amount` to a numeric column in the row and on the model.
    pub async fn increment(&mut self, column: &str, amount: i64) -> OrmResult<()> {
        let mut extra = Vec::new();
        if self.schema().uses_timestamps() {
            let now = fresh_timestamp();
            extra.push((self.schema().updated_at().to_string(), now.clone()));
            self.set_attribute(self.schema().updated_at().to_string(), now)?;
            let updated_at = self.schema().updated_at().to_string();
            self.sync_original_attribute(&updated_at);
        }
        self.key_query()?.increment_with(column, amount, extra).await?;
        let current = self.get_raw(column).and_then(Value::as_i64).unwrap_or(0);
        self.attributes_mut()
            .insert(column.to_string(), Value::Int(current + amount));
        self.sync_original_attribute(column);
        Ok(())
    }

    pub async fn decrement(&mut self, column: &str, amount: i64) -> OrmResult<()> {
        self.increment(column, -amount).await
    }

    /// Delete the row; soft deleting entities stamp `deleted_at` instead.
    /// Returns false for a model that was never saved.
    pub async fn delete(&mut self) -> OrmResult<bool> {
        if !self.exists {
            return Ok(false);
        }
        if !self.schema().uses_soft_deletes() {
            return self.force_delete().await;
        }
        let now = fresh_timestamp();
        let mut columns = vec![self.schema().deleted_at().to_string()];
        if self.schema().uses_timestamps() {
            columns.push(self.schema().updated_at().to_string());
        }
        let values: Record = columns.iter().map(|c| (c.clone(), now.clone())).collect();
        self.key_query()?.update(values).await?;
        for column in &columns {
            self.set_attribute(column.clone(), now.clone())?;
            self.sync_original_attribute(column);
        }
        Ok(true)
    }

    /// Delete the row even when the entity soft deletes.
    pub async fn force_delete(&mut self) -> OrmResult<bool> {
        if !self.exists {
            return Ok(false);
        }
        self.key_query()?.delete().await?;
        self.exists = false;
        Ok(true)
    }

    /// Clear `deleted_at` on a soft deleted model.
    pub async fn restore(&mut self) -> OrmResult<()> {
        if !self.schema().uses_soft_deletes() {
            return Err(OrmError::validation(format!(
                "model [{}] does not use soft deletes",
                self.entity()
            )));
        }
        let column = self.schema().deleted_at().to_string();
        self.set_attribute(column, Value::Null)?;
        self.exists = true;
        self.save().await
    }

    pub fn trashed(&self) -> bool {
        self.schema().uses_soft_deletes()
            && self
                .get_raw(self.schema().deleted_at())
                .is_some_and(|v| !v.is_null())
    }

    /// Update `updated_at` only.
    pub async fn touch(&mut self) -> OrmResult<bool> {
        if !self.schema().uses_timestamps() || !self.exists {
            return Ok(false);
        }
        let column = self.schema().updated_at().to_string();
        self.set_attribute(column, fresh_timestamp())?;
        self.save().await?;
        Ok(true)
    }

    // ==================== Reloading ====================

    /// A newly queried copy of this row, with `with` eager loaded.
    pub async fn fresh(&self, with: &[&str]) -> OrmResult<Option<Model>> {
        if !self.exists {
            return Ok(None);
        }
        self.new_query_without_scopes()?
            .with(with)
            .where_key(self.get_key())
            .first()
            .await
    }

    /// Reload attributes from the database, then reload loaded relations.
    pub async fn refresh(&mut self) -> OrmResult<()> {
        if !self.exists {
            return Ok(());
        }
        let fresh = self
            .new_query_without_scopes()?
            .where_key(self.get_key())
            .first_or_fail()
            .await?;
        self.set_raw_attributes(fresh.attributes().clone(), true);
        let names: Vec<String> = self
            .relations()
            .keys()
            .filter(|name| name.as_str() != PIVOT_ACCESSOR && self.schema().relation_def(name).is_some())
            .cloned()
            .collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        self.load(&names).await
    }

    // ==================== Relations ====================

    /// Eager load relation paths onto this model.
    pub async fn load(&mut self, paths: &[&str]) -> OrmResult<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let loads: Vec<EagerLoad> = paths.iter().map(|p| EagerLoad::new(*p)).collect();
        let orm = self.orm().clone();
        let schema = self.schema().clone();
        eager_load_relations(&orm, &schema, std::slice::from_mut(self), &loads).await
    }

    /// Load only the paths whose top-level relation is not loaded yet.
    pub async fn load_missing(&mut self, paths: &[&str]) -> OrmResult<()> {
        let missing: Vec<&str> = paths
            .iter()
            .copied()
            .filter(|path| {
                let head = path.split('.').next().unwrap_or_default();
                !self.relation_loaded(head)
            })
            .collect();
        self.load(&missing).await
    }

    /// Set `{relation}_count` attributes for each relation.
    pub async fn load_count(&mut self, relations: &[&str]) -> OrmResult<()> {
        if relations.is_empty() || !self.exists {
            return Ok(());
        }
        let row = self
            .new_query()?
            .with_trashed()
            .with_count(relations)
            .where_key(self.get_key())
            .to_base()
            .first()
            .await?
            .ok_or_else(|| OrmError::model_not_found(self.entity(), [self.get_key()]))?;
        for relation in relations {
            let (_, alias) = count_alias(relation);
            if let Some(value) = row.get(&alias) {
                self.attributes_mut().insert(alias.clone(), value.clone());
                self.sync_original_attribute(&alias);
            }
        }
        Ok(())
    }

    /// Live relation object for `name`, constrained to this model.
    pub fn relation(&self, name: &str) -> OrmResult<Box<dyn Relation>> {
        relations::resolve(self, name)
    }

    /// Live relation object for `name` without the key predicate, for reading its
    /// tables and keys or for batching over many parents.
    pub fn bare_relation(&self, name: &str) -> OrmResult<Box<dyn Relation>> {
        relations::resolve_with(self, name, Constraints::Bare)
    }

    /// Loaded value of `name`, lazily querying it on first access.
    pub async fn get_relation_value(&mut self, name: &str) -> OrmResult<&RelationValue> {
        if !self.relation_loaded(name) {
            let value = relations::resolve(self, name)?.get_results().await?;
            self.set_relation(name, value);
        }
        self.get_relation(name).ok_or_else(|| OrmError::RelationNotFound {
            model: self.entity().to_string(),
            relation: name.to_string(),
        })
    }

    fn relation_of_kind(&self, name: &str, kinds: &[RelationKind]) -> OrmResult<&relations::RelationDef> {
        let def = relations::definition(self, name)?;
        if kinds.contains(&def.kind()) {
            Ok(def)
        } else {
            Err(OrmError::relation(format!(
                "relation [{name}] on [{}] is {:?}, expected one of {kinds:?}",
                self.entity(),
                def.kind()
            )))
        }
    }

    pub fn belongs_to(&self, name: &str) -> OrmResult<BelongsTo> {
        let def = self.relation_of_kind(name, &[RelationKind::BelongsTo])?;
        BelongsTo::new(self, name, def, Constraints::Keyed)
    }

    pub fn has_one_or_many(&self, name: &str) -> OrmResult<HasOneOrMany> {
        let def = self.relation_of_kind(
            name,
            &[
                RelationKind::HasOne,
                RelationKind::HasMany,
                RelationKind::MorphOne,
                RelationKind::MorphMany,
            ],
        )?;
        HasOneOrMany::new(self, def, Constraints::Keyed)
    }

    pub fn belongs_to_many(&self, name: &str) -> OrmResult<BelongsToMany> {
        let def = self.relation_of_kind(
            name,
            &[
                RelationKind::BelongsToMany,
                RelationKind::MorphToMany,
                RelationKind::MorphedByMany,
            ],
        )?;
        BelongsToMany::new(self, def, Constraints::Keyed)
    }

    pub fn morph_to(&self, name: &str) -> OrmResult<MorphTo> {
        let def = self.relation_of_kind(name, &[RelationKind::MorphTo])?;
        MorphTo::new(self, name, def)
    }

    pub fn has_many_through(&self, name: &str) -> OrmResult<HasManyThrough> {
        let def = self.relation_of_kind(
            name,
            &[RelationKind::HasOneThrough, RelationKind::HasManyThrough],
        )?;
        HasManyThrough::new(self, def, Constraints::Keyed)
    }

    /// Point a belongs-to or morph-to relation at `owner` and cache it as loaded.
    pub fn associate(&mut self, name: &str, owner: &Model) -> OrmResult<&mut Self> {
        let def = self.relation_of_kind(name, &[RelationKind::BelongsTo, RelationKind::MorphTo])?;
        match def.kind() {
            RelationKind::MorphTo => {
                let relation = MorphTo::new(self, name, def)?;
                let key = owner.get_key();
                self.set_attribute(relation.foreign_key().to_string(), key)?;
                self.set_attribute(relation.morph_type().to_string(), owner.morph_class())?;
            }
            _ => {
                let relation = BelongsTo::new(self, name, def, Constraints::Keyed)?;
                let key = owner
                    .get_raw(relation.owner_key())
                    .cloned()
                    .unwrap_or_default();
                self.set_attribute(relation.foreign_key().to_string(), key)?;
            }
        }
        self.set_relation(name, RelationValue::one(Some(owner.clone())));
        Ok(self)
    }

    /// Clear a belongs-to or morph-to relation.
    pub fn dissociate(&mut self, name: &str) -> OrmResult<&mut Self> {
        let def = self.relation_of_kind(name, &[RelationKind::BelongsTo, RelationKind::MorphTo])?;
        match def.kind() {
            RelationKind::MorphTo => {
                let relation = MorphTo::new(self, name, def)?;
                self.set_attribute(relation.foreign_key().to_string(), Value::Null)?;
                self.set_attribute(relation.morph_type().to_string(), Value::Null)?;
            }
            _ => {
                let relation = BelongsTo::new(self, name, def, Constraints::Keyed)?;
                self.set_attribute(relation.foreign_key().to_string(), Value::Null)?;
            }
        }
        self.set_relation(name, RelationValue::One(None));
        Ok(self)
    }
}
