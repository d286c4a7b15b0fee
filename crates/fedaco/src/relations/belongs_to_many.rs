use super::pivot::{migrate_pivot_attributes, pivot_schema, PIVOT_ACCESSOR};
use super::{
    dictionary, project, related_query, required_related, self_alias, Aggregate, Constraints, Relation,
    RelationDef, RelationKind, RelationValue,
};
use crate::error::{OrmError, OrmResult};
use crate::grammar::Record;
use crate::naming;
use crate::orm::{fresh_timestamp, EagerLoad, EntityQuery, EntitySchema, Model, QueryConstraint};
use crate::query::QueryBuilder;
use crate::value::{DictKey, Value};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

/// Outcome of [`BelongsToMany::sync`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncChanges {
    pub attached: Vec<Value>,
    pub detached: Vec<Value>,
    pub updated: Vec<Value>,
}

/// Pivot discriminator of a polymorphic many-to-many.
#[derive(Debug, Clone)]
struct PivotMorph {
    column: String,
    class: String,
}

/// Many-to-many through a pivot table, including the polymorphic
/// `morph_to_many` / `morphed_by_many` pair.
///
/// The pivot join is added when the relation is built; pivot columns are selected
/// as `pivot_*` aliases at execution and moved into a pivot model afterwards.
#[derive(Debug)]
pub struct BelongsToMany {
    kind: RelationKind,
    query: EntityQuery,
    parent: Model,
    table: String,
    foreign_pivot_key: String,
    related_pivot_key: String,
    parent_key: String,
    related_key: String,
    morph: Option<PivotMorph>,
    pivot_columns: Vec<String>,
    pivot_timestamps: bool,
    pivot_wheres: Vec<(String, Value)>,
    accessor: String,
    pivot_schema: Arc<EntitySchema>,
}

impl BelongsToMany {
    pub(crate) fn new(parent: &Model, def: &RelationDef, constraints: Constraints) -> OrmResult<Self> {
        let mut query = related_query(parent, required_related(def)?, def)?;
        let related = query.schema().clone();
        let morph_name = || {
            def.morph_name
                .as_deref()
                .ok_or_else(|| OrmError::relation("morph relation has no morph name"))
        };

        let (table, foreign_pivot_key, related_pivot_key, morph) = match def.kind {
            RelationKind::MorphToMany => {
                let name = morph_name()?;
                (
                    naming::plural(name),
                    format!("{name}_id"),
                    related.foreign_key(),
                    Some(PivotMorph {
                        column: format!("{name}_type"),
                        class: parent.morph_class(),
                    }),
                )
            }
            RelationKind::MorphedByMany => {
                let name = morph_name()?;
                (
                    naming::plural(name),
                    parent.foreign_key(),
                    format!("{name}_id"),
                    Some(PivotMorph {
                        column: format!("{name}_type"),
                        class: parent.orm().context().morph_class_for(&related),
                    }),
                )
            }
            _ => (
                naming::pivot_table(parent.entity(), related.name()),
                parent.foreign_key(),
                related.foreign_key(),
                None,
            ),
        };
        let table = def.table.clone().unwrap_or(table);
        let foreign_pivot_key = def.foreign_pivot_key.clone().unwrap_or(foreign_pivot_key);
        let related_pivot_key = def.related_pivot_key.clone().unwrap_or(related_pivot_key);
        let morph = morph.map(|mut m| {
            if let Some(column) = &def.morph_type {
                m.column = column.clone();
            }
            m
        });
        let parent_key = def
            .owner_key
            .clone()
            .unwrap_or_else(|| parent.key_name().to_string());
        let related_key = def
            .related_key
            .clone()
            .unwrap_or_else(|| related.key_name().to_string());

        query = query.join(
            &table,
            &related.qualify(&related_key),
            "=",
            &format!("{table}.{related_pivot_key}"),
        );
        for (column, value) in &def.pivot_wheres {
            query = query.where_eq(&format!("{table}.{column}"), value.clone());
        }

        let mut relation = Self {
            kind: def.kind,
            pivot_schema: pivot_schema(
                &table,
                &foreign_pivot_key,
                &related_pivot_key,
                def.pivot_timestamps,
                parent.schema().connection_name(),
            ),
            query,
            parent: parent.clone(),
            table,
            foreign_pivot_key,
            related_pivot_key,
            parent_key,
            related_key,
            morph,
            pivot_columns: def.pivot_columns.clone(),
            pivot_timestamps: def.pivot_timestamps,
            pivot_wheres: def.pivot_wheres.clone(),
            accessor: def
                .pivot_accessor
                .clone()
                .unwrap_or_else(|| PIVOT_ACCESSOR.to_string()),
        };

        if constraints.applies() {
            let value = relation.parent_key_value();
            let column = relation.pivot_column(&relation.foreign_pivot_key);
            relation.query = relation.query.clone().where_eq(&column, value);
            relation.query = relation.with_morph_type(relation.query.clone());
        }
        Ok(relation)
    }

    fn pivot_column(&self, column: &str) -> String {
        format!("{}.{column}", self.table)
    }

    fn parent_key_value(&self) -> Value {
        self.parent
            .get_raw(&self.parent_key)
            .cloned()
            .unwrap_or_default()
    }

    fn with_morph_type(&self, query: EntityQuery) -> EntityQuery {
        match &self.morph {
            Some(morph) => query.where_eq(&self.pivot_column(&morph.column), morph.class.as_str()),
            None => query,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn foreign_pivot_key(&self) -> &str {
        &self.foreign_pivot_key
    }

    pub fn related_pivot_key(&self) -> &str {
        &self.related_pivot_key
    }

    /// Restrict to pivot rows with `column = value`, for reads and pivot writes.
    pub fn where_pivot(mut self, column: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        self.query = self
            .query
            .clone()
            .where_eq(&self.pivot_column(column), value.clone());
        self.pivot_wheres.push((column.to_string(), value));
        self
    }

    /// Pivot columns selected with every related row.
    fn pivot_select_columns(&self) -> Vec<String> {
        let mut columns = vec![self.foreign_pivot_key.clone(), self.related_pivot_key.clone()];
        if let Some(morph) = &self.morph {
            columns.push(morph.column.clone());
        }
        columns.extend(self.pivot_columns.iter().cloned());
        if self.pivot_timestamps {
            columns.push(self.pivot_schema.created_at().to_string());
            columns.push(self.pivot_schema.updated_at().to_string());
        }
        let mut seen = HashSet::new();
        columns.retain(|c| seen.insert(c.clone()));
        columns
    }

    fn select_query(&self) -> EntityQuery {
        let mut query = self.query.clone();
        if query.base().state().columns.is_empty() {
            let all = format!("{}.*", query.schema().table_name());
            query = query.select(&[all.as_str()]);
        }
        let aliases: Vec<String> = self
            .pivot_select_columns()
            .iter()
            .map(|c| format!("{} as {}{c}", self.pivot_column(c), super::pivot::PIVOT_PREFIX))
            .collect();
        let aliases: Vec<&str> = aliases.iter().map(String::as_str).collect();
        query.add_select(&aliases)
    }

    async fn fetch(&self) -> OrmResult<Vec<Model>> {
        let mut models = self.select_query().get().await?;
        for model in &mut models {
            migrate_pivot_attributes(model, &self.pivot_schema, &self.accessor);
        }
        Ok(models)
    }

    // ==================== Pivot writes ====================

    /// Pivot table query scoped to the parent, the morph type and pivot wheres.
    fn new_pivot_query(&self) -> OrmResult<QueryBuilder> {
        let connection = self.parent.orm().connection_for(self.parent.schema())?;
        let mut query = connection
            .table(&self.table)
            .where_eq(&self.foreign_pivot_key, self.parent_key_value());
        if let Some(morph) = &self.morph {
            query = query.where_eq(&morph.column, morph.class.as_str());
        }
        for (column, value) in &self.pivot_wheres {
            query = query.where_eq(column, value.clone());
        }
        Ok(query)
    }

    fn require_parent_key(&self) -> OrmResult<Value> {
        let key = self.parent_key_value();
        if key.is_null() {
            return Err(OrmError::validation(format!(
                "cannot modify pivot [{}] of an unsaved [{}]",
                self.table,
                self.parent.entity()
            )));
        }
        Ok(key)
    }

    fn attach_record(&self, parent_key: &Value, id: Value, attributes: &Record, now: &Value) -> Record {
        let mut record: Record = vec![
            (self.foreign_pivot_key.clone(), parent_key.clone()),
            (self.related_pivot_key.clone(), id),
        ];
        if let Some(morph) = &self.morph {
            record.push((morph.column.clone(), Value::from(morph.class.as_str())));
        }
        for (column, value) in &self.pivot_wheres {
            if !attributes.iter().any(|(c, _)| c == column) {
                record.push((column.clone(), value.clone()));
            }
        }
        record.extend(attributes.iter().cloned());
        if self.pivot_timestamps {
            for column in [self.pivot_schema.created_at(), self.pivot_schema.updated_at()] {
                if !record.iter().any(|(c, _)| c == column) {
                    record.push((column.to_string(), now.clone()));
                }
            }
        }
        record
    }

    /// Insert pivot rows for `ids`, each carrying `attributes`.
    pub async fn attach<I>(&self, ids: I, attributes: Record) -> OrmResult<()>
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        let ids: Vec<Value> = ids.into_iter().map(Into::into).collect();
        if ids.is_empty() {
            return Ok(());
        }
        let parent_key = self.require_parent_key()?;
        let now = fresh_timestamp();
        let rows = ids
            .into_iter()
            .map(|id| self.attach_record(&parent_key, id, &attributes, &now))
            .collect();
        self.new_pivot_query()?.insert_many(rows).await?;
        Ok(())
    }

    /// Delete pivot rows for `ids`, or every row of the parent when `None`.
    pub async fn detach(&self, ids: Option<Vec<Value>>) -> OrmResult<u64> {
        let mut query = self.new_pivot_query()?;
        if let Some(ids) = ids {
            if ids.is_empty() {
                return Ok(0);
            }
            query = query.where_in(&self.related_pivot_key, ids);
        }
        query.delete().await
    }

    /// Update the pivot row of `id`.
    pub async fn update_existing_pivot(&self, id: impl Into<Value>, attributes: Record) -> OrmResult<u64> {
        let mut values = attributes;
        if self.pivot_timestamps {
            let column = self.pivot_schema.updated_at();
            if !values.iter().any(|(c, _)| c == column) {
                values.push((column.to_string(), fresh_timestamp()));
            }
        }
        self.new_pivot_query()?
            .where_eq(&self.related_pivot_key, id)
            .update(values)
            .await
    }

    /// Related keys currently attached.
    pub async fn attached_ids(&self) -> OrmResult<Vec<Value>> {
        self.new_pivot_query()?.pluck(&self.related_pivot_key).await
    }

    /// Make `ids` the exact attached set.
    pub async fn sync<I>(&self, ids: I) -> OrmResult<SyncChanges>
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        let entries = ids.into_iter().map(|id| (id.into(), Vec::new())).collect();
        self.sync_with_attributes(entries, true).await
    }

    /// Attach missing `ids` and keep the rest.
    pub async fn sync_without_detaching<I>(&self, ids: I) -> OrmResult<SyncChanges>
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        let entries = ids.into_iter().map(|id| (id.into(), Vec::new())).collect();
        self.sync_with_attributes(entries, false).await
    }

    /// Sync with per-id pivot attributes; already attached ids with attributes are
    /// updated in place.
    pub async fn sync_with_attributes(
        &self,
        entries: Vec<(Value, Record)>,
        detaching: bool,
    ) -> OrmResult<SyncChanges> {
        let mut changes = SyncChanges::default();
        let current = self.attached_ids().await?;
        let mut current_keys = HashSet::new();
        for id in &current {
            if let Some(key) = DictKey::from_value(id)? {
                current_keys.insert(key);
            }
        }
        let mut wanted_keys = HashSet::new();
        for (id, _) in &entries {
            if let Some(key) = DictKey::from_value(id)? {
                wanted_keys.insert(key);
            }
        }

        if detaching {
            let mut stale = Vec::new();
            for id in current {
                if let Some(key) = DictKey::from_value(&id)?
                    && !wanted_keys.contains(&key)
                {
                    stale.push(id);
                }
            }
            if !stale.is_empty() {
                self.detach(Some(stale.clone())).await?;
                changes.detached = stale;
            }
        }

        for (id, attributes) in entries {
            let Some(key) = DictKey::from_value(&id)? else {
                continue;
            };
            if current_keys.contains(&key) {
                if !attributes.is_empty() && self.update_existing_pivot(id.clone(), attributes).await? > 0 {
                    changes.updated.push(id);
                }
            } else {
                self.attach([id.clone()], attributes).await?;
                current_keys.insert(key);
                changes.attached.push(id);
            }
        }
        Ok(changes)
    }

    /// Detach attached ids among `ids` and attach the others.
    pub async fn toggle<I>(&self, ids: I) -> OrmResult<SyncChanges>
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        let ids: Vec<Value> = ids.into_iter().map(Into::into).collect();
        let mut current_keys = HashSet::new();
        for id in self.attached_ids().await? {
            if let Some(key) = DictKey::from_value(&id)? {
                current_keys.insert(key);
            }
        }
        let mut changes = SyncChanges::default();
        for id in ids {
            match DictKey::from_value(&id)? {
                Some(key) if current_keys.contains(&key) => changes.detached.push(id),
                Some(_) => changes.attached.push(id),
                None => {}
            }
        }
        if !changes.detached.is_empty() {
            self.detach(Some(changes.detached.clone())).await?;
        }
        self.attach(changes.attached.clone(), Vec::new()).await?;
        Ok(changes)
    }

    /// Save `model` then attach it.
    pub async fn save(&self, model: &mut Model, attributes: Record) -> OrmResult<()> {
        model.save().await?;
        let id = model.get_raw(&self.related_key).cloned().unwrap_or_default();
        self.attach([id], attributes).await
    }

    pub async fn create<I, K, V>(&self, attributes: I, pivot: Record) -> OrmResult<Model>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut model = self.query.make(attributes)?;
        self.save(&mut model, pivot).await?;
        Ok(model)
    }
}

#[async_trait]
impl Relation for BelongsToMany {
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
        let keys = dictionary::collect_keys(models, &self.parent_key)?;
        let column = self.pivot_column(&self.foreign_pivot_key);
        let query = self.query.clone().where_in(&column, keys);
        self.query = self.with_morph_type(query);
        Ok(())
    }

    fn init_relation(&self, models: &mut [Model], name: &str) {
        for model in models.iter_mut() {
            model.set_relation(name, RelationValue::Many(Vec::new()));
        }
    }

    fn match_results(&self, models: &mut [Model], results: Vec<Model>, name: &str) -> OrmResult<()> {
        let dictionary = dictionary::build_by(results, |model| {
            model
                .related(&self.accessor)
                .and_then(|pivot| pivot.get_raw(&self.foreign_pivot_key).cloned())
        })?;
        dictionary::match_parents(models, &dictionary, &self.parent_key, name, true)
    }

    async fn get_eager(&self) -> OrmResult<Vec<Model>> {
        self.fetch().await
    }

    async fn get_results(&self) -> OrmResult<RelationValue> {
        if self.parent_key_value().is_null() {
            return Ok(RelationValue::Many(Vec::new()));
        }
        Ok(RelationValue::Many(self.fetch().await?))
    }

    fn to_sql(&self) -> OrmResult<crate::grammar::CompiledQuery> {
        self.select_query().to_sql()
    }

    fn existence_query(&self, parent: &EntitySchema, aggregate: Aggregate) -> OrmResult<QueryBuilder> {
        let related_table = self.query.schema().table_name();
        let mut query = self.query.to_base();
        if parent.table_name() == related_table {
            let (aliased, alias) = self_alias(&self.parent, query, related_table);
            query = aliased;
            let rejoined = query
                .new_query()
                .join(
                    &self.table,
                    &format!("{alias}.{}", self.related_key),
                    "=",
                    &self.pivot_column(&self.related_pivot_key),
                )
                .into_state()
                .joins;
            if let (Some(slot), Some(join)) = (query.state_mut().joins.first_mut(), rejoined.into_iter().next()) {
                *slot = join;
            }
        }
        query = query.where_column(
            &parent.qualify(&self.parent_key),
            "=",
            &self.pivot_column(&self.foreign_pivot_key),
        );
        if let Some(morph) = &self.morph {
            query = query.where_eq(&self.pivot_column(&morph.column), morph.class.as_str());
        }
        Ok(project(query, aggregate))
    }
}
