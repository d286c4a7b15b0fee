//! Dynamic entity instances: attributes, original snapshot, dirty tracking and
//! loaded relations.

use super::schema::EntitySchema;
use super::Orm;
use crate::error::{OrmError, OrmResult};
use crate::relations::RelationValue;
use crate::row::Row;
use crate::value::{DictKey, FromValue, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// One entity row.
///
/// Attributes are stored in their storage representation; [`Model::get_attribute`]
/// applies the schema's casts on the way out and [`Model::set_attribute`] on the way
/// in. `original` is the snapshot taken when the row was loaded or last saved, and
/// the dirty set is the difference between the two.
#[derive(Clone)]
pub struct Model {
    orm: Orm,
    schema: Arc<EntitySchema>,
    attributes: BTreeMap<String, Value>,
    original: BTreeMap<String, Value>,
    changes: BTreeMap<String, Value>,
    relations: BTreeMap<String, RelationValue>,
    pub(crate) exists: bool,
    pub(crate) was_recently_created: bool,
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("entity", &self.schema.name())
            .field("exists", &self.exists)
            .field("attributes", &self.attributes)
            .field("relations", &self.relations.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Model {
    /// Empty, unsaved instance.
    pub fn new(orm: Orm, schema: Arc<EntitySchema>) -> Self {
        Self {
            orm,
            schema,
            attributes: BTreeMap::new(),
            original: BTreeMap::new(),
            changes: BTreeMap::new(),
            relations: BTreeMap::new(),
            exists: false,
            was_recently_created: false,
        }
    }

    /// Hydrate a persisted model from a result row.
    pub(crate) fn from_row(orm: Orm, schema: Arc<EntitySchema>, row: Row) -> Self {
        let mut model = Self::new(orm, schema);
        model.set_raw_attributes(row.into_pairs(), true);
        model.exists = true;
        model
    }

    /// Instance of the same entity with `attributes` as raw state.
    pub fn new_instance(&self, attributes: BTreeMap<String, Value>, exists: bool) -> Self {
        let mut model = Self::new(self.orm.clone(), self.schema.clone());
        model.set_raw_attributes(attributes, true);
        model.exists = exists;
        model
    }

    // ==================== Metadata ====================

    pub fn orm(&self) -> &Orm {
        &self.orm
    }

    pub fn schema(&self) -> &Arc<EntitySchema> {
        &self.schema
    }

    pub fn entity(&self) -> &str {
        self.schema.name()
    }

    pub fn table(&self) -> &str {
        self.schema.table_name()
    }

    pub fn key_name(&self) -> &str {
        self.schema.key_name()
    }

    pub fn qualified_key_name(&self) -> String {
        self.schema.qualified_key_name()
    }

    /// Primary key value, `NULL` when unset.
    pub fn get_key(&self) -> Value {
        self.attributes
            .get(self.schema.key_name())
            .cloned()
            .unwrap_or_default()
    }

    /// Foreign key other entities use to point at this one.
    pub fn foreign_key(&self) -> String {
        self.schema.foreign_key()
    }

    /// Discriminator written into morph type columns for this entity.
    pub fn morph_class(&self) -> String {
        self.orm.context().morph_class_for(&self.schema)
    }

    pub fn exists(&self) -> bool {
        self.exists
    }

    pub fn was_recently_created(&self) -> bool {
        self.was_recently_created
    }

    /// Same entity, same table and same non-null key.
    pub fn is(&self, other: &Model) -> bool {
        let key = self.get_key();
        !key.is_null()
            && self.table() == other.table()
            && self.schema.get_composite_key().is_none()
            && DictKey::from_value(&key).ok() == DictKey::from_value(&other.get_key()).ok()
    }

    // ==================== Attributes ====================

    /// Mass-assign attributes, rejecting any key the schema does not allow.
    pub fn fill<I, K, V>(&mut self, attributes: I) -> OrmResult<&mut Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        for (key, value) in attributes {
            let key = key.into();
            if !self.schema.is_fillable(&key) {
                return Err(OrmError::MassAssignment {
                    model: self.schema.name().to_string(),
                    key,
                });
            }
            self.set_attribute(key, value)?;
        }
        Ok(self)
    }

    /// Assign attributes without the fillable check.
    pub fn force_fill<I, K, V>(&mut self, attributes: I) -> OrmResult<&mut Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        for (key, value) in attributes {
            self.set_attribute(key, value)?;
        }
        Ok(self)
    }

    /// Replace the attribute map with storage values, optionally snapshotting it.
    pub fn set_raw_attributes<I, K>(&mut self, attributes: I, sync: bool)
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        self.attributes = attributes.into_iter().map(|(k, v)| (k.into(), v)).collect();
        if sync {
            self.sync_original();
        }
    }

    pub fn attributes(&self) -> &BTreeMap<String, Value> {
        &self.attributes
    }

    pub(crate) fn attributes_mut(&mut self) -> &mut BTreeMap<String, Value> {
        &mut self.attributes
    }

    /// Stored value without casting.
    pub fn get_raw(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn has_attribute(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }

    /// Attribute value with its cast applied; `NULL` when absent.
    pub fn get_attribute(&self, key: &str) -> OrmResult<Value> {
        let Some(raw) = self.attributes.get(key) else {
            return Ok(Value::Null);
        };
        match self.schema.cast_of(key) {
            Some(cast) => cast.get(raw).map_err(|e| match e {
                OrmError::Decode { message, .. } => OrmError::decode(key, message),
                other => other,
            }),
            None => Ok(raw.clone()),
        }
    }

    /// Typed attribute read.
    pub fn get<T: FromValue>(&self, key: &str) -> OrmResult<T> {
        T::from_value(&self.get_attribute(key)?).map_err(|e| match e {
            OrmError::Decode { message, .. } => OrmError::decode(key, message),
            other => other,
        })
    }

    /// Set an attribute, converting it to its storage form through the schema's cast.
    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<Value>) -> OrmResult<&mut Self> {
        let key = key.into();
        let value = match self.schema.cast_of(&key) {
            Some(cast) => cast.set(value.into()).map_err(|e| match e {
                OrmError::Decode { message, .. } => OrmError::decode(&key, message),
                other => other,
            })?,
            None => value.into(),
        };
        self.attributes.insert(key, value);
        Ok(self)
    }

    pub fn unset_attribute(&mut self, key: &str) -> Option<Value> {
        self.attributes.remove(key)
    }

    // ==================== Dirty tracking ====================

    pub fn sync_original(&mut self) -> &mut Self {
        self.original = self.attributes.clone();
        self
    }

    pub fn sync_original_attribute(&mut self, key: &str) -> &mut Self {
        match self.attributes.get(key) {
            Some(v) => {
                self.original.insert(key.to_string(), v.clone());
            }
            None => {
                self.original.remove(key);
            }
        }
        self
    }

    /// Record the current dirty set as the last saved changes.
    pub(crate) fn sync_changes(&mut self) {
        self.changes = self.get_dirty();
    }

    pub fn get_original(&self, key: &str) -> Option<&Value> {
        self.original.get(key)
    }

    pub fn original(&self) -> &BTreeMap<String, Value> {
        &self.original
    }

    fn original_is_equivalent(&self, key: &str) -> bool {
        let (Some(current), Some(original)) = (self.attributes.get(key), self.original.get(key)) else {
            return false;
        };
        if current == original {
            return true;
        }
        if current.is_null() || original.is_null() {
            return false;
        }
        if let Some(cast) = self.schema.cast_of(key)
            && let (Ok(a), Ok(b)) = (cast.get(current), cast.get(original))
        {
            return a == b;
        }
        match (current.as_f64(), original.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Attributes changed since the last sync.
    pub fn get_dirty(&self) -> BTreeMap<String, Value> {
        self.attributes
            .iter()
            .filter(|(k, _)| !self.original_is_equivalent(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Whether any of `keys` (or any attribute when empty) is dirty.
    pub fn is_dirty(&self, keys: &[&str]) -> bool {
        let dirty = self.get_dirty();
        if keys.is_empty() {
            !dirty.is_empty()
        } else {
            keys.iter().any(|k| dirty.contains_key(*k))
        }
    }

    pub fn is_clean(&self, keys: &[&str]) -> bool {
        !self.is_dirty(keys)
    }

    /// Whether any of `keys` (or anything when empty) changed in the last save.
    pub fn was_changed(&self, keys: &[&str]) -> bool {
        if keys.is_empty() {
            !self.changes.is_empty()
        } else {
            keys.iter().any(|k| self.changes.contains_key(*k))
        }
    }

    pub fn get_changes(&self) -> &BTreeMap<String, Value> {
        &self.changes
    }

    // ==================== Relations ====================

    pub fn set_relation(&mut self, name: impl Into<String>, value: RelationValue) -> &mut Self {
        self.relations.insert(name.into(), value);
        self
    }

    pub fn unset_relation(&mut self, name: &str) -> Option<RelationValue> {
        self.relations.remove(name)
    }

    pub fn relation_loaded(&self, name: &str) -> bool {
        self.relations.contains_key(name)
    }

    pub fn get_relation(&self, name: &str) -> Option<&RelationValue> {
        self.relations.get(name)
    }

    pub fn get_relation_mut(&mut self, name: &str) -> Option<&mut RelationValue> {
        self.relations.get_mut(name)
    }

    pub fn relations(&self) -> &BTreeMap<String, RelationValue> {
        &self.relations
    }

    /// Loaded single-model relation.
    pub fn related(&self, name: &str) -> Option<&Model> {
        self.relations.get(name).and_then(RelationValue::as_one)
    }

    /// Loaded collection relation; empty when not loaded.
    pub fn related_many(&self, name: &str) -> &[Model] {
        self.relations
            .get(name)
            .map(RelationValue::as_many)
            .unwrap_or_default()
    }

    /// Pivot row attached by a many-to-many relation.
    pub fn pivot(&self) -> Option<&Model> {
        self.related("pivot")
    }

    // ==================== Serialization ====================

    /// Visible attributes with casts applied, followed by loaded relations.
    pub fn to_json(&self) -> OrmResult<serde_json::Value> {
        let mut map = serde_json::Map::new();
        for key in self.attributes.keys() {
            if self.schema.is_hidden(key) {
                continue;
            }
            map.insert(key.clone(), self.get_attribute(key)?.to_json());
        }
        for (name, value) in &self.relations {
            map.insert(name.clone(), value.to_json()?);
        }
        Ok(serde_json::Value::Object(map))
    }

    /// Unsaved copy without the key, timestamps and `except` attributes.
    pub fn replicate(&self, except: &[&str]) -> Model {
        let mut skip: Vec<&str> = vec![self.schema.key_name()];
        if self.schema.uses_timestamps() {
            skip.push(self.schema.created_at());
            skip.push(self.schema.updated_at());
        }
        skip.extend_from_slice(except);
        let attributes = self
            .attributes
            .iter()
            .filter(|(k, _)| !skip.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()));
        let mut copy = Model::new(self.orm.clone(), self.schema.clone());
        copy.set_raw_attributes(attributes, false);
        copy.relations = self.relations.clone();
        copy
    }
}
