//! Intermediate rows of many-to-many relations.

use crate::orm::{EntitySchema, Model};
use std::sync::Arc;

/// Relation name the pivot model is attached under unless renamed with
/// [`RelationDef::as_accessor`](super::RelationDef::as_accessor).
pub const PIVOT_ACCESSOR: &str = "pivot";

/// Column alias prefix for pivot columns selected alongside related rows.
pub(crate) const PIVOT_PREFIX: &str = "pivot_";

/// Schema of a pivot table, keyed by the pair of pivot keys.
pub(crate) fn pivot_schema(
    table: &str,
    foreign_pivot_key: &str,
    related_pivot_key: &str,
    timestamps: bool,
    connection: Option<&str>,
) -> Arc<EntitySchema> {
    let mut schema = EntitySchema::new("Pivot")
        .table(table)
        .incrementing(false)
        .timestamps(timestamps)
        .composite_key(foreign_pivot_key, related_pivot_key);
    if let Some(name) = connection {
        schema = schema.connection(name);
    }
    Arc::new(schema)
}

/// Move the `pivot_*` attributes of a related row into a persisted pivot model.
pub(crate) fn migrate_pivot_attributes(model: &mut Model, schema: &Arc<EntitySchema>, accessor: &str) {
    let keys: Vec<String> = model
        .attributes()
        .keys()
        .filter(|k| k.starts_with(PIVOT_PREFIX))
        .cloned()
        .collect();
    let mut values = Vec::with_capacity(keys.len());
    for key in keys {
        if let Some(value) = model.unset_attribute(&key) {
            values.push((key[PIVOT_PREFIX.len()..].to_string(), value));
        }
        model.sync_original_attribute(&key);
    }
    let mut pivot = Model::new(model.orm().clone(), schema.clone());
    pivot.set_raw_attributes(values, true);
    pivot.exists = true;
    model.set_relation(accessor, super::RelationValue::one(Some(pivot)));
}
