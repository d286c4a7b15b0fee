//! Registry state shared by every query and relation of one [`Orm`](super::Orm).

use super::schema::EntitySchema;
use crate::error::{OrmError, OrmResult};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

/// Entity registry, morph map and the self-join alias counter.
#[derive(Debug)]
pub struct QueryContext {
    entities: RwLock<HashMap<String, Arc<EntitySchema>>>,
    /// Discriminator alias -> entity name.
    morph_map: RwLock<BTreeMap<String, String>>,
    reserved: AtomicUsize,
}

impl Default for QueryContext {
    fn default() -> Self {
        Self {
            entities: RwLock::new(HashMap::new()),
            morph_map: RwLock::new(BTreeMap::new()),
            reserved: AtomicUsize::new(0),
        }
    }
}

impl QueryContext {
    pub fn new() -> Self {
        Self::default()
    }

    // ==================== Entities ====================

    /// Register (or replace) an entity descriptor.
    pub fn register(&self, schema: EntitySchema) -> Arc<EntitySchema> {
        let schema = Arc::new(schema);
        self.entities
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(schema.name().to_string(), schema.clone());
        schema
    }

    pub fn schema(&self, entity: &str) -> OrmResult<Arc<EntitySchema>> {
        self.entities
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(entity)
            .cloned()
            .ok_or_else(|| OrmError::relation(format!("entity [{entity}] is not registered")))
    }

    pub fn is_registered(&self, entity: &str) -> bool {
        self.entities
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(entity)
    }

    // ==================== Morph map ====================

    /// Map discriminator aliases to entity names, merging into the current map.
    pub fn morph_map<I, A, E>(&self, entries: I)
    where
        I: IntoIterator<Item = (A, E)>,
        A: Into<String>,
        E: Into<String>,
    {
        let mut map = self
            .morph_map
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for (alias, entity) in entries {
            map.insert(alias.into(), entity.into());
        }
    }

    /// Discriminator value written for `schema`: its morph map alias if one exists.
    pub fn morph_class_for(&self, schema: &EntitySchema) -> String {
        let map = self
            .morph_map
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        map.iter()
            .find(|(_, entity)| *entity == schema.name())
            .map(|(alias, _)| alias.clone())
            .unwrap_or_else(|| schema.get_morph_class().to_string())
    }

    /// Entity for a stored discriminator: the morph map first, then a registered
    /// entity of that name or morph class.
    pub fn resolve_morph_type(&self, alias: &str) -> OrmResult<Arc<EntitySchema>> {
        let mapped = self
            .morph_map
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(alias)
            .cloned();
        if let Some(entity) = mapped {
            return self.schema(&entity);
        }
        let entities = self
            .entities
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entities
            .get(alias)
            .or_else(|| entities.values().find(|s| s.get_morph_class() == alias))
            .cloned()
            .ok_or_else(|| OrmError::relation(format!("unresolvable morph type [{alias}]")))
    }

    /// Next `fedaco_reserved_N` alias for self-referencing existence queries.
    pub(crate) fn reserved_alias(&self) -> String {
        format!("fedaco_reserved_{}", self.reserved.fetch_add(1, Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn morph_aliases_resolve_both_ways() {
        let ctx = QueryContext::new();
        ctx.register(EntitySchema::new("Post"));
        ctx.register(EntitySchema::new("Video").morph_class("clip"));
        ctx.morph_map([("post", "Post")]);

        assert_eq!(ctx.resolve_morph_type("post").unwrap().name(), "Post");
        assert_eq!(ctx.resolve_morph_type("Post").unwrap().name(), "Post");
        assert_eq!(ctx.resolve_morph_type("clip").unwrap().name(), "Video");
        assert!(matches!(ctx.resolve_morph_type("Audio"), Err(OrmError::Relation(_))));

        assert_eq!(ctx.morph_class_for(&ctx.schema("Post").unwrap()), "post");
        assert_eq!(ctx.morph_class_for(&ctx.schema("Video").unwrap()), "clip");
    }

    #[test]
    fn reserved_aliases_increment() {
        let ctx = QueryContext::new();
        assert_eq!(ctx.reserved_alias(), "fedaco_reserved_0");
        assert_eq!(ctx.reserved_alias(), "fedaco_reserved_1");
    }
}
