//! Static entity descriptors.
//!
//! An [`EntitySchema`] is built once per entity type and registered on the
//! [`QueryContext`](super::QueryContext); every model, query and relation looks its
//! metadata up there instead of introspecting annotations at runtime.

use super::casts::CastType;
use super::query::EntityQuery;
use crate::naming;
use crate::query::QueryBuilder;
use crate::relations::RelationDef;
use crate::value::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Scope applied to every query of an entity unless removed by name.
pub type GlobalScope = Arc<dyn Fn(QueryBuilder, &EntitySchema) -> QueryBuilder + Send + Sync>;

/// Named scope invoked explicitly through [`EntityQuery::scope`].
pub type LocalScope = Arc<dyn Fn(EntityQuery, &[Value]) -> EntityQuery + Send + Sync>;

/// Name of the built-in soft delete scope.
pub const SOFT_DELETES: &str = "soft_deletes";

/// Primary key representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyType {
    #[default]
    Int,
    String,
}

/// How a declared field maps onto storage.
#[derive(Clone, Debug)]
pub enum FieldKind {
    PlainColumn,
    CastColumn(CastType),
    RelationColumn(RelationDef),
}

#[derive(Clone)]
pub struct EntitySchema {
    name: String,
    table: String,
    primary_key: String,
    key_type: KeyType,
    incrementing: bool,
    timestamps: bool,
    created_at: String,
    updated_at: String,
    soft_deletes: bool,
    deleted_at: String,
    fillable: Vec<String>,
    guarded: Vec<String>,
    hidden: Vec<String>,
    fields: Vec<(String, FieldKind)>,
    morph_class: Option<String>,
    connection: Option<String>,
    per_page: u64,
    /// Composite key of pivot rows: (foreign pivot key, related pivot key).
    composite_key: Option<(String, String)>,
    global_scopes: Vec<(String, GlobalScope)>,
    local_scopes: HashMap<String, LocalScope>,
}

impl fmt::Debug for EntitySchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntitySchema")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("primary_key", &self.primary_key)
            .field("fields", &self.fields.len())
            .field(
                "global_scopes",
                &self.global_scopes.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl EntitySchema {
    /// Descriptor for `name` with conventional defaults: table `snake_plural(name)`,
    /// incrementing integer key `id` and timestamps on.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            table: naming::table_name(&name),
            name,
            primary_key: "id".to_string(),
            key_type: KeyType::Int,
            incrementing: true,
            timestamps: true,
            created_at: "created_at".to_string(),
            updated_at: "updated_at".to_string(),
            soft_deletes: false,
            deleted_at: "deleted_at".to_string(),
            fillable: Vec::new(),
            guarded: Vec::new(),
            hidden: Vec::new(),
            fields: Vec::new(),
            morph_class: None,
            connection: None,
            per_page: 15,
            composite_key: None,
            global_scopes: Vec::new(),
            local_scopes: HashMap::new(),
        }
    }

    // ==================== Builder ====================

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn primary_key(mut self, key: impl Into<String>) -> Self {
        self.primary_key = key.into();
        self
    }

    pub fn key_type(mut self, key_type: KeyType) -> Self {
        self.key_type = key_type;
        self
    }

    pub fn incrementing(mut self, incrementing: bool) -> Self {
        self.incrementing = incrementing;
        self
    }

    pub fn timestamps(mut self, enabled: bool) -> Self {
        self.timestamps = enabled;
        self
    }

    /// Rename the `created_at`/`updated_at` columns.
    pub fn timestamp_columns(mut self, created_at: &str, updated_at: &str) -> Self {
        self.created_at = created_at.to_string();
        self.updated_at = updated_at.to_string();
        self
    }

    /// Enable soft deletes on `deleted_at`.
    pub fn soft_deletes(mut self) -> Self {
        self.soft_deletes = true;
        self
    }

    pub fn deleted_at_column(mut self, column: impl Into<String>) -> Self {
        self.deleted_at = column.into();
        self
    }

    pub fn fillable(mut self, columns: &[&str]) -> Self {
        self.fillable = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Columns rejected by `fill`. `"*"` guards everything not explicitly fillable.
    pub fn guarded(mut self, columns: &[&str]) -> Self {
        self.guarded = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Columns left out of `to_json`.
    pub fn hidden(mut self, columns: &[&str]) -> Self {
        self.hidden = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn column(self, name: impl Into<String>) -> Self {
        self.field(name, FieldKind::PlainColumn)
    }

    pub fn cast(self, name: impl Into<String>, cast: CastType) -> Self {
        self.field(name, FieldKind::CastColumn(cast))
    }

    pub fn relation(self, name: impl Into<String>, def: RelationDef) -> Self {
        self.field(name, FieldKind::RelationColumn(def))
    }

    /// Declare a field, replacing an earlier declaration of the same name.
    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        let name = name.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = kind,
            None => self.fields.push((name, kind)),
        }
        self
    }

    /// Discriminator stored in morph type columns; defaults to the entity name.
    pub fn morph_class(mut self, class: impl Into<String>) -> Self {
        self.morph_class = Some(class.into());
        self
    }

    pub fn connection(mut self, name: impl Into<String>) -> Self {
        self.connection = Some(name.into());
        self
    }

    pub fn per_page(mut self, per_page: u64) -> Self {
        self.per_page = per_page.max(1);
        self
    }

    pub(crate) fn composite_key(mut self, first: &str, second: &str) -> Self {
        self.composite_key = Some((first.to_string(), second.to_string()));
        self
    }

    pub fn global_scope<F>(mut self, name: impl Into<String>, scope: F) -> Self
    where
        F: Fn(QueryBuilder, &EntitySchema) -> QueryBuilder + Send + Sync + 'static,
    {
        self.global_scopes.push((name.into(), Arc::new(scope)));
        self
    }

    pub fn local_scope<F>(mut self, name: impl Into<String>, scope: F) -> Self
    where
        F: Fn(EntityQuery, &[Value]) -> EntityQuery + Send + Sync + 'static,
    {
        self.local_scopes.insert(name.into(), Arc::new(scope));
        self
    }

    // ==================== Accessors ====================

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn key_name(&self) -> &str {
        &self.primary_key
    }

    pub fn get_key_type(&self) -> KeyType {
        self.key_type
    }

    pub fn is_incrementing(&self) -> bool {
        self.incrementing
    }

    pub fn uses_timestamps(&self) -> bool {
        self.timestamps
    }

    pub fn created_at(&self) -> &str {
        &self.created_at
    }

    pub fn updated_at(&self) -> &str {
        &self.updated_at
    }

    pub fn uses_soft_deletes(&self) -> bool {
        self.soft_deletes
    }

    pub fn deleted_at(&self) -> &str {
        &self.deleted_at
    }

    pub fn get_per_page(&self) -> u64 {
        self.per_page
    }

    pub fn connection_name(&self) -> Option<&str> {
        self.connection.as_deref()
    }

    pub fn get_morph_class(&self) -> &str {
        self.morph_class.as_deref().unwrap_or(&self.name)
    }

    pub fn get_composite_key(&self) -> Option<(&str, &str)> {
        self.composite_key
            .as_ref()
            .map(|(a, b)| (a.as_str(), b.as_str()))
    }

    pub fn is_hidden(&self, column: &str) -> bool {
        self.hidden.iter().any(|c| c == column)
    }

    /// Whether `fill` accepts `key`.
    pub fn is_fillable(&self, key: &str) -> bool {
        if self.fillable.iter().any(|c| c == key) {
            return true;
        }
        if self.guarded.iter().any(|c| c == key || c == "*") {
            return false;
        }
        self.fillable.is_empty()
    }

    pub fn field_kind(&self, name: &str) -> Option<&FieldKind> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, k)| k)
    }

    pub fn cast_of(&self, column: &str) -> Option<CastType> {
        match self.field_kind(column) {
            Some(FieldKind::CastColumn(cast)) => Some(*cast),
            _ => None,
        }
    }

    pub fn relation_def(&self, name: &str) -> Option<&RelationDef> {
        match self.field_kind(name) {
            Some(FieldKind::RelationColumn(def)) => Some(def),
            _ => None,
        }
    }

    pub fn relation_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().filter_map(|(n, k)| match k {
            FieldKind::RelationColumn(_) => Some(n.as_str()),
            _ => None,
        })
    }

    pub(crate) fn global_scopes(&self) -> &[(String, GlobalScope)] {
        &self.global_scopes
    }

    pub(crate) fn local_scope_fn(&self, name: &str) -> Option<&LocalScope> {
        self.local_scopes.get(name)
    }

    /// `table.column`
    pub fn qualify(&self, column: &str) -> String {
        if column.contains('.') {
            column.to_string()
        } else {
            format!("{}.{column}", self.table)
        }
    }

    pub fn qualified_key_name(&self) -> String {
        self.qualify(&self.primary_key)
    }

    /// Default foreign key other entities use to reference this one: `user_id`.
    pub fn foreign_key(&self) -> String {
        naming::foreign_key(&self.name, &self.primary_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conventional_defaults() {
        let schema = EntitySchema::new("BlogPost");
        assert_eq!(schema.table_name(), "blog_posts");
        assert_eq!(schema.key_name(), "id");
        assert_eq!(schema.foreign_key(), "blog_post_id");
        assert_eq!(schema.get_morph_class(), "BlogPost");
        assert_eq!(schema.qualify("title"), "blog_posts.title");
        assert_eq!(schema.qualify("u.title"), "u.title");
    }

    #[test]
    fn fillable_and_guarded() {
        let open = EntitySchema::new("User");
        assert!(open.is_fillable("anything"));

        let listed = EntitySchema::new("User").fillable(&["name"]);
        assert!(listed.is_fillable("name"));
        assert!(!listed.is_fillable("is_admin"));

        let guarded = EntitySchema::new("User").guarded(&["is_admin"]);
        assert!(guarded.is_fillable("name"));
        assert!(!guarded.is_fillable("is_admin"));

        let closed = EntitySchema::new("User").guarded(&["*"]).fillable(&["email"]);
        assert!(closed.is_fillable("email"));
        assert!(!closed.is_fillable("name"));
    }

    #[test]
    fn fields_are_looked_up_by_name() {
        let schema = EntitySchema::new("User")
            .column("name")
            .cast("meta", CastType::Json)
            .relation("posts", RelationDef::has_many("Post"));
        assert!(matches!(schema.field_kind("name"), Some(FieldKind::PlainColumn)));
        assert_eq!(schema.cast_of("meta"), Some(CastType::Json));
        assert!(schema.relation_def("posts").is_some());
        assert!(schema.relation_def("name").is_none());
        assert_eq!(schema.relation_names().collect::<Vec<_>>(), vec!["posts"]);
    }
}
