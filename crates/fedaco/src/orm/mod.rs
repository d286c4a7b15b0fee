//! Entity layer: schemas, models, model-aware queries and eager loading.
//!
//! [`Orm`] is the entry point. It owns the connection resolver and the
//! [`QueryContext`], and every [`Model`] and [`EntityQuery`] carries a cheap clone of it.
//!
//! ```ignore
//! let orm = Orm::new(ConnectionResolver::single(conn));
//! orm.register(EntitySchema::new("User").relation("posts", RelationDef::has_many("Post")));
//! orm.register(EntitySchema::new("Post"));
//!
//! let users = orm.query("User")?.with(&["posts"]).get().await?;
//! ```

mod casts;
mod context;
mod eager;
mod model;
mod persistence;
mod query;
mod schema;

pub use casts::CastType;
pub use context::QueryContext;
pub use eager::EagerLoad;
pub use model::Model;
pub use query::{EntityQuery, Page, QueryConstraint};
pub use schema::{EntitySchema, FieldKind, GlobalScope, KeyType, LocalScope, SOFT_DELETES};

pub(crate) use query::fresh_timestamp;

use crate::connection::{Connection, ConnectionResolver};
use crate::error::OrmResult;
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

struct OrmInner {
    resolver: ConnectionResolver,
    context: QueryContext,
}

/// Handle to connections plus entity metadata.
#[derive(Clone)]
pub struct Orm {
    inner: Arc<OrmInner>,
}

impl fmt::Debug for Orm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orm")
            .field("default_connection", &self.inner.resolver.default_connection())
            .finish_non_exhaustive()
    }
}

impl Orm {
    pub fn new(resolver: ConnectionResolver) -> Self {
        Self {
            inner: Arc::new(OrmInner {
                resolver,
                context: QueryContext::new(),
            }),
        }
    }

    /// Orm over a single connection.
    pub fn with_connection(connection: Arc<Connection>) -> Self {
        Self::new(ConnectionResolver::single(connection))
    }

    pub fn resolver(&self) -> &ConnectionResolver {
        &self.inner.resolver
    }

    pub fn context(&self) -> &QueryContext {
        &self.inner.context
    }

    pub fn connection(&self, name: Option<&str>) -> OrmResult<Arc<Connection>> {
        self.inner.resolver.connection(name)
    }

    /// Connection an entity reads and writes through.
    pub fn connection_for(&self, schema: &EntitySchema) -> OrmResult<Arc<Connection>> {
        self.connection(schema.connection_name())
    }

    pub fn register(&self, schema: EntitySchema) -> Arc<EntitySchema> {
        self.inner.context.register(schema)
    }

    pub fn schema(&self, entity: &str) -> OrmResult<Arc<EntitySchema>> {
        self.inner.context.schema(entity)
    }

    pub fn morph_map<I, A, E>(&self, entries: I)
    where
        I: IntoIterator<Item = (A, E)>,
        A: Into<String>,
        E: Into<String>,
    {
        self.inner.context.morph_map(entries);
    }

    /// New query for a registered entity, with its global scopes pending.
    pub fn query(&self, entity: &str) -> OrmResult<EntityQuery> {
        let schema = self.schema(entity)?;
        self.query_for(schema)
    }

    pub fn query_for(&self, schema: Arc<EntitySchema>) -> OrmResult<EntityQuery> {
        let connection = self.connection_for(&schema)?;
        Ok(EntityQuery::new(self.clone(), schema, connection))
    }

    /// Fresh unsaved model of `entity`.
    pub fn make(&self, entity: &str) -> OrmResult<Model> {
        Ok(Model::new(self.clone(), self.schema(entity)?))
    }

    /// Fill and insert a new model.
    pub async fn create<I, K, V>(&self, entity: &str, attributes: I) -> OrmResult<Model>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.query(entity)?.create(attributes).await
    }
}
