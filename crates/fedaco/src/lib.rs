//! # fedaco
//!
//! A relationship-aware ORM with dialect-specific SQL grammars.
//!
//! ## Features
//!
//! - **One builder, four dialects**: the fluent [`QueryBuilder`] compiles through a
//!   [`Grammar`] for MySQL, Postgres, SQLite or SQL Server
//! - **Explicit bindings**: every value travels as a bound parameter; grammars render `?`
//!   and the [`Connection`] converts to the driver's placeholder style
//! - **Entities without codegen**: an [`EntitySchema`] describes table, keys, casts,
//!   scopes and relations; [`Model`] tracks attributes, dirty state and loaded relations
//! - **Batched eager loading**: `with(&["posts.comments"])` runs one query per relation
//!   level, whatever the number of parents
//! - **Query monitoring**: every statement is traced and can be observed through a
//!   [`QueryListener`]
//!
//! ## Query builder
//!
//! ```ignore
//! use fedaco::prelude::*;
//!
//! let rows = conn
//!     .table("users")
//!     .where_("votes", ">", 100)
//!     .or_where_eq("name", "John")
//!     .order_by_desc("created_at")
//!     .limit(10)
//!     .get()
//!     .await?;
//! ```
//!
//! ## Entities and relations
//!
//! ```ignore
//! let orm = Orm::with_connection(conn);
//! orm.register(
//!     EntitySchema::new("User")
//!         .fillable(&["name", "email"])
//!         .relation("posts", RelationDef::has_many("Post"))
//!         .relation("roles", RelationDef::belongs_to_many("Role").with_pivot(&["level"])),
//! );
//! orm.register(EntitySchema::new("Post").soft_deletes());
//! orm.register(EntitySchema::new("Role"));
//!
//! let users = orm
//!     .query("User")?
//!     .where_has("posts", |q| q.where_eq("published", true))
//!     .with(&["posts", "roles"])
//!     .get()
//!     .await?;
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod grammar;
pub mod ident;
pub mod naming;
pub mod orm;
pub mod prelude;
pub mod processor;
pub mod query;
pub mod relations;
pub mod row;
pub mod testing;
pub mod value;

#[cfg(feature = "postgres")]
pub mod drivers;

pub use config::{ConnectionConfig, DatabaseConfig, DriverName};
pub use connection::{
    Connection, ConnectionResolver, Driver, DriverOutput, QueryEvent, QueryListener, QueryType,
    SqlLogger,
};
pub use error::{OrmError, OrmResult};
pub use grammar::{
    CompiledQuery, Grammar, MySqlGrammar, PostgresGrammar, Record, SqlServerGrammar, SqliteGrammar,
};
pub use ident::Ident;
pub use orm::{
    CastType, EagerLoad, EntityQuery, EntitySchema, FieldKind, KeyType, Model, Orm, Page,
    QueryConstraint, QueryContext, SOFT_DELETES,
};
pub use processor::Processor;
pub use query::{record, Boolean, Expr, Predicate, QueryBuilder, WhereClause};
pub use relations::{
    Aggregate, BelongsTo, BelongsToMany, Constraints, HasManyThrough, HasOneOrMany, MorphTo, Relation,
    RelationDef, RelationKind, RelationValue, SyncChanges,
};
pub use row::{FromRow, Row};
pub use value::{DictKey, FromValue, Value};
