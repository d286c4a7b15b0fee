//! Convenient imports for typical `fedaco` usage.
//!
//! ```ignore
//! use fedaco::prelude::*;
//! ```

pub use crate::{
    record, Connection, ConnectionConfig, ConnectionResolver, DriverName, EntityQuery,
    EntitySchema, Model, Orm, OrmError, OrmResult, QueryBuilder, Relation, RelationDef,
    RelationValue, Row, Value,
};
pub use crate::{CastType, FromValue, KeyType};
