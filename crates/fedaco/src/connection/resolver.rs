use super::{Connection, Driver};
use crate::config::{ConnectionConfig, DatabaseConfig};
use crate::error::{OrmError, OrmResult};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Maps connection names to shared connections.
#[derive(Debug)]
pub struct ConnectionResolver {
    default: RwLock<String>,
    connections: RwLock<HashMap<String, Arc<Connection>>>,
}

impl ConnectionResolver {
    pub fn new(default: impl Into<String>) -> Self {
        Self {
            default: RwLock::new(default.into()),
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Resolver holding a single connection, which is also the default.
    pub fn single(connection: Arc<Connection>) -> Self {
        let resolver = Self::new(connection.name());
        resolver.add_connection(connection);
        resolver
    }

    /// Build every configured connection, opening drivers through `connect`.
    pub fn from_config<F>(config: &DatabaseConfig, mut connect: F) -> OrmResult<Self>
    where
        F: FnMut(&ConnectionConfig) -> OrmResult<Arc<dyn Driver>>,
    {
        let resolver = Self::new(config.default.clone());
        for connection in config.connections.values() {
            let driver = connect(connection)?;
            resolver.add_connection(Arc::new(Connection::new(connection.clone(), driver)));
        }
        Ok(resolver)
    }

    /// Register a connection under its own name, replacing any previous one.
    pub fn add_connection(&self, connection: Arc<Connection>) {
        self.connections
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(connection.name().to_string(), connection);
    }

    pub fn has_connection(&self, name: &str) -> bool {
        self.connections
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(name)
    }

    /// Connection by name; `None` resolves the default.
    pub fn connection(&self, name: Option<&str>) -> OrmResult<Arc<Connection>> {
        let name = match name {
            Some(name) => name.to_string(),
            None => self.default_connection(),
        };
        self.connections
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&name)
            .cloned()
            .ok_or_else(|| OrmError::Config(format!("Database connection [{name}] not configured")))
    }

    pub fn default_connection(&self) -> String {
        self.default
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn set_default_connection(&self, name: impl Into<String>) {
        *self
            .default
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = name.into();
    }
}
