//! Connection configuration.
//!
//! Loaded from TOML or built in code:
//!
//! ```toml
//! default = "main"
//!
//! [connections.main]
//! driver = "pgsql"
//! database = "app"
//! host = "${DB_HOST}"
//! prefix = "app_"
//! ```

use crate::error::{OrmError, OrmResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Supported driver names; selects grammar and processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverName {
    Mysql,
    Pgsql,
    Sqlite,
    Sqlsrv,
}

impl DriverName {
    pub fn as_str(self) -> &'static str {
        match self {
            DriverName::Mysql => "mysql",
            DriverName::Pgsql => "pgsql",
            DriverName::Sqlite => "sqlite",
            DriverName::Sqlsrv => "sqlsrv",
        }
    }
}

impl fmt::Display for DriverName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DriverName {
    type Err = OrmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mysql" => Ok(DriverName::Mysql),
            "pgsql" | "postgres" | "postgresql" => Ok(DriverName::Pgsql),
            "sqlite" => Ok(DriverName::Sqlite),
            "sqlsrv" | "mssql" => Ok(DriverName::Sqlsrv),
            other => Err(OrmError::Config(format!("unsupported driver: {other}"))),
        }
    }
}

/// Hosts for read/write splitting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostList {
    #[serde(default)]
    pub host: Vec<String>,
}

/// One named connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub driver: DriverName,
    /// Connection name; filled from the `[connections.<name>]` key when omitted.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Prefix prepended to every table name.
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub read: Option<HostList>,
    #[serde(default)]
    pub write: Option<HostList>,
    /// Per-statement timeout in milliseconds.
    #[serde(default)]
    pub query_timeout_ms: Option<u64>,
    /// Truncate logged SQL to this many bytes. `None` logs it whole.
    #[serde(default = "default_log_sql_length")]
    pub log_sql_length: Option<usize>,
}

fn default_log_sql_length() -> Option<usize> {
    Some(200)
}

impl ConnectionConfig {
    pub fn new(name: impl Into<String>, driver: DriverName) -> Self {
        Self {
            driver,
            name: name.into(),
            database: String::new(),
            host: None,
            port: None,
            username: None,
            password: None,
            prefix: String::new(),
            read: None,
            write: None,
            query_timeout_ms: None,
            log_sql_length: default_log_sql_length(),
        }
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout_ms.map(Duration::from_millis)
    }

    /// libpq-style connection string for drivers that take one.
    pub fn to_connection_string(&self) -> String {
        let mut parts = Vec::new();
        if let Some(host) = self.write.as_ref().and_then(|w| w.host.first()).or(self.host.as_ref()) {
            parts.push(format!("host={host}"));
        }
        if let Some(port) = self.port {
            parts.push(format!("port={port}"));
        }
        if !self.database.is_empty() {
            parts.push(format!("dbname={}", self.database));
        }
        if let Some(user) = &self.username {
            parts.push(format!("user={user}"));
        }
        if let Some(password) = &self.password {
            parts.push(format!("password={password}"));
        }
        parts.join(" ")
    }

    fn expand_env(&mut self) -> OrmResult<()> {
        self.database = expand_env_vars(&self.database)?;
        for field in [&mut self.host, &mut self.username, &mut self.password] {
            if let Some(v) = field.as_mut() {
                *v = expand_env_vars(v)?;
            }
        }
        for list in [&mut self.read, &mut self.write].into_iter().flatten() {
            for h in &mut list.host {
                *h = expand_env_vars(h)?;
            }
        }
        Ok(())
    }
}

/// All configured connections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub default: String,
    #[serde(default)]
    pub connections: BTreeMap<String, ConnectionConfig>,
}

impl DatabaseConfig {
    /// Config with a single connection that is also the default.
    pub fn single(config: ConnectionConfig) -> Self {
        let name = config.name.clone();
        Self {
            default: name.clone(),
            connections: BTreeMap::from([(name, config)]),
        }
    }

    /// Parse TOML, expanding `${VAR}` references from the environment.
    pub fn from_toml_str(raw: &str) -> OrmResult<Self> {
        let mut config: DatabaseConfig = toml::from_str(raw)?;
        for (name, conn) in &mut config.connections {
            if conn.name.is_empty() {
                conn.name = name.clone();
            }
            conn.expand_env()?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> OrmResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            OrmError::Config(format!("failed to read config file {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn connection(&self, name: Option<&str>) -> OrmResult<&ConnectionConfig> {
        let name = name.unwrap_or(&self.default);
        self.connections
            .get(name)
            .ok_or_else(|| OrmError::Config(format!("database connection [{name}] not configured")))
    }

    fn validate(&self) -> OrmResult<()> {
        if !self.connections.contains_key(&self.default) {
            return Err(OrmError::Config(format!(
                "default connection [{}] not configured",
                self.default
            )));
        }
        Ok(())
    }
}

fn expand_env_vars(input: &str) -> OrmResult<String> {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next();

            let mut key = String::new();
            let mut closed = false;
            for ch in chars.by_ref() {
                if ch == '}' {
                    closed = true;
                    break;
                }
                key.push(ch);
            }

            if !closed {
                return Err(OrmError::Config(format!("unterminated env var reference: ${{{key}")));
            }
            if key.is_empty() {
                return Err(OrmError::Config("invalid env var reference: ${}".into()));
            }

            let v = std::env::var(&key)
                .map_err(|_| OrmError::Config(format!("missing env var for config expansion: {key}")))?;
            out.push_str(&v);
            continue;
        }

        out.push(c);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_toml() {
        let raw = r#"
            default = "main"

            [connections.main]
            driver = "pgsql"
            database = "app"
            prefix = "app_"

            [connections.legacy]
            driver = "mysql"
            name = "old"
        "#;
        let config = DatabaseConfig::from_toml_str(raw).unwrap();
        let main = config.connection(None).unwrap();
        assert_eq!(main.driver, DriverName::Pgsql);
        assert_eq!(main.name, "main");
        assert_eq!(main.prefix, "app_");
        assert_eq!(main.log_sql_length, Some(200));
        assert_eq!(config.connection(Some("legacy")).unwrap().name, "old");
    }

    #[test]
    fn rejects_unknown_default() {
        let raw = r#"
            default = "missing"
            [connections.main]
            driver = "sqlite"
        "#;
        assert!(matches!(
            DatabaseConfig::from_toml_str(raw),
            Err(OrmError::Config(_))
        ));
    }

    #[test]
    fn rejects_unknown_driver() {
        let raw = r#"
            default = "main"
            [connections.main]
            driver = "oracle"
        "#;
        assert!(DatabaseConfig::from_toml_str(raw).is_err());
        assert!("oracle".parse::<DriverName>().is_err());
        assert_eq!("postgres".parse::<DriverName>().unwrap(), DriverName::Pgsql);
    }

    #[test]
    fn expands_env_references() {
        let path = std::env::var("PATH").unwrap();
        assert_eq!(expand_env_vars("${PATH}").unwrap(), path);
        assert!(expand_env_vars("${UNTERMINATED").is_err());
        assert!(expand_env_vars("${FEDACO_SURELY_UNSET_VAR}").is_err());
    }
}
