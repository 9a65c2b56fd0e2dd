//! Configuration types. `DatasourceConfig` can also be declared in JSON.

use serde::{Deserialize, Serialize};

/// One datasource declaration. Missing id means `primary` when it is the only one.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasourceConfig {
    #[serde(default)]
    pub id: Option<String>,
    pub url: String,
    #[serde(default)]
    pub table_prefix: Option<String>,
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub factory: bool,
    #[serde(default)]
    pub max_connections: Option<u32>,
}

/// Settings read from the environment at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    pub service_name: String,
    pub env: String,
    pub database_url: Option<String>,
    /// Multitenant (schema per tenant) datasource.
    pub factory_database_url: Option<String>,
    pub max_connections: u32,
    /// Apply migrations on startup.
    pub migrations: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            service_name: "app".into(),
            env: String::new(),
            database_url: None,
            factory_database_url: None,
            max_connections: crate::datasource::DEFAULT_MAX_CONNECTIONS,
            migrations: true,
        }
    }
}
