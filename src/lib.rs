//! Tenant-aware datasource toolkit: datasources, per-schema migrations and
//! transaction-safe links over PostgreSQL and SQLite.

pub mod config;
pub mod datasource;
pub mod error;
pub mod health;
pub mod link;
pub mod manager;
pub mod migration;
pub mod query;
pub mod routes;
pub mod sql;
pub mod state;
pub mod tenant;
pub mod url;

pub use config::{DatasourceConfig, Settings};
pub use datasource::{Connector, Datasource, SqlxConnector};
pub use error::{DbError, ErrorKind, Result};
pub use health::{HealthCheck, HealthIndicator, HealthRegistry, HealthReport};
pub use link::{Link, LinkBackend, Model, Naming, Row};
pub use manager::Manager;
pub use migration::Migration;
pub use query::{q, Predicate, Query, QueryResult};
pub use routes::status_routes;
pub use state::AppState;
pub use tenant::TenantsLoader;
pub use url::{DatabaseUrl, Dialect};
