//! One named connection target: URL, naming prefix, migrations, optional tenant list.

use crate::config::DatasourceConfig;
use crate::error::{DbError, Result};
use crate::link::{Link, Naming, SqlxLink};
use crate::migration::{Migration, Runner};
use crate::tenant::TenantsLoader;
use crate::url::DatabaseUrl;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::OnceCell;

pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Opens the physical connection behind a datasource.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &DatabaseUrl, naming: Naming, max_connections: u32) -> Result<Link>;
}

/// Default connector: a typed sqlx pool for the URL's dialect.
#[derive(Clone, Copy, Debug, Default)]
pub struct SqlxConnector;

#[async_trait]
impl Connector for SqlxConnector {
    async fn connect(&self, url: &DatabaseUrl, naming: Naming, max_connections: u32) -> Result<Link> {
        let link = SqlxLink::connect(url, naming, max_connections).await?;
        Ok(Link::new(Arc::new(link)))
    }
}

pub struct Datasource {
    pub(crate) id: String,
    url: String,
    pub(crate) table_prefix: String,
    migrations: Vec<Migration>,
    tenants_loader: Option<TenantsLoader>,
    pub(crate) primary: bool,
    pub(crate) factory: bool,
    max_connections: u32,
    connector: Arc<dyn Connector>,
    link: OnceCell<Link>,
}

impl fmt::Debug for Datasource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Datasource")
            .field("id", &self.id)
            .field("table_prefix", &self.table_prefix)
            .field("migrations", &self.migrations.len())
            .field("multitenant", &self.tenants_loader.is_some())
            .field("primary", &self.primary)
            .field("factory", &self.factory)
            .field("bootstrapped", &self.link.initialized())
            .finish()
    }
}

impl Datasource {
    pub fn new(url: impl Into<String>) -> Self {
        Datasource {
            id: String::new(),
            url: url.into(),
            table_prefix: String::new(),
            migrations: Vec::new(),
            tenants_loader: None,
            primary: false,
            factory: false,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            connector: Arc::new(SqlxConnector),
            link: OnceCell::new(),
        }
    }

    pub fn from_config(config: &DatasourceConfig) -> Self {
        let mut ds = Datasource::new(config.url.clone())
            .table_prefix(config.table_prefix.clone().unwrap_or_default())
            .max_connections(config.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS));
        ds.id = config.id.clone().unwrap_or_default();
        ds.primary = config.primary;
        ds.factory = config.factory;
        ds
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.table_prefix = prefix.into();
        self
    }

    pub fn migrations(mut self, migrations: Vec<Migration>) -> Self {
        self.migrations = migrations;
        self
    }

    pub fn migration(mut self, migration: Migration) -> Self {
        self.migrations.push(migration);
        self
    }

    /// Makes the datasource multitenant: `migrate(None)` runs once per loaded tenant.
    pub fn tenants_loader(mut self, loader: TenantsLoader) -> Self {
        self.tenants_loader = Some(loader);
        self
    }

    pub fn primary(mut self, primary: bool) -> Self {
        self.primary = primary;
        self
    }

    /// Fallback for tenant ids that match no named datasource.
    pub fn factory(mut self, factory: bool) -> Self {
        self.factory = factory;
        self
    }

    pub fn max_connections(mut self, n: u32) -> Self {
        self.max_connections = n;
        self
    }

    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn get_id(&self) -> &str {
        &self.id
    }

    pub fn get_table_prefix(&self) -> &str {
        &self.table_prefix
    }

    pub fn is_primary(&self) -> bool {
        self.primary
    }

    pub fn is_factory(&self) -> bool {
        self.factory
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.link.initialized()
    }

    /// Root link, once bootstrapped.
    pub fn link(&self) -> Option<&Link> {
        self.link.get()
    }

    /// Parses the URL and opens the connection. Later calls return the same link,
    /// concurrent first calls connect once.
    pub async fn bootstrap(&self) -> Result<Link> {
        let link = self
            .link
            .get_or_try_init(|| async {
                let url = DatabaseUrl::parse(&self.url)?;
                let naming = Naming::new(self.table_prefix.clone());
                let link = self
                    .connector
                    .connect(&url, naming, self.max_connections)
                    .await?;
                tracing::info!(datasource = %self.id, dialect = %url.dialect, "datasource bootstrapped");
                Ok::<_, DbError>(link)
            })
            .await?;
        Ok(link.clone())
    }

    fn root(&self) -> Result<&Link> {
        self.link.get().ok_or_else(|| {
            DbError::Connection(format!("datasource {} is not bootstrapped", self.id))
        })
    }

    /// Applies pending migrations to `schema`, to every loaded tenant, or to the
    /// default schema, in that order of precedence.
    pub async fn migrate(&self, schema: Option<&str>) -> Result<()> {
        if self.migrations.is_empty() {
            tracing::warn!("[{}] no migrations found to apply.", self.id);
            return Ok(());
        }
        if let Some(schema) = schema.filter(|s| !s.is_empty()) {
            tracing::info!(datasource = %self.id, "migrating schema {}", schema);
            return self.internal_migrations(Some(schema)).await;
        }
        if let Some(loader) = &self.tenants_loader {
            tracing::info!(datasource = %self.id, "multitenant datasource found, scanning all schemas");
            let tenants = loader().await?;
            if tenants.is_empty() {
                tracing::warn!(datasource = %self.id, "empty tenants list received, skipping migrations");
                return Ok(());
            }
            for tenant in &tenants {
                tracing::info!(datasource = %self.id, "applying migrations on schema {}", tenant);
                self.internal_migrations(Some(tenant)).await?;
            }
            return Ok(());
        }
        self.internal_migrations(None).await
    }

    /// One transaction per schema: schema creation and switch (schema dialects
    /// only), bookkeeping, every pending step.
    async fn internal_migrations(&self, schema: Option<&str>) -> Result<()> {
        let root = self
            .root()
            .map_err(|e| DbError::migration(&self.id, schema, e))?;
        let migrations = &self.migrations;
        let result = root
            .transactional(|tx| async move {
                if let Some(schema) = schema {
                    if tx.supports_schemas() {
                        tx.create_schema_if_missing(schema).await?;
                        tx.use_schema(schema).await?;
                    }
                }
                Runner::new(&tx).migrate(migrations).await
            })
            .await;
        match result {
            Ok(ran) => {
                tracing::info!(
                    datasource = %self.id,
                    schema = schema.unwrap_or("default"),
                    applied = ran.len(),
                    "migrations applied successfully"
                );
                Ok(())
            }
            Err(e) => Err(DbError::migration(&self.id, schema, e)),
        }
    }

    pub async fn ping(&self) -> Result<()> {
        self.root()?.ping().await
    }

    /// Closes the pool. The datasource stays bootstrapped; its link fails afterwards.
    pub async fn close(&self) {
        if let Some(link) = self.link.get() {
            link.close().await;
            tracing::debug!(datasource = %self.id, "datasource closed");
        }
    }
}
