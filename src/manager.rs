//! Registry of datasources for one service: registration, startup migration,
//! link lookup and tenant resolution.

use crate::datasource::Datasource;
use crate::error::{DbError, Result};
use crate::link::Link;
use regex::Regex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const DEFAULT_ID: &str = "primary";

pub struct Manager {
    service_name: String,
    datasources: Vec<Arc<Datasource>>,
    primary: Option<usize>,
    factory: Option<usize>,
    migrated: AtomicBool,
    serving: AtomicBool,
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("service_name", &self.service_name)
            .field("datasources", &self.ids())
            .field("migrated", &self.is_migrated())
            .finish()
    }
}

impl Manager {
    /// Characters outside `[a-zA-Z0-9_]` in the service name become `_`.
    pub fn new(service_name: &str) -> Result<Self> {
        let re = Regex::new("[^a-zA-Z0-9_]")
            .map_err(|e| DbError::Configuration(format!("service name pattern: {}", e)))?;
        Ok(Manager {
            service_name: re.replace_all(service_name, "_").into_owned(),
            datasources: Vec::new(),
            primary: None,
            factory: None,
            migrated: AtomicBool::new(false),
            serving: AtomicBool::new(false),
        })
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn len(&self) -> usize {
        self.datasources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasources.is_empty()
    }

    pub fn is_migrated(&self) -> bool {
        self.migrated.load(Ordering::SeqCst)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.datasources.iter().map(|d| d.get_id()).collect()
    }

    pub fn datasources(&self) -> &[Arc<Datasource>] {
        &self.datasources
    }

    fn find(&self, id: &str) -> Option<&Arc<Datasource>> {
        self.datasources
            .iter()
            .find(|d| d.get_id().eq_ignore_ascii_case(id))
    }

    /// Registers and bootstraps a datasource, returning its root link.
    ///
    /// The first datasource may omit its id (it becomes `primary`); later ones
    /// must name themselves. Ids are unique ignoring case, and at most one
    /// datasource may be primary or factory.
    pub async fn add(&mut self, mut ds: Datasource) -> Result<Link> {
        if self.serving.load(Ordering::SeqCst) {
            return Err(DbError::Configuration(
                "datasources cannot be added once links are being served".into(),
            ));
        }
        if ds.id.trim().is_empty() {
            if !self.is_empty() {
                return Err(DbError::Configuration(
                    "When adding multiple datasources, an explicit id is required".into(),
                ));
            }
            ds.id = DEFAULT_ID.to_string();
        }
        if self.find(&ds.id).is_some() {
            return Err(DbError::Configuration(format!(
                "duplicate datasource id: {}",
                ds.id
            )));
        }
        if ds.primary && self.primary.is_some() {
            return Err(DbError::Configuration(format!(
                "datasource {}: a primary datasource is already registered",
                ds.id
            )));
        }
        if ds.factory && self.factory.is_some() {
            return Err(DbError::Configuration(format!(
                "datasource {}: a factory datasource is already registered",
                ds.id
            )));
        }
        if ds.table_prefix.is_empty() && !self.service_name.is_empty() {
            ds.table_prefix = format!("{}_", self.service_name);
        }

        let link = ds.bootstrap().await?;
        let index = self.datasources.len();
        if ds.primary {
            self.primary = Some(index);
        }
        if ds.factory {
            self.factory = Some(index);
        }
        tracing::info!(
            datasource = %ds.id,
            prefix = %ds.table_prefix,
            primary = ds.primary,
            factory = ds.factory,
            "datasource registered"
        );
        self.datasources.push(Arc::new(ds));
        Ok(link)
    }

    /// Migrates every datasource in registration order. Runs once per process;
    /// later calls are no-ops. Stops at the first failure.
    ///
    /// Startup only: call it from a single task before serving.
    pub async fn migrate(&self) -> Result<()> {
        if self.is_empty() || self.is_migrated() {
            return Ok(());
        }
        for ds in &self.datasources {
            tracing::info!("applying migrations on datasource: {}", ds.get_id());
            ds.migrate(None).await?;
        }
        self.migrated.store(true, Ordering::SeqCst);
        tracing::info!("all migrations were applied");
        Ok(())
    }

    fn serve(&self, ds: &Datasource) -> Result<Link> {
        self.serving.store(true, Ordering::SeqCst);
        ds.link().cloned().ok_or_else(|| {
            DbError::Connection(format!("datasource {} is not bootstrapped", ds.get_id()))
        })
    }

    /// Root link of the datasource named `id` (case-insensitive).
    pub fn link(&self, id: &str) -> Result<Link> {
        let ds = self
            .find(id)
            .ok_or_else(|| DbError::Configuration(format!("invalid datasource id: {}", id)))?;
        self.serve(ds)
    }

    /// The only registered datasource's link.
    pub fn single_link(&self) -> Result<Link> {
        match self.datasources.as_slice() {
            [] => Err(DbError::Configuration("No datasource configured".into())),
            [ds] => self.serve(ds),
            _ => Err(DbError::Configuration(
                "More than 1 datasource configured, use link(id) instead".into(),
            )),
        }
    }

    /// The designated primary, or the only datasource when none is designated.
    pub fn primary_link(&self) -> Result<Link> {
        match self.primary {
            Some(i) => self.serve(&self.datasources[i]),
            None => self.single_link(),
        }
    }

    /// Runs `f` with a link for `tenant_id`.
    ///
    /// A datasource registered under that id wins. Otherwise the factory
    /// datasource is used: `f` runs inside one transaction with the tenant's
    /// schema active. With neither, `f` is not invoked.
    pub async fn with_tenant_link<T, F, Fut>(&self, tenant_id: &str, f: F) -> Result<T>
    where
        F: FnOnce(Link) -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        if let Some(ds) = self.find(tenant_id) {
            let link = self.serve(ds)?;
            return f(link).await;
        }
        let Some(index) = self.factory else {
            return Err(DbError::TenantResolution(tenant_id.to_string()));
        };
        let root = self.serve(&self.datasources[index])?;
        let tenant = tenant_id.to_string();
        root.transactional(|tx| async move {
            tx.use_schema(&tenant).await?;
            f(tx.with_tenant(&tenant)).await
        })
        .await
    }

    /// First failing ping, if any.
    pub async fn ping(&self) -> Result<()> {
        for ds in &self.datasources {
            ds.ping().await?;
        }
        Ok(())
    }

    /// Every datasource's ping result, in registration order.
    pub async fn ping_all(&self) -> Vec<(String, Result<()>)> {
        let mut out = Vec::with_capacity(self.datasources.len());
        for ds in &self.datasources {
            out.push((ds.get_id().to_string(), ds.ping().await));
        }
        out
    }

    pub async fn close(&self) {
        for ds in &self.datasources {
            ds.close().await;
        }
    }
}
