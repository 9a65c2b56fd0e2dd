//! `LinkBackend` over typed sqlx pools (PostgreSQL and SQLite).

use super::backend::{LinkBackend, Row, UnitOfWork};
use crate::error::DbError;
use crate::sql::{self, bind_pg, bind_sqlite, pg_cells, sqlite_cells, Cells};
use crate::url::{DatabaseUrl, Dialect};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Executor, PgPool, Postgres, Sqlite, SqlitePool, Transaction};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Table naming convention derived from the datasource's table prefix.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Naming {
    pub table_prefix: String,
}

impl Naming {
    pub fn new(table_prefix: impl Into<String>) -> Self {
        Naming {
            table_prefix: table_prefix.into(),
        }
    }

    /// Prepends the prefix unless the name already carries it or is schema-qualified.
    pub fn table_name(&self, name: &str) -> String {
        if self.table_prefix.is_empty() || name.contains('.') || name.starts_with(&self.table_prefix) {
            name.to_string()
        } else {
            format!("{}{}", self.table_prefix, name)
        }
    }
}

#[derive(Clone)]
enum Pool {
    Postgres(PgPool),
    Sqlite(SqlitePool),
}

impl Pool {
    async fn begin(&self) -> Result<Tx, sqlx::Error> {
        Ok(match self {
            Pool::Postgres(p) => Tx::Postgres(p.begin().await?),
            Pool::Sqlite(p) => Tx::Sqlite(p.begin().await?),
        })
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, sqlx::Error> {
        match self {
            Pool::Postgres(p) => pg_execute(p, sql, params).await,
            Pool::Sqlite(p) => sqlite_execute(p, sql, params).await,
        }
    }

    async fn fetch(&self, sql: &str, params: &[Value]) -> Result<Vec<Cells>, sqlx::Error> {
        match self {
            Pool::Postgres(p) => pg_fetch(p, sql, params).await,
            Pool::Sqlite(p) => sqlite_fetch(p, sql, params).await,
        }
    }

    async fn close(&self) {
        match self {
            Pool::Postgres(p) => p.close().await,
            Pool::Sqlite(p) => p.close().await,
        }
    }
}

enum Tx {
    Postgres(Transaction<'static, Postgres>),
    Sqlite(Transaction<'static, Sqlite>),
}

impl Tx {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, sqlx::Error> {
        match self {
            Tx::Postgres(tx) => pg_execute(&mut **tx, sql, params).await,
            Tx::Sqlite(tx) => sqlite_execute(&mut **tx, sql, params).await,
        }
    }

    async fn fetch(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Cells>, sqlx::Error> {
        match self {
            Tx::Postgres(tx) => pg_fetch(&mut **tx, sql, params).await,
            Tx::Sqlite(tx) => sqlite_fetch(&mut **tx, sql, params).await,
        }
    }

    async fn commit(self) -> Result<(), sqlx::Error> {
        match self {
            Tx::Postgres(tx) => tx.commit().await,
            Tx::Sqlite(tx) => tx.commit().await,
        }
    }

    async fn rollback(self) -> Result<(), sqlx::Error> {
        match self {
            Tx::Postgres(tx) => tx.rollback().await,
            Tx::Sqlite(tx) => tx.rollback().await,
        }
    }
}

async fn pg_execute<'c, E>(conn: E, sql: &str, params: &[Value]) -> Result<u64, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    tracing::debug!(sql = %sql, params = ?params, "execute");
    let result = bind_pg(sql, params).execute(conn).await?;
    Ok(result.rows_affected())
}

async fn pg_fetch<'c, E>(conn: E, sql: &str, params: &[Value]) -> Result<Vec<Cells>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    tracing::debug!(sql = %sql, params = ?params, "query");
    let rows = bind_pg(sql, params).fetch_all(conn).await?;
    Ok(rows.iter().map(pg_cells).collect())
}

async fn sqlite_execute<'c, E>(conn: E, sql: &str, params: &[Value]) -> Result<u64, sqlx::Error>
where
    E: Executor<'c, Database = Sqlite>,
{
    tracing::debug!(sql = %sql, params = ?params, "execute");
    let result = bind_sqlite(sql, params).execute(conn).await?;
    Ok(result.rows_affected())
}

async fn sqlite_fetch<'c, E>(conn: E, sql: &str, params: &[Value]) -> Result<Vec<Cells>, sqlx::Error>
where
    E: Executor<'c, Database = Sqlite>,
{
    tracing::debug!(sql = %sql, params = ?params, "query");
    let rows = bind_sqlite(sql, params).fetch_all(conn).await?;
    Ok(rows.iter().map(sqlite_cells).collect())
}

fn into_row(cells: Cells) -> Row {
    cells.into_iter().collect()
}

/// One open SQL transaction plus its tenant-session marker.
///
/// The marker belongs to the transaction: it is set when the search path is
/// switched inside it and disappears with it.
struct TxContext {
    tx: Mutex<Option<Tx>>,
    active_schema: std::sync::Mutex<Option<String>>,
}

impl TxContext {
    fn new(tx: Tx) -> Self {
        TxContext {
            tx: Mutex::new(Some(tx)),
            active_schema: std::sync::Mutex::new(None),
        }
    }

    fn tenant_active(&self) -> bool {
        self.active_schema
            .lock()
            .map(|s| s.is_some())
            .unwrap_or(false)
    }

    fn mark(&self, schema: &str) {
        if let Ok(mut s) = self.active_schema.lock() {
            *s = Some(schema.to_string());
        }
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, DbError> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or(DbError::TransactionClosed)?;
        Ok(tx.execute(sql, params).await?)
    }

    async fn fetch(&self, sql: &str, params: &[Value]) -> Result<Vec<Cells>, DbError> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or(DbError::TransactionClosed)?;
        Ok(tx.fetch(sql, params).await?)
    }

    async fn commit(&self) -> Result<(), DbError> {
        let tx = self.tx.lock().await.take().ok_or(DbError::TransactionClosed)?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&self) -> Result<(), DbError> {
        let tx = self.tx.lock().await.take().ok_or(DbError::TransactionClosed)?;
        tx.rollback().await?;
        Ok(())
    }

    /// Commit on success, roll back on error. Used for per-call tenant transactions.
    async fn finish<T>(&self, result: Result<T, DbError>) -> Result<T, DbError> {
        match result {
            Ok(v) => {
                self.commit().await?;
                Ok(v)
            }
            Err(e) => {
                if let Err(rb) = self.rollback().await {
                    tracing::warn!(error = %rb, "rollback failed");
                }
                Err(e)
            }
        }
    }
}

#[derive(Clone)]
enum Scope {
    /// Autocommit statements on the shared pool.
    Pool,
    Tx(Arc<TxContext>),
}

/// Where one statement runs after the tenant protocol is applied.
enum Target {
    Pool,
    /// Enclosing transaction; the caller does not finish it.
    Joined(Arc<TxContext>),
    /// Transaction opened for this one call.
    Owned(Arc<TxContext>),
}

/// sqlx-backed link. Cloning shares the pool; the scope decides where statements run.
#[derive(Clone)]
pub struct SqlxLink {
    pool: Pool,
    dialect: Dialect,
    naming: Naming,
    tenant: Option<String>,
    scope: Scope,
}

impl SqlxLink {
    /// Opens the pool. In-memory SQLite is pinned to a single long-lived connection.
    pub async fn connect(url: &DatabaseUrl, naming: Naming, max_connections: u32) -> Result<Self, DbError> {
        let parse_err = |e: sqlx::Error| DbError::Configuration(format!("error parsing databaseUrl: {}", e));
        let connect_err =
            |e: sqlx::Error| DbError::Connection(format!("connection to {} datasource failed: {}", url.dialect, e));
        let max_connections = max_connections.max(1);
        let pool = match url.dialect {
            Dialect::Postgres => {
                let options = PgConnectOptions::from_str(&url.connect_url).map_err(parse_err)?;
                let pool = PgPoolOptions::new()
                    .max_connections(max_connections)
                    .connect_with(options)
                    .await
                    .map_err(connect_err)?;
                Pool::Postgres(pool)
            }
            Dialect::Sqlite => {
                let options = SqliteConnectOptions::from_str(&url.connect_url).map_err(parse_err)?;
                let mut pool_options = SqlitePoolOptions::new().max_connections(max_connections);
                if url.in_memory {
                    pool_options = pool_options
                        .max_connections(1)
                        .min_connections(1)
                        .idle_timeout(None)
                        .max_lifetime(None);
                }
                Pool::Sqlite(pool_options.connect_with(options).await.map_err(connect_err)?)
            }
        };
        tracing::debug!(dialect = %url.dialect, prefix = %naming.table_prefix, "database pool created");
        Ok(SqlxLink {
            pool,
            dialect: url.dialect,
            naming,
            tenant: None,
            scope: Scope::Pool,
        })
    }

    async fn open_tx(&self) -> Result<Arc<TxContext>, DbError> {
        let tx = self.pool.begin().await?;
        Ok(Arc::new(TxContext::new(tx)))
    }

    async fn switch_schema(&self, ctx: &TxContext, schema: &str) -> Result<(), DbError> {
        if self.dialect.supports_schemas() {
            ctx.execute(&sql::set_local_search_path(schema), &[]).await?;
        }
        ctx.mark(schema);
        Ok(())
    }

    /// Runs a row-returning statement under the tenant protocol, keeping column order.
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Cells>, DbError> {
        match self.target().await? {
            Target::Pool => Ok(self.pool.fetch(sql, params).await?),
            Target::Joined(ctx) => ctx.fetch(sql, params).await,
            Target::Owned(ctx) => {
                let result = ctx.fetch(sql, params).await;
                ctx.finish(result).await
            }
        }
    }

    /// Applies the tenant-scoping protocol for one call.
    async fn target(&self) -> Result<Target, DbError> {
        let Some(tenant) = self.tenant.as_deref() else {
            return Ok(match &self.scope {
                Scope::Pool => Target::Pool,
                Scope::Tx(ctx) => Target::Joined(ctx.clone()),
            });
        };
        match &self.scope {
            Scope::Tx(ctx) => {
                if !ctx.tenant_active() {
                    self.switch_schema(ctx, tenant).await?;
                }
                Ok(Target::Joined(ctx.clone()))
            }
            Scope::Pool => {
                let ctx = self.open_tx().await?;
                if let Err(e) = self.switch_schema(&ctx, tenant).await {
                    return ctx.finish(Err(e)).await;
                }
                Ok(Target::Owned(ctx))
            }
        }
    }
}

#[async_trait]
impl LinkBackend for SqlxLink {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn tenant(&self) -> Option<&str> {
        self.tenant.as_deref()
    }

    fn with_tenant(&self, tenant: Option<&str>) -> Arc<dyn LinkBackend> {
        let mut link = self.clone();
        link.tenant = tenant.filter(|t| !t.is_empty()).map(str::to_string);
        Arc::new(link)
    }

    fn table_name(&self, name: &str) -> String {
        self.naming.table_name(name)
    }

    fn in_transaction(&self) -> bool {
        matches!(self.scope, Scope::Tx(_))
    }

    async fn begin(&self) -> Result<UnitOfWork, DbError> {
        match &self.scope {
            Scope::Tx(ctx) => {
                if let Some(tenant) = self.tenant.as_deref() {
                    if !ctx.tenant_active() {
                        self.switch_schema(ctx, tenant).await?;
                    }
                }
                Ok(UnitOfWork {
                    link: Arc::new(self.clone()),
                    owner: false,
                })
            }
            Scope::Pool => {
                let ctx = self.open_tx().await?;
                if let Some(tenant) = self.tenant.as_deref() {
                    if let Err(e) = self.switch_schema(&ctx, tenant).await {
                        return ctx.finish(Err(e)).await;
                    }
                }
                let mut link = self.clone();
                link.scope = Scope::Tx(ctx);
                Ok(UnitOfWork {
                    link: Arc::new(link),
                    owner: true,
                })
            }
        }
    }

    async fn commit(&self) -> Result<(), DbError> {
        match &self.scope {
            Scope::Tx(ctx) => ctx.commit().await,
            Scope::Pool => Err(DbError::TransactionClosed),
        }
    }

    async fn rollback(&self) -> Result<(), DbError> {
        match &self.scope {
            Scope::Tx(ctx) => ctx.rollback().await,
            Scope::Pool => Err(DbError::TransactionClosed),
        }
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, DbError> {
        match self.target().await? {
            Target::Pool => Ok(self.pool.execute(sql, params).await?),
            Target::Joined(ctx) => ctx.execute(sql, params).await,
            Target::Owned(ctx) => {
                let result = ctx.execute(sql, params).await;
                ctx.finish(result).await
            }
        }
    }

    async fn fetch(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DbError> {
        let rows = self.query(sql, params).await?;
        Ok(rows.into_iter().map(into_row).collect())
    }

    async fn fetch_column(&self, sql: &str, params: &[Value]) -> Result<Vec<Value>, DbError> {
        let rows = self.query(sql, params).await?;
        Ok(rows
            .into_iter()
            .map(|cells| cells.into_iter().next().map(|(_, v)| v).unwrap_or(Value::Null))
            .collect())
    }

    async fn use_schema(&self, name: &str) -> Result<(), DbError> {
        if !self.dialect.supports_schemas() {
            tracing::debug!(schema = %name, dialect = %self.dialect, "schema switch skipped");
            return Ok(());
        }
        match &self.scope {
            Scope::Tx(ctx) => {
                ctx.execute(&sql::set_local_search_path(name), &[]).await?;
                ctx.mark(name);
                Ok(())
            }
            // A plain SET on a pooled connection would outlive the caller's unit of work.
            Scope::Pool => Err(DbError::Configuration(format!(
                "use_schema({}) requires a transaction-bound link",
                name
            ))),
        }
    }

    async fn create_schema(&self, name: &str, if_not_exists: bool) -> Result<(), DbError> {
        if !self.dialect.supports_schemas() {
            tracing::warn!("Schema creation not supported by: {}", self.dialect);
            return Ok(());
        }
        self.execute(&sql::create_schema(name, if_not_exists), &[]).await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn naming_prefixes_once() {
        let naming = Naming::new("billing_");
        assert_eq!(naming.table_name("invoices"), "billing_invoices");
        assert_eq!(naming.table_name("billing_invoices"), "billing_invoices");
        assert_eq!(naming.table_name("public.invoices"), "public.invoices");
        assert_eq!(Naming::default().table_name("invoices"), "invoices");
    }

    async fn memory_link() -> SqlxLink {
        let url = DatabaseUrl::parse("sqlite::memory:").unwrap();
        SqlxLink::connect(&url, Naming::default(), 5).await.unwrap()
    }

    #[tokio::test]
    async fn ping_and_roundtrip_rows() {
        let link = memory_link().await;
        link.ping().await.unwrap();
        link.execute("CREATE TABLE kv (k TEXT PRIMARY KEY, v INTEGER)", &[])
            .await
            .unwrap();
        let affected = link
            .execute(
                "INSERT INTO kv (k, v) VALUES ($1, $2)",
                &[Value::from("a"), Value::from(7)],
            )
            .await
            .unwrap();
        assert_eq!(affected, 1);
        let rows = link.fetch("SELECT k, v FROM kv", &[]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["k"], Value::from("a"));
        assert_eq!(rows[0]["v"], Value::from(7));
    }

    #[tokio::test]
    async fn tenant_calls_on_sqlite_run_without_schema_statements() {
        let link = memory_link().await;
        link.execute("CREATE TABLE t (id INTEGER)", &[]).await.unwrap();
        let scoped = link.with_tenant(Some("acme"));
        assert_eq!(scoped.tenant(), Some("acme"));
        scoped
            .execute("INSERT INTO t (id) VALUES (1)", &[])
            .await
            .unwrap();
        assert_eq!(link.count("t", &crate::query::Predicate::None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn use_schema_is_a_noop_on_sqlite_even_outside_a_transaction() {
        let link = memory_link().await;
        link.use_schema("tenant_a").await.unwrap();
        link.create_schema("tenant_a", false).await.unwrap();
    }

    #[tokio::test]
    async fn owner_rollback_discards_and_closed_tx_is_reported() {
        let link = memory_link().await;
        link.execute("CREATE TABLE t (id INTEGER)", &[]).await.unwrap();
        let work = link.begin().await.unwrap();
        assert!(work.owner);
        assert!(work.link.in_transaction());
        work.link
            .execute("INSERT INTO t (id) VALUES (1)", &[])
            .await
            .unwrap();
        work.link.rollback().await.unwrap();
        assert!(matches!(
            work.link.execute("SELECT 1", &[]).await,
            Err(DbError::TransactionClosed)
        ));
        assert_eq!(link.count("t", &crate::query::Predicate::None).await.unwrap(), 0);

        let nested = work.link.begin().await.unwrap();
        assert!(!nested.owner);
    }
}
