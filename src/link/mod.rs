//! `Link`: the typed, tenant-aware data access handle.

mod backend;
mod sqlx_link;

pub use backend::{LinkBackend, Row, UnitOfWork};
pub use sqlx_link::{Naming, SqlxLink};

use crate::error::{DbError, Result};
use crate::query::{Predicate, Query, QueryResult};
use crate::url::Dialect;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// A row type persisted in one table.
pub trait Model: Serialize + DeserializeOwned + Send + Sync {
    /// Logical table name; the datasource's prefix is added on use.
    const TABLE: &'static str;
    const ID_COLUMN: &'static str = "id";
}

fn to_row<M: Serialize>(model: &M) -> Result<Row> {
    match serde_json::to_value(model)? {
        Value::Object(map) => Ok(map),
        other => Err(DbError::Decode(serde::ser::Error::custom(format!(
            "model must serialize to an object, got {}",
            other
        )))),
    }
}

fn from_row<M: DeserializeOwned>(row: Row) -> Result<M> {
    Ok(serde_json::from_value(Value::Object(row))?)
}

/// Cheap to clone. Clones share the connection, scope and tenant.
#[derive(Clone)]
pub struct Link {
    inner: Arc<dyn LinkBackend>,
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("dialect", &self.inner.dialect())
            .field("tenant", &self.inner.tenant())
            .field("in_transaction", &self.inner.in_transaction())
            .finish()
    }
}

impl Link {
    pub fn new(backend: Arc<dyn LinkBackend>) -> Self {
        Link { inner: backend }
    }

    pub fn backend(&self) -> &Arc<dyn LinkBackend> {
        &self.inner
    }

    pub fn dialect(&self) -> Dialect {
        self.inner.dialect()
    }

    pub fn supports_schemas(&self) -> bool {
        self.inner.supports_schemas()
    }

    pub fn tenant(&self) -> Option<&str> {
        self.inner.tenant()
    }

    pub fn in_transaction(&self) -> bool {
        self.inner.in_transaction()
    }

    /// Same connection and scope, bound to `tenant`. Every call on the returned
    /// link runs with that tenant's schema active.
    pub fn with_tenant(&self, tenant: &str) -> Link {
        Link::new(self.inner.with_tenant(Some(tenant)))
    }

    pub fn table_name(&self, name: &str) -> String {
        self.inner.table_name(name)
    }

    pub async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }

    /// Inserts the model and returns the stored row (generated columns filled in).
    ///
    /// The write and the decode share one unit of work: a row that cannot be
    /// read back as `M` is not left behind.
    pub async fn create<M: Model>(&self, model: &M) -> Result<M> {
        let table = self.table_name(M::TABLE);
        let row = to_row(model)?;
        self.transactional(|tx| async move { from_row(tx.inner.create(&table, row).await?) })
            .await
    }

    /// Insert or update by `M::ID_COLUMN`, in one unit of work like [`Link::create`].
    pub async fn save<M: Model>(&self, model: &M) -> Result<M> {
        let table = self.table_name(M::TABLE);
        let row = to_row(model)?;
        self.transactional(|tx| async move {
            from_row(tx.inner.save(&table, M::ID_COLUMN, row).await?)
        })
        .await
    }

    pub async fn exec(&self, sql: &str) -> Result<QueryResult> {
        self.exec_with(sql, &[]).await
    }

    /// Runs a statement with positional `$n` arguments.
    pub async fn exec_with(&self, sql: &str, args: &[Value]) -> Result<QueryResult> {
        let n = self.inner.execute(sql, args).await?;
        Ok(QueryResult::new(n))
    }

    pub async fn fetch_rows(&self, sql: &str, args: &[Value]) -> Result<Vec<Row>> {
        self.inner.fetch(sql, args).await
    }

    /// First column of each result row, whatever its name.
    pub async fn fetch_column(&self, sql: &str, args: &[Value]) -> Result<Vec<Value>> {
        self.inner.fetch_column(sql, args).await
    }

    pub async fn find<M: Model>(&self, query: &Query) -> Result<Vec<M>> {
        let rows = self.inner.find(&self.table_name(M::TABLE), query).await?;
        rows.into_iter().map(from_row).collect()
    }

    /// Appends matches to `dest`. On error `dest` is left as it was.
    pub async fn find_into<M: Model>(&self, dest: &mut Vec<M>, query: &Query) -> Result<QueryResult> {
        let found = self.find::<M>(query).await?;
        let n = found.len() as u64;
        dest.extend(found);
        Ok(QueryResult::new(n))
    }

    pub async fn first<M: Model>(&self, query: &Query) -> Result<Option<M>> {
        let mut rows = self.find::<M>(&query.clone().limit(1)).await?;
        Ok(if rows.is_empty() { None } else { Some(rows.remove(0)) })
    }

    pub async fn find_by_id<M: Model>(&self, id: impl Into<Value>) -> Result<Option<M>> {
        self.first(&Query::new().where_eq(M::ID_COLUMN, id)).await
    }

    /// Values of one column, decoded as `T`.
    pub async fn pluck<T: DeserializeOwned>(&self, table: &str, column: &str) -> Result<Vec<T>> {
        self.pluck_by(table, column, &Query::new()).await
    }

    pub async fn pluck_by<T: DeserializeOwned>(
        &self,
        table: &str,
        column: &str,
        query: &Query,
    ) -> Result<Vec<T>> {
        let values = self.inner.pluck(&self.table_name(table), column, query).await?;
        values
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(DbError::from))
            .collect()
    }

    pub async fn count<M: Model>(&self) -> Result<i64> {
        self.inner
            .count(&self.table_name(M::TABLE), &Predicate::None)
            .await
    }

    pub async fn count_by<M: Model>(&self, query: &Query) -> Result<i64> {
        self.inner
            .count(&self.table_name(M::TABLE), query.predicate())
            .await
    }

    /// True when a row matches the raw predicate.
    pub async fn exists_by<M: Model>(&self, where_sql: &str, args: Vec<Value>) -> Result<bool> {
        let query = Query::new().where_raw(where_sql, args);
        self.inner
            .exists(&self.table_name(M::TABLE), query.predicate())
            .await
    }

    pub async fn exists_by_id<M: Model>(&self, id: impl Into<Value>) -> Result<bool> {
        let query = Query::new().where_eq(M::ID_COLUMN, id);
        self.inner
            .exists(&self.table_name(M::TABLE), query.predicate())
            .await
    }

    /// Deletes every row of the model's table.
    pub async fn truncate<M: Model>(&self) -> Result<QueryResult> {
        let n = self.inner.truncate(&self.table_name(M::TABLE)).await?;
        Ok(QueryResult::new(n))
    }

    pub async fn create_schema(&self, name: &str) -> Result<()> {
        self.inner.create_schema(name, false).await
    }

    pub async fn create_schema_if_missing(&self, name: &str) -> Result<()> {
        self.inner.create_schema(name, true).await
    }

    /// Switches the search path of the enclosing transaction. No-op on SQLite.
    pub async fn use_schema(&self, name: &str) -> Result<()> {
        self.inner.use_schema(name).await
    }

    /// Runs `f` in a unit of work. A link already inside a transaction joins it and
    /// leaves commit/rollback to the outermost caller.
    pub async fn transactional<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnOnce(Link) -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        let work = self.inner.begin().await?;
        let tx = Link::new(work.link.clone());
        let result = f(tx).await;
        if !work.owner {
            return result;
        }
        match result {
            Ok(v) => {
                work.link.commit().await?;
                Ok(v)
            }
            Err(e) => {
                if let Err(rb) = work.link.rollback().await {
                    tracing::warn!(error = %rb, "transaction rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Closes the underlying pool. Every link sharing it fails afterwards.
    pub async fn close(&self) {
        self.inner.close().await
    }
}
