//! Capability interface every storage engine behind a `Link` implements.

use crate::error::DbError;
use crate::query::{Predicate, Query};
use crate::sql;
use crate::url::Dialect;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

/// One decoded row, column name to value.
pub type Row = Map<String, Value>;

/// Result of [`LinkBackend::begin`].
pub struct UnitOfWork {
    pub link: Arc<dyn LinkBackend>,
    /// False when the work joined an enclosing transaction. Only the owner commits or rolls back.
    pub owner: bool,
}

/// Operations a storage engine exposes to `Link`, `Datasource` and `Manager`.
///
/// Table names reaching the data methods are already resolved through
/// [`LinkBackend::table_name`]. The data methods have SQL defaults written on
/// top of [`LinkBackend::execute`] and [`LinkBackend::fetch`]; engines that are
/// not SQL-shaped override them.
///
/// Every data method honours the tenant bound to the backend: the call runs
/// with that tenant's schema active, joining the enclosing transaction when
/// the tenant session is already active there.
#[async_trait]
pub trait LinkBackend: Send + Sync {
    fn dialect(&self) -> Dialect;

    fn supports_schemas(&self) -> bool {
        self.dialect().supports_schemas()
    }

    fn tenant(&self) -> Option<&str>;

    /// Same connection and scope, bound to `tenant` (None clears it).
    fn with_tenant(&self, tenant: Option<&str>) -> Arc<dyn LinkBackend>;

    /// Applies the naming convention (table prefix).
    fn table_name(&self, name: &str) -> String;

    fn in_transaction(&self) -> bool;

    /// Starts a unit of work, or joins the enclosing one.
    async fn begin(&self) -> Result<UnitOfWork, DbError>;

    async fn commit(&self) -> Result<(), DbError>;

    async fn rollback(&self) -> Result<(), DbError>;

    /// Runs a statement, returns rows affected.
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, DbError>;

    async fn fetch(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DbError>;

    /// First column of every result row, in the statement's column order.
    async fn fetch_column(&self, sql: &str, params: &[Value]) -> Result<Vec<Value>, DbError>;

    /// Switches the search path of the current transaction. No-op without schema support.
    async fn use_schema(&self, name: &str) -> Result<(), DbError>;

    async fn create_schema(&self, name: &str, if_not_exists: bool) -> Result<(), DbError>;

    async fn ping(&self) -> Result<(), DbError> {
        self.fetch("SELECT 1", &[]).await.map(|_| ())
    }

    /// Closes the underlying connection. Links sharing it fail afterwards.
    async fn close(&self);

    async fn create(&self, table: &str, row: Row) -> Result<Row, DbError> {
        let q = sql::insert(table, &row);
        let rows = self.fetch(&q.sql, &q.params).await?;
        Ok(stored(row, rows))
    }

    async fn save(&self, table: &str, id_column: &str, row: Row) -> Result<Row, DbError> {
        let q = sql::upsert(table, id_column, &row);
        let rows = self.fetch(&q.sql, &q.params).await?;
        Ok(stored(row, rows))
    }

    async fn find(&self, table: &str, query: &Query) -> Result<Vec<Row>, DbError> {
        let q = sql::select(table, query, self.dialect());
        self.fetch(&q.sql, &q.params).await
    }

    async fn count(&self, table: &str, predicate: &Predicate) -> Result<i64, DbError> {
        let q = sql::count(table, predicate);
        let rows = self.fetch(&q.sql, &q.params).await?;
        Ok(rows
            .first()
            .and_then(|r| r.get("count"))
            .and_then(Value::as_i64)
            .unwrap_or(0))
    }

    async fn exists(&self, table: &str, predicate: &Predicate) -> Result<bool, DbError> {
        Ok(self.count(table, predicate).await? > 0)
    }

    async fn pluck(&self, table: &str, column: &str, query: &Query) -> Result<Vec<Value>, DbError> {
        let q = sql::select_column(table, column, query, self.dialect());
        let rows = self.fetch(&q.sql, &q.params).await?;
        Ok(rows
            .into_iter()
            .map(|mut r| r.remove(column).unwrap_or(Value::Null))
            .collect())
    }

    async fn truncate(&self, table: &str) -> Result<u64, DbError> {
        let q = sql::delete_all(table);
        self.execute(&q.sql, &q.params).await
    }
}

/// The written row with generated columns from `RETURNING` filled in. Values
/// the caller supplied are kept as given.
fn stored(mut written: Row, mut returned: Vec<Row>) -> Row {
    if let Some(row) = returned.pop() {
        for (name, value) in row {
            match written.get(&name) {
                Some(v) if !v.is_null() => {}
                _ => {
                    written.insert(name, value);
                }
            }
        }
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Row {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn stored_row_keeps_written_values_and_fills_generated_ones() {
        let written = obj(json!({"id": "f1", "enabled": true, "note": null}));
        let returned = vec![obj(json!({"id": "f1", "enabled": 1, "note": null, "seq": 7}))];
        assert_eq!(
            stored(written.clone(), returned),
            obj(json!({"id": "f1", "enabled": true, "note": null, "seq": 7}))
        );
        assert_eq!(stored(written.clone(), Vec::new()), written);
    }
}
