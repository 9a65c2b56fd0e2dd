//! Tenant lists for multitenant datasources: one schema per tenant id.

use crate::error::Result;
use crate::link::Link;
use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;

/// Produces the tenant ids a multitenant datasource migrates at startup.
pub type TenantsLoader = Arc<dyn Fn() -> BoxFuture<'static, Result<Vec<String>>> + Send + Sync>;

/// Wraps an async closure as a loader.
pub fn loader<F, Fut>(f: F) -> TenantsLoader
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Vec<String>>> + Send + 'static,
{
    Arc::new(move || -> BoxFuture<'static, Result<Vec<String>>> { Box::pin(f()) })
}

/// A loader that always returns the same tenants.
pub fn fixed<I, S>(tenants: I) -> TenantsLoader
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let tenants: Vec<String> = tenants.into_iter().map(Into::into).collect();
    loader(move || {
        let tenants = tenants.clone();
        async move { Ok(tenants) }
    })
}

/// Loads tenant ids from the first column of `sql`, run on `link` (typically a
/// central registry datasource). Null and empty values are skipped.
pub fn from_query(link: Link, sql: impl Into<String>) -> TenantsLoader {
    let sql: String = sql.into();
    loader(move || {
        let link = link.clone();
        let sql = sql.clone();
        async move {
            let values = link.fetch_column(&sql, &[]).await?;
            let mut ids = Vec::with_capacity(values.len());
            for value in values {
                let id = match value {
                    Value::String(s) => s,
                    Value::Number(n) => n.to_string(),
                    _ => continue,
                };
                if id.is_empty() {
                    tracing::warn!("tenant registry returned an empty id, skipping");
                    continue;
                }
                ids.push(id);
            }
            Ok(ids)
        }
    })
}
