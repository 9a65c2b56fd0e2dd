//! Forward-only migrations and the bookkeeping table that records them.

use crate::error::{DbError, Result};
use crate::link::Link;
use crate::sql::quoted_path;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

type MigrateFn = Arc<dyn Fn(Link) -> BoxFuture<'static, Result<()>> + Send + Sync>;

#[derive(Clone)]
enum Action {
    Sql(Vec<String>),
    Func(MigrateFn),
}

/// One forward step, identified by a unique id within its datasource.
#[derive(Clone)]
pub struct Migration {
    pub id: String,
    pub description: Option<String>,
    pub author: Option<String>,
    action: Action,
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.action {
            Action::Sql(stmts) => format!("sql({})", stmts.len()),
            Action::Func(_) => "fn".to_string(),
        };
        f.debug_struct("Migration")
            .field("id", &self.id)
            .field("description", &self.description)
            .field("action", &kind)
            .finish()
    }
}

impl Migration {
    /// A step that runs `f` with the transaction-bound link.
    pub fn new<F, Fut>(id: impl Into<String>, f: F) -> Self
    where
        F: Fn(Link) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Migration {
            id: id.into(),
            description: None,
            author: None,
            action: Action::Func(Arc::new(move |link| -> BoxFuture<'static, Result<()>> {
                Box::pin(f(link))
            })),
        }
    }

    /// A step made of plain SQL statements, run in order.
    pub fn sql<I, S>(id: impl Into<String>, statements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Migration {
            id: id.into(),
            description: None,
            author: None,
            action: Action::Sql(statements.into_iter().map(Into::into).collect()),
        }
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    pub fn author(mut self, name: impl Into<String>) -> Self {
        self.author = Some(name.into());
        self
    }

    async fn run(&self, link: &Link) -> Result<()> {
        match &self.action {
            Action::Sql(stmts) => {
                for stmt in stmts {
                    link.exec(stmt).await?;
                }
                Ok(())
            }
            Action::Func(f) => f(link.clone()).await,
        }
    }
}

fn validate(migrations: &[Migration]) -> Result<()> {
    let mut seen = HashSet::new();
    for m in migrations {
        if m.id.trim().is_empty() {
            return Err(DbError::Configuration("migration id must not be empty".into()));
        }
        if !seen.insert(m.id.as_str()) {
            return Err(DbError::Configuration(format!(
                "duplicate migration id: {}",
                m.id
            )));
        }
    }
    Ok(())
}

/// Applies pending migrations through a transaction-bound link.
///
/// The caller owns the transaction; the runner neither commits nor rolls back.
pub struct Runner<'a> {
    link: &'a Link,
    table: String,
}

impl<'a> Runner<'a> {
    pub fn new(link: &'a Link) -> Self {
        Runner {
            link,
            table: link.table_name("migrations"),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    async fn ensure_table(&self) -> Result<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (id VARCHAR(255) PRIMARY KEY, applied_at VARCHAR(64) NOT NULL)",
            quoted_path(&self.table)
        );
        self.link.exec(&sql).await?;
        Ok(())
    }

    /// Ids recorded in the bookkeeping table.
    pub async fn applied(&self) -> Result<HashSet<String>> {
        let sql = format!("SELECT id FROM {}", quoted_path(&self.table));
        let rows = self.link.fetch_rows(&sql, &[]).await?;
        Ok(rows
            .into_iter()
            .filter_map(|mut r| match r.remove("id") {
                Some(Value::String(s)) => Some(s),
                _ => None,
            })
            .collect())
    }

    /// Returns the ids applied by this call, in order.
    pub async fn migrate(&self, migrations: &[Migration]) -> Result<Vec<String>> {
        validate(migrations)?;
        self.ensure_table().await?;
        let applied = self.applied().await?;
        let insert = format!(
            "INSERT INTO {} (id, applied_at) VALUES ($1, $2)",
            quoted_path(&self.table)
        );
        let mut ran = Vec::new();
        for m in migrations {
            if applied.contains(&m.id) {
                continue;
            }
            tracing::debug!(migration = %m.id, table = %self.table, "applying migration");
            m.run(self.link).await?;
            let now = chrono::Utc::now().to_rfc3339();
            self.link
                .exec_with(&insert, &[Value::from(m.id.clone()), Value::from(now)])
                .await?;
            ran.push(m.id.clone());
        }
        Ok(ran)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{Naming, SqlxLink};
    use crate::url::DatabaseUrl;

    async fn link() -> Link {
        let url = DatabaseUrl::parse("sqlite::memory:").unwrap();
        let backend = SqlxLink::connect(&url, Naming::new("svc_"), 1).await.unwrap();
        Link::new(Arc::new(backend))
    }

    fn steps() -> Vec<Migration> {
        vec![
            Migration::sql("0001_notes", ["CREATE TABLE svc_notes (id TEXT PRIMARY KEY, body TEXT)"])
                .description("notes table"),
            Migration::new("0002_seed", |link: Link| async move {
                link.exec("INSERT INTO svc_notes (id, body) VALUES ('n1', 'hello')")
                    .await?;
                Ok(())
            })
            .author("ops"),
        ]
    }

    #[tokio::test]
    async fn applies_each_step_once() {
        let link = link().await;
        let runner = Runner::new(&link);
        assert_eq!(runner.table(), "svc_migrations");

        let ran = runner.migrate(&steps()).await.unwrap();
        assert_eq!(ran, vec!["0001_notes", "0002_seed"]);
        let again = runner.migrate(&steps()).await.unwrap();
        assert!(again.is_empty());

        let rows = link.fetch_rows("SELECT COUNT(*) AS n FROM svc_notes", &[]).await.unwrap();
        assert_eq!(rows[0]["n"], Value::from(1));
        assert_eq!(runner.applied().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn rejects_empty_and_duplicate_ids() {
        let link = link().await;
        let runner = Runner::new(&link);
        let err = runner
            .migrate(&[Migration::sql("", ["SELECT 1"])])
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Configuration(_)));

        let err = runner
            .migrate(&[Migration::sql("a", ["SELECT 1"]), Migration::sql("a", ["SELECT 1"])])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("duplicate migration id"));
    }
}
