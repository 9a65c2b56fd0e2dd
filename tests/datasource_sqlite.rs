//! Datasource behaviour on an embedded SQLite file.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tenant_datasource::{
    q, tenant, Datasource, DbError, ErrorKind, Link, Migration, Model,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Account {
    id: String,
    owner: String,
    balance: i64,
}

impl Model for Account {
    const TABLE: &'static str = "accounts";
}

fn file_url(dir: &TempDir) -> String {
    format!("sqlite://{}", dir.path().join("app.db").display())
}

fn migrations() -> Vec<Migration> {
    vec![
        Migration::sql(
            "0001_accounts",
            ["CREATE TABLE bank_accounts (id TEXT PRIMARY KEY, owner TEXT NOT NULL, balance INTEGER NOT NULL)"],
        ),
        Migration::new("0002_seed", |link: Link| async move {
            link.create(&Account {
                id: "seed".into(),
                owner: "system".into(),
                balance: 0,
            })
            .await?;
            Ok(())
        }),
    ]
}

async fn applied_ids(link: &Link) -> Vec<String> {
    link.pluck_by("migrations", "id", &q().sort("id"))
        .await
        .unwrap()
}

#[tokio::test]
async fn migrate_twice_applies_each_step_once() {
    let dir = TempDir::new().unwrap();
    let ds = Datasource::new(file_url(&dir))
        .id("bank")
        .table_prefix("bank_")
        .migrations(migrations());
    let link = ds.bootstrap().await.unwrap();

    ds.migrate(None).await.unwrap();
    ds.migrate(None).await.unwrap();

    assert_eq!(applied_ids(&link).await, vec!["0001_accounts", "0002_seed"]);
    assert_eq!(link.count::<Account>().await.unwrap(), 1);
}

#[tokio::test]
async fn failing_step_rolls_back_the_whole_run() {
    let dir = TempDir::new().unwrap();
    let mut steps = migrations();
    steps.push(Migration::sql("0003_broken", ["ALTER TABLE no_such_table ADD COLUMN x INTEGER"]));
    let ds = Datasource::new(file_url(&dir))
        .id("bank")
        .table_prefix("bank_")
        .migrations(steps);
    let link = ds.bootstrap().await.unwrap();

    let err = ds.migrate(None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Migration);
    match &err {
        DbError::Migration { datasource, schema, .. } => {
            assert_eq!(datasource, "bank");
            assert!(schema.is_none());
        }
        other => panic!("unexpected error {other:?}"),
    }

    // Neither the table from step 1 nor the bookkeeping table survived.
    let tables = link
        .fetch_rows(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE 'bank_%'",
            &[],
        )
        .await
        .unwrap();
    assert!(tables.is_empty(), "{tables:?}");
}

/// Collects the crate's debug output, which logs every statement sent to the database.
#[derive(Clone, Default)]
struct SqlLog(Arc<Mutex<Vec<u8>>>);

impl SqlLog {
    fn capture(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new("tenant_datasource=debug"))
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl std::io::Write for SqlLog {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn tenant_migrations_degrade_to_one_schema_on_sqlite() {
    let log = SqlLog::default();
    let _guard = log.capture();

    let dir = TempDir::new().unwrap();
    let ds = Datasource::new(file_url(&dir))
        .id("bank")
        .table_prefix("bank_")
        .migrations(migrations())
        .tenants_loader(tenant::fixed(["acme", "globex"]));
    let link = ds.bootstrap().await.unwrap();
    assert!(!link.supports_schemas());

    ds.migrate(None).await.unwrap();
    assert_eq!(applied_ids(&link).await.len(), 2);

    // Explicit schema: same single namespace.
    ds.migrate(Some("initech")).await.unwrap();
    link.create_schema("initech").await.unwrap();

    let acme = link.with_tenant("acme");
    acme.create(&Account {
        id: "a1".into(),
        owner: "acme".into(),
        balance: 10,
    })
    .await
    .unwrap();
    assert!(link.exists_by_id::<Account>("a1").await.unwrap());

    let sent = log.text();
    assert!(sent.contains("CREATE TABLE"), "{sent}");
    assert!(sent.contains("INSERT INTO \"bank_accounts\""), "{sent}");
    assert!(!sent.contains("CREATE SCHEMA"), "{sent}");
    assert!(!sent.contains("search_path"), "{sent}");
}

#[tokio::test]
async fn tenants_loader_errors_stop_migration() {
    let dir = TempDir::new().unwrap();
    let ds = Datasource::new(file_url(&dir))
        .table_prefix("bank_")
        .migrations(migrations())
        .tenants_loader(tenant::loader(|| async {
            Err(DbError::Connection("registry unavailable".into()))
        }));
    let link = ds.bootstrap().await.unwrap();

    let err = ds.migrate(None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
    let tables = link
        .fetch_rows("SELECT name FROM sqlite_master WHERE type = 'table'", &[])
        .await
        .unwrap();
    assert!(tables.is_empty());
}

#[tokio::test]
async fn empty_tenant_list_skips_migrations() {
    let dir = TempDir::new().unwrap();
    let ds = Datasource::new(file_url(&dir))
        .table_prefix("bank_")
        .migrations(migrations())
        .tenants_loader(tenant::fixed(Vec::<String>::new()));
    let link = ds.bootstrap().await.unwrap();
    ds.migrate(None).await.unwrap();
    assert!(link
        .fetch_rows("SELECT name FROM sqlite_master WHERE type = 'table'", &[])
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn queries_page_and_filter() {
    let dir = TempDir::new().unwrap();
    let ds = Datasource::new(file_url(&dir))
        .table_prefix("bank_")
        .migrations(migrations());
    let link = ds.bootstrap().await.unwrap();
    ds.migrate(None).await.unwrap();

    for (i, owner) in ["ada", "bob", "ada", "cy"].iter().enumerate() {
        link.create(&Account {
            id: format!("acc{i}"),
            owner: owner.to_string(),
            balance: i as i64 * 10,
        })
        .await
        .unwrap();
    }

    let ada: Vec<Account> = link
        .find(&q().where_eq("owner", "ada").sort("balance DESC"))
        .await
        .unwrap();
    assert_eq!(ada.iter().map(|a| a.id.as_str()).collect::<Vec<_>>(), vec!["acc2", "acc0"]);

    let page: Vec<Account> = link
        .find(&q().sort("id").offset(1).limit(2))
        .await
        .unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].id, "acc1");

    let tail: Vec<Account> = link.find(&q().sort("id").offset(4)).await.unwrap();
    assert_eq!(tail.len(), 1);

    let rich = link
        .first::<Account>(&q().where_raw("balance >= $1", vec![json!(20)]).sort("balance"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rich.id, "acc2");
    assert_eq!(
        link.count_by::<Account>(&q().where_eq("owner", "ada")).await.unwrap(),
        2
    );
}

#[tokio::test]
async fn closed_datasource_fails_fast() {
    let dir = TempDir::new().unwrap();
    let ds = Datasource::new(file_url(&dir));
    ds.bootstrap().await.unwrap();
    ds.ping().await.unwrap();
    ds.close().await;
    assert!(ds.ping().await.is_err());
}
