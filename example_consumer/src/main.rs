//! Example consumer: a notes service that uses tenant-datasource as a dependency.
//!
//! Run from repo root: `cargo run -p example-consumer`
//! Configure with `DATABASE_URL` (default: a local SQLite file) and optionally
//! `DATABASE_FACTORY_URL` for schema-per-tenant data. `db:migrate` as the first
//! argument applies migrations and exits.

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tenant_datasource::{
    q, status_routes, AppState, Datasource, DbError, Manager, Migration, Model, Settings,
};
use tokio::net::TcpListener;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Note {
    id: String,
    body: String,
}

impl Model for Note {
    const TABLE: &'static str = "notes";
}

fn migrations(prefix: &str) -> Vec<Migration> {
    vec![Migration::sql(
        "0001_notes",
        [format!(
            "CREATE TABLE IF NOT EXISTS {prefix}notes (id VARCHAR(64) PRIMARY KEY, body TEXT NOT NULL)"
        )],
    )
    .description("notes table")]
}

async fn list_notes(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
) -> Result<Json<Vec<Note>>, DbError> {
    let notes = state
        .manager
        .with_tenant_link(&tenant, |link| async move {
            link.find::<Note>(&q().sort("id")).await
        })
        .await?;
    Ok(Json(notes))
}

async fn add_note(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Json(note): Json<Note>,
) -> Result<Json<Note>, DbError> {
    let saved = state
        .manager
        .with_tenant_link(&tenant, |link| async move { link.save(&note).await })
        .await?;
    Ok(Json(saved))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env = std::env::var("ENV").unwrap_or_default();
    let mut settings = Settings::load(&env)?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tenant_datasource=info,example_consumer=info")),
        )
        .init();

    if settings.database_url.is_none() {
        settings.database_url = Some("sqlite://notes.db".into());
    }
    let mut manager = Manager::new(&settings.service_name)?;
    let prefix = format!("{}_", manager.service_name());
    for config in settings.datasources() {
        let ds = Datasource::from_config(&config).migrations(migrations(&prefix));
        manager.add(ds).await?;
    }

    let migrate_only = std::env::args().nth(1).as_deref() == Some("db:migrate");
    if settings.migrations || migrate_only {
        manager.migrate().await?;
    }
    if migrate_only {
        manager.close().await;
        return Ok(());
    }

    let state = AppState::new(Arc::new(manager));
    let app = Router::new()
        .route("/tenants/:tenant/notes", get(list_notes).post(add_note))
        .with_state(state.clone())
        .merge(status_routes(state.clone()));

    let listener = TcpListener::bind("127.0.0.1:3000").await?;
    let port = listener.local_addr()?.port();
    tracing::info!("Example consumer listening on http://127.0.0.1:{}", port);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    state.manager.close().await;
    Ok(())
}
