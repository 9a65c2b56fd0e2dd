//! Typed errors and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Error kinds callers branch on. Stable across variants that carry extra context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Connection,
    Migration,
    TenantResolution,
    Query,
}

#[derive(Error, Debug)]
pub enum DbError {
    /// Empty or unparsable URL, unsupported dialect, ambiguous registration.
    #[error("configuration: {0}")]
    Configuration(String),
    /// Opening or pinging the physical connection failed.
    #[error("connection: {0}")]
    Connection(String),
    #[error("[{datasource}] could not be migrated{} -- {source}", schema_suffix(.schema))]
    Migration {
        datasource: String,
        schema: Option<String>,
        #[source]
        source: Box<DbError>,
    },
    #[error("no datasource available for tenant: {0}")]
    TenantResolution(String),
    #[error("database: {0}")]
    Query(#[from] sqlx::Error),
    #[error("decode: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("transaction already closed")]
    TransactionClosed,
}

fn schema_suffix(schema: &Option<String>) -> String {
    schema
        .as_deref()
        .map(|s| format!(" (schema {})", s))
        .unwrap_or_default()
}

impl DbError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DbError::Configuration(_) => ErrorKind::Configuration,
            DbError::Connection(_) => ErrorKind::Connection,
            DbError::Migration { .. } => ErrorKind::Migration,
            DbError::TenantResolution(_) => ErrorKind::TenantResolution,
            DbError::Query(_) | DbError::Decode(_) | DbError::TransactionClosed => ErrorKind::Query,
        }
    }

    pub(crate) fn migration(datasource: &str, schema: Option<&str>, source: DbError) -> Self {
        // Keep the innermost context when a runner error is already annotated.
        if let DbError::Migration { .. } = source {
            return source;
        }
        DbError::Migration {
            datasource: datasource.to_string(),
            schema: schema.map(str::to_string),
            source: Box::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl IntoResponse for DbError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            DbError::Configuration(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
            DbError::Connection(_) => (StatusCode::SERVICE_UNAVAILABLE, "connection_error"),
            DbError::Migration { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "migration_error"),
            DbError::TenantResolution(_) => (StatusCode::NOT_FOUND, "tenant_not_found"),
            DbError::Query(e) => {
                if let sqlx::Error::RowNotFound = e {
                    (StatusCode::NOT_FOUND, "not_found")
                } else {
                    (StatusCode::INTERNAL_SERVER_ERROR, "database_error")
                }
            }
            DbError::Decode(_) | DbError::TransactionClosed => {
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error")
            }
        };
        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migration_error_names_datasource_and_schema() {
        let err = DbError::migration(
            "billing",
            Some("tenant_a"),
            DbError::Configuration("boom".into()),
        );
        assert_eq!(err.kind(), ErrorKind::Migration);
        let msg = err.to_string();
        assert!(msg.contains("[billing]"), "{msg}");
        assert!(msg.contains("tenant_a"), "{msg}");
        assert!(msg.contains("boom"), "{msg}");
    }

    #[test]
    fn migration_error_is_not_wrapped_twice() {
        let inner = DbError::migration("billing", None, DbError::TransactionClosed);
        let outer = DbError::migration("other", Some("x"), inner);
        match outer {
            DbError::Migration { datasource, schema, .. } => {
                assert_eq!(datasource, "billing");
                assert!(schema.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn tenant_resolution_maps_to_not_found() {
        let resp = DbError::TenantResolution("acme".into()).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
