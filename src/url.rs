//! Driver-qualified database URLs: dialect detection and normalization for sqlx.

use crate::error::DbError;
use std::fmt;

/// SQL dialect behind a datasource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dialect {
    /// Client/server, multiple schemas per database.
    Postgres,
    /// Embedded single file (or in-memory). No schemas.
    Sqlite,
}

impl Dialect {
    pub fn supports_schemas(self) -> bool {
        matches!(self, Dialect::Postgres)
    }

    pub fn name(self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::Sqlite => "sqlite",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A parsed connection URL. `connect_url` is what gets handed to sqlx.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatabaseUrl {
    pub dialect: Dialect,
    pub connect_url: String,
    pub in_memory: bool,
}

impl DatabaseUrl {
    /// Accepts `postgres://`, `postgresql://`, `pg://`, `pgsql://`, `sqlite:`, `sqlite3:` and `file:` forms.
    pub fn parse(raw: &str) -> Result<Self, DbError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(DbError::Configuration(
                "invalid databaseUrl provided (empty)".into(),
            ));
        }
        let (scheme, rest) = raw.split_once(':').ok_or_else(|| {
            DbError::Configuration(format!("error parsing databaseUrl: {} (missing scheme)", raw))
        })?;
        if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '+') {
            return Err(DbError::Configuration(format!(
                "error parsing databaseUrl: {} (invalid scheme)",
                raw
            )));
        }

        match scheme.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" | "pgsql" => {
                let rest = rest.strip_prefix("//").ok_or_else(|| {
                    DbError::Configuration(format!("error parsing databaseUrl: {}", raw))
                })?;
                if rest.is_empty() {
                    return Err(DbError::Configuration(format!(
                        "error parsing databaseUrl: {} (missing host)",
                        raw
                    )));
                }
                Ok(DatabaseUrl {
                    dialect: Dialect::Postgres,
                    connect_url: format!("postgres://{}", rest),
                    in_memory: false,
                })
            }
            "sqlite" | "sqlite3" | "file" => Self::sqlite(raw, rest),
            other => Err(DbError::Configuration(format!(
                "Unsupported database dialect: {}",
                other
            ))),
        }
    }

    fn sqlite(raw: &str, rest: &str) -> Result<Self, DbError> {
        let path = rest.strip_prefix("//").unwrap_or(rest);
        let (path, params) = match path.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (path, None),
        };
        if path.is_empty() {
            return Err(DbError::Configuration(format!(
                "error parsing databaseUrl: {} (missing file)",
                raw
            )));
        }
        if path == ":memory:" {
            return Ok(DatabaseUrl {
                dialect: Dialect::Sqlite,
                connect_url: "sqlite::memory:".into(),
                in_memory: true,
            });
        }
        let mut params: Vec<&str> = params
            .map(|q| q.split('&').filter(|p| !p.is_empty()).collect())
            .unwrap_or_default();
        if !params.iter().any(|p| p.starts_with("mode=")) {
            params.push("mode=rwc");
        }
        Ok(DatabaseUrl {
            dialect: Dialect::Sqlite,
            connect_url: format!("sqlite://{}?{}", path, params.join("&")),
            in_memory: false,
        })
    }
}
