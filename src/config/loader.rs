//! Load settings from `.env.{env}`, `.env` and the process environment.

use crate::config::types::{DatasourceConfig, Settings};
use crate::error::{DbError, Result};

pub const FACTORY_ID: &str = "factory";

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(DbError::Configuration(format!(
            "{}: expected a boolean, got {}",
            key, other
        ))),
    }
}

impl Settings {
    /// Loads `.env.{env}` then `.env` (earlier files win, existing variables are
    /// never overwritten), then reads the environment.
    pub fn load(env: &str) -> Result<Self> {
        let env = env.trim().to_ascii_lowercase();
        let mut files = Vec::new();
        if !env.is_empty() {
            files.push(format!(".env.{}", env));
        }
        files.push(".env".to_string());
        for f in &files {
            match dotenvy::from_filename(f) {
                Ok(_) => tracing::info!("{} file loaded", f),
                Err(e) if e.not_found() => tracing::debug!("{} not found, skipping", f),
                Err(e) => {
                    return Err(DbError::Configuration(format!("{}: {}", f, e)));
                }
            }
        }
        let mut settings = Self::from_env()?;
        if settings.env.is_empty() {
            settings.env = env;
        }
        Ok(settings)
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through `get`. Empty values count as unset.
    pub fn from_lookup<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| get(key).filter(|v| !v.trim().is_empty());
        let defaults = Settings::default();
        let max_connections = match get("DATABASE_MAX_CONNECTIONS") {
            Some(raw) => raw.trim().parse::<u32>().map_err(|_| {
                DbError::Configuration(format!(
                    "DATABASE_MAX_CONNECTIONS: expected a positive integer, got {}",
                    raw
                ))
            })?,
            None => defaults.max_connections,
        };
        let migrations = match get("DB_MIGRATIONS") {
            Some(raw) => parse_bool("DB_MIGRATIONS", &raw)?,
            None => defaults.migrations,
        };
        Ok(Settings {
            service_name: get("SERVICE_NAME").unwrap_or(defaults.service_name),
            env: get("ENV").unwrap_or_default().to_ascii_lowercase(),
            database_url: get("DATABASE_URL"),
            factory_database_url: get("DATABASE_FACTORY_URL"),
            max_connections,
            migrations,
        })
    }

    pub fn is_prod(&self) -> bool {
        self.env == "prod"
    }

    pub fn is_test(&self) -> bool {
        self.env == "test"
    }

    /// Datasource declarations implied by the settings: `DATABASE_URL` as the
    /// primary, `DATABASE_FACTORY_URL` as the tenant factory.
    pub fn datasources(&self) -> Vec<DatasourceConfig> {
        let mut out = Vec::new();
        if let Some(url) = &self.database_url {
            out.push(DatasourceConfig {
                id: None,
                url: url.clone(),
                primary: true,
                max_connections: Some(self.max_connections),
                ..Default::default()
            });
        }
        if let Some(url) = &self.factory_database_url {
            out.push(DatasourceConfig {
                id: Some(FACTORY_ID.to_string()),
                url: url.clone(),
                factory: true,
                max_connections: Some(self.max_connections),
                ..Default::default()
            });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let s = Settings::from_lookup(lookup(&[])).unwrap();
        assert_eq!(s, Settings::default());
        assert!(s.migrations);
        assert!(s.datasources().is_empty());
    }

    #[test]
    fn reads_datasources_and_flags() {
        let s = Settings::from_lookup(lookup(&[
            ("SERVICE_NAME", "billing-api"),
            ("ENV", "PROD"),
            ("DATABASE_URL", "sqlite://data.db"),
            ("DATABASE_FACTORY_URL", "postgres://localhost/tenants"),
            ("DATABASE_MAX_CONNECTIONS", "12"),
            ("DB_MIGRATIONS", "off"),
        ]))
        .unwrap();
        assert!(s.is_prod());
        assert!(!s.migrations);
        let ds = s.datasources();
        assert_eq!(ds.len(), 2);
        assert!(ds[0].primary && ds[0].id.is_none());
        assert!(ds[1].factory);
        assert_eq!(ds[1].id.as_deref(), Some(FACTORY_ID));
        assert_eq!(ds[1].max_connections, Some(12));
    }

    #[test]
    fn invalid_values_are_configuration_errors() {
        assert!(Settings::from_lookup(lookup(&[("DB_MIGRATIONS", "maybe")])).is_err());
        assert!(Settings::from_lookup(lookup(&[("DATABASE_MAX_CONNECTIONS", "-1")])).is_err());
    }

    #[test]
    fn datasource_config_from_json() {
        let cfg: DatasourceConfig =
            serde_json::from_str(r#"{"id":"reports","url":"sqlite::memory:","table_prefix":"rpt_"}"#)
                .unwrap();
        assert_eq!(cfg.id.as_deref(), Some("reports"));
        assert!(!cfg.primary && !cfg.factory);
        assert_eq!(cfg.max_connections, None);
    }
}
