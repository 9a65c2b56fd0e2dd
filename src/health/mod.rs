//! Health status: indicators pinged on demand and folded into one report.

pub mod counters;

pub use counters::{Counter, CounterRegistry, CounterSnapshot};

use crate::manager::Manager;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const UP: &str = "UP";
pub const DOWN: &str = "DOWN";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub kind: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HealthCheck {
    pub fn from_result<E: std::fmt::Display>(name: &str, kind: &str, result: Result<(), E>) -> Self {
        let (status, message) = match result {
            Ok(()) => (UP, None),
            Err(e) => (DOWN, Some(e.to_string())),
        };
        HealthCheck {
            name: name.to_string(),
            kind: kind.to_string(),
            status: status.to_string(),
            message,
        }
    }

    pub fn is_up(&self) -> bool {
        self.status == UP
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct HealthReport {
    pub status: String,
    pub components: Vec<HealthCheck>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub counters: BTreeMap<String, CounterSnapshot>,
}

impl HealthReport {
    pub fn is_up(&self) -> bool {
        self.status == UP
    }
}

/// Something that can report its own health checks.
#[async_trait]
pub trait HealthIndicator: Send + Sync {
    async fn check(&self) -> Vec<HealthCheck>;
}

/// One check per registered datasource.
#[async_trait]
impl HealthIndicator for Manager {
    async fn check(&self) -> Vec<HealthCheck> {
        self.ping_all()
            .await
            .into_iter()
            .map(|(id, result)| HealthCheck::from_result(&id, "Database", result))
            .collect()
    }
}

#[derive(Default)]
pub struct HealthRegistry {
    indicators: Vec<Arc<dyn HealthIndicator>>,
    counters: Arc<CounterRegistry>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_indicator(mut self, indicator: Arc<dyn HealthIndicator>) -> Self {
        self.indicators.push(indicator);
        self
    }

    pub fn counters(&self) -> &Arc<CounterRegistry> {
        &self.counters
    }

    /// Pings every indicator. `UP` only when every component is up.
    pub async fn report(&self) -> HealthReport {
        let checks = self.counters.counter("healthcheck", "health check runs");
        let mut components = Vec::new();
        for indicator in &self.indicators {
            components.extend(indicator.check().await);
        }
        let up = components.iter().all(HealthCheck::is_up);
        if up {
            checks.inc();
        } else {
            checks.err();
            for c in components.iter().filter(|c| !c.is_up()) {
                tracing::warn!(component = %c.name, message = ?c.message, "health check failed");
            }
        }
        HealthReport {
            status: if up { UP } else { DOWN }.to_string(),
            components,
            counters: self.counters.snapshot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<HealthCheck>);

    #[async_trait]
    impl HealthIndicator for Fixed {
        async fn check(&self) -> Vec<HealthCheck> {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn report_is_down_when_any_component_is_down() {
        let ok = HealthCheck::from_result::<String>("cache", "Url", Ok(()));
        let bad = HealthCheck::from_result("broker", "Broker", Err("refused"));
        assert_eq!(bad.message.as_deref(), Some("refused"));

        let registry = HealthRegistry::new()
            .with_indicator(Arc::new(Fixed(vec![ok.clone()])))
            .with_indicator(Arc::new(Fixed(vec![bad])));
        let report = registry.report().await;
        assert!(!report.is_up());
        assert_eq!(report.components.len(), 2);
        assert_eq!(report.counters["healthcheck"].errors, 1);

        let registry = HealthRegistry::new().with_indicator(Arc::new(Fixed(vec![ok])));
        assert!(registry.report().await.is_up());
    }
}
