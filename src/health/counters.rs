//! Success/error counters keyed by code, reported in the status payload.

use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

#[derive(Debug)]
pub struct Counter {
    code: String,
    description: String,
    ok: AtomicU64,
    err: AtomicU64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub description: String,
    pub success: u64,
    pub errors: u64,
    pub total: u64,
}

impl Counter {
    fn new(code: &str, description: &str) -> Self {
        Counter {
            code: code.to_string(),
            description: description.to_string(),
            ok: AtomicU64::new(0),
            err: AtomicU64::new(0),
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn inc(&self) {
        self.ok.fetch_add(1, Ordering::Relaxed);
    }

    pub fn err(&self) {
        self.err.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record<T, E>(&self, result: &Result<T, E>) {
        match result {
            Ok(_) => self.inc(),
            Err(_) => self.err(),
        }
    }

    /// Awaits `fut` and records its outcome.
    pub async fn watch<T, E, Fut>(&self, fut: Fut) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        let result = fut.await;
        self.record(&result);
        result
    }

    pub fn reset(&self) {
        self.ok.store(0, Ordering::Relaxed);
        self.err.store(0, Ordering::Relaxed);
    }

    pub fn success(&self) -> u64 {
        self.ok.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.err.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.success() + self.errors()
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        let success = self.success();
        let errors = self.errors();
        CounterSnapshot {
            description: self.description.clone(),
            success,
            errors,
            total: success + errors,
        }
    }
}

/// Get-or-create registry. Owned by the application state.
#[derive(Debug, Default)]
pub struct CounterRegistry {
    counters: RwLock<BTreeMap<String, Arc<Counter>>>,
}

impl CounterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The counter registered under `code`, created on first use. The
    /// description of an existing counter is kept.
    pub fn counter(&self, code: &str, description: &str) -> Arc<Counter> {
        if let Ok(map) = self.counters.read() {
            if let Some(c) = map.get(code) {
                return c.clone();
            }
        }
        match self.counters.write() {
            Ok(mut map) => map
                .entry(code.to_string())
                .or_insert_with(|| Arc::new(Counter::new(code, description)))
                .clone(),
            // Poisoned lock: hand out a detached counter rather than panic.
            Err(_) => Arc::new(Counter::new(code, description)),
        }
    }

    pub fn snapshot(&self) -> BTreeMap<String, CounterSnapshot> {
        self.counters
            .read()
            .map(|map| {
                map.iter()
                    .map(|(code, c)| (code.clone(), c.snapshot()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn watch_records_outcomes() {
        let registry = CounterRegistry::new();
        let c = registry.counter("db_ping", "database pings");
        let _ = c.watch(async { Ok::<_, ()>(1) }).await;
        let _ = c.watch(async { Err::<(), _>("down") }).await;
        let _ = c.watch(async { Ok::<_, ()>(2) }).await;
        assert_eq!((c.success(), c.errors(), c.total()), (2, 1, 3));

        let same = registry.counter("db_ping", "ignored");
        assert!(Arc::ptr_eq(&c, &same));
        assert_eq!(registry.snapshot()["db_ping"].description, "database pings");

        c.reset();
        assert_eq!(c.total(), 0);
    }
}
