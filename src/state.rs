//! Shared application state for the status routes.

use crate::health::HealthRegistry;
use crate::manager::Manager;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<Manager>,
    /// Built with the manager as an indicator; owns the counters.
    pub health: Arc<HealthRegistry>,
}

impl AppState {
    pub fn new(manager: Arc<Manager>) -> Self {
        let health = HealthRegistry::new().with_indicator(manager.clone());
        AppState {
            manager,
            health: Arc::new(health),
        }
    }
}
