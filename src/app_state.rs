use sqlx::SqlitePool;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::pipeline::orchestrator::Orchestrator;
use crate::services::storage::ImageStore;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub store: Arc<ImageStore>,
    pub orchestrator: Orchestrator,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        store: Arc<ImageStore>,
        orchestrator: Orchestrator,
        config: AppConfig,
    ) -> Self {
        Self {
            db,
            store,
            orchestrator,
            config: Arc::new(config),
        }
    }
}
