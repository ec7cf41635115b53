//! Services module for tax-service.

pub mod database;
pub mod memory;
pub mod metrics;
pub mod repository;

use std::sync::Arc;

pub use database::Database;
pub use memory::InMemoryBackend;
pub use metrics::{get_metrics, init_metrics};
pub use repository::{AuditSink, CaseDirectory, EstimationStore, TaxTableRepository};

/// Collaborators injected into the estimation engine.
#[derive(Clone)]
pub struct Backends {
    pub tables: Arc<dyn TaxTableRepository>,
    pub cases: Arc<dyn CaseDirectory>,
    pub store: Arc<dyn EstimationStore>,
    pub audit: Arc<dyn AuditSink>,
}

impl Backends {
    pub fn postgres(db: Database) -> Self {
        let db = Arc::new(db);
        Self {
            tables: db.clone(),
            cases: db.clone(),
            store: db.clone(),
            audit: db,
        }
    }

    pub fn in_memory(backend: InMemoryBackend) -> Self {
        let backend = Arc::new(backend);
        Self {
            tables: backend.clone(),
            cases: backend.clone(),
            store: backend.clone(),
            audit: backend,
        }
    }
}
