//! Store facade
//!
//! [`TagStore`] is the entry point for callers. Constructing one runs the
//! pending migrations first, so every handle it gives out works against an
//! up-to-date schema.

use std::sync::Arc;

use tracing::info;

use crate::config::StoreConfig;
use crate::migrate::{MigrationReport, MigrationRunner};
use crate::query::SearchQueryEngine;
use crate::repository::DocumentRepository;
use crate::storage::StorageBackend;
use crate::tags::TagIndex;
use crate::Result;

/// A migrated document store
#[derive(Clone)]
pub struct TagStore {
    backend: Arc<dyn StorageBackend>,
    documents: DocumentRepository,
    search: SearchQueryEngine,
}

impl TagStore {
    /// Migrate `backend` and wrap it
    pub async fn open(backend: Arc<dyn StorageBackend>) -> Result<Self> {
        let report = MigrationRunner::new(Arc::clone(&backend)).run().await?;
        Ok(Self::assemble(backend, &report))
    }

    /// Connect to the configured backend, then [`TagStore::open`] it
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let backend = config.backend.connect().await?;
        Self::open(backend).await
    }

    fn assemble(backend: Arc<dyn StorageBackend>, report: &MigrationReport) -> Self {
        if !report.is_noop() {
            info!(
                "Opened {} store after applying {} migrations",
                backend.name(),
                report.applied.len()
            );
        }
        Self {
            documents: DocumentRepository::new(Arc::clone(&backend)),
            search: SearchQueryEngine::new(Arc::clone(&backend)),
            backend,
        }
    }

    pub fn documents(&self) -> &DocumentRepository {
        &self.documents
    }

    pub fn search(&self) -> &SearchQueryEngine {
        &self.search
    }

    pub fn tags(&self) -> &TagIndex {
        self.documents.tags()
    }

    /// A runner over the built-in migrations, for status and revert
    pub fn migrations(&self) -> MigrationRunner {
        MigrationRunner::new(Arc::clone(&self.backend))
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }
}
