//! Search query engine
//!
//! Results are ordered by `updated_at` descending with `id` ascending as the
//! tie-break, so equal timestamps still give a deterministic order. There is
//! no cursor: a call returns one finite batch.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use super::builder::DocumentQuery;
use crate::document::Document;
use crate::storage::StorageBackend;
use crate::tags::{TagIndex, BATCH_SIZE};
use crate::Result;

/// Read-side composition of the repository and tag index primitives
#[derive(Clone)]
pub struct SearchQueryEngine {
    backend: Arc<dyn StorageBackend>,
    tags: TagIndex,
}

impl SearchQueryEngine {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        let tags = TagIndex::new(Arc::clone(&backend));
        Self { backend, tags }
    }

    /// Documents of a tenant, optionally within one index
    pub async fn list(
        &self,
        tenant: &str,
        index: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<Document>> {
        let mut query = DocumentQuery::tenant(tenant);
        if let Some(index) = index {
            query = query.index(index);
        }
        if let Some(limit) = limit {
            query = query.limit(limit);
        }
        self.run(&query).await
    }

    /// Documents carrying every tag in `tags`.
    ///
    /// An empty `tags` returns no documents.
    pub async fn search_by_tags<S: AsRef<str>>(
        &self,
        tenant: &str,
        tags: &[S],
        index: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<Document>> {
        let mut query = DocumentQuery::tenant(tenant).tags(tags);
        if let Some(index) = index {
            query = query.index(index);
        }
        if let Some(limit) = limit {
            query = query.limit(limit);
        }
        self.run(&query).await
    }

    /// Execute a prepared query
    pub async fn run(&self, query: &DocumentQuery) -> Result<Vec<Document>> {
        let mut documents = match query.split_tags(BATCH_SIZE) {
            Some(parts) => self.intersect(parts, query.max_results()).await?,
            None => self.fetch(query).await?,
        };
        if documents.is_empty() {
            return Ok(documents);
        }

        let ids: Vec<String> = documents.iter().map(|d| d.id.clone()).collect();
        let mut tags = self.tags.tags_for_many(&ids).await?;
        for doc in &mut documents {
            doc.tags = tags.remove(&doc.id).unwrap_or_default();
        }

        debug!(
            "Query for tenant {} returned {} documents",
            query.tenant_name(),
            documents.len()
        );
        Ok(documents)
    }

    /// Matching rows without their tags
    async fn fetch(&self, query: &DocumentQuery) -> Result<Vec<Document>> {
        let Some(compiled) = query.build() else {
            debug!("Query for tenant {} matches nothing", query.tenant_name());
            return Ok(Vec::new());
        };
        let rows = self.backend.query(&compiled.sql, &compiled.params).await?;
        rows.iter().map(Document::from_row).collect()
    }

    /// Documents matching every part, in the order of the first part
    async fn intersect(
        &self,
        parts: Vec<DocumentQuery>,
        limit: Option<usize>,
    ) -> Result<Vec<Document>> {
        debug!("Splitting tag search into {} parts", parts.len());
        let mut parts = parts.into_iter();
        let Some(first) = parts.next() else {
            return Ok(Vec::new());
        };

        let mut documents = self.fetch(&first).await?;
        for part in parts {
            if documents.is_empty() {
                break;
            }
            let matched: HashSet<String> =
                self.fetch(&part).await?.into_iter().map(|d| d.id).collect();
            documents.retain(|d| matched.contains(&d.id));
        }

        if let Some(limit) = limit {
            documents.truncate(limit);
        }
        Ok(documents)
    }
}
