//! Document repository - CRUD and upsert keyed by document id
//!
//! `id` is globally unique; `tenant` and `index` are fixed at creation. An
//! upsert that reuses an id under another tenant or index is a conflict.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::document::{decode_timestamp, encode_timestamp, Document, NewDocument};
use crate::storage::{schema, StorageBackend, Transaction, Value};
use crate::tags::{normalize_tags, TagIndex};
use crate::{Error, Result};

const UPSERT_SQL: &str = r#"
INSERT INTO documents (id, tenant, "index", data, created_at, updated_at)
VALUES (?, ?, ?, ?, ?, ?)
ON CONFLICT (id) DO UPDATE SET
    data = excluded.data,
    updated_at = CASE
        WHEN excluded.updated_at > documents.updated_at THEN excluded.updated_at
        ELSE documents.updated_at
    END
WHERE documents.tenant = excluded.tenant AND documents."index" = excluded."index"
"#;

/// Owner of the `documents` table
#[derive(Clone)]
pub struct DocumentRepository {
    backend: Arc<dyn StorageBackend>,
    tags: TagIndex,
}

impl DocumentRepository {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        let tags = TagIndex::new(Arc::clone(&backend));
        Self { backend, tags }
    }

    /// Look up a document by id, with its tags
    pub async fn get(&self, id: &str) -> Result<Option<Document>> {
        let sql = format!("SELECT {} FROM documents d WHERE d.id = ?", schema::DOCUMENT_COLUMNS);
        let rows = self.backend.query(&sql, &[Value::from(id)]).await?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };

        let mut doc = Document::from_row(row)?;
        doc.tags = self.tags.tags_for(id).await?;
        Ok(Some(doc))
    }

    /// Like [`DocumentRepository::get`] but a missing id is an error
    pub async fn fetch(&self, id: &str) -> Result<Document> {
        self.get(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Create the document if absent, otherwise replace its payload and tags.
    ///
    /// The existence check, the row write and the tag diff run in one
    /// transaction. `created_at` is kept from the first write; `updated_at`
    /// never moves backwards even if the wall clock does.
    pub async fn upsert(&self, input: NewDocument) -> Result<Document> {
        let desired = normalize_tags(&input.tags);
        let payload = serde_json::to_string(&input.data)?;

        let mut tx = self.backend.begin().await?;

        let existing = Self::load_timestamps(tx.as_mut(), &input.id).await?;
        let mut now = encode_timestamp(Utc::now());
        if let Some(current) = &existing {
            if current.tenant != input.tenant || current.index != input.index {
                tx.rollback().await?;
                warn!(
                    "Rejected upsert of {} into {}/{}: owned by {}/{}",
                    input.id, input.tenant, input.index, current.tenant, current.index
                );
                return Err(Error::Conflict(format!(
                    "document {} belongs to {}/{}",
                    input.id, current.tenant, current.index
                )));
            }
            now = now.max(current.updated_at);
        }

        let written = tx
            .execute(
                UPSERT_SQL,
                &[
                    Value::from(&input.id),
                    Value::from(&input.tenant),
                    Value::from(&input.index),
                    Value::Text(payload),
                    Value::Integer(now),
                    Value::Integer(now),
                ],
            )
            .await?;
        if written == 0 {
            // Another writer created the id under a different tenant/index
            // between our read and our write.
            tx.rollback().await?;
            return Err(Error::Conflict(format!(
                "document {} was created concurrently under another tenant or index",
                input.id
            )));
        }

        let stored = Self::load_timestamps(tx.as_mut(), &input.id)
            .await?
            .ok_or_else(|| Error::NotFound(input.id.clone()))?;
        let diff = TagIndex::apply(tx.as_mut(), &input.id, &desired).await?;
        tx.commit().await?;

        debug!(
            "Upserted {} in {}/{} ({}, tags +{} -{})",
            input.id,
            input.tenant,
            input.index,
            if existing.is_some() { "updated" } else { "created" },
            diff.added.len(),
            diff.removed.len()
        );

        Ok(Document {
            id: input.id,
            tenant: input.tenant,
            index: input.index,
            data: input.data,
            tags: desired.into_iter().collect(),
            created_at: decode_timestamp(stored.created_at)?,
            updated_at: decode_timestamp(stored.updated_at)?,
        })
    }

    /// Delete a document and all its tag rows.
    ///
    /// Returns whether a document was removed; deleting an unknown id is not
    /// an error.
    ///
    /// The document row goes first so the delete holds its row lock before
    /// touching tags. A concurrent upsert or `set_tags` then either commits
    /// before us, and its tags are swept here, or waits and finds no row.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let mut tx = self.backend.begin().await?;
        let removed = tx
            .execute("DELETE FROM documents WHERE id = ?", &[Value::from(id)])
            .await?;
        let tag_rows = TagIndex::remove_in(tx.as_mut(), id).await?;
        tx.commit().await?;

        if removed > 0 {
            info!("Deleted document {} ({} tag rows)", id, tag_rows);
        }
        Ok(removed > 0)
    }

    /// Number of documents in a tenant, optionally restricted to one index
    pub async fn count(&self, tenant: &str, index: Option<&str>) -> Result<u64> {
        let rows = match index {
            Some(index) => {
                self.backend
                    .query(
                        "SELECT COUNT(*) FROM documents WHERE tenant = ? AND \"index\" = ?",
                        &[Value::from(tenant), Value::from(index)],
                    )
                    .await?
            }
            None => {
                self.backend
                    .query(
                        "SELECT COUNT(*) FROM documents WHERE tenant = ?",
                        &[Value::from(tenant)],
                    )
                    .await?
            }
        };
        let count = rows.first().map(|row| row.integer(0)).transpose()?.unwrap_or(0);
        Ok(count.max(0) as u64)
    }

    /// The tag index this repository writes through
    pub fn tags(&self) -> &TagIndex {
        &self.tags
    }

    async fn load_timestamps(tx: &mut dyn Transaction, id: &str) -> Result<Option<StoredKey>> {
        let rows = tx
            .query(
                "SELECT tenant, \"index\", created_at, updated_at FROM documents WHERE id = ?",
                &[Value::from(id)],
            )
            .await?;
        rows.first()
            .map(|row| {
                Ok(StoredKey {
                    tenant: row.text(0)?.to_string(),
                    index: row.text(1)?.to_string(),
                    created_at: row.integer(2)?,
                    updated_at: row.integer(3)?,
                })
            })
            .transpose()
    }
}

/// Identity and timestamps of a persisted row
struct StoredKey {
    tenant: String,
    index: String,
    created_at: i64,
    updated_at: i64,
}
