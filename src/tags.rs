//! Tag index - the many-to-many relation between documents and tags
//!
//! Writes are diffs: the current tag set is read, and only the rows that
//! differ from the desired set are inserted or deleted. Inserts use
//! `ON CONFLICT DO NOTHING` so concurrent identical writes are harmless.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::debug;

use crate::storage::{placeholders, StorageBackend, Transaction, Value};
use crate::{Error, Result};

/// Upper bound on values bound into a single `IN (...)` list
pub(crate) const BATCH_SIZE: usize = 500;

const INSERT_TAG_SQL: &str =
    "INSERT INTO tags (tag, document_id) VALUES (?, ?) ON CONFLICT (tag, document_id) DO NOTHING";

/// The delta applied by a tag write
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl TagDiff {
    /// `added = desired - current`, `removed = current - desired`
    pub fn compute(current: &BTreeSet<String>, desired: &BTreeSet<String>) -> Self {
        Self {
            added: desired.difference(current).cloned().collect(),
            removed: current.difference(desired).cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// De-duplicate tags and drop empty strings
pub fn normalize_tags<I, S>(tags: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tags.into_iter()
        .map(|t| t.as_ref().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Owner of the `tags` table
#[derive(Clone)]
pub struct TagIndex {
    backend: Arc<dyn StorageBackend>,
}

impl TagIndex {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Replace the tag set of an existing document.
    ///
    /// Fails with `NotFound` if no document has this id. An empty `tags`
    /// removes every tag.
    pub async fn set_tags<I, S>(&self, document_id: &str, tags: I) -> Result<TagDiff>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let desired = normalize_tags(tags);
        let mut tx = self.backend.begin().await?;

        // No-op write: takes the row lock so a concurrent delete either
        // finishes first or waits for this transaction.
        let locked = tx
            .execute(
                "UPDATE documents SET data = data WHERE id = ?",
                &[Value::from(document_id)],
            )
            .await?;
        if locked == 0 {
            tx.rollback().await?;
            return Err(Error::NotFound(document_id.to_string()));
        }

        let diff = Self::apply(tx.as_mut(), document_id, &desired).await?;
        tx.commit().await?;
        Ok(diff)
    }

    /// Apply a tag diff inside a caller-owned transaction
    pub(crate) async fn apply(
        tx: &mut dyn Transaction,
        document_id: &str,
        desired: &BTreeSet<String>,
    ) -> Result<TagDiff> {
        let rows = tx
            .query("SELECT tag FROM tags WHERE document_id = ?", &[Value::from(document_id)])
            .await?;
        let current = rows
            .iter()
            .map(|row| row.text(0).map(str::to_string))
            .collect::<Result<BTreeSet<String>>>()?;

        let diff = TagDiff::compute(&current, desired);
        if diff.is_empty() {
            return Ok(diff);
        }

        for tag in &diff.added {
            tx.execute(INSERT_TAG_SQL, &[Value::from(tag), Value::from(document_id)])
                .await?;
        }

        if desired.is_empty() {
            Self::remove_in(tx, document_id).await?;
        } else {
            for chunk in diff.removed.chunks(BATCH_SIZE) {
                let sql = format!(
                    "DELETE FROM tags WHERE document_id = ? AND tag IN ({})",
                    placeholders(chunk.len())
                );
                let mut params = vec![Value::from(document_id)];
                params.extend(chunk.iter().map(Value::from));
                tx.execute(&sql, &params).await?;
            }
        }

        debug!(
            "Tags for {}: +{} -{}",
            document_id,
            diff.added.len(),
            diff.removed.len()
        );
        Ok(diff)
    }

    /// Sorted tags of one document (empty if it has none or does not exist)
    pub async fn tags_for(&self, document_id: &str) -> Result<Vec<String>> {
        let rows = self
            .backend
            .query(
                "SELECT tag FROM tags WHERE document_id = ? ORDER BY tag",
                &[Value::from(document_id)],
            )
            .await?;
        rows.iter().map(|row| row.text(0).map(str::to_string)).collect()
    }

    /// Sorted tags for many documents, loaded in batches
    pub(crate) async fn tags_for_many(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, Vec<String>>> {
        let mut out: HashMap<String, Vec<String>> = HashMap::new();
        for chunk in ids.chunks(BATCH_SIZE) {
            let sql = format!(
                "SELECT document_id, tag FROM tags WHERE document_id IN ({}) \
                 ORDER BY document_id, tag",
                placeholders(chunk.len())
            );
            let params: Vec<Value> = chunk.iter().map(Value::from).collect();
            for row in self.backend.query(&sql, &params).await? {
                out.entry(row.text(0)?.to_string())
                    .or_default()
                    .push(row.text(1)?.to_string());
            }
        }
        Ok(out)
    }

    /// Distinct tag vocabulary across every tenant.
    ///
    /// Not tenant-scoped: callers exposing this to tenants should use
    /// [`TagIndex::tenant_tags`] instead.
    pub async fn all_tags(&self) -> Result<BTreeSet<String>> {
        let rows = self.backend.query("SELECT DISTINCT tag FROM tags", &[]).await?;
        rows.iter().map(|row| row.text(0).map(str::to_string)).collect()
    }

    /// Distinct tags used by documents of one tenant
    pub async fn tenant_tags(&self, tenant: &str) -> Result<BTreeSet<String>> {
        let rows = self
            .backend
            .query(
                "SELECT DISTINCT t.tag FROM tags t \
                 JOIN documents d ON d.id = t.document_id WHERE d.tenant = ?",
                &[Value::from(tenant)],
            )
            .await?;
        rows.iter().map(|row| row.text(0).map(str::to_string)).collect()
    }

    /// Delete every tag row of a document
    pub async fn remove_document(&self, document_id: &str) -> Result<u64> {
        self.backend
            .execute("DELETE FROM tags WHERE document_id = ?", &[Value::from(document_id)])
            .await
    }

    /// Same as [`TagIndex::remove_document`] inside a caller-owned transaction
    pub(crate) async fn remove_in(tx: &mut dyn Transaction, document_id: &str) -> Result<u64> {
        tx.execute("DELETE FROM tags WHERE document_id = ?", &[Value::from(document_id)])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::MigrationRunner;
    use crate::storage::SqliteBackend;
    use proptest::prelude::*;

    async fn setup() -> (Arc<dyn StorageBackend>, TagIndex) {
        let backend: Arc<dyn StorageBackend> = Arc::new(SqliteBackend::open_in_memory().unwrap());
        MigrationRunner::new(Arc::clone(&backend)).run().await.unwrap();
        let index = TagIndex::new(Arc::clone(&backend));
        (backend, index)
    }

    async fn insert_doc(backend: &Arc<dyn StorageBackend>, id: &str, tenant: &str) {
        backend
            .execute(
                "INSERT INTO documents (id, tenant, \"index\", data, created_at, updated_at) \
                 VALUES (?, ?, 'docs', '{}', 0, 0)",
                &[Value::from(id), Value::from(tenant)],
            )
            .await
            .unwrap();
    }

    #[test]
    fn test_diff_compute() {
        let current = normalize_tags(["a", "b", "c"]);
        let desired = normalize_tags(["b", "c", "d"]);
        let diff = TagDiff::compute(&current, &desired);
        assert_eq!(diff.added, vec!["d"]);
        assert_eq!(diff.removed, vec!["a"]);
    }

    #[test]
    fn test_normalize_dedupes_and_drops_empty() {
        let tags = normalize_tags(["x", "", "x", "y"]);
        assert_eq!(tags.into_iter().collect::<Vec<_>>(), vec!["x", "y"]);
    }

    #[tokio::test]
    async fn test_set_tags_applies_delta() {
        let (backend, index) = setup().await;
        insert_doc(&backend, "d1", "t1").await;

        let first = index.set_tags("d1", ["x", "y"]).await.unwrap();
        assert_eq!(first.added, vec!["x", "y"]);
        assert!(first.removed.is_empty());

        let second = index.set_tags("d1", ["y", "z"]).await.unwrap();
        assert_eq!(second.added, vec!["z"]);
        assert_eq!(second.removed, vec!["x"]);
        assert_eq!(index.tags_for("d1").await.unwrap(), vec!["y", "z"]);

        let unchanged = index.set_tags("d1", ["z", "y", "y"]).await.unwrap();
        assert!(unchanged.is_empty());
    }

    #[tokio::test]
    async fn test_empty_set_clears_tags() {
        let (backend, index) = setup().await;
        insert_doc(&backend, "d1", "t1").await;

        index.set_tags("d1", ["x", "y"]).await.unwrap();
        index.set_tags("d1", Vec::<String>::new()).await.unwrap();
        assert!(index.tags_for("d1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_tags_requires_document() {
        let (_backend, index) = setup().await;
        let err = index.set_tags("missing", ["x"]).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(ref id) if id == "missing"));
        assert!(index.all_tags().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_tags_on_deleted_document() {
        let (backend, index) = setup().await;
        insert_doc(&backend, "d1", "t1").await;
        backend
            .execute("DELETE FROM documents WHERE id = ?", &[Value::from("d1")])
            .await
            .unwrap();

        let err = index.set_tags("d1", ["x"]).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::NotFound);
        assert!(index.tags_for("d1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear_tag_set_past_variable_limit() {
        let (backend, index) = setup().await;
        insert_doc(&backend, "d1", "t1").await;

        // more tags than SQLite will bind in one statement
        let many: Vec<String> = (0..33_000).map(|i| format!("tag-{i:05}")).collect();
        index.set_tags("d1", &many).await.unwrap();

        let diff = index.set_tags("d1", Vec::<String>::new()).await.unwrap();
        assert_eq!(diff.removed.len(), many.len());
        assert!(index.tags_for("d1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shrink_tag_set_in_batches() {
        let (backend, index) = setup().await;
        insert_doc(&backend, "d1", "t1").await;

        let many: Vec<String> = (0..BATCH_SIZE * 3 + 7).map(|i| format!("t{i:04}")).collect();
        index.set_tags("d1", &many).await.unwrap();

        let diff = index.set_tags("d1", ["t0000", "kept"]).await.unwrap();
        assert_eq!(diff.added, vec!["kept"]);
        assert_eq!(diff.removed.len(), many.len() - 1);
        assert_eq!(index.tags_for("d1").await.unwrap(), vec!["kept", "t0000"]);
    }

    #[tokio::test]
    async fn test_duplicate_pair_insert_is_noop() {
        let (backend, _index) = setup().await;
        insert_doc(&backend, "d1", "t1").await;

        let params = [Value::from("x"), Value::from("d1")];
        assert_eq!(backend.execute(INSERT_TAG_SQL, &params).await.unwrap(), 1);
        assert_eq!(backend.execute(INSERT_TAG_SQL, &params).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_vocabulary_global_and_scoped() {
        let (backend, index) = setup().await;
        insert_doc(&backend, "a1", "tenant-a").await;
        insert_doc(&backend, "b1", "tenant-b").await;
        index.set_tags("a1", ["shared", "only-a"]).await.unwrap();
        index.set_tags("b1", ["shared", "only-b"]).await.unwrap();

        let all: Vec<String> = index.all_tags().await.unwrap().into_iter().collect();
        assert_eq!(all, vec!["only-a", "only-b", "shared"]);

        let scoped: Vec<String> =
            index.tenant_tags("tenant-a").await.unwrap().into_iter().collect();
        assert_eq!(scoped, vec!["only-a", "shared"]);
    }

    #[tokio::test]
    async fn test_remove_document() {
        let (backend, index) = setup().await;
        insert_doc(&backend, "d1", "t1").await;
        insert_doc(&backend, "d2", "t1").await;
        index.set_tags("d1", ["x", "y"]).await.unwrap();
        index.set_tags("d2", ["x"]).await.unwrap();

        assert_eq!(index.remove_document("d1").await.unwrap(), 2);
        assert!(index.tags_for("d1").await.unwrap().is_empty());
        assert_eq!(index.tags_for("d2").await.unwrap(), vec!["x"]);
    }

    #[tokio::test]
    async fn test_tags_for_many_groups_by_document() {
        let (backend, index) = setup().await;
        insert_doc(&backend, "d1", "t1").await;
        insert_doc(&backend, "d2", "t1").await;
        index.set_tags("d1", ["b", "a"]).await.unwrap();

        let ids = vec!["d1".to_string(), "d2".to_string()];
        let map = index.tags_for_many(&ids).await.unwrap();
        assert_eq!(map.get("d1").unwrap(), &vec!["a".to_string(), "b".to_string()]);
        assert!(map.get("d2").is_none());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_set_tags_converges(
            start in prop::collection::btree_set("[a-f]", 0..6),
            desired in prop::collection::btree_set("[a-f]", 0..6),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            let stored = rt.block_on(async {
                let (backend, index) = setup().await;
                insert_doc(&backend, "d1", "t1").await;
                index.set_tags("d1", &start).await.unwrap();
                index.set_tags("d1", &desired).await.unwrap();
                index.tags_for("d1").await.unwrap()
            });
            prop_assert_eq!(stored, desired.into_iter().collect::<Vec<_>>());
        }

        #[test]
        fn prop_diff_reconstructs_desired(
            current in prop::collection::btree_set("[a-f]", 0..6),
            desired in prop::collection::btree_set("[a-f]", 0..6),
        ) {
            let diff = TagDiff::compute(&current, &desired);
            let mut result = current.clone();
            for tag in &diff.removed {
                prop_assert!(result.remove(tag));
            }
            for tag in &diff.added {
                prop_assert!(result.insert(tag.clone()));
            }
            prop_assert_eq!(result, desired);
        }
    }
}
