//! Document query builder
//!
//! Filters are collected as optional fields and turned into SQL in one
//! [`DocumentQuery::build`] step.

use crate::storage::{placeholders, schema, Value};
use crate::tags::normalize_tags;

/// A tenant-scoped document query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentQuery {
    tenant: String,
    index: Option<String>,
    tags: Option<Vec<String>>,
    limit: Option<usize>,
}

/// SQL plus bound parameters, ready for a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

impl DocumentQuery {
    /// All documents of `tenant`, newest first
    pub fn tenant(tenant: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            ..Self::default()
        }
    }

    /// Restrict to one index within the tenant
    pub fn index(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }

    /// Keep only documents carrying every one of `tags`.
    ///
    /// Duplicates are ignored. An empty list matches nothing.
    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.tags = Some(normalize_tags(tags).into_iter().collect());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn tenant_name(&self) -> &str {
        &self.tenant
    }

    pub(crate) fn max_results(&self) -> Option<usize> {
        self.limit
    }

    /// Split a tag filter longer than `max` into unlimited sub-queries of at
    /// most `max` tags each.
    ///
    /// A document matches the original query iff it matches every part.
    /// `None` means the query already binds few enough tags.
    pub(crate) fn split_tags(&self, max: usize) -> Option<Vec<DocumentQuery>> {
        let tags = self.tags.as_ref()?;
        if tags.len() <= max || self.limit == Some(0) {
            return None;
        }
        let parts = tags
            .chunks(max.max(1))
            .map(|chunk| DocumentQuery {
                tenant: self.tenant.clone(),
                index: self.index.clone(),
                tags: Some(chunk.to_vec()),
                limit: None,
            })
            .collect();
        Some(parts)
    }

    /// Compile to SQL, or `None` when the query can match nothing
    pub fn build(&self) -> Option<CompiledQuery> {
        if self.limit == Some(0) {
            return None;
        }
        if matches!(&self.tags, Some(tags) if tags.is_empty()) {
            return None;
        }

        let mut sql = format!("SELECT {} FROM documents d", schema::DOCUMENT_COLUMNS);
        let mut params = vec![Value::from(&self.tenant)];

        if self.tags.is_some() {
            sql.push_str(" JOIN tags t ON t.document_id = d.id");
        }
        sql.push_str(" WHERE d.tenant = ?");

        if let Some(index) = &self.index {
            sql.push_str(" AND d.\"index\" = ?");
            params.push(Value::from(index));
        }

        if let Some(tags) = &self.tags {
            sql.push_str(&format!(" AND t.tag IN ({})", placeholders(tags.len())));
            params.extend(tags.iter().map(Value::from));
            sql.push_str(&format!(
                " GROUP BY {} HAVING COUNT(DISTINCT t.tag) = ?",
                schema::DOCUMENT_COLUMNS
            ));
            params.push(Value::Integer(tags.len() as i64));
        }

        sql.push_str(" ORDER BY d.updated_at DESC, d.id ASC");

        if let Some(limit) = self.limit {
            sql.push_str(" LIMIT ?");
            params.push(Value::Integer(limit as i64));
        }

        Some(CompiledQuery { sql, params })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_only() {
        let compiled = DocumentQuery::tenant("t1").build().unwrap();
        assert!(compiled.sql.contains("WHERE d.tenant = ?"));
        assert!(!compiled.sql.contains("JOIN tags"));
        assert!(!compiled.sql.contains("LIMIT"));
        assert!(compiled.sql.ends_with("ORDER BY d.updated_at DESC, d.id ASC"));
        assert_eq!(compiled.params, vec![Value::from("t1")]);
    }

    #[test]
    fn test_all_filters() {
        let compiled = DocumentQuery::tenant("t1")
            .index("docs")
            .tags(["b", "a", "b"])
            .limit(5)
            .build()
            .unwrap();

        assert!(compiled.sql.contains("JOIN tags t ON t.document_id = d.id"));
        assert!(compiled.sql.contains("t.tag IN (?, ?)"));
        assert!(compiled.sql.contains("HAVING COUNT(DISTINCT t.tag) = ?"));
        assert_eq!(
            compiled.params,
            vec![
                Value::from("t1"),
                Value::from("docs"),
                Value::from("a"),
                Value::from("b"),
                Value::Integer(2),
                Value::Integer(5),
            ]
        );
        assert_eq!(compiled.sql.matches('?').count(), compiled.params.len());
    }

    #[test]
    fn test_empty_tags_match_nothing() {
        assert!(DocumentQuery::tenant("t1").tags(Vec::<String>::new()).build().is_none());
    }

    #[test]
    fn test_split_long_tag_filter() {
        let tags: Vec<String> = (0..7).map(|i| format!("tag{i}")).collect();
        let query = DocumentQuery::tenant("t1").index("docs").tags(&tags).limit(3);

        assert!(query.split_tags(7).is_none());
        assert!(DocumentQuery::tenant("t1").split_tags(1).is_none());

        let parts = query.split_tags(3).unwrap();
        assert_eq!(parts.len(), 3);
        for part in &parts {
            let compiled = part.build().unwrap();
            assert!(!compiled.sql.contains("LIMIT"));
            assert_eq!(compiled.params[1], Value::from("docs"));
        }
        let rejoined: Vec<String> = parts.iter().flat_map(|p| p.tags.clone().unwrap()).collect();
        assert_eq!(rejoined, tags);
    }

    #[test]
    fn test_zero_limit_matches_nothing() {
        assert!(DocumentQuery::tenant("t1").limit(0).build().is_none());
    }
}
