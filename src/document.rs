//! Document types
//!
//! A document is an opaque JSON payload addressed by a caller-supplied `id`
//! and scoped to a `tenant` and an `index` (a named sub-collection within
//! the tenant). Tags are stored separately by [`crate::tags::TagIndex`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::Row;
use crate::{Error, Result};

/// A stored document together with its tag set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Globally unique identifier
    pub id: String,
    /// Isolation boundary
    pub tenant: String,
    /// Sub-collection within the tenant
    pub index: String,
    /// Caller payload, opaque to the store
    pub data: serde_json::Value,
    /// Sorted, de-duplicated tags
    pub tags: Vec<String>,
    /// Set once at first insertion
    pub created_at: DateTime<Utc>,
    /// Refreshed on every successful write
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Whether the document carries every tag in `tags`
    pub fn has_all_tags<S: AsRef<str>>(&self, tags: &[S]) -> bool {
        tags.iter()
            .all(|t| self.tags.iter().any(|own| own == t.as_ref()))
    }

    /// Decode a row selected with [`crate::storage::schema::DOCUMENT_COLUMNS`].
    /// Tags are filled in separately.
    pub(crate) fn from_row(row: &Row) -> Result<Self> {
        let data: serde_json::Value = serde_json::from_str(row.text(3)?)?;
        Ok(Self {
            id: row.text(0)?.to_string(),
            tenant: row.text(1)?.to_string(),
            index: row.text(2)?.to_string(),
            data,
            tags: Vec::new(),
            created_at: decode_timestamp(row.integer(4)?)?,
            updated_at: decode_timestamp(row.integer(5)?)?,
        })
    }
}

/// Input shape for an upsert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDocument {
    pub id: String,
    pub tenant: String,
    pub index: String,
    pub data: serde_json::Value,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl NewDocument {
    pub fn new(
        tenant: impl Into<String>,
        index: impl Into<String>,
        id: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            tenant: tenant.into(),
            index: index.into(),
            data,
            tags: Vec::new(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// Timestamps are persisted as microseconds since the Unix epoch
pub(crate) fn encode_timestamp(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

pub(crate) fn decode_timestamp(micros: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_micros(micros)
        .ok_or_else(|| Error::Decode(format!("timestamp out of range: {micros}")))
}
