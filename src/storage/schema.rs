//! Database schema definitions
//!
//! Only the portable subset shared by SQLite and PostgreSQL is used here:
//! `TEXT`/`BIGINT` columns, `IF [NOT] EXISTS` DDL and `DESC` index keys.
//! `"index"` is a reserved word in both engines and is always quoted.

/// SQL to create the migration ledger
pub const CREATE_MIGRATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS migrations (
    name TEXT NOT NULL PRIMARY KEY,
    applied_at BIGINT NOT NULL
)
"#;

/// SQL to create the documents table
///
/// Timestamps are microseconds since the Unix epoch.
pub const CREATE_DOCUMENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    id TEXT NOT NULL,
    tenant TEXT NOT NULL,
    "index" TEXT NOT NULL,
    data TEXT NOT NULL,
    created_at BIGINT NOT NULL,
    updated_at BIGINT NOT NULL
)
"#;

/// Indexes backing id lookup and recency listing
pub const CREATE_DOCUMENT_INDEXES: &[&str] = &[
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_documents_id ON documents(id)",
    "CREATE INDEX IF NOT EXISTS idx_documents_key ON documents(tenant, \"index\", id)",
    "CREATE INDEX IF NOT EXISTS idx_documents_tenant_recent \
     ON documents(tenant, updated_at DESC, id)",
    "CREATE INDEX IF NOT EXISTS idx_documents_index_recent \
     ON documents(tenant, \"index\", updated_at DESC, id)",
];

pub const DROP_DOCUMENTS_TABLE: &str = "DROP TABLE IF EXISTS documents";

/// SQL to create the tag association table
pub const CREATE_TAGS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS tags (
    tag TEXT NOT NULL,
    document_id TEXT NOT NULL
)
"#;

/// The unique pair index makes tag insertion idempotent
pub const CREATE_TAG_INDEXES: &[&str] = &[
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_tags_pair ON tags(tag, document_id)",
    "CREATE INDEX IF NOT EXISTS idx_tags_document ON tags(document_id)",
];

pub const DROP_TAGS_TABLE: &str = "DROP TABLE IF EXISTS tags";

/// Column list shared by every document read
pub const DOCUMENT_COLUMNS: &str =
    "d.id, d.tenant, d.\"index\", d.data, d.created_at, d.updated_at";

/// Statements for the documents migration
pub fn documents_statements() -> Vec<&'static str> {
    let mut stmts = vec![CREATE_DOCUMENTS_TABLE];
    stmts.extend(CREATE_DOCUMENT_INDEXES.iter().copied());
    stmts
}

/// Statements for the tags migration
pub fn tags_statements() -> Vec<&'static str> {
    let mut stmts = vec![CREATE_TAGS_TABLE];
    stmts.extend(CREATE_TAG_INDEXES.iter().copied());
    stmts
}
