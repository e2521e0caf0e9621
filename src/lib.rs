//! # Tagstore - Multi-tenant tagged document store
//!
//! Tagstore persists JSON documents addressed by `(tenant, index, id)` and
//! lets callers find them again by tag set.
//!
//! Tagstore provides:
//! - Atomic create-or-update of documents and their tag sets
//! - AND-intersection search over tags, scoped to one tenant
//! - Interchangeable SQLite and PostgreSQL backends behind one trait
//! - An ordered, idempotent migration runner with a persisted ledger

pub mod config;
pub mod document;
pub mod migrate;
pub mod query;
pub mod repository;
pub mod storage;
pub mod store;
pub mod tags;
pub mod ui;

// Re-exports for convenient access
pub use config::{BackendConfig, StoreConfig};
pub use document::{Document, NewDocument};
pub use migrate::{Migration, MigrationReport, MigrationRunner, SqlMigration};
pub use query::{DocumentQuery, SearchQueryEngine};
pub use repository::DocumentRepository;
pub use storage::{SqliteBackend, StorageBackend};
pub use store::TagStore;
pub use tags::{TagDiff, TagIndex};

/// Result type alias for Tagstore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Tagstore operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[cfg(feature = "postgres")]
    #[error("Storage error: {0}")]
    Postgres(#[from] sqlx::Error),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Migration {name} failed: {source}")]
    Migration {
        name: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse error classes callers can branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Storage,
    Migration,
    Config,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Storage => "storage",
            ErrorKind::Migration => "migration",
            ErrorKind::Config => "config",
        }
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::Migration { .. } => ErrorKind::Migration,
            Error::Config(_) => ErrorKind::Config,
            Error::Sqlite(_) | Error::Decode(_) | Error::Serialization(_) | Error::Io(_) => {
                ErrorKind::Storage
            }
            #[cfg(feature = "postgres")]
            Error::Postgres(_) => ErrorKind::Storage,
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Error::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::NotFound("d1".into()).kind(), ErrorKind::NotFound);
        assert_eq!(Error::Conflict("d1".into()).kind(), ErrorKind::Conflict);
        assert_eq!(Error::Decode("bad".into()).kind(), ErrorKind::Storage);
        assert_eq!(Error::Config("bad".into()).kind(), ErrorKind::Config);

        let err = Error::Migration {
            name: "m1".into(),
            source: Box::new(Error::Decode("bad".into())),
        };
        assert_eq!(err.kind(), ErrorKind::Migration);
        assert_eq!(err.to_string(), "Migration m1 failed: Decode error: bad");
    }

    #[test]
    fn test_toml_error_is_config() {
        let err: Error = toml::from_str::<StoreConfig>("backend = 3").unwrap_err().into();
        assert_eq!(err.kind(), ErrorKind::Config);
    }
}
