//! Schema migrations
//!
//! Migrations are applied in name order and recorded in the `migrations`
//! ledger table. Each migration's `apply` and its ledger row are committed in
//! one transaction; a failure stops the run and leaves every earlier
//! migration recorded.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::document::{decode_timestamp, encode_timestamp};
use crate::storage::{schema, StorageBackend, Transaction, Value};
use crate::{Error, Result};

/// A named schema change.
///
/// Names are opaque but must sort in application order; the built-in
/// migrations use a `YYYYMMDDHHMMSS_` prefix.
#[async_trait]
pub trait Migration: Send + Sync {
    fn name(&self) -> &str;

    async fn apply(&self, tx: &mut dyn Transaction) -> Result<()>;

    async fn revert(&self, _tx: &mut dyn Transaction) -> Result<()> {
        Ok(())
    }
}

/// Migration made of plain SQL statements
#[derive(Debug, Clone)]
pub struct SqlMigration {
    name: String,
    up: Vec<String>,
    down: Vec<String>,
}

impl SqlMigration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            up: Vec::new(),
            down: Vec::new(),
        }
    }

    pub fn up<I, S>(mut self, statements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.up.extend(statements.into_iter().map(Into::into));
        self
    }

    pub fn down<I, S>(mut self, statements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.down.extend(statements.into_iter().map(Into::into));
        self
    }
}

#[async_trait]
impl Migration for SqlMigration {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, tx: &mut dyn Transaction) -> Result<()> {
        for stmt in &self.up {
            tx.execute(stmt, &[]).await?;
        }
        Ok(())
    }

    async fn revert(&self, tx: &mut dyn Transaction) -> Result<()> {
        for stmt in &self.down {
            tx.execute(stmt, &[]).await?;
        }
        Ok(())
    }
}

/// The schema this crate needs
pub fn builtin_migrations() -> Vec<Arc<dyn Migration>> {
    let documents: Arc<dyn Migration> = Arc::new(
        SqlMigration::new("20240101000000_create_documents")
            .up(schema::documents_statements())
            .down([schema::DROP_DOCUMENTS_TABLE]),
    );
    let tags: Arc<dyn Migration> = Arc::new(
        SqlMigration::new("20240101000100_create_tags")
            .up(schema::tags_statements())
            .down([schema::DROP_TAGS_TABLE]),
    );
    vec![documents, tags]
}

/// A row of the migration ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedMigration {
    pub name: String,
    pub applied_at: DateTime<Utc>,
}

/// Outcome of [`MigrationRunner::run`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Migrations applied by this run, in order
    pub applied: Vec<String>,
    /// Migrations that were already recorded
    pub skipped: usize,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

/// Applies pending migrations against a backend
pub struct MigrationRunner {
    backend: Arc<dyn StorageBackend>,
    migrations: Vec<Arc<dyn Migration>>,
}

impl MigrationRunner {
    /// Runner over the built-in migrations
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        let mut migrations = builtin_migrations();
        migrations.sort_by(|a, b| a.name().cmp(b.name()));
        Self { backend, migrations }
    }

    /// Runner over a custom migration list, sorted by name
    pub fn with_migrations(
        backend: Arc<dyn StorageBackend>,
        mut migrations: Vec<Arc<dyn Migration>>,
    ) -> Result<Self> {
        migrations.sort_by(|a, b| a.name().cmp(b.name()));
        if let Some(dup) = migrations.windows(2).find(|w| w[0].name() == w[1].name()) {
            let name = dup[0].name().to_string();
            return Err(Error::Migration {
                source: Box::new(Error::Config(format!("duplicate migration name {name}"))),
                name,
            });
        }
        Ok(Self { backend, migrations })
    }

    /// Names of all known migrations in application order
    pub fn names(&self) -> Vec<&str> {
        self.migrations.iter().map(|m| m.name()).collect()
    }

    async fn ensure_ledger(&self) -> Result<()> {
        self.backend.execute(schema::CREATE_MIGRATIONS_TABLE, &[]).await?;
        Ok(())
    }

    /// Ledger contents, oldest name first
    pub async fn applied(&self) -> Result<Vec<AppliedMigration>> {
        self.ensure_ledger().await?;
        let rows = self
            .backend
            .query("SELECT name, applied_at FROM migrations ORDER BY name", &[])
            .await?;
        rows.iter()
            .map(|row| {
                Ok(AppliedMigration {
                    name: row.text(0)?.to_string(),
                    applied_at: decode_timestamp(row.integer(1)?)?,
                })
            })
            .collect()
    }

    /// Known migrations not yet in the ledger
    pub async fn pending(&self) -> Result<Vec<String>> {
        let applied: HashSet<String> = self.applied().await?.into_iter().map(|m| m.name).collect();
        Ok(self
            .migrations
            .iter()
            .filter(|m| !applied.contains(m.name()))
            .map(|m| m.name().to_string())
            .collect())
    }

    /// Apply every pending migration in order
    pub async fn run(&self) -> Result<MigrationReport> {
        let applied: HashSet<String> = self.applied().await?.into_iter().map(|m| m.name).collect();
        let mut report = MigrationReport::default();

        for migration in &self.migrations {
            let name = migration.name();
            if applied.contains(name) {
                report.skipped += 1;
                continue;
            }

            debug!("Applying migration {} on {}", name, self.backend.name());
            match self.apply_one(migration.as_ref()).await {
                Ok(true) => {
                    info!("Applied migration {}", name);
                    report.applied.push(name.to_string());
                }
                Ok(false) => {
                    warn!("Migration {} was recorded concurrently, skipping", name);
                    report.skipped += 1;
                }
                Err(e) => {
                    return Err(Error::Migration {
                        name: name.to_string(),
                        source: Box::new(e),
                    });
                }
            }
        }

        Ok(report)
    }

    /// Returns `false` if another process recorded the migration first
    async fn apply_one(&self, migration: &dyn Migration) -> Result<bool> {
        let mut tx = self.backend.begin().await?;
        migration.apply(tx.as_mut()).await?;

        let recorded = tx
            .execute(
                "INSERT INTO migrations (name, applied_at) VALUES (?, ?)",
                &[
                    Value::from(migration.name()),
                    Value::Integer(encode_timestamp(Utc::now())),
                ],
            )
            .await;
        match recorded {
            Ok(_) => {
                tx.commit().await?;
                Ok(true)
            }
            Err(Error::Conflict(_)) => {
                tx.rollback().await?;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Revert the newest recorded migration and remove its ledger row
    pub async fn revert_last(&self) -> Result<Option<String>> {
        let Some(last) = self.applied().await?.pop() else {
            return Ok(None);
        };
        let migration = self
            .migrations
            .iter()
            .find(|m| m.name() == last.name)
            .ok_or_else(|| Error::Migration {
                name: last.name.clone(),
                source: Box::new(Error::Config("recorded migration is unknown".to_string())),
            })?;

        let wrap = |e: Error| Error::Migration {
            name: last.name.clone(),
            source: Box::new(e),
        };
        let mut tx = self.backend.begin().await.map_err(wrap)?;
        migration.revert(tx.as_mut()).await.map_err(wrap)?;
        tx.execute("DELETE FROM migrations WHERE name = ?", &[Value::from(&last.name)])
            .await
            .map_err(wrap)?;
        tx.commit().await.map_err(wrap)?;

        info!("Reverted migration {}", last.name);
        Ok(Some(last.name))
    }
}
