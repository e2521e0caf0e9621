use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::storage::{SqliteBackend, StorageBackend};
use crate::{Error, Result};

#[cfg(feature = "postgres")]
use crate::storage::{PostgresBackend, PostgresConfig};

/// Environment variable overriding the SQLite database path
pub const DATABASE_ENV: &str = "TAGSTORE_DATABASE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: BackendConfig,
}

/// Which engine to open, and how
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    Sqlite {
        #[serde(default = "default_database_path")]
        path: PathBuf,
    },
    #[cfg(feature = "postgres")]
    Postgres(PostgresConfig),
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Sqlite {
            path: default_database_path(),
        }
    }
}

impl BackendConfig {
    /// Open the configured backend. The schema is not migrated here.
    pub async fn connect(&self) -> Result<Arc<dyn StorageBackend>> {
        match self {
            BackendConfig::Sqlite { path } => Ok(Arc::new(SqliteBackend::open(path)?)),
            #[cfg(feature = "postgres")]
            BackendConfig::Postgres(config) => {
                Ok(Arc::new(PostgresBackend::connect(config).await?))
            }
        }
    }

    /// Human-readable location, with any password masked
    pub fn describe(&self) -> String {
        match self {
            BackendConfig::Sqlite { path } => format!("sqlite:{}", path.display()),
            #[cfg(feature = "postgres")]
            BackendConfig::Postgres(config) => mask_password(&config.url),
        }
    }
}

#[cfg(feature = "postgres")]
fn mask_password(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((userinfo, host)) = rest.rsplit_once('@') else {
        return url.to_string();
    };
    match userinfo.split_once(':') {
        Some((user, _)) => format!("{scheme}://{user}:***@{host}"),
        None => url.to_string(),
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("tagstore.toml")
}

pub fn default_database_path() -> PathBuf {
    PathBuf::from(".tagstore").join("tagstore.db")
}

pub fn default_database_path_in(base: &Path) -> PathBuf {
    base.join(".tagstore").join("tagstore.db")
}

/// Read the config file; a missing file yields the defaults.
///
/// `TAGSTORE_DATABASE` is applied on top.
pub fn load_config(path: Option<&Path>) -> Result<StoreConfig> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    let config = if path.exists() {
        let contents = std::fs::read_to_string(&path)?;
        toml::from_str(&contents)?
    } else {
        StoreConfig::default()
    };

    let database = std::env::var_os(DATABASE_ENV).map(PathBuf::from);
    Ok(apply_database_override(config, database))
}

/// Point a SQLite backend at `database`. Other backends are left alone.
pub fn apply_database_override(mut config: StoreConfig, database: Option<PathBuf>) -> StoreConfig {
    if let (Some(database), BackendConfig::Sqlite { path }) = (database, &mut config.backend) {
        if !database.as_os_str().is_empty() {
            *path = database;
        }
    }
    config
}

pub fn write_config(path: &Path, config: &StoreConfig, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(Error::Config(format!(
            "config already exists at {} (use --force to overwrite)",
            path.display()
        )));
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}

pub fn ensure_db_dir(db_path: &Path) -> Result<()> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Keep the local database directory out of version control
pub fn ensure_gitignore(project_root: &Path) -> Result<()> {
    let gitignore_path = project_root.join(".gitignore");
    let entry = ".tagstore/";

    let mut content = String::new();
    if gitignore_path.exists() {
        content = std::fs::read_to_string(&gitignore_path)?;
        if content.lines().any(|line| line.trim() == entry) {
            return Ok(());
        }
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
    }
    content.push_str(entry);
    content.push('\n');
    std::fs::write(&gitignore_path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = load_config(Some(&dir.path().join("absent.toml"))).unwrap();
        // the env override may be set by the caller's shell
        if std::env::var_os(DATABASE_ENV).is_none() {
            assert_eq!(config, StoreConfig::default());
        }
    }

    #[test]
    fn test_default_database_path() {
        assert_eq!(default_database_path(), PathBuf::from(".tagstore/tagstore.db"));
    }

    #[test]
    fn test_parse_sqlite() {
        let config: StoreConfig = toml::from_str(
            r#"
            [backend]
            kind = "sqlite"
            path = "/var/lib/tagstore/data.db"
            "#,
        )
        .unwrap();
        assert_eq!(
            config.backend,
            BackendConfig::Sqlite {
                path: PathBuf::from("/var/lib/tagstore/data.db")
            }
        );
    }

    #[test]
    fn test_sqlite_path_defaults() {
        let config: StoreConfig = toml::from_str("[backend]\nkind = \"sqlite\"\n").unwrap();
        assert_eq!(config, StoreConfig::default());
    }

    #[test]
    fn test_unknown_kind_is_config_error() {
        let err: Error = toml::from_str::<StoreConfig>("[backend]\nkind = \"oracle\"\n")
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), crate::ErrorKind::Config);
    }

    #[test]
    fn test_database_override() {
        let database = Some(PathBuf::from("/tmp/x.db"));
        let config = apply_database_override(StoreConfig::default(), database);
        assert_eq!(
            config.backend,
            BackendConfig::Sqlite {
                path: PathBuf::from("/tmp/x.db")
            }
        );

        let untouched = apply_database_override(StoreConfig::default(), Some(PathBuf::new()));
        assert_eq!(untouched, StoreConfig::default());
    }

    #[test]
    fn test_write_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tagstore.toml");
        let config = StoreConfig {
            backend: BackendConfig::Sqlite {
                path: dir.path().join("db.sqlite"),
            },
        };

        write_config(&path, &config, false).unwrap();
        let err = write_config(&path, &config, false).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Config);
        write_config(&path, &config, true).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let reloaded: StoreConfig = toml::from_str(&contents).unwrap();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn test_ensure_db_dir_creates_parents() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("a").join("b").join("store.db");
        ensure_db_dir(&db).unwrap();
        assert!(db.parent().unwrap().is_dir());
        ensure_db_dir(Path::new("store.db")).unwrap();
    }

    #[test]
    fn test_ensure_gitignore_is_idempotent() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".gitignore"), "target/").unwrap();

        ensure_gitignore(dir.path()).unwrap();
        ensure_gitignore(dir.path()).unwrap();

        let contents = std::fs::read_to_string(dir.path().join(".gitignore")).unwrap();
        assert_eq!(contents, "target/\n.tagstore/\n");
    }

    #[tokio::test]
    async fn test_connect_sqlite() {
        let dir = TempDir::new().unwrap();
        let backend = BackendConfig::Sqlite {
            path: dir.path().join("nested").join("store.db"),
        };
        let storage = backend.connect().await.unwrap();
        assert_eq!(storage.name(), "sqlite");
        assert!(backend.describe().starts_with("sqlite:"));
    }

    #[cfg(feature = "postgres")]
    #[test]
    fn test_parse_postgres() {
        let config: StoreConfig = toml::from_str(
            r#"
            [backend]
            kind = "postgres"
            url = "postgres://app:secret@db:5432/app"
            schema = "tagstore"
            "#,
        )
        .unwrap();
        let BackendConfig::Postgres(pg) = &config.backend else {
            panic!("expected postgres backend");
        };
        assert_eq!(pg.max_connections, 5);
        assert_eq!(pg.schema.as_deref(), Some("tagstore"));
        assert_eq!(config.backend.describe(), "postgres://app:***@db:5432/app");
    }
}
