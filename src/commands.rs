use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::{emit_success, OutputMode};
use owo_colors::OwoColorize;
use tagstore::config::{self, BackendConfig, StoreConfig};
use tagstore::ui::{self, Icons};
use tagstore::{Document, MigrationRunner, NewDocument, TagStore};

pub fn run_init(
    output_mode: OutputMode,
    config_path: &Path,
    database: Option<PathBuf>,
    force: bool,
) -> anyhow::Result<()> {
    let backend = match database {
        Some(path) => BackendConfig::Sqlite { path },
        None => BackendConfig::default(),
    };
    let store_config = StoreConfig { backend };

    config::write_config(config_path, &store_config, force)?;
    let project_root = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    config::ensure_gitignore(project_root)?;

    if output_mode.is_human() {
        ui::banner("Tagstore", &format!("Version {}", env!("CARGO_PKG_VERSION").bold()));
        ui::done(&format!("Wrote {}", config_path.display()));
        ui::field(Icons::STORE, "Backend", &store_config.backend.describe());
    } else {
        let data = serde_json::json!({
            "config": config_path.display().to_string(),
            "backend": store_config.backend.describe(),
        });
        emit_success(output_mode, "init", data)?;
    }
    Ok(())
}

/// Migrations are driven directly here: opening a [`TagStore`] would apply them.
pub async fn run_migrate(
    output_mode: OutputMode,
    store_config: &StoreConfig,
    status: bool,
    revert: bool,
) -> anyhow::Result<()> {
    let backend = store_config.backend.connect().await?;
    let runner = MigrationRunner::new(Arc::clone(&backend));

    if status {
        let applied = runner.applied().await?;
        let pending = runner.pending().await?;
        if output_mode.is_human() {
            ui::heading(Icons::STORE, &store_config.backend.describe());
            let table = ui::migrations_table(&applied, &pending);
            if !table.is_empty() {
                println!("{table}");
            }
            ui::total("Pending:", pending.len());
        } else {
            let data = serde_json::json!({ "applied": applied, "pending": pending });
            emit_success(output_mode, "migrate", data)?;
        }
        return Ok(());
    }

    if revert {
        let reverted = runner.revert_last().await?;
        if output_mode.is_human() {
            match &reverted {
                Some(name) => ui::field(Icons::REVERTED, "Reverted", name),
                None => ui::caution("No applied migrations to revert"),
            }
        } else {
            let data = serde_json::json!({ "reverted": reverted });
            emit_success(output_mode, "migrate", data)?;
        }
        return Ok(());
    }

    let report = runner.run().await?;
    if output_mode.is_human() {
        if report.is_noop() {
            ui::done("Schema is up to date");
        } else {
            for name in &report.applied {
                ui::field(Icons::APPLIED, "Applied", name);
            }
            ui::done(&format!("Applied {} migrations", report.applied.len()));
        }
    } else {
        emit_success(output_mode, "migrate", serde_json::to_value(&report)?)?;
    }
    Ok(())
}

/// Payload from `--data`, else `--file`, else stdin
pub fn read_payload(
    data: Option<String>,
    file: Option<PathBuf>,
) -> anyhow::Result<serde_json::Value> {
    let raw = match (data, file) {
        (Some(data), _) => data,
        (None, Some(path)) => std::fs::read_to_string(&path)?,
        (None, None) => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    let value = serde_json::from_str(&raw).map_err(tagstore::Error::from)?;
    Ok(value)
}

pub async fn run_put(
    output_mode: OutputMode,
    store: &TagStore,
    doc: NewDocument,
) -> anyhow::Result<()> {
    let existed = store.documents().get(&doc.id).await?.is_some();
    let stored = store.documents().upsert(doc).await?;

    if output_mode.is_human() {
        ui::document_written(&stored, !existed);
    } else {
        emit_success(output_mode, "put", serde_json::to_value(&stored)?)?;
    }
    Ok(())
}

pub async fn run_get(output_mode: OutputMode, store: &TagStore, id: &str) -> anyhow::Result<()> {
    let doc = store.documents().fetch(id).await?;

    if output_mode.is_human() {
        ui::document_detail(&doc)?;
    } else {
        emit_success(output_mode, "get", serde_json::to_value(&doc)?)?;
    }
    Ok(())
}

pub async fn run_delete(output_mode: OutputMode, store: &TagStore, id: &str) -> anyhow::Result<()> {
    let removed = store.documents().delete(id).await?;

    if output_mode.is_human() {
        if removed {
            ui::field(Icons::DELETED, "Deleted", id);
        } else {
            ui::caution(&format!("No document with id {id}"));
        }
    } else {
        let data = serde_json::json!({ "id": id, "removed": removed });
        emit_success(output_mode, "delete", data)?;
    }
    Ok(())
}

pub fn print_documents(
    output_mode: OutputMode,
    command: &str,
    tenant: &str,
    docs: &[Document],
) -> anyhow::Result<()> {
    if !output_mode.is_human() {
        return emit_success(output_mode, command, serde_json::to_value(docs)?);
    }

    if docs.is_empty() {
        ui::nothing(Icons::NOTHING, &format!("No documents in {tenant}"));
        return Ok(());
    }
    println!("{}", ui::documents_table(docs));
    ui::total("Results:", docs.len());
    Ok(())
}

pub async fn run_tags(
    output_mode: OutputMode,
    store: &TagStore,
    tenant: Option<&str>,
) -> anyhow::Result<()> {
    let tags = match tenant {
        Some(tenant) => store.tags().tenant_tags(tenant).await?,
        None => store.tags().all_tags().await?,
    };

    if output_mode.is_human() {
        if tags.is_empty() {
            ui::nothing(Icons::TAG, "No tags");
        }
        for tag in &tags {
            println!("{} {}", Icons::TAG, tag.style(ui::palette().tag));
        }
    } else {
        emit_success(output_mode, "tags", serde_json::to_value(&tags)?)?;
    }
    Ok(())
}

pub async fn run_count(
    output_mode: OutputMode,
    store: &TagStore,
    tenant: &str,
    index: Option<&str>,
) -> anyhow::Result<()> {
    let documents = store.documents().count(tenant, index).await?;
    let tags = store.tags().tenant_tags(tenant).await?.len();

    if output_mode.is_human() {
        let documents = documents.to_string();
        let tags = tags.to_string();
        ui::heading(Icons::COUNT, tenant);
        println!(
            "{}",
            ui::stats_table(&[
                ("Backend", store.backend().name()),
                ("Index", index.unwrap_or("*")),
                ("Documents", documents.as_str()),
                ("Tags", tags.as_str()),
            ])
        );
    } else {
        let data = serde_json::json!({
            "tenant": tenant,
            "index": index,
            "documents": documents,
            "tags": tags,
        });
        emit_success(output_mode, "count", data)?;
    }
    Ok(())
}
