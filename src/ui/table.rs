use tabled::{settings::Style, Table, Tabled};

use crate::document::Document;
use crate::migrate::AppliedMigration;

#[derive(Tabled)]
pub struct TableRow {
    #[tabled(rename = "Metric")]
    pub metric: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

#[derive(Tabled)]
struct DocumentRow {
    #[tabled(rename = "Id")]
    id: String,
    #[tabled(rename = "Index")]
    index: String,
    #[tabled(rename = "Tags")]
    tags: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

#[derive(Tabled)]
struct MigrationRow {
    #[tabled(rename = "Migration")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Applied at")]
    applied_at: String,
}

#[derive(Default)]
pub struct TableBuilder {
    rows: Vec<TableRow>,
}

impl TableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_row(&mut self, label: &str, value: &str) {
        self.rows.push(TableRow {
            metric: label.to_string(),
            value: value.to_string(),
        });
    }

    pub fn build(&self) -> String {
        if self.rows.is_empty() {
            return String::new();
        }
        Table::new(&self.rows).with(Style::rounded()).to_string()
    }
}

pub fn stats_table(stats: &[(&str, &str)]) -> String {
    let mut builder = TableBuilder::new();
    for (label, value) in stats {
        builder.add_row(label, value);
    }
    builder.build()
}

pub fn documents_table(documents: &[Document]) -> String {
    if documents.is_empty() {
        return String::new();
    }
    let rows = documents.iter().map(|doc| DocumentRow {
        id: doc.id.clone(),
        index: doc.index.clone(),
        tags: doc.tags.join(", "),
        updated: doc.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
    });
    Table::new(rows).with(Style::rounded()).to_string()
}

/// Applied migrations first, in ledger order, then the pending ones
pub fn migrations_table(applied: &[AppliedMigration], pending: &[String]) -> String {
    let applied_rows = applied.iter().map(|m| MigrationRow {
        name: m.name.clone(),
        status: "applied".to_string(),
        applied_at: m.applied_at.format("%Y-%m-%d %H:%M:%S").to_string(),
    });
    let pending_rows = pending.iter().map(|name| MigrationRow {
        name: name.clone(),
        status: "pending".to_string(),
        applied_at: "-".to_string(),
    });
    let rows: Vec<MigrationRow> = applied_rows.chain(pending_rows).collect();
    if rows.is_empty() {
        return String::new();
    }
    Table::new(rows).with(Style::rounded()).to_string()
}
