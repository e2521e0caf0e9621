//! Line-oriented CLI output. Results go to stdout, failures and warnings to
//! stderr.

use chrono::{DateTime, Utc};
use owo_colors::OwoColorize;

use crate::document::Document;
use crate::ui::{palette, Icons, Palette};

/// Product name and version, framed by blank lines
pub fn banner(title: &str, subtitle: &str) {
    println!();
    println!("  {}", title.style(palette().heading));
    println!("  {}", subtitle.style(palette().label));
    println!();
}

pub fn heading(icon: &str, text: &str) {
    println!("{} {}", icon, text.style(palette().heading));
}

/// `icon label: value`
pub fn field(icon: &str, label: &str, value: &str) {
    println!("{} {}: {}", icon, label.style(palette().label), value);
}

pub fn timestamp(label: &str, at: &DateTime<Utc>) {
    field(Icons::TIME, label, &at.to_rfc3339());
}

pub fn done(message: &str) {
    println!("{} {}", Icons::OK, message.style(palette().ok));
}

pub fn caution(message: &str) {
    eprintln!("{} {}", Icons::CAUTION, message.style(palette().caution));
}

pub fn failure(message: &str) {
    eprintln!("{} {}", Icons::FAILED, message.style(palette().failure));
}

/// A query or listing that came back empty
pub fn nothing(icon: &str, message: &str) {
    println!("{} {}", icon, message.style(palette().faint));
}

/// Comma-separated tags, or a faint placeholder when there are none
pub fn tag_list(tags: &[String]) -> String {
    styled_tags(tags, palette())
}

fn styled_tags(tags: &[String], palette: &Palette) -> String {
    if tags.is_empty() {
        return "(none)".style(palette.faint).to_string();
    }
    tags.iter()
        .map(|t| t.style(palette.tag).to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// One-line confirmation for a written document
pub fn document_written(doc: &Document, created: bool) {
    let verb = if created { "Created" } else { "Updated" };
    done(&format!("{} {} in {}/{}", verb, doc.id, doc.tenant, doc.index));
    if !doc.tags.is_empty() {
        field(Icons::TAG, "Tags", &tag_list(&doc.tags));
    }
}

/// Full view of one document: identity, tags, timestamps, then the payload
pub fn document_detail(doc: &Document) -> serde_json::Result<()> {
    heading(Icons::DOCUMENT, &doc.id);
    field(Icons::STORE, "Tenant", &doc.tenant);
    field(Icons::STORE, "Index", &doc.index);
    field(Icons::TAG, "Tags", &tag_list(&doc.tags));
    timestamp("Created", &doc.created_at);
    timestamp("Updated", &doc.updated_at);
    println!();
    println!("{}", serde_json::to_string_pretty(&doc.data)?);
    Ok(())
}

/// Trailing `label value` line under a table
pub fn total(label: &str, count: usize) {
    println!("  {} {}", label.style(palette().label), count);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_list() {
        let tags = vec!["a".to_string(), "b".to_string()];
        assert_eq!(styled_tags(&tags, &Palette::plain()), "a, b");
        assert_eq!(styled_tags(&[], &Palette::plain()), "(none)");

        let colored = styled_tags(&tags, &Palette::colored());
        assert!(colored.contains("\u{1b}["));
        assert!(colored.contains('a') && colored.contains('b'));
    }
}
