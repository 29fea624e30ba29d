//! Pipe-table parsing for generated tables.

use core_document::TableData;
use regex::Regex;
use std::sync::LazyLock;

static SEPARATOR_ROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\|?\s*:?-{3,}:?\s*(\|\s*:?-{3,}:?\s*)*\|?$").expect("separator pattern compiles")
});

fn cells(row: &str) -> Vec<String> {
    let row = row.trim();
    let row = row.strip_prefix('|').unwrap_or(row);
    let row = row.strip_suffix('|').unwrap_or(row);
    row.split('|').map(|c| c.trim().to_string()).collect()
}

/// Parse a Markdown-style pipe table. Code fences, prose around the table
/// and the header separator are skipped; short rows are padded. Returns
/// `None` when no row with at least one pipe is found.
pub fn parse_pipe_table(text: &str) -> Option<TableData> {
    let mut rows: Vec<Vec<String>> = Vec::new();
    for line in text.lines().map(str::trim) {
        if line.is_empty() || line.starts_with("```") || !line.contains('|') {
            continue;
        }
        if SEPARATOR_ROW.is_match(line) {
            continue;
        }
        rows.push(cells(line));
    }
    let width = rows.iter().map(Vec::len).max()?;
    for row in &mut rows {
        row.resize(width, String::new());
    }
    Some(TableData::new(rows))
}
