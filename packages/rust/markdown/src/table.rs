//! Table reconstruction.
//!
//! Rebuilds a GFM pipe table from table markup that may contain block
//! content in cells, nested tables, or missing close tags. Works on the raw
//! markup with depth-counted scanning rather than the parsed tree so that
//! inner and outer row boundaries never mix.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::engine::{DISCARD_TAGS, Engine, text};
use crate::scan::{self, RegionKind};

/// Upper bound on a single cell's column span.
const MAX_COLSPAN: usize = 64;

/// Nested tables deeper than this are flattened to plain text in one go.
const MAX_FLATTEN_PASSES: usize = 16;

/// Convert table markup to a Markdown table, or return the input unchanged
/// when no rows can be extracted.
pub fn convert_table(markup: &str) -> String {
    try_convert_table(markup).unwrap_or_else(|| markup.to_string())
}

/// Convert table markup to a Markdown table. `None` when no row holds a cell.
pub fn try_convert_table(markup: &str) -> Option<String> {
    let inner = table_inner(markup);
    let inner = flatten_nested_tables(inner);

    let mut rows: Vec<Vec<String>> = extract_rows(&inner)
        .into_iter()
        .filter(|row| !row.is_empty())
        .collect();
    if rows.is_empty() {
        return None;
    }

    let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
    for row in &mut rows {
        row.resize(columns, String::new());
    }

    debug!(rows = rows.len(), columns, "table reconstructed");

    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push(render_row(&rows[0]));
    lines.push(render_row(&vec!["---".to_string(); columns]));
    lines.extend(rows[1..].iter().map(|row| render_row(row)));
    Some(lines.join("\n"))
}

fn render_row(cells: &[String]) -> String {
    format!("| {} |", cells.join(" | "))
}

// ---------------------------------------------------------------------------
// Boundaries
// ---------------------------------------------------------------------------

/// Content of the first outermost table, or the whole input when it holds
/// bare rows.
fn table_inner(markup: &str) -> &str {
    scan::regions(markup, "table")
        .into_iter()
        .find(|r| matches!(r.kind, RegionKind::Closed | RegionKind::Unclosed))
        .map(|r| &markup[r.inner_start..r.inner_end])
        .unwrap_or(markup)
}

/// Replace each nested table with its cell texts joined by spaces, until no
/// table markers remain.
fn flatten_nested_tables(inner: &str) -> String {
    let mut current = inner.to_string();
    for _ in 0..MAX_FLATTEN_PASSES {
        let regions = scan::regions(&current, "table");
        if regions.is_empty() {
            return current;
        }
        current = scan::splice_regions(&current, &regions, |region| match region.kind {
            RegionKind::Closed | RegionKind::Unclosed => {
                let nested = &current[region.inner_start..region.inner_end];
                format!(" {} ", nested_text(nested))
            }
            RegionKind::Single | RegionKind::StrayClose => String::new(),
        });
    }
    strip_tags(&current)
}

fn nested_text(nested: &str) -> String {
    let cells: Vec<String> = extract_raw_rows(nested)
        .into_iter()
        .flatten()
        .map(|cell| strip_tags(&cell.content))
        .filter(|text| !text.is_empty())
        .collect();
    if cells.is_empty() {
        strip_tags(nested)
    } else {
        cells.join(" ")
    }
}

/// Visible text of nested markup: discarded elements go with their content.
fn strip_tags(markup: &str) -> String {
    static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));
    let visible = scan::remove_regions(markup, DISCARD_TAGS);
    let text = TAG_RE.replace_all(&visible, " ");
    text::collapse_whitespace(&text).trim().to_string()
}

// ---------------------------------------------------------------------------
// Rows and cells
// ---------------------------------------------------------------------------

struct RawCell {
    content: String,
    colspan: usize,
}

/// Rows of converted cells, colspans already padded.
fn extract_rows(inner: &str) -> Vec<Vec<String>> {
    extract_raw_rows(inner)
        .into_iter()
        .map(|row| {
            let mut cells = Vec::new();
            for cell in row {
                cells.push(convert_cell(&cell.content));
                for _ in 1..cell.colspan {
                    cells.push(String::new());
                }
            }
            cells
        })
        .collect()
}

/// Split on row and cell markers. A row or cell ends at its close tag or at
/// the next opener, whichever comes first.
fn extract_raw_rows(inner: &str) -> Vec<Vec<RawCell>> {
    let row_tokens = scan::tokens(inner, "tr");
    let mut rows = Vec::new();

    for (i, tok) in row_tokens.iter().enumerate() {
        if tok.closing {
            continue;
        }
        let end = row_tokens
            .get(i + 1)
            .map(|next| next.start)
            .unwrap_or(inner.len());
        rows.push(extract_cells(&inner[tok.end..end]));
    }

    rows
}

fn extract_cells(row: &str) -> Vec<RawCell> {
    static CELL_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)<(/?)t[dh](\s[^>]*)?>").expect("valid regex"));
    static COLSPAN_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#"(?i)\bcolspan\s*=\s*["']?\s*(\d+)"#).expect("valid regex")
    });

    let markers: Vec<_> = CELL_RE.captures_iter(row).collect();
    let mut cells = Vec::new();

    for (i, caps) in markers.iter().enumerate() {
        let closing = caps.get(1).is_some_and(|m| !m.as_str().is_empty());
        let Some(open) = caps.get(0) else { continue };
        if closing {
            continue;
        }
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map(|m| m.start())
            .unwrap_or(row.len());

        let colspan = caps
            .get(2)
            .and_then(|attrs| COLSPAN_RE.captures(attrs.as_str()))
            .and_then(|c| c[1].parse::<usize>().ok())
            .unwrap_or(1)
            .clamp(1, MAX_COLSPAN);

        cells.push(RawCell {
            content: row[open.end()..end].to_string(),
            colspan,
        });
    }

    cells
}

/// Inline Markdown for one cell: pipes escaped, kept on one line.
fn convert_cell(content: &str) -> String {
    let md = Engine::cell().convert(content);
    let md = md.replace('|', r"\|");
    text::collapse_whitespace(&md).trim().to_string()
}
