use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::model::{CanonicalReleaseSet, PageFragment, ReleaseRecord};

pub const ABSENT_CELL: &str = "—";
const EMPTY_MESSAGE: &str = "No releases found in the lookback window.";
const HEADERS: [&str; 5] = ["Application", "Version", "Published", "Rollout", "Status"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableFormat {
    Markdown,
    /// Confluence storage format (XHTML).
    #[default]
    Storage,
}

impl TableFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Markdown => "markdown",
            Self::Storage => "storage",
        }
    }
}

/// Compares dotted versions segment by segment, numerically where both segments are numbers.
pub fn compare_versions(left: &str, right: &str) -> Ordering {
    let mut left_parts = left.split('.');
    let mut right_parts = right.split('.');
    loop {
        match (left_parts.next(), right_parts.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) => {
                let ordering = match (l.parse::<u64>(), r.parse::<u64>()) {
                    (Ok(l), Ok(r)) => l.cmp(&r),
                    _ => l.cmp(r),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
        }
    }
}

fn compare_records(left: &ReleaseRecord, right: &ReleaseRecord) -> Ordering {
    left.application
        .cmp(&right.application)
        .then_with(|| compare_versions(&left.version, &right.version))
        .then_with(|| match (&left.build, &right.build) {
            (Some(l), Some(r)) => compare_versions(l, r),
            (l, r) => l.cmp(r),
        })
        .then_with(|| left.version.cmp(&right.version))
}

/// Records in render order: application, then version-aware version, then build.
pub fn sorted_records(records: &CanonicalReleaseSet) -> Vec<&ReleaseRecord> {
    let mut rows = records.values().collect::<Vec<_>>();
    rows.sort_by(|left, right| compare_records(left, right));
    rows
}

fn row_cells(record: &ReleaseRecord) -> [String; 5] {
    let version = match &record.build {
        Some(build) => format!("{} (build {build})", record.version),
        None => record.version.clone(),
    };
    let rollout = record
        .rollout_percent
        .map(|percent| format!("{percent}%"))
        .unwrap_or_else(|| ABSENT_CELL.to_string());
    [
        record.application.clone(),
        version,
        record.publish_date.format("%Y-%m-%d").to_string(),
        rollout,
        record.status.as_str().to_string(),
    ]
}

pub fn render(records: &CanonicalReleaseSet, format: TableFormat) -> PageFragment {
    let rows = sorted_records(records);
    let text = match format {
        TableFormat::Markdown => render_markdown(&rows),
        TableFormat::Storage => render_storage(&rows),
    };
    PageFragment::new(text)
}

fn render_markdown(rows: &[&ReleaseRecord]) -> String {
    if rows.is_empty() {
        return format!("_{EMPTY_MESSAGE}_");
    }
    let mut lines = Vec::with_capacity(rows.len() + 2);
    lines.push(format!("| {} |", HEADERS.join(" | ")));
    lines.push(format!("|{}", " --- |".repeat(HEADERS.len())));
    for record in rows {
        let cells = row_cells(record)
            .iter()
            .map(|cell| cell.replace('|', "\\|"))
            .collect::<Vec<_>>();
        lines.push(format!("| {} |", cells.join(" | ")));
    }
    lines.join("\n")
}

fn render_storage(rows: &[&ReleaseRecord]) -> String {
    if rows.is_empty() {
        return format!("<p><em>{EMPTY_MESSAGE}</em></p>");
    }
    let mut output = String::from("<table><tbody>\n<tr>");
    for header in HEADERS {
        output.push_str(&format!("<th>{header}</th>"));
    }
    output.push_str("</tr>\n");
    for record in rows {
        output.push_str("<tr>");
        for cell in row_cells(record) {
            output.push_str(&format!("<td>{}</td>", escape_xml(&cell)));
        }
        output.push_str("</tr>\n");
    }
    output.push_str("</tbody></table>");
    output
}

fn escape_xml(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Short content fingerprint, recorded in the begin marker and in run reports.
pub fn fingerprint(fragment: &PageFragment) -> String {
    let digest = Sha256::digest(fragment.as_str().as_bytes());
    let mut output = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}
