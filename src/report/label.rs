//! Label decoding and the label filter.
//!
//! Labels may be requested as a list (`label=a,b` or repeated) and as a
//! path into subtables (`search>google`).

use percent_encoding::percent_decode_str;

use crate::value::Value;

use super::table::{ReportTable, Row, LABEL};

/// Default separator of hierarchical label requests.
pub const LABEL_PATH_SEPARATOR: &str = ">";

/// Metadata giving a matched row's position in a multi-label request.
pub const LABEL_INDEX: &str = "label_index";

/// URL-decode (`+` as space), HTML-unescape, then HTML-escape a label, so
/// stored labels are never rendered as markup.
pub fn safe_decode_label(label: &str) -> String {
    let binding = label.replace('+', " ");
    let decoded = percent_decode_str(&binding).decode_utf8_lossy();
    html_escape(&html_unescape(&decoded))
}

const HTML_ENTITIES: [(&str, char); 6] = [
    ("&amp;", '&'),
    ("&lt;", '<'),
    ("&gt;", '>'),
    ("&quot;", '"'),
    ("&#039;", '\''),
    ("&#39;", '\''),
];

pub fn html_unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];
        match HTML_ENTITIES
            .iter()
            .find(|(entity, _)| rest.starts_with(entity))
        {
            Some((entity, c)) => {
                out.push(*c);
                rest = &rest[entity.len()..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

pub fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            c => out.push(c),
        }
    }
    out
}

/// Whether a row label equals a requested label, raw or in its escaped
/// display form.
fn label_matches(row: &Row, wanted: &str) -> bool {
    match row.column(LABEL) {
        Some(Value::Null) | None => false,
        Some(value) => {
            let label = value.to_string();
            label == wanted || label == html_escape(wanted) || html_unescape(&label) == wanted
        }
    }
}

/// Narrows a report to the rows named by one or more labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelFilter {
    labels: Vec<String>,
    separator: String,
}

impl LabelFilter {
    pub fn new(labels: Vec<String>) -> Self {
        Self {
            labels,
            separator: LABEL_PATH_SEPARATOR.to_string(),
        }
    }

    pub fn with_separator(mut self, separator: &str) -> Self {
        self.separator = separator.to_string();
        self
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Replace the rows of `table` with the matched rows, in request order.
    /// Unmatched labels are skipped. With several labels every matched row
    /// gets its request index as [`LABEL_INDEX`] metadata.
    pub fn apply(&self, table: &mut ReportTable) {
        if self.labels.is_empty() {
            return;
        }
        let multiple = self.labels.len() > 1;
        let mut matched = Vec::new();
        for (index, label) in self.labels.iter().enumerate() {
            if let Some(row) = find_path(table, label, &self.separator) {
                let mut row = row.clone();
                if multiple {
                    row.set_metadata(LABEL_INDEX, index as i64);
                }
                matched.push(row);
            }
        }
        table.rows = matched;
        table.summary_row = None;
    }
}

/// Follow a `a>b>c` path; a label containing the separator literally is
/// tried as a whole first.
fn find_path<'t>(table: &'t ReportTable, path: &str, separator: &str) -> Option<&'t Row> {
    if let Some(row) = table.rows_with_summary().find(|r| label_matches(r, path)) {
        return Some(row);
    }
    let mut parts = path.split(separator).map(str::trim);
    let first = parts.next()?;
    let mut row = table.rows_with_summary().find(|r| label_matches(r, first))?;
    for part in parts {
        row = row
            .subtable()?
            .rows_with_summary()
            .find(|r| label_matches(r, part))?;
    }
    Some(row)
}
