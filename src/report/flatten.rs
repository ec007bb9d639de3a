//! Collapse a report tree into one level.

use crate::value::Value;

use super::table::{ReportTable, Row, LABEL};

/// Row metadata marking a parent row kept by `include_aggregate_rows`.
pub const IS_AGGREGATE: &str = "is_aggregate";

/// Replace the rows of `table` by every leaf row of the tree, in depth-first
/// order, each labelled with the labels of its ancestors joined by
/// `separator`. With `include_aggregate_rows` parent rows are kept before
/// their children and flagged [`IS_AGGREGATE`].
pub fn flatten(table: &mut ReportTable, separator: &str, include_aggregate_rows: bool) {
    let mut flat = Vec::with_capacity(table.rows.len());
    let mut pending: Vec<(Option<String>, Row)> = std::mem::take(&mut table.rows)
        .into_iter()
        .rev()
        .map(|row| (None, row))
        .collect();

    while let Some((prefix, mut row)) = pending.pop() {
        let label = joined_label(prefix.as_deref(), &row, separator);
        if let Some(label) = &label {
            row.set_column(LABEL, label.clone());
        }

        match row.subtable.take() {
            Some(sub) => {
                if include_aggregate_rows {
                    let mut aggregate = row;
                    aggregate.set_metadata(IS_AGGREGATE, 1);
                    flat.push(aggregate);
                }
                let sub = *sub;
                let children = sub.rows.into_iter().chain(sub.summary_row);
                let mut children: Vec<_> = children.map(|r| (label.clone(), r)).collect();
                children.reverse();
                pending.extend(children);
            }
            None => flat.push(row),
        }
    }

    table.rows = flat;
    if let Some(summary) = table.summary_row.as_mut() {
        summary.subtable = None;
    }
}

fn joined_label(prefix: Option<&str>, row: &Row, separator: &str) -> Option<String> {
    let own = match row.column(LABEL) {
        Some(Value::Null) | None => None,
        Some(value) => Some(value.to_string()),
    };
    match (prefix, own) {
        (Some(prefix), Some(own)) => Some(format!("{}{}{}", prefix, separator, own)),
        (Some(prefix), None) => Some(prefix.to_string()),
        (None, own) => own,
    }
}
