//! Totals row computation.

use crate::value::Value;

use super::table::{ReportTable, Row, LABEL};

/// Label of the synthetic totals row.
pub const TOTALS_LABEL: &str = "Total";

/// Sum every numeric column of the top-level rows, summary row included,
/// into `table.totals_row`. `max_*` and `min_*` columns keep the extreme
/// value. Columns in `skip` (derived ratios) are left out; they are
/// computed on the totals row later.
pub fn compute_totals(table: &mut ReportTable, skip: &[String]) {
    let mut totals = Row::new();
    totals.set_column(LABEL, TOTALS_LABEL);
    for row in table.rows_with_summary() {
        for (name, value) in &row.columns {
            if name == LABEL || skip.iter().any(|s| s == name) || !value.is_numeric() {
                continue;
            }
            let merged = match totals.column(name) {
                None => value.clone(),
                Some(current) => merge(name, current, value),
            };
            totals.set_column(name.clone(), merged);
        }
    }
    table.totals_row = Some(totals);
}

fn merge(column: &str, current: &Value, value: &Value) -> Value {
    let pick = |prefer_greater: bool| {
        let (a, b) = (current.as_f64().unwrap_or(0.0), value.as_f64().unwrap_or(0.0));
        if (b > a) == prefer_greater {
            value.clone()
        } else {
            current.clone()
        }
    };
    if column.starts_with("max_") {
        pick(true)
    } else if column.starts_with("min_") {
        pick(false)
    } else {
        current.add(value)
    }
}
