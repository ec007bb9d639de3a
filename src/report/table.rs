//! Report table model.
//!
//! A report table is an ordered list of rows. Each row holds its columns in
//! insertion order, a metadata bag, an owned subtable and, once comparisons
//! were computed, an owned comparisons table.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::value::Value;

use super::filters::Filter;

/// Column holding a row's label.
pub const LABEL: &str = "label";

/// Label of the summary row that aggregates truncated rows.
pub const OTHERS_LABEL: &str = "-1";

/// One report row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub columns: Vec<(String, Value)>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtable: Option<Box<ReportTable>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comparisons: Option<Box<ReportTable>>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a row from `(column, value)` pairs.
    pub fn from_columns<K, V>(columns: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Self {
            columns: columns
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            ..Self::default()
        }
    }

    pub fn with_subtable(mut self, subtable: ReportTable) -> Self {
        self.subtable = Some(Box::new(subtable));
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn column(&self, name: &str) -> Option<&Value> {
        self.columns.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|(k, _)| k == name)
    }

    /// Set a column, keeping its position when it already exists.
    pub fn set_column(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.columns.iter_mut().find(|(k, _)| *k == name) {
            Some((_, existing)) => *existing = value,
            None => self.columns.push((name, value)),
        }
    }

    pub fn remove_column(&mut self, name: &str) -> Option<Value> {
        let pos = self.columns.iter().position(|(k, _)| k == name)?;
        Some(self.columns.remove(pos).1)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(k, _)| k.as_str())
    }

    /// The label column rendered as text.
    pub fn label(&self) -> Option<String> {
        self.column(LABEL).map(|v| v.to_string())
    }

    pub fn metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn subtable(&self) -> Option<&ReportTable> {
        self.subtable.as_deref()
    }

    pub fn subtable_mut(&mut self) -> Option<&mut ReportTable> {
        self.subtable.as_deref_mut()
    }

    /// Add every numeric column of `other` to this row. Non-numeric columns
    /// are copied when missing.
    pub fn sum_row(&mut self, other: &Row) {
        for (name, value) in &other.columns {
            if name == LABEL {
                continue;
            }
            match self.column(name) {
                Some(existing) => {
                    let sum = existing.add(value);
                    self.set_column(name.clone(), sum);
                }
                None => self.set_column(name.clone(), value.clone()),
            }
        }
    }
}

/// An ordered tree of report rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportTable {
    pub rows: Vec<Row>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_row: Option<Row>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub totals_row: Option<Row>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
    /// Filters deferred until the end of post-processing.
    #[serde(skip)]
    pub queued_filters: Vec<Filter>,
}

impl ReportTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rows(rows: Vec<Row>) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn add_row(&mut self, row: Row) {
        self.rows.push(row);
    }

    pub fn row_by_label(&self, label: &str) -> Option<&Row> {
        self.rows
            .iter()
            .find(|r| r.label().as_deref() == Some(label))
    }

    pub fn row_by_label_mut(&mut self, label: &str) -> Option<&mut Row> {
        self.rows
            .iter_mut()
            .find(|r| r.label().as_deref() == Some(label))
    }

    /// Regular rows followed by the summary row.
    pub fn rows_with_summary(&self) -> impl Iterator<Item = &Row> {
        self.rows.iter().chain(self.summary_row.iter())
    }

    pub fn rows_with_summary_mut(&mut self) -> impl Iterator<Item = &mut Row> {
        self.rows.iter_mut().chain(self.summary_row.iter_mut())
    }

    pub fn metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.metadata.insert(key.into(), value.into());
    }

    /// Queue a filter to run at the end of post-processing.
    pub fn queue_filter(&mut self, filter: Filter) {
        self.queued_filters.push(filter);
    }

    /// Drop every subtable, recursively.
    pub fn remove_subtables(&mut self) {
        for row in self.rows_with_summary_mut() {
            row.subtable = None;
        }
    }

    /// Sum of a column over all rows (summary row included).
    pub fn column_total(&self, column: &str) -> f64 {
        self.rows_with_summary()
            .filter_map(|r| r.column(column).and_then(Value::as_f64))
            .sum()
    }

    /// Distinct column names in first-seen order.
    pub fn column_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for row in self.rows_with_summary() {
            for name in row.column_names() {
                if !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
            }
        }
        names
    }

    /// Apply `f` to every row of this table, summary and totals rows
    /// included, then to the rows of every subtable and comparisons table.
    pub fn walk_rows_mut(&mut self, f: &mut dyn FnMut(&mut Row)) {
        let mut stack: Vec<&mut ReportTable> = vec![self];
        while let Some(table) = stack.pop() {
            let ReportTable {
                rows,
                summary_row,
                totals_row,
                ..
            } = table;
            for row in rows
                .iter_mut()
                .chain(summary_row.iter_mut())
                .chain(totals_row.iter_mut())
            {
                f(row);
                let Row {
                    subtable,
                    comparisons,
                    ..
                } = row;
                if let Some(sub) = subtable.as_deref_mut() {
                    stack.push(sub);
                }
                if let Some(cmp) = comparisons.as_deref_mut() {
                    stack.push(cmp);
                }
            }
        }
    }
}
