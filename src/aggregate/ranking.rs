//! Top-N ranking of aggregated rows.
//!
//! A ranking keeps the first rows of an ordered aggregate result and folds
//! the remainder into one "others" row. The aggregator tells the ranking
//! which columns to fold and how, then hands it the query to run.

use rusqlite::Connection;

use crate::value::Value;

use super::error::QueryResult;
use super::{fetch_rows, LogRow};

/// How a column of the truncated rows is folded into the "others" row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateKind {
    Sum,
    Max,
}

/// Executes an aggregate query and truncates its result.
pub trait RankingQuery {
    fn add_column(&mut self, names: &[&str], kind: AggregateKind);

    fn execute(&mut self, conn: &Connection, sql: &str, bind: &[Value]) -> QueryResult<Vec<LogRow>>;
}

/// Keeps `limit` rows, summarizing the rest under `others_label`.
#[derive(Debug, Clone)]
pub struct LimitedRanking {
    limit: usize,
    label_column: String,
    others_label: String,
    columns: Vec<(String, AggregateKind)>,
}

impl LimitedRanking {
    pub fn new(limit: usize, label_column: impl Into<String>) -> Self {
        Self {
            limit,
            label_column: label_column.into(),
            others_label: "-1".to_string(),
            columns: Vec::new(),
        }
    }

    pub fn with_others_label(mut self, label: impl Into<String>) -> Self {
        self.others_label = label.into();
        self
    }

    pub fn columns(&self) -> &[(String, AggregateKind)] {
        &self.columns
    }
}

impl RankingQuery for LimitedRanking {
    fn add_column(&mut self, names: &[&str], kind: AggregateKind) {
        for name in names {
            if !self.columns.iter().any(|(existing, _)| existing == name) {
                self.columns.push((name.to_string(), kind));
            }
        }
    }

    fn execute(&mut self, conn: &Connection, sql: &str, bind: &[Value]) -> QueryResult<Vec<LogRow>> {
        let mut rows = fetch_rows(conn, sql, bind)?;
        if rows.len() <= self.limit {
            return Ok(rows);
        }

        let rest = rows.split_off(self.limit);
        let mut others = LogRow::new();
        others.insert(
            self.label_column.clone(),
            Value::Text(self.others_label.clone()),
        );

        for (column, kind) in &self.columns {
            let folded = rest
                .iter()
                .filter_map(|row| row.get(column))
                .fold(Value::Null, |acc, value| match kind {
                    AggregateKind::Sum => acc.add(value),
                    AggregateKind::Max => match (acc.as_f64(), value.as_f64()) {
                        (Some(a), Some(b)) if b <= a => acc,
                        (_, Some(_)) => value.clone(),
                        _ => acc,
                    },
                });
            others.insert(column.clone(), folded);
        }

        rows.push(others);
        Ok(rows)
    }
}
