//! DML (Data Manipulation Language) support.
//!
//! INSERT and UPDATE builders for archive records and segment tables.
//!
//! # Examples
//!
//! ```
//! use tally::sql::dml::{Insert, Update};
//!
//! let insert = Insert::into("archive_numeric_2024_01")
//!     .columns(["idarchive", "name", "value"])
//!     .placeholder_rows(2);
//! assert_eq!(
//!     insert.to_sql(),
//!     "INSERT INTO archive_numeric_2024_01 (idarchive, name, value) VALUES (?, ?, ?), (?, ?, ?)"
//! );
//!
//! let update = Update::table("archive_numeric_2024_01")
//!     .set(["value"])
//!     .filter("idarchive = ? AND name = ?");
//! assert_eq!(
//!     update.to_sql(),
//!     "UPDATE archive_numeric_2024_01 SET value = ? WHERE idarchive = ? AND name = ?"
//! );
//! ```

use super::query::Query;

// ============================================================================
// INSERT
// ============================================================================

/// Source of the inserted rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertSource {
    /// `n` rows of `?` placeholders, one per column.
    Placeholders(usize),
    /// Literal rows, already rendered as SQL.
    Literal(Vec<Vec<String>>),
    /// `INSERT ... SELECT`.
    Select(Box<Query>),
}

/// Conflict handling on the primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnConflict {
    #[default]
    Fail,
    Replace,
    Ignore,
}

/// INSERT statement.
#[derive(Debug, Clone)]
#[must_use = "DML statements have no effect until converted to SQL with to_sql()"]
pub struct Insert {
    pub table: String,
    pub columns: Vec<String>,
    pub source: InsertSource,
    pub on_conflict: OnConflict,
}

impl Insert {
    /// Create a new INSERT statement.
    pub fn into(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            source: InsertSource::Placeholders(1),
            on_conflict: OnConflict::Fail,
        }
    }

    /// Set the columns to insert.
    pub fn columns(mut self, cols: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.columns = cols.into_iter().map(|c| c.into()).collect();
        self
    }

    /// Insert `rows` rows of bound parameters.
    pub fn placeholder_rows(mut self, rows: usize) -> Self {
        self.source = InsertSource::Placeholders(rows);
        self
    }

    /// Insert literal rows.
    pub fn literal_rows(mut self, rows: Vec<Vec<String>>) -> Self {
        self.source = InsertSource::Literal(rows);
        self
    }

    /// Insert from a SELECT query.
    pub fn from_select(mut self, query: Query) -> Self {
        self.source = InsertSource::Select(Box::new(query));
        self
    }

    pub fn on_conflict(mut self, on_conflict: OnConflict) -> Self {
        self.on_conflict = on_conflict;
        self
    }

    /// Convert to SQL.
    pub fn to_sql(&self) -> String {
        let verb = match self.on_conflict {
            OnConflict::Fail => "INSERT INTO",
            OnConflict::Replace => "INSERT OR REPLACE INTO",
            OnConflict::Ignore => "INSERT OR IGNORE INTO",
        };
        let mut sql = format!("{} {}", verb, self.table);

        if !self.columns.is_empty() {
            sql.push_str(&format!(" ({})", self.columns.join(", ")));
        }

        match &self.source {
            InsertSource::Placeholders(rows) => {
                let width = self.columns.len().max(1);
                let row = format!("({})", vec!["?"; width].join(", "));
                sql.push_str(" VALUES ");
                sql.push_str(&vec![row; (*rows).max(1)].join(", "));
            }
            InsertSource::Literal(rows) => {
                let rendered: Vec<String> = rows
                    .iter()
                    .map(|row| format!("({})", row.join(", ")))
                    .collect();
                sql.push_str(" VALUES ");
                sql.push_str(&rendered.join(", "));
            }
            InsertSource::Select(query) => {
                sql.push(' ');
                sql.push_str(&query.to_sql());
            }
        }

        sql
    }
}

// ============================================================================
// UPDATE
// ============================================================================

/// UPDATE statement with bound assignments.
#[derive(Debug, Clone)]
#[must_use = "DML statements have no effect until converted to SQL with to_sql()"]
pub struct Update {
    pub table: String,
    pub assignments: Vec<String>,
    pub filter: Option<String>,
}

impl Update {
    /// Create a new UPDATE statement.
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            assignments: Vec::new(),
            filter: None,
        }
    }

    /// Columns assigned from bound parameters, in bind order.
    pub fn set(mut self, cols: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.assignments.extend(cols.into_iter().map(|c| c.into()));
        self
    }

    /// Add WHERE clause.
    pub fn filter(mut self, predicate: impl Into<String>) -> Self {
        self.filter = Some(predicate.into());
        self
    }

    /// Convert to SQL.
    pub fn to_sql(&self) -> String {
        let sets: Vec<String> = self
            .assignments
            .iter()
            .map(|c| format!("{} = ?", c))
            .collect();
        let mut sql = format!("UPDATE {} SET {}", self.table, sets.join(", "));
        if let Some(filter) = &self.filter {
            sql.push_str(" WHERE ");
            sql.push_str(filter);
        }
        sql
    }
}
