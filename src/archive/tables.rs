//! Archive table naming.
//!
//! Archives are sharded by month: every period is stored in the numeric and
//! blob tables of the month its start date falls in.

use std::fmt;

use chrono::{Datelike, NaiveDate};

use super::record::RecordKind;

/// Maps a date to the archive tables that hold it.
pub trait ArchiveTableNaming: fmt::Debug {
    fn numeric_table_for(&self, date: NaiveDate) -> String;

    fn blob_table_for(&self, date: NaiveDate) -> String;

    /// Table allocating archive ids, one row per numeric table.
    fn sequence_table(&self) -> String;

    fn table_for(&self, kind: RecordKind, date: NaiveDate) -> String {
        match kind {
            RecordKind::Numeric => self.numeric_table_for(date),
            RecordKind::Blob => self.blob_table_for(date),
        }
    }
}

/// `archive_numeric_YYYY_MM` / `archive_blob_YYYY_MM`, with an optional prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonthlyTables {
    prefix: String,
}

impl MonthlyTables {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn name(&self, kind: &str, date: NaiveDate) -> String {
        format!(
            "{}archive_{}_{:04}_{:02}",
            self.prefix,
            kind,
            date.year(),
            date.month()
        )
    }
}

impl ArchiveTableNaming for MonthlyTables {
    fn numeric_table_for(&self, date: NaiveDate) -> String {
        self.name("numeric", date)
    }

    fn blob_table_for(&self, date: NaiveDate) -> String {
        self.name("blob", date)
    }

    fn sequence_table(&self) -> String {
        format!("{}sequence", self.prefix)
    }
}
