//! Archiving periods.
//!
//! Every archive covers one period of a site. The numeric id of the period
//! kind is what gets persisted in the `period` column of archive tables.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Days, Months, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

/// Kind of period an archive was computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PeriodKind {
    Day,
    Week,
    Month,
    Year,
    Range,
}

impl PeriodKind {
    /// Persisted id of the period kind.
    pub fn id(&self) -> i64 {
        match self {
            PeriodKind::Day => 1,
            PeriodKind::Week => 2,
            PeriodKind::Month => 3,
            PeriodKind::Year => 4,
            PeriodKind::Range => 5,
        }
    }

    pub fn from_id(id: i64) -> Option<Self> {
        match id {
            1 => Some(PeriodKind::Day),
            2 => Some(PeriodKind::Week),
            3 => Some(PeriodKind::Month),
            4 => Some(PeriodKind::Year),
            5 => Some(PeriodKind::Range),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PeriodKind::Day => "day",
            PeriodKind::Week => "week",
            PeriodKind::Month => "month",
            PeriodKind::Year => "year",
            PeriodKind::Range => "range",
        }
    }
}

impl FromStr for PeriodKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "day" => Ok(PeriodKind::Day),
            "week" => Ok(PeriodKind::Week),
            "month" => Ok(PeriodKind::Month),
            "year" => Ok(PeriodKind::Year),
            "range" => Ok(PeriodKind::Range),
            other => Err(format!("unknown period '{}'", other)),
        }
    }
}

impl fmt::Display for PeriodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A concrete period: kind plus inclusive start and end dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Period {
    pub kind: PeriodKind,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Period {
    pub fn day(date: NaiveDate) -> Self {
        Self {
            kind: PeriodKind::Day,
            start: date,
            end: date,
        }
    }

    /// The Monday-to-Sunday week containing `date`.
    pub fn week(date: NaiveDate) -> Self {
        let offset = date.weekday().num_days_from_monday() as u64;
        let start = date - Days::new(offset);
        Self {
            kind: PeriodKind::Week,
            start,
            end: start + Days::new(6),
        }
    }

    /// The calendar month containing `date`.
    pub fn month(date: NaiveDate) -> Self {
        let start = date.with_day(1).unwrap_or(date);
        let end = (start + Months::new(1)) - Days::new(1);
        Self {
            kind: PeriodKind::Month,
            start,
            end,
        }
    }

    /// The calendar year containing `date`.
    pub fn year(date: NaiveDate) -> Self {
        let start = NaiveDate::from_ymd_opt(date.year(), 1, 1).unwrap_or(date);
        let end = NaiveDate::from_ymd_opt(date.year(), 12, 31).unwrap_or(date);
        Self {
            kind: PeriodKind::Year,
            start,
            end,
        }
    }

    /// An arbitrary inclusive range. The bounds are swapped if reversed.
    pub fn range(start: NaiveDate, end: NaiveDate) -> Self {
        let (start, end) = if start <= end { (start, end) } else { (end, start) };
        Self {
            kind: PeriodKind::Range,
            start,
            end,
        }
    }

    /// Builds the period of `kind` containing `date`.
    pub fn containing(kind: PeriodKind, date: NaiveDate) -> Self {
        match kind {
            PeriodKind::Day => Self::day(date),
            PeriodKind::Week => Self::week(date),
            PeriodKind::Month => Self::month(date),
            PeriodKind::Year => Self::year(date),
            PeriodKind::Range => Self::range(date, date),
        }
    }

    /// First instant of the period, as compared against log datetime columns.
    pub fn datetime_start(&self) -> NaiveDateTime {
        self.start.and_time(NaiveTime::MIN)
    }

    /// Last second of the period.
    pub fn datetime_end(&self) -> NaiveDateTime {
        self.end
            .and_hms_opt(23, 59, 59)
            .unwrap_or_else(|| self.end.and_time(NaiveTime::MIN))
    }

    /// `date1,date2` form used as the key of archive id maps.
    pub fn range_string(&self) -> String {
        format!("{},{}", format_date(self.start), format_date(self.end))
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.range_string())
    }
}

pub(crate) fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub(crate) fn format_datetime(dt: NaiveDateTime) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}
