//! Group-by dimensions of aggregation queries.

use crate::sql::{is_identifier, validate_expression};

use super::error::{QueryError, QueryResult};

/// A column or expression an aggregation query groups by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dimension {
    pub expr: String,
    pub alias: Option<String>,
}

impl Dimension {
    /// A plain column of the source table (or a qualified `table.column`).
    pub fn column(name: impl Into<String>) -> Self {
        Self {
            expr: name.into(),
            alias: None,
        }
    }

    /// A SQL expression, used verbatim.
    pub fn expr(expr: impl Into<String>) -> Self {
        Self::column(expr)
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Expressions with a function call or a `CASE` are never table-prefixed.
    pub fn is_complex(&self) -> bool {
        self.expr.contains('(')
            || self
                .expr
                .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
                .any(|word| word.eq_ignore_ascii_case("case"))
    }

    /// Expression as it appears in GROUP BY.
    pub fn group_sql(&self, table: &str) -> String {
        if self.is_complex() || self.expr.contains('.') {
            self.expr.clone()
        } else {
            format!("{}.{}", table, self.expr)
        }
    }

    /// Select item, aliased when an alias was given.
    pub fn select_sql(&self, table: &str) -> String {
        match &self.alias {
            Some(alias) => format!("{} AS `{}`", self.group_sql(table), alias),
            None => self.group_sql(table),
        }
    }

    /// Name of the result column, when it can be known without running the query.
    pub fn output_name(&self) -> Option<&str> {
        match &self.alias {
            Some(alias) => Some(alias),
            None if self.is_complex() => None,
            None => self.expr.rsplit('.').next(),
        }
    }

    pub fn validate(&self) -> QueryResult<()> {
        if let Some(alias) = &self.alias {
            if !is_identifier(alias) || alias.contains('.') {
                return Err(QueryError::InvalidIdentifier(alias.clone()));
            }
        }

        if self.is_complex() {
            validate_expression(&self.expr).map_err(|reason| QueryError::InvalidDimension {
                dimension: self.expr.clone(),
                reason,
            })
        } else if is_identifier(&self.expr) {
            Ok(())
        } else {
            Err(QueryError::InvalidDimension {
                dimension: self.expr.clone(),
                reason: "expected a column name".to_string(),
            })
        }
    }
}

impl From<&str> for Dimension {
    fn from(name: &str) -> Self {
        Dimension::column(name)
    }
}

impl From<String> for Dimension {
    fn from(name: String) -> Self {
        Dimension::column(name)
    }
}

/// Output name of a raw select item: its alias, or the bare column name.
pub(crate) fn select_output_name(select: &str) -> Option<String> {
    let trimmed = select.trim();
    let upper = trimmed.to_ascii_uppercase();
    let name = match upper.rfind(" AS ") {
        Some(pos) => trimmed[pos + 4..].trim(),
        None if is_identifier(trimmed) => trimmed.rsplit('.').next().unwrap_or(trimmed),
        None => return None,
    };
    Some(name.trim_matches('`').trim_matches('"').to_string())
}
