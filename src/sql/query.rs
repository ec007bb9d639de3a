//! Query builder - construct SELECT statements with a fluent API.
//!
//! Aggregation queries are assembled from SQL fragments (dimension
//! expressions, metric aggregates, caller-supplied predicates), so the
//! builder stores fragments rather than an expression tree.

// =============================================================================
// Table Reference
// =============================================================================

/// A table reference with optional alias.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "builders have no effect until used"]
pub struct TableRef {
    pub table: String,
    pub alias: Option<String>,
}

impl TableRef {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            alias: None,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Name other clauses use to refer to this table.
    pub fn reference(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.table)
    }

    pub fn to_sql(&self) -> String {
        match &self.alias {
            Some(alias) if alias != &self.table => format!("{} AS {}", self.table, alias),
            _ => self.table.clone(),
        }
    }
}

// =============================================================================
// Joins
// =============================================================================

/// Type of join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
}

/// A JOIN clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Join {
    pub join_type: JoinType,
    pub table: TableRef,
    pub on: String,
}

impl Join {
    pub fn inner(table: TableRef, on: impl Into<String>) -> Self {
        Self {
            join_type: JoinType::Inner,
            table,
            on: on.into(),
        }
    }

    pub fn left(table: TableRef, on: impl Into<String>) -> Self {
        Self {
            join_type: JoinType::Left,
            table,
            on: on.into(),
        }
    }

    pub fn to_sql(&self) -> String {
        let keyword = match self.join_type {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left => "LEFT JOIN",
        };
        format!("{} {} ON {}", keyword, self.table.to_sql(), self.on)
    }
}

// =============================================================================
// Query
// =============================================================================

/// A SELECT statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[must_use = "Query has no effect until converted to SQL with to_sql()"]
pub struct Query {
    pub distinct: bool,
    pub select: Vec<String>,
    pub from: Option<TableRef>,
    pub joins: Vec<Join>,
    pub filter: Option<String>,
    pub group_by: Vec<String>,
    pub order_by: Vec<String>,
    pub limit: Option<u64>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn select(mut self, exprs: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.select.extend(exprs.into_iter().map(Into::into));
        self
    }

    pub fn from(mut self, table: TableRef) -> Self {
        self.from = Some(table);
        self
    }

    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    pub fn joins(mut self, joins: impl IntoIterator<Item = Join>) -> Self {
        self.joins.extend(joins);
        self
    }

    /// Set the WHERE clause. An empty predicate leaves the clause out.
    pub fn filter(mut self, predicate: impl Into<String>) -> Self {
        let predicate = predicate.into();
        self.filter = if predicate.trim().is_empty() {
            None
        } else {
            Some(predicate)
        };
        self
    }

    pub fn group_by(mut self, exprs: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.group_by.extend(exprs.into_iter().map(Into::into));
        self
    }

    pub fn order_by(mut self, exprs: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.order_by.extend(exprs.into_iter().map(Into::into));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `table` is already the FROM table or one of the joins.
    pub fn references_table(&self, table: &str) -> bool {
        self.from.as_ref().is_some_and(|t| t.reference() == table)
            || self.joins.iter().any(|j| j.table.reference() == table)
    }

    /// Render the statement, one clause per line.
    pub fn to_sql(&self) -> String {
        let mut sql = String::from("SELECT ");
        if self.distinct {
            sql.push_str("DISTINCT ");
        }
        if self.select.is_empty() {
            sql.push('*');
        } else {
            sql.push_str(&self.select.join(", "));
        }

        if let Some(from) = &self.from {
            sql.push_str("\nFROM ");
            sql.push_str(&from.to_sql());
            for join in &self.joins {
                sql.push(' ');
                sql.push_str(&join.to_sql());
            }
        }

        if let Some(filter) = &self.filter {
            sql.push_str("\nWHERE ");
            sql.push_str(filter);
        }

        if !self.group_by.is_empty() {
            sql.push_str("\nGROUP BY ");
            sql.push_str(&self.group_by.join(", "));
        }

        if !self.order_by.is_empty() {
            sql.push_str("\nORDER BY ");
            sql.push_str(&self.order_by.join(", "));
        }

        if let Some(limit) = self.limit {
            sql.push_str(&format!("\nLIMIT {}", limit));
        }

        sql
    }
}
