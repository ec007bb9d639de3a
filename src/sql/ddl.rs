//! DDL (Data Definition Language) support.
//!
//! Builders for the statements tally issues itself: archive shard tables,
//! the archive id sequence, segment temporary tables and the raw log schema.
//!
//! # Examples
//!
//! ```
//! use tally::sql::ddl::{ColumnDef, CreateTable, DataType};
//!
//! let table = CreateTable::new("logtmpsegment0123")
//!     .temporary()
//!     .if_not_exists()
//!     .column(ColumnDef::new("idvisit", DataType::Integer).not_null());
//!
//! assert_eq!(
//!     table.to_sql(),
//!     "CREATE TEMPORARY TABLE IF NOT EXISTS logtmpsegment0123 (idvisit INTEGER NOT NULL)"
//! );
//! ```

/// SQLite column types used by tally tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Integer,
    Real,
    /// NUMERIC affinity keeps integers as integers and decimals as reals.
    Numeric,
    Text,
    Blob,
}

impl DataType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            DataType::Integer => "INTEGER",
            DataType::Real => "REAL",
            DataType::Numeric => "NUMERIC",
            DataType::Text => "TEXT",
            DataType::Blob => "BLOB",
        }
    }
}

/// Column definition.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "builders have no effect until used"]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    pub not_null: bool,
    pub default: Option<String>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            not_null: false,
            default: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<String>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn to_sql(&self) -> String {
        let mut sql = format!("{} {}", self.name, self.data_type.as_sql());
        if self.not_null {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = &self.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(default);
        }
        sql
    }
}

// ============================================================================
// CREATE TABLE
// ============================================================================

/// CREATE TABLE statement.
#[derive(Debug, Clone)]
#[must_use = "DDL statements have no effect until converted to SQL with to_sql()"]
pub struct CreateTable {
    pub temporary: bool,
    pub if_not_exists: bool,
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub primary_key: Vec<String>,
}

impl CreateTable {
    /// Create a new CREATE TABLE statement.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            temporary: false,
            if_not_exists: false,
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
        }
    }

    /// Session-scoped table.
    pub fn temporary(mut self) -> Self {
        self.temporary = true;
        self
    }

    /// Add IF NOT EXISTS clause.
    pub fn if_not_exists(mut self) -> Self {
        self.if_not_exists = true;
        self
    }

    /// Add a column definition.
    pub fn column(mut self, col: ColumnDef) -> Self {
        self.columns.push(col);
        self
    }

    /// Add multiple column definitions.
    pub fn columns(mut self, cols: impl IntoIterator<Item = ColumnDef>) -> Self {
        self.columns.extend(cols);
        self
    }

    pub fn primary_key(mut self, cols: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.primary_key = cols.into_iter().map(Into::into).collect();
        self
    }

    pub fn to_sql(&self) -> String {
        let mut sql = String::from("CREATE ");
        if self.temporary {
            sql.push_str("TEMPORARY ");
        }
        sql.push_str("TABLE ");
        if self.if_not_exists {
            sql.push_str("IF NOT EXISTS ");
        }
        sql.push_str(&self.name);

        let mut parts: Vec<String> = self.columns.iter().map(ColumnDef::to_sql).collect();
        if !self.primary_key.is_empty() {
            parts.push(format!("PRIMARY KEY ({})", self.primary_key.join(", ")));
        }
        sql.push_str(&format!(" ({})", parts.join(", ")));
        sql
    }
}

// ============================================================================
// CREATE INDEX / DROP TABLE
// ============================================================================

/// CREATE INDEX statement.
#[derive(Debug, Clone)]
#[must_use = "DDL statements have no effect until converted to SQL with to_sql()"]
pub struct CreateIndex {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
}

impl CreateIndex {
    pub fn new(
        name: impl Into<String>,
        table: impl Into<String>,
        columns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn to_sql(&self) -> String {
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
            self.name,
            self.table,
            self.columns.join(", ")
        )
    }
}

/// DROP TABLE statement.
#[derive(Debug, Clone)]
#[must_use = "DDL statements have no effect until converted to SQL with to_sql()"]
pub struct DropTable {
    pub name: String,
    pub temporary: bool,
}

impl DropTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            temporary: false,
        }
    }

    /// Only drop from the temporary schema.
    pub fn temporary(mut self) -> Self {
        self.temporary = true;
        self
    }

    pub fn to_sql(&self) -> String {
        if self.temporary {
            format!("DROP TABLE IF EXISTS temp.{}", self.name)
        } else {
            format!("DROP TABLE IF EXISTS {}", self.name)
        }
    }
}

// ============================================================================
// Schemas
// ============================================================================

/// Columns shared by numeric and blob archive shards.
///
/// The two shapes only differ in the `value` column type.
pub fn archive_table(name: &str, value_type: DataType) -> CreateTable {
    CreateTable::new(name)
        .if_not_exists()
        .columns([
            ColumnDef::new("idarchive", DataType::Integer).not_null(),
            ColumnDef::new("name", DataType::Text).not_null(),
            ColumnDef::new("idsite", DataType::Integer),
            ColumnDef::new("date1", DataType::Text),
            ColumnDef::new("date2", DataType::Text),
            ColumnDef::new("period", DataType::Integer),
            ColumnDef::new("ts_archived", DataType::Text),
            ColumnDef::new("value", value_type),
        ])
        .primary_key(["idarchive", "name"])
}

/// Index used by archive selection on every shard.
pub fn archive_table_index(name: &str) -> CreateIndex {
    CreateIndex::new(
        format!("index_idsite_dates_period_{}", name),
        name,
        ["idsite", "date1", "date2", "period", "ts_archived"],
    )
}

/// Archive id sequence, one row per numeric shard.
pub fn sequence_table(name: &str) -> CreateTable {
    CreateTable::new(name)
        .if_not_exists()
        .column(ColumnDef::new("name", DataType::Text).not_null())
        .column(ColumnDef::new("value", DataType::Integer).not_null())
        .primary_key(["name"])
}

/// Raw log tables the aggregation queries read from.
pub fn log_schema(prefix: &str) -> Vec<String> {
    let t = |name: &str| format!("{}{}", prefix, name);

    let mut statements = vec![
        CreateTable::new(t("log_visit"))
            .if_not_exists()
            .columns([
                ColumnDef::new("idvisit", DataType::Integer).not_null(),
                ColumnDef::new("idsite", DataType::Integer).not_null(),
                ColumnDef::new("idvisitor", DataType::Text),
                ColumnDef::new("config_id", DataType::Text),
                ColumnDef::new("user_id", DataType::Text),
                ColumnDef::new("visit_first_action_time", DataType::Text),
                ColumnDef::new("visit_last_action_time", DataType::Text).not_null(),
                ColumnDef::new("visit_total_actions", DataType::Integer).default_value("0"),
                ColumnDef::new("visit_total_time", DataType::Integer).default_value("0"),
                ColumnDef::new("visit_goal_converted", DataType::Integer).default_value("0"),
                ColumnDef::new("visitor_returning", DataType::Integer).default_value("0"),
                ColumnDef::new("visitor_days_since_last", DataType::Integer),
                ColumnDef::new("referer_type", DataType::Integer),
                ColumnDef::new("referer_name", DataType::Text),
                ColumnDef::new("location_country", DataType::Text),
                ColumnDef::new("config_browser_name", DataType::Text),
            ])
            .primary_key(["idvisit"])
            .to_sql(),
        CreateTable::new(t("log_link_visit_action"))
            .if_not_exists()
            .columns([
                ColumnDef::new("idlink_va", DataType::Integer).not_null(),
                ColumnDef::new("idsite", DataType::Integer).not_null(),
                ColumnDef::new("idvisit", DataType::Integer).not_null(),
                ColumnDef::new("idvisitor", DataType::Text),
                ColumnDef::new("server_time", DataType::Text).not_null(),
                ColumnDef::new("idaction_url", DataType::Integer),
                ColumnDef::new("idaction_name", DataType::Integer),
                ColumnDef::new("time_spent", DataType::Integer).default_value("0"),
            ])
            .primary_key(["idlink_va"])
            .to_sql(),
        CreateTable::new(t("log_conversion"))
            .if_not_exists()
            .columns([
                ColumnDef::new("idvisit", DataType::Integer).not_null(),
                ColumnDef::new("idsite", DataType::Integer).not_null(),
                ColumnDef::new("idgoal", DataType::Integer).not_null(),
                ColumnDef::new("buster", DataType::Integer).not_null().default_value("0"),
                ColumnDef::new("idorder", DataType::Text),
                ColumnDef::new("server_time", DataType::Text).not_null(),
                ColumnDef::new("revenue", DataType::Real),
                ColumnDef::new("revenue_subtotal", DataType::Real),
                ColumnDef::new("revenue_tax", DataType::Real),
                ColumnDef::new("revenue_shipping", DataType::Real),
                ColumnDef::new("revenue_discount", DataType::Real),
                ColumnDef::new("items", DataType::Integer),
                ColumnDef::new("referer_type", DataType::Integer),
            ])
            .primary_key(["idvisit", "idgoal", "buster"])
            .to_sql(),
        CreateTable::new(t("log_conversion_item"))
            .if_not_exists()
            .columns([
                ColumnDef::new("idsite", DataType::Integer).not_null(),
                ColumnDef::new("idvisit", DataType::Integer).not_null(),
                ColumnDef::new("idorder", DataType::Text).not_null(),
                ColumnDef::new("idaction_sku", DataType::Integer),
                ColumnDef::new("idaction_name", DataType::Integer),
                ColumnDef::new("idaction_category", DataType::Integer),
                ColumnDef::new("idaction_category2", DataType::Integer),
                ColumnDef::new("idaction_category3", DataType::Integer),
                ColumnDef::new("idaction_category4", DataType::Integer),
                ColumnDef::new("idaction_category5", DataType::Integer),
                ColumnDef::new("price", DataType::Real),
                ColumnDef::new("quantity", DataType::Integer),
                ColumnDef::new("deleted", DataType::Integer).default_value("0"),
                ColumnDef::new("server_time", DataType::Text).not_null(),
            ])
            .primary_key(["idvisit", "idorder", "idaction_sku"])
            .to_sql(),
        CreateTable::new(t("log_action"))
            .if_not_exists()
            .columns([
                ColumnDef::new("idaction", DataType::Integer).not_null(),
                ColumnDef::new("name", DataType::Text),
                ColumnDef::new("type", DataType::Integer),
            ])
            .primary_key(["idaction"])
            .to_sql(),
    ];

    statements.push(
        CreateIndex::new(
            t("index_log_visit_site_datetime"),
            t("log_visit"),
            ["idsite", "visit_last_action_time"],
        )
        .to_sql(),
    );
    statements.push(
        CreateIndex::new(
            t("index_log_link_visit_action_site_time"),
            t("log_link_visit_action"),
            ["idsite", "server_time"],
        )
        .to_sql(),
    );

    statements
}
