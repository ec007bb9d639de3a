//! Aggregation query builder.
//!
//! Turns dimension and metric requests into aggregate SQL over the raw log
//! tables of one period and set of sites:
//!
//! ```text
//! DimensionQuery ──► LogAggregator::build_*_query ──► BuiltQuery { sql, bind }
//!                        │
//!                        ├─ segment inlined / joined / semi-joined
//!                        └─ or segment materialized once into logtmpsegment<hash>
//! ```
//!
//! # Example
//!
//! ```
//! use chrono::NaiveDate;
//! use rusqlite::Connection;
//! use tally::aggregate::{DimensionQuery, LogAggregator};
//! use tally::period::Period;
//! use tally::segment::SqlSegment;
//!
//! let conn = Connection::open_in_memory().unwrap();
//! let segment = SqlSegment::none();
//! let period = Period::day(NaiveDate::from_ymd_opt(2024, 1, 10).unwrap());
//! let mut aggregator = LogAggregator::new(&conn, period, vec![1], &segment);
//!
//! let query = aggregator
//!     .build_visits_query(&DimensionQuery::new().dimension("referer_type").metrics(["nb_visits"]))
//!     .unwrap();
//! assert!(query.sql.contains("GROUP BY log_visit.referer_type"));
//! ```

mod dimension;
mod error;
mod metrics;
mod ranking;
mod temp_table;

pub use dimension::Dimension;
pub use error::{QueryError, QueryResult};
pub use metrics::{
    metric_selects, select_metrics, selects_from_ranged_column, LogSource, Metric,
    ECOMMERCE_TYPE_CART, ECOMMERCE_TYPE_ORDER, FINGERPRINT_METRIC, ITEM_DIMENSIONS,
};
pub use ranking::{AggregateKind, LimitedRanking, RankingQuery};
pub use temp_table::{
    create_segment_table, segment_table_name, temp_table_exists, SegmentTableRegistry,
    TransactionLevel, LITERAL_INSERT_CHUNK, SEGMENT_TABLE_PREFIX,
};

use std::collections::BTreeMap;

use rusqlite::{params_from_iter, Connection};
use tracing::debug;

use crate::config::ArchivingSettings;
use crate::period::{format_datetime, Period};
use crate::segment::{CompiledSegment, SegmentEvaluator};
use crate::sql::{is_identifier, validate_expression, validate_sql, Join, Query, TableRef};
use crate::value::Value;

use dimension::select_output_name;

/// One result row of an aggregation query, keyed by column name.
pub type LogRow = BTreeMap<String, Value>;

/// SQL text plus its positional bind parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltQuery {
    pub sql: String,
    pub bind: Vec<Value>,
}

/// What to group by and compute.
#[derive(Debug, Clone, Default)]
#[must_use = "builders have no effect until used"]
pub struct DimensionQuery {
    pub dimensions: Vec<Dimension>,
    /// Extra predicate; `%s` is replaced by the source table name.
    pub filter: Option<String>,
    pub filter_bind: Vec<Value>,
    pub additional_selects: Vec<String>,
    /// Requested metrics, `None` for the source's default set.
    pub metrics: Option<Vec<String>>,
    /// Action queries only: columns joined against `log_action.idaction`.
    pub join_log_action_on: Vec<String>,
    /// Action queries only: ORDER BY appended after `nb_actions DESC` when ranking.
    pub secondary_order: Option<String>,
}

impl DimensionQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dimension(mut self, dimension: impl Into<Dimension>) -> Self {
        self.dimensions.push(dimension.into());
        self
    }

    pub fn dimensions<D: Into<Dimension>>(mut self, dimensions: impl IntoIterator<Item = D>) -> Self {
        self.dimensions.extend(dimensions.into_iter().map(Into::into));
        self
    }

    pub fn filter(mut self, predicate: impl Into<String>, bind: Vec<Value>) -> Self {
        self.filter = Some(predicate.into());
        self.filter_bind = bind;
        self
    }

    pub fn select(mut self, select: impl Into<String>) -> Self {
        self.additional_selects.push(select.into());
        self
    }

    pub fn metrics(mut self, metrics: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.metrics = Some(metrics.into_iter().map(Into::into).collect());
        self
    }

    pub fn join_log_action_on(mut self, column: impl Into<String>) -> Self {
        self.join_log_action_on.push(column.into());
        self
    }

    pub fn secondary_order(mut self, order: impl Into<String>) -> Self {
        self.secondary_order = Some(order.into());
        self
    }
}

/// Behaviour switches of a [`LogAggregator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorOptions {
    pub segments_cache: bool,
    pub lower_isolation: bool,
}

impl Default for AggregatorOptions {
    fn default() -> Self {
        Self {
            segments_cache: true,
            lower_isolation: true,
        }
    }
}

impl From<&ArchivingSettings> for AggregatorOptions {
    fn from(settings: &ArchivingSettings) -> Self {
        Self {
            segments_cache: settings.enable_segments_cache,
            lower_isolation: settings.lower_isolation_for_segments,
        }
    }
}

/// Builds and runs aggregation queries for one period, site set and segment.
///
/// Segment tables created by the aggregator live as long as the connection
/// session; call [`LogAggregator::cleanup`] at the end of the archiving run.
pub struct LogAggregator<'a> {
    conn: &'a Connection,
    segment: &'a dyn SegmentEvaluator,
    period: Period,
    site_ids: Vec<i64>,
    table_prefix: String,
    options: AggregatorOptions,
    registry: SegmentTableRegistry,
}

impl<'a> LogAggregator<'a> {
    pub fn new(
        conn: &'a Connection,
        period: Period,
        site_ids: Vec<i64>,
        segment: &'a dyn SegmentEvaluator,
    ) -> Self {
        Self {
            conn,
            segment,
            period,
            site_ids,
            table_prefix: String::new(),
            options: AggregatorOptions::default(),
            registry: SegmentTableRegistry::default(),
        }
    }

    pub fn with_options(mut self, options: AggregatorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.table_prefix = prefix.into();
        self
    }

    pub fn period(&self) -> &Period {
        &self.period
    }

    /// Segment tables this aggregator created and will drop on cleanup.
    pub fn segment_tables(&self) -> impl Iterator<Item = &str> {
        self.registry.tables()
    }

    fn table(&self, name: &str) -> String {
        format!("{}{}", self.table_prefix, name)
    }

    /// `table.datecol BETWEEN ? AND ? AND table.idsite IN (?, ...)`.
    fn general_where(&self, table: &str, date_column: &str) -> QueryResult<(String, Vec<Value>)> {
        if self.site_ids.is_empty() {
            return Err(QueryError::NoSites);
        }

        let placeholders = vec!["?"; self.site_ids.len()].join(", ");
        let sql = format!(
            "{t}.{d} BETWEEN ? AND ? AND {t}.idsite IN ({p})",
            t = table,
            d = date_column,
            p = placeholders
        );

        let mut bind = vec![
            Value::Text(format_datetime(self.period.datetime_start())),
            Value::Text(format_datetime(self.period.datetime_end())),
        ];
        bind.extend(self.site_ids.iter().map(|id| Value::Int(*id)));
        Ok((sql, bind))
    }

    // ------------------------------------------------------------------------
    // Query builders
    // ------------------------------------------------------------------------

    /// Aggregate `log_visit` by the requested dimensions.
    pub fn build_visits_query(&mut self, query: &DimensionQuery) -> QueryResult<BuiltQuery> {
        self.build_visits(query, false)
    }

    fn build_visits(&mut self, query: &DimensionQuery, ranked: bool) -> QueryResult<BuiltQuery> {
        let source = LogSource::Visits;
        let table = self.table(source.table());
        let metrics = select_metrics(source, query.metrics.as_deref())?;

        let mut order_by = Vec::new();
        if ranked && metrics.iter().any(|m| m.name == "nb_visits") {
            order_by.push("`nb_visits` DESC".to_string());
        }

        self.build(source, &table, query, &query.dimensions, &metrics, Vec::new(), order_by, None)
    }

    /// Aggregate `log_link_visit_action`, optionally joined to `log_action`.
    pub fn build_actions_query(&mut self, query: &DimensionQuery) -> QueryResult<BuiltQuery> {
        self.build_actions(query, false)
    }

    fn build_actions(&mut self, query: &DimensionQuery, ranked: bool) -> QueryResult<BuiltQuery> {
        let source = LogSource::Actions;
        let table = self.table(source.table());
        let metrics = select_metrics(source, query.metrics.as_deref())?;

        let action_table = self.table("log_action");
        let several = query.join_log_action_on.len() > 1;
        let mut joins = Vec::with_capacity(query.join_log_action_on.len());
        for (i, column) in query.join_log_action_on.iter().enumerate() {
            if !is_identifier(column) || column.contains('.') {
                return Err(QueryError::InvalidIdentifier(column.clone()));
            }
            let alias = if several {
                format!("log_action{}", i + 1)
            } else {
                "log_action".to_string()
            };
            joins.push(Join::left(
                TableRef::new(&action_table).with_alias(&alias),
                format!("{}.{} = {}.idaction", table, column, alias),
            ));
        }

        let mut order_by = Vec::new();
        if ranked {
            order_by.push("`nb_actions` DESC".to_string());
            if let Some(secondary) = &query.secondary_order {
                validate_sql(&format!("SELECT 1 ORDER BY {}", secondary))
                    .map_err(QueryError::InvalidFragment)?;
                order_by.push(secondary.clone());
            }
        }

        self.build(source, &table, query, &query.dimensions, &metrics, joins, order_by, None)
    }

    /// Aggregate `log_conversion`. Rows are always grouped by `idgoal` first.
    pub fn build_conversions_query(&mut self, query: &DimensionQuery) -> QueryResult<BuiltQuery> {
        let source = LogSource::Conversions;
        let table = self.table(source.table());
        let metrics = select_metrics(source, query.metrics.as_deref())?;

        let mut dimensions = vec![Dimension::column("idgoal")];
        dimensions.extend(query.dimensions.iter().cloned());

        self.build(source, &table, query, &dimensions, &metrics, Vec::new(), Vec::new(), None)
    }

    /// Ecommerce item totals grouped by cart/order and one item attribute.
    pub fn build_ecommerce_items_query(&mut self, dimension: &str) -> QueryResult<BuiltQuery> {
        if !ITEM_DIMENSIONS.contains(&dimension) {
            return Err(QueryError::InvalidDimension {
                dimension: dimension.to_string(),
                reason: format!("expected one of {}", ITEM_DIMENSIONS.join(", ")),
            });
        }

        let source = LogSource::EcommerceItems;
        let table = self.table(source.table());
        let metrics = select_metrics(source, None)?;
        let action_table = self.table("log_action");

        let joins = vec![Join::left(
            TableRef::new(&action_table).with_alias("log_action"),
            format!("{}.{} = log_action.idaction", table, dimension),
        )];
        let dimensions = vec![
            Dimension::column("log_action.name").with_alias("label"),
            Dimension::expr(format!(
                "CASE {}.idorder WHEN '0' THEN {} ELSE {} END",
                table, ECOMMERCE_TYPE_CART, ECOMMERCE_TYPE_ORDER
            ))
            .with_alias("ecommerce_type"),
            Dimension::column(dimension),
        ];
        let query = DimensionQuery::new();
        let deleted = format!("{}.deleted = 0", table);

        self.build(source, &table, &query, &dimensions, &metrics, joins, Vec::new(), Some(deleted))
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        &mut self,
        source: LogSource,
        table: &str,
        query: &DimensionQuery,
        dimensions: &[Dimension],
        metrics: &[&'static Metric],
        joins: Vec<Join>,
        order_by: Vec<String>,
        fixed_filter: Option<String>,
    ) -> QueryResult<BuiltQuery> {
        for dimension in dimensions {
            dimension.validate()?;
        }
        for select in &query.additional_selects {
            validate_select(select)?;
        }

        let additional_names: Vec<String> = query
            .additional_selects
            .iter()
            .filter_map(|s| select_output_name(s))
            .collect();

        let mut selects: Vec<String> = dimensions
            .iter()
            .filter(|d| {
                d.output_name()
                    .map_or(true, |name| !additional_names.iter().any(|n| n == name))
            })
            .map(|d| d.select_sql(table))
            .collect();
        selects.extend(metrics.iter().map(|m| m.select(table)));
        selects.extend(query.additional_selects.iter().cloned());

        let group_by: Vec<String> = dimensions.iter().map(|d| d.group_sql(table)).collect();

        let (mut filter, mut bind) = self.general_where(table, source.datetime_column())?;
        if let Some(fixed) = fixed_filter {
            filter.push_str(" AND ");
            filter.push_str(&fixed);
        }
        if let Some(extra) = query.filter.as_deref().filter(|f| !f.trim().is_empty()) {
            let extra = extra.replace("%s", table);
            validate_expression(&extra).map_err(QueryError::InvalidFragment)?;
            filter.push_str(&format!(" AND ({})", extra));
            bind.extend(query.filter_bind.iter().cloned());
        }

        let sql_query = Query::new()
            .select(selects)
            .group_by(group_by)
            .order_by(order_by);

        let (sql_query, bind) = self.apply_segment(source, table, sql_query, joins, filter, bind)?;
        let sql = sql_query.to_sql();
        debug!(source = source.table(), sql = %sql, "built aggregation query");
        Ok(BuiltQuery { sql, bind })
    }

    /// Restrict `query` to the segment and set its FROM, JOIN and WHERE.
    fn apply_segment(
        &mut self,
        source: LogSource,
        table: &str,
        query: Query,
        joins: Vec<Join>,
        mut filter: String,
        mut bind: Vec<Value>,
    ) -> QueryResult<(Query, Vec<Value>)> {
        if self.segment.is_empty() {
            let query = query.from(TableRef::new(table)).joins(joins).filter(filter);
            return Ok((query, bind));
        }

        let visit_table = self.table(LogSource::Visits.table());

        if self.options.segments_cache {
            let segment_table = self.ensure_segment_table()?;
            let (visit_where, visit_bind) =
                self.general_where(&visit_table, LogSource::Visits.datetime_column())?;

            if filter.starts_with(&visit_where) && bind.starts_with(&visit_bind) {
                let rest = filter[visit_where.len()..].trim_start();
                filter = rest.strip_prefix("AND").unwrap_or(rest).trim().to_string();
                bind.drain(..visit_bind.len());
            }

            let query = query
                .from(TableRef::new(&segment_table))
                .join(Join::inner(
                    TableRef::new(table),
                    format!("{}.idvisit = {}.idvisit", table, segment_table),
                ))
                .joins(joins)
                .filter(filter);
            return Ok((query, bind));
        }

        let compiled = self.segment.compile(&self.site_ids)?;
        let mut joins = joins;

        if compiled.only_uses(&[table]) {
            filter = format!("{} AND ({})", filter, compiled.sql);
            debug!(source = source.table(), "segment inlined");
        } else if compiled.only_uses(&[table, visit_table.as_str()]) {
            if source != LogSource::Visits {
                joins.insert(
                    0,
                    Join::inner(
                        TableRef::new(&visit_table),
                        format!("{}.idvisit = {}.idvisit", visit_table, table),
                    ),
                );
            }
            filter = format!("{} AND ({})", filter, compiled.sql);
            debug!(source = source.table(), "segment joined on log_visit");
        } else {
            let subquery = self.segment_select(&visit_table, &compiled, compiled.sql.clone());
            filter = format!("{} AND {}.idvisit IN ({})", filter, table, subquery.to_sql());
            debug!(source = source.table(), "segment applied as semi-join");
        }
        bind.extend(compiled.bind);

        let query = query.from(TableRef::new(table)).joins(joins).filter(filter);
        Ok((query, bind))
    }

    /// `SELECT DISTINCT log_visit.idvisit` over the segment's tables.
    fn segment_select(&self, visit_table: &str, compiled: &CompiledSegment, filter: String) -> Query {
        let joins = compiled
            .tables
            .iter()
            .filter(|t| t.as_str() != visit_table)
            .map(|t| {
                Join::inner(
                    TableRef::new(t),
                    format!("{}.idvisit = {}.idvisit", t, visit_table),
                )
            });

        Query::new()
            .distinct()
            .select([format!("{}.idvisit AS idvisit", visit_table)])
            .from(TableRef::new(visit_table))
            .joins(joins)
            .filter(filter)
    }

    /// Temporary table of visits matching the segment, created when it is
    /// not on the connection yet.
    fn ensure_segment_table(&mut self) -> QueryResult<String> {
        let visit_table = self.table(LogSource::Visits.table());
        let compiled = self.segment.compile(&self.site_ids)?;
        let (visit_where, mut bind) =
            self.general_where(&visit_table, LogSource::Visits.datetime_column())?;
        bind.extend(compiled.bind.iter().cloned());

        // a sibling aggregator may have dropped a table this one reused
        let name = segment_table_name(&bind, &compiled.sql)?;
        if temp_table_exists(self.conn, &name)? {
            return Ok(name);
        }

        let fill = self
            .segment_select(
                &visit_table,
                &compiled,
                format!("{} AND ({})", visit_where, compiled.sql),
            )
            .order_by([format!("{}.idvisit ASC", visit_table)]);

        if create_segment_table(self.conn, &name, fill, &bind, self.options.lower_isolation)? {
            self.registry.register(name.clone());
        }
        Ok(name)
    }

    // ------------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------------

    pub fn query_visits_by_dimension(&mut self, query: &DimensionQuery) -> QueryResult<Vec<LogRow>> {
        let built = self.build_visits_query(query)?;
        fetch_rows(self.conn, &built.sql, &built.bind)
    }

    pub fn query_actions_by_dimension(&mut self, query: &DimensionQuery) -> QueryResult<Vec<LogRow>> {
        let built = self.build_actions_query(query)?;
        fetch_rows(self.conn, &built.sql, &built.bind)
    }

    pub fn query_conversions_by_dimension(
        &mut self,
        query: &DimensionQuery,
    ) -> QueryResult<Vec<LogRow>> {
        let built = self.build_conversions_query(query)?;
        fetch_rows(self.conn, &built.sql, &built.bind)
    }

    pub fn query_ecommerce_items(&mut self, dimension: &str) -> QueryResult<Vec<LogRow>> {
        let built = self.build_ecommerce_items_query(dimension)?;
        fetch_rows(self.conn, &built.sql, &built.bind)
    }

    /// Visits aggregate truncated by `ranking`. Every selected metric is
    /// summed into the "others" row except `max_actions`, which is maxed.
    pub fn query_visits_ranked(
        &mut self,
        query: &DimensionQuery,
        ranking: &mut dyn RankingQuery,
    ) -> QueryResult<Vec<LogRow>> {
        let built = self.build_visits(query, true)?;
        let metrics = select_metrics(LogSource::Visits, query.metrics.as_deref())?;
        register_ranking_columns(ranking, &metrics);
        ranking.execute(self.conn, &built.sql, &built.bind)
    }

    /// Actions aggregate ordered by `nb_actions` and truncated by `ranking`.
    pub fn query_actions_ranked(
        &mut self,
        query: &DimensionQuery,
        ranking: &mut dyn RankingQuery,
    ) -> QueryResult<Vec<LogRow>> {
        let built = self.build_actions(query, true)?;
        let metrics = select_metrics(LogSource::Actions, query.metrics.as_deref())?;
        register_ranking_columns(ranking, &metrics);
        ranking.execute(self.conn, &built.sql, &built.bind)
    }

    /// Drop every segment table this aggregator created.
    pub fn cleanup(&mut self) -> QueryResult<()> {
        self.registry.drop_all(self.conn)
    }
}

fn register_ranking_columns(ranking: &mut dyn RankingQuery, metrics: &[&'static Metric]) {
    let sums: Vec<&str> = metrics
        .iter()
        .map(|m| m.name)
        .filter(|name| *name != "max_actions")
        .collect();
    ranking.add_column(&sums, AggregateKind::Sum);
    if metrics.iter().any(|m| m.name == "max_actions") {
        ranking.add_column(&["max_actions"], AggregateKind::Max);
    }
}

/// Validate a caller-supplied select item (`expr` or `expr AS alias`).
fn validate_select(select: &str) -> QueryResult<()> {
    let upper = select.to_ascii_uppercase();
    let expr = match upper.rfind(" AS ") {
        Some(pos) => &select[..pos],
        None => select,
    };
    validate_expression(expr).map_err(QueryError::InvalidFragment)
}

/// Run a query and collect its rows by column name.
pub(crate) fn fetch_rows(conn: &Connection, sql: &str, bind: &[Value]) -> QueryResult<Vec<LogRow>> {
    let mut stmt = conn.prepare(sql)?;
    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    let rows = stmt
        .query_map(params_from_iter(bind.iter()), |row| {
            let mut out = LogRow::new();
            for (i, name) in names.iter().enumerate() {
                out.insert(name.clone(), row.get::<_, Value>(i)?);
            }
            Ok(out)
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
