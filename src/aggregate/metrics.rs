//! Metric vocabulary of each log source.
//!
//! Metric SQL is kept as templates where `%s` stands for the (possibly
//! prefixed) source table, the same placeholder callers use in extra
//! filter fragments.

use super::error::{QueryError, QueryResult};

/// Metric that is only selected when explicitly requested: it needs an
/// additional `DISTINCT` aggregate over the fingerprint column.
pub const FINGERPRINT_METRIC: &str = "nb_uniq_fingerprints";

/// `ecommerce_type` value of abandoned carts.
pub const ECOMMERCE_TYPE_CART: i64 = -1;

/// `ecommerce_type` value of orders.
pub const ECOMMERCE_TYPE_ORDER: i64 = 0;

/// Raw log tables aggregation queries read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogSource {
    Visits,
    Actions,
    Conversions,
    EcommerceItems,
}

impl LogSource {
    /// Unprefixed table name.
    pub fn table(&self) -> &'static str {
        match self {
            LogSource::Visits => "log_visit",
            LogSource::Actions => "log_link_visit_action",
            LogSource::Conversions => "log_conversion",
            LogSource::EcommerceItems => "log_conversion_item",
        }
    }

    /// Datetime column the period restriction applies to.
    pub fn datetime_column(&self) -> &'static str {
        match self {
            LogSource::Visits => "visit_last_action_time",
            _ => "server_time",
        }
    }

    pub fn metrics(&self) -> &'static [Metric] {
        match self {
            LogSource::Visits => VISIT_METRICS,
            LogSource::Actions => ACTION_METRICS,
            LogSource::Conversions => CONVERSION_METRICS,
            LogSource::EcommerceItems => ITEM_METRICS,
        }
    }
}

/// One aggregate a source can compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metric {
    pub name: &'static str,
    template: &'static str,
}

impl Metric {
    const fn new(name: &'static str, template: &'static str) -> Self {
        Self { name, template }
    }

    /// Aggregate expression for `table`.
    pub fn expr(&self, table: &str) -> String {
        self.template.replace("%s", table)
    }

    /// Select item aliased to the metric name.
    pub fn select(&self, table: &str) -> String {
        format!("{} AS `{}`", self.expr(table), self.name)
    }
}

pub const VISIT_METRICS: &[Metric] = &[
    Metric::new("nb_uniq_visitors", "count(distinct %s.idvisitor)"),
    Metric::new(FINGERPRINT_METRIC, "count(distinct %s.config_id)"),
    Metric::new("nb_visits", "count(*)"),
    Metric::new("nb_actions", "sum(%s.visit_total_actions)"),
    Metric::new("max_actions", "max(%s.visit_total_actions)"),
    Metric::new("sum_visit_length", "sum(%s.visit_total_time)"),
    Metric::new(
        "bounce_count",
        "sum(case %s.visit_total_actions when 1 then 1 when 0 then 1 else 0 end)",
    ),
    Metric::new(
        "nb_visits_converted",
        "sum(case %s.visit_goal_converted when 1 then 1 else 0 end)",
    ),
    Metric::new("nb_users", "count(distinct %s.user_id)"),
];

pub const ACTION_METRICS: &[Metric] = &[
    Metric::new("nb_visits", "count(distinct %s.idvisit)"),
    Metric::new("nb_uniq_visitors", "count(distinct %s.idvisitor)"),
    Metric::new("nb_actions", "count(*)"),
];

pub const CONVERSION_METRICS: &[Metric] = &[
    Metric::new("nb_conversions", "count(*)"),
    Metric::new("nb_visits_converted", "count(distinct %s.idvisit)"),
    Metric::new("revenue", "ROUND(SUM(%s.revenue), 2)"),
    Metric::new("revenue_subtotal", "ROUND(SUM(%s.revenue_subtotal), 2)"),
    Metric::new("revenue_tax", "ROUND(SUM(%s.revenue_tax), 2)"),
    Metric::new("revenue_shipping", "ROUND(SUM(%s.revenue_shipping), 2)"),
    Metric::new("revenue_discount", "ROUND(SUM(%s.revenue_discount), 2)"),
    Metric::new("items", "SUM(%s.items)"),
];

pub const ITEM_METRICS: &[Metric] = &[
    Metric::new("revenue", "ROUND(SUM(%s.price * %s.quantity), 2)"),
    Metric::new("quantity", "SUM(%s.quantity)"),
    Metric::new("price", "ROUND(SUM(%s.price), 2)"),
    Metric::new("orders", "count(distinct %s.idorder)"),
    Metric::new("nb_visits", "count(distinct %s.idvisit)"),
];

/// Columns of `log_conversion_item` an item report can be grouped by.
pub const ITEM_DIMENSIONS: &[&str] = &[
    "idaction_sku",
    "idaction_name",
    "idaction_category",
    "idaction_category2",
    "idaction_category3",
    "idaction_category4",
    "idaction_category5",
];

/// Metrics selected for a request, in vocabulary order.
///
/// `None` selects every metric except the fingerprint count. Unknown names
/// are rejected.
pub fn select_metrics(
    source: LogSource,
    requested: Option<&[String]>,
) -> QueryResult<Vec<&'static Metric>> {
    let available = source.metrics();

    if let Some(requested) = requested {
        if let Some(unknown) = requested
            .iter()
            .find(|name| !available.iter().any(|m| m.name == name.as_str()))
        {
            return Err(QueryError::UnknownMetric {
                metric: unknown.clone(),
                source_name: source.table().to_string(),
            });
        }
    }

    Ok(available
        .iter()
        .filter(|metric| match requested {
            Some(requested) => requested.iter().any(|name| name == metric.name),
            None => metric.name != FINGERPRINT_METRIC,
        })
        .collect())
}

/// Select items for [`select_metrics`].
pub fn metric_selects(
    source: LogSource,
    table: &str,
    requested: Option<&[String]>,
) -> QueryResult<Vec<String>> {
    Ok(select_metrics(source, requested)?
        .into_iter()
        .map(|metric| metric.select(table))
        .collect())
}

/// Bucketed counts over a numeric column.
///
/// Each `(lower, Some(upper))` gap becomes a `{prefix}{lower}-{upper}`
/// column, a `(lower, None)` gap an open-ended `{prefix}{lower + 1}%2B`
/// column. With `restrict_to_returning`, buckets only count returning visits
/// and an extra `{prefix}new_visits` column counts the others.
pub fn selects_from_ranged_column(
    column: &str,
    ranges: &[(i64, Option<i64>)],
    table: &str,
    prefix: &str,
    restrict_to_returning: bool,
) -> Vec<String> {
    let mut selects = Vec::with_capacity(ranges.len() + 1);
    let mut extra_condition = String::new();

    if restrict_to_returning {
        extra_condition = format!(" and {}.visitor_returning = 1", table);
        selects.push(format!(
            "sum(case when {}.visitor_returning = 0 then 1 else 0 end) AS `{}new_visits`",
            table, prefix
        ));
    }

    for (lower, upper) in ranges {
        match upper {
            Some(upper) => selects.push(format!(
                "sum(case when {t}.{c} between {lo} and {hi}{x} then 1 else 0 end) AS `{p}{lo}-{hi}`",
                t = table,
                c = column,
                lo = lower,
                hi = upper,
                x = extra_condition,
                p = prefix,
            )),
            None => selects.push(format!(
                "sum(case when {t}.{c} > {lo}{x} then 1 else 0 end) AS `{p}{next}%2B`",
                t = table,
                c = column,
                lo = lower,
                x = extra_condition,
                p = prefix,
                next = lower + 1,
            )),
        }
    }

    selects
}
