//! Tally CLI - inspect archives and aggregation queries
//!
//! Usage:
//!   tally init
//!   tally sql <visits|actions|conversions> --dimension <d>... --from <date> --to <date>
//!   tally status --site <id> --period <period> --date <date> [--plugin <name>]
//!
//! Examples:
//!   tally sql visits --dimension referer_type --site 1 --from 2024-01-01 --to 2024-01-31
//!   tally status --site 1 --period day --date 2024-01-10 --plugin VisitsSummary

use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use rusqlite::Connection;
use std::process::ExitCode;
use tally::aggregate::{AggregatorOptions, DimensionQuery, LogAggregator};
use tally::archive::{ArchiveParams, ArchiveSelector, ArchiveStore};
use tally::config::Settings;
use tally::period::{Period, PeriodKind};
use tally::segment::SqlSegment;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Tally - archiving and aggregation core for web analytics")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the raw log tables in the configured database
    Init,

    /// Print the aggregation SQL for a set of dimensions
    Sql {
        /// Log source to aggregate
        source: SourceArg,

        /// Dimension to group by (repeatable)
        #[arg(short, long = "dimension", required = true)]
        dimensions: Vec<String>,

        /// Site id (repeatable)
        #[arg(short, long = "site", default_value = "1")]
        sites: Vec<i64>,

        /// First day of the period (YYYY-MM-DD)
        #[arg(long)]
        from: NaiveDate,

        /// Last day of the period (YYYY-MM-DD)
        #[arg(long)]
        to: NaiveDate,

        /// Segment SQL predicate over the log tables
        #[arg(long)]
        segment: Option<String>,
    },

    /// Show the completed archive selected for a site and period
    Status {
        /// Site id
        #[arg(long)]
        site: i64,

        /// Period kind
        #[arg(long, default_value = "day")]
        period: PeriodArg,

        /// Any day of the period (YYYY-MM-DD)
        #[arg(long)]
        date: NaiveDate,

        /// Plugin the archive was computed for
        #[arg(long)]
        plugin: Option<String>,

        /// Segment definition
        #[arg(long, default_value = "")]
        segment: String,
    },
}

#[derive(Clone, ValueEnum)]
enum SourceArg {
    Visits,
    Actions,
    Conversions,
}

#[derive(Clone, ValueEnum)]
enum PeriodArg {
    Day,
    Week,
    Month,
    Year,
}

impl From<PeriodArg> for PeriodKind {
    fn from(arg: PeriodArg) -> Self {
        match arg {
            PeriodArg::Day => PeriodKind::Day,
            PeriodArg::Week => PeriodKind::Week,
            PeriodArg::Month => PeriodKind::Month,
            PeriodArg::Year => PeriodKind::Year,
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => cmd_init(),
        Commands::Sql {
            source,
            dimensions,
            sites,
            from,
            to,
            segment,
        } => cmd_sql(source, dimensions, sites, from, to, segment),
        Commands::Status {
            site,
            period,
            date,
            plugin,
            segment,
        } => cmd_status(site, period, date, plugin, segment),
    }
}

fn open_store() -> Result<ArchiveStore, ExitCode> {
    let settings = match Settings::load() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error loading settings: {}", e);
            return Err(ExitCode::FAILURE);
        }
    };
    ArchiveStore::from_settings(&settings.storage).map_err(|e| {
        eprintln!("Error opening database: {}", e);
        ExitCode::FAILURE
    })
}

fn cmd_init() -> ExitCode {
    let store = match open_store() {
        Ok(store) => store,
        Err(code) => return code,
    };
    match store.init_log_schema() {
        Ok(()) => {
            println!("OK: log tables created");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error creating log tables: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn cmd_sql(
    source: SourceArg,
    dimensions: Vec<String>,
    sites: Vec<i64>,
    from: NaiveDate,
    to: NaiveDate,
    segment: Option<String>,
) -> ExitCode {
    let segment = match segment {
        Some(sql) => match SqlSegment::new(sql.clone(), sql, Vec::new()) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("Invalid segment: {}", e);
                return ExitCode::FAILURE;
            }
        },
        None => SqlSegment::none(),
    };

    let period = if from == to {
        Period::day(from)
    } else {
        Period::range(from, to)
    };

    // Nothing is executed; an in-memory connection is enough to build SQL.
    let conn = match Connection::open_in_memory() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error opening connection: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let mut aggregator = LogAggregator::new(&conn, period, sites, &segment).with_options(
        AggregatorOptions {
            segments_cache: false,
            lower_isolation: false,
        },
    );

    let query = DimensionQuery::new().dimensions(dimensions);
    let built = match source {
        SourceArg::Visits => aggregator.build_visits_query(&query),
        SourceArg::Actions => aggregator.build_actions_query(&query),
        SourceArg::Conversions => aggregator.build_conversions_query(&query),
    };

    match built {
        Ok(built) => {
            println!("{}", built.sql);
            println!();
            for (i, value) in built.bind.iter().enumerate() {
                println!("-- ?{} = {}", i + 1, value);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Query error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn cmd_status(
    site: i64,
    period: PeriodArg,
    date: NaiveDate,
    plugin: Option<String>,
    segment: String,
) -> ExitCode {
    let store = match open_store() {
        Ok(store) => store,
        Err(code) => return code,
    };

    let period = Period::containing(period.into(), date);
    let mut params = ArchiveParams::new(site, period, &segment);
    if let Some(plugin) = &plugin {
        params = params.with_plugin(plugin);
    }

    match ArchiveSelector::new(&store).get_archive_id_and_visits(&params) {
        Ok(Some(found)) => {
            println!("Period:           {}", period);
            println!("Archive id:       {}", found.id_archive);
            println!("Visits:           {}", found.visits);
            println!("Converted visits: {}", found.visits_converted);
            ExitCode::SUCCESS
        }
        Ok(None) => {
            println!("No completed archive for site {} ({})", site, period);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error reading archives: {}", e);
            ExitCode::FAILURE
        }
    }
}
