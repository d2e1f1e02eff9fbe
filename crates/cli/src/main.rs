use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use divplan_core::analytics::growth::{growth_series, Granularity};
use divplan_core::domain::contract::{normalize_tickers, split_tickers, PlanRequest};
use divplan_core::domain::portfolio::RiskPosture;
use divplan_core::market::StaticMarketData;
use divplan_core::planner::{Planner, PlannerOptions};

#[derive(Debug, Parser)]
#[command(name = "divplan", about = "Dividend portfolio planning from the command line")]
struct Args {
    /// Read market data from a JSON fixture instead of the HTTP provider.
    #[arg(long, global = true)]
    fixture: Option<String>,

    /// Reference date (YYYY-MM-DD). Defaults to the fixture's last close date when a
    /// fixture is used, otherwise today's UTC date.
    #[arg(long, global = true)]
    as_of_date: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Price, name, EPS and trailing dividend yield per ticker.
    Snapshot {
        /// Comma separated tickers, e.g. KO,O,PG.
        #[arg(long)]
        tickers: String,
    },
    /// Trailing P/E and price-to-book per ticker.
    Valuations {
        #[arg(long)]
        tickers: String,
    },
    /// Highest-yielding tickers from a candidate pool.
    Recommend {
        /// Comma separated candidates. Defaults to RECOMMEND_POOL or the built-in pool.
        #[arg(long)]
        pool: Option<String>,
        #[arg(long)]
        top: Option<usize>,
    },
    /// Compounding growth series for a contribution plan.
    Growth {
        #[arg(long, default_value_t = 0.0)]
        current: f64,
        #[arg(long, default_value_t = 0.0)]
        monthly: f64,
        #[arg(long)]
        years: u32,
        /// Annual rate, e.g. 0.05.
        #[arg(long)]
        rate: f64,
        #[arg(long, default_value = "yearly")]
        granularity: Granularity,
    },
    /// Optimize weights and check whether the payout goal is reachable.
    Plan {
        #[arg(long)]
        tickers: String,
        #[arg(long)]
        goal_monthly: Option<f64>,
        #[arg(long)]
        years: Option<u32>,
        #[arg(long)]
        risk: Option<RiskPosture>,
        #[arg(long)]
        current: Option<f64>,
        #[arg(long)]
        monthly: Option<f64>,
        #[arg(long)]
        tax_rate: Option<f64>,
        #[arg(long)]
        risk_free_rate: Option<f64>,
        #[arg(long)]
        max_weight: Option<f64>,
        #[arg(long)]
        lookback_years: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let mut settings = divplan_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();
    if let Some(path) = args.fixture.clone() {
        settings.market_data_fixture = Some(path);
    }

    let as_of = default_as_of(args.as_of_date.as_deref(), &settings)?;

    let res = run(args.command, &settings, as_of).await;
    if let Err(err) = &res {
        sentry_anyhow::capture_anyhow(err);
        tracing::error!(error = %err, "command failed");
    }
    res
}

async fn run(
    command: Command,
    settings: &divplan_core::config::Settings,
    as_of: chrono::NaiveDate,
) -> anyhow::Result<()> {
    match command {
        Command::Growth {
            current,
            monthly,
            years,
            rate,
            granularity,
        } => {
            let points: Vec<_> = growth_series(granularity, current, monthly, years, rate).collect();
            print_json(&points)
        }
        Command::Snapshot { tickers } => {
            let planner = planner(settings)?;
            let tickers = normalize_tickers(&split_tickers(&tickers))?;
            print_json(&planner.snapshots_as_of(&tickers, as_of).await)
        }
        Command::Valuations { tickers } => {
            let planner = planner(settings)?;
            let tickers = normalize_tickers(&split_tickers(&tickers))?;
            print_json(&planner.valuations(&tickers).await)
        }
        Command::Recommend { pool, top } => {
            let planner = planner(settings)?;
            let pool = pool
                .as_deref()
                .map(|p| normalize_tickers(&split_tickers(p)))
                .transpose()?;
            let rec = planner.recommend_as_of(pool.as_deref(), top, as_of).await?;
            print_json(&rec)
        }
        Command::Plan {
            tickers,
            goal_monthly,
            years,
            risk,
            current,
            monthly,
            tax_rate,
            risk_free_rate,
            max_weight,
            lookback_years,
        } => {
            let req = PlanRequest {
                tickers: split_tickers(&tickers),
                goal_monthly,
                years,
                risk,
                current,
                monthly,
                tax_rate,
                risk_free_rate,
                max_weight,
                lookback_years,
            };
            let (tickers, inputs) = req.validate_and_into_inputs()?;
            let planner = planner(settings)?;
            let report = planner.plan_as_of(&tickers, &inputs, as_of).await?;
            tracing::info!(
                required_principal = %report.verdict.required_principal_label(),
                achieved = report.verdict.achieved,
                "goal verdict"
            );
            print_json(&report)
        }
    }
}

fn default_as_of(
    arg: Option<&str>,
    settings: &divplan_core::config::Settings,
) -> anyhow::Result<chrono::NaiveDate> {
    match (arg, settings.market_data_fixture.as_deref()) {
        (None, Some(path)) => StaticMarketData::from_json_file(path)?
            .last_date()
            .with_context(|| format!("fixture {path} has no closing prices")),
        (arg, _) => divplan_core::time::resolve_as_of_date(arg, chrono::Utc::now()),
    }
}

fn planner(settings: &divplan_core::config::Settings) -> anyhow::Result<Planner> {
    let provider = divplan_core::market::provider_from_settings(settings).context(
        "market data provider is not configured (set DATA_PROVIDER_BASE_URL or --fixture)",
    )?;
    Ok(Planner::new(provider, PlannerOptions::from_env()))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("failed to serialize output")?;
    println!("{out}");
    Ok(())
}

fn init_sentry(settings: &divplan_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
