use crate::analytics::goal::evaluate_goal;
use crate::analytics::growth::{future_value, yearly_growth};
use crate::analytics::optimize::{evaluate_portfolio, optimize, OptimizerSettings};
use crate::analytics::returns::estimate_return_risk;
use crate::analytics::snapshot::{build_snapshot_as_of, fetch_valuations, FetchOptions};
use crate::cache::TtlCache;
use crate::config::env_or;
use crate::domain::plan::{Allocation, PlanInputs, PlanReport, Recommendation};
use crate::domain::portfolio::ReturnRiskModel;
use crate::domain::snapshot::{Snapshot, Valuation};
use crate::domain::Ticker;
use crate::error::EngineError;
use crate::market::provider::MarketDataProvider;
use crate::recommend::{recommend_tickers, RecommendOptions};
use crate::time::today_utc;
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_CACHE_TTL_SECS: u64 = 3600;

#[derive(Debug, Clone)]
pub struct PlannerOptions {
    pub fetch: FetchOptions,
    /// Lifetime of cached snapshot maps and return/risk models. Zero disables caching.
    pub cache_ttl: Duration,
    pub optimizer: OptimizerSettings,
    pub recommend: RecommendOptions,
}

impl Default for PlannerOptions {
    fn default() -> Self {
        Self {
            fetch: FetchOptions::default(),
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            optimizer: OptimizerSettings::default(),
            recommend: RecommendOptions::default(),
        }
    }
}

impl PlannerOptions {
    pub fn from_env() -> Self {
        Self {
            fetch: FetchOptions::from_env(),
            cache_ttl: Duration::from_secs(env_or("CACHE_TTL_SECS", DEFAULT_CACHE_TTL_SECS)),
            optimizer: OptimizerSettings::default(),
            recommend: RecommendOptions::from_env(),
        }
    }
}

type SnapshotKey = (Vec<Ticker>, NaiveDate);
type ModelKey = (Vec<Ticker>, u32, NaiveDate);

/// Runs the pipeline snapshot + return/risk → weights → yield/return → growth → verdict.
///
/// Holds no selection state: every call names its tickers. Snapshot maps and models are
/// memoized for `cache_ttl`, keyed by their inputs.
pub struct Planner {
    provider: Arc<dyn MarketDataProvider>,
    options: PlannerOptions,
    snapshot_cache: TtlCache<SnapshotKey, BTreeMap<Ticker, Snapshot>>,
    model_cache: TtlCache<ModelKey, ReturnRiskModel>,
}

impl Planner {
    pub fn new(provider: Arc<dyn MarketDataProvider>, options: PlannerOptions) -> Self {
        Self {
            snapshot_cache: TtlCache::new(options.cache_ttl),
            model_cache: TtlCache::new(options.cache_ttl),
            provider,
            options,
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.provider_name()
    }

    pub async fn snapshots(&self, tickers: &[Ticker]) -> BTreeMap<Ticker, Snapshot> {
        self.snapshots_as_of(tickers, today_utc()).await
    }

    pub async fn snapshots_as_of(
        &self,
        tickers: &[Ticker],
        as_of: NaiveDate,
    ) -> BTreeMap<Ticker, Snapshot> {
        // The map is keyed by ticker, so request order does not matter here.
        let key: Vec<Ticker> = tickers
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        self.snapshot_cache
            .get_or_insert_with((key.clone(), as_of), || {
                build_snapshot_as_of(self.provider.as_ref(), &key, as_of, &self.options.fetch)
            })
            .await
    }

    pub async fn valuations(&self, tickers: &[Ticker]) -> BTreeMap<Ticker, Valuation> {
        fetch_valuations(self.provider.as_ref(), tickers, &self.options.fetch).await
    }

    /// Screens `pool` (or the configured pool) and keeps the `top_n` best yields.
    pub async fn recommend(
        &self,
        pool: Option<&[Ticker]>,
        top_n: Option<usize>,
    ) -> anyhow::Result<Recommendation> {
        self.recommend_as_of(pool, top_n, today_utc()).await
    }

    pub async fn recommend_as_of(
        &self,
        pool: Option<&[Ticker]>,
        top_n: Option<usize>,
        as_of: NaiveDate,
    ) -> anyhow::Result<Recommendation> {
        let pool = pool.unwrap_or(&self.options.recommend.pool);
        let top_n = top_n.unwrap_or(self.options.recommend.top_n);

        let snapshots = self.snapshots_as_of(pool, as_of).await;
        let tickers = recommend_tickers(&snapshots, top_n);
        anyhow::ensure!(
            !tickers.is_empty(),
            "no ticker with a positive dividend yield among {} candidates",
            snapshots.len()
        );

        tracing::info!(candidates = snapshots.len(), picked = tickers.len(), "tickers recommended");
        Ok(Recommendation { tickers, snapshots })
    }

    pub async fn return_risk(
        &self,
        tickers: &[Ticker],
        years: u32,
    ) -> anyhow::Result<ReturnRiskModel> {
        self.return_risk_as_of(tickers, years, today_utc()).await
    }

    pub async fn return_risk_as_of(
        &self,
        tickers: &[Ticker],
        years: u32,
        as_of: NaiveDate,
    ) -> anyhow::Result<ReturnRiskModel> {
        let tickers = dedupe(tickers);
        self.model_cache
            .get_or_try_insert_with((tickers.clone(), years, as_of), || {
                estimate_return_risk(self.provider.as_ref(), &tickers, years, as_of)
            })
            .await
    }

    pub async fn plan(&self, tickers: &[Ticker], inputs: &PlanInputs) -> anyhow::Result<PlanReport> {
        self.plan_as_of(tickers, inputs, today_utc()).await
    }

    pub async fn plan_as_of(
        &self,
        tickers: &[Ticker],
        inputs: &PlanInputs,
        as_of: NaiveDate,
    ) -> anyhow::Result<PlanReport> {
        let tickers = dedupe(tickers);
        if tickers.is_empty() {
            return Err(EngineError::EmptyUniverse.into());
        }

        let (snapshots, model) = tokio::join!(
            self.snapshots_as_of(&tickers, as_of),
            self.return_risk_as_of(&tickers, inputs.lookback_years, as_of),
        );
        let model = model?;

        let settings = self.options.optimizer.with_max_weight(inputs.max_weight);
        let weights = optimize(
            &model.expected_return,
            &model.covariance,
            inputs.posture,
            inputs.risk_free_rate,
            &settings,
        )?;
        let stats = evaluate_portfolio(
            weights.as_slice(),
            &model.expected_return,
            &model.covariance,
            inputs.risk_free_rate,
        );

        // Weights follow model order; yields are joined by ticker, never by position.
        let allocations: Vec<Allocation> = model
            .tickers
            .iter()
            .zip(weights.as_slice())
            .zip(&model.expected_return)
            .map(|((ticker, &weight), &expected_return)| {
                let snap = snapshots.get(ticker);
                Allocation {
                    ticker: ticker.clone(),
                    name: snap.map_or_else(|| ticker.clone(), |s| s.name.clone()),
                    weight,
                    dividend_yield: snap.map_or(0.0, |s| s.dividend_yield),
                    expected_return,
                }
            })
            .collect();

        let portfolio_yield: f64 = allocations.iter().map(|a| a.weight * a.dividend_yield).sum();
        let projected = future_value(
            inputs.current,
            inputs.monthly,
            f64::from(inputs.years),
            stats.expected_return,
        );
        let verdict = evaluate_goal(projected, inputs.goal_monthly, inputs.tax_rate, portfolio_yield);

        let degraded: Vec<Ticker> = model
            .tickers
            .iter()
            .filter(|t| snapshots.get(*t).map_or(true, Snapshot::is_degraded))
            .cloned()
            .collect();
        if !degraded.is_empty() {
            tracing::warn!(degraded = ?degraded, "plan uses degraded snapshots with zero yield");
        }

        tracing::info!(
            posture = %inputs.posture,
            assets = model.len(),
            expected_return = stats.expected_return,
            portfolio_yield,
            achieved = verdict.achieved,
            "plan evaluated"
        );

        Ok(PlanReport {
            as_of,
            posture: inputs.posture,
            allocations,
            stats,
            portfolio_yield,
            verdict,
            yearly_growth: yearly_growth(
                inputs.current,
                inputs.monthly,
                inputs.years,
                stats.expected_return,
            )
            .collect(),
            degraded,
            observations: model.observations,
        })
    }
}

fn dedupe(tickers: &[Ticker]) -> Vec<Ticker> {
    let mut seen = BTreeSet::new();
    tickers
        .iter()
        .filter(|t| seen.insert(t.as_str()))
        .cloned()
        .collect()
}
