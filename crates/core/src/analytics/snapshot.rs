use crate::analytics::dividend::{close_as_of, estimate_yield_as_of};
use crate::config::env_or;
use crate::domain::snapshot::{Snapshot, Valuation};
use crate::domain::Ticker;
use crate::market::provider::MarketDataProvider;
use crate::market::types::{InfoField, Period};
use crate::time::today_utc;
use anyhow::Context;
use chrono::NaiveDate;
use futures_util::stream::{self, StreamExt};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::time::Instant;

const DEFAULT_CONCURRENCY: usize = 8;
const DEFAULT_EPS: f64 = 1.0;
const PROGRESS_EVERY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    /// Maximum in-flight per-ticker fetches.
    pub concurrency: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl FetchOptions {
    pub fn from_env() -> Self {
        Self {
            concurrency: env_or("FETCH_CONCURRENCY", DEFAULT_CONCURRENCY).max(1),
        }
    }
}

pub async fn build_snapshot(
    provider: &dyn MarketDataProvider,
    tickers: &[Ticker],
    opts: &FetchOptions,
) -> BTreeMap<Ticker, Snapshot> {
    build_snapshot_as_of(provider, tickers, today_utc(), opts).await
}

/// One snapshot per distinct ticker. Per-ticker failures come back as degraded records.
pub async fn build_snapshot_as_of(
    provider: &dyn MarketDataProvider,
    tickers: &[Ticker],
    as_of: NaiveDate,
    opts: &FetchOptions,
) -> BTreeMap<Ticker, Snapshot> {
    fan_out(
        "snapshot",
        tickers,
        opts,
        |ticker| async move {
            match snapshot_one(provider, &ticker, as_of).await {
                Ok(s) => s,
                Err(err) => {
                    tracing::warn!(ticker = %ticker, error = %err, "snapshot fetch failed; degrading record");
                    Snapshot::degraded(&ticker, format!("{err:#}"))
                }
            }
        },
        Snapshot::is_degraded,
    )
    .await
}

async fn snapshot_one(
    provider: &dyn MarketDataProvider,
    ticker: &str,
    as_of: NaiveDate,
) -> anyhow::Result<Snapshot> {
    let closes = provider
        .get_price(ticker, Period::TrailingYear)
        .await
        .context("price lookup failed")?;
    let price = close_as_of(&closes, as_of)
        .filter(|p| p.is_finite() && *p > 0.0)
        .context("no closing price available")?;

    let name = provider
        .get_info_field_or(ticker, InfoField::ShortName, Value::String(ticker.to_string()))
        .await
        .context("name lookup failed")?;
    let name = name
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(ticker)
        .to_string();

    let eps = provider
        .get_info_field_or(ticker, InfoField::TrailingEps, Value::Null)
        .await
        .context("EPS lookup failed")?;

    let dividend_yield = estimate_yield_as_of(provider, ticker, as_of).await;

    Ok(Snapshot {
        ticker: ticker.to_string(),
        name,
        price: Some(price),
        dividend_yield,
        eps: Some(eps_or_default(&eps)),
        error: None,
    })
}

/// Trailing P/E and P/B per distinct ticker; each field is `None` when unavailable.
pub async fn fetch_valuations(
    provider: &dyn MarketDataProvider,
    tickers: &[Ticker],
    opts: &FetchOptions,
) -> BTreeMap<Ticker, Valuation> {
    fan_out(
        "valuation",
        tickers,
        opts,
        |ticker| async move {
            let trailing_pe = numeric_field(provider, &ticker, InfoField::TrailingPe).await;
            let price_to_book = numeric_field(provider, &ticker, InfoField::PriceToBook).await;
            Valuation {
                ticker,
                trailing_pe,
                price_to_book,
            }
        },
        |v: &Valuation| v.trailing_pe.is_none() && v.price_to_book.is_none(),
    )
    .await
}

async fn numeric_field(
    provider: &dyn MarketDataProvider,
    ticker: &str,
    field: InfoField,
) -> Option<f64> {
    match provider.get_info_field(ticker, field).await {
        Ok(v) => v.as_ref().and_then(value_as_f64),
        Err(err) => {
            tracing::debug!(ticker, field = field.key(), error = %err, "info field unavailable");
            None
        }
    }
}

/// Runs `fetch` for each distinct ticker with bounded concurrency and keys results by
/// ticker as they complete.
async fn fan_out<T, F, Fut>(
    label: &'static str,
    tickers: &[Ticker],
    opts: &FetchOptions,
    fetch: F,
    is_failure: impl Fn(&T) -> bool,
) -> BTreeMap<Ticker, T>
where
    F: Fn(Ticker) -> Fut,
    Fut: Future<Output = T>,
{
    let mut seen = BTreeSet::new();
    let unique: Vec<Ticker> = tickers
        .iter()
        .filter(|t| seen.insert(t.as_str()))
        .cloned()
        .collect();

    let total = unique.len();
    let started = Instant::now();
    let mut out = BTreeMap::new();
    let mut failures: usize = 0;

    let mut results = stream::iter(unique)
        .map(|ticker| {
            let fut = fetch(ticker.clone());
            async move { (ticker, fut.await) }
        })
        .buffer_unordered(opts.concurrency.max(1));

    while let Some((ticker, item)) = results.next().await {
        if is_failure(&item) {
            failures += 1;
        }
        out.insert(ticker, item);

        let n = out.len();
        if n == 1 || n == total || n % PROGRESS_EVERY == 0 {
            tracing::info!(
                label,
                processed = n,
                total,
                failures,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "market fetch progress"
            );
        }
    }

    out
}

/// Trailing EPS, substituting 1.0 for a missing, zero, or non-numeric value.
pub fn eps_or_default(v: &Value) -> f64 {
    value_as_f64(v)
        .filter(|x| x.is_finite() && *x != 0.0)
        .unwrap_or(DEFAULT_EPS)
}

pub fn value_as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|x| x.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::fixture::StaticMarketData;
    use crate::market::types::{DailyClose, DividendEvent};
    use serde_json::json;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn fixture() -> StaticMarketData {
        StaticMarketData::default()
            .with_closes("KO", vec![DailyClose { date: d(2025, 6, 30), close: 60.0 }])
            .with_dividends("KO", vec![DividendEvent { date: d(2025, 6, 13), amount: 1.8 }])
            .with_info("KO", InfoField::ShortName, json!("Coca-Cola"))
            .with_info("KO", InfoField::TrailingEps, json!(2.47))
            .with_info("KO", InfoField::TrailingPe, json!(24.3))
            .with_closes("O", vec![DailyClose { date: d(2025, 6, 30), close: 57.0 }])
            .with_info("O", InfoField::TrailingEps, json!(0))
            .with_info("O", InfoField::PriceToBook, json!("1.35"))
            .with_closes("T", vec![DailyClose { date: d(2025, 6, 30), close: 28.0 }])
            .with_failure("T")
    }

    fn tickers(list: &[&str]) -> Vec<Ticker> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn builds_one_record_per_ticker_and_degrades_failures() {
        let data = fixture();
        let snaps = build_snapshot_as_of(
            &data,
            &tickers(&["KO", "O", "T", "KO", "NOPE"]),
            d(2025, 6, 30),
            &FetchOptions { concurrency: 2 },
        )
        .await;

        assert_eq!(snaps.len(), 4);

        let ko = &snaps["KO"];
        assert_eq!(ko.name, "Coca-Cola");
        assert_eq!(ko.price, Some(60.0));
        assert_eq!(ko.eps, Some(2.47));
        assert!((ko.dividend_yield - 0.03).abs() < 1e-12);
        assert!(!ko.is_degraded());

        let o = &snaps["O"];
        assert_eq!(o.name, "O");
        assert_eq!(o.eps, Some(1.0));
        assert_eq!(o.dividend_yield, 0.0);

        for bad in ["T", "NOPE"] {
            let s = &snaps[bad];
            assert!(s.is_degraded());
            assert_eq!(s.price, None);
            assert_eq!(s.dividend_yield, 0.0);
            assert!(!s.error.as_deref().unwrap_or_default().is_empty());
        }
        assert!(snaps["NOPE"]
            .error
            .as_deref()
            .unwrap()
            .contains("no closing price available"));
    }

    #[tokio::test]
    async fn valuations_are_optional_per_field() {
        let data = fixture();
        let vals =
            fetch_valuations(&data, &tickers(&["KO", "O", "T"]), &FetchOptions::default()).await;

        assert_eq!(vals["KO"].trailing_pe, Some(24.3));
        assert_eq!(vals["KO"].price_to_book, None);
        assert_eq!(vals["O"].price_to_book, Some(1.35));
        assert_eq!(vals["T"].trailing_pe, None);
        assert_eq!(vals["T"].price_to_book, None);
    }

    /// Answers later for tickers earlier in the alphabet, so completions arrive reversed.
    struct ReverseDelay {
        inner: StaticMarketData,
        order: Vec<Ticker>,
    }

    impl ReverseDelay {
        async fn pause(&self, ticker: &str) {
            let rank = self.order.iter().position(|t| t == ticker).unwrap_or(0);
            let steps = (self.order.len() - rank) as u64;
            tokio::time::sleep(std::time::Duration::from_millis(10 * steps)).await;
        }
    }

    #[async_trait::async_trait]
    impl MarketDataProvider for ReverseDelay {
        fn provider_name(&self) -> &'static str {
            "reverse_delay"
        }

        async fn get_price(
            &self,
            ticker: &str,
            period: Period,
        ) -> anyhow::Result<Vec<DailyClose>> {
            self.pause(ticker).await;
            self.inner.get_price(ticker, period).await
        }

        async fn get_dividends(
            &self,
            ticker: &str,
            period: Period,
        ) -> anyhow::Result<Vec<DividendEvent>> {
            self.inner.get_dividends(ticker, period).await
        }

        async fn get_info_field(
            &self,
            ticker: &str,
            field: InfoField,
        ) -> anyhow::Result<Option<Value>> {
            self.inner.get_info_field(ticker, field).await
        }

        async fn get_price_history(
            &self,
            tickers: &[Ticker],
            start: NaiveDate,
            end: NaiveDate,
        ) -> anyhow::Result<crate::market::types::PriceTable> {
            self.inner.get_price_history(tickers, start, end).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_order_completions_stay_keyed_by_ticker() {
        let order = tickers(&["A", "B", "C", "D", "E"]);
        let mut inner = StaticMarketData::default();
        for (i, t) in order.iter().enumerate() {
            let close = 10.0 * (i + 1) as f64;
            inner = inner.with_closes(t, vec![DailyClose { date: d(2025, 6, 30), close }]);
        }
        let data = ReverseDelay { inner, order: order.clone() };

        let snaps =
            build_snapshot_as_of(&data, &order, d(2025, 6, 30), &FetchOptions { concurrency: 5 })
                .await;

        assert_eq!(snaps.len(), order.len());
        for (i, t) in order.iter().enumerate() {
            assert_eq!(snaps[t].ticker, *t);
            assert_eq!(snaps[t].price, Some(10.0 * (i + 1) as f64));
        }
    }

    #[tokio::test]
    async fn pinned_date_reports_the_close_on_that_date() {
        let data = fixture().with_closes(
            "KO",
            vec![
                DailyClose { date: d(2024, 12, 31), close: 50.0 },
                DailyClose { date: d(2025, 6, 30), close: 60.0 },
            ],
        );
        let snaps =
            build_snapshot_as_of(&data, &tickers(&["KO"]), d(2025, 1, 2), &FetchOptions::default())
                .await;
        assert_eq!(snaps["KO"].price, Some(50.0));
    }

    #[test]
    fn falsy_eps_becomes_one() {
        assert_eq!(eps_or_default(&Value::Null), 1.0);
        assert_eq!(eps_or_default(&json!(0.0)), 1.0);
        assert_eq!(eps_or_default(&json!("")), 1.0);
        assert_eq!(eps_or_default(&json!(-0.8)), -0.8);
    }
}
