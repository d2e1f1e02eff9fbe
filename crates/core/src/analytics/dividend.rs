use crate::market::provider::MarketDataProvider;
use crate::market::types::{DailyClose, DividendEvent, Period};
use crate::time::{today_utc, trailing_year_start};
use chrono::NaiveDate;

/// Trailing dividend yield as of today. Never fails: any retrieval problem or unusable
/// price yields `0.0`.
pub async fn estimate_yield(provider: &dyn MarketDataProvider, ticker: &str) -> f64 {
    estimate_yield_as_of(provider, ticker, today_utc()).await
}

pub async fn estimate_yield_as_of(
    provider: &dyn MarketDataProvider,
    ticker: &str,
    as_of: NaiveDate,
) -> f64 {
    match trailing_yield(provider, ticker, as_of).await {
        Ok(y) => y,
        Err(err) => {
            tracing::debug!(ticker, error = %err, "dividend yield unavailable; using 0");
            0.0
        }
    }
}

async fn trailing_yield(
    provider: &dyn MarketDataProvider,
    ticker: &str,
    as_of: NaiveDate,
) -> anyhow::Result<f64> {
    let events = provider.get_dividends(ticker, Period::TrailingYear).await?;
    let closes = provider.get_price(ticker, Period::TrailingYear).await?;
    Ok(yield_from(trailing_dividends(&events, as_of), close_as_of(&closes, as_of)))
}

/// Sum of dividends with `as_of - 365d < date <= as_of`.
pub fn trailing_dividends(events: &[DividendEvent], as_of: NaiveDate) -> f64 {
    let start = trailing_year_start(as_of);
    events
        .iter()
        .filter(|e| e.date > start && e.date <= as_of)
        .map(|e| e.amount)
        .filter(|a| a.is_finite())
        .sum()
}

/// Latest close on or before `as_of`; later closes are ignored.
pub fn close_as_of(closes: &[DailyClose], as_of: NaiveDate) -> Option<f64> {
    closes
        .iter()
        .filter(|c| c.date <= as_of)
        .max_by_key(|c| c.date)
        .map(|c| c.close)
}

pub fn yield_from(paid: f64, price: Option<f64>) -> f64 {
    match price {
        // An empty dividend sum is -0.0, which must not leak out as a signed zero.
        Some(p) if p.is_finite() && p > 0.0 && paid.is_finite() && paid > 0.0 => paid / p,
        _ => 0.0,
    }
}
