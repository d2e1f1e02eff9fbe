use crate::config::env_or;
use crate::domain::contract::split_tickers;
use crate::domain::snapshot::Snapshot;
use crate::domain::Ticker;
use std::cmp::Ordering;
use std::collections::BTreeMap;

pub const DEFAULT_POOL: [&str; 7] = ["KO", "O", "T", "PG", "PEP", "VYM", "SCHD"];
pub const DEFAULT_TOP_N: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecommendOptions {
    /// Candidate tickers screened for dividend yield.
    pub pool: Vec<Ticker>,
    pub top_n: usize,
}

impl Default for RecommendOptions {
    fn default() -> Self {
        Self {
            pool: DEFAULT_POOL.iter().map(|t| t.to_string()).collect(),
            top_n: DEFAULT_TOP_N,
        }
    }
}

impl RecommendOptions {
    /// `RECOMMEND_POOL` (comma separated) and `RECOMMEND_TOP_N`, falling back to the
    /// built-in pool of dividend payers.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let pool = std::env::var("RECOMMEND_POOL")
            .ok()
            .map(|s| split_tickers(&s))
            .filter(|p| !p.is_empty())
            .map(|p| p.into_iter().map(|t| t.to_ascii_uppercase()).collect())
            .unwrap_or(defaults.pool);

        Self {
            pool,
            top_n: env_or("RECOMMEND_TOP_N", defaults.top_n).max(1),
        }
    }
}

/// Highest-yielding healthy tickers, best first. Ties break by ticker.
pub fn recommend_tickers(snapshots: &BTreeMap<Ticker, Snapshot>, top_n: usize) -> Vec<Ticker> {
    let mut ranked: Vec<&Snapshot> = snapshots
        .values()
        .filter(|s| !s.is_degraded() && s.dividend_yield.is_finite() && s.dividend_yield > 0.0)
        .collect();

    ranked.sort_by(|a, b| {
        b.dividend_yield
            .partial_cmp(&a.dividend_yield)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.ticker.cmp(&b.ticker))
    });

    ranked
        .into_iter()
        .take(top_n)
        .map(|s| s.ticker.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(ticker: &str, dividend_yield: f64) -> Snapshot {
        Snapshot {
            ticker: ticker.to_string(),
            name: ticker.to_string(),
            price: Some(50.0),
            dividend_yield,
            eps: Some(1.0),
            error: None,
        }
    }

    fn map(items: Vec<Snapshot>) -> BTreeMap<Ticker, Snapshot> {
        items.into_iter().map(|s| (s.ticker.clone(), s)).collect()
    }

    #[test]
    fn ranks_by_yield_and_skips_non_payers() {
        let snaps = map(vec![
            snap("KO", 0.031),
            snap("O", 0.056),
            snap("T", 0.062),
            snap("VYM", 0.0),
            snap("PEP", 0.031),
            Snapshot::degraded("SCHD", "timeout"),
        ]);

        assert_eq!(recommend_tickers(&snaps, 3), vec!["T", "O", "KO"]);
        assert_eq!(recommend_tickers(&snaps, 10), vec!["T", "O", "KO", "PEP"]);
    }

    #[test]
    fn empty_when_nothing_pays() {
        let snaps = map(vec![snap("A", 0.0), Snapshot::degraded("B", "down")]);
        assert!(recommend_tickers(&snaps, 5).is_empty());
    }

    #[test]
    fn default_pool_matches_the_documented_list() {
        let opts = RecommendOptions::default();
        assert_eq!(opts.pool.len(), 7);
        assert_eq!(opts.pool[0], "KO");
        assert_eq!(opts.top_n, 5);
    }
}
