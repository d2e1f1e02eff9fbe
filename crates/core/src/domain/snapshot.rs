use crate::domain::Ticker;
use serde::{Deserialize, Serialize};

/// Point-in-time market view of one ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub ticker: Ticker,
    pub name: String,
    /// Latest close; `None` when the price could not be fetched.
    pub price: Option<f64>,
    /// Trailing twelve-month dividends over the latest close. Never negative.
    pub dividend_yield: f64,
    /// Trailing EPS; `None` only on degraded records.
    pub eps: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Snapshot {
    pub fn degraded(ticker: &str, error: impl Into<String>) -> Self {
        let error = error.into();
        let error = if error.trim().is_empty() {
            "unknown market data error".to_string()
        } else {
            error
        };

        Self {
            ticker: ticker.to_string(),
            name: ticker.to_string(),
            price: None,
            dividend_yield: 0.0,
            eps: None,
            error: Some(error),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.price.is_none()
            || self
                .error
                .as_deref()
                .is_some_and(|e| !e.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Valuation {
    pub ticker: Ticker,
    pub trailing_pe: Option<f64>,
    pub price_to_book: Option<f64>,
}
