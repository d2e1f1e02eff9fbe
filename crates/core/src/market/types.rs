use crate::domain::Ticker;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Lookback window for per-ticker price and dividend queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Period {
    #[serde(rename = "1d")]
    LastDay,
    #[serde(rename = "1y")]
    TrailingYear,
}

impl Period {
    pub fn as_query(&self) -> &'static str {
        match self {
            Period::LastDay => "1d",
            Period::TrailingYear => "1y",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_query())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyClose {
    pub date: NaiveDate,
    pub close: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DividendEvent {
    /// Ex-dividend date.
    pub date: NaiveDate,
    /// Cash amount per share.
    pub amount: f64,
}

/// Descriptive fields the engine reads from a provider's info record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InfoField {
    ShortName,
    TrailingEps,
    TrailingPe,
    PriceToBook,
}

impl InfoField {
    pub fn key(&self) -> &'static str {
        match self {
            InfoField::ShortName => "shortName",
            InfoField::TrailingEps => "trailingEps",
            InfoField::TrailingPe => "trailingPE",
            InfoField::PriceToBook => "priceToBook",
        }
    }
}

/// Daily closes for several tickers keyed by date. Cells are optional because a
/// ticker may not trade (or may not be reported) on every date.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceTable {
    pub tickers: Vec<Ticker>,
    pub rows: BTreeMap<NaiveDate, Vec<Option<f64>>>,
}

impl PriceTable {
    pub fn new(tickers: Vec<Ticker>) -> Self {
        Self {
            tickers,
            rows: BTreeMap::new(),
        }
    }

    /// Builds a table from per-ticker series. Tickers absent from `series` get an empty
    /// column, which the alignment step turns into zero usable rows.
    pub fn from_series(tickers: &[Ticker], series: &BTreeMap<Ticker, Vec<DailyClose>>) -> Self {
        let mut table = Self::new(tickers.to_vec());
        for (col, ticker) in tickers.iter().enumerate() {
            let Some(closes) = series.get(ticker) else {
                continue;
            };
            for c in closes {
                table.insert(c.date, col, c.close);
            }
        }
        table
    }

    pub fn insert(&mut self, date: NaiveDate, col: usize, close: f64) {
        let width = self.tickers.len();
        if col >= width {
            return;
        }
        let row = self.rows.entry(date).or_insert_with(|| vec![None; width]);
        row[col] = Some(close);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Dates on which every ticker has a usable (finite, positive) close, ascending.
    pub fn aligned_rows(&self) -> Vec<(NaiveDate, Vec<f64>)> {
        self.rows
            .iter()
            .filter_map(|(date, row)| {
                if row.len() != self.tickers.len() {
                    return None;
                }
                let prices = row
                    .iter()
                    .map(|p| p.filter(|v| v.is_finite() && *v > 0.0))
                    .collect::<Option<Vec<f64>>>()?;
                Some((*date, prices))
            })
            .collect()
    }
}
