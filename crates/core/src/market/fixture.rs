use crate::domain::Ticker;
use crate::market::provider::MarketDataProvider;
use crate::market::types::{DailyClose, DividendEvent, InfoField, Period, PriceTable};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// In-memory market data, loadable from a JSON file. Used for offline runs and tests.
///
/// ```json
/// {
///   "closes": {"KO": [{"date": "2025-01-02", "close": 61.5}]},
///   "dividends": {"KO": [{"date": "2024-11-29", "amount": 0.485}]},
///   "info": {"KO": {"shortName": "Coca-Cola", "trailingEps": 2.47}},
///   "failing": ["BROKEN"]
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticMarketData {
    #[serde(default)]
    pub closes: BTreeMap<Ticker, Vec<DailyClose>>,
    #[serde(default)]
    pub dividends: BTreeMap<Ticker, Vec<DividendEvent>>,
    #[serde(default)]
    pub info: BTreeMap<Ticker, BTreeMap<String, Value>>,
    /// Tickers for which every call fails.
    #[serde(default)]
    pub failing: BTreeSet<Ticker>,
}

impl StaticMarketData {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read market data fixture {}", path.display()))?;
        let mut data: Self = serde_json::from_str(&text)
            .with_context(|| format!("invalid market data fixture {}", path.display()))?;
        for closes in data.closes.values_mut() {
            closes.sort_by_key(|c| c.date);
        }
        Ok(data)
    }

    pub fn with_closes(mut self, ticker: &str, mut closes: Vec<DailyClose>) -> Self {
        closes.sort_by_key(|c| c.date);
        self.closes.insert(ticker.to_string(), closes);
        self
    }

    pub fn with_dividends(mut self, ticker: &str, events: Vec<DividendEvent>) -> Self {
        self.dividends.insert(ticker.to_string(), events);
        self
    }

    pub fn with_info(mut self, ticker: &str, field: InfoField, value: Value) -> Self {
        self.info
            .entry(ticker.to_string())
            .or_default()
            .insert(field.key().to_string(), value);
        self
    }

    pub fn with_failure(mut self, ticker: &str) -> Self {
        self.failing.insert(ticker.to_string());
        self
    }

    /// Most recent close date across all tickers; the natural reference date for
    /// offline runs.
    pub fn last_date(&self) -> Option<NaiveDate> {
        self.closes.values().flatten().map(|c| c.date).max()
    }

    fn check(&self, ticker: &str) -> Result<()> {
        anyhow::ensure!(
            !self.failing.contains(ticker),
            "market data unavailable for {ticker}"
        );
        Ok(())
    }
}

#[async_trait::async_trait]
impl MarketDataProvider for StaticMarketData {
    fn provider_name(&self) -> &'static str {
        "static_fixture"
    }

    async fn get_price(&self, ticker: &str, period: Period) -> Result<Vec<DailyClose>> {
        self.check(ticker)?;
        let closes = self.closes.get(ticker).cloned().unwrap_or_default();
        Ok(match period {
            Period::LastDay => closes.last().copied().into_iter().collect(),
            Period::TrailingYear => match closes.last() {
                Some(last) => {
                    let start = crate::time::trailing_year_start(last.date);
                    closes.into_iter().filter(|c| c.date > start).collect()
                }
                None => closes,
            },
        })
    }

    async fn get_dividends(&self, ticker: &str, _period: Period) -> Result<Vec<DividendEvent>> {
        self.check(ticker)?;
        // The yield estimator applies its own window, so the fixture returns everything.
        Ok(self.dividends.get(ticker).cloned().unwrap_or_default())
    }

    async fn get_info_field(&self, ticker: &str, field: InfoField) -> Result<Option<Value>> {
        self.check(ticker)?;
        Ok(self
            .info
            .get(ticker)
            .and_then(|fields| fields.get(field.key()))
            .cloned())
    }

    async fn get_price_history(
        &self,
        tickers: &[Ticker],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PriceTable> {
        let mut table = PriceTable::new(tickers.to_vec());
        for (col, ticker) in tickers.iter().enumerate() {
            if self.failing.contains(ticker) {
                continue;
            }
            for c in self.closes.get(ticker).into_iter().flatten() {
                if c.date >= start && c.date <= end {
                    table.insert(c.date, col, c.close);
                }
            }
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, m, day).unwrap()
    }

    #[tokio::test]
    async fn returns_last_close_for_last_day() {
        let data = StaticMarketData::default().with_closes(
            "KO",
            vec![
                DailyClose { date: d(1, 3), close: 62.0 },
                DailyClose { date: d(1, 2), close: 61.0 },
            ],
        );

        let closes = data.get_price("KO", Period::LastDay).await.unwrap();
        assert_eq!(closes, vec![DailyClose { date: d(1, 3), close: 62.0 }]);
        assert!(data.get_price("PG", Period::LastDay).await.unwrap().is_empty());
    }

    #[test]
    fn last_date_spans_every_ticker() {
        assert_eq!(StaticMarketData::default().last_date(), None);
        let data = StaticMarketData::default()
            .with_closes("KO", vec![DailyClose { date: d(3, 3), close: 62.0 }])
            .with_closes("O", vec![DailyClose { date: d(6, 30), close: 57.0 }]);
        assert_eq!(data.last_date(), Some(d(6, 30)));
    }

    #[tokio::test]
    async fn failing_tickers_error_and_drop_out_of_history() {
        let data = StaticMarketData::default()
            .with_closes("KO", vec![DailyClose { date: d(1, 2), close: 61.0 }])
            .with_closes("T", vec![DailyClose { date: d(1, 2), close: 17.0 }])
            .with_failure("T");

        assert!(data.get_price("T", Period::LastDay).await.is_err());
        assert!(data.get_info_field("T", InfoField::ShortName).await.is_err());

        let tickers = vec!["KO".to_string(), "T".to_string()];
        let table = data
            .get_price_history(&tickers, d(1, 1), d(12, 31))
            .await
            .unwrap();
        assert_eq!(table.rows[&d(1, 2)], vec![Some(61.0), None]);
    }

    #[tokio::test]
    async fn info_field_or_falls_back_on_missing_and_null() {
        let data = StaticMarketData::default()
            .with_info("KO", InfoField::ShortName, json!("Coca-Cola"))
            .with_info("KO", InfoField::TrailingPe, Value::Null);

        let name = data
            .get_info_field_or("KO", InfoField::ShortName, json!("KO"))
            .await
            .unwrap();
        assert_eq!(name, json!("Coca-Cola"));

        let pe = data
            .get_info_field_or("KO", InfoField::TrailingPe, json!(0))
            .await
            .unwrap();
        assert_eq!(pe, json!(0));

        let eps = data
            .get_info_field_or("KO", InfoField::TrailingEps, json!(1.0))
            .await
            .unwrap();
        assert_eq!(eps, json!(1.0));
    }

    #[test]
    fn deserializes_fixture_shape() {
        let v = json!({
            "closes": {"KO": [{"date": "2025-01-02", "close": 61.5}]},
            "info": {"KO": {"shortName": "Coca-Cola"}},
            "failing": ["BROKEN"]
        });
        let data: StaticMarketData = serde_json::from_value(v).unwrap();
        assert_eq!(data.closes["KO"].len(), 1);
        assert!(data.dividends.is_empty());
        assert!(data.failing.contains("BROKEN"));
    }

    #[test]
    fn loads_the_bundled_fixture() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../fixtures/market.json");
        let data = StaticMarketData::from_json_file(path).unwrap();
        assert!(data.closes["KO"].windows(2).all(|w| w[0].date < w[1].date));
        assert!(data.failing.contains("T"));
        assert!(StaticMarketData::from_json_file("does/not/exist.json").is_err());
    }
}
