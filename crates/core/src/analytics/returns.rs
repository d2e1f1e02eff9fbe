use crate::domain::portfolio::ReturnRiskModel;
use crate::domain::Ticker;
use crate::error::EngineError;
use crate::market::provider::MarketDataProvider;
use crate::market::types::PriceTable;
use crate::time::lookback_start;
use anyhow::Context;
use chrono::NaiveDate;

pub const TRADING_DAYS: f64 = 252.0;

/// A sample standard deviation needs two returns, i.e. three aligned dates.
pub const MIN_RETURNS: usize = 2;

/// Annualized return/risk statistics over the `years` ending at `as_of`. Column order
/// follows `tickers`.
pub async fn estimate_return_risk(
    provider: &dyn MarketDataProvider,
    tickers: &[Ticker],
    years: u32,
    as_of: NaiveDate,
) -> anyhow::Result<ReturnRiskModel> {
    if tickers.is_empty() {
        return Err(EngineError::EmptyUniverse.into());
    }

    let start = lookback_start(as_of, years);
    let table = provider
        .get_price_history(tickers, start, as_of)
        .await
        .with_context(|| format!("price history lookup failed ({start}..={as_of})"))?;

    let model = model_from_prices(&table)?;
    tracing::info!(
        tickers = model.len(),
        raw_rows = table.len(),
        observations = model.observations,
        %start,
        %as_of,
        "return/risk model estimated"
    );
    Ok(model)
}

pub fn model_from_prices(table: &PriceTable) -> Result<ReturnRiskModel, EngineError> {
    let n = table.tickers.len();
    if n == 0 {
        return Err(EngineError::EmptyUniverse);
    }

    let rows = table.aligned_rows();
    if rows.len() < MIN_RETURNS + 1 {
        return Err(EngineError::InsufficientData {
            required: MIN_RETURNS + 1,
            actual: rows.len(),
        });
    }

    let returns: Vec<Vec<f64>> = rows
        .windows(2)
        .map(|w| {
            let (prev, cur) = (&w[0].1, &w[1].1);
            prev.iter().zip(cur).map(|(p0, p1)| p1 / p0 - 1.0).collect()
        })
        .collect();
    let m = returns.len();

    let mean: Vec<f64> = (0..n)
        .map(|j| returns.iter().map(|r| r[j]).sum::<f64>() / m as f64)
        .collect();

    let mut covariance = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in i..n {
            let s: f64 = returns
                .iter()
                .map(|r| (r[i] - mean[i]) * (r[j] - mean[j]))
                .sum();
            let c = s / (m - 1) as f64 * TRADING_DAYS;
            covariance[i][j] = c;
            covariance[j][i] = c;
        }
    }

    let volatility = (0..n).map(|i| covariance[i][i].max(0.0).sqrt()).collect();
    let expected_return = mean.iter().map(|mu| mu * TRADING_DAYS).collect();

    Ok(ReturnRiskModel {
        tickers: table.tickers.clone(),
        expected_return,
        volatility,
        covariance,
        observations: m,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::fixture::StaticMarketData;
    use crate::market::types::DailyClose;
    use approx::assert_relative_eq;
    use chrono::Duration;

    fn day(i: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 1).unwrap() + Duration::days(i)
    }

    fn table(tickers: &[&str], cols: &[&[f64]]) -> PriceTable {
        let mut t = PriceTable::new(tickers.iter().map(|s| s.to_string()).collect());
        for (c, series) in cols.iter().enumerate() {
            for (i, p) in series.iter().enumerate() {
                t.insert(day(i as i64), c, *p);
            }
        }
        t
    }

    #[test]
    fn constant_prices_have_zero_return_and_risk() {
        let model = model_from_prices(&table(&["A"], &[&[10.0; 30]])).unwrap();
        assert_eq!(model.expected_return, vec![0.0]);
        assert_eq!(model.volatility, vec![0.0]);
        assert_eq!(model.covariance, vec![vec![0.0]]);
        assert_eq!(model.observations, 29);
    }

    #[test]
    fn annualizes_sample_statistics() {
        // Returns: A = [0.1, -0.1], B = [0.05, 0.05].
        let model =
            model_from_prices(&table(&["A", "B"], &[&[100.0, 110.0, 99.0], &[20.0, 21.0, 22.05]]))
                .unwrap();

        assert_relative_eq!(model.expected_return[0], 0.0, epsilon = 1e-12);
        assert_relative_eq!(model.expected_return[1], 0.05 * 252.0, epsilon = 1e-9);

        // Sample variance of [0.1, -0.1] is 0.02.
        assert_relative_eq!(model.covariance[0][0], 0.02 * 252.0, epsilon = 1e-9);
        assert_relative_eq!(model.covariance[1][1], 0.0, epsilon = 1e-12);
        assert_relative_eq!(model.covariance[0][1], model.covariance[1][0]);
        assert_relative_eq!(model.volatility[0], (0.02f64 * 252.0).sqrt(), epsilon = 1e-9);
    }

    #[test]
    fn diagonal_equals_volatility_squared() {
        let a: Vec<f64> = (0..60).map(|i| 50.0 + (i as f64 * 0.7).sin() * 3.0).collect();
        let b: Vec<f64> = (0..60).map(|i| 80.0 + (i as f64 * 0.3).cos() * 5.0).collect();
        let model = model_from_prices(&table(&["A", "B"], &[&a, &b])).unwrap();

        for i in 0..2 {
            assert_relative_eq!(
                model.covariance[i][i],
                model.volatility[i].powi(2),
                max_relative = 1e-12
            );
        }
        assert_eq!(model.covariance[0][1], model.covariance[1][0]);
    }

    #[test]
    fn too_few_aligned_dates_is_an_error() {
        let err = model_from_prices(&table(&["A"], &[&[10.0, 11.0]])).unwrap_err();
        assert_eq!(
            err,
            EngineError::InsufficientData {
                required: 3,
                actual: 2
            }
        );

        // Three dates per ticker but only two shared.
        let mut t = table(&["A", "B"], &[&[1.0, 2.0, 3.0], &[1.0, 2.0]]);
        t.insert(day(5), 1, 4.0);
        assert!(matches!(
            model_from_prices(&t),
            Err(EngineError::InsufficientData { actual: 2, .. })
        ));
    }

    #[tokio::test]
    async fn estimates_from_provider_history_within_lookback() {
        let closes = |base: f64| -> Vec<DailyClose> {
            (0..10)
                .map(|i| DailyClose {
                    date: day(i),
                    close: base + i as f64,
                })
                .collect()
        };
        let data = StaticMarketData::default()
            .with_closes("KO", closes(60.0))
            .with_closes("PG", closes(160.0))
            .with_closes("T", closes(20.0))
            .with_failure("T");

        let tickers = vec!["PG".to_string(), "KO".to_string()];
        let model = estimate_return_risk(&data, &tickers, 1, day(9)).await.unwrap();
        assert_eq!(model.tickers, tickers);
        assert_eq!(model.observations, 9);
        assert!(model.expected_return[1] > model.expected_return[0]);

        let err = estimate_return_risk(&data, &["KO".to_string(), "T".to_string()], 1, day(9))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::InsufficientData { actual: 0, .. })
        ));
    }
}
