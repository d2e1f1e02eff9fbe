use crate::domain::plan::GrowthPoint;
use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::iter::FusedIterator;
use std::str::FromStr;

const ZERO_RATE: f64 = 1e-12;

/// Value after `years` of compounding `current` at `annual_rate` plus `monthly`
/// contributions, credited as `monthly * 12` per year:
///
/// `current·(1+r)^t + 12·monthly·((1+r)^t − 1)/r`, or `current + 12·monthly·t` at `r = 0`.
///
/// `years` may be fractional. A rate below -100% compounds to nothing.
pub fn future_value(current: f64, monthly: f64, years: f64, annual_rate: f64) -> f64 {
    let yearly = monthly * 12.0;
    if annual_rate.abs() < ZERO_RATE {
        return current + yearly * years;
    }

    let growth = (1.0 + annual_rate).max(0.0).powf(years);
    current * growth + yearly * (growth - 1.0) / annual_rate
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    #[default]
    Yearly,
    Monthly,
}

impl Granularity {
    fn periods_per_year(self) -> u32 {
        match self {
            Granularity::Yearly => 1,
            Granularity::Monthly => 12,
        }
    }
}

impl FromStr for Granularity {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "yearly" | "year" | "y" => Ok(Granularity::Yearly),
            "monthly" | "month" | "m" => Ok(Granularity::Monthly),
            other => Err(EngineError::InvalidInput(format!(
                "unknown granularity {other:?} (expected yearly or monthly)"
            ))),
        }
    }
}

/// Lazily evaluated growth curve. Each call to `yearly_growth`/`monthly_growth` starts a
/// fresh series; clones iterate independently.
#[derive(Debug, Clone)]
pub struct GrowthSeries {
    current: f64,
    monthly: f64,
    annual_rate: f64,
    per_year: u32,
    next: u32,
    total: u32,
}

impl Iterator for GrowthSeries {
    type Item = GrowthPoint;

    fn next(&mut self) -> Option<GrowthPoint> {
        if self.next > self.total {
            return None;
        }
        let period_index = self.next;
        self.next += 1;

        let years = f64::from(period_index) / f64::from(self.per_year);
        Some(GrowthPoint {
            period_index,
            projected_value: future_value(self.current, self.monthly, years, self.annual_rate),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (u64::from(self.total) + 1).saturating_sub(u64::from(self.next)) as usize;
        (left, Some(left))
    }
}

impl ExactSizeIterator for GrowthSeries {}
impl FusedIterator for GrowthSeries {}

pub fn growth_series(
    granularity: Granularity,
    current: f64,
    monthly: f64,
    years: u32,
    annual_rate: f64,
) -> GrowthSeries {
    let per_year = granularity.periods_per_year();
    GrowthSeries {
        current,
        monthly,
        annual_rate,
        per_year,
        next: 1,
        total: years.saturating_mul(per_year),
    }
}

/// One point per year, indices `1..=years`.
pub fn yearly_growth(current: f64, monthly: f64, years: u32, annual_rate: f64) -> GrowthSeries {
    growth_series(Granularity::Yearly, current, monthly, years, annual_rate)
}

/// One point per month, indices `1..=years*12`, exponent `month / 12`.
pub fn monthly_growth(current: f64, monthly: f64, years: u32, annual_rate: f64) -> GrowthSeries {
    growth_series(Granularity::Monthly, current, monthly, years, annual_rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn nothing_in_nothing_out() {
        for years in [0.0, 1.0, 7.5, 30.0] {
            for r in [-0.5, 0.0, 0.03, 0.12] {
                assert_eq!(future_value(0.0, 0.0, years, r), 0.0);
            }
        }
    }

    #[test]
    fn lump_sum_compounds() {
        assert_relative_eq!(future_value(1000.0, 0.0, 1.0, 0.10), 1100.0, epsilon = 1e-9);
    }

    #[test]
    fn zero_rate_uses_linear_contributions() {
        assert_eq!(future_value(0.0, 100.0, 1.0, 0.0), 1200.0);
        assert_eq!(future_value(500.0, 100.0, 2.0, 1e-15), 2900.0);
    }

    #[test]
    fn contributions_follow_the_annuity_formula() {
        let r: f64 = 0.05;
        let expected = 1200.0 * ((1.0 + r).powi(3) - 1.0) / r;
        assert_relative_eq!(future_value(0.0, 100.0, 3.0, r), expected, epsilon = 1e-9);
    }

    #[test]
    fn total_loss_rate_does_not_produce_nan() {
        let v = future_value(1000.0, 10.0, 2.0, -1.5);
        assert!(v.is_finite());
    }

    #[test]
    fn yearly_series_is_indexed_one_to_years() {
        let series = yearly_growth(1000.0, 100.0, 5, 0.04);
        assert_eq!(series.len(), 5);

        let points: Vec<GrowthPoint> = series.clone().collect();
        let idx: Vec<u32> = points.iter().map(|p| p.period_index).collect();
        assert_eq!(idx, vec![1, 2, 3, 4, 5]);
        assert_relative_eq!(
            points[4].projected_value,
            future_value(1000.0, 100.0, 5.0, 0.04),
            epsilon = 1e-9
        );
        // Iterating the clone left `series` untouched.
        assert_eq!(series.count(), 5);
    }

    #[test]
    fn monthly_series_uses_fractional_years() {
        let points: Vec<GrowthPoint> = monthly_growth(0.0, 100.0, 2, 0.06).collect();
        assert_eq!(points.len(), 24);
        assert_eq!(points[0].period_index, 1);
        assert_eq!(points[23].period_index, 24);
        assert_relative_eq!(
            points[5].projected_value,
            future_value(0.0, 100.0, 0.5, 0.06),
            epsilon = 1e-9
        );
        assert_relative_eq!(
            points[23].projected_value,
            future_value(0.0, 100.0, 2.0, 0.06),
            epsilon = 1e-9
        );
    }

    #[test]
    fn zero_years_is_empty() {
        assert_eq!(yearly_growth(1.0, 1.0, 0, 0.1).count(), 0);
        assert_eq!(monthly_growth(1.0, 1.0, 0, 0.1).len(), 0);
    }

    #[test]
    fn parses_granularity() {
        assert_eq!("Monthly".parse::<Granularity>().unwrap(), Granularity::Monthly);
        assert_eq!("y".parse::<Granularity>().unwrap(), Granularity::Yearly);
        assert!("weekly".parse::<Granularity>().is_err());
    }
}
