use crate::domain::portfolio::{PortfolioStats, RiskPosture};
use crate::domain::snapshot::Snapshot;
use crate::domain::Ticker;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_GOAL_MONTHLY: f64 = 200_000.0;
pub const DEFAULT_YEARS: u32 = 5;
pub const DEFAULT_MONTHLY_CONTRIBUTION: f64 = 100_000.0;
pub const DEFAULT_TAX_RATE: f64 = 0.154;
pub const DEFAULT_RISK_FREE_RATE: f64 = 0.03;
pub const DEFAULT_LOOKBACK_YEARS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GrowthPoint {
    /// 1-based year or month index, depending on the series granularity.
    pub period_index: u32,
    pub projected_value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GoalVerdict {
    pub projected_asset_value: f64,
    /// `None` when the portfolio yield is zero (not computable).
    pub required_principal: Option<f64>,
    pub achieved: bool,
}

impl GoalVerdict {
    pub fn required_principal_label(&self) -> String {
        match self.required_principal {
            Some(v) => format!("{v:.0}"),
            None => "not computable".to_string(),
        }
    }
}

/// Everything a plan evaluation needs besides the tickers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanInputs {
    /// Target after-tax payout per month.
    pub goal_monthly: f64,
    /// Investment horizon.
    pub years: u32,
    pub posture: RiskPosture,
    /// Assets already invested.
    pub current: f64,
    /// Contribution per month.
    pub monthly: f64,
    pub tax_rate: f64,
    pub risk_free_rate: f64,
    /// Per-asset weight cap.
    pub max_weight: f64,
    /// Years of daily history behind the return/risk model.
    pub lookback_years: u32,
}

impl Default for PlanInputs {
    fn default() -> Self {
        Self {
            goal_monthly: DEFAULT_GOAL_MONTHLY,
            years: DEFAULT_YEARS,
            posture: RiskPosture::default(),
            current: 0.0,
            monthly: DEFAULT_MONTHLY_CONTRIBUTION,
            tax_rate: DEFAULT_TAX_RATE,
            risk_free_rate: DEFAULT_RISK_FREE_RATE,
            max_weight: crate::analytics::optimize::DEFAULT_MAX_WEIGHT,
            lookback_years: DEFAULT_LOOKBACK_YEARS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub ticker: Ticker,
    pub name: String,
    pub weight: f64,
    pub dividend_yield: f64,
    pub expected_return: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanReport {
    pub as_of: NaiveDate,
    pub posture: RiskPosture,
    /// One entry per model ticker, in model order.
    pub allocations: Vec<Allocation>,
    pub stats: PortfolioStats,
    pub portfolio_yield: f64,
    pub verdict: GoalVerdict,
    pub yearly_growth: Vec<GrowthPoint>,
    /// Tickers whose snapshot was degraded; they participate with a zero yield.
    pub degraded: Vec<Ticker>,
    pub observations: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub tickers: Vec<Ticker>,
    pub snapshots: BTreeMap<Ticker, Snapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_missing_principal_as_not_computable() {
        let v = GoalVerdict {
            projected_asset_value: 1_000.0,
            required_principal: None,
            achieved: false,
        };
        assert_eq!(v.required_principal_label(), "not computable");

        let v = GoalVerdict {
            required_principal: Some(2_500.4),
            ..v
        };
        assert_eq!(v.required_principal_label(), "2500");
    }

    #[test]
    fn default_inputs_match_the_documented_plan() {
        let inputs = PlanInputs::default();
        assert_eq!(inputs.years, 5);
        assert_eq!(inputs.posture, RiskPosture::Conservative);
        assert_eq!(inputs.max_weight, 0.4);
        assert_eq!(inputs.lookback_years, 3);
    }
}
