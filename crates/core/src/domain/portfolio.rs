use crate::domain::Ticker;
use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Selects the optimizer objective.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskPosture {
    /// Minimize portfolio volatility.
    #[default]
    Conservative,
    /// Maximize the (epsilon-guarded) Sharpe ratio.
    Neutral,
    /// Maximize expected return.
    Aggressive,
}

impl RiskPosture {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskPosture::Conservative => "conservative",
            RiskPosture::Neutral => "neutral",
            RiskPosture::Aggressive => "aggressive",
        }
    }
}

impl fmt::Display for RiskPosture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskPosture {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "conservative" | "low" => Ok(RiskPosture::Conservative),
            "neutral" | "balanced" | "medium" => Ok(RiskPosture::Neutral),
            "aggressive" | "high" => Ok(RiskPosture::Aggressive),
            other => Err(EngineError::InvalidInput(format!(
                "unknown risk posture {other:?} (expected conservative, neutral or aggressive)"
            ))),
        }
    }
}

/// Annualized return/risk statistics. Every vector and both matrix axes are indexed by
/// `tickers`; a weight vector derived from this model uses the same ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnRiskModel {
    pub tickers: Vec<Ticker>,
    pub expected_return: Vec<f64>,
    pub volatility: Vec<f64>,
    pub covariance: Vec<Vec<f64>>,
    /// Number of aligned daily returns the statistics were computed from.
    pub observations: usize,
}

impl ReturnRiskModel {
    pub fn len(&self) -> usize {
        self.tickers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickers.is_empty()
    }
}

/// Portfolio weights in model ticker order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeightVector(Vec<f64>);

impl WeightVector {
    pub fn new(weights: Vec<f64>) -> Self {
        Self(weights)
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn sum(&self) -> f64 {
        self.0.iter().sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PortfolioStats {
    pub expected_return: f64,
    pub volatility: f64,
    /// `(expected_return - risk_free) / volatility`, or 0 for a riskless portfolio.
    pub sharpe: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_postures_case_insensitively() {
        assert_eq!(
            "Conservative".parse::<RiskPosture>().unwrap(),
            RiskPosture::Conservative
        );
        assert_eq!(" NEUTRAL ".parse::<RiskPosture>().unwrap(), RiskPosture::Neutral);
        assert_eq!("high".parse::<RiskPosture>().unwrap(), RiskPosture::Aggressive);
        assert!("yolo".parse::<RiskPosture>().is_err());
    }

    #[test]
    fn posture_serializes_snake_case() {
        let v = serde_json::to_value(RiskPosture::Aggressive).unwrap();
        assert_eq!(v, serde_json::json!("aggressive"));
    }
}
