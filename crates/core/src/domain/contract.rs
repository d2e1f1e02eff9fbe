use crate::domain::plan::PlanInputs;
use crate::domain::portfolio::RiskPosture;
use crate::domain::Ticker;
use anyhow::ensure;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const MAX_TICKERS: usize = 20;
pub const MAX_YEARS: u32 = 100;
pub const MAX_LOOKBACK_YEARS: u32 = 30;

/// Externally supplied plan request. Omitted fields take the [`PlanInputs`] defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanRequest {
    pub tickers: Vec<String>,
    pub goal_monthly: Option<f64>,
    pub years: Option<u32>,
    pub risk: Option<RiskPosture>,
    pub current: Option<f64>,
    pub monthly: Option<f64>,
    pub tax_rate: Option<f64>,
    pub risk_free_rate: Option<f64>,
    pub max_weight: Option<f64>,
    pub lookback_years: Option<u32>,
}

impl PlanRequest {
    pub fn validate_and_into_inputs(self) -> anyhow::Result<(Vec<Ticker>, PlanInputs)> {
        let tickers = normalize_tickers(&self.tickers)?;
        let defaults = PlanInputs::default();

        let goal_monthly = self.goal_monthly.unwrap_or(defaults.goal_monthly);
        ensure!(
            goal_monthly.is_finite() && goal_monthly >= 0.0,
            "goal_monthly must be a non-negative amount (got {goal_monthly})"
        );

        let years = self.years.unwrap_or(defaults.years);
        ensure!(
            (1..=MAX_YEARS).contains(&years),
            "years must be 1..={MAX_YEARS} (got {years})"
        );

        let current = self.current.unwrap_or(defaults.current);
        ensure!(
            current.is_finite() && current >= 0.0,
            "current must be a non-negative amount (got {current})"
        );

        let monthly = self.monthly.unwrap_or(defaults.monthly);
        ensure!(
            monthly.is_finite() && monthly >= 0.0,
            "monthly must be a non-negative amount (got {monthly})"
        );

        let tax_rate = self.tax_rate.unwrap_or(defaults.tax_rate);
        ensure!(
            (0.0..1.0).contains(&tax_rate),
            "tax_rate must be in [0, 1) (got {tax_rate})"
        );

        let risk_free_rate = self.risk_free_rate.unwrap_or(defaults.risk_free_rate);
        ensure!(
            risk_free_rate.is_finite(),
            "risk_free_rate must be finite (got {risk_free_rate})"
        );

        let max_weight = self.max_weight.unwrap_or(defaults.max_weight);
        ensure!(
            max_weight > 0.0 && max_weight <= 1.0,
            "max_weight must be in (0, 1] (got {max_weight})"
        );

        let lookback_years = self.lookback_years.unwrap_or(defaults.lookback_years);
        ensure!(
            (1..=MAX_LOOKBACK_YEARS).contains(&lookback_years),
            "lookback_years must be 1..={MAX_LOOKBACK_YEARS} (got {lookback_years})"
        );

        Ok((
            tickers,
            PlanInputs {
                goal_monthly,
                years,
                posture: self.risk.unwrap_or(defaults.posture),
                current,
                monthly,
                tax_rate,
                risk_free_rate,
                max_weight,
                lookback_years,
            },
        ))
    }
}

/// Trims and upper-cases symbols, drops blanks and repeats (first occurrence wins).
pub fn normalize_tickers(raw: &[String]) -> anyhow::Result<Vec<Ticker>> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::with_capacity(raw.len());
    for t in raw {
        let t = t.trim().to_ascii_uppercase();
        if t.is_empty() {
            continue;
        }
        ensure!(
            t.chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^' | '=')),
            "ticker contains unsupported characters: {t:?}"
        );
        if seen.insert(t.clone()) {
            out.push(t);
        }
    }

    ensure!(!out.is_empty(), "at least one ticker is required");
    ensure!(
        out.len() <= MAX_TICKERS,
        "at most {MAX_TICKERS} tickers are supported (got {})",
        out.len()
    );
    Ok(out)
}

/// Splits a comma separated list such as `"KO, O,PG"`.
pub fn split_tickers(s: &str) -> Vec<String> {
    s.split(',')
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fills_defaults_for_missing_fields() {
        let req: PlanRequest = serde_json::from_value(json!({"tickers": ["ko", "o"]})).unwrap();
        let (tickers, inputs) = req.validate_and_into_inputs().unwrap();
        assert_eq!(tickers, vec!["KO".to_string(), "O".to_string()]);
        assert_eq!(inputs, PlanInputs::default());
    }

    #[test]
    fn accepts_explicit_fields() {
        let req: PlanRequest = serde_json::from_value(json!({
            "tickers": ["SCHD"],
            "goal_monthly": 500.0,
            "years": 10,
            "risk": "aggressive",
            "current": 10000.0,
            "monthly": 300.0,
            "tax_rate": 0.0,
            "risk_free_rate": 0.04,
            "max_weight": 1.0,
        }))
        .unwrap();
        let (_, inputs) = req.validate_and_into_inputs().unwrap();
        assert_eq!(inputs.years, 10);
        assert_eq!(inputs.posture, RiskPosture::Aggressive);
        assert_eq!(inputs.max_weight, 1.0);
        assert_eq!(inputs.tax_rate, 0.0);
    }

    #[test]
    fn rejects_out_of_range_values() {
        let base = PlanRequest {
            tickers: vec!["KO".to_string()],
            ..Default::default()
        };

        let bad = [
            PlanRequest { years: Some(0), ..base.clone() },
            PlanRequest { tax_rate: Some(1.0), ..base.clone() },
            PlanRequest { monthly: Some(-1.0), ..base.clone() },
            PlanRequest { max_weight: Some(0.0), ..base.clone() },
            PlanRequest { risk_free_rate: Some(f64::NAN), ..base.clone() },
            PlanRequest { lookback_years: Some(0), ..base.clone() },
            PlanRequest { tickers: vec![" ".to_string()], ..base.clone() },
        ];
        for req in bad {
            assert!(req.validate_and_into_inputs().is_err());
        }
    }

    #[test]
    fn normalizes_and_dedupes_tickers() {
        let raw = split_tickers(" ko, O ,,KO, schd ");
        assert_eq!(raw.len(), 4);
        let tickers = normalize_tickers(&raw).unwrap();
        assert_eq!(tickers, vec!["KO", "O", "SCHD"]);
    }

    #[test]
    fn rejects_too_many_or_malformed_tickers() {
        let many: Vec<String> = (0..=MAX_TICKERS).map(|i| format!("T{i}")).collect();
        assert!(normalize_tickers(&many).is_err());
        assert!(normalize_tickers(&["KO/../x".to_string()]).is_err());
    }
}
