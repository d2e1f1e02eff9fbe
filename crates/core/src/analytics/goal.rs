use crate::domain::plan::GoalVerdict;

/// Capital whose after-tax dividend income at `portfolio_yield` pays `goal_monthly` per
/// month: `goal·12 / (1 − tax) / yield`. `None` when the yield is not positive or the tax
/// rate leaves nothing.
pub fn required_principal(goal_monthly: f64, tax_rate: f64, portfolio_yield: f64) -> Option<f64> {
    if !(portfolio_yield.is_finite() && portfolio_yield > 0.0) {
        return None;
    }
    if !(tax_rate.is_finite() && tax_rate < 1.0) {
        return None;
    }
    let v = goal_monthly * 12.0 / (1.0 - tax_rate) / portfolio_yield;
    v.is_finite().then_some(v)
}

pub fn evaluate_goal(
    projected_asset_value: f64,
    goal_monthly: f64,
    tax_rate: f64,
    portfolio_yield: f64,
) -> GoalVerdict {
    let required_principal = required_principal(goal_monthly, tax_rate, portfolio_yield);
    GoalVerdict {
        projected_asset_value,
        required_principal,
        achieved: required_principal.is_some_and(|req| projected_asset_value >= req),
    }
}
