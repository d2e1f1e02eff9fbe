//! Long-only, capped mean-variance allocation.
//!
//! The feasible set is the capped simplex `{w : 0 <= w_i <= cap, Σ w_i = 1}`. Every
//! candidate the solver looks at is first mapped onto that set by Euclidean projection,
//! so the constraints hold exactly (up to rounding) for any returned vector.
//!
//! Solving happens in two stages. A Nelder-Mead search explores the projected objective
//! from the uniform start, then a projected-gradient pass with backtracking polishes the
//! best point found. The Neutral objective is not convex; the result is a local optimum.

use crate::analytics::{dot, mat_vec_mul, quadratic_form};
use crate::domain::portfolio::{PortfolioStats, RiskPosture, WeightVector};
use crate::error::EngineError;
use argmin::core::{CostFunction, Executor};
use argmin::solver::neldermead::NelderMead;

pub const DEFAULT_MAX_WEIGHT: f64 = 0.4;

/// Guard added to the Neutral denominator.
pub const SHARPE_EPSILON: f64 = 1e-8;

const FEASIBILITY_TOLERANCE: f64 = 1e-12;
const VOLATILITY_FLOOR: f64 = 1e-12;
const MAX_STEP: f64 = 1e6;
const MAX_BACKTRACKS: usize = 60;
const PROJECTION_ITERS: usize = 200;

/// Solver knobs. Iteration caps and tolerances are tunables; callers should only rely on
/// feasibility and the posture's direction of improvement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimizerSettings {
    pub max_weight: f64,
    pub epsilon: f64,
    /// Offset of the initial Nelder-Mead vertices from the uniform start.
    pub simplex_step: f64,
    pub search_iters: u64,
    pub search_tolerance: f64,
    pub refine_iters: usize,
    pub refine_tolerance: f64,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            max_weight: DEFAULT_MAX_WEIGHT,
            epsilon: SHARPE_EPSILON,
            simplex_step: 0.05,
            search_iters: 2000,
            search_tolerance: 1e-12,
            refine_iters: 500,
            refine_tolerance: 1e-10,
        }
    }
}

impl OptimizerSettings {
    pub fn with_max_weight(mut self, max_weight: f64) -> Self {
        self.max_weight = max_weight;
        self
    }
}

/// Weights over the assets of `mu`/`cov` (same ordering) for the given posture.
pub fn optimize(
    mu: &[f64],
    cov: &[Vec<f64>],
    posture: RiskPosture,
    risk_free_rate: f64,
    settings: &OptimizerSettings,
) -> Result<WeightVector, EngineError> {
    validate(mu, cov, risk_free_rate, settings)?;

    let n = mu.len();
    if n == 1 {
        return Ok(WeightVector::new(vec![1.0]));
    }

    let cap = settings.max_weight;
    let capacity = cap * n as f64;
    if capacity < 1.0 - FEASIBILITY_TOLERANCE {
        return Err(EngineError::Infeasible {
            assets: n,
            max_weight: cap,
        });
    }
    let start = vec![1.0 / n as f64; n];
    if capacity <= 1.0 + FEASIBILITY_TOLERANCE {
        // Every asset sits at the cap; uniform is the only feasible point.
        return Ok(WeightVector::new(start));
    }

    let objective = Objective {
        posture,
        mu: mu.to_vec(),
        cov: cov.to_vec(),
        risk_free_rate,
        epsilon: settings.epsilon,
    };

    let searched = search(&objective, &start, cap, settings);
    let refined = refine(&objective, searched, cap, settings);

    tracing::debug!(
        %posture,
        assets = n,
        objective = objective.value(&refined),
        "portfolio optimized"
    );
    Ok(WeightVector::new(refined))
}

fn validate(
    mu: &[f64],
    cov: &[Vec<f64>],
    risk_free_rate: f64,
    settings: &OptimizerSettings,
) -> Result<(), EngineError> {
    let n = mu.len();
    if n == 0 {
        return Err(EngineError::EmptyUniverse);
    }
    if cov.len() != n {
        return Err(EngineError::DimensionMismatch {
            expected: n,
            actual: cov.len(),
        });
    }
    if let Some(row) = cov.iter().find(|row| row.len() != n) {
        return Err(EngineError::DimensionMismatch {
            expected: n,
            actual: row.len(),
        });
    }

    let all_finite = mu.iter().chain(cov.iter().flatten()).all(|v| v.is_finite());
    if !all_finite || !risk_free_rate.is_finite() {
        return Err(EngineError::InvalidInput(
            "expected returns, covariance and risk-free rate must be finite".to_string(),
        ));
    }

    let cap = settings.max_weight;
    if !(cap > 0.0 && cap <= 1.0) {
        return Err(EngineError::InvalidInput(format!(
            "max_weight must be in (0, 1] (got {cap})"
        )));
    }
    if !(settings.epsilon >= 0.0 && settings.epsilon.is_finite()) {
        return Err(EngineError::InvalidInput(format!(
            "epsilon must be a non-negative number (got {})",
            settings.epsilon
        )));
    }
    Ok(())
}

#[derive(Debug, Clone)]
struct Objective {
    posture: RiskPosture,
    mu: Vec<f64>,
    cov: Vec<Vec<f64>>,
    risk_free_rate: f64,
    epsilon: f64,
}

impl Objective {
    fn value(&self, w: &[f64]) -> f64 {
        match self.posture {
            RiskPosture::Conservative => quadratic_form(&self.cov, w).sqrt(),
            RiskPosture::Aggressive => -dot(w, &self.mu),
            RiskPosture::Neutral => {
                let sigma = quadratic_form(&self.cov, w).sqrt();
                -(dot(w, &self.mu) - self.risk_free_rate) / (sigma + self.epsilon)
            }
        }
    }

    fn gradient(&self, w: &[f64]) -> Vec<f64> {
        match self.posture {
            RiskPosture::Aggressive => self.mu.iter().map(|m| -m).collect(),
            RiskPosture::Conservative => self.volatility_gradient(w).1,
            RiskPosture::Neutral => {
                let (sigma, d_sigma) = self.volatility_gradient(w);
                let excess = dot(w, &self.mu) - self.risk_free_rate;
                let denom = sigma + self.epsilon;
                self.mu
                    .iter()
                    .zip(&d_sigma)
                    .map(|(m, ds)| -(m * denom - excess * ds) / (denom * denom))
                    .collect()
            }
        }
    }

    /// Portfolio volatility and its gradient `Σw / sigma` (zero at a riskless point).
    fn volatility_gradient(&self, w: &[f64]) -> (f64, Vec<f64>) {
        let sigma_w = mat_vec_mul(&self.cov, w);
        let sigma = dot(w, &sigma_w).max(0.0).sqrt();
        if sigma < VOLATILITY_FLOOR {
            return (sigma, vec![0.0; w.len()]);
        }
        (sigma, sigma_w.iter().map(|v| v / sigma).collect())
    }
}

/// Objective evaluated at the projection of an unconstrained parameter vector.
struct ProjectedCost {
    objective: Objective,
    cap: f64,
}

impl CostFunction for ProjectedCost {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, x: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        Ok(self.objective.value(&project_capped_simplex(x, self.cap)))
    }
}

fn search(objective: &Objective, start: &[f64], cap: f64, settings: &OptimizerSettings) -> Vec<f64> {
    let mut simplex = Vec::with_capacity(start.len() + 1);
    simplex.push(start.to_vec());
    for i in 0..start.len() {
        let mut vertex = start.to_vec();
        vertex[i] += settings.simplex_step;
        simplex.push(vertex);
    }

    let cost = ProjectedCost {
        objective: objective.clone(),
        cap,
    };
    let best = match NelderMead::new(simplex).with_sd_tolerance(settings.search_tolerance) {
        Ok(solver) => match Executor::new(cost, solver)
            .configure(|state| state.max_iters(settings.search_iters))
            .run()
        {
            Ok(res) => res.state.best_param.unwrap_or_else(|| start.to_vec()),
            Err(err) => {
                tracing::warn!(error = %err, "simplex search failed; refining from uniform start");
                start.to_vec()
            }
        },
        Err(err) => {
            tracing::warn!(error = %err, "invalid simplex search settings; refining from uniform start");
            start.to_vec()
        }
    };

    let best = project_capped_simplex(&best, cap);
    if objective.value(&best) <= objective.value(start) {
        best
    } else {
        start.to_vec()
    }
}

/// Projected gradient descent with backtracking on the sufficient-decrease bound
/// `f(w + d) <= f(w) + g·d + |d|² / 2α`.
fn refine(objective: &Objective, start: Vec<f64>, cap: f64, settings: &OptimizerSettings) -> Vec<f64> {
    let mut w = start;
    let mut f = objective.value(&w);
    let mut alpha = 1.0;

    for _ in 0..settings.refine_iters {
        let g = objective.gradient(&w);
        let mut accepted = None;

        for _ in 0..MAX_BACKTRACKS {
            let trial: Vec<f64> = w.iter().zip(&g).map(|(wi, gi)| wi - alpha * gi).collect();
            let candidate = project_capped_simplex(&trial, cap);
            let d: Vec<f64> = candidate.iter().zip(&w).map(|(c, wi)| c - wi).collect();
            let d_norm2 = dot(&d, &d);
            if d_norm2 <= f64::EPSILON * f64::EPSILON {
                break;
            }

            let fc = objective.value(&candidate);
            if fc <= f + dot(&g, &d) + d_norm2 / (2.0 * alpha) {
                accepted = Some((candidate, fc));
                break;
            }
            alpha *= 0.5;
        }

        let Some((candidate, fc)) = accepted else {
            break;
        };
        let improvement = f - fc;
        w = candidate;
        f = fc;
        if improvement <= settings.refine_tolerance * (1.0 + f.abs()) {
            break;
        }
        alpha = (alpha * 2.0).min(MAX_STEP);
    }

    w
}

/// Euclidean projection onto `{w : 0 <= w_i <= cap, Σ w_i = 1}`. Non-finite entries are
/// read as zero. Requires `cap * len >= 1`.
pub fn project_capped_simplex(x: &[f64], cap: f64) -> Vec<f64> {
    let x: Vec<f64> = x
        .iter()
        .map(|v| if v.is_finite() { *v } else { 0.0 })
        .collect();
    if x.is_empty() {
        return x;
    }

    let clamp_sum = |tau: f64| -> f64 { x.iter().map(|v| (v - tau).clamp(0.0, cap)).sum() };

    // Σ clamp(x_i - τ) is non-increasing in τ: equal to len·cap at `lo`, zero at `hi`.
    let mut lo = x.iter().copied().fold(f64::INFINITY, f64::min) - cap;
    let mut hi = x.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    for _ in 0..PROJECTION_ITERS {
        let mid = 0.5 * (lo + hi);
        if mid <= lo || mid >= hi {
            break;
        }
        if clamp_sum(mid) > 1.0 {
            lo = mid;
        } else {
            hi = mid;
        }
    }

    let tau = 0.5 * (lo + hi);
    let mut w: Vec<f64> = x.iter().map(|v| (v - tau).clamp(0.0, cap)).collect();

    // Spread the bisection residual over coordinates strictly inside the box.
    let residual = 1.0 - w.iter().sum::<f64>();
    let free: Vec<usize> = (0..w.len()).filter(|&i| w[i] > 0.0 && w[i] < cap).collect();
    if !free.is_empty() {
        let share = residual / free.len() as f64;
        for i in free {
            w[i] = (w[i] + share).clamp(0.0, cap);
        }
    }
    w
}

/// Expected return, volatility and Sharpe ratio of `weights`.
pub fn evaluate_portfolio(
    weights: &[f64],
    mu: &[f64],
    cov: &[Vec<f64>],
    risk_free_rate: f64,
) -> PortfolioStats {
    let expected_return = dot(weights, mu);
    let volatility = quadratic_form(cov, weights).sqrt();
    let sharpe = if volatility > VOLATILITY_FLOOR {
        (expected_return - risk_free_rate) / volatility
    } else {
        0.0
    };

    PortfolioStats {
        expected_return,
        volatility,
        sharpe,
    }
}
