pub mod dividend;
pub mod goal;
pub mod growth;
pub mod optimize;
pub mod returns;
pub mod snapshot;

pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub(crate) fn mat_vec_mul(m: &[Vec<f64>], v: &[f64]) -> Vec<f64> {
    m.iter().map(|row| dot(row, v)).collect()
}

/// `wᵀ Σ w`, clamped at zero against rounding.
pub(crate) fn quadratic_form(m: &[Vec<f64>], w: &[f64]) -> f64 {
    dot(w, &mat_vec_mul(m, w)).max(0.0)
}
