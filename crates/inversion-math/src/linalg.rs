//! Vector utilities and randomized spectral estimates.
//!
//! Power iteration for the largest eigenvalue of a symmetric PSD operator,
//! Rademacher probing for its diagonal, and box projection.

use inversion_types::error::{InversionError, InversionResult};
use ndarray::Array1;
use rand::Rng;

/// Euclidean norm.
#[inline]
pub fn norm(v: &Array1<f64>) -> f64 {
    v.dot(v).sqrt()
}

#[inline]
pub fn all_finite(v: &Array1<f64>) -> bool {
    v.iter().all(|x| x.is_finite())
}

/// Clamp `x` elementwise into `[lower, upper]`.
pub fn project_onto_bounds(
    x: &Array1<f64>,
    lower: &Array1<f64>,
    upper: &Array1<f64>,
) -> Array1<f64> {
    let mut out = x.clone();
    for ((v, &lo), &hi) in out.iter_mut().zip(lower.iter()).zip(upper.iter()) {
        *v = v.max(lo).min(hi);
    }
    out
}

/// Random ±1 vector.
pub fn rademacher_vector<R: Rng>(n: usize, rng: &mut R) -> Array1<f64> {
    Array1::from_shape_fn(n, |_| if rng.gen_bool(0.5) { 1.0 } else { -1.0 })
}

fn check_len(context: &str, expected: usize, v: &Array1<f64>) -> InversionResult<()> {
    if v.len() != expected {
        return Err(InversionError::DimensionMismatch {
            context: context.to_string(),
            expected,
            got: v.len(),
        });
    }
    Ok(())
}

/// `vᵀ A v / vᵀ v` for a single probe.
pub fn rayleigh_quotient<F>(mut op: F, v: &Array1<f64>) -> InversionResult<f64>
where
    F: FnMut(&Array1<f64>) -> InversionResult<Array1<f64>>,
{
    let vv = v.dot(v);
    if vv == 0.0 {
        return Ok(0.0);
    }
    let av = op(v)?;
    check_len("Rayleigh quotient operator", v.len(), &av)?;
    Ok(v.dot(&av) / vv)
}

/// Largest eigenvalue of a symmetric PSD operator by power iteration,
/// reported as the final Rayleigh quotient.
pub fn estimate_max_eigenvalue<F, R>(
    mut op: F,
    n: usize,
    iterations: usize,
    rng: &mut R,
) -> InversionResult<f64>
where
    F: FnMut(&Array1<f64>) -> InversionResult<Array1<f64>>,
    R: Rng,
{
    let mut v: Array1<f64> = Array1::from_shape_fn(n, |_| rng.gen::<f64>() - 0.5);
    let v_norm = norm(&v);
    if v_norm == 0.0 {
        return Ok(0.0);
    }
    v /= v_norm;

    let mut lambda = 0.0;
    for _ in 0..iterations.max(1) {
        let w = op(&v)?;
        check_len("power iteration operator", n, &w)?;
        lambda = v.dot(&w);
        let w_norm = norm(&w);
        if !w_norm.is_finite() {
            return Err(InversionError::Numerical(
                "power iteration produced a non-finite vector".to_string(),
            ));
        }
        if w_norm == 0.0 {
            return Ok(0.0);
        }
        v = w / w_norm;
    }
    Ok(lambda)
}

/// Diagonal of a symmetric operator from `n_probes` Rademacher probes:
/// `diag ≈ Σ z ⊙ A z / n_probes`.
pub fn estimate_diagonal<F, R>(
    mut op: F,
    n: usize,
    n_probes: usize,
    rng: &mut R,
) -> InversionResult<Array1<f64>>
where
    F: FnMut(&Array1<f64>) -> InversionResult<Array1<f64>>,
    R: Rng,
{
    if n_probes == 0 {
        return Err(InversionError::ConfigError(
            "diagonal probing needs at least one probe".to_string(),
        ));
    }
    let mut acc = Array1::zeros(n);
    for _ in 0..n_probes {
        let z = rademacher_vector(n, rng);
        let az = op(&z)?;
        check_len("diagonal probing operator", n, &az)?;
        acc += &(&z * &az);
    }
    Ok(acc / n_probes as f64)
}
