// ─────────────────────────────────────────────────────────────────────
// SCPN Inversion Core — Truncated Conjugate Gradient
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Matrix-free preconditioned CG for the Gauss–Newton step `H Δm = b`.
//!
//! The operator is supplied as a Hessian-vector product closure, so the
//! Hessian is never formed. The iteration is truncated on:
//!   - relative residual `‖r‖ ≤ tol · ‖b‖`,
//!   - the iteration budget,
//!   - non-positive curvature `pᵀHp ≤ 0` (Steihaug). On the first
//!     iteration this returns the preconditioned right-hand side, which is
//!     a descent direction for `b = −g`.
//!
//! An optional Jacobi preconditioner is passed as the *inverse* diagonal.

use inversion_types::error::{InversionError, InversionResult};
use ndarray::Array1;

use crate::linalg::{all_finite, norm};

// ───────────────────────────── configuration ─────────────────────────

#[derive(Debug, Clone)]
pub struct CgConfig {
    /// Maximum number of Hessian-vector products (default: 20).
    pub max_iter: usize,
    /// Relative residual tolerance (default: 1e-3).
    pub tol: f64,
}

impl Default for CgConfig {
    fn default() -> Self {
        CgConfig {
            max_iter: 20,
            tol: 1e-3,
        }
    }
}

/// Result of a truncated CG solve.
#[derive(Debug, Clone)]
pub struct CgResult {
    pub solution: Array1<f64>,
    /// Number of Hessian-vector products performed.
    pub iterations: usize,
    /// Final relative residual `‖r‖ / ‖b‖`.
    pub residual: f64,
    pub converged: bool,
    /// Stopped on non-positive curvature.
    pub negative_curvature: bool,
}

/// Solve `H x = rhs` approximately, starting from `x = 0`.
pub fn truncated_cg<F>(
    mut hvp: F,
    rhs: &Array1<f64>,
    inv_diag: Option<&Array1<f64>>,
    config: &CgConfig,
) -> InversionResult<CgResult>
where
    F: FnMut(&Array1<f64>) -> InversionResult<Array1<f64>>,
{
    let n = rhs.len();
    if let Some(d) = inv_diag {
        if d.len() != n {
            return Err(InversionError::DimensionMismatch {
                context: "CG preconditioner".to_string(),
                expected: n,
                got: d.len(),
            });
        }
    }
    if !all_finite(rhs) {
        return Err(InversionError::Numerical(
            "CG right-hand side contains non-finite values".to_string(),
        ));
    }

    let apply_precond = |r: &Array1<f64>| -> Array1<f64> {
        match inv_diag {
            Some(d) => r * d,
            None => r.clone(),
        }
    };

    let b_norm = norm(rhs);
    let mut x = Array1::zeros(n);
    if b_norm == 0.0 {
        return Ok(CgResult {
            solution: x,
            iterations: 0,
            residual: 0.0,
            converged: true,
            negative_curvature: false,
        });
    }

    let mut r = rhs.clone();
    let mut z = apply_precond(&r);
    let mut p = z.clone();
    let mut rz = r.dot(&z);
    let mut residual = 1.0;

    for k in 0..config.max_iter {
        let hp = hvp(&p)?;
        if hp.len() != n {
            return Err(InversionError::DimensionMismatch {
                context: "CG Hessian-vector product".to_string(),
                expected: n,
                got: hp.len(),
            });
        }
        if !all_finite(&hp) {
            return Err(InversionError::Numerical(format!(
                "Hessian-vector product non-finite at CG iteration {k}"
            )));
        }

        let curvature = p.dot(&hp);
        if curvature <= 0.0 {
            log::debug!("CG: non-positive curvature {curvature:.3e} at iteration {k}");
            if k == 0 {
                x = p;
            }
            return Ok(CgResult {
                solution: x,
                iterations: k + 1,
                residual,
                converged: false,
                negative_curvature: true,
            });
        }

        let alpha = rz / curvature;
        x.scaled_add(alpha, &p);
        r.scaled_add(-alpha, &hp);
        residual = norm(&r) / b_norm;
        if residual <= config.tol {
            return Ok(CgResult {
                solution: x,
                iterations: k + 1,
                residual,
                converged: true,
                negative_curvature: false,
            });
        }

        z = apply_precond(&r);
        let rz_new = r.dot(&z);
        let beta = rz_new / rz;
        rz = rz_new;
        p = &z + &(beta * &p);
    }

    Ok(CgResult {
        solution: x,
        iterations: config.max_iter,
        residual,
        converged: false,
        negative_curvature: false,
    })
}
