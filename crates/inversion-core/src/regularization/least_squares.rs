// ─────────────────────────────────────────────────────────────────────
// SCPN Inversion Core — Smallness / Smoothness Regularization
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Single-model regularization:
//!
//!   φ_m = α_s ‖W_s (f(m) − m_ref)‖² + Σ_axis α_axis ‖W_axis G_axis f(m)‖²
//!
//! with `W_s² = vol ⊙ cell_weights ⊙ irls` on cells and
//! `W_axis² = A_axis(vol ⊙ cell_weights) ⊙ irls` on interior faces.
//!
//! Sparse ℓp norms (`p < 2`) are handled by IRLS: the weights
//! `(f² + ε²)^(p/2 − 1)` are frozen between directive updates, so every
//! term stays an exact quadratic between re-weightings.

use std::sync::Arc;

use inversion_math::mesh::Mesh;
use inversion_math::sparse::CsrMatrix;
use inversion_types::config::RegularizationConfig;
use inversion_types::error::{ensure_len, InversionError, InversionResult};
use ndarray::Array1;

use super::check_cell_weights;
use crate::mapping::Mapping;
use crate::objective::{ComboObjective, ObjectiveFunction, Term, TermRole};

// ───────────────────────────── IRLS weights ──────────────────────────

/// Frozen IRLS weights of one ℓp term.
#[derive(Debug, Clone)]
pub struct IrlsWeights {
    norm: f64,
    epsilon: f64,
    weights: Array1<f64>,
}

impl IrlsWeights {
    pub fn new(norm: f64, epsilon: f64, n: usize) -> InversionResult<Self> {
        if !norm.is_finite() || !(0.0..=2.0).contains(&norm) {
            return Err(InversionError::ConfigError(format!(
                "lp norm must be finite and in [0, 2], got {norm}"
            )));
        }
        if !epsilon.is_finite() || epsilon <= 0.0 {
            return Err(InversionError::ConfigError(format!(
                "IRLS epsilon must be finite and > 0, got {epsilon}"
            )));
        }
        Ok(IrlsWeights {
            norm,
            epsilon,
            weights: Array1::ones(n),
        })
    }

    pub fn norm(&self) -> f64 {
        self.norm
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn weights(&self) -> &Array1<f64> {
        &self.weights
    }

    /// Re-linearise around `f`. An ℓ2 term keeps unit weights.
    pub fn update(&mut self, f: &Array1<f64>) {
        if self.norm == 2.0 {
            self.weights.fill(1.0);
            return;
        }
        let eps2 = self.epsilon * self.epsilon;
        let exponent = 0.5 * self.norm - 1.0;
        self.weights = f.mapv(|x| (x * x + eps2).powf(exponent));
    }

    /// `ε ← max(ε / factor, minimum)`.
    pub fn cool_epsilon(&mut self, factor: f64, minimum: f64) {
        self.epsilon = (self.epsilon / factor).max(minimum);
    }
}

// ───────────────────────────── smallness ─────────────────────────────

/// `‖W_s (f(m) − m_ref)‖²`.
#[derive(Debug, Clone)]
pub struct Smallness {
    mapping: Arc<dyn Mapping>,
    volumes: Array1<f64>,
    reference: Array1<f64>,
    cell_weights: Array1<f64>,
    irls: IrlsWeights,
}

impl Smallness {
    pub fn new(mapping: Arc<dyn Mapping>, volumes: Array1<f64>) -> InversionResult<Self> {
        let n = mapping.n_out();
        ensure_len("Smallness volumes", n, volumes.len())?;
        if volumes.iter().any(|v| !v.is_finite() || *v <= 0.0) {
            return Err(InversionError::ConfigError(
                "Smallness volumes must be finite and > 0".to_string(),
            ));
        }
        Ok(Smallness {
            mapping,
            volumes,
            reference: Array1::zeros(n),
            cell_weights: Array1::ones(n),
            irls: IrlsWeights::new(2.0, 1e-2, n)?,
        })
    }

    pub fn with_reference(mut self, reference: Array1<f64>) -> InversionResult<Self> {
        ensure_len("Smallness reference model", self.volumes.len(), reference.len())?;
        self.reference = reference;
        Ok(self)
    }

    pub fn with_norm(mut self, norm: f64, epsilon: f64) -> InversionResult<Self> {
        self.irls = IrlsWeights::new(norm, epsilon, self.volumes.len())?;
        Ok(self)
    }

    pub fn mapping(&self) -> &Arc<dyn Mapping> {
        &self.mapping
    }

    pub fn cell_weights(&self) -> &Array1<f64> {
        &self.cell_weights
    }

    pub fn set_cell_weights(&mut self, weights: Array1<f64>) -> InversionResult<()> {
        check_cell_weights("Smallness cell weights", &weights, self.volumes.len())?;
        self.cell_weights = weights;
        Ok(())
    }

    pub fn irls(&self) -> &IrlsWeights {
        &self.irls
    }

    pub fn update_irls(&mut self, m: &Array1<f64>) -> InversionResult<()> {
        let f = self.mapping.transform(m)? - &self.reference;
        self.irls.update(&f);
        Ok(())
    }

    pub fn cool_epsilon(&mut self, factor: f64, minimum: f64) {
        self.irls.cool_epsilon(factor, minimum);
    }

    fn w2(&self) -> Array1<f64> {
        &self.volumes * &self.cell_weights * self.irls.weights()
    }

    fn residual(&self, m: &Array1<f64>) -> InversionResult<Array1<f64>> {
        Ok(self.mapping.transform(m)? - &self.reference)
    }
}

impl ObjectiveFunction for Smallness {
    fn n_params(&self) -> usize {
        self.mapping.n_params()
    }

    fn value(&self, m: &Array1<f64>) -> InversionResult<f64> {
        let r = self.residual(m)?;
        Ok((self.w2() * &r).dot(&r))
    }

    fn deriv(&self, m: &Array1<f64>) -> InversionResult<Array1<f64>> {
        let r = self.residual(m)?;
        self.mapping.deriv_transpose(m, &(2.0 * self.w2() * &r))
    }

    fn deriv2(&self, m: &Array1<f64>, v: &Array1<f64>) -> InversionResult<Array1<f64>> {
        let jv = self.mapping.deriv(m, v)?;
        self.mapping.deriv_transpose(m, &(2.0 * self.w2() * &jv))
    }
}

// ───────────────────────────── smoothness ────────────────────────────

/// `‖W_axis G_axis f(m)‖²` on interior faces normal to `axis`.
#[derive(Debug, Clone)]
pub struct SmoothnessFirstOrder {
    axis: usize,
    mapping: Arc<dyn Mapping>,
    gradient: CsrMatrix,
    averaging: CsrMatrix,
    volumes: Array1<f64>,
    cell_weights: Array1<f64>,
    irls: IrlsWeights,
    face_w2: Array1<f64>,
}

impl SmoothnessFirstOrder {
    pub fn new(mesh: &dyn Mesh, mapping: Arc<dyn Mapping>, axis: usize) -> InversionResult<Self> {
        ensure_len("Smoothness mapping output", mesh.n_cells(), mapping.n_out())?;
        let gradient = mesh.gradient_operator(axis)?;
        let averaging = mesh.average_cell_to_face(axis)?;
        let volumes = mesh.cell_volumes();
        let n_faces = gradient.nrows();
        let mut term = SmoothnessFirstOrder {
            axis,
            mapping,
            gradient,
            averaging,
            cell_weights: Array1::ones(volumes.len()),
            volumes,
            irls: IrlsWeights::new(2.0, 1e-2, n_faces)?,
            face_w2: Array1::zeros(n_faces),
        };
        term.refresh_face_weights();
        Ok(term)
    }

    pub fn with_norm(mut self, norm: f64, epsilon: f64) -> InversionResult<Self> {
        self.irls = IrlsWeights::new(norm, epsilon, self.gradient.nrows())?;
        self.refresh_face_weights();
        Ok(self)
    }

    pub fn axis(&self) -> usize {
        self.axis
    }

    pub fn mapping(&self) -> &Arc<dyn Mapping> {
        &self.mapping
    }

    pub fn cell_weights(&self) -> &Array1<f64> {
        &self.cell_weights
    }

    pub fn set_cell_weights(&mut self, weights: Array1<f64>) -> InversionResult<()> {
        check_cell_weights("Smoothness cell weights", &weights, self.volumes.len())?;
        self.cell_weights = weights;
        self.refresh_face_weights();
        Ok(())
    }

    pub fn irls(&self) -> &IrlsWeights {
        &self.irls
    }

    pub fn update_irls(&mut self, m: &Array1<f64>) -> InversionResult<()> {
        let f = self.gradient.dot(&self.mapping.transform(m)?);
        self.irls.update(&f);
        self.refresh_face_weights();
        Ok(())
    }

    pub fn cool_epsilon(&mut self, factor: f64, minimum: f64) {
        self.irls.cool_epsilon(factor, minimum);
    }

    fn refresh_face_weights(&mut self) {
        let cell = &self.volumes * &self.cell_weights;
        self.face_w2 = self.averaging.dot(&cell) * self.irls.weights();
    }
}

impl ObjectiveFunction for SmoothnessFirstOrder {
    fn n_params(&self) -> usize {
        self.mapping.n_params()
    }

    fn value(&self, m: &Array1<f64>) -> InversionResult<f64> {
        let g = self.gradient.dot(&self.mapping.transform(m)?);
        Ok((&self.face_w2 * &g).dot(&g))
    }

    fn deriv(&self, m: &Array1<f64>) -> InversionResult<Array1<f64>> {
        let g = self.gradient.dot(&self.mapping.transform(m)?);
        let cells = self.gradient.transpose_dot(&(2.0 * &self.face_w2 * &g));
        self.mapping.deriv_transpose(m, &cells)
    }

    fn deriv2(&self, m: &Array1<f64>, v: &Array1<f64>) -> InversionResult<Array1<f64>> {
        let gv = self.gradient.dot(&self.mapping.deriv(m, v)?);
        let cells = self.gradient.transpose_dot(&(2.0 * &self.face_w2 * &gv));
        self.mapping.deriv_transpose(m, &cells)
    }
}

// ───────────────────────────── assembly ──────────────────────────────

const AXIS_LABELS: [&str; 3] = ["smoothness_x", "smoothness_y", "smoothness_z"];

/// Assemble smallness plus one smoothness term per mesh axis, weighted by
/// the α coefficients of `config`. Wrap the result in a
/// `Regularization` entry whose weight is β.
pub fn build_regularization(
    mesh: &dyn Mesh,
    mapping: Arc<dyn Mapping>,
    config: &RegularizationConfig,
    reference: Option<Array1<f64>>,
) -> InversionResult<ComboObjective> {
    config.validate()?;
    ensure_len("regularization mapping output", mesh.n_cells(), mapping.n_out())?;

    let mut smallness = Smallness::new(Arc::clone(&mapping), mesh.cell_volumes())?
        .with_norm(config.norm_s, config.irls_epsilon)?;
    if let Some(r) = reference {
        smallness = smallness.with_reference(r)?;
    }

    let mut combo = ComboObjective::new(mapping.n_params());
    combo.push(
        "smallness",
        TermRole::Regularization,
        config.alpha_s,
        Term::Smallness(smallness),
    )?;

    let alphas = [config.alpha_x, config.alpha_y, config.alpha_z];
    for axis in 0..mesh.dim() {
        let smooth = SmoothnessFirstOrder::new(mesh, Arc::clone(&mapping), axis)?
            .with_norm(config.norm_gradient, config.irls_epsilon)?;
        combo.push(
            AXIS_LABELS[axis],
            TermRole::Regularization,
            alphas[axis],
            Term::Smoothness(smooth),
        )?;
    }
    Ok(combo)
}
