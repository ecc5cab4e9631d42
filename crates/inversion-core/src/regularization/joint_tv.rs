// ─────────────────────────────────────────────────────────────────────
// SCPN Inversion Core — Joint Total Variation
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Joint total variation `Σ_c w_c sqrt(x_c)` with
//! `x_c = ε + Σ_k ‖∇m_k(c)‖²`, ε > 0.
//!
//! Two modes share one "diffusivity" `D_c = w_c / s_c`:
//!   - `Exact`: `s = sqrt(x(m))`. Exact value and gradient; the
//!     Hessian-vector product is the lagged-diffusivity operator
//!     `Σ_d G_dᵀ D G_d` per block (PSD).
//!   - `Irls`: `s = s₀` frozen by [`JointTotalVariation::update_reference`].
//!     The penalty becomes the quadratic majorizer
//!     `Σ_c w_c [s₀ + (x_c − s₀²) / (2 s₀)]`, whose value, gradient and
//!     Hessian are mutually exact. Until a reference is set the term
//!     behaves as `Exact`.

use std::sync::Arc;

use inversion_math::mesh::Mesh;
use inversion_math::sparse::CsrMatrix;
use inversion_types::error::{ensure_len, InversionError, InversionResult};
use ndarray::Array1;

use super::{cell_gradients, check_cell_weights, gradient_adjoint, gradient_field, JointBlocks};
use crate::mapping::Wires;
use crate::objective::{ModelCache, ObjectiveFunction};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JtvMode {
    Exact,
    Irls,
}

/// Gradient fields per model and the joint magnitude `x_c`.
#[derive(Debug)]
struct JtvFields {
    gradients: Vec<Vec<Array1<f64>>>,
    x: Array1<f64>,
}

#[derive(Debug, Clone)]
pub struct JointTotalVariation {
    blocks: JointBlocks,
    gradients: Vec<CsrMatrix>,
    cell_weights: Array1<f64>,
    epsilon: f64,
    mode: JtvMode,
    reference: Option<Array1<f64>>,
    fields: ModelCache<JtvFields>,
}

impl JointTotalVariation {
    pub fn new(mesh: &dyn Mesh, wires: &Wires, epsilon: f64) -> InversionResult<Self> {
        if !epsilon.is_finite() || epsilon <= 0.0 {
            return Err(InversionError::ConfigError(format!(
                "joint TV epsilon must be finite and > 0, got {epsilon}"
            )));
        }
        Ok(JointTotalVariation {
            blocks: JointBlocks::new(wires, mesh.n_cells(), "JointTotalVariation")?,
            gradients: cell_gradients(mesh)?,
            cell_weights: mesh.cell_volumes(),
            epsilon,
            mode: JtvMode::Exact,
            reference: None,
            fields: ModelCache::new(),
        })
    }

    /// Same penalty, minimised through frozen-reference quadratic majorizers.
    pub fn irls(mesh: &dyn Mesh, wires: &Wires, epsilon: f64) -> InversionResult<Self> {
        let mut term = Self::new(mesh, wires, epsilon)?;
        term.mode = JtvMode::Irls;
        Ok(term)
    }

    pub fn with_cell_weights(mut self, weights: Array1<f64>) -> InversionResult<Self> {
        check_cell_weights("JointTotalVariation cell weights", &weights, self.blocks.n_cells())?;
        self.cell_weights = weights;
        Ok(self)
    }

    pub fn mode(&self) -> JtvMode {
        self.mode
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn reference(&self) -> Option<&Array1<f64>> {
        self.reference.as_ref()
    }

    /// Freeze `s₀ = sqrt(x(m))` for IRLS mode.
    pub fn update_reference(&mut self, m: &Array1<f64>) -> InversionResult<()> {
        let fields = self.fields(m)?;
        self.reference = Some(fields.x.mapv(f64::sqrt));
        Ok(())
    }

    /// Joint gradient magnitude squared plus ε, per cell.
    pub fn magnitude_squared(&self, m: &Array1<f64>) -> InversionResult<Array1<f64>> {
        Ok(self.fields(m)?.x.clone())
    }

    fn fields(&self, m: &Array1<f64>) -> InversionResult<Arc<JtvFields>> {
        ensure_len("JointTotalVariation model", self.blocks.n_params(), m.len())?;
        self.fields.get_or_try_insert(m, || {
            let gradients: Vec<Vec<Array1<f64>>> = self
                .blocks
                .split(m)?
                .iter()
                .map(|mk| gradient_field(&self.gradients, mk))
                .collect();
            let mut x = Array1::from_elem(self.blocks.n_cells(), self.epsilon);
            for field in &gradients {
                for gd in field {
                    x += &gd.mapv(|g| g * g);
                }
            }
            Ok(JtvFields { gradients, x })
        })
    }

    /// Reference magnitude in effect: `s₀` in IRLS mode, else `sqrt(x)`.
    fn scale(&self, fields: &JtvFields) -> Array1<f64> {
        match (self.mode, &self.reference) {
            (JtvMode::Irls, Some(s0)) => s0.clone(),
            _ => fields.x.mapv(f64::sqrt),
        }
    }

    fn diffusivity(&self, fields: &JtvFields) -> Array1<f64> {
        &self.cell_weights / &self.scale(fields)
    }

    /// `Σ_d G_dᵀ (D ⊙ G_d u_k)` for every block of `u`.
    fn apply_diffusion(
        &self,
        diffusivity: &Array1<f64>,
        fields: &[Vec<Array1<f64>>],
    ) -> InversionResult<Array1<f64>> {
        let parts: Vec<Array1<f64>> = fields
            .iter()
            .map(|field| {
                let scaled: Vec<Array1<f64>> = field.iter().map(|gd| diffusivity * gd).collect();
                gradient_adjoint(&self.gradients, &scaled)
            })
            .collect();
        self.blocks.stack(&parts)
    }
}

impl ObjectiveFunction for JointTotalVariation {
    fn n_params(&self) -> usize {
        self.blocks.n_params()
    }

    fn value(&self, m: &Array1<f64>) -> InversionResult<f64> {
        let fields = self.fields(m)?;
        match (self.mode, &self.reference) {
            (JtvMode::Irls, Some(s0)) => Ok(self
                .cell_weights
                .iter()
                .zip(s0.iter())
                .zip(fields.x.iter())
                .map(|((w, s), x)| w * (s + (x - s * s) / (2.0 * s)))
                .sum()),
            _ => Ok(self.cell_weights.dot(&fields.x.mapv(f64::sqrt))),
        }
    }

    fn deriv(&self, m: &Array1<f64>) -> InversionResult<Array1<f64>> {
        let fields = self.fields(m)?;
        let d = self.diffusivity(&fields);
        self.apply_diffusion(&d, &fields.gradients)
    }

    fn deriv2(&self, m: &Array1<f64>, v: &Array1<f64>) -> InversionResult<Array1<f64>> {
        let fields = self.fields(m)?;
        ensure_len("JointTotalVariation direction", self.blocks.n_params(), v.len())?;
        let d = self.diffusivity(&fields);
        let dfields: Vec<Vec<Array1<f64>>> = self
            .blocks
            .split(v)?
            .iter()
            .map(|vk| gradient_field(&self.gradients, vk))
            .collect();
        self.apply_diffusion(&d, &dfields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inversion_types::state::TensorMesh;

    fn setup() -> (TensorMesh, Wires) {
        let mesh = TensorMesh::new(vec![vec![1.0, 0.5, 2.0, 1.0, 1.0], vec![1.0, 2.0, 1.0]], vec![0.0, 0.0])
            .unwrap();
        let n = mesh.n_cells();
        (mesh, Wires::new(&[("sigma", n), ("rho", n)]).unwrap())
    }

    fn model(n: usize) -> Array1<f64> {
        Array1::from_shape_fn(2 * n, |i| (0.61 * i as f64).sin() + 0.1 * i as f64)
    }

    #[test]
    fn test_constant_models_give_sqrt_epsilon() {
        let (mesh, wires) = setup();
        let jtv = JointTotalVariation::new(&mesh, &wires, 0.04).unwrap();
        let m = Array1::from_elem(2 * mesh.n_cells(), 5.0);
        let expected = 0.2 * mesh.cell_volumes().sum();
        assert!((jtv.value(&m).unwrap() - expected).abs() < 1e-12);
        assert!(jtv.deriv(&m).unwrap().iter().all(|g| g.abs() < 1e-14));
    }

    #[test]
    fn test_exact_gradient_matches_finite_difference() {
        let (mesh, wires) = setup();
        let jtv = JointTotalVariation::new(&mesh, &wires, 1e-2).unwrap();
        let m = model(mesh.n_cells());
        let g = jtv.deriv(&m).unwrap();
        let h = 1e-6;
        for j in 0..m.len() {
            let mut mp = m.clone();
            mp[j] += h;
            let mut mm = m.clone();
            mm[j] -= h;
            let fd = (jtv.value(&mp).unwrap() - jtv.value(&mm).unwrap()) / (2.0 * h);
            assert!((fd - g[j]).abs() < 1e-6, "component {j}: {fd} vs {}", g[j]);
        }
    }

    #[test]
    fn test_irls_majorizer_touches_at_reference() {
        let (mesh, wires) = setup();
        let exact = JointTotalVariation::new(&mesh, &wires, 1e-2).unwrap();
        let mut irls = JointTotalVariation::irls(&mesh, &wires, 1e-2).unwrap();
        let m0 = model(mesh.n_cells());
        irls.update_reference(&m0).unwrap();

        let v0 = irls.value(&m0).unwrap();
        assert!((v0 - exact.value(&m0).unwrap()).abs() < 1e-10);
        let g_irls = irls.deriv(&m0).unwrap();
        let g_exact = exact.deriv(&m0).unwrap();
        for j in 0..m0.len() {
            assert!((g_irls[j] - g_exact[j]).abs() < 1e-10);
        }
        // Majorizer lies above the true penalty away from the reference.
        let m1 = m0.mapv(|x| 1.7 * x - 0.3);
        assert!(irls.value(&m1).unwrap() >= exact.value(&m1).unwrap() - 1e-12);
    }

    #[test]
    fn test_irls_mode_is_exact_quadratic() {
        let (mesh, wires) = setup();
        let mut irls = JointTotalVariation::irls(&mesh, &wires, 1e-2).unwrap();
        let m0 = model(mesh.n_cells());
        irls.update_reference(&m0).unwrap();
        let v = Array1::from_shape_fn(m0.len(), |i| (1.3 * i as f64).cos());
        let g0 = irls.deriv(&m0).unwrap();
        let g1 = irls.deriv(&(&m0 + &v)).unwrap();
        let hv = irls.deriv2(&m0, &v).unwrap();
        for j in 0..m0.len() {
            assert!((g1[j] - g0[j] - hv[j]).abs() < 1e-10);
        }
    }

    #[test]
    fn test_lagged_diffusivity_is_psd() {
        let (mesh, wires) = setup();
        let jtv = JointTotalVariation::new(&mesh, &wires, 1e-3).unwrap();
        let m = model(mesh.n_cells());
        let u = Array1::from_shape_fn(m.len(), |i| (2.1 * i as f64).sin());
        assert!(u.dot(&jtv.deriv2(&m, &u).unwrap()) >= 0.0);
    }

    #[test]
    fn test_epsilon_must_be_positive() {
        let (mesh, wires) = setup();
        assert!(JointTotalVariation::new(&mesh, &wires, 0.0).is_err());
        assert!(JointTotalVariation::new(&mesh, &wires, f64::NAN).is_err());
    }
}
