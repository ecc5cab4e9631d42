// ─────────────────────────────────────────────────────────────────────
// SCPN Inversion Core — Cross-Gradient Coupling
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Structural similarity through the cross-gradient:
//!
//!   φ_cg = Σ_pairs Σ_c w_c Σ_{i<j} (a_i b_j − a_j b_i)²
//!
//! with `a = ∇m_p(c)`, `b = ∇m_q(c)` the cell-centred gradients of a pair of
//! models. In 3-D this is `|a × b|²`; in 2-D the single wedge component;
//! on a 1-D mesh it vanishes identically. Parallel, identical or constant
//! models give exactly zero.
//!
//! The Hessian-vector product is the Gauss–Newton form of the wedge
//! residual, `2 Jᵀ W J`, which is PSD. The exact Hessian is indefinite.

use inversion_math::mesh::Mesh;
use inversion_math::sparse::CsrMatrix;
use inversion_types::error::{ensure_len, InversionError, InversionResult};
use ndarray::Array1;

use super::{cell_gradients, check_cell_weights, gradient_adjoint, gradient_field, JointBlocks};
use crate::mapping::Wires;
use crate::objective::{ModelCache, ObjectiveFunction};

type Vec3 = [f64; 3];
type Wedge = [[f64; 3]; 3];

/// Per-model gradient fields `fields[k][axis]`.
type GradientFields = Vec<Vec<Array1<f64>>>;

#[derive(Debug, Clone)]
pub struct CrossGradient {
    blocks: JointBlocks,
    gradients: Vec<CsrMatrix>,
    cell_weights: Array1<f64>,
    pairs: Vec<(usize, usize)>,
    fields: ModelCache<GradientFields>,
}

impl CrossGradient {
    /// All model pairs `i < j` in wire order, cells weighted by volume.
    pub fn new(mesh: &dyn Mesh, wires: &Wires) -> InversionResult<Self> {
        let blocks = JointBlocks::new(wires, mesh.n_cells(), "CrossGradient")?;
        let k = blocks.n_models();
        let pairs = (0..k)
            .flat_map(|i| (i + 1..k).map(move |j| (i, j)))
            .collect();
        Ok(CrossGradient {
            gradients: cell_gradients(mesh)?,
            cell_weights: mesh.cell_volumes(),
            blocks,
            pairs,
            fields: ModelCache::new(),
        })
    }

    /// Restrict to an explicit list of model pairs.
    pub fn with_pairs(mut self, pairs: Vec<(usize, usize)>) -> InversionResult<Self> {
        let k = self.blocks.n_models();
        if pairs.is_empty() {
            return Err(InversionError::ConfigError(
                "CrossGradient pair list is empty".to_string(),
            ));
        }
        if let Some(&(i, j)) = pairs.iter().find(|&&(i, j)| i == j || i >= k || j >= k) {
            return Err(InversionError::ConfigError(format!(
                "CrossGradient pair ({i}, {j}) invalid for {k} models"
            )));
        }
        self.pairs = pairs;
        Ok(self)
    }

    pub fn with_cell_weights(mut self, weights: Array1<f64>) -> InversionResult<Self> {
        check_cell_weights("CrossGradient cell weights", &weights, self.blocks.n_cells())?;
        self.cell_weights = weights;
        Ok(self)
    }

    pub fn pairs(&self) -> &[(usize, usize)] {
        &self.pairs
    }

    fn gradient_fields(&self, m: &Array1<f64>) -> InversionResult<std::sync::Arc<GradientFields>> {
        ensure_len("CrossGradient model", self.blocks.n_params(), m.len())?;
        self.fields.get_or_try_insert(m, || {
            Ok(self
                .blocks
                .split(m)?
                .iter()
                .map(|mk| gradient_field(&self.gradients, mk))
                .collect())
        })
    }

    /// Per-cell `|∇m_p × ∇m_q|²` for one pair, unweighted.
    pub fn cell_values(&self, m: &Array1<f64>, pair: (usize, usize)) -> InversionResult<Array1<f64>> {
        let fields = self.gradient_fields(m)?;
        let (a, b) = (&fields[pair.0], &fields[pair.1]);
        Ok(Array1::from_shape_fn(self.blocks.n_cells(), |c| {
            wedge_norm2(&wedge(&load(a, c), &load(b, c)))
        }))
    }

    /// Adjoint of the wedge linearisation for every pair:
    /// `Σ_pairs Jᵀ(w ⊙ wedge_fn(c))` with `wedge_fn` producing the
    /// per-cell antisymmetric matrix to contract.
    fn apply_adjoint<F>(&self, fields: &GradientFields, wedge_fn: F) -> InversionResult<Array1<f64>>
    where
        F: Fn(usize, usize, usize) -> Wedge,
    {
        let n = self.blocks.n_cells();
        let dim = self.gradients.len();
        let mut out = self.blocks.zeros();
        for &(p, q) in &self.pairs {
            let (a, b) = (&fields[p], &fields[q]);
            let mut ga = vec![Array1::zeros(n); dim];
            let mut gb = vec![Array1::zeros(n); dim];
            for c in 0..n {
                let w = self.cell_weights[c];
                if w == 0.0 {
                    continue;
                }
                let wc = wedge_fn(p, q, c);
                let ac = load(a, c);
                let bc = load(b, c);
                let cb = contract(&wc, &bc);
                let ca = contract(&wc, &ac);
                for d in 0..dim {
                    ga[d][c] = 2.0 * w * cb[d];
                    gb[d][c] = -2.0 * w * ca[d];
                }
            }
            out[p] += &gradient_adjoint(&self.gradients, &ga);
            out[q] += &gradient_adjoint(&self.gradients, &gb);
        }
        self.blocks.stack(&out)
    }
}

impl ObjectiveFunction for CrossGradient {
    fn n_params(&self) -> usize {
        self.blocks.n_params()
    }

    fn value(&self, m: &Array1<f64>) -> InversionResult<f64> {
        let fields = self.gradient_fields(m)?;
        let mut total = 0.0;
        for &(p, q) in &self.pairs {
            let (a, b) = (&fields[p], &fields[q]);
            for c in 0..self.blocks.n_cells() {
                total += self.cell_weights[c] * wedge_norm2(&wedge(&load(a, c), &load(b, c)));
            }
        }
        Ok(total)
    }

    fn deriv(&self, m: &Array1<f64>) -> InversionResult<Array1<f64>> {
        let fields = self.gradient_fields(m)?;
        self.apply_adjoint(&fields, |p, q, c| {
            wedge(&load(&fields[p], c), &load(&fields[q], c))
        })
    }

    fn deriv2(&self, m: &Array1<f64>, v: &Array1<f64>) -> InversionResult<Array1<f64>> {
        let fields = self.gradient_fields(m)?;
        ensure_len("CrossGradient direction", self.blocks.n_params(), v.len())?;
        let dfields: GradientFields = self
            .blocks
            .split(v)?
            .iter()
            .map(|vk| gradient_field(&self.gradients, vk))
            .collect();
        // δ(a ∧ b) = δa ∧ b + a ∧ δb
        self.apply_adjoint(&fields, |p, q, c| {
            let a = load(&fields[p], c);
            let b = load(&fields[q], c);
            let da = load(&dfields[p], c);
            let db = load(&dfields[q], c);
            add(&wedge(&da, &b), &wedge(&a, &db))
        })
    }
}

// ───────────────────────── per-cell algebra ──────────────────────────

#[inline]
fn load(field: &[Array1<f64>], c: usize) -> Vec3 {
    let mut out = [0.0; 3];
    for (d, f) in field.iter().enumerate() {
        out[d] = f[c];
    }
    out
}

/// `c[d][e] = a_d b_e − a_e b_d`.
#[inline]
fn wedge(a: &Vec3, b: &Vec3) -> Wedge {
    let mut c = [[0.0; 3]; 3];
    for d in 0..3 {
        for e in 0..3 {
            c[d][e] = a[d] * b[e] - a[e] * b[d];
        }
    }
    c
}

#[inline]
fn wedge_norm2(c: &Wedge) -> f64 {
    c[0][1] * c[0][1] + c[0][2] * c[0][2] + c[1][2] * c[1][2]
}

#[inline]
fn contract(c: &Wedge, v: &Vec3) -> Vec3 {
    let mut out = [0.0; 3];
    for d in 0..3 {
        out[d] = c[d][0] * v[0] + c[d][1] * v[1] + c[d][2] * v[2];
    }
    out
}

#[inline]
fn add(x: &Wedge, y: &Wedge) -> Wedge {
    let mut out = *x;
    for d in 0..3 {
        for e in 0..3 {
            out[d][e] += y[d][e];
        }
    }
    out
}
