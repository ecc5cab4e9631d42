//! Regularization terms.
//!
//! Single-model terms ([`least_squares`]) penalise one property model through
//! a mapping; joint terms ([`cross_gradient`], [`joint_tv`],
//! [`correspondence`]) couple two or more models stacked by
//! [`crate::mapping::Wires`] on a shared mesh and return their derivatives
//! in wire order.

pub mod correspondence;
pub mod cross_gradient;
pub mod joint_tv;
pub mod least_squares;

use inversion_math::mesh::Mesh;
use inversion_math::sparse::CsrMatrix;
use inversion_types::error::{ensure_len, InversionError, InversionResult};
use ndarray::Array1;

use crate::mapping::{Mapping, Wires};

/// Block layout shared by the joint terms.
#[derive(Debug, Clone)]
pub(crate) struct JointBlocks {
    wires: Wires,
    n_cells: usize,
}

impl JointBlocks {
    pub(crate) fn new(wires: &Wires, n_cells: usize, term: &str) -> InversionResult<Self> {
        if wires.len() < 2 {
            return Err(InversionError::ConfigError(format!(
                "{term} couples at least 2 models, got {}",
                wires.len()
            )));
        }
        for w in wires.maps() {
            ensure_len(&format!("{term} block `{}`", w.name()), n_cells, w.n_out())?;
        }
        Ok(JointBlocks {
            wires: wires.clone(),
            n_cells,
        })
    }

    pub(crate) fn n_params(&self) -> usize {
        self.wires.n_params()
    }

    pub(crate) fn n_models(&self) -> usize {
        self.wires.len()
    }

    pub(crate) fn n_cells(&self) -> usize {
        self.n_cells
    }

    pub(crate) fn split(&self, m: &Array1<f64>) -> InversionResult<Vec<Array1<f64>>> {
        self.wires.split(m)
    }

    pub(crate) fn zeros(&self) -> Vec<Array1<f64>> {
        vec![Array1::zeros(self.n_cells); self.n_models()]
    }

    pub(crate) fn stack(&self, blocks: &[Array1<f64>]) -> InversionResult<Array1<f64>> {
        self.wires.stack(blocks)
    }
}

/// Cell-centred gradient operators for every mesh axis.
pub(crate) fn cell_gradients(mesh: &dyn Mesh) -> InversionResult<Vec<CsrMatrix>> {
    (0..mesh.dim())
        .map(|axis| mesh.cell_centered_gradient(axis))
        .collect()
}

/// `[G_d · m]_d` for one model.
pub(crate) fn gradient_field(gradients: &[CsrMatrix], m: &Array1<f64>) -> Vec<Array1<f64>> {
    gradients.iter().map(|g| g.dot(m)).collect()
}

/// Σ_d G_dᵀ f_d.
pub(crate) fn gradient_adjoint(gradients: &[CsrMatrix], f: &[Array1<f64>]) -> Array1<f64> {
    let mut out = Array1::zeros(gradients.first().map_or(0, |g| g.ncols()));
    for (g, fd) in gradients.iter().zip(f) {
        out += &g.transpose_dot(fd);
    }
    out
}

/// Per-cell weights must be finite and >= 0.
pub(crate) fn check_cell_weights(
    context: &str,
    weights: &Array1<f64>,
    n_cells: usize,
) -> InversionResult<()> {
    ensure_len(context, n_cells, weights.len())?;
    if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
        return Err(InversionError::ConfigError(format!(
            "{context} must be finite and >= 0"
        )));
    }
    Ok(())
}
