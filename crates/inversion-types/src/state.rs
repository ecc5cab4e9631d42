// ─────────────────────────────────────────────────────────────────────
// SCPN Inversion Core — State
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
use std::fmt;

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::error::{InversionError, InversionResult};

/// Rectilinear 1D/2D/3D tensor mesh with precomputed cell centres.
/// Cells are ordered x-fastest: `index = ix + nx·(iy + ny·iz)`.
#[derive(Debug, Clone)]
pub struct TensorMesh {
    pub dim: usize,
    pub shape: [usize; 3],   // [nx, ny, nz], unused axes = 1
    pub h: Vec<Array1<f64>>, // cell widths per axis [dim]
    pub origin: Vec<f64>,    // lower corner per axis [dim]
    pub centers: Vec<Array1<f64>>,
}

impl TensorMesh {
    /// Build from per-axis cell widths. All widths must be finite and > 0.
    pub fn new(h: Vec<Vec<f64>>, origin: Vec<f64>) -> InversionResult<Self> {
        let dim = h.len();
        if !(1..=3).contains(&dim) {
            return Err(InversionError::ConfigError(format!(
                "TensorMesh supports 1 to 3 dimensions, got {dim}"
            )));
        }
        if origin.len() != dim {
            return Err(InversionError::DimensionMismatch {
                context: "TensorMesh origin".to_string(),
                expected: dim,
                got: origin.len(),
            });
        }
        let mut shape = [1usize; 3];
        for (axis, widths) in h.iter().enumerate() {
            if widths.is_empty() {
                return Err(InversionError::ConfigError(format!(
                    "TensorMesh axis {axis} has no cells"
                )));
            }
            if widths.iter().any(|w| !w.is_finite() || *w <= 0.0) {
                return Err(InversionError::ConfigError(format!(
                    "TensorMesh axis {axis} has non-positive cell widths"
                )));
            }
            shape[axis] = widths.len();
        }

        let h: Vec<Array1<f64>> = h.into_iter().map(Array1::from_vec).collect();
        let centers = h
            .iter()
            .zip(origin.iter())
            .map(|(widths, &x0)| {
                let mut edge = x0;
                widths
                    .iter()
                    .map(|&w| {
                        let c = edge + 0.5 * w;
                        edge += w;
                        c
                    })
                    .collect::<Array1<f64>>()
            })
            .collect();

        Ok(TensorMesh {
            dim,
            shape,
            h,
            origin,
            centers,
        })
    }

    /// Uniform mesh with `shape[axis]` cells of width `spacing` from the origin 0.
    pub fn uniform(shape: &[usize], spacing: f64) -> InversionResult<Self> {
        let h = shape.iter().map(|&n| vec![spacing; n]).collect();
        Self::new(h, vec![0.0; shape.len()])
    }

    pub fn n_cells(&self) -> usize {
        self.shape.iter().product()
    }

    /// Flat index of cell (ix, iy, iz).
    #[inline]
    pub fn cell_index(&self, ix: usize, iy: usize, iz: usize) -> usize {
        ix + self.shape[0] * (iy + self.shape[1] * iz)
    }

    /// Inverse of [`TensorMesh::cell_index`].
    #[inline]
    pub fn cell_subscript(&self, index: usize) -> [usize; 3] {
        let nx = self.shape[0];
        let ny = self.shape[1];
        [index % nx, (index / nx) % ny, index / (nx * ny)]
    }

    /// Width of the cell at `sub` along `axis` (1.0 for unused axes).
    #[inline]
    pub fn width(&self, axis: usize, sub: &[usize; 3]) -> f64 {
        if axis < self.dim {
            self.h[axis][sub[axis]]
        } else {
            1.0
        }
    }

    pub fn cell_volumes(&self) -> Array1<f64> {
        Array1::from_shape_fn(self.n_cells(), |c| {
            let sub = self.cell_subscript(c);
            (0..self.dim).map(|axis| self.h[axis][sub[axis]]).product()
        })
    }

    /// Cell-centre coordinates along `axis` for every cell, in cell order.
    pub fn cell_centers_along(&self, axis: usize) -> Array1<f64> {
        Array1::from_shape_fn(self.n_cells(), |c| {
            let sub = self.cell_subscript(c);
            self.centers[axis][sub[axis]]
        })
    }
}

/// Why the optimization loop stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationStatus {
    /// Projected gradient norm fell below tolerance.
    GradientTolerance,
    /// Accepted step fell below tolerance.
    StepTolerance,
    /// Objective change fell below tolerance.
    FunctionTolerance,
    /// A directive requested termination (e.g. target misfit reached).
    DirectiveStop { directive: String },
    /// Iteration budget exhausted.
    MaxIterations,
    /// No acceptable step after all retries.
    LineSearchFailed,
    /// Non-finite objective at the current iterate.
    NumericalFailure,
}

impl TerminationStatus {
    pub fn is_converged(&self) -> bool {
        matches!(
            self,
            TerminationStatus::GradientTolerance
                | TerminationStatus::StepTolerance
                | TerminationStatus::FunctionTolerance
                | TerminationStatus::DirectiveStop { .. }
        )
    }
}

impl fmt::Display for TerminationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationStatus::GradientTolerance => write!(f, "projected gradient below tolerance"),
            TerminationStatus::StepTolerance => write!(f, "step size below tolerance"),
            TerminationStatus::FunctionTolerance => write!(f, "objective change below tolerance"),
            TerminationStatus::DirectiveStop { directive } => {
                write!(f, "stop requested by directive `{directive}`")
            }
            TerminationStatus::MaxIterations => write!(f, "maximum iterations reached"),
            TerminationStatus::LineSearchFailed => write!(f, "line search failed"),
            TerminationStatus::NumericalFailure => write!(f, "non-finite objective"),
        }
    }
}

/// One row of the inversion history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: usize,
    pub beta: f64,
    pub phi_d: f64,
    pub phi_m: f64,
    pub phi_coupling: f64,
    pub objective: f64,
    pub step_norm: f64,
    pub projected_gradient_norm: f64,
    pub line_search_iterations: usize,
    pub cg_iterations: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mesh_centres_and_volumes() {
        let mesh = TensorMesh::new(vec![vec![1.0, 2.0, 3.0], vec![0.5, 0.5]], vec![0.0, -1.0])
            .unwrap();
        assert_eq!(mesh.n_cells(), 6);
        assert_eq!(mesh.shape, [3, 2, 1]);
        assert!((mesh.centers[0][0] - 0.5).abs() < 1e-12);
        assert!((mesh.centers[0][1] - 2.0).abs() < 1e-12);
        assert!((mesh.centers[0][2] - 4.5).abs() < 1e-12);
        assert!((mesh.centers[1][1] + 0.25).abs() < 1e-12);

        let vol = mesh.cell_volumes();
        assert!((vol[mesh.cell_index(2, 1, 0)] - 1.5).abs() < 1e-12);
        assert!((vol.sum() - 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_subscript_inverts_index() {
        let mesh = TensorMesh::uniform(&[4, 3, 2], 1.0).unwrap();
        for c in 0..mesh.n_cells() {
            let [ix, iy, iz] = mesh.cell_subscript(c);
            assert_eq!(mesh.cell_index(ix, iy, iz), c);
        }
    }

    #[test]
    fn test_mesh_rejects_bad_widths() {
        assert!(TensorMesh::new(vec![vec![1.0, 0.0]], vec![0.0]).is_err());
        assert!(TensorMesh::new(vec![vec![1.0]], vec![0.0, 0.0]).is_err());
        assert!(TensorMesh::new(vec![], vec![]).is_err());
    }

    #[test]
    fn test_status_convergence_classes() {
        assert!(TerminationStatus::GradientTolerance.is_converged());
        assert!(TerminationStatus::DirectiveStop {
            directive: "target_misfit".to_string()
        }
        .is_converged());
        assert!(!TerminationStatus::MaxIterations.is_converged());
        assert!(!TerminationStatus::LineSearchFailed.is_converged());
        assert!(!TerminationStatus::NumericalFailure.is_converged());
    }
}
