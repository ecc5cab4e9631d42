// ─────────────────────────────────────────────────────────────────────
// SCPN Inversion Core — Mesh Operators
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Discrete differential operators on a rectilinear tensor mesh.
//!
//! Two gradient flavours are provided:
//!   - `gradient_operator(axis)`: cell → interior face difference,
//!     `(m[c+1] − m[c]) / ((h_c + h_{c+1})/2)`. Used by first-order
//!     smoothness where boundary faces carry no penalty.
//!   - `cell_centered_gradient(axis)`: cell → cell, central differences in
//!     the interior and one-sided differences at the boundary. Used by
//!     joint terms that compare gradient fields cell by cell.
//!
//! The divergence acts on *all* faces (boundary included) so that
//! `boundary_faces` can identify the columns carrying flux out of the domain.

use inversion_types::error::{InversionError, InversionResult};
use inversion_types::state::TensorMesh;
use ndarray::Array1;

use crate::sparse::CsrMatrix;

/// Operator contract consumed by regularization terms.
pub trait Mesh: Send + Sync {
    fn dim(&self) -> usize;
    fn n_cells(&self) -> usize;
    fn cell_volumes(&self) -> Array1<f64>;
    /// Cell → interior-face gradient along `axis`.
    fn gradient_operator(&self, axis: usize) -> InversionResult<CsrMatrix>;
    /// Cell → cell gradient along `axis`.
    fn cell_centered_gradient(&self, axis: usize) -> InversionResult<CsrMatrix>;
    /// Cell → interior-face arithmetic average along `axis`.
    fn average_cell_to_face(&self, axis: usize) -> InversionResult<CsrMatrix>;
    /// All faces (x faces, then y, then z) → cells.
    fn divergence_operator(&self) -> InversionResult<CsrMatrix>;
    /// Indices into the divergence columns lying on the domain boundary.
    fn boundary_faces(&self) -> Vec<usize>;
}

// ───────────────────────────── helpers ───────────────────────────────

fn check_axis(mesh: &TensorMesh, axis: usize) -> InversionResult<()> {
    if axis >= mesh.dim {
        return Err(InversionError::ConfigError(format!(
            "axis {axis} out of range for a {}-D mesh",
            mesh.dim
        )));
    }
    Ok(())
}

/// Flat-index distance between neighbours along `axis`.
#[inline]
fn stride(mesh: &TensorMesh, axis: usize) -> usize {
    match axis {
        0 => 1,
        1 => mesh.shape[0],
        _ => mesh.shape[0] * mesh.shape[1],
    }
}

/// Number of faces normal to `axis`, boundary included.
fn n_faces_along(mesh: &TensorMesh, axis: usize) -> usize {
    let mut shape = mesh.shape;
    shape[axis] += 1;
    shape.iter().product()
}

fn face_index(mesh: &TensorMesh, axis: usize, sub: [usize; 3]) -> usize {
    let mut shape = mesh.shape;
    shape[axis] += 1;
    sub[0] + shape[0] * (sub[1] + shape[1] * sub[2])
}

/// Build a two-point interior-face operator: row per adjacent cell pair
/// `(c, c + stride)` with coefficients from `coeffs(h_lo, h_hi)`.
fn interior_face_operator<F>(
    mesh: &TensorMesh,
    axis: usize,
    coeffs: F,
) -> InversionResult<CsrMatrix>
where
    F: Fn(f64, f64) -> (f64, f64),
{
    let n = mesh.n_cells();
    let st = stride(mesh, axis);
    let last = mesh.shape[axis] - 1;
    let mut triplets = Vec::with_capacity(2 * n);
    let mut row = 0;
    for c in 0..n {
        let sub = mesh.cell_subscript(c);
        if sub[axis] == last {
            continue;
        }
        let h_lo = mesh.h[axis][sub[axis]];
        let h_hi = mesh.h[axis][sub[axis] + 1];
        let (w_lo, w_hi) = coeffs(h_lo, h_hi);
        triplets.push((row, c, w_lo));
        triplets.push((row, c + st, w_hi));
        row += 1;
    }
    CsrMatrix::from_triplets(row, n, &triplets)
}

// ──────────────────────── TensorMesh operators ───────────────────────

impl Mesh for TensorMesh {
    fn dim(&self) -> usize {
        self.dim
    }

    fn n_cells(&self) -> usize {
        TensorMesh::n_cells(self)
    }

    fn cell_volumes(&self) -> Array1<f64> {
        TensorMesh::cell_volumes(self)
    }

    fn gradient_operator(&self, axis: usize) -> InversionResult<CsrMatrix> {
        check_axis(self, axis)?;
        interior_face_operator(self, axis, |h_lo, h_hi| {
            let d = 0.5 * (h_lo + h_hi);
            (-1.0 / d, 1.0 / d)
        })
    }

    fn cell_centered_gradient(&self, axis: usize) -> InversionResult<CsrMatrix> {
        check_axis(self, axis)?;
        let n = self.n_cells();
        let n_axis = self.shape[axis];
        let st = stride(self, axis);
        let x = &self.centers[axis];
        let mut triplets = Vec::with_capacity(2 * n);
        if n_axis > 1 {
            for c in 0..n {
                let i = self.cell_subscript(c)[axis];
                let (lo, hi, i_lo, i_hi) = if i == 0 {
                    (c, c + st, 0, 1)
                } else if i == n_axis - 1 {
                    (c - st, c, i - 1, i)
                } else {
                    (c - st, c + st, i - 1, i + 1)
                };
                let inv_d = 1.0 / (x[i_hi] - x[i_lo]);
                triplets.push((c, lo, -inv_d));
                triplets.push((c, hi, inv_d));
            }
        }
        CsrMatrix::from_triplets(n, n, &triplets)
    }

    fn average_cell_to_face(&self, axis: usize) -> InversionResult<CsrMatrix> {
        check_axis(self, axis)?;
        interior_face_operator(self, axis, |_, _| (0.5, 0.5))
    }

    fn divergence_operator(&self) -> InversionResult<CsrMatrix> {
        let n = self.n_cells();
        let mut offsets = [0usize; 3];
        let mut total = 0;
        for (axis, offset) in offsets.iter_mut().enumerate().take(self.dim) {
            *offset = total;
            total += n_faces_along(self, axis);
        }
        let mut triplets = Vec::with_capacity(2 * self.dim * n);
        for c in 0..n {
            let sub = self.cell_subscript(c);
            for axis in 0..self.dim {
                let inv_h = 1.0 / self.h[axis][sub[axis]];
                let lo = offsets[axis] + face_index(self, axis, sub);
                let mut sub_hi = sub;
                sub_hi[axis] += 1;
                let hi = offsets[axis] + face_index(self, axis, sub_hi);
                triplets.push((c, lo, -inv_h));
                triplets.push((c, hi, inv_h));
            }
        }
        CsrMatrix::from_triplets(n, total, &triplets)
    }

    fn boundary_faces(&self) -> Vec<usize> {
        let mut out = Vec::new();
        let mut offset = 0;
        for axis in 0..self.dim {
            let mut shape = self.shape;
            shape[axis] += 1;
            let n_axis_faces = n_faces_along(self, axis);
            for f in 0..n_axis_faces {
                let i = match axis {
                    0 => f % shape[0],
                    1 => (f / shape[0]) % shape[1],
                    _ => f / (shape[0] * shape[1]),
                };
                if i == 0 || i == shape[axis] - 1 {
                    out.push(offset + f);
                }
            }
            offset += n_axis_faces;
        }
        out
    }
}
