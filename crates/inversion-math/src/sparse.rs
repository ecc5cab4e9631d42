// ─────────────────────────────────────────────────────────────────────
// SCPN Inversion Core — Sparse Operators
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Compressed sparse row matrix with the products needed by
//! regularization terms: `A·x`, `Aᵀ·y` and row scaling.

use inversion_types::error::{InversionError, InversionResult};
use ndarray::{Array1, Array2};

/// CSR matrix. Column indices are sorted within each row, duplicates summed.
#[derive(Debug, Clone, PartialEq)]
pub struct CsrMatrix {
    nrows: usize,
    ncols: usize,
    indptr: Vec<usize>,
    indices: Vec<usize>,
    data: Vec<f64>,
}

impl CsrMatrix {
    /// Assemble from `(row, col, value)` triplets.
    pub fn from_triplets(
        nrows: usize,
        ncols: usize,
        triplets: &[(usize, usize, f64)],
    ) -> InversionResult<Self> {
        let mut rows: Vec<Vec<(usize, f64)>> = vec![Vec::new(); nrows];
        for &(r, c, v) in triplets {
            if r >= nrows || c >= ncols {
                return Err(InversionError::ConfigError(format!(
                    "triplet ({r}, {c}) outside a {nrows}x{ncols} matrix"
                )));
            }
            rows[r].push((c, v));
        }

        let mut indptr = Vec::with_capacity(nrows + 1);
        let mut indices = Vec::with_capacity(triplets.len());
        let mut data = Vec::with_capacity(triplets.len());
        indptr.push(0);
        for mut row in rows {
            row.sort_by_key(|&(c, _)| c);
            let mut last: Option<usize> = None;
            for (c, v) in row {
                if last == Some(c) {
                    if let Some(d) = data.last_mut() {
                        *d += v;
                    }
                } else {
                    indices.push(c);
                    data.push(v);
                    last = Some(c);
                }
            }
            indptr.push(indices.len());
        }

        Ok(CsrMatrix {
            nrows,
            ncols,
            indptr,
            indices,
            data,
        })
    }

    pub fn identity(n: usize) -> Self {
        Self::diag(&Array1::ones(n))
    }

    pub fn diag(d: &Array1<f64>) -> Self {
        let n = d.len();
        CsrMatrix {
            nrows: n,
            ncols: n,
            indptr: (0..=n).collect(),
            indices: (0..n).collect(),
            data: d.to_vec(),
        }
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn nnz(&self) -> usize {
        self.data.len()
    }

    /// `A·x`.
    pub fn dot(&self, x: &Array1<f64>) -> Array1<f64> {
        assert_eq!(
            x.len(),
            self.ncols,
            "CsrMatrix::dot length {} != ncols {}",
            x.len(),
            self.ncols
        );
        let mut out = Array1::zeros(self.nrows);
        for r in 0..self.nrows {
            let mut sum = 0.0;
            for k in self.indptr[r]..self.indptr[r + 1] {
                sum += self.data[k] * x[self.indices[k]];
            }
            out[r] = sum;
        }
        out
    }

    /// `Aᵀ·y` without forming the transpose.
    pub fn transpose_dot(&self, y: &Array1<f64>) -> Array1<f64> {
        assert_eq!(
            y.len(),
            self.nrows,
            "CsrMatrix::transpose_dot length {} != nrows {}",
            y.len(),
            self.nrows
        );
        let mut out = Array1::zeros(self.ncols);
        for r in 0..self.nrows {
            let yr = y[r];
            if yr == 0.0 {
                continue;
            }
            for k in self.indptr[r]..self.indptr[r + 1] {
                out[self.indices[k]] += self.data[k] * yr;
            }
        }
        out
    }

    pub fn transpose(&self) -> CsrMatrix {
        let mut triplets = Vec::with_capacity(self.nnz());
        for r in 0..self.nrows {
            for k in self.indptr[r]..self.indptr[r + 1] {
                triplets.push((self.indices[k], r, self.data[k]));
            }
        }
        // Indices are in range by construction.
        let mut t = CsrMatrix {
            nrows: self.ncols,
            ncols: self.nrows,
            indptr: vec![0; self.ncols + 1],
            indices: Vec::with_capacity(self.nnz()),
            data: Vec::with_capacity(self.nnz()),
        };
        triplets.sort_by_key(|&(r, c, _)| (r, c));
        for &(r, c, v) in &triplets {
            t.indices.push(c);
            t.data.push(v);
            t.indptr[r + 1] += 1;
        }
        for r in 0..t.nrows {
            t.indptr[r + 1] += t.indptr[r];
        }
        t
    }

    /// `diag(s)·A`.
    pub fn scale_rows(&self, s: &Array1<f64>) -> CsrMatrix {
        assert_eq!(s.len(), self.nrows, "row scale length mismatch");
        let mut out = self.clone();
        for r in 0..self.nrows {
            for k in out.indptr[r]..out.indptr[r + 1] {
                out.data[k] *= s[r];
            }
        }
        out
    }

    /// Iterate `(col, value)` pairs of row `r`.
    pub fn row(&self, r: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        (self.indptr[r]..self.indptr[r + 1]).map(move |k| (self.indices[k], self.data[k]))
    }

    pub fn to_dense(&self) -> Array2<f64> {
        let mut out = Array2::zeros((self.nrows, self.ncols));
        for r in 0..self.nrows {
            for (c, v) in self.row(r) {
                out[[r, c]] = v;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CsrMatrix {
        CsrMatrix::from_triplets(
            2,
            3,
            &[(0, 2, 3.0), (0, 0, 1.0), (1, 1, -2.0), (0, 2, 1.0)],
        )
        .unwrap()
    }

    #[test]
    fn test_duplicates_are_summed_and_sorted() {
        let a = sample();
        assert_eq!(a.nnz(), 3);
        let row0: Vec<(usize, f64)> = a.row(0).collect();
        assert_eq!(row0, vec![(0, 1.0), (2, 4.0)]);
    }

    #[test]
    fn test_dot_and_transpose_dot_match_dense() {
        let a = sample();
        let dense = a.to_dense();
        let x = Array1::from_vec(vec![1.0, 2.0, 3.0]);
        let y = Array1::from_vec(vec![-1.0, 0.5]);
        let ax = a.dot(&x);
        let aty = a.transpose_dot(&y);
        let ax_ref = dense.dot(&x);
        let aty_ref = dense.t().dot(&y);
        for i in 0..2 {
            assert!((ax[i] - ax_ref[i]).abs() < 1e-14);
        }
        for j in 0..3 {
            assert!((aty[j] - aty_ref[j]).abs() < 1e-14);
        }
    }

    #[test]
    fn test_transpose_roundtrip() {
        let a = sample();
        assert_eq!(a.transpose().transpose(), a);
        assert_eq!(a.transpose().to_dense(), a.to_dense().t().to_owned());
    }

    #[test]
    fn test_scale_rows() {
        let a = sample().scale_rows(&Array1::from_vec(vec![2.0, -1.0]));
        let d = a.to_dense();
        assert!((d[[0, 2]] - 8.0).abs() < 1e-14);
        assert!((d[[1, 1]] - 2.0).abs() < 1e-14);
    }

    #[test]
    fn test_out_of_range_triplet_rejected() {
        assert!(CsrMatrix::from_triplets(2, 2, &[(2, 0, 1.0)]).is_err());
    }

    #[test]
    fn test_identity() {
        let i = CsrMatrix::identity(4);
        let x = Array1::from_vec(vec![1.0, -2.0, 3.0, 0.5]);
        assert_eq!(i.dot(&x), x);
    }
}
