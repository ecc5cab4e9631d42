// ─────────────────────────────────────────────────────────────────────
// SCPN Inversion Core — Model Mappings
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Maps from the optimization vector to physical-property models.
//!
//! A joint inversion stacks its models into one vector; [`Wires`] names the
//! contiguous blocks (block order = wire order). Tiled surveys use a
//! [`SubsetMap`] to pull the cells each tile sees out of the global model.

use std::fmt;
use std::sync::Arc;

use inversion_types::error::{ensure_len, InversionError, InversionResult};
use ndarray::{s, Array1};

pub trait Mapping: Send + Sync + fmt::Debug {
    fn n_params(&self) -> usize;
    fn n_out(&self) -> usize;
    fn transform(&self, m: &Array1<f64>) -> InversionResult<Array1<f64>>;
    /// `J(m) · v`.
    fn deriv(&self, m: &Array1<f64>, v: &Array1<f64>) -> InversionResult<Array1<f64>>;
    /// `J(m)ᵀ · v`.
    fn deriv_transpose(&self, m: &Array1<f64>, v: &Array1<f64>) -> InversionResult<Array1<f64>>;
    /// Carry per-parameter quantities (cell weights) onto the output cells
    /// through the index structure only; pointwise transforms pass through.
    fn restrict(&self, w: &Array1<f64>) -> InversionResult<Array1<f64>>;
}

// ───────────────────────────── identity ──────────────────────────────

#[derive(Debug, Clone)]
pub struct IdentityMap {
    n: usize,
}

impl IdentityMap {
    pub fn new(n: usize) -> Self {
        IdentityMap { n }
    }
}

impl Mapping for IdentityMap {
    fn n_params(&self) -> usize {
        self.n
    }
    fn n_out(&self) -> usize {
        self.n
    }
    fn transform(&self, m: &Array1<f64>) -> InversionResult<Array1<f64>> {
        ensure_len("IdentityMap input", self.n, m.len())?;
        Ok(m.clone())
    }
    fn deriv(&self, _m: &Array1<f64>, v: &Array1<f64>) -> InversionResult<Array1<f64>> {
        ensure_len("IdentityMap direction", self.n, v.len())?;
        Ok(v.clone())
    }
    fn deriv_transpose(&self, _m: &Array1<f64>, v: &Array1<f64>) -> InversionResult<Array1<f64>> {
        ensure_len("IdentityMap adjoint input", self.n, v.len())?;
        Ok(v.clone())
    }
    fn restrict(&self, w: &Array1<f64>) -> InversionResult<Array1<f64>> {
        self.transform(w)
    }
}

// ──────────────────────────── projection ─────────────────────────────

/// Selects the contiguous block `[offset, offset + len)` of the stacked vector.
#[derive(Debug, Clone)]
pub struct ProjectionMap {
    name: String,
    n_params: usize,
    offset: usize,
    len: usize,
}

impl ProjectionMap {
    pub fn new(name: &str, n_params: usize, offset: usize, len: usize) -> InversionResult<Self> {
        if offset + len > n_params {
            return Err(InversionError::ConfigError(format!(
                "projection `{name}` [{offset}, {}) exceeds {n_params} parameters",
                offset + len
            )));
        }
        Ok(ProjectionMap {
            name: name.to_string(),
            n_params,
            offset,
            len,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl Mapping for ProjectionMap {
    fn n_params(&self) -> usize {
        self.n_params
    }
    fn n_out(&self) -> usize {
        self.len
    }
    fn transform(&self, m: &Array1<f64>) -> InversionResult<Array1<f64>> {
        ensure_len("ProjectionMap input", self.n_params, m.len())?;
        Ok(m.slice(s![self.offset..self.offset + self.len]).to_owned())
    }
    fn deriv(&self, _m: &Array1<f64>, v: &Array1<f64>) -> InversionResult<Array1<f64>> {
        self.transform(v)
    }
    fn deriv_transpose(&self, _m: &Array1<f64>, v: &Array1<f64>) -> InversionResult<Array1<f64>> {
        ensure_len("ProjectionMap adjoint input", self.len, v.len())?;
        let mut out = Array1::zeros(self.n_params);
        out.slice_mut(s![self.offset..self.offset + self.len])
            .assign(v);
        Ok(out)
    }
    fn restrict(&self, w: &Array1<f64>) -> InversionResult<Array1<f64>> {
        self.transform(w)
    }
}

/// Named projections partitioning the stacked joint model vector.
#[derive(Debug, Clone)]
pub struct Wires {
    maps: Vec<ProjectionMap>,
    n_params: usize,
}

impl Wires {
    /// `Wires::new(&[("density", n), ("susceptibility", n)])`.
    pub fn new(blocks: &[(&str, usize)]) -> InversionResult<Self> {
        if blocks.is_empty() {
            return Err(InversionError::ConfigError(
                "Wires needs at least one block".to_string(),
            ));
        }
        let n_params: usize = blocks.iter().map(|(_, len)| len).sum();
        let mut offset = 0;
        let mut maps = Vec::with_capacity(blocks.len());
        for (name, len) in blocks {
            if maps.iter().any(|m: &ProjectionMap| m.name == *name) {
                return Err(InversionError::ConfigError(format!(
                    "duplicate wire name `{name}`"
                )));
            }
            maps.push(ProjectionMap::new(name, n_params, offset, *len)?);
            offset += len;
        }
        Ok(Wires { maps, n_params })
    }

    pub fn n_params(&self) -> usize {
        self.n_params
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ProjectionMap> {
        self.maps.iter().find(|m| m.name == name)
    }

    pub fn maps(&self) -> &[ProjectionMap] {
        &self.maps
    }

    /// Split a stacked vector into its blocks, in wire order.
    pub fn split(&self, m: &Array1<f64>) -> InversionResult<Vec<Array1<f64>>> {
        self.maps.iter().map(|w| w.transform(m)).collect()
    }

    /// Inverse of [`Wires::split`].
    pub fn stack(&self, blocks: &[Array1<f64>]) -> InversionResult<Array1<f64>> {
        ensure_len("Wires::stack blocks", self.maps.len(), blocks.len())?;
        let mut out = Array1::zeros(self.n_params);
        for (w, b) in self.maps.iter().zip(blocks) {
            ensure_len(&format!("wire `{}`", w.name), w.len, b.len())?;
            out.slice_mut(s![w.offset..w.offset + w.len]).assign(b);
        }
        Ok(out)
    }
}

// ────────────────────────────── subset ───────────────────────────────

/// Gathers `m[indices]`; the adjoint scatter-adds. Used for tile-local models.
#[derive(Debug, Clone)]
pub struct SubsetMap {
    n_params: usize,
    indices: Vec<usize>,
}

impl SubsetMap {
    pub fn new(n_params: usize, indices: Vec<usize>) -> InversionResult<Self> {
        if let Some(&bad) = indices.iter().find(|&&i| i >= n_params) {
            return Err(InversionError::ConfigError(format!(
                "subset index {bad} outside {n_params} parameters"
            )));
        }
        Ok(SubsetMap { n_params, indices })
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }
}

impl Mapping for SubsetMap {
    fn n_params(&self) -> usize {
        self.n_params
    }
    fn n_out(&self) -> usize {
        self.indices.len()
    }
    fn transform(&self, m: &Array1<f64>) -> InversionResult<Array1<f64>> {
        ensure_len("SubsetMap input", self.n_params, m.len())?;
        Ok(self.indices.iter().map(|&i| m[i]).collect())
    }
    fn deriv(&self, _m: &Array1<f64>, v: &Array1<f64>) -> InversionResult<Array1<f64>> {
        self.transform(v)
    }
    fn deriv_transpose(&self, _m: &Array1<f64>, v: &Array1<f64>) -> InversionResult<Array1<f64>> {
        ensure_len("SubsetMap adjoint input", self.indices.len(), v.len())?;
        let mut out = Array1::zeros(self.n_params);
        for (&i, &x) in self.indices.iter().zip(v.iter()) {
            out[i] += x;
        }
        Ok(out)
    }
    fn restrict(&self, w: &Array1<f64>) -> InversionResult<Array1<f64>> {
        self.transform(w)
    }
}

// ──────────────────────────── exponential ────────────────────────────

/// `σ = exp(m)`: log-parameterised positive properties.
#[derive(Debug, Clone)]
pub struct ExpMap {
    n: usize,
}

impl ExpMap {
    pub fn new(n: usize) -> Self {
        ExpMap { n }
    }
}

impl Mapping for ExpMap {
    fn n_params(&self) -> usize {
        self.n
    }
    fn n_out(&self) -> usize {
        self.n
    }
    fn transform(&self, m: &Array1<f64>) -> InversionResult<Array1<f64>> {
        ensure_len("ExpMap input", self.n, m.len())?;
        Ok(m.mapv(f64::exp))
    }
    fn deriv(&self, m: &Array1<f64>, v: &Array1<f64>) -> InversionResult<Array1<f64>> {
        ensure_len("ExpMap direction", self.n, v.len())?;
        Ok(self.transform(m)? * v)
    }
    fn deriv_transpose(&self, m: &Array1<f64>, v: &Array1<f64>) -> InversionResult<Array1<f64>> {
        self.deriv(m, v)
    }
    fn restrict(&self, w: &Array1<f64>) -> InversionResult<Array1<f64>> {
        ensure_len("ExpMap weights", self.n, w.len())?;
        Ok(w.clone())
    }
}

// ──────────────────────────── composition ────────────────────────────

/// `outer ∘ inner`.
#[derive(Debug, Clone)]
pub struct ComposedMap {
    outer: Arc<dyn Mapping>,
    inner: Arc<dyn Mapping>,
}

impl ComposedMap {
    pub fn new(outer: Arc<dyn Mapping>, inner: Arc<dyn Mapping>) -> InversionResult<Self> {
        ensure_len("ComposedMap inner output", outer.n_params(), inner.n_out())?;
        Ok(ComposedMap { outer, inner })
    }
}

impl Mapping for ComposedMap {
    fn n_params(&self) -> usize {
        self.inner.n_params()
    }
    fn n_out(&self) -> usize {
        self.outer.n_out()
    }
    fn transform(&self, m: &Array1<f64>) -> InversionResult<Array1<f64>> {
        self.outer.transform(&self.inner.transform(m)?)
    }
    fn deriv(&self, m: &Array1<f64>, v: &Array1<f64>) -> InversionResult<Array1<f64>> {
        let mi = self.inner.transform(m)?;
        self.outer.deriv(&mi, &self.inner.deriv(m, v)?)
    }
    fn deriv_transpose(&self, m: &Array1<f64>, v: &Array1<f64>) -> InversionResult<Array1<f64>> {
        let mi = self.inner.transform(m)?;
        self.inner
            .deriv_transpose(m, &self.outer.deriv_transpose(&mi, v)?)
    }
    fn restrict(&self, w: &Array1<f64>) -> InversionResult<Array1<f64>> {
        self.outer.restrict(&self.inner.restrict(w)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_wires_split_and_stack() {
        let wires = Wires::new(&[("density", 3), ("susceptibility", 2)]).unwrap();
        assert_eq!(wires.n_params(), 5);
        let m = array![1.0, 2.0, 3.0, 4.0, 5.0];
        let parts = wires.split(&m).unwrap();
        assert_eq!(parts[0], array![1.0, 2.0, 3.0]);
        assert_eq!(parts[1], array![4.0, 5.0]);
        assert_eq!(wires.stack(&parts).unwrap(), m);
        assert_eq!(wires.get("susceptibility").unwrap().offset(), 3);
    }

    #[test]
    fn test_wires_reject_duplicates() {
        assert!(Wires::new(&[("a", 2), ("a", 2)]).is_err());
        assert!(Wires::new(&[]).is_err());
    }

    #[test]
    fn test_projection_adjoint() {
        let p = ProjectionMap::new("b", 5, 2, 2).unwrap();
        let v = array![7.0, -1.0];
        let out = p.deriv_transpose(&Array1::zeros(5), &v).unwrap();
        assert_eq!(out, array![0.0, 0.0, 7.0, -1.0, 0.0]);
        assert!(ProjectionMap::new("c", 3, 2, 2).is_err());
    }

    #[test]
    fn test_subset_scatter_adds_repeats() {
        let s = SubsetMap::new(4, vec![1, 3, 1]).unwrap();
        let m = array![10.0, 11.0, 12.0, 13.0];
        assert_eq!(s.transform(&m).unwrap(), array![11.0, 13.0, 11.0]);
        let back = s.deriv_transpose(&m, &array![1.0, 2.0, 3.0]).unwrap();
        assert_eq!(back, array![0.0, 4.0, 0.0, 2.0]);
        assert!(SubsetMap::new(2, vec![2]).is_err());
    }

    #[test]
    fn test_exp_derivative_matches_finite_difference() {
        let map = ExpMap::new(3);
        let m = array![0.1, -0.5, 1.2];
        let v = array![1.0, 0.5, -2.0];
        let h = 1e-6;
        let fd = (map.transform(&(&m + &(h * &v))).unwrap() - map.transform(&m).unwrap()) / h;
        let jv = map.deriv(&m, &v).unwrap();
        for i in 0..3 {
            assert!((fd[i] - jv[i]).abs() < 1e-4, "fd {} vs {}", fd[i], jv[i]);
        }
    }

    #[test]
    fn test_composed_adjoint_identity() {
        let wires = Wires::new(&[("a", 2), ("b", 3)]).unwrap();
        let inner: Arc<dyn Mapping> = Arc::new(wires.get("b").unwrap().clone());
        let outer: Arc<dyn Mapping> = Arc::new(ExpMap::new(3));
        let map = ComposedMap::new(outer, inner).unwrap();
        let m = array![0.3, 0.1, -0.2, 0.4, 0.0];
        let v = array![1.0, -1.0, 0.5, 2.0, 0.25];
        let w = array![0.5, 1.5, -1.0];
        let lhs = map.deriv(&m, &v).unwrap().dot(&w);
        let rhs = v.dot(&map.deriv_transpose(&m, &w).unwrap());
        assert!((lhs - rhs).abs() < 1e-12);
        assert!(ComposedMap::new(Arc::new(ExpMap::new(2)), Arc::new(IdentityMap::new(3))).is_err());
    }
}
