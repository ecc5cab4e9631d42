// ─────────────────────────────────────────────────────────────────────
// SCPN Inversion Core — Linear Correspondence Coupling
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Petrophysical coupling: per cell, the weighted squared distance of the
//! point `(m_i(c), m_j(c))` to a piecewise-linear relation.
//!
//! Distances are measured either
//!   - perpendicularly, to the nearest segment with endpoints clamped, or
//!   - vertically, to the segment whose x-span contains `m_i` (the end
//!     segments extend to ±∞).
//!
//! Ties between equidistant segments resolve to the lowest index. The
//! chosen segment is frozen inside one linearisation, so the
//! Hessian-vector product is the Gauss–Newton form of the distance
//! residual: `2w(I − uuᵀ)` in the interior of a segment, `2wI` at a clamped
//! endpoint, and `2w[s², −s; −s, 1]` in vertical mode.

use inversion_math::mesh::Mesh;
use inversion_types::error::{ensure_len, InversionError, InversionResult};
use ndarray::Array1;

use super::{check_cell_weights, JointBlocks};
use crate::mapping::Wires;
use crate::objective::ObjectiveFunction;

// ───────────────────────────── relation ──────────────────────────────

/// Continuous piecewise-linear relation through vertices with strictly
/// increasing x.
#[derive(Debug, Clone, PartialEq)]
pub struct PiecewiseLinear {
    xs: Vec<f64>,
    ys: Vec<f64>,
}

impl PiecewiseLinear {
    pub fn from_vertices(vertices: &[(f64, f64)]) -> InversionResult<Self> {
        if vertices.len() < 2 {
            return Err(InversionError::ConfigError(format!(
                "piecewise-linear relation needs at least 2 vertices, got {}",
                vertices.len()
            )));
        }
        if vertices.iter().any(|(x, y)| !x.is_finite() || !y.is_finite()) {
            return Err(InversionError::ConfigError(
                "relation vertices must be finite".to_string(),
            ));
        }
        if vertices.windows(2).any(|w| w[1].0 <= w[0].0) {
            return Err(InversionError::ConfigError(
                "relation break points must be strictly increasing".to_string(),
            ));
        }
        Ok(PiecewiseLinear {
            xs: vertices.iter().map(|v| v.0).collect(),
            ys: vertices.iter().map(|v| v.1).collect(),
        })
    }

    /// Break points `b_0 < … < b_n`, one slope per segment, and the
    /// intercept `y(b_0)`.
    pub fn from_slopes(breakpoints: &[f64], slopes: &[f64], intercept: f64) -> InversionResult<Self> {
        ensure_len("relation slopes", breakpoints.len().saturating_sub(1), slopes.len())?;
        let mut vertices = Vec::with_capacity(breakpoints.len());
        let mut y = intercept;
        for (i, &x) in breakpoints.iter().enumerate() {
            if i > 0 {
                y += slopes[i - 1] * (x - breakpoints[i - 1]);
            }
            vertices.push((x, y));
        }
        Self::from_vertices(&vertices)
    }

    pub fn n_segments(&self) -> usize {
        self.xs.len() - 1
    }

    pub fn slope(&self, segment: usize) -> f64 {
        (self.ys[segment + 1] - self.ys[segment]) / (self.xs[segment + 1] - self.xs[segment])
    }

    /// Segment whose closed x-span contains `x`; lowest index on shared
    /// break points, end segments outside the range.
    pub fn vertical_segment(&self, x: f64) -> usize {
        (0..self.n_segments())
            .find(|&s| x <= self.xs[s + 1])
            .unwrap_or(self.n_segments() - 1)
    }

    /// `y(x)` with the end segments extrapolated.
    pub fn evaluate(&self, x: f64) -> f64 {
        let s = self.vertical_segment(x);
        self.ys[s] + self.slope(s) * (x - self.xs[s])
    }

    /// Nearest segment to `p` (lowest index on ties), the closest point on
    /// it, and whether that point is an endpoint.
    fn nearest(&self, p: [f64; 2]) -> Nearest {
        let mut best = Nearest {
            segment: 0,
            point: [0.0; 2],
            clamped: true,
            distance2: f64::INFINITY,
        };
        for s in 0..self.n_segments() {
            let p0 = [self.xs[s], self.ys[s]];
            let d = [self.xs[s + 1] - p0[0], self.ys[s + 1] - p0[1]];
            let len2 = d[0] * d[0] + d[1] * d[1];
            let t_raw = ((p[0] - p0[0]) * d[0] + (p[1] - p0[1]) * d[1]) / len2;
            let t = t_raw.clamp(0.0, 1.0);
            let q = [p0[0] + t * d[0], p0[1] + t * d[1]];
            let dist2 = (p[0] - q[0]).powi(2) + (p[1] - q[1]).powi(2);
            if dist2 < best.distance2 {
                best = Nearest {
                    segment: s,
                    point: q,
                    clamped: t_raw <= 0.0 || t_raw >= 1.0,
                    distance2: dist2,
                };
            }
        }
        best
    }

    fn direction(&self, segment: usize) -> [f64; 2] {
        let d = [
            self.xs[segment + 1] - self.xs[segment],
            self.ys[segment + 1] - self.ys[segment],
        ];
        let len = (d[0] * d[0] + d[1] * d[1]).sqrt();
        [d[0] / len, d[1] / len]
    }
}

struct Nearest {
    segment: usize,
    point: [f64; 2],
    clamped: bool,
    distance2: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceMode {
    Perpendicular,
    Vertical,
}

/// One coupled model pair `(first, second)` with its relation
/// `second ≈ relation(first)`.
#[derive(Debug, Clone)]
pub struct CorrespondencePair {
    pub first: usize,
    pub second: usize,
    pub relation: PiecewiseLinear,
}

/// Per-cell linearisation: value, gradient and GN Hessian in `(m_i, m_j)`,
/// all without the cell weight.
struct CellTerm {
    value: f64,
    gradient: [f64; 2],
    hessian: [[f64; 2]; 2],
}

fn cell_term(relation: &PiecewiseLinear, mode: DistanceMode, p: [f64; 2]) -> CellTerm {
    match mode {
        DistanceMode::Vertical => {
            let s = relation.vertical_segment(p[0]);
            let slope = relation.slope(s);
            let r = p[1] - (relation.ys[s] + slope * (p[0] - relation.xs[s]));
            CellTerm {
                value: r * r,
                gradient: [-2.0 * slope * r, 2.0 * r],
                hessian: [[2.0 * slope * slope, -2.0 * slope], [-2.0 * slope, 2.0]],
            }
        }
        DistanceMode::Perpendicular => {
            let near = relation.nearest(p);
            let r = [p[0] - near.point[0], p[1] - near.point[1]];
            let hessian = if near.clamped {
                [[2.0, 0.0], [0.0, 2.0]]
            } else {
                let u = relation.direction(near.segment);
                [
                    [2.0 * (1.0 - u[0] * u[0]), -2.0 * u[0] * u[1]],
                    [-2.0 * u[0] * u[1], 2.0 * (1.0 - u[1] * u[1])],
                ]
            };
            CellTerm {
                value: near.distance2,
                gradient: [2.0 * r[0], 2.0 * r[1]],
                hessian,
            }
        }
    }
}

// ───────────────────────────── objective ─────────────────────────────

#[derive(Debug, Clone)]
pub struct LinearCorrespondence {
    blocks: JointBlocks,
    pairs: Vec<CorrespondencePair>,
    mode: DistanceMode,
    cell_weights: Array1<f64>,
}

impl LinearCorrespondence {
    /// Two-model form; more models need [`LinearCorrespondence::with_pairs`].
    pub fn new(
        mesh: &dyn Mesh,
        wires: &Wires,
        relation: PiecewiseLinear,
        mode: DistanceMode,
    ) -> InversionResult<Self> {
        if wires.len() > 2 {
            return Err(InversionError::ConfigError(format!(
                "LinearCorrespondence over {} models needs an explicit pair list",
                wires.len()
            )));
        }
        Self::with_pairs(
            mesh,
            wires,
            vec![CorrespondencePair {
                first: 0,
                second: 1,
                relation,
            }],
            mode,
        )
    }

    pub fn with_pairs(
        mesh: &dyn Mesh,
        wires: &Wires,
        pairs: Vec<CorrespondencePair>,
        mode: DistanceMode,
    ) -> InversionResult<Self> {
        let blocks = JointBlocks::new(wires, mesh.n_cells(), "LinearCorrespondence")?;
        let k = blocks.n_models();
        if pairs.is_empty() {
            return Err(InversionError::ConfigError(
                "LinearCorrespondence pair list is empty".to_string(),
            ));
        }
        for p in &pairs {
            if p.first == p.second || p.first >= k || p.second >= k {
                return Err(InversionError::ConfigError(format!(
                    "LinearCorrespondence pair ({}, {}) invalid for {k} models",
                    p.first, p.second
                )));
            }
        }
        Ok(LinearCorrespondence {
            blocks,
            pairs,
            mode,
            cell_weights: mesh.cell_volumes(),
        })
    }

    pub fn with_cell_weights(mut self, weights: Array1<f64>) -> InversionResult<Self> {
        check_cell_weights("LinearCorrespondence cell weights", &weights, self.blocks.n_cells())?;
        self.cell_weights = weights;
        Ok(self)
    }

    pub fn mode(&self) -> DistanceMode {
        self.mode
    }

    pub fn pairs(&self) -> &[CorrespondencePair] {
        &self.pairs
    }

    fn models(&self, m: &Array1<f64>) -> InversionResult<Vec<Array1<f64>>> {
        ensure_len("LinearCorrespondence model", self.blocks.n_params(), m.len())?;
        self.blocks.split(m)
    }
}

impl ObjectiveFunction for LinearCorrespondence {
    fn n_params(&self) -> usize {
        self.blocks.n_params()
    }

    fn value(&self, m: &Array1<f64>) -> InversionResult<f64> {
        let models = self.models(m)?;
        let mut total = 0.0;
        for pair in &self.pairs {
            let (x, y) = (&models[pair.first], &models[pair.second]);
            for c in 0..self.blocks.n_cells() {
                total += self.cell_weights[c] * cell_term(&pair.relation, self.mode, [x[c], y[c]]).value;
            }
        }
        Ok(total)
    }

    fn deriv(&self, m: &Array1<f64>) -> InversionResult<Array1<f64>> {
        let models = self.models(m)?;
        let mut out = self.blocks.zeros();
        for pair in &self.pairs {
            for c in 0..self.blocks.n_cells() {
                let p = [models[pair.first][c], models[pair.second][c]];
                let t = cell_term(&pair.relation, self.mode, p);
                let w = self.cell_weights[c];
                out[pair.first][c] += w * t.gradient[0];
                out[pair.second][c] += w * t.gradient[1];
            }
        }
        self.blocks.stack(&out)
    }

    fn deriv2(&self, m: &Array1<f64>, v: &Array1<f64>) -> InversionResult<Array1<f64>> {
        let models = self.models(m)?;
        ensure_len("LinearCorrespondence direction", self.blocks.n_params(), v.len())?;
        let dirs = self.blocks.split(v)?;
        let mut out = self.blocks.zeros();
        for pair in &self.pairs {
            for c in 0..self.blocks.n_cells() {
                let p = [models[pair.first][c], models[pair.second][c]];
                let h = cell_term(&pair.relation, self.mode, p).hessian;
                let dv = [dirs[pair.first][c], dirs[pair.second][c]];
                let w = self.cell_weights[c];
                out[pair.first][c] += w * (h[0][0] * dv[0] + h[0][1] * dv[1]);
                out[pair.second][c] += w * (h[1][0] * dv[0] + h[1][1] * dv[1]);
            }
        }
        self.blocks.stack(&out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inversion_types::state::TensorMesh;

    fn relation() -> PiecewiseLinear {
        // y = 2x on [0, 1], then slope -1 up to x = 3.
        PiecewiseLinear::from_slopes(&[0.0, 1.0, 3.0], &[2.0, -1.0], 0.0).unwrap()
    }

    fn setup(n: usize) -> (TensorMesh, Wires) {
        let mesh = TensorMesh::uniform(&[n], 1.0).unwrap();
        (mesh, Wires::new(&[("x", n), ("y", n)]).unwrap())
    }

    #[test]
    fn test_relation_from_slopes_matches_vertices() {
        let r = relation();
        let v = PiecewiseLinear::from_vertices(&[(0.0, 0.0), (1.0, 2.0), (3.0, 0.0)]).unwrap();
        assert_eq!(r, v);
        assert!((r.evaluate(0.5) - 1.0).abs() < 1e-12);
        assert!((r.evaluate(-1.0) + 2.0).abs() < 1e-12);
        assert!((r.evaluate(4.0) + 1.0).abs() < 1e-12);
        assert_eq!(r.vertical_segment(1.0), 0);
    }

    #[test]
    fn test_invalid_relations_rejected() {
        assert!(PiecewiseLinear::from_vertices(&[(0.0, 1.0)]).is_err());
        assert!(PiecewiseLinear::from_vertices(&[(1.0, 0.0), (1.0, 2.0)]).is_err());
        assert!(PiecewiseLinear::from_slopes(&[0.0, 1.0], &[1.0, 2.0], 0.0).is_err());
    }

    #[test]
    fn test_zero_on_relation_both_modes() {
        let (mesh, wires) = setup(5);
        let x = Array1::from_vec(vec![0.0, 0.3, 1.0, 2.2, 3.0]);
        let y = x.mapv(|v| relation().evaluate(v));
        let m = wires.stack(&[x, y]).unwrap();
        for mode in [DistanceMode::Perpendicular, DistanceMode::Vertical] {
            let lc = LinearCorrespondence::new(&mesh, &wires, relation(), mode).unwrap();
            assert!(lc.value(&m).unwrap().abs() < 1e-24, "{mode:?}");
            assert!(lc.deriv(&m).unwrap().iter().all(|g| g.abs() < 1e-12));
        }
    }

    #[test]
    fn test_perpendicular_distance_interior_and_clamped() {
        let r = PiecewiseLinear::from_vertices(&[(0.0, 0.0), (2.0, 0.0)]).unwrap();
        let interior = cell_term(&r, DistanceMode::Perpendicular, [1.0, 3.0]);
        assert!((interior.value - 9.0).abs() < 1e-12);
        assert_eq!(interior.hessian, [[0.0, 0.0], [0.0, 2.0]]);
        let clamped = cell_term(&r, DistanceMode::Perpendicular, [5.0, 4.0]);
        assert!((clamped.value - 25.0).abs() < 1e-12);
        assert_eq!(clamped.hessian, [[2.0, 0.0], [0.0, 2.0]]);
    }

    #[test]
    fn test_tie_resolves_to_lowest_segment() {
        // Symmetric roof: the point above the apex is equidistant from both.
        let r = PiecewiseLinear::from_vertices(&[(-1.0, 0.0), (0.0, 1.0), (1.0, 0.0)]).unwrap();
        let near = r.nearest([0.0, 3.0]);
        assert_eq!(near.segment, 0);
    }

    #[test]
    fn test_gradient_matches_finite_difference() {
        let (mesh, wires) = setup(6);
        let m = Array1::from_shape_fn(12, |i| 0.45 * i as f64 - 1.3 + 0.2 * (i as f64).sin());
        for mode in [DistanceMode::Perpendicular, DistanceMode::Vertical] {
            let lc = LinearCorrespondence::new(&mesh, &wires, relation(), mode).unwrap();
            let g = lc.deriv(&m).unwrap();
            let h = 1e-7;
            for j in 0..m.len() {
                let mut mp = m.clone();
                mp[j] += h;
                let mut mm = m.clone();
                mm[j] -= h;
                let fd = (lc.value(&mp).unwrap() - lc.value(&mm).unwrap()) / (2.0 * h);
                assert!((fd - g[j]).abs() < 1e-5, "{mode:?} component {j}: {fd} vs {}", g[j]);
            }
        }
    }

    #[test]
    fn test_hessian_symmetric_psd() {
        let (mesh, wires) = setup(6);
        let m = Array1::from_shape_fn(12, |i| (0.9 * i as f64).cos() * 2.0);
        let u = Array1::from_shape_fn(12, |i| (1.7 * i as f64).sin());
        let v = Array1::from_shape_fn(12, |i| 0.3 * i as f64 - 1.0);
        for mode in [DistanceMode::Perpendicular, DistanceMode::Vertical] {
            let lc = LinearCorrespondence::new(&mesh, &wires, relation(), mode).unwrap();
            let uhv = u.dot(&lc.deriv2(&m, &v).unwrap());
            let vhu = v.dot(&lc.deriv2(&m, &u).unwrap());
            assert!((uhv - vhu).abs() < 1e-10);
            assert!(u.dot(&lc.deriv2(&m, &u).unwrap()) >= -1e-12);
        }
    }

    #[test]
    fn test_three_models_need_pair_list() {
        let mesh = TensorMesh::uniform(&[4], 1.0).unwrap();
        let wires = Wires::new(&[("a", 4), ("b", 4), ("c", 4)]).unwrap();
        assert!(LinearCorrespondence::new(&mesh, &wires, relation(), DistanceMode::Vertical).is_err());
        let pairs = vec![
            CorrespondencePair { first: 0, second: 1, relation: relation() },
            CorrespondencePair { first: 1, second: 2, relation: relation() },
        ];
        let lc = LinearCorrespondence::with_pairs(&mesh, &wires, pairs, DistanceMode::Vertical).unwrap();
        assert_eq!(lc.pairs().len(), 2);
        let bad = vec![CorrespondencePair { first: 2, second: 2, relation: relation() }];
        assert!(LinearCorrespondence::with_pairs(&mesh, &wires, bad, DistanceMode::Vertical).is_err());
    }
}
