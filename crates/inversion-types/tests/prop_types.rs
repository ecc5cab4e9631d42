// ─────────────────────────────────────────────────────────────────────
// SCPN Inversion Core — Property-Based Tests (proptest) for inversion-types
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Property-based tests for inversion-types using proptest.
//!
//! Covers: tensor-mesh indexing and geometry, optimizer/regularization
//! config validation boundaries, tagged directive parameters.

use inversion_types::config::{
    BetaScheduleParams, CoolingMode, CouplingRamp, CouplingScheduleParams, OptimizerConfig,
    RegularizationConfig,
};
use inversion_types::state::TensorMesh;
use proptest::prelude::*;

// ── Tensor Mesh Properties ───────────────────────────────────────────

proptest! {
    /// cell_subscript ∘ cell_index is the identity on every cell.
    #[test]
    fn mesh_index_roundtrip(nx in 1usize..7, ny in 1usize..7, nz in 1usize..5) {
        let mesh = TensorMesh::uniform(&[nx, ny, nz], 1.0).unwrap();
        for c in 0..mesh.n_cells() {
            let [ix, iy, iz] = mesh.cell_subscript(c);
            prop_assert!(ix < nx && iy < ny && iz < nz);
            prop_assert_eq!(mesh.cell_index(ix, iy, iz), c);
        }
    }

    /// Volumes sum to the product of the axis extents, centres stay
    /// inside the domain and are strictly increasing.
    #[test]
    fn mesh_geometry_consistent(
        hx in prop::collection::vec(0.1f64..5.0, 1..10),
        hy in prop::collection::vec(0.1f64..5.0, 1..10),
        x0 in -100.0f64..100.0,
        y0 in -100.0f64..100.0,
    ) {
        let extent: f64 = hx.iter().sum::<f64>() * hy.iter().sum::<f64>();
        let mesh = TensorMesh::new(vec![hx.clone(), hy], vec![x0, y0]).unwrap();
        let total = mesh.cell_volumes().sum();
        prop_assert!((total - extent).abs() < 1e-9 * extent.max(1.0));

        let xc = &mesh.centers[0];
        let x_end = x0 + hx.iter().sum::<f64>();
        for i in 0..xc.len() {
            prop_assert!(xc[i] > x0 && xc[i] < x_end);
            if i > 0 {
                prop_assert!(xc[i] > xc[i - 1]);
            }
        }
    }

    /// Any non-positive width is rejected.
    #[test]
    fn mesh_rejects_non_positive(bad in -5.0f64..=0.0, n in 1usize..6) {
        let mut h = vec![1.0; n];
        h[n / 2] = bad;
        prop_assert!(TensorMesh::new(vec![h], vec![0.0]).is_err());
    }
}

// ── Config Properties ────────────────────────────────────────────────

proptest! {
    /// armijo_c in [0, 1) and step_reduction in (0, 1) validate; outside fails.
    #[test]
    fn optimizer_line_search_params(c in -1.0f64..2.0, r in -1.0f64..2.0) {
        let cfg = OptimizerConfig { armijo_c: c, step_reduction: r, ..OptimizerConfig::default() };
        let ok = (0.0..1.0).contains(&c) && r > 0.0 && r < 1.0;
        prop_assert_eq!(cfg.validate().is_ok(), ok);
    }

    /// Sparse-norm exponents are accepted exactly on [0, 2].
    #[test]
    fn regularization_norm_range(p in -1.0f64..3.0) {
        let cfg = RegularizationConfig { norm_s: p, ..RegularizationConfig::default() };
        prop_assert_eq!(cfg.validate().is_ok(), (0.0..=2.0).contains(&p));
    }

    /// Geometric cooling survives a JSON roundtrip unchanged.
    #[test]
    fn cooling_mode_json_roundtrip(factor in 0.01f64..1.0, rate in 1usize..10) {
        let params = BetaScheduleParams { cooling: CoolingMode::Geometric { factor, rate } };
        prop_assert!(params.validate().is_ok());
        let json = serde_json::to_string(&params).unwrap();
        let back: BetaScheduleParams = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(back.cooling, params.cooling);
    }

    /// A coupling ramp never starts above its cap.
    #[test]
    fn coupling_start_above_max_rejected(start in 0.0f64..10.0, max in 0.0f64..10.0) {
        let params = CouplingScheduleParams {
            start_weight: start,
            max_weight: max,
            ramp: CouplingRamp::Linear { iterations: 3 },
            label: None,
        };
        prop_assert_eq!(params.validate().is_ok(), start <= max);
    }
}
