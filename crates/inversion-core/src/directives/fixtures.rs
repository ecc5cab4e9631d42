//! Small problems shared by the directive tests.

use std::sync::Arc;

use inversion_types::config::{OptimizerConfig, RegularizationConfig};
use inversion_types::state::TensorMesh;
use ndarray::{Array1, Array2};

use crate::data_misfit::{L2DataMisfit, ObservedData};
use crate::mapping::IdentityMap;
use crate::objective::{ComboObjective, Term, TermRole};
use crate::optimization::{OptimizerState, ProjectedGnCg};
use crate::regularization::least_squares::{build_regularization, Smallness};
use crate::simulation::LinearSimulation;

/// `φ_d = Σ (s·m_i − 1)²` plus `β Σ m_i²` on three parameters, so that
/// `H_d = 2s²I` and `H_m = 2I`.
pub(crate) fn diagonal_problem(scale: f64, beta: f64) -> (ComboObjective, OptimizerState) {
    let n = 3;
    let sim = LinearSimulation::new(Array2::eye(n) * scale).unwrap();
    let data = ObservedData::new(Array1::ones(n), Array1::ones(n)).unwrap();
    let misfit = L2DataMisfit::new(Arc::new(sim), data).unwrap();
    let small = Smallness::new(Arc::new(IdentityMap::new(n)), Array1::ones(n)).unwrap();
    let reg = ComboObjective::new(n)
        .with("smallness", TermRole::Regularization, 1.0, Term::Smallness(small))
        .unwrap();
    let objective = ComboObjective::new(n)
        .with("phi_d", TermRole::DataMisfit, 1.0, Term::DataMisfit(misfit))
        .unwrap()
        .with("phi_m", TermRole::Regularization, beta, Term::Combo(reg))
        .unwrap();
    let state = ProjectedGnCg::new(OptimizerConfig::default())
        .unwrap()
        .initialize(&objective, &Array1::zeros(n))
        .unwrap();
    (objective, state)
}

/// 1D mesh of eight cells, a smooth kernel and a sparse smallness norm.
pub(crate) fn mesh_problem(norm_s: f64, beta: f64, m0: f64) -> (ComboObjective, OptimizerState) {
    let mesh = TensorMesh::uniform(&[8], 1.0).unwrap();
    let n = mesh.n_cells();
    let sim = LinearSimulation::from_kernel(4, n, |i, j| {
        let d = i as f64 * 2.0 - j as f64;
        1.0 / (1.0 + d * d)
    })
    .unwrap();
    let data = ObservedData::new(Array1::from_elem(4, 0.5), Array1::from_elem(4, 0.1)).unwrap();
    let misfit = L2DataMisfit::new(Arc::new(sim), data).unwrap();
    let config = RegularizationConfig {
        norm_s,
        irls_epsilon: 0.1,
        ..RegularizationConfig::default()
    };
    let reg = build_regularization(&mesh, Arc::new(IdentityMap::new(n)), &config, None).unwrap();
    let objective = ComboObjective::new(n)
        .with("phi_d", TermRole::DataMisfit, 1.0, Term::DataMisfit(misfit))
        .unwrap()
        .with("phi_m", TermRole::Regularization, beta, Term::Combo(reg))
        .unwrap();
    let state = ProjectedGnCg::new(OptimizerConfig::default())
        .unwrap()
        .initialize(&objective, &Array1::from_elem(n, m0))
        .unwrap();
    (objective, state)
}
