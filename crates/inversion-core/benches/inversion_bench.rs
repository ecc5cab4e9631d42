// ─────────────────────────────────────────────────────────────────────
// SCPN Inversion Core — Inversion Loop Benchmark
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────

use criterion::{criterion_group, criterion_main, Criterion};
use inversion_core::data_misfit::{L2DataMisfit, ObservedData};
use inversion_core::directives::{BetaSchedule, Directive, DirectiveList};
use inversion_core::inversion::Inversion;
use inversion_core::mapping::IdentityMap;
use inversion_core::objective::{ComboObjective, ObjectiveFunction, Term, TermRole};
use inversion_core::optimization::ProjectedGnCg;
use inversion_core::regularization::least_squares::build_regularization;
use inversion_core::simulation::{ForwardSimulation, LinearSimulation};
use inversion_types::config::{OptimizerConfig, RegularizationConfig};
use inversion_types::state::TensorMesh;
use ndarray::Array1;
use std::hint::black_box;
use std::sync::Arc;

/// Smooth-kernel 2D problem on an n×n mesh with n² / 4 data.
fn problem(n: usize) -> (ComboObjective, usize) {
    let mesh = TensorMesh::uniform(&[n, n], 1.0).unwrap();
    let cells = mesh.n_cells();
    let n_data = cells / 4;
    let sim = LinearSimulation::from_kernel(n_data, cells, |i, j| {
        let d = (i * 4) as f64 - j as f64;
        1.0 / (1.0 + 0.01 * d * d)
    })
    .unwrap();
    let truth = Array1::from_shape_fn(cells, |c| ((c as f64) * 0.05).sin());
    let dobs = sim.dpred(&truth).unwrap();
    let data = ObservedData::with_relative_error(dobs, 0.05, 1e-3).unwrap();
    let misfit = L2DataMisfit::new(Arc::new(sim), data).unwrap();
    let reg = build_regularization(
        &mesh,
        Arc::new(IdentityMap::new(cells)),
        &RegularizationConfig::default(),
        None,
    )
    .unwrap();
    let objective = ComboObjective::new(cells)
        .with("phi_d", TermRole::DataMisfit, 1.0, Term::DataMisfit(misfit))
        .unwrap()
        .with("phi_m", TermRole::Regularization, 1.0, Term::Combo(reg))
        .unwrap();
    (objective, cells)
}

fn bench_combo_hvp(c: &mut Criterion) {
    let mut group = c.benchmark_group("combo_hvp");
    for n in [16usize, 32] {
        let (objective, cells) = problem(n);
        let m = Array1::from_elem(cells, 0.1);
        let v = Array1::from_shape_fn(cells, |i| (i as f64).cos());
        group.bench_function(format!("{n}x{n}"), |b| {
            b.iter(|| black_box(objective.deriv2(&m, &v).unwrap()))
        });
    }
    group.finish();
}

fn bench_inversion_loop(c: &mut Criterion) {
    let mut group = c.benchmark_group("inversion_loop");
    group.sample_size(10);
    for n in [16usize, 24] {
        group.bench_function(format!("{n}x{n}"), |b| {
            b.iter(|| {
                let (objective, cells) = problem(n);
                let optimizer = ProjectedGnCg::new(OptimizerConfig {
                    max_iterations: 8,
                    ..OptimizerConfig::default()
                })
                .unwrap();
                let cooling: Box<dyn Directive> = Box::new(BetaSchedule::geometric(0.5, 1).unwrap());
                let directives = DirectiveList::new(vec![cooling]).unwrap();
                let mut inversion = Inversion::new(objective, optimizer, directives).unwrap();
                let out = inversion.run(&Array1::zeros(cells)).unwrap();
                black_box(out.value);
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_combo_hvp, bench_inversion_loop);
criterion_main!(benches);
