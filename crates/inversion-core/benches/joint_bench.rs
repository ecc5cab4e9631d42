// ─────────────────────────────────────────────────────────────────────
// SCPN Inversion Core — Joint Regularization Benchmark
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────

use criterion::{criterion_group, criterion_main, Criterion};
use inversion_core::mapping::Wires;
use inversion_core::objective::ObjectiveFunction;
use inversion_core::regularization::correspondence::{
    DistanceMode, LinearCorrespondence, PiecewiseLinear,
};
use inversion_core::regularization::cross_gradient::CrossGradient;
use inversion_core::regularization::joint_tv::JointTotalVariation;
use inversion_types::state::TensorMesh;
use ndarray::Array1;
use std::hint::black_box;

fn fields(n_params: usize) -> (Array1<f64>, Array1<f64>) {
    let m = Array1::from_shape_fn(n_params, |i| ((i as f64) * 0.013).sin());
    let v = Array1::from_shape_fn(n_params, |i| ((i as f64) * 0.007).cos());
    (m, v)
}

fn bench_joint_terms(c: &mut Criterion, shape: &[usize]) {
    let mesh = TensorMesh::uniform(shape, 1.0).unwrap();
    let cells = mesh.n_cells();
    let wires = Wires::new(&[("density", cells), ("susceptibility", cells)]).unwrap();
    let (m, v) = fields(wires.n_params());
    let label = shape.iter().map(|n| n.to_string()).collect::<Vec<_>>().join("x");

    let cg = CrossGradient::new(&mesh, &wires).unwrap();
    let jtv = JointTotalVariation::new(&mesh, &wires, 1e-6).unwrap();
    let relation = PiecewiseLinear::from_slopes(&[-1.0, 0.0, 1.0], &[0.5, 2.0], -0.5).unwrap();
    let lc = LinearCorrespondence::new(&mesh, &wires, relation, DistanceMode::Perpendicular).unwrap();

    let mut group = c.benchmark_group(format!("joint_{label}"));
    group.bench_function("cross_gradient_deriv", |b| b.iter(|| black_box(cg.deriv(&m).unwrap())));
    group.bench_function("cross_gradient_hvp", |b| {
        b.iter(|| black_box(cg.deriv2(&m, &v).unwrap()))
    });
    group.bench_function("joint_tv_deriv", |b| b.iter(|| black_box(jtv.deriv(&m).unwrap())));
    group.bench_function("correspondence_hvp", |b| {
        b.iter(|| black_box(lc.deriv2(&m, &v).unwrap()))
    });
    group.finish();
}

fn bench_joint_2d(c: &mut Criterion) {
    bench_joint_terms(c, &[64, 64]);
}

fn bench_joint_3d(c: &mut Criterion) {
    bench_joint_terms(c, &[24, 24, 24]);
}

criterion_group!(benches, bench_joint_2d, bench_joint_3d);
criterion_main!(benches);
