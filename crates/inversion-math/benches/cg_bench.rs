use criterion::{criterion_group, criterion_main, Criterion};
use inversion_math::cg::{truncated_cg, CgConfig};
use inversion_math::mesh::Mesh;
use inversion_types::state::TensorMesh;
use ndarray::Array1;
use std::hint::black_box;

/// `(I + GₓᵀGₓ + GᵧᵀGᵧ) x = b` on an n×n mesh, matrix-free.
fn bench_cg_smoothness(c: &mut Criterion, n: usize) {
    let mesh = TensorMesh::uniform(&[n, n], 1.0).unwrap();
    let gx = mesh.gradient_operator(0).unwrap();
    let gy = mesh.gradient_operator(1).unwrap();
    let b = Array1::from_shape_fn(mesh.n_cells(), |i| (i as f64 * 0.01).sin());
    let config = CgConfig {
        max_iter: 200,
        tol: 1e-8,
    };

    c.bench_function(&format!("cg_smoothness_{n}x{n}"), |bench| {
        bench.iter(|| {
            let res = truncated_cg(
                |v| Ok(v + &gx.transpose_dot(&gx.dot(v)) + gy.transpose_dot(&gy.dot(v))),
                &b,
                None,
                &config,
            )
            .unwrap();
            black_box(res.iterations);
        })
    });
}

fn bench_cg_32(c: &mut Criterion) {
    bench_cg_smoothness(c, 32);
}

fn bench_cg_64(c: &mut Criterion) {
    bench_cg_smoothness(c, 64);
}

fn bench_operator_assembly(c: &mut Criterion) {
    let mesh = TensorMesh::uniform(&[32, 32, 16], 10.0).unwrap();
    c.bench_function("assemble_gradients_32x32x16", |bench| {
        bench.iter(|| {
            let mut nnz = 0;
            for axis in 0..3 {
                nnz += mesh.gradient_operator(axis).unwrap().nnz();
                nnz += mesh.cell_centered_gradient(axis).unwrap().nnz();
            }
            black_box(nnz);
        })
    });
}

criterion_group!(benches, bench_cg_32, bench_cg_64, bench_operator_assembly);
criterion_main!(benches);
