//! Mathematical primitives for SCPN Inversion Core.
//!
//! Sparse operators, tensor-mesh differential operators, truncated CG and
//! randomized spectral estimates used by the objective and optimizer layers.

pub mod cg;
pub mod linalg;
pub mod mesh;
pub mod sparse;
