// ─────────────────────────────────────────────────────────────────────
// SCPN Inversion Core — Forward Simulation Contract
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Forward-simulation contract consumed by data misfits, plus a dense
//! linear reference implementation (`d = G · f(m)`).
//!
//! Physics engines live outside this crate; they only need to provide
//! predicted data and Jacobian products. Their errors are propagated
//! unchanged through the objective and optimizer.

use std::fmt;
use std::sync::Arc;

use inversion_types::error::{ensure_len, InversionError, InversionResult};
use ndarray::{Array1, Array2};

use crate::mapping::Mapping;

pub trait ForwardSimulation: Send + Sync + fmt::Debug {
    fn n_params(&self) -> usize;
    fn n_data(&self) -> usize;
    /// Predicted data `F(m)`.
    fn dpred(&self, m: &Array1<f64>) -> InversionResult<Array1<f64>>;
    /// `J(m) · v`.
    fn jvec(&self, m: &Array1<f64>, v: &Array1<f64>) -> InversionResult<Array1<f64>>;
    /// `J(m)ᵀ · v`.
    fn jtvec(&self, m: &Array1<f64>, v: &Array1<f64>) -> InversionResult<Array1<f64>>;
}

/// Dense linear operator with an optional model mapping.
#[derive(Debug, Clone)]
pub struct LinearSimulation {
    g: Array2<f64>,
    mapping: Option<Arc<dyn Mapping>>,
}

impl LinearSimulation {
    pub fn new(g: Array2<f64>) -> InversionResult<Self> {
        if g.iter().any(|v| !v.is_finite()) {
            return Err(InversionError::ConfigError(
                "LinearSimulation kernel contains non-finite entries".to_string(),
            ));
        }
        Ok(LinearSimulation { g, mapping: None })
    }

    /// `d = G · mapping(m)`; the mapping output must match the kernel width.
    pub fn with_mapping(mut self, mapping: Arc<dyn Mapping>) -> InversionResult<Self> {
        ensure_len("LinearSimulation mapping output", self.g.ncols(), mapping.n_out())?;
        self.mapping = Some(mapping);
        Ok(self)
    }

    /// Build `G[i, j] = kernel(i, j)`.
    pub fn from_kernel<F>(n_data: usize, n_cells: usize, kernel: F) -> InversionResult<Self>
    where
        F: Fn(usize, usize) -> f64,
    {
        Self::new(Array2::from_shape_fn((n_data, n_cells), |(i, j)| {
            kernel(i, j)
        }))
    }

    pub fn kernel(&self) -> &Array2<f64> {
        &self.g
    }

    fn physical(&self, m: &Array1<f64>) -> InversionResult<Array1<f64>> {
        match &self.mapping {
            Some(map) => map.transform(m),
            None => {
                ensure_len("LinearSimulation model", self.g.ncols(), m.len())?;
                Ok(m.clone())
            }
        }
    }
}

impl ForwardSimulation for LinearSimulation {
    fn n_params(&self) -> usize {
        match &self.mapping {
            Some(map) => map.n_params(),
            None => self.g.ncols(),
        }
    }

    fn n_data(&self) -> usize {
        self.g.nrows()
    }

    fn dpred(&self, m: &Array1<f64>) -> InversionResult<Array1<f64>> {
        Ok(self.g.dot(&self.physical(m)?))
    }

    fn jvec(&self, m: &Array1<f64>, v: &Array1<f64>) -> InversionResult<Array1<f64>> {
        let dv = match &self.mapping {
            Some(map) => map.deriv(m, v)?,
            None => {
                ensure_len("LinearSimulation direction", self.g.ncols(), v.len())?;
                v.clone()
            }
        };
        Ok(self.g.dot(&dv))
    }

    fn jtvec(&self, m: &Array1<f64>, v: &Array1<f64>) -> InversionResult<Array1<f64>> {
        ensure_len("LinearSimulation data vector", self.g.nrows(), v.len())?;
        let gtv = self.g.t().dot(v);
        match &self.mapping {
            Some(map) => map.deriv_transpose(m, &gtv),
            None => Ok(gtv),
        }
    }
}
