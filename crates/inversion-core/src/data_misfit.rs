// ─────────────────────────────────────────────────────────────────────
// SCPN Inversion Core — L2 Data Misfit
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Weighted least-squares data misfit `φ_d(m) = ‖W (F(m) − d_obs)‖²`
//! with `W = diag(1/σ)`.
//!
//! The second derivative is always the Gauss–Newton approximation
//! `2 Jᵀ WᵀW J`, which is PSD regardless of the forward physics.
//! Predicted data are cached per model vector so that value and gradient
//! at the same iterate cost a single forward solve.

use std::sync::Arc;

use inversion_types::error::{ensure_len, InversionError, InversionResult};
use ndarray::Array1;

use crate::mapping::Mapping;
use crate::objective::{ModelCache, ObjectiveFunction};
use crate::simulation::ForwardSimulation;

// ─────────────────────────── observed data ───────────────────────────

/// Observed data and their standard deviations.
#[derive(Debug, Clone)]
pub struct ObservedData {
    dobs: Array1<f64>,
    standard_deviation: Array1<f64>,
}

impl ObservedData {
    pub fn new(dobs: Array1<f64>, standard_deviation: Array1<f64>) -> InversionResult<Self> {
        ensure_len("ObservedData uncertainties", dobs.len(), standard_deviation.len())?;
        if dobs.iter().any(|d| !d.is_finite()) {
            return Err(InversionError::ConfigError(
                "observed data must be finite".to_string(),
            ));
        }
        if let Some((i, s)) = standard_deviation
            .iter()
            .enumerate()
            .find(|(_, s)| !s.is_finite() || **s <= 0.0)
        {
            return Err(InversionError::ConfigError(format!(
                "standard deviation must be finite and > 0, got {s} at datum {i}"
            )));
        }
        Ok(ObservedData {
            dobs,
            standard_deviation,
        })
    }

    /// `σ = relative_error · |d_obs| + noise_floor`.
    pub fn with_relative_error(
        dobs: Array1<f64>,
        relative_error: f64,
        noise_floor: f64,
    ) -> InversionResult<Self> {
        if !relative_error.is_finite() || relative_error < 0.0 {
            return Err(InversionError::ConfigError(format!(
                "relative_error must be finite and >= 0, got {relative_error}"
            )));
        }
        if !noise_floor.is_finite() || noise_floor < 0.0 {
            return Err(InversionError::ConfigError(format!(
                "noise_floor must be finite and >= 0, got {noise_floor}"
            )));
        }
        let std = dobs.mapv(|d| relative_error * d.abs() + noise_floor);
        Self::new(dobs, std)
    }

    pub fn n_data(&self) -> usize {
        self.dobs.len()
    }

    pub fn dobs(&self) -> &Array1<f64> {
        &self.dobs
    }

    pub fn standard_deviation(&self) -> &Array1<f64> {
        &self.standard_deviation
    }
}

// ───────────────────────────── misfit ────────────────────────────────

/// `‖W (F(f(m)) − d_obs)‖²` where `f` is the optional model map.
#[derive(Debug, Clone)]
pub struct L2DataMisfit {
    data: ObservedData,
    simulation: Arc<dyn ForwardSimulation>,
    model_map: Option<Arc<dyn Mapping>>,
    weights: Array1<f64>,
    n_params: usize,
    residual_cache: ModelCache<Array1<f64>>,
}

impl L2DataMisfit {
    pub fn new(simulation: Arc<dyn ForwardSimulation>, data: ObservedData) -> InversionResult<Self> {
        ensure_len("L2DataMisfit data", simulation.n_data(), data.n_data())?;
        let weights = data.standard_deviation().mapv(|s| 1.0 / s);
        let n_params = simulation.n_params();
        Ok(L2DataMisfit {
            data,
            simulation,
            model_map: None,
            weights,
            n_params,
            residual_cache: ModelCache::new(),
        })
    }

    /// Attach a map from the global model to the simulation's model
    /// (e.g. a [`crate::mapping::SubsetMap`] for one tile).
    pub fn with_model_map(mut self, map: Arc<dyn Mapping>) -> InversionResult<Self> {
        ensure_len("L2DataMisfit model map output", self.simulation.n_params(), map.n_out())?;
        self.n_params = map.n_params();
        self.model_map = Some(map);
        self.residual_cache.clear();
        Ok(self)
    }

    /// Replace `W` directly. Entries must be finite and > 0.
    pub fn set_weights(&mut self, weights: Array1<f64>) -> InversionResult<()> {
        ensure_len("L2DataMisfit weights", self.data.n_data(), weights.len())?;
        if weights.iter().any(|w| !w.is_finite() || *w <= 0.0) {
            return Err(InversionError::ConfigError(
                "data weights must be finite and > 0".to_string(),
            ));
        }
        self.weights = weights;
        self.residual_cache.clear();
        Ok(())
    }

    pub fn weights(&self) -> &Array1<f64> {
        &self.weights
    }

    pub fn n_data(&self) -> usize {
        self.data.n_data()
    }

    pub fn data(&self) -> &ObservedData {
        &self.data
    }

    fn local_model(&self, m: &Array1<f64>) -> InversionResult<Array1<f64>> {
        match &self.model_map {
            Some(map) => map.transform(m),
            None => Ok(m.clone()),
        }
    }

    /// `J_total · v` through the model map.
    fn jvec(&self, m: &Array1<f64>, v: &Array1<f64>) -> InversionResult<Array1<f64>> {
        match &self.model_map {
            Some(map) => {
                let local = map.transform(m)?;
                self.simulation.jvec(&local, &map.deriv(m, v)?)
            }
            None => self.simulation.jvec(m, v),
        }
    }

    /// `J_totalᵀ · v` through the model map.
    fn jtvec(&self, m: &Array1<f64>, v: &Array1<f64>) -> InversionResult<Array1<f64>> {
        match &self.model_map {
            Some(map) => {
                let local = map.transform(m)?;
                map.deriv_transpose(m, &self.simulation.jtvec(&local, v)?)
            }
            None => self.simulation.jtvec(m, v),
        }
    }

    /// `F(m) − d_obs`, cached on the exact model vector.
    pub fn residual(&self, m: &Array1<f64>) -> InversionResult<Arc<Array1<f64>>> {
        ensure_len("L2DataMisfit model", self.n_params, m.len())?;
        self.residual_cache.get_or_try_insert(m, || {
            let pred = self.simulation.dpred(&self.local_model(m)?)?;
            ensure_len("predicted data", self.data.n_data(), pred.len())?;
            Ok(pred - self.data.dobs())
        })
    }

    /// Per-parameter `Σ_i (W J)_{ij}²`, computed exactly from one `Jᵀ`
    /// product per datum.
    pub fn sensitivity_squared(&self, m: &Array1<f64>) -> InversionResult<Array1<f64>> {
        ensure_len("L2DataMisfit model", self.n_params, m.len())?;
        let mut acc = Array1::zeros(self.n_params);
        let mut unit = Array1::zeros(self.n_data());
        for i in 0..self.n_data() {
            unit[i] = self.weights[i];
            let row = self.jtvec(m, &unit)?;
            acc += &row.mapv(|x| x * x);
            unit[i] = 0.0;
        }
        Ok(acc)
    }
}

impl ObjectiveFunction for L2DataMisfit {
    fn n_params(&self) -> usize {
        self.n_params
    }

    fn value(&self, m: &Array1<f64>) -> InversionResult<f64> {
        let r = self.residual(m)?;
        let wr = &self.weights * r.as_ref();
        Ok(wr.dot(&wr))
    }

    fn deriv(&self, m: &Array1<f64>) -> InversionResult<Array1<f64>> {
        let r = self.residual(m)?;
        let w2r = 2.0 * &self.weights * &self.weights * r.as_ref();
        self.jtvec(m, &w2r)
    }

    fn deriv2(&self, m: &Array1<f64>, v: &Array1<f64>) -> InversionResult<Array1<f64>> {
        ensure_len("L2DataMisfit model", self.n_params, m.len())?;
        ensure_len("L2DataMisfit direction", self.n_params, v.len())?;
        let jv = self.jvec(m, v)?;
        let w2jv = 2.0 * &self.weights * &self.weights * &jv;
        self.jtvec(m, &w2jv)
    }
}
