// ─────────────────────────────────────────────────────────────────────
// SCPN Inversion Core — Projected Gauss-Newton / Truncated CG
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Bound-constrained inexact Gauss–Newton optimizer.
//!
//! Each step:
//!   1. Split parameters into the active set (at a bound with the gradient
//!      pushing outward) and the inactive set.
//!   2. Solve `H Δm = −g` on the inactive set by truncated CG using only
//!      Hessian-vector products, optionally Jacobi-preconditioned.
//!      Active parameters take the steepest-descent component `−g`.
//!   3. Armijo backtracking along the projected path
//!      `m(t) = P(m + t Δm)`. Non-finite trial values count as rejections.
//!   4. If backtracking fails, retry along `−g` with a smaller initial
//!      step; after `max_step_retries` report `LineSearchFailed`.

use inversion_math::cg::{truncated_cg, CgConfig};
use inversion_math::linalg::{all_finite, norm, project_onto_bounds};
use inversion_types::config::OptimizerConfig;
use inversion_types::error::{ensure_len, InversionError, InversionResult};
use inversion_types::state::TerminationStatus;
use ndarray::Array1;

use crate::objective::{ComboObjective, ObjectiveFunction};

// ───────────────────────────── state ─────────────────────────────────

/// Optimizer state for one run. Directives may request a stop or install
/// a preconditioner between iterations.
#[derive(Debug, Clone)]
pub struct OptimizerState {
    pub model: Array1<f64>,
    pub value: f64,
    pub gradient: Array1<f64>,
    pub projected_gradient_norm: f64,
    pub step_norm: f64,
    pub iteration: usize,
    /// Inverse Hessian-diagonal estimate used as a Jacobi preconditioner.
    pub preconditioner: Option<Array1<f64>>,
    stop_request: Option<String>,
}

impl OptimizerState {
    pub fn request_stop(&mut self, directive: &str) {
        if self.stop_request.is_none() {
            log::warn!("directive `{directive}` requested termination");
            self.stop_request = Some(directive.to_string());
        }
    }

    pub fn stop_request(&self) -> Option<&str> {
        self.stop_request.as_deref()
    }
}

/// Diagnostics of one accepted step.
#[derive(Debug, Clone)]
pub struct StepReport {
    pub previous_value: f64,
    pub step_norm: f64,
    pub line_search_iterations: usize,
    pub cg_iterations: usize,
    pub retries: usize,
}

#[derive(Debug, Clone)]
pub enum StepOutcome {
    Accepted(StepReport),
    Failed(TerminationStatus),
}

struct Trial {
    model: Array1<f64>,
    value: f64,
    evaluations: usize,
}

// ───────────────────────────── optimizer ─────────────────────────────

#[derive(Debug, Clone)]
pub struct ProjectedGnCg {
    config: OptimizerConfig,
    lower: Option<Array1<f64>>,
    upper: Option<Array1<f64>>,
}

impl ProjectedGnCg {
    pub fn new(config: OptimizerConfig) -> InversionResult<Self> {
        config.validate()?;
        Ok(ProjectedGnCg {
            config,
            lower: None,
            upper: None,
        })
    }

    /// Per-parameter bounds, overriding the scalar bounds of the config.
    pub fn with_bounds(mut self, lower: Array1<f64>, upper: Array1<f64>) -> InversionResult<Self> {
        ensure_len("optimizer upper bounds", lower.len(), upper.len())?;
        if let Some(i) = (0..lower.len()).find(|&i| lower[i].is_nan() || upper[i].is_nan() || lower[i] > upper[i]) {
            return Err(InversionError::ConfigError(format!(
                "bounds inconsistent at parameter {i}: lower={}, upper={}",
                lower[i], upper[i]
            )));
        }
        self.lower = Some(lower);
        self.upper = Some(upper);
        Ok(self)
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Check per-parameter bounds against the problem size.
    pub fn check_size(&self, n: usize) -> InversionResult<()> {
        if let Some(lo) = &self.lower {
            ensure_len("optimizer bounds", n, lo.len())?;
        }
        Ok(())
    }

    fn bounds(&self, n: usize) -> (Array1<f64>, Array1<f64>) {
        let lower = self
            .lower
            .clone()
            .unwrap_or_else(|| Array1::from_elem(n, self.config.lower_bound.unwrap_or(f64::NEG_INFINITY)));
        let upper = self
            .upper
            .clone()
            .unwrap_or_else(|| Array1::from_elem(n, self.config.upper_bound.unwrap_or(f64::INFINITY)));
        (lower, upper)
    }

    /// Project `m0` onto the bounds and evaluate the objective there.
    pub fn initialize(&self, objective: &ComboObjective, m0: &Array1<f64>) -> InversionResult<OptimizerState> {
        let n = objective.n_params();
        ensure_len("initial model", n, m0.len())?;
        self.check_size(n)?;
        let (lower, upper) = self.bounds(n);
        let mut state = OptimizerState {
            model: project_onto_bounds(m0, &lower, &upper),
            value: f64::NAN,
            gradient: Array1::zeros(n),
            projected_gradient_norm: f64::INFINITY,
            step_norm: 0.0,
            iteration: 0,
            preconditioner: None,
            stop_request: None,
        };
        self.evaluate(objective, &mut state)?;
        Ok(state)
    }

    /// Re-evaluate value, gradient and projected-gradient norm at the
    /// current iterate, e.g. after directives changed the weights.
    pub fn evaluate(&self, objective: &ComboObjective, state: &mut OptimizerState) -> InversionResult<()> {
        state.value = objective.value(&state.model)?;
        state.gradient = objective.deriv(&state.model)?;
        state.projected_gradient_norm = self.projected_gradient_norm(&state.model, &state.gradient);
        Ok(())
    }

    /// `‖P(m − g) − m‖`; zero exactly at a KKT point of the box problem.
    pub fn projected_gradient_norm(&self, m: &Array1<f64>, g: &Array1<f64>) -> f64 {
        let (lower, upper) = self.bounds(m.len());
        norm(&(project_onto_bounds(&(m - g), &lower, &upper) - m))
    }

    /// One projected Gauss–Newton step from `state`. On acceptance the state
    /// holds the new iterate with its value and gradient.
    pub fn step(&self, objective: &ComboObjective, state: &mut OptimizerState) -> InversionResult<StepOutcome> {
        let n = state.model.len();
        let (lower, upper) = self.bounds(n);
        let m = state.model.clone();
        let g = state.gradient.clone();
        let f0 = state.value;

        let (mut direction, cg_iterations) = self.search_direction(objective, state, &lower, &upper)?;
        let mut line_search_iterations = 0;
        let mut initial_step = 1.0;

        for retry in 0..=self.config.max_step_retries {
            let trial = self.line_search(objective, &m, f0, &g, &direction, initial_step, &lower, &upper)?;
            line_search_iterations += trial.as_ref().map_or(self.config.max_line_search_iterations, |t| t.evaluations);
            if let Some(t) = trial {
                state.step_norm = norm(&(&t.model - &m));
                state.model = t.model;
                state.gradient = objective.deriv(&state.model)?;
                state.value = t.value;
                state.projected_gradient_norm = self.projected_gradient_norm(&state.model, &state.gradient);
                state.iteration += 1;
                return Ok(StepOutcome::Accepted(StepReport {
                    previous_value: f0,
                    step_norm: state.step_norm,
                    line_search_iterations,
                    cg_iterations,
                    retries: retry,
                }));
            }
            if retry < self.config.max_step_retries {
                log::warn!(
                    "line search failed (attempt {}), retrying along projected steepest descent",
                    retry + 1
                );
                direction = -&g;
                initial_step *= self.config.step_reduction.powi(self.config.max_line_search_iterations as i32);
            }
        }
        log::warn!("no acceptable step after {} retries", self.config.max_step_retries);
        Ok(StepOutcome::Failed(TerminationStatus::LineSearchFailed))
    }

    fn search_direction(
        &self,
        objective: &ComboObjective,
        state: &OptimizerState,
        lower: &Array1<f64>,
        upper: &Array1<f64>,
    ) -> InversionResult<(Array1<f64>, usize)> {
        let m = &state.model;
        let g = &state.gradient;
        let tol = self.config.active_set_tolerance;
        let active: Vec<bool> = (0..m.len())
            .map(|i| (m[i] <= lower[i] + tol && g[i] > 0.0) || (m[i] >= upper[i] - tol && g[i] < 0.0))
            .collect();
        let mask = Array1::from_shape_fn(m.len(), |i| if active[i] { 0.0 } else { 1.0 });

        let rhs = -(g * &mask);
        let precond = match &state.preconditioner {
            Some(p) => {
                ensure_len("preconditioner", m.len(), p.len())?;
                Some(p * &mask)
            }
            None => None,
        };
        let cg_config = CgConfig {
            max_iter: self.config.max_cg_iterations,
            tol: self.config.cg_tolerance,
        };
        let hvp = |v: &Array1<f64>| -> InversionResult<Array1<f64>> {
            Ok(objective.deriv2(m, &(v * &mask))? * &mask)
        };

        let (mut direction, iterations) = match truncated_cg(hvp, &rhs, precond.as_ref(), &cg_config) {
            Ok(res) => {
                log::debug!(
                    "CG: {} iterations, relative residual {:.3e}, converged={}",
                    res.iterations,
                    res.residual,
                    res.converged
                );
                (res.solution, res.iterations)
            }
            Err(InversionError::Numerical(msg)) => {
                log::warn!("CG failed ({msg}); falling back to steepest descent");
                (rhs.clone(), 0)
            }
            Err(e) => return Err(e),
        };

        for i in 0..m.len() {
            if active[i] {
                direction[i] = -g[i];
            }
        }
        if !all_finite(&direction) || g.dot(&direction) >= 0.0 {
            direction = -g;
        }
        Ok((direction, iterations))
    }

    #[allow(clippy::too_many_arguments)]
    fn line_search(
        &self,
        objective: &ComboObjective,
        m: &Array1<f64>,
        f0: f64,
        g: &Array1<f64>,
        direction: &Array1<f64>,
        initial_step: f64,
        lower: &Array1<f64>,
        upper: &Array1<f64>,
    ) -> InversionResult<Option<Trial>> {
        let mut t = initial_step;
        for k in 0..self.config.max_line_search_iterations {
            let trial = project_onto_bounds(&(m + &(t * direction)), lower, upper);
            let value = match objective.value(&trial) {
                Ok(v) => v,
                Err(InversionError::Numerical(msg)) => {
                    log::debug!("line search: numerical failure at t={t:.3e}: {msg}");
                    f64::NAN
                }
                Err(e) => return Err(e),
            };
            let decrease = g.dot(&(&trial - m));
            if value.is_finite() && value <= f0 + self.config.armijo_c * decrease {
                log::debug!("line search: accepted t={t:.3e} after {} trials", k + 1);
                return Ok(Some(Trial {
                    model: trial,
                    value,
                    evaluations: k + 1,
                }));
            }
            t *= self.config.step_reduction;
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_misfit::{L2DataMisfit, ObservedData};
    use crate::mapping::{ExpMap, IdentityMap};
    use crate::objective::{Term, TermRole};
    use crate::regularization::least_squares::Smallness;
    use crate::simulation::LinearSimulation;
    use ndarray::{array, Array2};
    use std::sync::Arc;

    fn quadratic(reference: Array1<f64>) -> ComboObjective {
        let n = reference.len();
        let s = Smallness::new(Arc::new(IdentityMap::new(n)), Array1::ones(n))
            .unwrap()
            .with_reference(reference)
            .unwrap();
        ComboObjective::new(n)
            .with("phi_m", TermRole::Regularization, 1.0, Term::Smallness(s))
            .unwrap()
    }

    #[test]
    fn test_unconstrained_quadratic_one_step() {
        let obj = quadratic(array![1.0, -2.0, 0.5]);
        let opt = ProjectedGnCg::new(OptimizerConfig {
            cg_tolerance: 1e-12,
            ..OptimizerConfig::default()
        })
        .unwrap();
        let mut state = opt.initialize(&obj, &Array1::zeros(3)).unwrap();
        match opt.step(&obj, &mut state).unwrap() {
            StepOutcome::Accepted(report) => {
                assert_eq!(report.line_search_iterations, 1);
                assert!(report.previous_value > state.value);
            }
            other => panic!("Unexpected outcome: {other:?}"),
        }
        assert!(state.value < 1e-20);
        assert!(state.projected_gradient_norm < 1e-9);
    }

    #[test]
    fn test_bounds_are_respected_and_active_set_converges() {
        let obj = quadratic(array![2.0, -3.0, 0.25]);
        let opt = ProjectedGnCg::new(OptimizerConfig {
            lower_bound: Some(-1.0),
            upper_bound: Some(1.0),
            ..OptimizerConfig::default()
        })
        .unwrap();
        let mut state = opt.initialize(&obj, &array![5.0, 0.0, 0.0]).unwrap();
        assert_eq!(state.model[0], 1.0);
        for _ in 0..5 {
            opt.step(&obj, &mut state).unwrap();
        }
        assert!((state.model[0] - 1.0).abs() < 1e-12);
        assert!((state.model[1] + 1.0).abs() < 1e-12);
        assert!((state.model[2] - 0.25).abs() < 1e-3);
        assert!(state.projected_gradient_norm < 1e-2);
    }

    #[test]
    fn test_per_parameter_bounds() {
        let obj = quadratic(array![2.0, 2.0]);
        let opt = ProjectedGnCg::new(OptimizerConfig::default())
            .unwrap()
            .with_bounds(array![0.0, 0.0], array![0.5, 10.0])
            .unwrap();
        let mut state = opt.initialize(&obj, &array![0.0, 0.0]).unwrap();
        for _ in 0..3 {
            opt.step(&obj, &mut state).unwrap();
        }
        assert!((state.model[0] - 0.5).abs() < 1e-12);
        assert!((state.model[1] - 2.0).abs() < 1e-3);

        assert!(ProjectedGnCg::new(OptimizerConfig::default())
            .unwrap()
            .with_bounds(array![1.0], array![0.0])
            .is_err());
        let wrong = ProjectedGnCg::new(OptimizerConfig::default())
            .unwrap()
            .with_bounds(array![0.0], array![1.0])
            .unwrap();
        assert!(wrong.initialize(&obj, &array![0.0, 0.0]).is_err());
    }

    #[test]
    fn test_overflowing_trial_is_backtracked() {
        // exp(m) model: a full Gauss-Newton step from m = 0 overflows.
        let sim = LinearSimulation::new(Array2::eye(2))
            .unwrap()
            .with_mapping(Arc::new(ExpMap::new(2)))
            .unwrap();
        let data = ObservedData::new(array![1e3, 1e3], array![1.0, 1.0]).unwrap();
        let dm = L2DataMisfit::new(Arc::new(sim), data).unwrap();
        let obj = ComboObjective::new(2)
            .with("phi_d", TermRole::DataMisfit, 1.0, Term::DataMisfit(dm))
            .unwrap();
        let opt = ProjectedGnCg::new(OptimizerConfig {
            max_line_search_iterations: 20,
            ..OptimizerConfig::default()
        })
        .unwrap();
        let mut state = opt.initialize(&obj, &Array1::zeros(2)).unwrap();
        let f0 = state.value;
        match opt.step(&obj, &mut state).unwrap() {
            StepOutcome::Accepted(report) => assert!(report.line_search_iterations > 1),
            other => panic!("Unexpected outcome: {other:?}"),
        }
        assert!(state.value.is_finite() && state.value < f0);
    }

    #[test]
    fn test_preconditioner_length_checked() {
        let obj = quadratic(array![1.0, 1.0]);
        let opt = ProjectedGnCg::new(OptimizerConfig::default()).unwrap();
        let mut state = opt.initialize(&obj, &Array1::zeros(2)).unwrap();
        state.preconditioner = Some(Array1::ones(3));
        assert!(matches!(
            opt.step(&obj, &mut state),
            Err(InversionError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_stop_request_keeps_first_directive() {
        let obj = quadratic(array![1.0]);
        let opt = ProjectedGnCg::new(OptimizerConfig::default()).unwrap();
        let mut state = opt.initialize(&obj, &Array1::zeros(1)).unwrap();
        state.request_stop("target_misfit");
        state.request_stop("update_irls");
        assert_eq!(state.stop_request(), Some("target_misfit"));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let bad = OptimizerConfig {
            step_reduction: 1.5,
            ..OptimizerConfig::default()
        };
        assert!(ProjectedGnCg::new(bad).is_err());
    }
}
