// ─────────────────────────────────────────────────────────────────────
// SCPN Inversion Core — Inversion Driver
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! The outer loop: optimizer steps interleaved with directive hooks.
//!
//! Per iteration: `before_iteration` hooks, re-evaluation at the current
//! weights, convergence check, one projected Gauss–Newton step, a history
//! record, `after_iteration` hooks, then the stop-request and step/function
//! tolerance checks. Configuration errors surface before the first step;
//! numerical trouble ends the run with a status instead of an error.

use inversion_math::linalg::{all_finite, norm};
use inversion_types::config::InversionConfig;
use inversion_types::error::{InversionError, InversionResult};
use inversion_types::state::{IterationRecord, TerminationStatus};
use ndarray::Array1;

use crate::directives::{build_directives, DirectiveContext, DirectiveList};
use crate::mapping::Wires;
use crate::objective::{ComboObjective, ObjectiveFunction, TermRole};
use crate::optimization::{OptimizerState, ProjectedGnCg, StepOutcome, StepReport};

/// Result of one inversion run.
#[derive(Debug, Clone)]
pub struct InversionOutcome {
    pub model: Array1<f64>,
    /// Objective value at `model`, as last evaluated by the optimizer.
    pub value: f64,
    pub status: TerminationStatus,
    pub history: Vec<IterationRecord>,
    pub iterations: usize,
}

impl InversionOutcome {
    pub fn converged(&self) -> bool {
        self.status.is_converged()
    }

    /// Per-property models of a joint inversion, in wire order.
    pub fn split_models(&self, wires: &Wires) -> InversionResult<Vec<Array1<f64>>> {
        wires.split(&self.model)
    }
}

pub struct Inversion {
    objective: ComboObjective,
    optimizer: ProjectedGnCg,
    directives: DirectiveList,
}

impl Inversion {
    pub fn new(
        objective: ComboObjective,
        optimizer: ProjectedGnCg,
        directives: DirectiveList,
    ) -> InversionResult<Self> {
        if objective.is_empty() {
            return Err(InversionError::ConfigError(
                "objective has no entries".to_string(),
            ));
        }
        optimizer.check_size(objective.n_params())?;
        Ok(Inversion {
            objective,
            optimizer,
            directives,
        })
    }

    /// Optimizer and directives from `config`; directive names go through
    /// the removed-API table.
    pub fn from_config(config: &InversionConfig, objective: ComboObjective) -> InversionResult<Self> {
        config.validate()?;
        let optimizer = ProjectedGnCg::new(config.optimizer.clone())?;
        let directives = build_directives(&config.directives)?;
        log::info!(
            "inversion `{}`: {} parameters, directives {:?}",
            config.name,
            objective.n_params(),
            directives.names()
        );
        Self::new(objective, optimizer, directives)
    }

    pub fn objective(&self) -> &ComboObjective {
        &self.objective
    }

    pub fn objective_mut(&mut self) -> &mut ComboObjective {
        &mut self.objective
    }

    pub fn optimizer(&self) -> &ProjectedGnCg {
        &self.optimizer
    }

    fn record(&self, state: &OptimizerState, report: &StepReport) -> InversionResult<IterationRecord> {
        let m = &state.model;
        Ok(IterationRecord {
            iteration: state.iteration,
            beta: self.objective.beta().unwrap_or(0.0),
            phi_d: self.objective.role_value(TermRole::DataMisfit, m)?,
            phi_m: self.objective.role_value(TermRole::Regularization, m)?,
            phi_coupling: self.objective.role_value(TermRole::Coupling, m)?,
            objective: state.value,
            step_norm: report.step_norm,
            projected_gradient_norm: state.projected_gradient_norm,
            line_search_iterations: report.line_search_iterations,
            cg_iterations: report.cg_iterations,
        })
    }

    pub fn run(&mut self, m0: &Array1<f64>) -> InversionResult<InversionOutcome> {
        let config = self.optimizer.config().clone();
        let mut history: Vec<IterationRecord> = Vec::new();

        let mut state = match self.optimizer.initialize(&self.objective, m0) {
            Ok(state) => state,
            Err(InversionError::Numerical(msg)) => {
                log::warn!("objective failed at the starting model: {msg}");
                return Ok(InversionOutcome {
                    model: m0.clone(),
                    value: f64::NAN,
                    status: TerminationStatus::NumericalFailure,
                    history,
                    iterations: 0,
                });
            }
            Err(e) => return Err(e),
        };
        let step_scale = 1.0 + norm(&state.model);

        self.directives.after_initialize(&mut DirectiveContext {
            objective: &mut self.objective,
            state: &mut state,
            history: &history,
        })?;

        let mut phi0: Option<f64> = None;
        let status = loop {
            self.directives.before_iteration(&mut DirectiveContext {
                objective: &mut self.objective,
                state: &mut state,
                history: &history,
            })?;

            match self.optimizer.evaluate(&self.objective, &mut state) {
                Ok(()) => {}
                Err(InversionError::Numerical(msg)) => {
                    log::warn!("objective evaluation failed: {msg}");
                    break TerminationStatus::NumericalFailure;
                }
                Err(e) => return Err(e),
            }
            if !state.value.is_finite() || !all_finite(&state.gradient) {
                log::warn!("non-finite objective at iteration {}", state.iteration);
                break TerminationStatus::NumericalFailure;
            }
            let phi_ref = *phi0.get_or_insert(state.value);

            if state.projected_gradient_norm <= config.gradient_tolerance {
                break TerminationStatus::GradientTolerance;
            }
            if state.iteration >= config.max_iterations {
                break TerminationStatus::MaxIterations;
            }

            let report = match self.optimizer.step(&self.objective, &mut state) {
                Ok(StepOutcome::Accepted(report)) => report,
                Ok(StepOutcome::Failed(status)) => break status,
                Err(InversionError::Numerical(msg)) => {
                    log::warn!("numerical failure during step: {msg}");
                    break TerminationStatus::NumericalFailure;
                }
                Err(e) => return Err(e),
            };

            let record = self.record(&state, &report)?;
            log::info!(
                "iter {:>3}  beta={:.3e}  phi_d={:.4e}  phi_m={:.4e}  phi_c={:.4e}  phi={:.4e}  |dm|={:.3e}",
                record.iteration,
                record.beta,
                record.phi_d,
                record.phi_m,
                record.phi_coupling,
                record.objective,
                record.step_norm
            );
            history.push(record);

            self.directives.after_iteration(&mut DirectiveContext {
                objective: &mut self.objective,
                state: &mut state,
                history: &history,
            })?;

            if let Some(directive) = state.stop_request() {
                break TerminationStatus::DirectiveStop {
                    directive: directive.to_string(),
                };
            }
            if report.step_norm <= config.step_tolerance * step_scale {
                break TerminationStatus::StepTolerance;
            }
            if config.function_tolerance > 0.0
                && (report.previous_value - state.value).abs()
                    <= config.function_tolerance * (1.0 + phi_ref.abs())
            {
                break TerminationStatus::FunctionTolerance;
            }
        };

        log::info!(
            "inversion finished after {} iterations: {status}",
            state.iteration
        );
        self.directives.after_termination(&mut DirectiveContext {
            objective: &mut self.objective,
            state: &mut state,
            history: &history,
        })?;

        Ok(InversionOutcome {
            model: state.model,
            value: state.value,
            status,
            history,
            iterations: state.iteration,
        })
    }
}
