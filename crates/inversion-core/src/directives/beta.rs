// ─────────────────────────────────────────────────────────────────────
// SCPN Inversion Core — Trade-off Parameter Directives
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! β initialisation and cooling.

use inversion_math::linalg::{estimate_max_eigenvalue, rademacher_vector, rayleigh_quotient};
use inversion_types::config::{BetaEstimateParams, BetaScheduleParams, CoolingMode, EstimateMethod};
use inversion_types::error::{InversionError, InversionResult};
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::{Directive, DirectiveContext};
use crate::objective::{ComboObjective, ObjectiveFunction, TermRole};

pub const SCHEDULE_NAME: &str = "beta_schedule";
pub const ESTIMATE_NAME: &str = "beta_estimate";

fn current_beta(objective: &ComboObjective, directive: &str) -> InversionResult<f64> {
    objective.beta().ok_or_else(|| {
        InversionError::ConfigError(format!(
            "directive `{directive}` needs a regularization entry to carry beta"
        ))
    })
}

// ───────────────────────────── schedule ──────────────────────────────

/// Geometric cooling `β_k = β₀ · factor^⌊k / rate⌋`, or the target-ratio
/// rule `β = ratio · φ_d / φ_m` at the current iterate.
#[derive(Debug, Clone)]
pub struct BetaSchedule {
    cooling: CoolingMode,
    beta0: Option<f64>,
}

impl BetaSchedule {
    pub fn new(params: BetaScheduleParams) -> InversionResult<Self> {
        params.validate()?;
        Ok(BetaSchedule {
            cooling: params.cooling,
            beta0: None,
        })
    }

    pub fn geometric(factor: f64, rate: usize) -> InversionResult<Self> {
        Self::new(BetaScheduleParams {
            cooling: CoolingMode::Geometric { factor, rate },
        })
    }

    /// β₀ as captured after initialisation (and after any β estimate).
    pub fn initial_beta(&self) -> Option<f64> {
        self.beta0
    }
}

impl Directive for BetaSchedule {
    fn name(&self) -> &'static str {
        SCHEDULE_NAME
    }

    fn after_initialize(&mut self, ctx: &mut DirectiveContext<'_>) -> InversionResult<()> {
        self.beta0 = Some(current_beta(ctx.objective, SCHEDULE_NAME)?);
        Ok(())
    }

    fn after_iteration(&mut self, ctx: &mut DirectiveContext<'_>) -> InversionResult<()> {
        let beta = match self.cooling {
            CoolingMode::Geometric { factor, rate } => {
                let k = ctx.state.iteration;
                if k % rate != 0 {
                    return Ok(());
                }
                let beta0 = match self.beta0 {
                    Some(b) => b,
                    None => current_beta(ctx.objective, SCHEDULE_NAME)?,
                };
                beta0 * factor.powi((k / rate) as i32)
            }
            CoolingMode::TargetRatio { ratio } => {
                let m = &ctx.state.model;
                let phi_d = ctx.objective.role_value(TermRole::DataMisfit, m)?;
                let phi_m = ctx.objective.role_value(TermRole::Regularization, m)?;
                if !(phi_m > 0.0 && phi_m.is_finite()) {
                    log::warn!("beta_schedule: φ_m = {phi_m:.3e}, keeping beta");
                    return Ok(());
                }
                ratio * phi_d / phi_m
            }
        };
        log::info!("beta_schedule: beta -> {beta:.4e}");
        ctx.objective.set_beta(beta)
    }
}

// ───────────────────────────── estimate ──────────────────────────────

/// β₀ = ratio · λ_max(H_d) / λ_max(H_m) at the starting model.
#[derive(Debug, Clone)]
pub struct BetaEstimateByEig {
    params: BetaEstimateParams,
    estimate: Option<f64>,
}

impl BetaEstimateByEig {
    pub fn new(params: BetaEstimateParams) -> InversionResult<Self> {
        params.validate()?;
        Ok(BetaEstimateByEig {
            params,
            estimate: None,
        })
    }

    pub fn estimate(&self) -> Option<f64> {
        self.estimate
    }

    /// Compute β₀ for `objective` at its starting model without applying it.
    pub fn compute(&self, objective: &ComboObjective, m: &ndarray::Array1<f64>) -> InversionResult<f64> {
        let n = objective.n_params();
        let mut rng = StdRng::seed_from_u64(self.params.seed);
        let h_d = |v: &ndarray::Array1<f64>| objective.role_deriv2(TermRole::DataMisfit, m, v);
        let h_m = |v: &ndarray::Array1<f64>| objective.role_deriv2(TermRole::Regularization, m, v);
        let (lambda_d, lambda_m) = match self.params.method {
            EstimateMethod::PowerIteration => (
                estimate_max_eigenvalue(h_d, n, self.params.n_iterations, &mut rng)?,
                estimate_max_eigenvalue(h_m, n, self.params.n_iterations, &mut rng)?,
            ),
            EstimateMethod::Ratio => {
                let x = rademacher_vector(n, &mut rng);
                (rayleigh_quotient(h_d, &x)?, rayleigh_quotient(h_m, &x)?)
            }
        };
        if !(lambda_m > 0.0 && lambda_m.is_finite()) || !lambda_d.is_finite() {
            return Err(InversionError::Numerical(format!(
                "beta estimate undefined: λ_d = {lambda_d:.3e}, λ_m = {lambda_m:.3e}"
            )));
        }
        Ok(self.params.ratio * lambda_d / lambda_m)
    }
}

impl Directive for BetaEstimateByEig {
    fn name(&self) -> &'static str {
        ESTIMATE_NAME
    }

    fn after_initialize(&mut self, ctx: &mut DirectiveContext<'_>) -> InversionResult<()> {
        current_beta(ctx.objective, ESTIMATE_NAME)?;
        let beta0 = self.compute(ctx.objective, &ctx.state.model)?;
        log::info!("beta_estimate: beta0 = {beta0:.4e}");
        self.estimate = Some(beta0);
        ctx.objective.set_beta(beta0)
    }
}
