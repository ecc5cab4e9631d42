// ─────────────────────────────────────────────────────────────────────
// SCPN Inversion Core — IRLS Re-weighting
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Sparse-norm regularization as a sequence of frozen-weight quadratic
//! problems. Each re-weighting re-linearises every ℓp term around the
//! current iterate and cools its ε; joint TV in IRLS mode gets a new
//! reference magnitude.

use inversion_types::config::IrlsParams;
use inversion_types::error::InversionResult;
use ndarray::Array1;

use super::{Directive, DirectiveContext};
use crate::objective::{ComboObjective, Term, TermRole};
use crate::regularization::joint_tv::JtvMode;

pub const NAME: &str = "update_irls";

#[derive(Debug, Clone)]
pub struct UpdateIrls {
    params: IrlsParams,
    started: bool,
    irls_iterations: usize,
    phi_m_last: Option<f64>,
}

impl UpdateIrls {
    pub fn new(params: IrlsParams) -> InversionResult<Self> {
        params.validate()?;
        Ok(UpdateIrls {
            params,
            started: false,
            irls_iterations: 0,
            phi_m_last: None,
        })
    }

    pub fn started(&self) -> bool {
        self.started
    }

    pub fn irls_iterations(&self) -> usize {
        self.irls_iterations
    }

    fn enabled(&self) -> bool {
        self.params.max_irls_iterations > 0
    }

    /// Re-linearise every re-weightable term at `m`, cooling ε first when
    /// `cool` is set. Returns the number of terms touched.
    fn reweight(&self, objective: &mut ComboObjective, m: &Array1<f64>, cool: bool) -> InversionResult<usize> {
        let (factor, floor) = (self.params.cool_eps_factor, self.params.minimum_epsilon);
        let mut touched = 0;
        objective.try_for_each_term_mut(&mut |term| {
            match term {
                Term::Smallness(t) => {
                    if cool {
                        t.cool_epsilon(factor, floor);
                    }
                    t.update_irls(m)?;
                }
                Term::Smoothness(t) => {
                    if cool {
                        t.cool_epsilon(factor, floor);
                    }
                    t.update_irls(m)?;
                }
                Term::JointTotalVariation(t) if t.mode() == JtvMode::Irls => t.update_reference(m)?,
                _ => return Ok(()),
            }
            touched += 1;
            Ok(())
        })?;
        Ok(touched)
    }

    fn start(&mut self, ctx: &mut DirectiveContext<'_>) -> InversionResult<()> {
        let touched = self.reweight(ctx.objective, &ctx.state.model, false)?;
        self.started = true;
        self.phi_m_last = Some(ctx.objective.role_value(TermRole::Regularization, &ctx.state.model)?);
        log::info!(
            "update_irls: started at iteration {} ({touched} terms re-weighted)",
            ctx.state.iteration
        );
        Ok(())
    }
}

impl Directive for UpdateIrls {
    fn name(&self) -> &'static str {
        NAME
    }

    fn after_initialize(&mut self, ctx: &mut DirectiveContext<'_>) -> InversionResult<()> {
        if self.enabled() && self.params.start_immediately {
            self.start(ctx)?;
        }
        Ok(())
    }

    fn after_iteration(&mut self, ctx: &mut DirectiveContext<'_>) -> InversionResult<()> {
        if !self.enabled() {
            return Ok(());
        }
        let m = ctx.state.model.clone();
        if !self.started {
            let phi_d = ctx.objective.role_value(TermRole::DataMisfit, &m)?;
            let target = self.params.chi_factor * ctx.objective.n_data() as f64;
            if phi_d <= target {
                self.start(ctx)?;
            }
            return Ok(());
        }

        self.irls_iterations += 1;
        let phi_m = ctx.objective.role_value(TermRole::Regularization, &m)?;
        if let Some(last) = self.phi_m_last {
            let change = (phi_m - last).abs() / last.abs().max(f64::MIN_POSITIVE);
            log::debug!("update_irls: relative φ_m change {change:.3e}");
            if change < self.params.f_min_change {
                log::info!("update_irls: φ_m change {change:.3e} below f_min_change");
                ctx.state.request_stop(NAME);
                return Ok(());
            }
        }
        if self.irls_iterations >= self.params.max_irls_iterations {
            log::info!("update_irls: reached {} re-weightings", self.irls_iterations);
            ctx.state.request_stop(NAME);
            return Ok(());
        }
        self.reweight(ctx.objective, &m, true)?;
        self.phi_m_last = Some(ctx.objective.role_value(TermRole::Regularization, &m)?);
        Ok(())
    }
}
