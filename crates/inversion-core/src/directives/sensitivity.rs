// ─────────────────────────────────────────────────────────────────────
// SCPN Inversion Core — Sensitivity Weighting
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Cell weights from the data sensitivity `sqrt(Σ_i (W J)_{ij}²)`,
//! normalised by their maximum and floored at `threshold`. The weights
//! live in model space and reach each regularization term through the
//! index structure of that term's mapping (`Mapping::restrict`).

use inversion_types::config::SensitivityWeightsParams;
use inversion_types::error::{InversionError, InversionResult};
use ndarray::Array1;

use super::{Directive, DirectiveContext};
use crate::objective::{ComboObjective, ObjectiveFunction, Term};

pub const NAME: &str = "update_sensitivity_weights";

#[derive(Debug, Clone)]
pub struct UpdateSensitivityWeights {
    params: SensitivityWeightsParams,
}

impl UpdateSensitivityWeights {
    pub fn new(params: SensitivityWeightsParams) -> InversionResult<Self> {
        params.validate()?;
        Ok(UpdateSensitivityWeights { params })
    }

    /// Model-space weights at `m`, summed over every data misfit.
    pub fn compute(&self, objective: &ComboObjective, m: &Array1<f64>) -> InversionResult<Array1<f64>> {
        let misfits = objective.data_misfits();
        if misfits.is_empty() {
            return Err(InversionError::ConfigError(
                "update_sensitivity_weights needs at least one data misfit".to_string(),
            ));
        }
        let mut acc = Array1::zeros(objective.n_params());
        for misfit in misfits {
            acc += &misfit.sensitivity_squared(m)?;
        }
        let mut w = acc.mapv(f64::sqrt);
        if self.params.normalize {
            let max = w.iter().cloned().fold(0.0, f64::max);
            if max > 0.0 {
                w /= max;
            }
        }
        let threshold = self.params.threshold;
        w.mapv_inplace(|x| x.max(threshold));
        Ok(w)
    }

    fn apply(&self, ctx: &mut DirectiveContext<'_>) -> InversionResult<()> {
        let w = self.compute(ctx.objective, &ctx.state.model)?;
        if w.iter().all(|&x| x == 0.0) {
            log::warn!("update_sensitivity_weights: all weights are zero, keeping previous weights");
            return Ok(());
        }
        let mut updated = 0;
        ctx.objective.try_for_each_term_mut(&mut |term| {
            match term {
                Term::Smallness(t) => {
                    let cell = t.mapping().restrict(&w)?;
                    t.set_cell_weights(cell)?;
                }
                Term::Smoothness(t) => {
                    let cell = t.mapping().restrict(&w)?;
                    t.set_cell_weights(cell)?;
                }
                _ => return Ok(()),
            }
            updated += 1;
            Ok(())
        })?;
        log::debug!("update_sensitivity_weights: {updated} regularization terms updated");
        Ok(())
    }
}

impl Directive for UpdateSensitivityWeights {
    fn name(&self) -> &'static str {
        NAME
    }

    fn after_initialize(&mut self, ctx: &mut DirectiveContext<'_>) -> InversionResult<()> {
        self.apply(ctx)
    }

    fn before_iteration(&mut self, ctx: &mut DirectiveContext<'_>) -> InversionResult<()> {
        if self.params.every_iteration && ctx.state.iteration > 0 {
            self.apply(ctx)?;
        }
        Ok(())
    }
}
