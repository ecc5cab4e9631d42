// ─────────────────────────────────────────────────────────────────────
// SCPN Inversion Core — Target Misfit
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
use inversion_types::config::TargetMisfitParams;
use inversion_types::error::{InversionError, InversionResult};

use super::{Directive, DirectiveContext};
use crate::objective::{ComboObjective, ObjectiveFunction, TermRole};

pub const NAME: &str = "target_misfit";

/// Stop once `φ_d ≤ χ · n_data + tolerance`; in per-survey mode every data
/// misfit has to reach its own target.
#[derive(Debug, Clone)]
pub struct TargetMisfit {
    params: TargetMisfitParams,
}

impl TargetMisfit {
    pub fn new(params: TargetMisfitParams) -> InversionResult<Self> {
        params.validate()?;
        Ok(TargetMisfit { params })
    }

    pub fn target(&self, n_data: usize) -> f64 {
        self.params.chi_factor * n_data as f64 + self.params.tolerance
    }

    pub fn is_reached(&self, objective: &ComboObjective, m: &ndarray::Array1<f64>) -> InversionResult<bool> {
        if self.params.per_survey {
            for misfit in objective.data_misfits() {
                let phi = misfit.value(m)?;
                if phi > self.target(misfit.n_data()) {
                    return Ok(false);
                }
            }
            return Ok(true);
        }
        let phi_d = objective.role_value(TermRole::DataMisfit, m)?;
        Ok(phi_d <= self.target(objective.n_data()))
    }
}

impl Directive for TargetMisfit {
    fn name(&self) -> &'static str {
        NAME
    }

    fn after_initialize(&mut self, ctx: &mut DirectiveContext<'_>) -> InversionResult<()> {
        if ctx.objective.n_data() == 0 {
            return Err(InversionError::ConfigError(
                "target_misfit needs at least one data misfit".to_string(),
            ));
        }
        Ok(())
    }

    fn after_iteration(&mut self, ctx: &mut DirectiveContext<'_>) -> InversionResult<()> {
        if self.is_reached(ctx.objective, &ctx.state.model)? {
            log::info!(
                "target_misfit: reached (target {:.4e}) at iteration {}",
                self.target(ctx.objective.n_data()),
                ctx.state.iteration
            );
            ctx.state.request_stop(NAME);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directives::fixtures::diagonal_problem;
    use ndarray::array;

    #[test]
    fn test_stops_only_below_target() {
        let (mut objective, mut state) = diagonal_problem(1.0, 1.0);
        let mut directive = TargetMisfit::new(TargetMisfitParams::default()).unwrap();
        // φ_d = 4.25 > 3 = n_data.
        state.model = array![-0.5, 0.0, 0.0];
        let mut ctx = DirectiveContext {
            objective: &mut objective,
            state: &mut state,
            history: &[],
        };
        directive.after_initialize(&mut ctx).unwrap();
        directive.after_iteration(&mut ctx).unwrap();
        assert_eq!(ctx.state.stop_request(), None);

        ctx.state.model = array![1.0, 0.0, 0.0];
        directive.after_iteration(&mut ctx).unwrap();
        assert_eq!(ctx.state.stop_request(), Some(NAME));
    }

    #[test]
    fn test_tolerance_and_chi_factor() {
        let directive = TargetMisfit::new(TargetMisfitParams {
            chi_factor: 0.5,
            tolerance: 0.25,
            per_survey: false,
        })
        .unwrap();
        assert!((directive.target(10) - 5.25).abs() < 1e-12);
        assert!(TargetMisfit::new(TargetMisfitParams {
            chi_factor: 0.0,
            ..TargetMisfitParams::default()
        })
        .is_err());
    }

    #[test]
    fn test_per_survey_needs_every_misfit() {
        use crate::data_misfit::{L2DataMisfit, ObservedData};
        use crate::mapping::SubsetMap;
        use crate::objective::Term;
        use crate::simulation::LinearSimulation;
        use ndarray::Array2;
        use std::sync::Arc;

        let tile = |idx: Vec<usize>| {
            let sim = LinearSimulation::new(Array2::eye(1)).unwrap();
            let data = ObservedData::new(array![1.0], array![1.0]).unwrap();
            L2DataMisfit::new(Arc::new(sim), data)
                .unwrap()
                .with_model_map(Arc::new(SubsetMap::new(2, idx).unwrap()))
                .unwrap()
        };
        let objective = ComboObjective::new(2)
            .with("tile_0", TermRole::DataMisfit, 1.0, Term::DataMisfit(tile(vec![0])))
            .unwrap()
            .with("tile_1", TermRole::DataMisfit, 1.0, Term::DataMisfit(tile(vec![1])))
            .unwrap();
        // tile 0 misfit 0, tile 1 misfit 1.44: total 1.44 < 2 but tile 1 > 1.
        let m = array![1.0, -0.2];
        let total = TargetMisfit::new(TargetMisfitParams::default()).unwrap();
        let per_survey = TargetMisfit::new(TargetMisfitParams {
            per_survey: true,
            ..TargetMisfitParams::default()
        })
        .unwrap();
        assert!(total.is_reached(&objective, &m).unwrap());
        assert!(!per_survey.is_reached(&objective, &m).unwrap());
        assert!(per_survey.is_reached(&objective, &array![1.0, 0.5]).unwrap());
    }
}
