// ─────────────────────────────────────────────────────────────────────
// SCPN Inversion Core — Coupling Schedule
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
use inversion_types::config::{CouplingRamp, CouplingScheduleParams};
use inversion_types::error::{InversionError, InversionResult};

use super::{Directive, DirectiveContext};
use crate::objective::TermRole;

pub const NAME: &str = "coupling_schedule";

/// Ramps the weights of `Coupling` entries from `start_weight` towards
/// `max_weight`, one step per accepted iteration.
#[derive(Debug, Clone)]
pub struct CouplingSchedule {
    params: CouplingScheduleParams,
    steps: usize,
}

impl CouplingSchedule {
    pub fn new(params: CouplingScheduleParams) -> InversionResult<Self> {
        params.validate()?;
        Ok(CouplingSchedule { params, steps: 0 })
    }

    /// Weight after `k` ramp steps; never exceeds `max_weight`.
    pub fn weight_at(&self, k: usize) -> f64 {
        let (start, max) = (self.params.start_weight, self.params.max_weight);
        match self.params.ramp {
            CouplingRamp::Linear { iterations } => {
                let t = (k as f64 / iterations as f64).min(1.0);
                start + (max - start) * t
            }
            CouplingRamp::Geometric { factor } => (start * factor.powi(k as i32)).min(max),
        }
    }

    fn apply(&self, ctx: &mut DirectiveContext<'_>, weight: f64) -> InversionResult<usize> {
        ctx.objective
            .set_role_weight(TermRole::Coupling, self.params.label.as_deref(), weight)
    }
}

impl Directive for CouplingSchedule {
    fn name(&self) -> &'static str {
        NAME
    }

    fn after_initialize(&mut self, ctx: &mut DirectiveContext<'_>) -> InversionResult<()> {
        self.steps = 0;
        if self.apply(ctx, self.weight_at(0))? == 0 {
            return Err(InversionError::ConfigError(match &self.params.label {
                Some(label) => format!("coupling_schedule: no coupling entry labelled `{label}`"),
                None => "coupling_schedule: objective has no coupling entries".to_string(),
            }));
        }
        Ok(())
    }

    fn after_iteration(&mut self, ctx: &mut DirectiveContext<'_>) -> InversionResult<()> {
        self.steps += 1;
        let weight = self.weight_at(self.steps);
        log::debug!("coupling_schedule: weight -> {weight:.4e}");
        self.apply(ctx, weight).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directives::fixtures::diagonal_problem;
    use crate::mapping::{IdentityMap, Wires};
    use crate::objective::{ComboObjective, Term};
    use crate::regularization::cross_gradient::CrossGradient;
    use crate::regularization::least_squares::Smallness;
    use inversion_types::state::TensorMesh;
    use ndarray::Array1;
    use std::sync::Arc;

    fn params(start: f64, max: f64, ramp: CouplingRamp) -> CouplingScheduleParams {
        CouplingScheduleParams {
            start_weight: start,
            max_weight: max,
            ramp,
            label: None,
        }
    }

    #[test]
    fn test_linear_ramp_reaches_and_holds_maximum() {
        let s = CouplingSchedule::new(params(0.0, 2.0, CouplingRamp::Linear { iterations: 4 })).unwrap();
        assert_eq!(s.weight_at(0), 0.0);
        assert!((s.weight_at(1) - 0.5).abs() < 1e-12);
        assert!((s.weight_at(4) - 2.0).abs() < 1e-12);
        assert!((s.weight_at(9) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_geometric_ramp_is_capped() {
        let s = CouplingSchedule::new(params(0.1, 1.0, CouplingRamp::Geometric { factor: 3.0 })).unwrap();
        assert!((s.weight_at(1) - 0.3).abs() < 1e-12);
        assert!((s.weight_at(2) - 0.9).abs() < 1e-12);
        assert_eq!(s.weight_at(3), 1.0);
    }

    #[test]
    fn test_updates_only_coupling_entries() {
        let mesh = TensorMesh::uniform(&[4], 1.0).unwrap();
        let wires = Wires::new(&[("a", 4), ("b", 4)]).unwrap();
        let cg = CrossGradient::new(&mesh, &wires).unwrap();
        let small = Smallness::new(Arc::new(IdentityMap::new(8)), Array1::ones(8)).unwrap();
        let mut objective = ComboObjective::new(8)
            .with("phi_m", TermRole::Regularization, 3.0, Term::Smallness(small))
            .unwrap()
            .with("cross_gradient", TermRole::Coupling, 0.0, Term::CrossGradient(cg))
            .unwrap();
        let (_, mut state) = diagonal_problem(1.0, 1.0);
        state.model = Array1::zeros(8);
        let mut s = CouplingSchedule::new(params(1.0, 4.0, CouplingRamp::Linear { iterations: 3 })).unwrap();
        let mut ctx = DirectiveContext {
            objective: &mut objective,
            state: &mut state,
            history: &[],
        };
        s.after_initialize(&mut ctx).unwrap();
        assert_eq!(ctx.objective.entry("cross_gradient").unwrap().weight(), 1.0);
        s.after_iteration(&mut ctx).unwrap();
        assert!((ctx.objective.entry("cross_gradient").unwrap().weight() - 2.0).abs() < 1e-12);
        assert_eq!(ctx.objective.beta(), Some(3.0));
    }

    #[test]
    fn test_missing_coupling_entry_is_config_error() {
        let (mut objective, mut state) = diagonal_problem(1.0, 1.0);
        let mut s = CouplingSchedule::new(params(0.0, 1.0, CouplingRamp::default())).unwrap();
        let mut ctx = DirectiveContext {
            objective: &mut objective,
            state: &mut state,
            history: &[],
        };
        match s.after_initialize(&mut ctx).unwrap_err() {
            InversionError::ConfigError(msg) => assert!(msg.contains("no coupling")),
            other => panic!("Unexpected error: {other:?}"),
        }
    }
}
