// ─────────────────────────────────────────────────────────────────────
// SCPN Inversion Core — Jacobi Preconditioner
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
use inversion_math::linalg::estimate_diagonal;
use inversion_types::config::PreconditionerParams;
use inversion_types::error::InversionResult;
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::{Directive, DirectiveContext};
use crate::objective::{ComboObjective, ObjectiveFunction};

pub const NAME: &str = "update_preconditioner";

/// Relative floor applied to |diag| before inversion.
const DIAGONAL_FLOOR: f64 = 1e-12;

/// Refreshes the optimizer's Jacobi preconditioner from a probing estimate
/// of the full objective's Hessian diagonal before every iteration.
#[derive(Debug, Clone)]
pub struct UpdatePreconditioner {
    params: PreconditionerParams,
}

impl UpdatePreconditioner {
    pub fn new(params: PreconditionerParams) -> InversionResult<Self> {
        params.validate()?;
        Ok(UpdatePreconditioner { params })
    }

    /// Inverse diagonal estimate at `m`, or `None` for a zero Hessian.
    pub fn compute(
        &self,
        objective: &ComboObjective,
        m: &Array1<f64>,
        iteration: usize,
    ) -> InversionResult<Option<Array1<f64>>> {
        let n = objective.n_params();
        let mut rng = StdRng::seed_from_u64(self.params.seed.wrapping_add(iteration as u64));
        let diag = estimate_diagonal(|v| objective.deriv2(m, v), n, self.params.n_probes, &mut rng)?;
        let max = diag.iter().fold(0.0_f64, |acc, d| acc.max(d.abs()));
        if !(max > 0.0 && max.is_finite()) {
            return Ok(None);
        }
        let floor = DIAGONAL_FLOOR * max;
        Ok(Some(diag.mapv(|d| 1.0 / d.abs().max(floor))))
    }
}

impl Directive for UpdatePreconditioner {
    fn name(&self) -> &'static str {
        NAME
    }

    fn before_iteration(&mut self, ctx: &mut DirectiveContext<'_>) -> InversionResult<()> {
        let inv = self.compute(ctx.objective, &ctx.state.model, ctx.state.iteration)?;
        if inv.is_none() {
            log::warn!("update_preconditioner: Hessian diagonal vanished, preconditioning disabled");
        }
        ctx.state.preconditioner = inv;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directives::fixtures::diagonal_problem;

    #[test]
    fn test_diagonal_hessian_is_inverted_exactly() {
        // H = 2·(s² + β)·I; Rademacher probing is exact for diagonal operators.
        let (mut objective, mut state) = diagonal_problem(2.0, 0.5);
        let mut d = UpdatePreconditioner::new(PreconditionerParams::default()).unwrap();
        let mut ctx = DirectiveContext {
            objective: &mut objective,
            state: &mut state,
            history: &[],
        };
        d.before_iteration(&mut ctx).unwrap();
        let inv = ctx.state.preconditioner.clone().unwrap();
        assert!(inv.iter().all(|x| (x - 1.0 / 9.0).abs() < 1e-12));
    }

    #[test]
    fn test_zero_probes_rejected() {
        assert!(UpdatePreconditioner::new(PreconditionerParams {
            n_probes: 0,
            seed: 1
        })
        .is_err());
    }
}
