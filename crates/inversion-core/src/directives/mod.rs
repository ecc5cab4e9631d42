// ─────────────────────────────────────────────────────────────────────
// SCPN Inversion Core — Directives
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Policy hooks invoked by the driver between optimizer iterations.
//!
//! A directive owns only its own parameters and counters. Everything it may
//! change (objective weights, IRLS state, preconditioner, stop request) is
//! reached through the [`DirectiveContext`] handed to each hook. Hooks run
//! in list order.

pub mod beta;
pub mod coupling;
#[cfg(test)]
mod fixtures;
pub mod irls;
pub mod preconditioner;
pub mod save;
pub mod sensitivity;
pub mod target;

use inversion_types::config::{
    BetaEstimateParams, BetaScheduleParams, CouplingScheduleParams, DirectiveSpec, IrlsParams,
    PreconditionerParams, SaveOutputParams, SensitivityWeightsParams, TargetMisfitParams,
};
use inversion_types::error::{InversionError, InversionResult};
use inversion_types::state::IterationRecord;
use serde::de::DeserializeOwned;

use crate::deprecated;
use crate::objective::ComboObjective;
use crate::optimization::OptimizerState;

pub use beta::{BetaEstimateByEig, BetaSchedule};
pub use coupling::CouplingSchedule;
pub use irls::UpdateIrls;
pub use preconditioner::UpdatePreconditioner;
pub use save::{SaveModelEveryIteration, SaveOutputEveryIteration};
pub use sensitivity::UpdateSensitivityWeights;
pub use target::TargetMisfit;

/// Mutable handles a directive may act through.
pub struct DirectiveContext<'a> {
    pub objective: &'a mut ComboObjective,
    pub state: &'a mut OptimizerState,
    pub history: &'a [IterationRecord],
}

pub trait Directive: Send {
    /// Stable kind name, as used in configuration files.
    fn name(&self) -> &'static str;

    fn after_initialize(&mut self, _ctx: &mut DirectiveContext<'_>) -> InversionResult<()> {
        Ok(())
    }

    fn before_iteration(&mut self, _ctx: &mut DirectiveContext<'_>) -> InversionResult<()> {
        Ok(())
    }

    fn after_iteration(&mut self, _ctx: &mut DirectiveContext<'_>) -> InversionResult<()> {
        Ok(())
    }

    fn after_termination(&mut self, _ctx: &mut DirectiveContext<'_>) -> InversionResult<()> {
        Ok(())
    }
}

// ───────────────────────────── ordering ──────────────────────────────

/// `(earlier, later)`: when both are present, `earlier` must come first.
const ORDER_RULES: [(&str, &str); 4] = [
    (sensitivity::NAME, beta::ESTIMATE_NAME),
    (beta::ESTIMATE_NAME, beta::SCHEDULE_NAME),
    (sensitivity::NAME, preconditioner::NAME),
    (beta::ESTIMATE_NAME, preconditioner::NAME),
];

fn validate_order(names: &[&str]) -> InversionResult<()> {
    let position = |kind: &str| names.iter().position(|n| *n == kind);
    for (earlier, later) in ORDER_RULES {
        if let (Some(i), Some(j)) = (position(earlier), position(later)) {
            if i > j {
                return Err(InversionError::ConfigError(format!(
                    "directive `{earlier}` must be listed before `{later}`"
                )));
            }
        }
    }
    Ok(())
}

/// Ordered, validated set of directives.
#[derive(Default)]
pub struct DirectiveList {
    directives: Vec<Box<dyn Directive>>,
}

impl DirectiveList {
    pub fn new(directives: Vec<Box<dyn Directive>>) -> InversionResult<Self> {
        let names: Vec<&str> = directives.iter().map(|d| d.name()).collect();
        validate_order(&names)?;
        Ok(DirectiveList { directives })
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.directives.iter().map(|d| d.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.directives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }

    pub fn after_initialize(&mut self, ctx: &mut DirectiveContext<'_>) -> InversionResult<()> {
        self.directives.iter_mut().try_for_each(|d| d.after_initialize(ctx))
    }

    pub fn before_iteration(&mut self, ctx: &mut DirectiveContext<'_>) -> InversionResult<()> {
        self.directives.iter_mut().try_for_each(|d| d.before_iteration(ctx))
    }

    pub fn after_iteration(&mut self, ctx: &mut DirectiveContext<'_>) -> InversionResult<()> {
        self.directives.iter_mut().try_for_each(|d| d.after_iteration(ctx))
    }

    pub fn after_termination(&mut self, ctx: &mut DirectiveContext<'_>) -> InversionResult<()> {
        self.directives.iter_mut().try_for_each(|d| d.after_termination(ctx))
    }
}

// ───────────────────────────── construction ──────────────────────────

fn parse_params<T: DeserializeOwned>(spec: &DirectiveSpec) -> InversionResult<T> {
    let params = if spec.params.is_null() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        spec.params.clone()
    };
    serde_json::from_value(params).map_err(|e| {
        InversionError::ConfigError(format!("invalid parameters for directive `{}`: {e}", spec.kind))
    })
}

/// Build one directive from its configuration entry. Removed API names are
/// reported as such before the kind is matched.
pub fn build_directive(spec: &DirectiveSpec) -> InversionResult<Box<dyn Directive>> {
    deprecated::ensure_supported(&spec.kind)?;
    let directive: Box<dyn Directive> = match spec.kind.as_str() {
        beta::SCHEDULE_NAME => Box::new(BetaSchedule::new(parse_params::<BetaScheduleParams>(spec)?)?),
        beta::ESTIMATE_NAME => {
            Box::new(BetaEstimateByEig::new(parse_params::<BetaEstimateParams>(spec)?)?)
        }
        target::NAME => Box::new(TargetMisfit::new(parse_params::<TargetMisfitParams>(spec)?)?),
        irls::NAME => Box::new(UpdateIrls::new(parse_params::<IrlsParams>(spec)?)?),
        coupling::NAME => {
            Box::new(CouplingSchedule::new(parse_params::<CouplingScheduleParams>(spec)?)?)
        }
        sensitivity::NAME => {
            let params: SensitivityWeightsParams = parse_params(spec)?;
            Box::new(UpdateSensitivityWeights::new(params)?)
        }
        preconditioner::NAME => {
            Box::new(UpdatePreconditioner::new(parse_params::<PreconditionerParams>(spec)?)?)
        }
        save::OUTPUT_NAME => {
            Box::new(SaveOutputEveryIteration::new(parse_params::<SaveOutputParams>(spec)?)?)
        }
        save::MODEL_NAME => {
            Box::new(SaveModelEveryIteration::new(parse_params::<SaveOutputParams>(spec)?)?)
        }
        other => {
            return Err(InversionError::ConfigError(format!(
                "unknown directive kind `{other}`"
            )))
        }
    };
    Ok(directive)
}

pub fn build_directives(specs: &[DirectiveSpec]) -> InversionResult<DirectiveList> {
    let directives = specs
        .iter()
        .map(build_directive)
        .collect::<InversionResult<Vec<_>>>()?;
    DirectiveList::new(directives)
}
