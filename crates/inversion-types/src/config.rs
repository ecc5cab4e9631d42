// ─────────────────────────────────────────────────────────────────────
// SCPN Inversion Core — Config
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
use serde::{Deserialize, Serialize};

use crate::error::{InversionError, InversionResult};

/// Top-level inversion configuration.
/// Maps 1:1 to the JSON files under `configs/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InversionConfig {
    pub name: String,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub regularization: RegularizationConfig,
    /// Directives in invocation order.
    #[serde(default)]
    pub directives: Vec<DirectiveSpec>,
}

impl InversionConfig {
    /// Load from a JSON file and validate every section.
    pub fn from_file(path: &str) -> InversionResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> InversionResult<()> {
        self.optimizer.validate()?;
        self.regularization.validate()?;
        for spec in &self.directives {
            if spec.kind.trim().is_empty() {
                return Err(InversionError::ConfigError(
                    "directive kind must be non-empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}

// ───────────────────────────── optimizer ─────────────────────────────

/// Projected Gauss-Newton / truncated CG settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Maximum outer iterations (default: 20).
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Maximum backtracking steps per line search (default: 10).
    #[serde(default = "default_max_line_search_iterations")]
    pub max_line_search_iterations: usize,
    /// Maximum inner CG iterations per step (default: 20).
    #[serde(default = "default_max_cg_iterations")]
    pub max_cg_iterations: usize,
    /// Relative residual tolerance of the inner CG solve (default: 1e-3).
    #[serde(default = "default_cg_tolerance")]
    pub cg_tolerance: f64,
    /// Stop when the projected gradient norm drops below this (default: 1e-8).
    #[serde(default = "default_gradient_tolerance")]
    pub gradient_tolerance: f64,
    /// Stop when `||Δm|| <= step_tolerance · (1 + ||m₀||)` (default: 1e-12).
    #[serde(default = "default_step_tolerance")]
    pub step_tolerance: f64,
    /// Stop when `|φ_prev − φ| <= function_tolerance · (1 + |φ₀|)`; 0 disables (default: 0).
    #[serde(default)]
    pub function_tolerance: f64,
    /// Armijo sufficient-decrease constant (default: 1e-4).
    #[serde(default = "default_armijo_c")]
    pub armijo_c: f64,
    /// Backtracking contraction factor in (0, 1) (default: 0.5).
    #[serde(default = "default_step_reduction")]
    pub step_reduction: f64,
    /// Steepest-descent retries after a failed line search (default: 2).
    #[serde(default = "default_max_step_retries")]
    pub max_step_retries: usize,
    /// Uniform lower bound; `None` = unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lower_bound: Option<f64>,
    /// Uniform upper bound; `None` = unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper_bound: Option<f64>,
    /// Distance to a bound under which a parameter counts as active (default: 1e-10).
    #[serde(default = "default_active_set_tolerance")]
    pub active_set_tolerance: f64,
}

fn default_max_iterations() -> usize {
    20
}
fn default_max_line_search_iterations() -> usize {
    10
}
fn default_max_cg_iterations() -> usize {
    20
}
fn default_cg_tolerance() -> f64 {
    1e-3
}
fn default_gradient_tolerance() -> f64 {
    1e-8
}
fn default_step_tolerance() -> f64 {
    1e-12
}
fn default_armijo_c() -> f64 {
    1e-4
}
fn default_step_reduction() -> f64 {
    0.5
}
fn default_max_step_retries() -> usize {
    2
}
fn default_active_set_tolerance() -> f64 {
    1e-10
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig {
            max_iterations: default_max_iterations(),
            max_line_search_iterations: default_max_line_search_iterations(),
            max_cg_iterations: default_max_cg_iterations(),
            cg_tolerance: default_cg_tolerance(),
            gradient_tolerance: default_gradient_tolerance(),
            step_tolerance: default_step_tolerance(),
            function_tolerance: 0.0,
            armijo_c: default_armijo_c(),
            step_reduction: default_step_reduction(),
            max_step_retries: default_max_step_retries(),
            lower_bound: None,
            upper_bound: None,
            active_set_tolerance: default_active_set_tolerance(),
        }
    }
}

impl OptimizerConfig {
    pub fn validate(&self) -> InversionResult<()> {
        if self.max_iterations == 0 {
            return Err(InversionError::ConfigError(
                "optimizer.max_iterations must be >= 1".to_string(),
            ));
        }
        if self.max_line_search_iterations == 0 {
            return Err(InversionError::ConfigError(
                "optimizer.max_line_search_iterations must be >= 1".to_string(),
            ));
        }
        if self.max_cg_iterations == 0 {
            return Err(InversionError::ConfigError(
                "optimizer.max_cg_iterations must be >= 1".to_string(),
            ));
        }
        require_positive("optimizer.cg_tolerance", self.cg_tolerance)?;
        require_non_negative("optimizer.gradient_tolerance", self.gradient_tolerance)?;
        require_non_negative("optimizer.step_tolerance", self.step_tolerance)?;
        require_non_negative("optimizer.function_tolerance", self.function_tolerance)?;
        if !self.armijo_c.is_finite() || !(0.0..1.0).contains(&self.armijo_c) {
            return Err(InversionError::ConfigError(
                "optimizer.armijo_c must be finite and in [0, 1)".to_string(),
            ));
        }
        if !self.step_reduction.is_finite()
            || self.step_reduction <= 0.0
            || self.step_reduction >= 1.0
        {
            return Err(InversionError::ConfigError(
                "optimizer.step_reduction must be finite and in (0, 1)".to_string(),
            ));
        }
        require_non_negative("optimizer.active_set_tolerance", self.active_set_tolerance)?;
        if let (Some(lo), Some(hi)) = (self.lower_bound, self.upper_bound) {
            if lo.is_nan() || hi.is_nan() || lo > hi {
                return Err(InversionError::ConfigError(format!(
                    "optimizer bounds are inconsistent: lower={lo}, upper={hi}"
                )));
            }
        }
        Ok(())
    }
}

// ─────────────────────────── regularization ──────────────────────────

/// Weights and norms for the single-model least-squares / sparse regularization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegularizationConfig {
    #[serde(default = "default_alpha")]
    pub alpha_s: f64,
    #[serde(default = "default_alpha")]
    pub alpha_x: f64,
    #[serde(default = "default_alpha")]
    pub alpha_y: f64,
    #[serde(default = "default_alpha")]
    pub alpha_z: f64,
    /// ℓp exponent of the smallness term, in [0, 2] (default: 2).
    #[serde(default = "default_norm")]
    pub norm_s: f64,
    /// ℓp exponent of the smoothness terms, in [0, 2] (default: 2).
    #[serde(default = "default_norm")]
    pub norm_gradient: f64,
    /// Initial IRLS threshold ε (default: 1e-2).
    #[serde(default = "default_irls_epsilon")]
    pub irls_epsilon: f64,
}

fn default_alpha() -> f64 {
    1.0
}
fn default_norm() -> f64 {
    2.0
}
fn default_irls_epsilon() -> f64 {
    1e-2
}

impl Default for RegularizationConfig {
    fn default() -> Self {
        RegularizationConfig {
            alpha_s: default_alpha(),
            alpha_x: default_alpha(),
            alpha_y: default_alpha(),
            alpha_z: default_alpha(),
            norm_s: default_norm(),
            norm_gradient: default_norm(),
            irls_epsilon: default_irls_epsilon(),
        }
    }
}

impl RegularizationConfig {
    pub fn validate(&self) -> InversionResult<()> {
        require_non_negative("regularization.alpha_s", self.alpha_s)?;
        require_non_negative("regularization.alpha_x", self.alpha_x)?;
        require_non_negative("regularization.alpha_y", self.alpha_y)?;
        require_non_negative("regularization.alpha_z", self.alpha_z)?;
        for (name, p) in [
            ("regularization.norm_s", self.norm_s),
            ("regularization.norm_gradient", self.norm_gradient),
        ] {
            if !p.is_finite() || !(0.0..=2.0).contains(&p) {
                return Err(InversionError::ConfigError(format!(
                    "{name} must be finite and in [0, 2], got {p}"
                )));
            }
        }
        require_positive("regularization.irls_epsilon", self.irls_epsilon)?;
        Ok(())
    }
}

// ───────────────────────────── directives ────────────────────────────

/// A directive entry as written in JSON: `{"kind": "beta_schedule", "params": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectiveSpec {
    pub kind: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// How the trade-off parameter is updated after each iteration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CoolingMode {
    /// `β_k = β₀ · factor^k`, cooled every `rate` iterations.
    Geometric { factor: f64, rate: usize },
    /// `β = ratio · φ_d / φ_m` at the current iterate.
    TargetRatio { ratio: f64 },
}

impl Default for CoolingMode {
    fn default() -> Self {
        CoolingMode::Geometric {
            factor: 0.5,
            rate: 1,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BetaScheduleParams {
    #[serde(default)]
    pub cooling: CoolingMode,
}

impl BetaScheduleParams {
    pub fn validate(&self) -> InversionResult<()> {
        match self.cooling {
            CoolingMode::Geometric { factor, rate } => {
                if !factor.is_finite() || factor <= 0.0 || factor > 1.0 {
                    return Err(InversionError::ConfigError(format!(
                        "beta_schedule.factor must be finite and in (0, 1], got {factor}"
                    )));
                }
                if rate == 0 {
                    return Err(InversionError::ConfigError(
                        "beta_schedule.rate must be >= 1".to_string(),
                    ));
                }
            }
            CoolingMode::TargetRatio { ratio } => {
                require_positive("beta_schedule.ratio", ratio)?;
            }
        }
        Ok(())
    }
}

/// Power iteration versus a single random Rayleigh quotient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimateMethod {
    #[default]
    PowerIteration,
    Ratio,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetaEstimateParams {
    /// β₀ = ratio · λ_d / λ_m (default: 1.0).
    #[serde(default = "default_beta_ratio")]
    pub ratio: f64,
    #[serde(default)]
    pub method: EstimateMethod,
    /// Power-iteration count (default: 4).
    #[serde(default = "default_power_iterations")]
    pub n_iterations: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_beta_ratio() -> f64 {
    1.0
}
fn default_power_iterations() -> usize {
    4
}
fn default_seed() -> u64 {
    518_936
}

impl Default for BetaEstimateParams {
    fn default() -> Self {
        BetaEstimateParams {
            ratio: default_beta_ratio(),
            method: EstimateMethod::default(),
            n_iterations: default_power_iterations(),
            seed: default_seed(),
        }
    }
}

impl BetaEstimateParams {
    pub fn validate(&self) -> InversionResult<()> {
        require_positive("beta_estimate.ratio", self.ratio)?;
        if self.n_iterations == 0 {
            return Err(InversionError::ConfigError(
                "beta_estimate.n_iterations must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetMisfitParams {
    /// Target = chi_factor · n_data (default: 1.0).
    #[serde(default = "default_chi_factor")]
    pub chi_factor: f64,
    /// Absolute slack added to the target (default: 0).
    #[serde(default)]
    pub tolerance: f64,
    /// Require each survey's misfit to reach its own target.
    #[serde(default)]
    pub per_survey: bool,
}

fn default_chi_factor() -> f64 {
    1.0
}

impl Default for TargetMisfitParams {
    fn default() -> Self {
        TargetMisfitParams {
            chi_factor: default_chi_factor(),
            tolerance: 0.0,
            per_survey: false,
        }
    }
}

impl TargetMisfitParams {
    pub fn validate(&self) -> InversionResult<()> {
        require_positive("target_misfit.chi_factor", self.chi_factor)?;
        require_non_negative("target_misfit.tolerance", self.tolerance)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrlsParams {
    /// IRLS re-weightings before the directive requests a stop; 0 disables (default: 10).
    #[serde(default = "default_max_irls_iterations")]
    pub max_irls_iterations: usize,
    /// Stop once the relative change of φ_m falls below this (default: 1e-2).
    #[serde(default = "default_f_min_change")]
    pub f_min_change: f64,
    /// ε is divided by this on every re-weighting (default: 1.2).
    #[serde(default = "default_cool_eps_factor")]
    pub cool_eps_factor: f64,
    /// Lower floor for ε (default: 1e-8).
    #[serde(default = "default_minimum_epsilon")]
    pub minimum_epsilon: f64,
    /// Re-weight from the first iterate instead of waiting for the target misfit.
    #[serde(default)]
    pub start_immediately: bool,
    /// Chi factor used to decide when to start (default: 1.0).
    #[serde(default = "default_chi_factor")]
    pub chi_factor: f64,
}

fn default_max_irls_iterations() -> usize {
    10
}
fn default_f_min_change() -> f64 {
    1e-2
}
fn default_cool_eps_factor() -> f64 {
    1.2
}
fn default_minimum_epsilon() -> f64 {
    1e-8
}

impl Default for IrlsParams {
    fn default() -> Self {
        IrlsParams {
            max_irls_iterations: default_max_irls_iterations(),
            f_min_change: default_f_min_change(),
            cool_eps_factor: default_cool_eps_factor(),
            minimum_epsilon: default_minimum_epsilon(),
            start_immediately: false,
            chi_factor: default_chi_factor(),
        }
    }
}

impl IrlsParams {
    pub fn validate(&self) -> InversionResult<()> {
        require_non_negative("update_irls.f_min_change", self.f_min_change)?;
        if !self.cool_eps_factor.is_finite() || self.cool_eps_factor < 1.0 {
            return Err(InversionError::ConfigError(
                "update_irls.cool_eps_factor must be finite and >= 1".to_string(),
            ));
        }
        require_positive("update_irls.minimum_epsilon", self.minimum_epsilon)?;
        require_positive("update_irls.chi_factor", self.chi_factor)
    }
}

/// Shape of the coupling-weight ramp.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CouplingRamp {
    /// Reach `max_weight` linearly after `iterations` iterations.
    Linear { iterations: usize },
    /// Multiply by `factor` each iteration, capped at `max_weight`.
    Geometric { factor: f64 },
}

impl Default for CouplingRamp {
    fn default() -> Self {
        CouplingRamp::Linear { iterations: 5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouplingScheduleParams {
    #[serde(default)]
    pub start_weight: f64,
    pub max_weight: f64,
    #[serde(default)]
    pub ramp: CouplingRamp,
    /// Restrict the schedule to entries with this label; all coupling entries if absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl CouplingScheduleParams {
    pub fn validate(&self) -> InversionResult<()> {
        require_non_negative("coupling_schedule.start_weight", self.start_weight)?;
        require_non_negative("coupling_schedule.max_weight", self.max_weight)?;
        if self.start_weight > self.max_weight {
            return Err(InversionError::ConfigError(format!(
                "coupling_schedule.start_weight ({}) exceeds max_weight ({})",
                self.start_weight, self.max_weight
            )));
        }
        match self.ramp {
            CouplingRamp::Linear { iterations } => {
                if iterations == 0 {
                    return Err(InversionError::ConfigError(
                        "coupling_schedule.iterations must be >= 1".to_string(),
                    ));
                }
            }
            CouplingRamp::Geometric { factor } => {
                if !factor.is_finite() || factor <= 1.0 {
                    return Err(InversionError::ConfigError(
                        "coupling_schedule.factor must be finite and > 1".to_string(),
                    ));
                }
                if self.start_weight == 0.0 {
                    return Err(InversionError::ConfigError(
                        "coupling_schedule geometric ramp needs start_weight > 0".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensitivityWeightsParams {
    /// Recompute before every iteration instead of once at start.
    #[serde(default)]
    pub every_iteration: bool,
    /// Floor applied after normalization (default: 1e-12).
    #[serde(default = "default_sensitivity_threshold")]
    pub threshold: f64,
    /// Divide by the maximum weight (default: true).
    #[serde(default = "default_true")]
    pub normalize: bool,
}

fn default_sensitivity_threshold() -> f64 {
    1e-12
}
fn default_true() -> bool {
    true
}

impl Default for SensitivityWeightsParams {
    fn default() -> Self {
        SensitivityWeightsParams {
            every_iteration: false,
            threshold: default_sensitivity_threshold(),
            normalize: true,
        }
    }
}

impl SensitivityWeightsParams {
    pub fn validate(&self) -> InversionResult<()> {
        require_non_negative("update_sensitivity_weights.threshold", self.threshold)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreconditionerParams {
    /// Rademacher probes for the Hessian-diagonal estimate (default: 8).
    #[serde(default = "default_probes")]
    pub n_probes: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_probes() -> usize {
    8
}

impl Default for PreconditionerParams {
    fn default() -> Self {
        PreconditionerParams {
            n_probes: default_probes(),
            seed: default_seed(),
        }
    }
}

impl PreconditionerParams {
    pub fn validate(&self) -> InversionResult<()> {
        if self.n_probes == 0 {
            return Err(InversionError::ConfigError(
                "update_preconditioner.n_probes must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveOutputParams {
    /// Output file (JSON lines for history, directory for models).
    pub path: String,
}

fn require_positive(name: &str, value: f64) -> InversionResult<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(InversionError::ConfigError(format!(
            "{name} must be finite and > 0, got {value}"
        )));
    }
    Ok(())
}

fn require_non_negative(name: &str, value: f64) -> InversionResult<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(InversionError::ConfigError(format!(
            "{name} must be finite and >= 0, got {value}"
        )));
    }
    Ok(())
}
