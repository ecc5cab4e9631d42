// ─────────────────────────────────────────────────────────────────────
// SCPN Inversion Core — Objective Composition
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Objective-function contract, the closed set of terms and the weighted
//! combination tree.
//!
//! A [`ComboObjective`] is an ordered list of `(label, role, weight, term)`
//! entries. Its value, gradient and Hessian-vector product are the weighted
//! sums of the children. Children are evaluated in parallel and reduced in
//! entry order, so results are bit-for-bit reproducible.
//!
//! Weights belong to the tree and are changed only by directives between
//! iterations: the trade-off parameter β is the weight shared by the
//! top-level `Regularization` entries, coupling strengths are the weights of
//! the `Coupling` entries.

use std::fmt;
use std::sync::Arc;

use inversion_types::error::{ensure_len, InversionError, InversionResult};
use ndarray::Array1;
use parking_lot::Mutex;
use rayon::prelude::*;

use crate::data_misfit::L2DataMisfit;
use crate::regularization::correspondence::LinearCorrespondence;
use crate::regularization::cross_gradient::CrossGradient;
use crate::regularization::joint_tv::JointTotalVariation;
use crate::regularization::least_squares::{Smallness, SmoothnessFirstOrder};

/// Value / gradient / Hessian-vector product of a scalar function of the
/// stacked model vector.
pub trait ObjectiveFunction: Send + Sync {
    fn n_params(&self) -> usize;
    fn value(&self, m: &Array1<f64>) -> InversionResult<f64>;
    fn deriv(&self, m: &Array1<f64>) -> InversionResult<Array1<f64>>;
    /// `H(m) · v`; PSD for every term in this crate.
    fn deriv2(&self, m: &Array1<f64>, v: &Array1<f64>) -> InversionResult<Array1<f64>>;
}

// ───────────────────────────── model cache ───────────────────────────

/// Single-slot cache keyed on the exact model vector.
pub struct ModelCache<T> {
    slot: Mutex<Option<(Array1<f64>, Arc<T>)>>,
}

impl<T> ModelCache<T> {
    pub fn new() -> Self {
        ModelCache {
            slot: Mutex::new(None),
        }
    }

    /// Return the cached value for `m` or compute and store it. The lock is
    /// not held while `compute` runs.
    pub fn get_or_try_insert<F>(&self, m: &Array1<f64>, compute: F) -> InversionResult<Arc<T>>
    where
        F: FnOnce() -> InversionResult<T>,
    {
        if let Some((key, value)) = self.slot.lock().as_ref() {
            if key == m {
                return Ok(Arc::clone(value));
            }
        }
        let value = Arc::new(compute()?);
        *self.slot.lock() = Some((m.clone(), Arc::clone(&value)));
        Ok(value)
    }

    pub fn clear(&self) {
        *self.slot.lock() = None;
    }
}

impl<T> Default for ModelCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Clones start cold.
impl<T> Clone for ModelCache<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for ModelCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelCache")
            .field("filled", &self.slot.lock().is_some())
            .finish()
    }
}

// ─────────────────────────────── terms ───────────────────────────────

/// Every objective the inversion can be assembled from.
#[derive(Debug, Clone)]
pub enum Term {
    DataMisfit(L2DataMisfit),
    Smallness(Smallness),
    Smoothness(SmoothnessFirstOrder),
    CrossGradient(CrossGradient),
    JointTotalVariation(JointTotalVariation),
    LinearCorrespondence(LinearCorrespondence),
    Combo(ComboObjective),
}

impl Term {
    fn as_objective(&self) -> &dyn ObjectiveFunction {
        match self {
            Term::DataMisfit(t) => t,
            Term::Smallness(t) => t,
            Term::Smoothness(t) => t,
            Term::CrossGradient(t) => t,
            Term::JointTotalVariation(t) => t,
            Term::LinearCorrespondence(t) => t,
            Term::Combo(t) => t,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Term::DataMisfit(_) => "data_misfit",
            Term::Smallness(_) => "smallness",
            Term::Smoothness(_) => "smoothness",
            Term::CrossGradient(_) => "cross_gradient",
            Term::JointTotalVariation(_) => "joint_total_variation",
            Term::LinearCorrespondence(_) => "linear_correspondence",
            Term::Combo(_) => "combo",
        }
    }
}

impl ObjectiveFunction for Term {
    fn n_params(&self) -> usize {
        self.as_objective().n_params()
    }
    fn value(&self, m: &Array1<f64>) -> InversionResult<f64> {
        self.as_objective().value(m)
    }
    fn deriv(&self, m: &Array1<f64>) -> InversionResult<Array1<f64>> {
        self.as_objective().deriv(m)
    }
    fn deriv2(&self, m: &Array1<f64>, v: &Array1<f64>) -> InversionResult<Array1<f64>> {
        self.as_objective().deriv2(m, v)
    }
}

// ─────────────────────────────── combo ───────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermRole {
    DataMisfit,
    Regularization,
    Coupling,
}

#[derive(Debug, Clone)]
pub struct ComboEntry {
    pub label: String,
    pub role: TermRole,
    weight: f64,
    pub term: Term,
}

impl ComboEntry {
    pub fn weight(&self) -> f64 {
        self.weight
    }
}

fn check_weight(label: &str, weight: f64) -> InversionResult<()> {
    if !weight.is_finite() || weight < 0.0 {
        return Err(InversionError::ConfigError(format!(
            "weight of `{label}` must be finite and >= 0, got {weight}"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct ComboObjective {
    n_params: usize,
    entries: Vec<ComboEntry>,
}

impl ComboObjective {
    pub fn new(n_params: usize) -> Self {
        ComboObjective {
            n_params,
            entries: Vec::new(),
        }
    }

    pub fn push(
        &mut self,
        label: &str,
        role: TermRole,
        weight: f64,
        term: Term,
    ) -> InversionResult<()> {
        check_weight(label, weight)?;
        ensure_len(&format!("term `{label}` parameters"), self.n_params, term.n_params())?;
        self.entries.push(ComboEntry {
            label: label.to_string(),
            role,
            weight,
            term,
        });
        Ok(())
    }

    /// Builder form of [`ComboObjective::push`].
    pub fn with(mut self, label: &str, role: TermRole, weight: f64, term: Term) -> InversionResult<Self> {
        self.push(label, role, weight, term)?;
        Ok(self)
    }

    pub fn entries(&self) -> &[ComboEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, label: &str) -> Option<&ComboEntry> {
        self.entries.iter().find(|e| e.label == label)
    }

    pub fn set_weight(&mut self, label: &str, weight: f64) -> InversionResult<()> {
        check_weight(label, weight)?;
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.label == label)
            .ok_or_else(|| InversionError::ConfigError(format!("no objective entry `{label}`")))?;
        entry.weight = weight;
        Ok(())
    }

    /// Set the weight of every top-level entry with `role` (optionally
    /// only those labelled `label`). Returns how many entries changed.
    pub fn set_role_weight(
        &mut self,
        role: TermRole,
        label: Option<&str>,
        weight: f64,
    ) -> InversionResult<usize> {
        check_weight(&format!("{role:?}"), weight)?;
        let mut count = 0;
        for e in self
            .entries
            .iter_mut()
            .filter(|e| e.role == role && label.map_or(true, |l| e.label == l))
        {
            e.weight = weight;
            count += 1;
        }
        Ok(count)
    }

    /// β: the weight of the first top-level `Regularization` entry.
    pub fn beta(&self) -> Option<f64> {
        self.entries
            .iter()
            .find(|e| e.role == TermRole::Regularization)
            .map(|e| e.weight)
    }

    pub fn set_beta(&mut self, beta: f64) -> InversionResult<()> {
        if self.set_role_weight(TermRole::Regularization, None, beta)? == 0 {
            return Err(InversionError::ConfigError(
                "objective has no regularization entry to carry beta".to_string(),
            ));
        }
        Ok(())
    }

    pub fn has_role(&self, role: TermRole) -> bool {
        self.entries.iter().any(|e| e.role == role)
    }

    /// Unweighted sum of the values of all top-level entries with `role`
    /// (φ_d, φ_m or φ_c as reported in the history).
    pub fn role_value(&self, role: TermRole, m: &Array1<f64>) -> InversionResult<f64> {
        let values = self
            .entries
            .par_iter()
            .filter(|e| e.role == role)
            .map(|e| e.term.value(m))
            .collect::<InversionResult<Vec<f64>>>()?;
        Ok(values.into_iter().sum())
    }

    /// Hessian-vector product restricted to `role`. Data-misfit entries keep
    /// their weight; other roles are unweighted so that β does not enter
    /// its own estimate.
    pub fn role_deriv2(
        &self,
        role: TermRole,
        m: &Array1<f64>,
        v: &Array1<f64>,
    ) -> InversionResult<Array1<f64>> {
        let parts = self
            .entries
            .par_iter()
            .filter(|e| e.role == role)
            .map(|e| {
                let scale = if role == TermRole::DataMisfit { e.weight } else { 1.0 };
                e.term.deriv2(m, v).map(|h| h * scale)
            })
            .collect::<InversionResult<Vec<Array1<f64>>>>()?;
        Ok(sum_in_order(self.n_params, parts))
    }

    /// Every data misfit in the tree, depth first.
    pub fn data_misfits(&self) -> Vec<&L2DataMisfit> {
        let mut out = Vec::new();
        self.for_each_term(&mut |t| {
            if let Term::DataMisfit(dm) = t {
                out.push(dm);
            }
        });
        out
    }

    /// Total datum count over all misfits.
    pub fn n_data(&self) -> usize {
        self.data_misfits().iter().map(|d| d.n_data()).sum()
    }

    /// Visit every leaf term, depth first in entry order.
    pub fn for_each_term<'a>(&'a self, f: &mut dyn FnMut(&'a Term)) {
        for e in &self.entries {
            match &e.term {
                Term::Combo(inner) => inner.for_each_term(f),
                leaf => f(leaf),
            }
        }
    }

    /// Mutable variant of [`ComboObjective::for_each_term`]; the closure
    /// may fail, which stops the walk.
    pub fn try_for_each_term_mut(
        &mut self,
        f: &mut dyn FnMut(&mut Term) -> InversionResult<()>,
    ) -> InversionResult<()> {
        for e in &mut self.entries {
            match &mut e.term {
                Term::Combo(inner) => inner.try_for_each_term_mut(f)?,
                leaf => f(leaf)?,
            }
        }
        Ok(())
    }

    fn active(&self) -> impl ParallelIterator<Item = &ComboEntry> {
        self.entries.par_iter().filter(|e| e.weight > 0.0)
    }
}

fn sum_in_order(n: usize, parts: Vec<Array1<f64>>) -> Array1<f64> {
    parts.into_iter().fold(Array1::zeros(n), |mut acc, p| {
        acc += &p;
        acc
    })
}

impl ObjectiveFunction for ComboObjective {
    fn n_params(&self) -> usize {
        self.n_params
    }

    fn value(&self, m: &Array1<f64>) -> InversionResult<f64> {
        ensure_len("ComboObjective model", self.n_params, m.len())?;
        let values = self
            .active()
            .map(|e| e.term.value(m).map(|v| e.weight * v))
            .collect::<InversionResult<Vec<f64>>>()?;
        Ok(values.into_iter().sum())
    }

    fn deriv(&self, m: &Array1<f64>) -> InversionResult<Array1<f64>> {
        ensure_len("ComboObjective model", self.n_params, m.len())?;
        let parts = self
            .active()
            .map(|e| e.term.deriv(m).map(|g| g * e.weight))
            .collect::<InversionResult<Vec<Array1<f64>>>>()?;
        Ok(sum_in_order(self.n_params, parts))
    }

    fn deriv2(&self, m: &Array1<f64>, v: &Array1<f64>) -> InversionResult<Array1<f64>> {
        ensure_len("ComboObjective model", self.n_params, m.len())?;
        ensure_len("ComboObjective direction", self.n_params, v.len())?;
        let parts = self
            .active()
            .map(|e| e.term.deriv2(m, v).map(|h| h * e.weight))
            .collect::<InversionResult<Vec<Array1<f64>>>>()?;
        Ok(sum_in_order(self.n_params, parts))
    }
}
