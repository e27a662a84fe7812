/* ************************************************************************ **
** This file is part of vesfit, and is licensed under EITHER the MIT        **
** license or the Apache 2.0 license, at your option.                       **
**                                                                          **
**     http://www.apache.org/licenses/LICENSE-2.0                           **
**     http://opensource.org/licenses/MIT                                   **
** ************************************************************************ */

//! Iterative fitting of bias-expansion coefficients.
//!
//! The [`Optimizer`] owns one [`CoeffsSet`] of containers per bias expansion
//! and drives them through scheduled updates: on every `stride`-th simulation
//! step it asks each bias to recompute its gradient (and Hessian, when
//! tracked), optionally averages those over a replica group, applies the
//! configured [`UpdateRule`], and appends checkpoint blocks to the configured
//! output files.
//!
//! Biases are handed in at construction as trait objects ([`BiasExpansion`]);
//! they never hold references into the optimizer's containers.  All
//! configuration is validated once, in [`Optimizer::new`].

#[macro_use] extern crate log;
#[macro_use] extern crate failure;
#[macro_use] extern crate itertools;
#[macro_use] extern crate serde_derive;

pub type FailResult<T> = Result<T, failure::Error>;

pub use crate::optimizer::{CoeffsSet, Optimizer, SetMonitor};
pub use crate::rules::{AveragedSgd, SteepestDescent, UpdateRule};
pub use crate::settings::{
    HessianMode, HessianSettings, OutputSettings, ScalarOrPerSet, Settings, StepSize,
    UpdateRuleKind,
};

mod optimizer;
mod output;
mod rules;
mod settings;

use vesfit_coeffs::{CoeffsMatrix, CoeffsSpace, CoeffsVector};
use std::sync::Arc;

/// The settings do not describe a runnable optimization.
#[derive(Debug, Fail)]
#[fail(display = "bad optimizer configuration: {}", detail)]
pub struct ConfigurationError {
    pub detail: String,
}

impl ConfigurationError {
    pub(crate) fn new(detail: impl Into<String>) -> ConfigurationError {
        ConfigurationError { detail: detail.into() }
    }
}

/// One bias expansion whose coefficients are to be fitted.
///
/// The optimizer owns the coefficient containers; the bias only gets to see
/// the current coefficients when asked to recompute its gradient.  One
/// coefficient set per bias.
pub trait BiasExpansion {
    fn label(&self) -> &str;

    /// Shape of this bias' coefficient set.
    fn space(&self) -> Arc<CoeffsSpace>;

    /// Starting coefficient values, if the bias has any.  (An
    /// `initial-coeffs-files` entry takes precedence.)
    fn initial_coeffs(&self) -> Option<Vec<f64>> { None }

    /// Recompute the gradient of the objective with respect to this bias'
    /// coefficients, writing it into `gradient`.
    fn compute_gradient(&mut self, coeffs: &CoeffsVector, gradient: &mut CoeffsVector);

    /// Recompute the curvature estimate.  Only ever invoked when Hessian
    /// tracking is enabled in the settings; the provided matrix has the mode
    /// chosen there.  The default writes zero curvature.
    fn compute_hessian(&mut self, coeffs: &CoeffsVector, hessian: &mut CoeffsMatrix) {
        let _ = coeffs;
        hessian.fill(0.0);
    }
}
