/* ************************************************************************ **
** This file is part of vesfit, and is licensed under EITHER the MIT        **
** license or the Apache 2.0 license, at your option.                       **
**                                                                          **
**     http://www.apache.org/licenses/LICENSE-2.0                           **
**     http://opensource.org/licenses/MIT                                   **
** ************************************************************************ */

//! Pluggable coefficient update rules.
//!
//! A rule sees one [`CoeffsSet`] at a time, after the gradient (and Hessian)
//! have been recomputed and walker-averaged.  Every per-coefficient change it
//! makes must go through the set's mask value, so that masked coefficients
//! are left untouched no matter what the gradient says.

use crate::optimizer::CoeffsSet;
use crate::settings::UpdateRuleKind;

pub trait UpdateRule {
    fn name(&self) -> &'static str;

    /// Apply one update.  `iteration` counts completed updates before this
    /// one, starting at 0.
    fn update(&self, set: &mut CoeffsSet, step_size: f64, iteration: u64);
}

pub(crate) fn from_kind(kind: &UpdateRuleKind) -> Box<dyn UpdateRule> {
    match kind {
        UpdateRuleKind::SteepestDescent => Box::new(SteepestDescent),
        UpdateRuleKind::AveragedSgd => Box::new(AveragedSgd),
    }
}

/// `coeffs[k] -= s * mask[k] * grad[k]`.  The auxiliary array mirrors the
/// main one.
#[derive(Debug, Default, Copy, Clone)]
pub struct SteepestDescent;

impl UpdateRule for SteepestDescent {
    fn name(&self) -> &'static str { "steepest-descent" }

    fn update(&self, set: &mut CoeffsSet, step_size: f64, _iteration: u64) {
        for k in 0..set.coeffs.len() {
            let delta = step_size * set.mask.value(k) * set.gradient.value(k);
            set.coeffs.add_to_value(k, -delta);
        }
        set.coeffs.snapshot_to_aux();
    }
}

/// Averaged stochastic gradient descent (Bach & Moulines).
///
/// The instantaneous coefficients live in the auxiliary array:
///
/// ```text
/// aux[k]    -= s * mask[k] * (grad[k] + (H . (aux - coeffs))[k])
/// coeffs[k] += (aux[k] - coeffs[k]) / (iteration + 1)
/// ```
///
/// so the main array is the running average of the instantaneous values.
/// The curvature term is only present when Hessian tracking is enabled.
#[derive(Debug, Default, Copy, Clone)]
pub struct AveragedSgd;

impl UpdateRule for AveragedSgd {
    fn name(&self) -> &'static str { "averaged-sgd" }

    fn update(&self, set: &mut CoeffsSet, step_size: f64, iteration: u64) {
        let n = set.coeffs.len();

        let correction = set.hessian.as_ref().map(|hessian| {
            let diff: Vec<f64> = (0..n)
                .map(|k| set.coeffs.aux_value(k) - set.coeffs.value(k))
                .collect();
            hessian.dot_slice(&diff)
        });

        for k in 0..n {
            let mut grad = set.gradient.value(k);
            if let Some(correction) = &correction {
                grad += correction[k];
            }
            let delta = step_size * set.mask.value(k) * grad;
            set.coeffs.add_to_aux_value(k, -delta);
        }

        let weight = 1.0 / (iteration as f64 + 1.0);
        for k in 0..n {
            let averaged = set.coeffs.value(k)
                + weight * (set.coeffs.aux_value(k) - set.coeffs.value(k));
            set.coeffs.set_value(k, averaged);
        }
    }
}
