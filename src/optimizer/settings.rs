/* ************************************************************************ **
** This file is part of vesfit, and is licensed under EITHER the MIT        **
** license or the Apache 2.0 license, at your option.                       **
**                                                                          **
**     http://www.apache.org/licenses/LICENSE-2.0                           **
**     http://opensource.org/licenses/MIT                                   **
** ************************************************************************ */

//! Optimizer configuration, deserializable from YAML.
//!
//! Nothing here is validated beyond what the type system gives us; the full
//! cross-field checks happen once, in `Optimizer::new`.

use crate::{ConfigurationError, FailResult};

use std::path::PathBuf;

use vesfit_coeffs::MatrixMode;

#[derive(Serialize, Deserialize)]
#[derive(Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct Settings {
    /// Simulation steps between coefficient updates.
    #[serde(default = "_settings__stride")]
    pub stride: u64,

    #[serde(default)]
    pub update_rule: UpdateRuleKind,

    pub step_size: StepSize,

    /// Enable curvature tracking.  The mode is fixed for the whole run.
    #[serde(default)]
    pub hessian: Option<HessianSettings>,

    /// Average gradients (and Hessians) over a replica group each update.
    #[serde(default)]
    pub multi_walker: bool,

    #[serde(default = "_settings__coeffs_output")]
    pub coeffs_output: Option<OutputSettings>,

    #[serde(default)]
    pub gradient_output: Option<OutputSettings>,

    #[serde(default)]
    pub hessian_output: Option<OutputSettings>,

    /// Per-coefficient multiplicative gates, one file per set (or a single
    /// file shared by identically-shaped sets).  Masked entries stay put.
    #[serde(default)]
    pub mask_files: Vec<PathBuf>,

    /// Starting coefficients read back from earlier checkpoint output.
    #[serde(default)]
    pub initial_coeffs_files: Vec<PathBuf>,
}

fn _settings__stride() -> u64 { 1 }
fn _settings__coeffs_output() -> Option<OutputSettings> {
    Some(OutputSettings {
        file: PathBuf::from("coeffs.data"),
        stride: _output_settings__stride(),
    })
}

#[derive(Serialize, Deserialize)]
#[derive(Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateRuleKind {
    SteepestDescent,
    AveragedSgd,
}

impl Default for UpdateRuleKind {
    fn default() -> UpdateRuleKind { UpdateRuleKind::SteepestDescent }
}

#[derive(Serialize, Deserialize)]
#[derive(Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum StepSize {
    /// The same step size on every iteration.
    Fixed { value: ScalarOrPerSet },
    /// `initial / (1 + decay * iteration)`.
    Adaptive { initial: ScalarOrPerSet, decay: f64 },
}

impl StepSize {
    /// Base step size per set (before any decay).
    pub fn base(&self) -> &ScalarOrPerSet {
        match self {
            StepSize::Fixed { value } => value,
            StepSize::Adaptive { initial, .. } => initial,
        }
    }

    /// Step size for set `i` on iteration `iteration` (0-based).
    pub fn current(&self, base: f64, iteration: u64) -> f64 {
        match *self {
            StepSize::Fixed { .. } => base,
            StepSize::Adaptive { decay, .. } => base / (1.0 + decay * iteration as f64),
        }
    }
}

/// One value for all coefficient sets, or one value per set.
#[derive(Serialize, Deserialize)]
#[derive(Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum ScalarOrPerSet {
    Scalar(f64),
    PerSet(Vec<f64>),
}

impl ScalarOrPerSet {
    pub fn resolve(&self, n_sets: usize, what: &str) -> FailResult<Vec<f64>> {
        match self {
            ScalarOrPerSet::Scalar(value) => Ok(vec![*value; n_sets]),
            ScalarOrPerSet::PerSet(values) => {
                if values.len() != n_sets {
                    bail!(ConfigurationError::new(format!(
                        "{} values given for {}, but there are {} coefficient sets",
                        values.len(), what, n_sets,
                    )));
                }
                Ok(values.clone())
            },
        }
    }
}

#[derive(Serialize, Deserialize)]
#[derive(Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct HessianSettings {
    pub mode: HessianMode,
}

#[derive(Serialize, Deserialize)]
#[derive(Debug, Copy, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum HessianMode {
    Diagonal,
    Full,
}

impl HessianMode {
    pub fn matrix_mode(self) -> MatrixMode {
        match self {
            HessianMode::Diagonal => MatrixMode::Diagonal,
            HessianMode::Full => MatrixMode::Full,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[derive(Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct OutputSettings {
    pub file: PathBuf,

    /// Updates between appended checkpoint blocks.
    #[serde(default = "_output_settings__stride")]
    pub stride: u64,
}

fn _output_settings__stride() -> u64 { 100 }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_yaml_gets_the_defaults() {
        let settings: Settings = ::serde_yaml::from_str(r#"
            step-size:
              fixed: { value: 0.5 }
        "#).unwrap();
        assert_eq!(settings.stride, 1);
        assert_eq!(settings.update_rule, UpdateRuleKind::SteepestDescent);
        assert_eq!(settings.multi_walker, false);
        assert_eq!(settings.step_size.base(), &ScalarOrPerSet::Scalar(0.5));
        let coeffs_output = settings.coeffs_output.unwrap();
        assert_eq!(coeffs_output.file, PathBuf::from("coeffs.data"));
        assert_eq!(coeffs_output.stride, 100);
        assert!(settings.gradient_output.is_none());
        assert!(settings.mask_files.is_empty());
    }

    #[test]
    fn full_yaml_round_trip() {
        let settings: Settings = ::serde_yaml::from_str(r#"
            stride: 500
            update-rule: averaged-sgd
            step-size:
              adaptive:
                initial: [0.02, 0.04]
                decay: 0.001
            hessian: { mode: diagonal }
            multi-walker: true
            coeffs-output: { file: out/coeffs.data, stride: 10 }
            gradient-output: { file: out/gradient.data }
            hessian-output: { file: out/hessian.data, stride: 1000 }
            mask-files: [mask.data, mask.data]
            initial-coeffs-files: [start-0.data, start-1.data]
        "#).unwrap();
        assert_eq!(settings.stride, 500);
        assert_eq!(settings.update_rule, UpdateRuleKind::AveragedSgd);
        assert_eq!(settings.hessian, Some(HessianSettings { mode: HessianMode::Diagonal }));
        assert_eq!(
            settings.step_size.base().resolve(2, "step-size").unwrap(),
            vec![0.02, 0.04],
        );
        assert_eq!(settings.gradient_output.unwrap().stride, 100);
        assert_eq!(settings.initial_coeffs_files.len(), 2);
    }

    #[test]
    fn per_set_count_mismatch_is_rejected() {
        let values = ScalarOrPerSet::PerSet(vec![0.1, 0.2, 0.3]);
        assert!(values.resolve(2, "step-size").is_err());
        assert_eq!(values.resolve(3, "step-size").unwrap().len(), 3);
    }

    #[test]
    fn adaptive_step_size_decays() {
        let step_size = StepSize::Adaptive {
            initial: ScalarOrPerSet::Scalar(1.0),
            decay: 0.5,
        };
        assert_eq!(step_size.current(1.0, 0), 1.0);
        assert_eq!(step_size.current(1.0, 2), 0.5);
        let fixed = StepSize::Fixed { value: ScalarOrPerSet::Scalar(0.25) };
        assert_eq!(fixed.current(0.25, 1000), 0.25);
    }
}
