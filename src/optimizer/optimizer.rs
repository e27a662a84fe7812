/* ************************************************************************ **
** This file is part of vesfit, and is licensed under EITHER the MIT        **
** license or the Apache 2.0 license, at your option.                       **
**                                                                          **
**     http://www.apache.org/licenses/LICENSE-2.0                           **
**     http://opensource.org/licenses/MIT                                   **
** ************************************************************************ */

use crate::{BiasExpansion, ConfigurationError, FailResult};
use crate::output::{self, OutputStream};
use crate::rules::{self, UpdateRule};
use crate::settings::{OutputSettings, Settings, StepSize};

use std::collections::HashSet;
use std::path::PathBuf;

use vesfit_coeffs::{io as coeffs_io, CoeffsMatrix, CoeffsVector};
use vesfit_walkers::ReplicaGroup;

/// The containers the optimizer owns for one bias expansion.
///
/// The coefficient vector always carries its auxiliary array; what the
/// auxiliary holds is up to the update rule (a plain mirror for steepest
/// descent, the instantaneous coefficients for averaged SGD).
pub struct CoeffsSet {
    pub(crate) label: String,
    pub(crate) coeffs: CoeffsVector,
    pub(crate) gradient: CoeffsVector,
    pub(crate) hessian: Option<CoeffsMatrix>,
    pub(crate) mask: CoeffsVector,
}

impl CoeffsSet {
    pub fn label(&self) -> &str { &self.label }
    pub fn coeffs(&self) -> &CoeffsVector { &self.coeffs }
    pub fn gradient(&self) -> &CoeffsVector { &self.gradient }
    pub fn hessian(&self) -> Option<&CoeffsMatrix> { self.hessian.as_ref() }
    pub fn mask(&self) -> &CoeffsVector { &self.mask }
}

/// Monitoring quantities refreshed after every update.
#[derive(Debug, Clone, Default)]
pub struct SetMonitor {
    pub gradient_rms: f64,
    pub gradient_max_abs: f64,
    pub gradient_max_abs_index: usize,
    pub step_size: f64,
}

pub struct Optimizer {
    stride: u64,
    step_size: StepSize,
    base_step_sizes: Vec<f64>,
    rule: Box<dyn UpdateRule>,
    biases: Vec<Box<dyn BiasExpansion>>,
    sets: Vec<CoeffsSet>,
    monitors: Vec<SetMonitor>,
    group: Option<Box<dyn ReplicaGroup>>,
    coeffs_streams: Vec<OutputStream>,
    gradient_streams: Vec<OutputStream>,
    hessian_streams: Vec<OutputStream>,
    iteration: u64,
    highest_sim_step: Option<u64>,
}

impl std::fmt::Debug for Optimizer {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Optimizer")
            .field("stride", &self.stride)
            .field("iteration", &self.iteration)
            .finish()
    }
}

impl Optimizer {
    /// Validates the settings against the given biases and sets up all
    /// containers and output streams.  `group` is only consulted when
    /// `multi-walker` is enabled.
    pub fn new(
        settings: &Settings,
        biases: Vec<Box<dyn BiasExpansion>>,
        group: Option<Box<dyn ReplicaGroup>>,
    ) -> FailResult<Optimizer> {
        if biases.is_empty() {
            bail!(ConfigurationError::new("no bias expansions were given"));
        }
        if settings.stride == 0 {
            bail!(ConfigurationError::new("stride must be at least 1"));
        }
        {
            let mut labels = HashSet::new();
            for bias in &biases {
                if !labels.insert(bias.label().to_string()) {
                    bail!(ConfigurationError::new(format!(
                        "two bias expansions share the label '{}'", bias.label(),
                    )));
                }
            }
        }

        let n_sets = biases.len();
        let base_step_sizes = settings.step_size.base().resolve(n_sets, "step-size")?;

        let group = match (settings.multi_walker, group) {
            (false, _) => None,
            (true, None) => bail!(ConfigurationError::new(
                "multi-walker averaging enabled, but no replica group was given",
            )),
            (true, Some(group)) => {
                if group.size() == 1 {
                    bail!(ConfigurationError::new(
                        "multi-walker averaging enabled with a replica group of size 1",
                    ));
                }
                Some(group)
            },
        };

        if settings.hessian_output.is_some() && settings.hessian.is_none() {
            bail!(ConfigurationError::new(
                "hessian output requested, but hessian tracking is not enabled",
            ));
        }

        let mut sets = Vec::with_capacity(n_sets);
        for bias in &biases {
            let space = bias.space();
            let label = bias.label().to_string();

            let mut coeffs = CoeffsVector::new(space.clone(), &label[..], true);
            if let Some(values) = bias.initial_coeffs() {
                if values.len() != coeffs.len() {
                    bail!(ConfigurationError::new(format!(
                        "bias '{}' supplied {} initial coefficients for a set of {}",
                        label, values.len(), coeffs.len(),
                    )));
                }
                coeffs.assign_slice(&values);
            }

            let gradient = CoeffsVector::new(space.clone(), format!("{}.gradient", label), false)
                .with_kind("gradient");

            let mut mask = CoeffsVector::new(space.clone(), format!("{}.mask", label), false)
                .with_kind("mask");
            mask.fill(1.0);

            let hessian = settings.hessian.as_ref().map(|hessian_settings| {
                CoeffsMatrix::new(
                    space.clone(),
                    format!("{}.hessian", label),
                    hessian_settings.mode.matrix_mode(),
                )
            });

            sets.push(CoeffsSet { label, coeffs, gradient, hessian, mask });
        }

        read_per_set_files(&mut sets, &settings.mask_files, "mask", |set, reader| {
            // masks tolerate sparse files; unlisted entries keep their 1.0
            set.mask.read_checkpoint(reader, true)?;
            Ok(())
        })?;
        read_per_set_files(&mut sets, &settings.initial_coeffs_files, "initial-coeffs", |set, reader| {
            set.coeffs.read_checkpoint(reader, false)?;
            Ok(())
        })?;
        for set in &mut sets {
            let masked = set.mask.count_values(0.0);
            if masked > 0 {
                info!("'{}': {} of {} coefficients are masked out", set.label, masked, set.mask.len());
            }
            set.coeffs.snapshot_to_aux();
        }

        // all output paths up front, so collisions are caught before any
        // file is created
        let coeffs_paths = per_set_paths(settings.coeffs_output.as_ref(), n_sets);
        let gradient_paths = per_set_paths(settings.gradient_output.as_ref(), n_sets);
        let hessian_paths = per_set_paths(settings.hessian_output.as_ref(), n_sets);
        {
            let mut all = HashSet::new();
            let paths = coeffs_paths.iter().chain(&gradient_paths).chain(&hessian_paths);
            for (path, _) in paths {
                if !all.insert(path.clone()) {
                    bail!(ConfigurationError::new(format!(
                        "output file '{}' is assigned to two different streams",
                        path.display(),
                    )));
                }
            }
        }

        let writing = group.as_ref().map_or(true, |group| group.rank() == 0);
        let open = |paths: Vec<(PathBuf, u64)>| -> FailResult<Vec<OutputStream>> {
            match writing {
                true => paths.into_iter()
                    .map(|(path, stride)| OutputStream::create(path, stride))
                    .collect(),
                false => Ok(vec![]),
            }
        };
        let coeffs_streams = open(coeffs_paths)?;
        let gradient_streams = open(gradient_paths)?;
        let hessian_streams = open(hessian_paths)?;

        let rule = rules::from_kind(&settings.update_rule);
        info!(
            "optimizing {} coefficient set(s) with {} (stride {})",
            n_sets, rule.name(), settings.stride,
        );

        Ok(Optimizer {
            stride: settings.stride,
            step_size: settings.step_size.clone(),
            base_step_sizes,
            rule,
            biases,
            monitors: vec![SetMonitor::default(); sets.len()],
            sets,
            group,
            coeffs_streams,
            gradient_streams,
            hessian_streams,
            iteration: 0,
            highest_sim_step: None,
        })
    }

    pub fn iteration(&self) -> u64 { self.iteration }
    pub fn stride(&self) -> u64 { self.stride }
    pub fn sets(&self) -> &[CoeffsSet] { &self.sets }
    pub fn monitors(&self) -> &[SetMonitor] { &self.monitors }

    /// Advance past one simulation step.
    ///
    /// Updates are only performed on scheduled steps: when `sim_step` is a
    /// nonzero multiple of the stride, beyond every step already processed.
    /// Returns whether an update was performed.
    pub fn step(&mut self, sim_step: u64) -> FailResult<bool> {
        if sim_step == 0 || sim_step % self.stride != 0 {
            return Ok(false);
        }
        if self.highest_sim_step.map_or(false, |highest| sim_step <= highest) {
            return Ok(false);
        }
        self.highest_sim_step = Some(sim_step);

        for (bias, set) in izip!(&mut self.biases, &mut self.sets) {
            let CoeffsSet { coeffs, gradient, hessian, .. } = set;
            bias.compute_gradient(coeffs, gradient);
            if let Some(hessian) = hessian {
                bias.compute_hessian(coeffs, hessian);
            }
        }

        if let Some(group) = &self.group {
            for set in &mut self.sets {
                set.gradient.average_over_walkers(&**group)?;
                if let Some(hessian) = &mut set.hessian {
                    hessian.average_over_walkers(&**group)?;
                }
            }
        }

        for (i, set) in self.sets.iter_mut().enumerate() {
            let step_size = self.step_size.current(self.base_step_sizes[i], self.iteration);
            self.rule.update(set, step_size, self.iteration);

            set.coeffs.bump_counter();
            set.gradient.bump_counter();
            if let Some(hessian) = &mut set.hessian {
                hessian.bump_counter();
            }

            let (gradient_max_abs, gradient_max_abs_index) = set.gradient.max_abs();
            self.monitors[i] = SetMonitor {
                gradient_rms: set.gradient.rms(),
                gradient_max_abs,
                gradient_max_abs_index,
                step_size,
            };
        }
        self.iteration += 1;

        self.log_monitors();
        self.write_due_checkpoints()?;
        Ok(true)
    }

    fn monitor_name(&self, what: &str, i: usize) -> String {
        match self.sets.len() {
            1 => what.to_string(),
            _ => format!("{}-{}", what, i),
        }
    }

    fn log_monitors(&self) {
        for (i, monitor) in self.monitors.iter().enumerate() {
            debug!(
                "iteration {:6}: {} = {:.6e}  {} = {:.6e} ({})  {} = {:.6e}",
                self.iteration,
                self.monitor_name("gradrms", i), monitor.gradient_rms,
                self.monitor_name("gradmax", i), monitor.gradient_max_abs,
                self.sets[i].gradient.space().describe(monitor.gradient_max_abs_index),
                self.monitor_name("stepsize", i), monitor.step_size,
            );
        }
    }

    fn write_due_checkpoints(&mut self) -> FailResult<()> {
        let iteration = self.iteration;
        for (set, stream) in izip!(&self.sets, &mut self.coeffs_streams) {
            if stream.due(iteration) {
                stream.append(|w| set.coeffs.write_checkpoint(w, false))?;
            }
        }
        for (set, stream) in izip!(&self.sets, &mut self.gradient_streams) {
            if stream.due(iteration) {
                stream.append(|w| set.gradient.write_checkpoint(w, false))?;
            }
        }
        for (set, stream) in izip!(&self.sets, &mut self.hessian_streams) {
            if stream.due(iteration) {
                if let Some(hessian) = &set.hessian {
                    stream.append(|w| hessian.write_checkpoint(w))?;
                }
            }
        }
        Ok(())
    }

    /// Append a checkpoint block to every configured stream, regardless of
    /// the streams' strides.
    pub fn write_all_checkpoints(&mut self) -> FailResult<()> {
        for (set, stream) in izip!(&self.sets, &mut self.coeffs_streams) {
            stream.append(|w| set.coeffs.write_checkpoint(w, false))?;
        }
        for (set, stream) in izip!(&self.sets, &mut self.gradient_streams) {
            stream.append(|w| set.gradient.write_checkpoint(w, false))?;
        }
        for (set, stream) in izip!(&self.sets, &mut self.hessian_streams) {
            if let Some(hessian) = &set.hessian {
                stream.append(|w| hessian.write_checkpoint(w))?;
            }
        }
        Ok(())
    }
}

/// Resolve an output setting into one `(path, stride)` per set, suffixing
/// the file names when there is more than one set.
fn per_set_paths(output: Option<&OutputSettings>, n_sets: usize) -> Vec<(PathBuf, u64)> {
    match output {
        None => vec![],
        Some(OutputSettings { file, stride }) => (0..n_sets)
            .map(|i| {
                let path = match n_sets {
                    1 => file.clone(),
                    _ => output::suffixed_path(file, i),
                };
                (path, *stride)
            })
            .collect(),
    }
}

/// Apply one configured file per set.  A single file may stand in for all
/// sets, but only when every set has the identical shape.
fn read_per_set_files(
    sets: &mut [CoeffsSet],
    files: &[PathBuf],
    what: &str,
    mut read: impl FnMut(&mut CoeffsSet, &mut dyn ::std::io::BufRead) -> FailResult<()>,
) -> FailResult<()> {
    match files.len() {
        0 => Ok(()),
        1 => {
            let reference = sets[0].coeffs.space().clone();
            let same_shape = sets.iter().all(|set| {
                set.coeffs.space().labels() == reference.labels()
                    && set.coeffs.space().shape() == reference.shape()
            });
            if !same_shape {
                bail!(ConfigurationError::new(format!(
                    "a single {} file was given for {} differently-shaped coefficient sets",
                    what, sets.len(),
                )));
            }
            for set in sets.iter_mut() {
                let mut reader = coeffs_io::open_text(&files[0])?;
                read(set, &mut reader)?;
            }
            Ok(())
        },
        n if n == sets.len() => {
            for (set, file) in izip!(sets.iter_mut(), files) {
                let mut reader = coeffs_io::open_text(file)?;
                read(set, &mut reader)?;
            }
            Ok(())
        },
        n => bail!(ConfigurationError::new(format!(
            "{} {} files were given for {} coefficient sets",
            n, what, sets.len(),
        ))),
    }
}
