/* ************************************************************************ **
** This file is part of vesfit, and is licensed under EITHER the MIT        **
** license or the Apache 2.0 license, at your option.                       **
**                                                                          **
**     http://www.apache.org/licenses/LICENSE-2.0                           **
**     http://opensource.org/licenses/MIT                                   **
** ************************************************************************ */

//! Driver for the `vesfit-demo` binary.
//!
//! Fits the coefficients of a two-dimensional expansion against a synthetic
//! quadratic objective with a noisy gradient, so every part of the machinery
//! (scheduling, averaging, update rules, checkpoint output) can be watched
//! without a simulation engine attached.

use crate::FailResult;
use crate::logging::GlobalLogger;

use std::sync::Arc;
use std::thread;

use rand::distributions::{IndependentSample, Normal};

use vesfit_coeffs::{CoeffsMatrix, CoeffsSpace, CoeffsVector};
use vesfit_optimizer::{
    BiasExpansion, HessianMode, HessianSettings, Optimizer, OutputSettings, ScalarOrPerSet,
    Settings, StepSize, UpdateRuleKind,
};
use vesfit_walkers::{ReplicaGroup, ThreadGroup};

/// Gradient of a quadratic bowl around `target`, plus Gaussian noise.
struct NoisyQuadratic {
    label: String,
    space: Arc<CoeffsSpace>,
    target: Vec<f64>,
    noise: f64,
}

impl NoisyQuadratic {
    fn new(noise: f64) -> FailResult<NoisyQuadratic> {
        let space = Arc::new({
            CoeffsSpace::new(vec!["x", "y"], vec![6, 6])?
                .with_basis_descriptors(vec!["DEMO ORDER=5", "DEMO ORDER=5"])?
        });
        let target = (0..space.total())
            .map(|k| 2.0 * (0.7 * k as f64).sin())
            .collect();
        Ok(NoisyQuadratic {
            label: "demo-bias".to_string(),
            space,
            target,
            noise,
        })
    }
}

impl BiasExpansion for NoisyQuadratic {
    fn label(&self) -> &str { &self.label }
    fn space(&self) -> Arc<CoeffsSpace> { Arc::clone(&self.space) }

    fn compute_gradient(&mut self, coeffs: &CoeffsVector, gradient: &mut CoeffsVector) {
        let normal = Normal::new(0.0, 1.0);
        let mut rng = rand::thread_rng();
        for k in 0..gradient.len() {
            let clean = coeffs.value(k) - self.target[k];
            gradient.set_value(k, clean + self.noise * normal.ind_sample(&mut rng));
        }
    }

    fn compute_hessian(&mut self, _coeffs: &CoeffsVector, hessian: &mut CoeffsMatrix) {
        hessian.fill(0.0);
        for i in 0..hessian.rows() {
            hessian.set_value(i, i, 1.0);
        }
    }
}

fn default_settings() -> Settings {
    Settings {
        stride: 1,
        update_rule: UpdateRuleKind::AveragedSgd,
        step_size: StepSize::Adaptive {
            initial: ScalarOrPerSet::Scalar(0.5),
            decay: 0.001,
        },
        hessian: Some(HessianSettings { mode: HessianMode::Diagonal }),
        multi_walker: false,
        coeffs_output: Some(OutputSettings {
            file: "coeffs.data".into(),
            stride: 100,
        }),
        gradient_output: None,
        hessian_output: None,
        mask_files: vec![],
        initial_coeffs_files: vec![],
    }
}

pub fn demo_main() {
    wrap_result_main(demo)
}

fn wrap_result_main<F>(main: F)
where F: FnOnce() -> FailResult<()>,
{
    main().unwrap_or_else(|e| {
        for cause in e.causes() {
            error!("{}", cause);
        }
        std::process::exit(1);
    });
}

fn demo() -> FailResult<()> {
    let matches = clap::App::new("vesfit-demo")
        .about("Fit expansion coefficients against a synthetic noisy quadratic objective.")
        .arg(clap::Arg::with_name("config")
            .short("c").long("config").value_name("CONFIG").takes_value(true)
            .help("optimizer settings yaml (defaults to a built-in averaged-sgd setup)"))
        .arg(clap::Arg::with_name("steps")
            .long("steps").value_name("N").takes_value(true).default_value("1000")
            .help("simulation steps to run"))
        .arg(clap::Arg::with_name("walkers")
            .long("walkers").value_name("N").takes_value(true).default_value("1")
            .help("number of in-process walkers (greater than 1 enables multi-walker averaging)"))
        .arg(clap::Arg::with_name("noise")
            .long("noise").value_name("SIGMA").takes_value(true).default_value("1.0")
            .help("standard deviation of the gradient noise"))
        .arg(clap::Arg::with_name("verbose")
            .short("v").long("verbose").multiple(true)
            .help("show per-iteration monitoring output"))
        .get_matches();

    GlobalLogger::default()
        .verbosity(matches.occurrences_of("verbose") as i32)
        .apply()?;

    let mut settings = match matches.value_of("config") {
        Some(path) => {
            let file = std::fs::File::open(path)
                .map_err(|e| format_err!("could not open config '{}': {}", path, e))?;
            serde_yaml::from_reader(file)?
        },
        None => default_settings(),
    };

    let steps: u64 = matches.value_of("steps").unwrap().parse()?;
    let walkers: usize = matches.value_of("walkers").unwrap().parse()?;
    let noise: f64 = matches.value_of("noise").unwrap().parse()?;

    if walkers > 1 {
        settings.multi_walker = true;
    } else if settings.multi_walker {
        bail!("the config enables multi-walker averaging; run with --walkers greater than 1");
    }

    if walkers > 1 {
        info!("running {} walkers for {} steps", walkers, steps);
        let handles: Vec<thread::JoinHandle<FailResult<()>>> = ThreadGroup::new(walkers)
            .into_iter()
            .map(|group| {
                let settings = settings.clone();
                thread::spawn(move || {
                    run_one(&settings, Some(Box::new(group)), steps, noise)
                })
            })
            .collect();
        for handle in handles {
            handle.join().map_err(|_| format_err!("a walker thread panicked"))??;
        }
    } else {
        info!("running a single walker for {} steps", steps);
        run_one(&settings, None, steps, noise)?;
    }
    Ok(())
}

fn run_one(
    settings: &Settings,
    group: Option<Box<dyn ReplicaGroup>>,
    steps: u64,
    noise: f64,
) -> FailResult<()> {
    let bias = NoisyQuadratic::new(noise)?;
    let target = bias.target.clone();

    let biases: Vec<Box<dyn BiasExpansion>> = vec![Box::new(bias)];
    let mut opt = Optimizer::new(settings, biases, group)?;
    for sim_step in 1..=steps {
        opt.step(sim_step)?;
    }
    opt.write_all_checkpoints()?;

    let coeffs = opt.sets()[0].coeffs();
    let residual: f64 = {
        let sum: f64 = (0..coeffs.len())
            .map(|k| (coeffs.value(k) - target[k]).powi(2))
            .sum();
        (sum / coeffs.len() as f64).sqrt()
    };
    let monitor = &opt.monitors()[0];
    info!(
        "finished after {} updates: rms distance to target = {:.6e}, gradient rms = {:.6e}",
        opt.iteration(), residual, monitor.gradient_rms,
    );
    Ok(())
}
