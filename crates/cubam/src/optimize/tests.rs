use std::cell::Cell;
use std::sync::Arc;

use rand::prelude::*;

use super::*;
use crate::dataset::{LabelDataset, LabelRecord};
use crate::error::{CubamError, Result};
use crate::kernel::{EntityKind, NumericKernel, ParamKind, ProbitKernel};
use crate::model::{AnnotationModel, BiasModel, BiasModelParam, ModelVariant, SignalModel};
use crate::synthetic::{error_rates, generate_data, SignalGenerator};

// ── Helpers ────────────────────────────────────────────────────────────────

/// Probit kernel whose gradient misbehaves on demand.
struct FaultyKernel {
    inner: ProbitKernel,
    /// Gradient calls left that return NaN; `usize::MAX` means forever.
    nan_calls: Cell<usize>,
    truncate_gradient: bool,
}

impl FaultyKernel {
    fn nan_for(calls: usize) -> Self {
        Self {
            inner: ProbitKernel::one_dimensional(),
            nan_calls: Cell::new(calls),
            truncate_gradient: false,
        }
    }

    fn truncated() -> Self {
        Self {
            inner: ProbitKernel::one_dimensional(),
            nan_calls: Cell::new(0),
            truncate_gradient: true,
        }
    }
}

impl NumericKernel for FaultyKernel {
    fn name(&self) -> &str {
        "faulty"
    }

    fn load_data(&mut self, dataset: Arc<LabelDataset>) -> Result<()> {
        self.inner.load_data(dataset)
    }

    fn declared_len(&self, kind: ParamKind) -> usize {
        self.inner.declared_len(kind)
    }

    fn set_params(&mut self, kind: ParamKind, values: &[f64]) -> Result<()> {
        self.inner.set_params(kind, values)
    }

    fn params(&self, kind: ParamKind) -> Vec<f64> {
        self.inner.params(kind)
    }

    fn objective(&self) -> Result<f64> {
        self.inner.objective()
    }

    fn gradient(&self) -> Result<Vec<f64>> {
        let mut g = self.inner.gradient()?;
        if self.truncate_gradient {
            g.pop();
        }
        let left = self.nan_calls.get();
        if left > 0 {
            if left != usize::MAX {
                self.nan_calls.set(left - 1);
            }
            g[0] = f64::NAN;
        }
        Ok(g)
    }

    fn evaluate_range(&self, kind: EntityKind, id: usize, grid: &[f64]) -> Result<Vec<f64>> {
        self.inner.evaluate_range(kind, id, grid)
    }
}

fn small_dataset() -> Arc<LabelDataset> {
    let mut records = Vec::new();
    for i in 0..8 {
        for j in 0..4 {
            // Worker 3 disagrees on even images.
            let truth = i % 3 != 0;
            let label = if j == 3 && i % 2 == 0 { !truth } else { truth };
            records.push(LabelRecord::new(i, j, label));
        }
    }
    Arc::new(LabelDataset::from_records(8, 4, records).unwrap())
}

fn faulty_model(kernel: FaultyKernel) -> SignalModel {
    SignalModel::with_kernel(ModelVariant::Signal1d, small_dataset(), Box::new(kernel)).unwrap()
}

// ── Degeneracy handling ────────────────────────────────────────────────────

#[test]
fn image_step_reinitializes_until_finite() {
    let mut m = faulty_model(FaultyKernel::nan_for(2));
    let mut rng = StdRng::seed_from_u64(0);
    let report = m
        .optimize_image_param(&OptimizeConfig::default(), &mut rng)
        .unwrap();
    assert_eq!(report.reinitializations, 2);
    assert!(!report.degenerate);
    assert!(report.objective.unwrap().is_finite());
    assert!(m.image_param_raw().iter().all(|x| x.is_finite()));
}

#[test]
fn persistent_degeneracy_is_reported_not_raised() {
    let mut m = faulty_model(FaultyKernel::nan_for(usize::MAX));
    let mut rng = StdRng::seed_from_u64(0);
    let cfg = OptimizeConfig {
        num_iter: 2,
        ..OptimizeConfig::default()
    };
    let step = m.optimize_image_param(&cfg, &mut rng).unwrap();
    assert!(step.degenerate);
    assert_eq!(step.reinitializations, cfg.max_resample_tries);

    let report = optimize_param(&mut m, &cfg, &mut rng).unwrap();
    assert_eq!(report.degenerate_image_steps, 2);
    assert_eq!(report.reinitializations, 2 * cfg.max_resample_tries);
}

#[test]
fn wrong_gradient_length_is_a_dimension_mismatch() {
    let mut m = faulty_model(FaultyKernel::truncated());
    let mut rng = StdRng::seed_from_u64(0);
    let err = m
        .optimize_image_param(&OptimizeConfig::default(), &mut rng)
        .unwrap_err();
    assert!(matches!(err, CubamError::DimensionMismatch { what: "gradient", .. }));
    assert!(matches!(m.gradient(), Err(CubamError::DimensionMismatch { .. })));
}

// ── Driver ─────────────────────────────────────────────────────────────────

#[test]
fn driver_runs_exactly_num_iter_rounds() {
    for num_iter in [0, 1, 4] {
        let mut m = SignalModel::new(ModelVariant::Signal1d, small_dataset()).unwrap();
        let before = m.image_param_raw();
        let mut rng = StdRng::seed_from_u64(2);
        let cfg = OptimizeConfig {
            num_iter,
            ..OptimizeConfig::default()
        };
        let report = optimize_param(&mut m, &cfg, &mut rng).unwrap();
        assert_eq!(report.iterations, num_iter);
        assert!(report.objective.is_some());
        if num_iter == 0 {
            assert_eq!(report.evaluations, 0);
            assert_eq!(m.image_param_raw(), before);
        } else {
            assert!(report.evaluations > 0);
        }
    }
}

#[test]
fn fit_never_increases_objective() {
    let mut m = SignalModel::new(ModelVariant::Signal1d, small_dataset()).unwrap();
    let start = m.objective().unwrap();
    let mut rng = StdRng::seed_from_u64(5);
    let report = optimize_param(&mut m, &OptimizeConfig::default(), &mut rng).unwrap();
    assert!(report.objective.unwrap() <= start);
}

#[test]
fn same_seed_gives_identical_fits() {
    let run = |seed: u64| {
        let mut m = SignalModel::new(ModelVariant::SignalNd, small_dataset()).unwrap();
        let mut rng = StdRng::seed_from_u64(seed);
        let cfg = OptimizeConfig {
            num_iter: 5,
            ..OptimizeConfig::default()
        };
        optimize_param(&mut m, &cfg, &mut rng).unwrap();
        (m.image_param_raw(), m.worker_param_raw())
    };
    assert_eq!(run(9), run(9));
}

#[test]
fn bias_fit_is_deterministic_and_separates_workers() {
    let ds = small_dataset();
    let fit = || {
        let mut m = BiasModel::new(Arc::clone(&ds), BiasModelParam::default()).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let report = optimize_param(&mut m, &OptimizeConfig::default(), &mut rng).unwrap();
        assert_eq!(report.reinitializations, 0);
        (m.worker_param_raw(), m.image_param_raw(), m.image_labels())
    };
    let (workers, images, labels) = fit();
    assert_eq!(fit(), (workers.clone(), images.clone(), labels.clone()));

    let truth: Vec<bool> = (0..8).map(|i| i % 3 != 0).collect();
    assert_eq!(labels, truth);
    // Worker 3 flips half its labels.
    assert!(workers[6] <= workers[0] && workers[7] <= workers[1]);
    assert!(workers[6] + workers[7] < workers[0] + workers[1]);
    assert!(images.iter().all(|p| (0.0..=1.0).contains(p)));
}

// ── Synthetic recovery ─────────────────────────────────────────────────────

#[test]
fn signal_fit_recovers_synthetic_labels() {
    let mut rng = StdRng::seed_from_u64(21);
    let data = generate_data(&SignalGenerator::new(1), 80, 12, &mut rng).unwrap();
    let mut m = SignalModel::new(ModelVariant::Signal1d, Arc::new(data.dataset)).unwrap();
    let cfg = OptimizeConfig {
        num_iter: 10,
        ..OptimizeConfig::default()
    };
    optimize_param(&mut m, &cfg, &mut rng).unwrap();
    let rates = error_rates(&m.image_labels(), &data.truth).unwrap();
    assert!(rates.error_rate < 0.3, "{:?}", rates);
}

#[test]
fn default_lbfgs_settings_follow_fit_budget() {
    let cfg = OptimizeConfig {
        max_fun_evals: 7,
        ..OptimizeConfig::default()
    };
    assert_eq!(cfg.lbfgs().max_fun_evals, 7);
    assert_eq!(cfg.lbfgs().memory, LbfgsConfig::default().memory);
}
