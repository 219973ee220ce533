//! Signal models: each image carries a latent trait vector `x_i`, each
//! worker a direction `w_j` and threshold `t_j`. The numeric work is done by
//! a [`NumericKernel`]; this module owns the alternating steps and the
//! structured views on top of the raw vectors.

use std::sync::Arc;

use rand::distributions::Distribution;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::{check_entity, AnnotationModel, EntityKind, ModelVariant, ParamKind};
use crate::dataset::LabelDataset;
use crate::error::{CubamError, Result};
use crate::kernel::{
    create_kernel, NumericKernel, ProbitKernel, SignalModelParam, KERNEL_ABI_VERSION,
};
use crate::optimize::{
    minimize_lbfgs, optimize_param, FitReport, LbfgsResult, OptimizeConfig, StepReport,
};
use crate::synthetic::{randtn, standard_normal};
use crate::transform::{to_canonical, CanonicalWorker};

/// Settings of [`SignalModel::init_from_1d`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InitFrom1dConfig {
    /// 1-D traits are clamped to `±xi_trunc` before lifting.
    pub xi_trunc: f64,
    /// Truncation of the standard-normal perturbation.
    pub noise_trunc: f64,
    /// Scale of the perturbation along `(-1, 1)/√2`.
    pub noise_sigma: f64,
}

impl Default for InitFrom1dConfig {
    fn default() -> Self {
        Self {
            xi_trunc: 2.0,
            noise_trunc: 2.0,
            noise_sigma: 1.0,
        }
    }
}

/// 1-D or N-D Signal model.
pub struct SignalModel {
    variant: ModelVariant,
    dataset: Arc<LabelDataset>,
    kernel: Box<dyn NumericKernel>,
}

impl std::fmt::Debug for SignalModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalModel")
            .field("variant", &self.variant)
            .field("kernel", &self.kernel.name())
            .field("num_images", &self.dataset.num_images())
            .field("num_workers", &self.dataset.num_workers())
            .finish()
    }
}

impl SignalModel {
    /// Model with the built-in kernel and default hyper-parameters.
    pub fn new(variant: ModelVariant, dataset: Arc<LabelDataset>) -> Result<Self> {
        let kernel = create_kernel(variant.class_name())?;
        Self::with_kernel(variant, dataset, kernel)
    }

    /// Model with the built-in kernel and explicit hyper-parameters.
    pub fn with_param(
        variant: ModelVariant,
        dataset: Arc<LabelDataset>,
        prm: &SignalModelParam,
    ) -> Result<Self> {
        let mut kernel: Box<dyn NumericKernel> = match variant {
            ModelVariant::Signal1d => Box::new(ProbitKernel::one_dimensional()),
            ModelVariant::SignalNd => Box::new(ProbitKernel::multi_dimensional(prm.dim)),
            other => return Err(not_signal(other)),
        };
        kernel.set_params(ParamKind::Model, &prm.to_raw(variant == ModelVariant::SignalNd))?;
        Self::with_kernel(variant, dataset, kernel)
    }

    /// Model backed by an arbitrary kernel. The dataset is loaded into it.
    pub fn with_kernel(
        variant: ModelVariant,
        dataset: Arc<LabelDataset>,
        mut kernel: Box<dyn NumericKernel>,
    ) -> Result<Self> {
        if !variant.is_signal() {
            return Err(not_signal(variant));
        }
        if kernel.abi_version() != KERNEL_ABI_VERSION {
            return Err(CubamError::InvalidParameter(format!(
                "kernel '{}' speaks ABI {}, expected {}",
                kernel.name(),
                kernel.abi_version(),
                KERNEL_ABI_VERSION
            )));
        }
        let expected = if variant == ModelVariant::SignalNd { 6 } else { 5 };
        let got = kernel.params(ParamKind::Model).len();
        CubamError::check_len("model parameters", expected, got)?;
        kernel.load_data(Arc::clone(&dataset))?;
        Ok(Self {
            variant,
            dataset,
            kernel,
        })
    }

    /// Trait dimension `D`.
    pub fn dim(&self) -> usize {
        match self.variant {
            ModelVariant::SignalNd => self
                .kernel
                .params(ParamKind::Model)
                .get(5)
                .map_or(1, |&d| d as usize),
            _ => 1,
        }
    }

    pub fn model_param(&self) -> SignalModelParam {
        let raw = self.kernel.params(ParamKind::Model);
        SignalModelParam {
            beta: raw[0],
            sigx: raw[1],
            sigw: raw[2],
            muw: raw[3],
            sigt: raw[4],
            dim: self.dim(),
        }
    }

    pub fn set_model_param(&mut self, prm: &SignalModelParam) -> Result<()> {
        self.kernel.set_params(
            ParamKind::Model,
            &prm.to_raw(self.variant == ModelVariant::SignalNd),
        )
    }

    /// Trait vector of one image.
    pub fn image_param(&self, id: usize) -> Result<Vec<f64>> {
        check_entity(EntityKind::Image, id, self.dataset.num_images())?;
        let d = self.dim();
        Ok(self.kernel.params(ParamKind::Image)[id * d..(id + 1) * d].to_vec())
    }

    /// `(w, t)` of one worker.
    pub fn worker_param(&self, id: usize) -> Result<(Vec<f64>, f64)> {
        let n = self.dataset.num_workers();
        check_entity(EntityKind::Worker, id, n)?;
        let d = self.dim();
        let raw = self.kernel.params(ParamKind::Worker);
        Ok((raw[id * d..(id + 1) * d].to_vec(), raw[n * d + id]))
    }

    pub fn canonical_worker(&self, id: usize) -> Result<CanonicalWorker> {
        let (w, t) = self.worker_param(id)?;
        to_canonical(t, &w)
    }

    /// Initialize a 2-D model from a fitted 1-D model on the same data.
    ///
    /// Each 1-D trait is clamped, then spread along `(-1, 1)/√2` by a
    /// truncated-normal perturbation.
    pub fn init_from_1d(
        &mut self,
        init: &InitFrom1dConfig,
        config: &OptimizeConfig,
        rng: &mut dyn RngCore,
    ) -> Result<FitReport> {
        if self.variant != ModelVariant::SignalNd || self.dim() != 2 {
            return Err(CubamError::InvalidParameter(
                "initialization from a 1-D fit requires dim 2".to_string(),
            ));
        }
        let prm = SignalModelParam {
            dim: 1,
            ..self.model_param()
        };
        let mut base =
            SignalModel::with_param(ModelVariant::Signal1d, Arc::clone(&self.dataset), &prm)?;
        let report = optimize_param(&mut base, config, rng)?;

        let c = std::f64::consts::FRAC_1_SQRT_2;
        let xs = base.image_param_raw();
        let mut lifted = Vec::with_capacity(2 * xs.len());
        for x in xs {
            let x = x.clamp(-init.xi_trunc, init.xi_trunc);
            let pert = randtn(-init.noise_trunc, init.noise_trunc, rng)? * init.noise_sigma;
            lifted.push(x - c * pert);
            lifted.push(x + c * pert);
        }
        self.kernel.set_params(ParamKind::Image, &lifted)?;
        Ok(report)
    }

    fn checked_gradient(&self) -> Result<Vec<f64>> {
        let grad = self.kernel.gradient()?;
        let expected = self.kernel.declared_len(ParamKind::Image)
            + self.kernel.declared_len(ParamKind::Worker);
        CubamError::check_len("gradient", expected, grad.len())?;
        Ok(grad)
    }

    /// Minimize over one block with the other held fixed; commits the best point.
    fn minimize_block(&mut self, kind: ParamKind, config: &OptimizeConfig) -> Result<LbfgsResult> {
        let n_img = self.kernel.declared_len(ParamKind::Image);
        let n_wkr = self.kernel.declared_len(ParamKind::Worker);
        let range = match kind {
            ParamKind::Image => 0..n_img,
            ParamKind::Worker => n_img..n_img + n_wkr,
            ParamKind::Model => {
                return Err(CubamError::InvalidParameter(
                    "model parameters are not optimized".to_string(),
                ))
            }
        };
        let x0 = self.kernel.params(kind);
        let kernel = &mut self.kernel;
        let result = minimize_lbfgs(
            |v: &[f64]| {
                kernel.set_params(kind, v)?;
                let f = kernel.objective()?;
                let g = kernel.gradient()?;
                CubamError::check_len("gradient", n_img + n_wkr, g.len())?;
                Ok((f, g[range.clone()].to_vec()))
            },
            &x0,
            None,
            &config.lbfgs(),
        )?;
        self.kernel.set_params(kind, &result.x)?;
        Ok(result)
    }
}

fn not_signal(variant: ModelVariant) -> CubamError {
    CubamError::InvalidParameter(format!("{} is not a Signal variant", variant))
}

impl AnnotationModel for SignalModel {
    fn variant(&self) -> ModelVariant {
        self.variant
    }

    fn dataset(&self) -> &Arc<LabelDataset> {
        &self.dataset
    }

    fn declared_len(&self, kind: ParamKind) -> usize {
        self.kernel.declared_len(kind)
    }

    fn model_param_raw(&self) -> Vec<f64> {
        self.kernel.params(ParamKind::Model)
    }

    fn set_model_param_raw(&mut self, values: &[f64]) -> Result<()> {
        self.kernel.set_params(ParamKind::Model, values)
    }

    fn worker_param_raw(&self) -> Vec<f64> {
        self.kernel.params(ParamKind::Worker)
    }

    fn set_worker_param_raw(&mut self, values: &[f64]) -> Result<()> {
        self.kernel.set_params(ParamKind::Worker, values)
    }

    fn image_param_raw(&self) -> Vec<f64> {
        self.kernel.params(ParamKind::Image)
    }

    fn set_image_param_raw(&mut self, values: &[f64]) -> Result<()> {
        self.kernel.set_params(ParamKind::Image, values)
    }

    fn objective(&self) -> Result<f64> {
        self.kernel.objective()
    }

    fn gradient(&self) -> Result<Vec<f64>> {
        self.checked_gradient()
    }

    fn objective_range(&self, kind: EntityKind, id: usize, grid: &[f64]) -> Result<Vec<f64>> {
        self.kernel.evaluate_range(kind, id, grid)
    }

    fn optimize_image_param(
        &mut self,
        config: &OptimizeConfig,
        rng: &mut dyn RngCore,
    ) -> Result<StepReport> {
        let n_img = self.kernel.declared_len(ParamKind::Image);
        let noise = standard_normal()?;
        let mut report = StepReport::default();

        for _ in 0..config.max_resample_tries {
            let grad = self.checked_gradient()?;
            let obj = self.kernel.objective()?;
            if obj.is_finite() && grad[..n_img].iter().all(|g| g.is_finite()) {
                report.degenerate = false;
                break;
            }
            report.degenerate = true;
            let xs: Vec<f64> = (0..n_img)
                .map(|_| config.reinit_noise_sigma * noise.sample(rng))
                .collect();
            self.kernel.set_params(ParamKind::Image, &xs)?;
            report.reinitializations += 1;
        }
        if report.degenerate {
            tracing::warn!(
                tries = config.max_resample_tries,
                "image parameters stayed degenerate after reinitialization, optimizing anyway"
            );
        }

        let result = self.minimize_block(ParamKind::Image, config)?;
        report.evaluations = result.evaluations;
        report.objective = Some(result.f);
        Ok(report)
    }

    fn optimize_worker_param(&mut self, config: &OptimizeConfig) -> Result<StepReport> {
        let result = self.minimize_block(ParamKind::Worker, config)?;
        Ok(StepReport {
            evaluations: result.evaluations,
            objective: Some(result.f),
            ..StepReport::default()
        })
    }

    fn image_labels(&self) -> Vec<bool> {
        let d = self.dim();
        self.kernel
            .params(ParamKind::Image)
            .chunks_exact(d)
            .map(|x| x.iter().sum::<f64>() > 0.0)
            .collect()
    }
}
