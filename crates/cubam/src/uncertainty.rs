//! Grid-based posterior uncertainty of fitted Signal1D parameters.
//!
//! Each entity's conditional posterior is evaluated on a regular grid around
//! its fitted value via [`AnnotationModel::objective_range`], with all other
//! parameters held fixed. Weights are `exp(min − obj)` normalized over the
//! grid. The model is only read.

use serde::{Deserialize, Serialize};

use crate::error::{CubamError, Result};
use crate::kernel::linspace;
use crate::model::{AnnotationModel, EntityKind, ModelVariant};
use crate::transform::{from_canonical, to_canonical, CanonicalWorker};

/// Grid sizes of the estimators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UncertaintyConfig {
    /// Points per canonical worker coordinate.
    pub worker_points: usize,
    /// Half-width of the worker grid around the fitted canonical value.
    pub worker_span: f64,
    /// Points of the image grid.
    pub image_points: usize,
}

impl Default for UncertaintyConfig {
    fn default() -> Self {
        Self {
            worker_points: 50,
            worker_span: 2.0,
            image_points: 200,
        }
    }
}

/// Spread of one image trait.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageUncertainty {
    /// Weighted RMS deviation from the fitted trait.
    pub rms: f64,
    /// Posterior mass on `x > 0`.
    pub positive_mass: f64,
}

/// Uncertainty of every worker and image of a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Uncertainty {
    pub workers: Vec<f64>,
    pub images: Vec<ImageUncertainty>,
}

fn require_signal_1d(model: &dyn AnnotationModel, operation: &'static str) -> Result<()> {
    if model.variant() == ModelVariant::Signal1d {
        Ok(())
    } else {
        Err(CubamError::Unsupported {
            variant: model.variant(),
            operation,
        })
    }
}

/// Normalized `exp(min − obj)` weights. Non-finite objectives get weight 0.
fn posterior_weights(objectives: &[f64]) -> Result<Vec<f64>> {
    let min = objectives
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(f64::INFINITY, f64::min);
    if !min.is_finite() {
        return Err(CubamError::InvalidParameter(
            "objective is non-finite on the whole uncertainty grid".to_string(),
        ));
    }
    let mut weights: Vec<f64> = objectives
        .iter()
        .map(|&v| if v.is_finite() { (min - v).exp() } else { 0.0 })
        .collect();
    let total: f64 = weights.iter().sum();
    for w in &mut weights {
        *w /= total;
    }
    Ok(weights)
}

/// Weighted RMS distance of a worker's canonical `(t', s)` posterior around
/// its fitted value.
pub fn worker_uncertainty(
    model: &dyn AnnotationModel,
    worker_id: usize,
    config: &UncertaintyConfig,
) -> Result<f64> {
    require_signal_1d(model, "worker_uncertainty")?;
    let n = model.dataset().num_workers();
    crate::model::check_entity(EntityKind::Worker, worker_id, n)?;

    let raw = model.worker_param_raw();
    let fitted = to_canonical(raw[n + worker_id], &raw[worker_id..worker_id + 1])?;
    let span = config.worker_span;
    let n_points = config.worker_points;
    let thresholds = linspace(fitted.threshold - span, fitted.threshold + span, n_points);
    let scales = linspace(fitted.scale - span, fitted.scale + span, n_points);

    let mut offsets = Vec::new();
    let mut grid = Vec::new();
    for &s in scales.iter().filter(|&&s| s > 0.0) {
        for &t in &thresholds {
            let (t_raw, w_raw) = from_canonical(&CanonicalWorker {
                threshold: t,
                scale: s,
                direction: fitted.direction.clone(),
            })?;
            grid.extend_from_slice(&w_raw);
            grid.push(t_raw);
            offsets.push((t - fitted.threshold, s - fitted.scale));
        }
    }
    if offsets.is_empty() {
        return Err(CubamError::InvalidParameter(
            "worker uncertainty grid is empty".to_string(),
        ));
    }

    let objectives = model.objective_range(EntityKind::Worker, worker_id, &grid)?;
    let weights = posterior_weights(&objectives)?;
    let msd: f64 = weights
        .iter()
        .zip(&offsets)
        .map(|(p, (dt, ds))| p * (dt * dt + ds * ds))
        .sum();
    Ok(msd.sqrt())
}

/// RMS deviation and positive mass of an image trait's posterior.
pub fn image_uncertainty(
    model: &dyn AnnotationModel,
    image_id: usize,
    config: &UncertaintyConfig,
) -> Result<ImageUncertainty> {
    require_signal_1d(model, "image_uncertainty")?;
    crate::model::check_entity(EntityKind::Image, image_id, model.dataset().num_images())?;

    let x0 = model.image_param_raw()[image_id];
    let grid = linspace((x0 - 1.5).min(-4.0), (x0 + 1.5).max(4.0), config.image_points);
    if grid.is_empty() {
        return Err(CubamError::InvalidParameter(
            "image uncertainty grid is empty".to_string(),
        ));
    }
    let objectives = model.objective_range(EntityKind::Image, image_id, &grid)?;
    let weights = posterior_weights(&objectives)?;

    let mut msd = 0.0;
    let mut positive_mass = 0.0;
    for (p, &x) in weights.iter().zip(&grid) {
        msd += p * (x - x0) * (x - x0);
        if x > 0.0 {
            positive_mass += p;
        }
    }
    Ok(ImageUncertainty {
        rms: msd.sqrt(),
        positive_mass,
    })
}

/// Uncertainty of all workers and images.
pub fn estimate_uncertainty(
    model: &dyn AnnotationModel,
    config: &UncertaintyConfig,
) -> Result<Uncertainty> {
    require_signal_1d(model, "estimate_uncertainty")?;
    let workers = (0..model.dataset().num_workers())
        .map(|j| worker_uncertainty(model, j, config))
        .collect::<Result<Vec<_>>>()?;
    let images = (0..model.dataset().num_images())
        .map(|i| image_uncertainty(model, i, config))
        .collect::<Result<Vec<_>>>()?;
    tracing::debug!(
        workers = workers.len(),
        images = images.len(),
        "posterior uncertainty estimated"
    );
    Ok(Uncertainty { workers, images })
}
