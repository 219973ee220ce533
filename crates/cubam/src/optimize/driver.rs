use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::config::OptimizeConfig;
use crate::error::{CubamError, Result};
use crate::model::AnnotationModel;

/// Outcome of one image or worker step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    /// Image-block reinitializations triggered by non-finite values.
    pub reinitializations: usize,
    /// `true` when every degeneracy check failed and the step ran anyway.
    pub degenerate: bool,
    /// Objective/gradient evaluations spent by the minimizer.
    pub evaluations: usize,
    /// Objective after the step, when the variant exposes one.
    pub objective: Option<f64>,
}

/// Outcome of [`optimize_param`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FitReport {
    pub iterations: usize,
    pub reinitializations: usize,
    /// Image steps that stayed degenerate after all reinitialization tries.
    pub degenerate_image_steps: usize,
    pub evaluations: usize,
    /// Final objective; `None` for variants without one.
    pub objective: Option<f64>,
}

/// Run `config.num_iter` rounds of image step followed by worker step.
///
/// Randomness (image reinitialization) is drawn from `rng` only.
pub fn optimize_param(
    model: &mut dyn AnnotationModel,
    config: &OptimizeConfig,
    rng: &mut dyn RngCore,
) -> Result<FitReport> {
    let mut report = FitReport::default();
    for n in 0..config.num_iter {
        let image = model.optimize_image_param(config, rng)?;
        let worker = model.optimize_worker_param(config)?;

        report.iterations += 1;
        report.reinitializations += image.reinitializations;
        report.evaluations += image.evaluations + worker.evaluations;
        if image.degenerate {
            report.degenerate_image_steps += 1;
        }
        tracing::debug!(
            iteration = n + 1,
            num_iter = config.num_iter,
            reinitializations = image.reinitializations,
            objective = worker.objective.unwrap_or(f64::NAN),
            "{} iteration complete",
            model.variant()
        );
    }

    report.objective = match model.objective() {
        Ok(v) => Some(v),
        Err(CubamError::Unsupported { .. }) => None,
        Err(e) => return Err(e),
    };
    Ok(report)
}
