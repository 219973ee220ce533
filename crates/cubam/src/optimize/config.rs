use serde::{Deserialize, Serialize};

use super::lbfgs::LbfgsConfig;

/// Configuration of the alternating fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizeConfig {
    /// Outer `image step -> worker step` iterations. No early stop.
    pub num_iter: usize,
    /// Objective/gradient evaluation budget of each gradient-based step.
    pub max_fun_evals: usize,
    /// Degeneracy checks before the image step gives up reinitializing.
    pub max_resample_tries: usize,
    /// Standard deviation of the image reinitialization noise.
    pub reinit_noise_sigma: f64,
}

impl Default for OptimizeConfig {
    fn default() -> Self {
        Self {
            num_iter: 30,
            max_fun_evals: 100,
            max_resample_tries: 10,
            reinit_noise_sigma: 0.1,
        }
    }
}

impl OptimizeConfig {
    /// Minimizer settings for one gradient-based step.
    pub fn lbfgs(&self) -> LbfgsConfig {
        LbfgsConfig {
            max_fun_evals: self.max_fun_evals,
            ..LbfgsConfig::default()
        }
    }
}
