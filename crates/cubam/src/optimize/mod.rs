//! Alternating parameter fit and the box-constrained minimizer it uses.

mod config;
mod driver;
mod lbfgs;

pub use config::OptimizeConfig;
pub use driver::{optimize_param, FitReport, StepReport};
pub use lbfgs::{minimize_lbfgs, LbfgsConfig, LbfgsResult};

#[cfg(test)]
mod tests;
