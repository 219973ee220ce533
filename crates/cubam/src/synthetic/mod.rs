//! Synthetic label generation and evaluation helpers.
//!
//! Generators mirror the fitted models: [`SignalGenerator`] draws workers
//! and images from the probit model, [`BiasGenerator`] from the two-rate
//! annotator model. The evaluation functions score estimated labels
//! against ground truth.

mod evaluate;
mod sampling;

pub use evaluate::{correlation, error_rates, majority_vote, Correlation, ErrorRates};
pub(crate) use sampling::standard_normal;
pub use sampling::{
    generate_data, randtn, BiasGenerator, BiasWorkerParam, LabelGenerator, SignalGenerator,
    SignalImageParam, SignalWorkerParam, SkillGroup, SyntheticData,
};
