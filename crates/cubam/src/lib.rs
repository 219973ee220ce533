//! cubam — aggregation of noisy binary crowd annotations.
//!
//! Many workers label many images with a yes/no answer; the engine infers
//! per-image labels and per-worker reliability by alternating maximization of
//! a posterior. The model variants are:
//!
//! 1. **Signal1D / SignalND** – probit model with a latent trait vector per
//!    image and a direction plus threshold per worker ([`SignalModel`]).
//! 2. **Bias** – two-rate annotator model on a discrete prior grid
//!    ([`BiasModel`]).
//! 3. **Majority** – vote-fraction baseline ([`MajorityModel`]).
//!
//! # Public API
//! - [`LabelDataset`] loads and indexes label files.
//! - [`build_model`] creates a variant; [`optimize_param`] fits it.
//! - [`uncertainty`] estimates per-entity posterior spread of Signal1D fits.
//! - [`synthetic`] generates label sets and scores estimates against truth.
//! - [`kernel`] is the boundary toward the differentiable numeric kernel.

mod dataset;
mod error;
pub mod kernel;
mod model;
mod optimize;
pub mod synthetic;
mod transform;
pub mod uncertainty;

pub use dataset::{LabelDataset, LabelRecord};
pub use error::{CubamError, Result};
pub use model::{
    build_model, build_model_by_name, AnnotationModel, BiasModel, BiasModelParam, EntityKind,
    ExpectedCounts, InitFrom1dConfig, MajorityModel, MajorityModelParam, ModelVariant,
    ParamKind, PriorComponent, PriorGrid, SignalModel,
};
pub use kernel::SignalModelParam;
pub use optimize::{
    minimize_lbfgs, optimize_param, FitReport, LbfgsConfig, LbfgsResult, OptimizeConfig,
    StepReport,
};
pub use transform::{from_canonical, to_canonical, CanonicalWorker};
pub use uncertainty::UncertaintyConfig;
