//! Boundary toward the differentiable numeric kernel of the Signal models.
//!
//! A kernel owns the raw parameter vectors of one model instance and
//! evaluates the negative log posterior, its gradient and per-entity
//! objective ranges. Every vector crossing the boundary is length-checked
//! against [`NumericKernel::declared_len`].
//!
//! [`create_kernel`] returns the built-in [`ProbitKernel`]; other
//! implementations can be handed to [`crate::SignalModel::with_kernel`].

mod math;
mod probit;

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::dataset::LabelDataset;
use crate::error::{CubamError, Result};

pub(crate) use math::linspace;
pub use probit::{ProbitKernel, SignalModelParam};

/// Version of the kernel calling convention implemented by this crate.
pub const KERNEL_ABI_VERSION: u32 = 1;

/// Parameter block addressed by `set_params` / `params`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    Model,
    Worker,
    Image,
}

/// Entity addressed by per-entity objective ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Worker,
    Image,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Worker => write!(f, "worker"),
            Self::Image => write!(f, "image"),
        }
    }
}

/// Numeric kernel of a Signal model.
///
/// Gradient layout is `[image block | worker block]`, matching
/// `declared_len(Image) + declared_len(Worker)`.
pub trait NumericKernel {
    /// Variant name the kernel was created for.
    fn name(&self) -> &str;

    /// Calling-convention version, compared against [`KERNEL_ABI_VERSION`].
    fn abi_version(&self) -> u32 {
        KERNEL_ABI_VERSION
    }

    /// Attach a dataset and reset worker/image parameters to their defaults.
    fn load_data(&mut self, dataset: Arc<LabelDataset>) -> Result<()>;

    /// Load a label file and attach it.
    fn load_data_file(&mut self, path: &Path) -> Result<()> {
        let dataset = LabelDataset::load(path)?;
        self.load_data(Arc::new(dataset))
    }

    /// Declared raw length of a parameter block.
    fn declared_len(&self, kind: ParamKind) -> usize;

    /// Replace a parameter block. Fails with `DimensionMismatch` on length
    /// disagreement.
    fn set_params(&mut self, kind: ParamKind, values: &[f64]) -> Result<()>;

    /// Copy of a parameter block.
    fn params(&self, kind: ParamKind) -> Vec<f64>;

    /// Negative log posterior of all labels. May be non-finite.
    fn objective(&self) -> Result<f64>;

    /// Gradient of [`NumericKernel::objective`]. May contain non-finite values.
    fn gradient(&self) -> Result<Vec<f64>>;

    /// Per-entity objective for each row of a flat row-major grid.
    fn evaluate_range(&self, kind: EntityKind, id: usize, grid: &[f64]) -> Result<Vec<f64>>;
}

/// Create the built-in kernel for a Signal variant name.
pub fn create_kernel(variant_name: &str) -> Result<Box<dyn NumericKernel>> {
    match variant_name {
        "Binary1dSignalModel" | "signal-1d" => Ok(Box::new(ProbitKernel::one_dimensional())),
        "BinaryNdSignalModel" | "signal-nd" => Ok(Box::new(ProbitKernel::multi_dimensional(
            SignalModelParam::default_nd().dim,
        ))),
        other => Err(CubamError::UnknownVariant(other.to_string())),
    }
}
