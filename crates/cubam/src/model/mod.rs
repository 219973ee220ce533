//! Annotation models and the capability interface the driver works against.
//!
//! | variant     | worker block            | image block         | objective |
//! |-------------|-------------------------|---------------------|-----------|
//! | `signal-1d` | `[w_0.., t_0..]`        | `[x_0..]`           | yes       |
//! | `signal-nd` | `[w_0d.., t_0..]`       | `[x_0d..]`          | yes       |
//! | `bias`      | `[a1_0, a0_0, ..]`      | `[p_0..]`           | no        |
//! | `majority`  | empty                   | `[frac_0, n_0, ..]` | no        |

mod bias;
mod majority;
mod signal;

use std::str::FromStr;
use std::sync::Arc;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::dataset::LabelDataset;
use crate::error::{CubamError, Result};
use crate::optimize::{OptimizeConfig, StepReport};

pub use crate::kernel::{EntityKind, ParamKind};
pub use bias::{BiasModel, BiasModelParam, ExpectedCounts, PriorComponent, PriorGrid};
pub use majority::{MajorityModel, MajorityModelParam};
pub use signal::{InitFrom1dConfig, SignalModel};

/// Implemented model families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelVariant {
    #[serde(rename = "signal-1d")]
    Signal1d,
    #[serde(rename = "signal-nd")]
    SignalNd,
    #[serde(rename = "bias")]
    Bias,
    #[serde(rename = "majority")]
    Majority,
}

impl ModelVariant {
    pub const ALL: [ModelVariant; 4] = [
        ModelVariant::Signal1d,
        ModelVariant::SignalNd,
        ModelVariant::Bias,
        ModelVariant::Majority,
    ];

    /// Long class-style name, e.g. `BinaryBiasModel`.
    pub fn class_name(self) -> &'static str {
        match self {
            Self::Signal1d => "Binary1dSignalModel",
            Self::SignalNd => "BinaryNdSignalModel",
            Self::Bias => "BinaryBiasModel",
            Self::Majority => "MajorityModel",
        }
    }

    /// Short kebab-case name, e.g. `bias`.
    pub fn short_name(self) -> &'static str {
        match self {
            Self::Signal1d => "signal-1d",
            Self::SignalNd => "signal-nd",
            Self::Bias => "bias",
            Self::Majority => "majority",
        }
    }

    pub fn is_signal(self) -> bool {
        matches!(self, Self::Signal1d | Self::SignalNd)
    }
}

impl std::fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.short_name())
    }
}

impl FromStr for ModelVariant {
    type Err = CubamError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|v| v.class_name() == s || v.short_name() == s)
            .ok_or_else(|| CubamError::UnknownVariant(s.to_string()))
    }
}

/// Capability interface shared by every model variant.
///
/// Raw vectors follow the layouts in the module table. Setters reject a
/// vector whose length differs from [`AnnotationModel::declared_len`].
pub trait AnnotationModel {
    fn variant(&self) -> ModelVariant;

    fn dataset(&self) -> &Arc<LabelDataset>;

    /// Declared raw length of a parameter block.
    fn declared_len(&self, kind: ParamKind) -> usize;

    fn model_param_raw(&self) -> Vec<f64>;
    fn set_model_param_raw(&mut self, values: &[f64]) -> Result<()>;
    fn worker_param_raw(&self) -> Vec<f64>;
    fn set_worker_param_raw(&mut self, values: &[f64]) -> Result<()>;
    fn image_param_raw(&self) -> Vec<f64>;
    fn set_image_param_raw(&mut self, values: &[f64]) -> Result<()>;

    /// Negative log posterior of all labels.
    fn objective(&self) -> Result<f64> {
        Err(CubamError::Unsupported {
            variant: self.variant(),
            operation: "objective",
        })
    }

    /// Gradient of [`AnnotationModel::objective`], `[image block | worker block]`.
    fn gradient(&self) -> Result<Vec<f64>> {
        Err(CubamError::Unsupported {
            variant: self.variant(),
            operation: "gradient",
        })
    }

    /// Per-entity loss for each row of a flat row-major grid.
    fn objective_range(&self, _kind: EntityKind, _id: usize, _grid: &[f64]) -> Result<Vec<f64>> {
        Err(CubamError::Unsupported {
            variant: self.variant(),
            operation: "objective_range",
        })
    }

    /// Update image parameters with worker parameters held fixed.
    fn optimize_image_param(
        &mut self,
        config: &OptimizeConfig,
        rng: &mut dyn RngCore,
    ) -> Result<StepReport>;

    /// Update worker parameters with image parameters held fixed.
    fn optimize_worker_param(&mut self, config: &OptimizeConfig) -> Result<StepReport>;

    /// Hard per-image labels.
    fn image_labels(&self) -> Vec<bool>;
}

/// Build a model with default parameters.
pub fn build_model(
    variant: ModelVariant,
    dataset: Arc<LabelDataset>,
) -> Result<Box<dyn AnnotationModel>> {
    Ok(match variant {
        ModelVariant::Signal1d | ModelVariant::SignalNd => {
            Box::new(SignalModel::new(variant, dataset)?)
        }
        ModelVariant::Bias => Box::new(BiasModel::new(dataset, BiasModelParam::default())?),
        ModelVariant::Majority => {
            Box::new(MajorityModel::new(dataset, MajorityModelParam::default()))
        }
    })
}

/// [`build_model`] from a variant name.
pub fn build_model_by_name(
    name: &str,
    dataset: Arc<LabelDataset>,
) -> Result<Box<dyn AnnotationModel>> {
    build_model(name.parse()?, dataset)
}

pub(crate) fn check_entity(kind: EntityKind, id: usize, count: usize) -> Result<()> {
    if id < count {
        Ok(())
    } else {
        Err(CubamError::EntityOutOfRange { kind, id, count })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::LabelRecord;

    fn tiny() -> Arc<LabelDataset> {
        Arc::new(LabelDataset::from_triples(vec![
            LabelRecord::new(0, 0, true),
            LabelRecord::new(1, 0, false),
            LabelRecord::new(1, 1, false),
        ]))
    }

    #[test]
    fn variant_names_parse() {
        assert_eq!(
            "BinaryBiasModel".parse::<ModelVariant>().unwrap(),
            ModelVariant::Bias
        );
        assert_eq!(
            "signal-nd".parse::<ModelVariant>().unwrap(),
            ModelVariant::SignalNd
        );
        for v in ModelVariant::ALL {
            assert_eq!(v.to_string().parse::<ModelVariant>().unwrap(), v);
            assert_eq!(v.class_name().parse::<ModelVariant>().unwrap(), v);
        }
    }

    #[test]
    fn unknown_variant_is_an_error() {
        let err = build_model_by_name("TernaryModel", tiny()).err().unwrap();
        assert!(matches!(err, CubamError::UnknownVariant(name) if name == "TernaryModel"));
    }

    #[test]
    fn every_variant_builds_with_declared_lengths() {
        for v in ModelVariant::ALL {
            let m = build_model(v, tiny()).unwrap();
            assert_eq!(m.variant(), v);
            assert_eq!(m.image_param_raw().len(), m.declared_len(ParamKind::Image));
            assert_eq!(m.worker_param_raw().len(), m.declared_len(ParamKind::Worker));
            assert_eq!(m.model_param_raw().len(), m.declared_len(ParamKind::Model));
            assert_eq!(m.image_labels().len(), 2);
        }
    }

    #[test]
    fn wrong_length_setters_fail_for_every_variant() {
        for v in ModelVariant::ALL {
            let mut m = build_model(v, tiny()).unwrap();
            let n = m.declared_len(ParamKind::Image);
            let err = m.set_image_param_raw(&vec![0.0; n + 1]).unwrap_err();
            assert!(matches!(err, CubamError::DimensionMismatch { .. }), "{}", v);
            let n = m.declared_len(ParamKind::Worker);
            let err = m.set_worker_param_raw(&vec![0.5; n + 1]).unwrap_err();
            assert!(matches!(err, CubamError::DimensionMismatch { .. }), "{}", v);
        }
    }

    #[test]
    fn unsupported_capabilities_are_reported() {
        let bias = build_model(ModelVariant::Bias, tiny()).unwrap();
        assert!(matches!(
            bias.objective(),
            Err(CubamError::Unsupported { operation: "objective", .. })
        ));
        assert!(matches!(
            bias.gradient(),
            Err(CubamError::Unsupported { operation: "gradient", .. })
        ));

        let majority = build_model(ModelVariant::Majority, tiny()).unwrap();
        assert!(matches!(
            majority.objective_range(EntityKind::Image, 0, &[0.5]),
            Err(CubamError::Unsupported { .. })
        ));
    }
}
