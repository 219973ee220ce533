use std::sync::Arc;

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

use super::{check_entity, AnnotationModel, EntityKind, ModelVariant, ParamKind};
use crate::dataset::LabelDataset;
use crate::error::{CubamError, Result};
use crate::optimize::{OptimizeConfig, StepReport};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MajorityModelParam {
    /// Break ties in [`MajorityModel::noisy_labels`] with uniform noise.
    pub add_noise: bool,
}

/// Vote-fraction baseline. Nothing is fitted; image parameters are the
/// empirical positive fraction and vote count per image.
#[derive(Debug, Clone)]
pub struct MajorityModel {
    dataset: Arc<LabelDataset>,
    prm: MajorityModelParam,
    /// `(fraction of positive votes, number of votes)`
    images: Vec<[f64; 2]>,
}

impl MajorityModel {
    pub fn new(dataset: Arc<LabelDataset>, prm: MajorityModelParam) -> Self {
        let mut images = vec![[0.0, 0.0]; dataset.num_images()];
        for r in dataset.records() {
            let img = &mut images[r.image_id];
            img[0] += f64::from(u8::from(r.label));
            img[1] += 1.0;
        }
        for img in &mut images {
            if img[1] > 0.0 {
                img[0] /= img[1];
            }
        }
        Self {
            dataset,
            prm,
            images,
        }
    }

    pub fn model_param(&self) -> &MajorityModelParam {
        &self.prm
    }

    pub fn set_model_param(&mut self, prm: MajorityModelParam) {
        self.prm = prm;
    }

    /// `(fraction, votes)` of one image.
    pub fn image_param(&self, id: usize) -> Result<(f64, f64)> {
        check_entity(EntityKind::Image, id, self.images.len())?;
        let [frac, n] = self.images[id];
        Ok((frac, n))
    }

    /// Labels with `frac + (u - 0.5)/n > 0.5` when `add_noise` is set,
    /// otherwise the same as [`AnnotationModel::image_labels`]. Images
    /// without votes are negative.
    pub fn noisy_labels<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<bool> {
        if !self.prm.add_noise {
            return self.image_labels();
        }
        self.images
            .iter()
            .map(|&[frac, n]| {
                let u: f64 = rng.gen();
                n > 0.0 && frac + (u - 0.5) / n > 0.5
            })
            .collect()
    }
}

impl AnnotationModel for MajorityModel {
    fn variant(&self) -> ModelVariant {
        ModelVariant::Majority
    }

    fn dataset(&self) -> &Arc<LabelDataset> {
        &self.dataset
    }

    fn declared_len(&self, kind: ParamKind) -> usize {
        match kind {
            ParamKind::Model => 1,
            ParamKind::Worker => 0,
            ParamKind::Image => 2 * self.images.len(),
        }
    }

    fn model_param_raw(&self) -> Vec<f64> {
        vec![if self.prm.add_noise { 1.0 } else { 0.0 }]
    }

    fn set_model_param_raw(&mut self, values: &[f64]) -> Result<()> {
        CubamError::check_len("model parameters", 1, values.len())?;
        self.prm.add_noise = values[0] != 0.0;
        Ok(())
    }

    fn worker_param_raw(&self) -> Vec<f64> {
        Vec::new()
    }

    fn set_worker_param_raw(&mut self, values: &[f64]) -> Result<()> {
        CubamError::check_len("worker parameters", 0, values.len())
    }

    fn image_param_raw(&self) -> Vec<f64> {
        self.images.iter().flatten().copied().collect()
    }

    fn set_image_param_raw(&mut self, values: &[f64]) -> Result<()> {
        CubamError::check_len("image parameters", 2 * self.images.len(), values.len())?;
        for (img, v) in self.images.iter_mut().zip(values.chunks_exact(2)) {
            *img = [v[0], v[1]];
        }
        Ok(())
    }

    fn optimize_image_param(
        &mut self,
        _config: &OptimizeConfig,
        _rng: &mut dyn RngCore,
    ) -> Result<StepReport> {
        Ok(StepReport::default())
    }

    fn optimize_worker_param(&mut self, _config: &OptimizeConfig) -> Result<StepReport> {
        Ok(StepReport::default())
    }

    fn image_labels(&self) -> Vec<bool> {
        self.images.iter().map(|&[frac, _]| frac > 0.5).collect()
    }
}
