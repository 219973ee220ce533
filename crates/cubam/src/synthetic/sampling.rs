use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use serde::{Deserialize, Serialize};
use statrs::distribution::{Gamma, Normal};

use crate::dataset::{LabelDataset, LabelRecord};
use crate::error::{CubamError, Result};
use crate::transform::to_canonical;

/// `N(0, 1)` as a `rand` distribution.
pub(crate) fn standard_normal() -> Result<Normal> {
    Normal::new(0.0, 1.0).map_err(|e| CubamError::InvalidParameter(e.to_string()))
}

/// Sample a standard normal truncated to `[lo, hi]` by rejection.
pub fn randtn<R: Rng + ?Sized>(lo: f64, hi: f64, rng: &mut R) -> Result<f64> {
    // Reject intervals with too little mass for rejection sampling to end.
    if !(lo < hi) || lo > 6.0 || hi < -6.0 {
        return Err(CubamError::InvalidParameter(format!(
            "truncation interval [{}, {}] is empty or too far in the tail",
            lo, hi
        )));
    }
    let normal = standard_normal()?;
    loop {
        let v = normal.sample(rng);
        if (lo..=hi).contains(&v) {
            return Ok(v);
        }
    }
}

/// Generative model used to produce synthetic label sets.
pub trait LabelGenerator {
    type WorkerParam: Clone + Serialize;
    type ImageParam: Clone + Serialize;

    fn sample_worker_params<R: Rng + ?Sized>(
        &self,
        count: usize,
        rng: &mut R,
    ) -> Result<Vec<Self::WorkerParam>>;

    fn sample_image_params<R: Rng + ?Sized>(
        &self,
        count: usize,
        rng: &mut R,
    ) -> Result<Vec<Self::ImageParam>>;

    fn sample_label<R: Rng + ?Sized>(
        &self,
        worker: &Self::WorkerParam,
        image: &Self::ImageParam,
        rng: &mut R,
    ) -> Result<bool>;

    /// Label an ideal annotator would give.
    fn ground_truth(&self, image: &Self::ImageParam) -> bool;
}

/// Output of [`generate_data`].
#[derive(Debug, Clone, Serialize)]
pub struct SyntheticData<W, I> {
    #[serde(skip)]
    pub dataset: LabelDataset,
    pub workers: Vec<W>,
    pub images: Vec<I>,
    pub truth: Vec<bool>,
}

/// Sample workers, then images, then one label per (image, worker) pair.
pub fn generate_data<G, R>(
    generator: &G,
    num_images: usize,
    num_workers: usize,
    rng: &mut R,
) -> Result<SyntheticData<G::WorkerParam, G::ImageParam>>
where
    G: LabelGenerator,
    R: Rng + ?Sized,
{
    let workers = generator.sample_worker_params(num_workers, rng)?;
    let images = generator.sample_image_params(num_images, rng)?;
    let mut records = Vec::with_capacity(num_images * num_workers);
    for (i, image) in images.iter().enumerate() {
        for (j, worker) in workers.iter().enumerate() {
            records.push(LabelRecord::new(i, j, generator.sample_label(worker, image, rng)?));
        }
    }
    let truth = images.iter().map(|img| generator.ground_truth(img)).collect();
    Ok(SyntheticData {
        dataset: LabelDataset::from_records(num_images, num_workers, records)?,
        workers,
        images,
        truth,
    })
}

// ── Signal ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalWorkerParam {
    pub direction: Vec<f64>,
    pub threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalImageParam {
    /// Latent trait vector.
    pub x: Vec<f64>,
    /// Mixture component the trait was drawn from.
    pub positive_class: bool,
}

/// Sampler following the Signal models' generative story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalGenerator {
    pub dim: usize,
    /// Gamma shape and scale of the worker noise scale.
    pub scale_prior: [f64; 2],
    /// Clamp range of the worker noise scale.
    pub scale_range: [f64; 2],
    /// Probability of an adversarial (negated) 1-D worker.
    pub adv_prior: f64,
    /// Threshold multiplier.
    pub tau_prior: f64,
    /// Truncation of the threshold draw.
    pub tau_range: [f64; 2],
    /// Angle spread around 45° for 2-D directions.
    pub angle_sigma: f64,
    /// Mean and spread of direction components for dim > 2.
    pub direction_prior: [f64; 2],
    /// Positive-class rate.
    pub beta: f64,
    /// Spread of the image traits around `±1`.
    pub theta: f64,
}

impl Default for SignalGenerator {
    fn default() -> Self {
        Self::new(1)
    }
}

impl SignalGenerator {
    pub fn new(dim: usize) -> Self {
        let one_d = dim <= 1;
        Self {
            dim: dim.max(1),
            scale_prior: [1.5, 0.3],
            scale_range: [0.05, 3.0],
            adv_prior: 0.01,
            tau_prior: 0.8,
            tau_range: if one_d { [-2.0, 2.0] } else { [-1.5, 1.5] },
            angle_sigma: 0.3,
            direction_prior: [2.0, 1.0],
            beta: 0.5,
            theta: if one_d { 0.5 } else { 0.8 },
        }
    }

    fn sample_scale<R: Rng + ?Sized>(&self, gamma: &Gamma, rng: &mut R) -> f64 {
        gamma.sample(rng).clamp(self.scale_range[0], self.scale_range[1])
    }
}

impl LabelGenerator for SignalGenerator {
    type WorkerParam = SignalWorkerParam;
    type ImageParam = SignalImageParam;

    fn sample_worker_params<R: Rng + ?Sized>(
        &self,
        count: usize,
        rng: &mut R,
    ) -> Result<Vec<SignalWorkerParam>> {
        let [shape, scale] = self.scale_prior;
        let gamma = Gamma::new(shape, 1.0 / scale)
            .map_err(|e| CubamError::InvalidParameter(format!("scale prior: {}", e)))?;
        let normal = standard_normal()?;
        let [tau_lo, tau_hi] = self.tau_range;

        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            let s = self.sample_scale(&gamma, rng);
            let (direction, threshold) = match self.dim {
                1 => {
                    let sign = if rng.gen::<f64>() < self.adv_prior { -1.0 } else { 1.0 };
                    let t = randtn(tau_lo, tau_hi, rng)? * self.tau_prior / s;
                    (vec![sign / s], t)
                }
                d => {
                    let w: Vec<f64> = if d == 2 {
                        let a = std::f64::consts::FRAC_PI_4 + normal.sample(rng) * self.angle_sigma;
                        vec![a.sin() / s, a.cos() / s]
                    } else {
                        (0..d)
                            .map(|_| {
                                normal.sample(rng) * self.direction_prior[1]
                                    + self.direction_prior[0]
                            })
                            .collect()
                    };
                    let norm = w.iter().map(|v| v * v).sum::<f64>().sqrt();
                    let t = randtn(tau_lo, tau_hi, rng)? * self.tau_prior * norm;
                    (w, t)
                }
            };
            out.push(SignalWorkerParam {
                direction,
                threshold,
            });
        }
        Ok(out)
    }

    fn sample_image_params<R: Rng + ?Sized>(
        &self,
        count: usize,
        rng: &mut R,
    ) -> Result<Vec<SignalImageParam>> {
        let normal = standard_normal()?;
        Ok((0..count)
            .map(|_| {
                let positive_class = rng.gen::<f64>() < self.beta;
                let center = if positive_class { 1.0 } else { -1.0 };
                let x = (0..self.dim)
                    .map(|_| normal.sample(rng) * self.theta + center)
                    .collect();
                SignalImageParam { x, positive_class }
            })
            .collect())
    }

    fn sample_label<R: Rng + ?Sized>(
        &self,
        worker: &SignalWorkerParam,
        image: &SignalImageParam,
        rng: &mut R,
    ) -> Result<bool> {
        CubamError::check_len("image trait", worker.direction.len(), image.x.len())?;
        let c = to_canonical(worker.threshold, &worker.direction)?;
        let normal = standard_normal()?;
        let projection: f64 = c
            .direction
            .iter()
            .zip(&image.x)
            .map(|(w, x)| w * (x + normal.sample(rng) * c.scale))
            .sum();
        Ok(projection > c.threshold)
    }

    fn ground_truth(&self, image: &SignalImageParam) -> bool {
        image.x.iter().sum::<f64>() > 0.0
    }
}

// ── Bias ───────────────────────────────────────────────────────────────────

/// Named worker skill levels of the bias generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillGroup {
    Expert,
    Good,
    Bot,
    Adversary,
}

impl SkillGroup {
    pub const ALL: [SkillGroup; 4] = [Self::Expert, Self::Good, Self::Bot, Self::Adversary];

    /// `(a1, a0)` of the group.
    pub fn rates(self) -> (f64, f64) {
        match self {
            Self::Expert => (0.95, 0.95),
            Self::Good => (0.7, 0.7),
            Self::Bot => (0.5, 0.5),
            Self::Adversary => (0.1, 0.1),
        }
    }

    /// Population share of the group.
    pub fn share(self) -> f64 {
        match self {
            Self::Expert => 0.1,
            Self::Good => 0.6,
            Self::Bot => 0.29,
            Self::Adversary => 0.01,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BiasWorkerParam {
    pub a1: f64,
    pub a0: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BiasGenerator {
    /// Positive-image rate.
    pub pz1: f64,
    /// Give every worker this skill instead of drawing one.
    pub skill: Option<SkillGroup>,
}

impl Default for BiasGenerator {
    fn default() -> Self {
        Self {
            pz1: 0.5,
            skill: None,
        }
    }
}

impl LabelGenerator for BiasGenerator {
    type WorkerParam = BiasWorkerParam;
    /// `true` for a positive image.
    type ImageParam = bool;

    fn sample_worker_params<R: Rng + ?Sized>(
        &self,
        count: usize,
        rng: &mut R,
    ) -> Result<Vec<BiasWorkerParam>> {
        let groups = WeightedIndex::new(SkillGroup::ALL.map(SkillGroup::share))
            .map_err(|e| CubamError::InvalidParameter(format!("skill shares: {}", e)))?;
        Ok((0..count)
            .map(|_| {
                let skill = self
                    .skill
                    .unwrap_or_else(|| SkillGroup::ALL[groups.sample(rng)]);
                let (a1, a0) = skill.rates();
                BiasWorkerParam { a1, a0 }
            })
            .collect())
    }

    fn sample_image_params<R: Rng + ?Sized>(&self, count: usize, rng: &mut R) -> Result<Vec<bool>> {
        Ok((0..count).map(|_| rng.gen::<f64>() < self.pz1).collect())
    }

    fn sample_label<R: Rng + ?Sized>(
        &self,
        worker: &BiasWorkerParam,
        image: &bool,
        rng: &mut R,
    ) -> Result<bool> {
        let u: f64 = rng.gen();
        Ok(if *image { u < worker.a1 } else { u > worker.a0 })
    }

    fn ground_truth(&self, image: &bool) -> bool {
        *image
    }
}
