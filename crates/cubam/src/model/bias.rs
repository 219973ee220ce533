//! Confusion-matrix ("bias") model.
//!
//! Worker `j` has `a1 = P(label 1 | truth 1)` and `a0 = P(label 0 | truth 0)`;
//! image `i` carries `p_i = P(truth 1)`. Both steps are closed form: the
//! worker step is a discrete MAP over a [`PriorGrid`], the image step a
//! log-odds accumulation.

use std::sync::Arc;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use statrs::distribution::{Beta, Continuous};

use super::{check_entity, AnnotationModel, EntityKind, ModelVariant, ParamKind};
use crate::dataset::LabelDataset;
use crate::error::{CubamError, Result};
use crate::kernel::linspace;
use crate::optimize::{OptimizeConfig, StepReport};

const GRID_EPS: f64 = 1e-10;
/// Largest grid resolution per axis.
const MAX_GRID_RES: usize = 10_000;

/// One weighted component of the worker prior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PriorComponent {
    /// `Beta(a, b)(a1) · Beta(a, b)(a0)`.
    Beta { weight: f64, a: f64, b: f64 },
    /// Indicator of the anti-diagonal band just on the reliable side of chance.
    Ridge { weight: f64 },
}

impl PriorComponent {
    pub fn weight(&self) -> f64 {
        match self {
            Self::Beta { weight, .. } | Self::Ridge { weight } => *weight,
        }
    }
}

/// Hyper-parameters of the bias model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BiasModelParam {
    /// Prior probability of a positive image.
    pub pz1: f64,
    /// Grid resolution per axis.
    pub res: usize,
    /// Initial `(a1, a0)` of every worker.
    pub init_a: [f64; 2],
    pub prior: Vec<PriorComponent>,
}

impl Default for BiasModelParam {
    fn default() -> Self {
        Self {
            pz1: 0.5,
            res: 100,
            init_a: [0.7, 0.7],
            prior: vec![
                PriorComponent::Beta {
                    weight: 0.9,
                    a: 10.0,
                    b: 2.0,
                },
                PriorComponent::Beta {
                    weight: 0.05,
                    a: 2.0,
                    b: 10.0,
                },
                PriorComponent::Ridge { weight: 0.05 },
            ],
        }
    }
}

impl BiasModelParam {
    /// Raw vector `[pz1, res, init_a1, init_a0]`. Prior components are only
    /// reachable through the structured parameter.
    pub fn to_raw(&self) -> Vec<f64> {
        vec![self.pz1, self.res as f64, self.init_a[0], self.init_a[1]]
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.pz1 > 0.0 && self.pz1 < 1.0) {
            return Err(CubamError::InvalidParameter(format!(
                "pz1 must lie in (0, 1), got {}",
                self.pz1
            )));
        }
        check_grid_res(self.res)?;
        for a in self.init_a {
            if !(a > 0.0 && a < 1.0) {
                return Err(CubamError::InvalidParameter(format!(
                    "initial worker rates must lie in (0, 1), got {}",
                    a
                )));
            }
        }
        Ok(())
    }
}

fn check_grid_res(res: usize) -> Result<()> {
    if (2..=MAX_GRID_RES).contains(&res) {
        Ok(())
    } else {
        Err(CubamError::InvalidParameter(format!(
            "grid resolution must lie in [2, {}], got {}",
            MAX_GRID_RES, res
        )))
    }
}

// ── Prior grid ─────────────────────────────────────────────────────────────

/// Discretized log-prior over `(a1, a0)`.
///
/// Cell `k = r·res + c` sits at `a1 = ajs[r]`, `a0 = ajs[c]`.
#[derive(Debug, Clone, PartialEq)]
pub struct PriorGrid {
    res: usize,
    ajs: Vec<f64>,
    ln_a: Vec<f64>,
    ln_1ma: Vec<f64>,
    log_prior: Vec<f64>,
}

/// Expected vote counts of one worker, indexed `[truth][label]`.
pub type ExpectedCounts = [[f64; 2]; 2];

impl PriorGrid {
    pub fn build(res: usize, components: &[PriorComponent]) -> Result<Self> {
        check_grid_res(res)?;
        let ajs = linspace(GRID_EPS, 1.0 - GRID_EPS, res);
        let n = res * res;
        let mut prior = vec![0.0; n];

        for comp in components {
            let weight = comp.weight();
            if !(weight.is_finite() && weight >= 0.0) {
                return Err(CubamError::InvalidParameter(format!(
                    "prior component weight must be non-negative, got {}",
                    weight
                )));
            }
            let density: Vec<f64> = match comp {
                PriorComponent::Beta { a, b, .. } => {
                    let dist = Beta::new(*a, *b)
                        .map_err(|e| CubamError::InvalidParameter(format!("beta prior: {}", e)))?;
                    let pdf: Vec<f64> = ajs.iter().map(|&x| dist.pdf(x)).collect();
                    (0..n).map(|k| pdf[k / res] * pdf[k % res]).collect()
                }
                PriorComponent::Ridge { .. } => (0..n)
                    .map(|k| if k / res + k % res == res + 1 { 1.0 } else { 0.0 })
                    .collect(),
            };
            let mass: f64 = density.iter().sum();
            if !(mass.is_finite() && mass > 0.0) {
                tracing::warn!(?comp, res, "prior component has no mass on the grid, skipping");
                continue;
            }
            for (p, d) in prior.iter_mut().zip(&density) {
                *p += weight * d / mass;
            }
        }

        let total: f64 = prior.iter().sum();
        if !(total.is_finite() && total > 0.0) {
            return Err(CubamError::InvalidParameter(
                "worker prior has no mass on the grid".to_string(),
            ));
        }
        Ok(Self {
            res,
            ln_a: ajs.iter().map(|a| a.ln()).collect(),
            ln_1ma: ajs.iter().map(|a| (1.0 - a).ln()).collect(),
            ajs,
            log_prior: prior.iter().map(|p| (p / total).ln()).collect(),
        })
    }

    pub fn res(&self) -> usize {
        self.res
    }

    /// Grid coordinates along one axis.
    pub fn ajs(&self) -> &[f64] {
        &self.ajs
    }

    /// Normalized log-prior, one entry per cell.
    pub fn log_prior(&self) -> &[f64] {
        &self.log_prior
    }

    /// `(a1, a0)` of cell `k`.
    pub fn cell(&self, k: usize) -> (f64, f64) {
        (self.ajs[k / self.res], self.ajs[k % self.res])
    }

    /// Cell closest to `(a1, a0)`.
    pub fn nearest_cell(&self, a1: f64, a0: f64) -> usize {
        let step = (1.0 - 2.0 * GRID_EPS) / (self.res - 1) as f64;
        let index = |a: f64| {
            let k = ((a - GRID_EPS) / step).round();
            if k.is_nan() {
                0
            } else {
                k.clamp(0.0, (self.res - 1) as f64) as usize
            }
        };
        index(a1) * self.res + index(a0)
    }

    /// First cell maximizing the log posterior of the given counts.
    pub fn map_cell(&self, n: &ExpectedCounts) -> usize {
        let mut best = f64::NEG_INFINITY;
        let mut best_k = 0;
        for r in 0..self.res {
            let pos = n[1][1] * self.ln_a[r] + n[1][0] * self.ln_1ma[r];
            for c in 0..self.res {
                let k = r * self.res + c;
                let v = pos + n[0][0] * self.ln_a[c] + n[0][1] * self.ln_1ma[c] + self.log_prior[k];
                if v > best {
                    best = v;
                    best_k = k;
                }
            }
        }
        best_k
    }
}

// ── Model ──────────────────────────────────────────────────────────────────

/// Bias model with its prior grid.
#[derive(Debug, Clone)]
pub struct BiasModel {
    dataset: Arc<LabelDataset>,
    prm: BiasModelParam,
    grid: PriorGrid,
    /// `(a1, a0)` per worker.
    workers: Vec<[f64; 2]>,
    images: Vec<f64>,
}

impl BiasModel {
    pub fn new(dataset: Arc<LabelDataset>, prm: BiasModelParam) -> Result<Self> {
        prm.validate()?;
        let grid = PriorGrid::build(prm.res, &prm.prior)?;
        Ok(Self {
            workers: vec![prm.init_a; dataset.num_workers()],
            images: vec![prm.pz1; dataset.num_images()],
            dataset,
            prm,
            grid,
        })
    }

    pub fn model_param(&self) -> &BiasModelParam {
        &self.prm
    }

    /// Replace the hyper-parameters and rebuild the prior grid.
    pub fn set_model_param(&mut self, prm: BiasModelParam) -> Result<()> {
        prm.validate()?;
        self.grid = PriorGrid::build(prm.res, &prm.prior)?;
        self.prm = prm;
        Ok(())
    }

    pub fn prior_grid(&self) -> &PriorGrid {
        &self.grid
    }

    /// `(a1, a0)` of one worker.
    pub fn worker_param(&self, id: usize) -> Result<(f64, f64)> {
        check_entity(EntityKind::Worker, id, self.workers.len())?;
        let [a1, a0] = self.workers[id];
        Ok((a1, a0))
    }

    /// Posterior probability of a positive truth for one image.
    pub fn image_param(&self, id: usize) -> Result<f64> {
        check_entity(EntityKind::Image, id, self.images.len())?;
        Ok(self.images[id])
    }

    /// Expected `[truth][label]` counts of one worker under the current
    /// image posteriors.
    pub fn expected_counts(&self, id: usize) -> Result<ExpectedCounts> {
        check_entity(EntityKind::Worker, id, self.workers.len())?;
        let mut n = [[0.0; 2]; 2];
        for &(i, label) in self.dataset.worker_labels(id) {
            let p1 = self.images[i];
            let l = usize::from(label);
            n[1][l] += p1;
            n[0][l] += 1.0 - p1;
        }
        Ok(n)
    }

    /// `ln P(labels of image | truth 1)` and `ln P(labels | truth 0)`,
    /// including the class prior.
    fn image_class_log_likelihoods(&self, id: usize) -> (f64, f64) {
        let mut l1 = self.prm.pz1.ln();
        let mut l0 = (1.0 - self.prm.pz1).ln();
        for &(j, label) in self.dataset.image_labels(id) {
            let [a1, a0] = self.workers[j];
            if label {
                l1 += a1.ln();
                l0 += (1.0 - a0).ln();
            } else {
                l1 += (1.0 - a1).ln();
                l0 += a0.ln();
            }
        }
        (l1, l0)
    }
}

fn binary_entropy(p: f64) -> f64 {
    let term = |q: f64| if q > 0.0 { -q * q.ln() } else { 0.0 };
    term(p) + term(1.0 - p)
}

fn check_rate(what: &str, a: f64) -> Result<()> {
    if a > 0.0 && a < 1.0 {
        Ok(())
    } else {
        Err(CubamError::InvalidParameter(format!(
            "{} must lie in (0, 1), got {}",
            what, a
        )))
    }
}

impl AnnotationModel for BiasModel {
    fn variant(&self) -> ModelVariant {
        ModelVariant::Bias
    }

    fn dataset(&self) -> &Arc<LabelDataset> {
        &self.dataset
    }

    fn declared_len(&self, kind: ParamKind) -> usize {
        match kind {
            ParamKind::Model => 4,
            ParamKind::Worker => 2 * self.workers.len(),
            ParamKind::Image => self.images.len(),
        }
    }

    fn model_param_raw(&self) -> Vec<f64> {
        self.prm.to_raw()
    }

    fn set_model_param_raw(&mut self, values: &[f64]) -> Result<()> {
        CubamError::check_len("model parameters", 4, values.len())?;
        let res = values[1];
        if !(res.is_finite() && res >= 0.0 && res.fract() == 0.0) {
            return Err(CubamError::InvalidParameter(format!(
                "grid resolution must be an integer, got {}",
                res
            )));
        }
        let prm = BiasModelParam {
            pz1: values[0],
            res: res as usize,
            init_a: [values[2], values[3]],
            prior: self.prm.prior.clone(),
        };
        self.set_model_param(prm)
    }

    fn worker_param_raw(&self) -> Vec<f64> {
        self.workers.iter().flatten().copied().collect()
    }

    fn set_worker_param_raw(&mut self, values: &[f64]) -> Result<()> {
        CubamError::check_len("worker parameters", 2 * self.workers.len(), values.len())?;
        for &a in values {
            check_rate("worker rate", a)?;
        }
        for (w, v) in self.workers.iter_mut().zip(values.chunks_exact(2)) {
            *w = [v[0], v[1]];
        }
        Ok(())
    }

    fn image_param_raw(&self) -> Vec<f64> {
        self.images.clone()
    }

    fn set_image_param_raw(&mut self, values: &[f64]) -> Result<()> {
        CubamError::check_len("image parameters", self.images.len(), values.len())?;
        if let Some(&p) = values.iter().find(|p| !(0.0..=1.0).contains(*p)) {
            return Err(CubamError::InvalidParameter(format!(
                "image probability must lie in [0, 1], got {}",
                p
            )));
        }
        self.images.copy_from_slice(values);
        Ok(())
    }

    /// Worker rows are `[a1, a0]`, image rows `[p]`. Worker rates outside
    /// `(0, 1)` give a non-finite loss.
    fn objective_range(&self, kind: EntityKind, id: usize, grid: &[f64]) -> Result<Vec<f64>> {
        match kind {
            EntityKind::Worker => {
                let n = self.expected_counts(id)?;
                if grid.len() % 2 != 0 {
                    return Err(CubamError::DimensionMismatch {
                        what: "objective range grid",
                        expected: grid.len() + 1,
                        got: grid.len(),
                    });
                }
                Ok(grid
                    .chunks_exact(2)
                    .map(|row| {
                        let (a1, a0) = (row[0], row[1]);
                        let ln_post = n[1][1] * a1.ln()
                            + n[1][0] * (1.0 - a1).ln()
                            + n[0][0] * a0.ln()
                            + n[0][1] * (1.0 - a0).ln()
                            + self.grid.log_prior[self.grid.nearest_cell(a1, a0)];
                        -ln_post
                    })
                    .collect())
            }
            EntityKind::Image => {
                check_entity(kind, id, self.images.len())?;
                let (l1, l0) = self.image_class_log_likelihoods(id);
                Ok(grid
                    .iter()
                    .map(|&p| -(p * l1 + (1.0 - p) * l0 + binary_entropy(p)))
                    .collect())
            }
        }
    }

    fn optimize_image_param(
        &mut self,
        _config: &OptimizeConfig,
        _rng: &mut dyn RngCore,
    ) -> Result<StepReport> {
        let pz1 = self.prm.pz1;
        let mut score = vec![(pz1 / (1.0 - pz1)).log10(); self.images.len()];
        for r in self.dataset.records() {
            let [a1, a0] = self.workers[r.worker_id];
            score[r.image_id] += if r.label {
                (a1 / (1.0 - a0)).log10()
            } else {
                ((1.0 - a1) / a0).log10()
            };
        }
        for (p, s) in self.images.iter_mut().zip(score) {
            // 10^s / (1 + 10^s) without overflow.
            *p = 1.0 / (1.0 + 10f64.powf(-s));
        }
        Ok(StepReport::default())
    }

    fn optimize_worker_param(&mut self, _config: &OptimizeConfig) -> Result<StepReport> {
        for j in 0..self.workers.len() {
            let n = self.expected_counts(j)?;
            let (a1, a0) = self.grid.cell(self.grid.map_cell(&n));
            self.workers[j] = [a1, a0];
        }
        Ok(StepReport::default())
    }

    fn image_labels(&self) -> Vec<bool> {
        self.images.iter().map(|&p| p > 0.5).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::LabelRecord;
    use approx::assert_relative_eq;
    use rand::prelude::*;

    fn truthful_dataset(n_img: usize, n_wkr: usize) -> (Arc<LabelDataset>, Vec<bool>) {
        let truth: Vec<bool> = (0..n_img).map(|i| i % 3 != 0).collect();
        let records = (0..n_img)
            .flat_map(|i| (0..n_wkr).map(move |j| (i, j)))
            .map(|(i, j)| LabelRecord::new(i, j, truth[i]))
            .collect();
        (
            Arc::new(LabelDataset::from_records(n_img, n_wkr, records).unwrap()),
            truth,
        )
    }

    #[test]
    fn prior_grid_is_normalized() {
        let cases = vec![
            BiasModelParam::default().prior,
            vec![PriorComponent::Ridge { weight: 1.0 }],
            vec![PriorComponent::Beta {
                weight: 0.3,
                a: 2.0,
                b: 2.0,
            }],
            vec![
                PriorComponent::Beta {
                    weight: 5.0,
                    a: 1.0,
                    b: 1.0,
                },
                PriorComponent::Ridge { weight: 0.0 },
            ],
        ];
        for comps in cases {
            for res in [3, 17, 100] {
                let grid = PriorGrid::build(res, &comps).unwrap();
                let mass: f64 = grid.log_prior().iter().map(|l| l.exp()).sum();
                assert_relative_eq!(mass, 1.0, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn ridge_lies_on_reliable_anti_diagonal() {
        let res = 10;
        let grid = PriorGrid::build(res, &[PriorComponent::Ridge { weight: 1.0 }]).unwrap();
        for (k, lp) in grid.log_prior().iter().enumerate() {
            let on_ridge = k / res + k % res == res + 1;
            assert_eq!(lp.is_finite(), on_ridge, "cell {}", k);
            if on_ridge {
                let (a1, a0) = grid.cell(k);
                assert!(a1 + a0 > 1.0);
            }
        }
    }

    #[test]
    fn massless_component_is_skipped() {
        // At res = 2 the ridge band is empty.
        let comps = [
            PriorComponent::Ridge { weight: 0.5 },
            PriorComponent::Beta {
                weight: 0.5,
                a: 2.0,
                b: 2.0,
            },
        ];
        let grid = PriorGrid::build(2, &comps).unwrap();
        let mass: f64 = grid.log_prior().iter().map(|l| l.exp()).sum();
        assert_relative_eq!(mass, 1.0, epsilon = 1e-9);

        let err = PriorGrid::build(2, &[PriorComponent::Ridge { weight: 1.0 }]).unwrap_err();
        assert!(matches!(err, CubamError::InvalidParameter(_)));
    }

    #[test]
    fn cell_coordinates_follow_row_major_layout() {
        let grid = PriorGrid::build(5, &BiasModelParam::default().prior).unwrap();
        let ajs = grid.ajs().to_vec();
        assert_eq!(grid.cell(2 * 5 + 3), (ajs[2], ajs[3]));
        assert_eq!(grid.nearest_cell(ajs[4], ajs[1]), 4 * 5 + 1);
        assert_eq!(grid.nearest_cell(-3.0, 7.0), 4);
    }

    #[test]
    fn reliable_workers_make_confident_images() {
        let (ds, truth) = truthful_dataset(12, 5);
        let mut m = BiasModel::new(ds, BiasModelParam::default()).unwrap();
        m.set_worker_param_raw(&[0.9; 10]).unwrap();
        let cfg = OptimizeConfig::default();
        let mut rng = StdRng::seed_from_u64(0);

        m.optimize_image_param(&cfg, &mut rng).unwrap();
        m.optimize_worker_param(&cfg).unwrap();
        m.optimize_image_param(&cfg, &mut rng).unwrap();

        for (i, &t) in truth.iter().enumerate() {
            let p = m.image_param(i).unwrap();
            if t {
                assert!(p > 0.9, "image {} p = {}", i, p);
            } else {
                assert!(p < 0.1, "image {} p = {}", i, p);
            }
        }
        assert_eq!(m.image_labels(), truth);
        let (a1, a0) = m.worker_param(0).unwrap();
        assert!(a1 > 0.7 && a0 > 0.7, "({}, {})", a1, a0);
    }

    #[test]
    fn one_driver_round_makes_confident_images() {
        // One ImageStep -> WorkerStep pair, in driver order.
        let (ds, truth) = truthful_dataset(12, 5);
        let check = |m: &BiasModel| {
            for (i, &t) in truth.iter().enumerate() {
                let p = m.image_param(i).unwrap();
                if t {
                    assert!(p > 0.9, "image {} p = {}", i, p);
                } else {
                    assert!(p < 0.1, "image {} p = {}", i, p);
                }
            }
        };

        let mut m = BiasModel::new(Arc::clone(&ds), BiasModelParam::default()).unwrap();
        m.set_worker_param_raw(&[0.9; 10]).unwrap();
        let cfg = OptimizeConfig::default();
        let mut rng = StdRng::seed_from_u64(0);
        m.optimize_image_param(&cfg, &mut rng).unwrap();
        check(&m);
        m.optimize_worker_param(&cfg).unwrap();
        check(&m);

        let mut driven = BiasModel::new(ds, BiasModelParam::default()).unwrap();
        driven.set_worker_param_raw(&[0.9; 10]).unwrap();
        let one_round = OptimizeConfig {
            num_iter: 1,
            ..OptimizeConfig::default()
        };
        crate::optimize::optimize_param(&mut driven, &one_round, &mut rng).unwrap();
        check(&driven);
        assert_eq!(driven.image_labels(), truth);
    }

    #[test]
    fn worker_step_is_deterministic() {
        let (ds, _) = truthful_dataset(9, 4);
        let mut m = BiasModel::new(ds, BiasModelParam::default()).unwrap();
        m.set_image_param_raw(&[0.2, 0.9, 0.7, 0.1, 0.5, 0.95, 0.3, 0.6, 0.8])
            .unwrap();
        let cfg = OptimizeConfig::default();
        m.optimize_worker_param(&cfg).unwrap();
        let first = m.worker_param_raw();
        for _ in 0..3 {
            m.optimize_worker_param(&cfg).unwrap();
            assert_eq!(m.worker_param_raw(), first);
        }
    }

    #[test]
    fn worker_step_picks_grid_map() {
        let (ds, _) = truthful_dataset(6, 2);
        let mut m = BiasModel::new(ds, BiasModelParam::default()).unwrap();
        m.optimize_worker_param(&OptimizeConfig::default()).unwrap();
        let n = m.expected_counts(0).unwrap();
        let (a1, a0) = m.worker_param(0).unwrap();
        let grid = m.prior_grid();
        let chosen = m
            .objective_range(EntityKind::Worker, 0, &[a1, a0])
            .unwrap()[0];
        // No cell scores a lower loss than the chosen one.
        for k in 0..grid.res() * grid.res() {
            let (b1, b0) = grid.cell(k);
            let loss = m.objective_range(EntityKind::Worker, 0, &[b1, b0]).unwrap()[0];
            assert!(loss >= chosen - 1e-9, "cell {} beats MAP with counts {:?}", k, n);
        }
    }

    #[test]
    fn image_range_is_minimized_at_image_step() {
        let (ds, _) = truthful_dataset(6, 3);
        let mut m = BiasModel::new(ds, BiasModelParam::default()).unwrap();
        m.set_worker_param_raw(&[0.8, 0.6, 0.55, 0.9, 0.7, 0.7]).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        m.optimize_image_param(&OptimizeConfig::default(), &mut rng)
            .unwrap();

        let grid: Vec<f64> = (0..=1000).map(|k| k as f64 / 1000.0).collect();
        for i in 0..6 {
            let p_star = m.image_param(i).unwrap();
            let at_star = m.objective_range(EntityKind::Image, i, &[p_star]).unwrap()[0];
            let losses = m.objective_range(EntityKind::Image, i, &grid).unwrap();
            let min = losses.iter().copied().fold(f64::INFINITY, f64::min);
            assert!(at_star <= min + 1e-12, "image {}", i);
        }
    }

    #[test]
    fn rebuild_on_parameter_change() {
        let (ds, _) = truthful_dataset(3, 2);
        let mut m = BiasModel::new(ds, BiasModelParam::default()).unwrap();
        m.set_model_param_raw(&[0.3, 20.0, 0.6, 0.8]).unwrap();
        assert_eq!(m.prior_grid().res(), 20);
        assert_relative_eq!(m.model_param().pz1, 0.3);
        assert!(m.set_model_param_raw(&[0.3, 1.0, 0.6, 0.8]).is_err());
        assert!(m.set_model_param_raw(&[1.3, 20.0, 0.6, 0.8]).is_err());
    }

    #[test]
    fn oversized_grid_is_rejected() {
        let (ds, _) = truthful_dataset(3, 2);
        let mut m = BiasModel::new(Arc::clone(&ds), BiasModelParam::default()).unwrap();
        for res in [1e10, (MAX_GRID_RES + 1) as f64, f64::MAX] {
            assert!(matches!(
                m.set_model_param_raw(&[0.5, res, 0.7, 0.7]),
                Err(CubamError::InvalidParameter(_))
            ));
        }
        assert_eq!(m.prior_grid().res(), 100);

        let prm = BiasModelParam {
            res: MAX_GRID_RES + 1,
            ..BiasModelParam::default()
        };
        assert!(matches!(BiasModel::new(ds, prm), Err(CubamError::InvalidParameter(_))));
        assert!(PriorGrid::build(usize::MAX, &[]).is_err());
    }

    #[test]
    fn out_of_range_entity_is_rejected() {
        let (ds, _) = truthful_dataset(3, 2);
        let m = BiasModel::new(ds, BiasModelParam::default()).unwrap();
        assert!(matches!(
            m.objective_range(EntityKind::Worker, 2, &[0.5, 0.5]),
            Err(CubamError::EntityOutOfRange { kind: EntityKind::Worker, id: 2, count: 2 })
        ));
        assert!(matches!(
            m.objective_range(EntityKind::Worker, 0, &[0.5]),
            Err(CubamError::DimensionMismatch { .. })
        ));
    }
}
