//! Probit threshold model shared by the 1-D and N-D Signal variants.
//!
//! A worker `j` labels image `i` positive with probability
//! `Φ(x_i·w_j − t_j)`. Priors:
//!
//!   x_i ~ β·N(+1, σx²I) + (1−β)·N(−1, σx²I)
//!   w_jd ~ N(μw, σw²),   t_j ~ N(0, σt²)
//!
//! The kernel minimizes the negative log posterior.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::math::{d_ln_vote_likelihood, ln_add_exp, ln_normal_pdf, ln_vote_likelihood};
use super::{EntityKind, NumericKernel, ParamKind};
use crate::dataset::LabelDataset;
use crate::error::{CubamError, Result};
use crate::model::check_entity;

const LN_2PI: f64 = 1.837_877_066_409_345_5;

/// Hyper-parameters of the Signal models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalModelParam {
    /// Prior probability of the positive class.
    pub beta: f64,
    /// Spread of the image trait mixture components.
    pub sigx: f64,
    /// Spread of the worker direction prior.
    pub sigw: f64,
    /// Mean of the worker direction prior.
    pub muw: f64,
    /// Spread of the worker threshold prior.
    pub sigt: f64,
    /// Trait dimension (1 for the 1-D variant).
    pub dim: usize,
}

impl Default for SignalModelParam {
    fn default() -> Self {
        Self {
            beta: 0.5,
            sigx: 0.8,
            sigw: 1.0,
            muw: 1.0,
            sigt: 3.0,
            dim: 1,
        }
    }
}

impl SignalModelParam {
    /// Defaults of the N-D variant.
    pub fn default_nd() -> Self {
        Self {
            dim: 2,
            ..Self::default()
        }
    }

    /// Raw vector `[beta, sigx, sigw, muw, sigt(, dim)]`.
    pub fn to_raw(&self, with_dim: bool) -> Vec<f64> {
        let mut v = vec![self.beta, self.sigx, self.sigw, self.muw, self.sigt];
        if with_dim {
            v.push(self.dim as f64);
        }
        v
    }

    fn from_raw(values: &[f64], fallback_dim: usize) -> Result<Self> {
        let dim = match values.get(5) {
            Some(&d) => {
                if !(d.is_finite() && d >= 1.0 && d.fract() == 0.0) {
                    return Err(CubamError::InvalidParameter(format!(
                        "dim must be a positive integer, got {}",
                        d
                    )));
                }
                d as usize
            }
            None => fallback_dim,
        };
        let prm = Self {
            beta: values[0],
            sigx: values[1],
            sigw: values[2],
            muw: values[3],
            sigt: values[4],
            dim,
        };
        prm.validate()?;
        Ok(prm)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.beta) {
            return Err(CubamError::InvalidParameter(format!(
                "beta must lie in [0, 1], got {}",
                self.beta
            )));
        }
        for (name, v) in [("sigx", self.sigx), ("sigw", self.sigw), ("sigt", self.sigt)] {
            if !(v.is_finite() && v > 0.0) {
                return Err(CubamError::InvalidParameter(format!(
                    "{} must be positive, got {}",
                    name, v
                )));
            }
        }
        if !self.muw.is_finite() {
            return Err(CubamError::InvalidParameter("muw must be finite".to_string()));
        }
        if self.dim == 0 {
            return Err(CubamError::InvalidParameter("dim must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Built-in kernel for `Binary1dSignalModel` and `BinaryNdSignalModel`.
#[derive(Debug, Clone)]
pub struct ProbitKernel {
    one_dimensional: bool,
    prm: SignalModelParam,
    data: Option<Arc<LabelDataset>>,
    /// `x[i*D + d]`
    xs: Vec<f64>,
    /// `w[j*D + d]`
    ws: Vec<f64>,
    ts: Vec<f64>,
}

impl ProbitKernel {
    /// Kernel of the 1-D variant (5 model parameters, images start at `x = 1`).
    pub fn one_dimensional() -> Self {
        Self {
            one_dimensional: true,
            prm: SignalModelParam::default(),
            data: None,
            xs: Vec::new(),
            ws: Vec::new(),
            ts: Vec::new(),
        }
    }

    /// Kernel of the N-D variant (6 model parameters, images start at `x = 0`).
    pub fn multi_dimensional(dim: usize) -> Self {
        Self {
            one_dimensional: false,
            prm: SignalModelParam {
                dim: dim.max(1),
                ..SignalModelParam::default_nd()
            },
            data: None,
            xs: Vec::new(),
            ws: Vec::new(),
            ts: Vec::new(),
        }
    }

    pub fn model_param(&self) -> &SignalModelParam {
        &self.prm
    }

    pub fn dim(&self) -> usize {
        self.prm.dim
    }

    /// Negative sum of the prior terms of one entity kind at the current
    /// parameters.
    pub fn prior_objective(&self, kind: EntityKind) -> Result<f64> {
        let data = self.dataset()?;
        let d = self.prm.dim;
        let total = match kind {
            EntityKind::Image => (0..data.num_images())
                .map(|i| self.ln_image_prior(&self.xs[i * d..(i + 1) * d]))
                .sum::<f64>(),
            EntityKind::Worker => (0..data.num_workers())
                .map(|j| self.ln_worker_prior(&self.ws[j * d..(j + 1) * d], self.ts[j]))
                .sum::<f64>(),
        };
        Ok(-total)
    }

    fn dataset(&self) -> Result<&LabelDataset> {
        self.data.as_deref().ok_or(CubamError::DataNotLoaded)
    }

    fn reset_params(&mut self) {
        let (n_img, n_wkr) = match &self.data {
            Some(data) => (data.num_images(), data.num_workers()),
            None => (0, 0),
        };
        let d = self.prm.dim;
        let x0 = if self.one_dimensional { 1.0 } else { 0.0 };
        self.xs = vec![x0; n_img * d];
        self.ws = vec![1.0; n_wkr * d];
        self.ts = vec![0.0; n_wkr];
    }

    fn ln_image_prior(&self, x: &[f64]) -> f64 {
        let s2 = self.prm.sigx * self.prm.sigx;
        let (x1sq, x0sq) = x.iter().fold((0.0, 0.0), |(a, b), &v| {
            (a + (v - 1.0) * (v - 1.0), b + (v + 1.0) * (v + 1.0))
        });
        let norm = -0.5 * x.len() as f64 * (LN_2PI + s2.ln());
        norm + ln_add_exp(
            self.prm.beta.ln() - 0.5 * x1sq / s2,
            (1.0 - self.prm.beta).ln() - 0.5 * x0sq / s2,
        )
    }

    /// Adds `∂(−ln prior)/∂x` into `out`.
    fn add_image_prior_gradient(&self, x: &[f64], out: &mut [f64]) {
        let s2 = self.prm.sigx * self.prm.sigx;
        let (x1sq, x0sq) = x.iter().fold((0.0, 0.0), |(a, b), &v| {
            (a + (v - 1.0) * (v - 1.0), b + (v + 1.0) * (v + 1.0))
        });
        let l1 = self.prm.beta.ln() - 0.5 * x1sq / s2;
        let l0 = (1.0 - self.prm.beta).ln() - 0.5 * x0sq / s2;
        let lz = ln_add_exp(l1, l0);
        let r1 = (l1 - lz).exp();
        let r0 = (l0 - lz).exp();
        for (g, &v) in out.iter_mut().zip(x) {
            *g += (r1 * (v - 1.0) + r0 * (v + 1.0)) / s2;
        }
    }

    fn ln_worker_prior(&self, w: &[f64], t: f64) -> f64 {
        w.iter()
            .map(|&v| ln_normal_pdf(v, self.prm.muw, self.prm.sigw))
            .sum::<f64>()
            + ln_normal_pdf(t, 0.0, self.prm.sigt)
    }

    fn projection(x: &[f64], w: &[f64], t: f64) -> f64 {
        x.iter().zip(w).map(|(a, b)| a * b).sum::<f64>() - t
    }

    fn check_grid(grid: &[f64], width: usize) -> Result<()> {
        if grid.len() % width == 0 {
            Ok(())
        } else {
            Err(CubamError::DimensionMismatch {
                what: "objective range grid",
                expected: (grid.len() / width + 1) * width,
                got: grid.len(),
            })
        }
    }
}

impl NumericKernel for ProbitKernel {
    fn name(&self) -> &str {
        if self.one_dimensional {
            "Binary1dSignalModel"
        } else {
            "BinaryNdSignalModel"
        }
    }

    fn load_data(&mut self, dataset: Arc<LabelDataset>) -> Result<()> {
        self.data = Some(dataset);
        self.reset_params();
        Ok(())
    }

    fn declared_len(&self, kind: ParamKind) -> usize {
        let d = self.prm.dim;
        match kind {
            ParamKind::Model => {
                if self.one_dimensional {
                    5
                } else {
                    6
                }
            }
            ParamKind::Worker => self.ws.len() + self.ts.len(),
            ParamKind::Image => self
                .data
                .as_ref()
                .map_or(0, |data| data.num_images() * d),
        }
    }

    fn set_params(&mut self, kind: ParamKind, values: &[f64]) -> Result<()> {
        match kind {
            ParamKind::Model => {
                CubamError::check_len("model parameters", self.declared_len(kind), values.len())?;
                let fallback = if self.one_dimensional { 1 } else { self.prm.dim };
                let prm = SignalModelParam::from_raw(values, fallback)?;
                if self.one_dimensional && prm.dim != 1 {
                    return Err(CubamError::InvalidParameter(
                        "the 1-D variant has dimension 1".to_string(),
                    ));
                }
                if self.data.is_some() && prm.dim != self.prm.dim {
                    return Err(CubamError::InvalidParameter(
                        "cannot change dim after data is loaded".to_string(),
                    ));
                }
                self.prm = prm;
                Ok(())
            }
            ParamKind::Worker => {
                let data = self.dataset()?;
                let d = self.prm.dim;
                let n = data.num_workers();
                CubamError::check_len("worker parameters", n * (d + 1), values.len())?;
                let (w, t) = values.split_at(n * d);
                self.ws.copy_from_slice(w);
                self.ts.copy_from_slice(t);
                Ok(())
            }
            ParamKind::Image => {
                self.dataset()?;
                CubamError::check_len("image parameters", self.xs.len(), values.len())?;
                self.xs.copy_from_slice(values);
                Ok(())
            }
        }
    }

    fn params(&self, kind: ParamKind) -> Vec<f64> {
        match kind {
            ParamKind::Model => self.prm.to_raw(!self.one_dimensional),
            ParamKind::Worker => {
                let mut v = self.ws.clone();
                v.extend_from_slice(&self.ts);
                v
            }
            ParamKind::Image => self.xs.clone(),
        }
    }

    fn objective(&self) -> Result<f64> {
        let data = self.dataset()?;
        let d = self.prm.dim;
        let mut ln_post = -self.prior_objective(EntityKind::Image)?
            - self.prior_objective(EntityKind::Worker)?;
        for r in data.records() {
            let x = &self.xs[r.image_id * d..(r.image_id + 1) * d];
            let w = &self.ws[r.worker_id * d..(r.worker_id + 1) * d];
            ln_post += ln_vote_likelihood(Self::projection(x, w, self.ts[r.worker_id]), r.label);
        }
        Ok(-ln_post)
    }

    fn gradient(&self) -> Result<Vec<f64>> {
        let data = self.dataset()?;
        let d = self.prm.dim;
        let n_img = data.num_images();
        let n_wkr = data.num_workers();
        let w_off = n_img * d;
        let t_off = w_off + n_wkr * d;
        let mut grad = vec![0.0; t_off + n_wkr];

        for i in 0..n_img {
            let x = &self.xs[i * d..(i + 1) * d];
            self.add_image_prior_gradient(x, &mut grad[i * d..(i + 1) * d]);
        }
        let s2w = self.prm.sigw * self.prm.sigw;
        let s2t = self.prm.sigt * self.prm.sigt;
        for (g, &w) in grad[w_off..t_off].iter_mut().zip(&self.ws) {
            *g = (w - self.prm.muw) / s2w;
        }
        for (g, &t) in grad[t_off..].iter_mut().zip(&self.ts) {
            *g = t / s2t;
        }

        for r in data.records() {
            let (i, j) = (r.image_id, r.worker_id);
            let x = &self.xs[i * d..(i + 1) * d];
            let w = &self.ws[j * d..(j + 1) * d];
            let lambda = d_ln_vote_likelihood(Self::projection(x, w, self.ts[j]), r.label);
            for k in 0..d {
                grad[i * d + k] -= w[k] * lambda;
                grad[w_off + j * d + k] -= x[k] * lambda;
            }
            grad[t_off + j] += lambda;
        }
        Ok(grad)
    }

    fn evaluate_range(&self, kind: EntityKind, id: usize, grid: &[f64]) -> Result<Vec<f64>> {
        let data = self.dataset()?;
        let d = self.prm.dim;
        match kind {
            EntityKind::Image => {
                check_entity(kind, id, data.num_images())?;
                Self::check_grid(grid, d)?;
                let labels = data.image_labels(id);
                Ok(grid
                    .chunks_exact(d)
                    .map(|x| {
                        let mut ln_post = self.ln_image_prior(x);
                        for &(j, label) in labels {
                            let w = &self.ws[j * d..(j + 1) * d];
                            ln_post +=
                                ln_vote_likelihood(Self::projection(x, w, self.ts[j]), label);
                        }
                        -ln_post
                    })
                    .collect())
            }
            EntityKind::Worker => {
                check_entity(kind, id, data.num_workers())?;
                Self::check_grid(grid, d + 1)?;
                let labels = data.worker_labels(id);
                Ok(grid
                    .chunks_exact(d + 1)
                    .map(|row| {
                        let (w, t) = (&row[..d], row[d]);
                        let mut ln_post = self.ln_worker_prior(w, t);
                        for &(i, label) in labels {
                            let x = &self.xs[i * d..(i + 1) * d];
                            ln_post += ln_vote_likelihood(Self::projection(x, w, t), label);
                        }
                        -ln_post
                    })
                    .collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::LabelRecord;
    use approx::assert_relative_eq;
    use rand::prelude::*;

    fn random_dataset(rng: &mut StdRng, n_img: usize, n_wkr: usize) -> Arc<LabelDataset> {
        let mut records = Vec::new();
        for i in 0..n_img {
            for j in 0..n_wkr {
                if rng.gen_bool(0.7) {
                    records.push(LabelRecord::new(i, j, rng.gen_bool(0.5)));
                }
            }
        }
        Arc::new(LabelDataset::from_records(n_img, n_wkr, records).unwrap())
    }

    fn randomized_kernel(mut kernel: ProbitKernel, seed: u64) -> ProbitKernel {
        let mut rng = StdRng::seed_from_u64(seed);
        kernel.load_data(random_dataset(&mut rng, 6, 4)).unwrap();
        let xs: Vec<f64> = (0..kernel.declared_len(ParamKind::Image))
            .map(|_| rng.gen_range(-2.0..2.0))
            .collect();
        let wt: Vec<f64> = (0..kernel.declared_len(ParamKind::Worker))
            .map(|_| rng.gen_range(-1.5..1.5))
            .collect();
        kernel.set_params(ParamKind::Image, &xs).unwrap();
        kernel.set_params(ParamKind::Worker, &wt).unwrap();
        kernel
    }

    fn assert_gradient_matches_finite_difference(kernel: &mut ProbitKernel) {
        let grad = kernel.gradient().unwrap();
        let n_img = kernel.declared_len(ParamKind::Image);
        let mut full = kernel.params(ParamKind::Image);
        full.extend(kernel.params(ParamKind::Worker));
        assert_eq!(grad.len(), full.len());

        let h = 1e-6;
        for k in 0..full.len() {
            let mut eval = |v: &[f64]| {
                kernel.set_params(ParamKind::Image, &v[..n_img]).unwrap();
                kernel.set_params(ParamKind::Worker, &v[n_img..]).unwrap();
                kernel.objective().unwrap()
            };
            let mut plus = full.clone();
            plus[k] += h;
            let mut minus = full.clone();
            minus[k] -= h;
            let fd = (eval(&plus) - eval(&minus)) / (2.0 * h);
            assert_relative_eq!(grad[k], fd, epsilon = 1e-5, max_relative = 1e-4);
        }
    }

    #[test]
    fn gradient_matches_finite_difference_1d() {
        let mut k = randomized_kernel(ProbitKernel::one_dimensional(), 3);
        assert_gradient_matches_finite_difference(&mut k);
    }

    #[test]
    fn gradient_matches_finite_difference_nd() {
        let mut k = randomized_kernel(ProbitKernel::multi_dimensional(3), 5);
        assert_gradient_matches_finite_difference(&mut k);
    }

    #[test]
    fn image_ranges_sum_to_objective() {
        for kernel in [ProbitKernel::one_dimensional(), ProbitKernel::multi_dimensional(2)] {
            let k = randomized_kernel(kernel, 11);
            let d = k.dim();
            let xs = k.params(ParamKind::Image);
            let n_img = xs.len() / d;
            let images: f64 = (0..n_img)
                .map(|i| {
                    k.evaluate_range(EntityKind::Image, i, &xs[i * d..(i + 1) * d])
                        .unwrap()[0]
                })
                .sum();
            let total = images + k.prior_objective(EntityKind::Worker).unwrap();
            assert_relative_eq!(total, k.objective().unwrap(), epsilon = 1e-9);
        }
    }

    #[test]
    fn worker_ranges_sum_to_objective() {
        let k = randomized_kernel(ProbitKernel::multi_dimensional(2), 13);
        let d = k.dim();
        let raw = k.params(ParamKind::Worker);
        let n_wkr = raw.len() / (d + 1);
        let workers: f64 = (0..n_wkr)
            .map(|j| {
                let mut row = raw[j * d..(j + 1) * d].to_vec();
                row.push(raw[n_wkr * d + j]);
                k.evaluate_range(EntityKind::Worker, j, &row).unwrap()[0]
            })
            .sum();
        let total = workers + k.prior_objective(EntityKind::Image).unwrap();
        assert_relative_eq!(total, k.objective().unwrap(), epsilon = 1e-9);
    }

    #[test]
    fn range_validates_id_and_grid() {
        let k = randomized_kernel(ProbitKernel::multi_dimensional(2), 1);
        assert!(matches!(
            k.evaluate_range(EntityKind::Image, 99, &[0.0, 0.0]),
            Err(CubamError::EntityOutOfRange { .. })
        ));
        assert!(matches!(
            k.evaluate_range(EntityKind::Worker, 0, &[0.0, 0.0]),
            Err(CubamError::DimensionMismatch { .. })
        ));
        assert_eq!(k.evaluate_range(EntityKind::Image, 0, &[]).unwrap().len(), 0);
    }

    #[test]
    fn load_resets_to_variant_defaults() {
        let mut rng = StdRng::seed_from_u64(2);
        let data = random_dataset(&mut rng, 3, 2);

        let mut k1 = ProbitKernel::one_dimensional();
        k1.load_data(data.clone()).unwrap();
        assert_eq!(k1.params(ParamKind::Image), vec![1.0; 3]);
        assert_eq!(k1.params(ParamKind::Worker), vec![1.0, 1.0, 0.0, 0.0]);

        let mut k2 = ProbitKernel::multi_dimensional(2);
        k2.load_data(data).unwrap();
        assert_eq!(k2.params(ParamKind::Image), vec![0.0; 6]);
        assert_eq!(k2.declared_len(ParamKind::Worker), 6);
    }

    #[test]
    fn wrong_lengths_are_rejected() {
        let mut k = randomized_kernel(ProbitKernel::one_dimensional(), 4);
        let err = k.set_params(ParamKind::Image, &[0.0; 2]).unwrap_err();
        assert!(matches!(
            err,
            CubamError::DimensionMismatch { expected: 6, got: 2, .. }
        ));
        assert!(k.set_params(ParamKind::Model, &[0.5, 0.8, 1.0, 1.0]).is_err());
    }

    #[test]
    fn dim_is_frozen_after_load() {
        let mut k = ProbitKernel::multi_dimensional(2);
        k.set_params(ParamKind::Model, &[0.5, 0.8, 1.0, 1.0, 3.0, 3.0])
            .unwrap();
        assert_eq!(k.dim(), 3);

        let mut rng = StdRng::seed_from_u64(9);
        k.load_data(random_dataset(&mut rng, 2, 2)).unwrap();
        let err = k
            .set_params(ParamKind::Model, &[0.5, 0.8, 1.0, 1.0, 3.0, 2.0])
            .unwrap_err();
        assert!(matches!(err, CubamError::InvalidParameter(_)));
        // Same dim is accepted.
        k.set_params(ParamKind::Model, &[0.4, 0.8, 1.0, 1.0, 3.0, 3.0])
            .unwrap();
        assert_relative_eq!(k.model_param().beta, 0.4);
    }

    #[test]
    fn invalid_hyper_parameters_are_rejected() {
        let mut k = ProbitKernel::one_dimensional();
        let err = k
            .set_params(ParamKind::Model, &[0.5, -0.8, 1.0, 1.0, 3.0])
            .unwrap_err();
        assert!(matches!(err, CubamError::InvalidParameter(_)));
    }
}
