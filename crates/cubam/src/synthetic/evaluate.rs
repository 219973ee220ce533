use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::dataset::LabelDataset;
use crate::error::{CubamError, Result};

/// Majority vote per image with uniform tie-breaking noise.
///
/// An image is positive when `Σ ±1 + (u − 0.5) > 0`, `u ~ U(0, 1)`. Images
/// without votes are negative, as in [`crate::MajorityModel`]. One noise
/// sample is drawn per image either way.
pub fn majority_vote<R: Rng + ?Sized>(dataset: &LabelDataset, rng: &mut R) -> Vec<bool> {
    (0..dataset.num_images())
        .map(|i| {
            let noise: f64 = rng.gen::<f64>() - 0.5;
            let labels = dataset.image_labels(i);
            let votes: f64 = labels
                .iter()
                .map(|&(_, label)| if label { 1.0 } else { -1.0 })
                .sum();
            !labels.is_empty() && votes + noise > 0.0
        })
        .collect()
}

/// Error, false-alarm and miss rates of an estimate against ground truth.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ErrorRates {
    /// Fraction of images labeled wrongly.
    pub error_rate: f64,
    /// Positives among true negatives.
    pub false_alarm_rate: f64,
    /// Negatives among true positives.
    pub miss_rate: f64,
}

/// Compare estimated labels with ground truth. A rate whose denominator is
/// empty is reported as 0.
pub fn error_rates(estimated: &[bool], truth: &[bool]) -> Result<ErrorRates> {
    if estimated.len() != truth.len() {
        return Err(CubamError::EvaluationPrecondition(format!(
            "{} estimates for {} ground-truth labels",
            estimated.len(),
            truth.len()
        )));
    }
    let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };

    let mut wrong = 0;
    let (mut negatives, mut false_alarms) = (0, 0);
    let (mut positives, mut misses) = (0, 0);
    for (&est, &gt) in estimated.iter().zip(truth) {
        if est != gt {
            wrong += 1;
        }
        if gt {
            positives += 1;
            misses += usize::from(!est);
        } else {
            negatives += 1;
            false_alarms += usize::from(est);
        }
    }
    Ok(ErrorRates {
        error_rate: ratio(wrong, truth.len()),
        false_alarm_rate: ratio(false_alarms, negatives),
        miss_rate: ratio(misses, positives),
    })
}

/// Rank and linear correlation of two sequences.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Correlation {
    pub spearman: f64,
    pub pearson: f64,
}

pub fn correlation(u: &[f64], v: &[f64]) -> Result<Correlation> {
    if u.len() != v.len() {
        return Err(CubamError::EvaluationPrecondition(format!(
            "cannot correlate sequences of length {} and {}",
            u.len(),
            v.len()
        )));
    }
    if u.len() < 2 {
        return Err(CubamError::EvaluationPrecondition(
            "correlation needs at least 2 points".to_string(),
        ));
    }
    if u.iter().chain(v).any(|x| !x.is_finite()) {
        return Err(CubamError::EvaluationPrecondition(
            "correlation inputs must be finite".to_string(),
        ));
    }
    Ok(Correlation {
        spearman: pearson(&ranks(u), &ranks(v))?,
        pearson: pearson(u, v)?,
    })
}

fn pearson(u: &[f64], v: &[f64]) -> Result<f64> {
    let n = u.len() as f64;
    let mu = u.iter().sum::<f64>() / n;
    let mv = v.iter().sum::<f64>() / n;
    let (mut suv, mut suu, mut svv) = (0.0, 0.0, 0.0);
    for (&a, &b) in u.iter().zip(v) {
        let (da, db) = (a - mu, b - mv);
        suv += da * db;
        suu += da * da;
        svv += db * db;
    }
    if suu == 0.0 || svv == 0.0 {
        return Err(CubamError::EvaluationPrecondition(
            "correlation is undefined for a constant sequence".to_string(),
        ));
    }
    Ok(suv / (suu * svv).sqrt())
}

/// 1-based ranks, ties get the mean of their positions.
fn ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
    let mut out = vec![0.0; values.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && values[order[end]] == values[order[start]] {
            end += 1;
        }
        let rank = 0.5 * (start + end + 1) as f64;
        for &k in &order[start..end] {
            out[k] = rank;
        }
        start = end;
    }
    out
}
