//! Conversions between the `(threshold, direction)` and canonical
//! `(threshold', scale, unit direction)` forms of Signal worker parameters.
//!
//! With `s = 1/‖w‖`:
//!
//!   t' = t·s,   w' = w·s
//!
//! and the inverse `t = t'/s`, `w = w'/s`.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::error::{CubamError, Result};

/// Canonical Signal worker parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalWorker {
    /// Threshold along the unit direction.
    pub threshold: f64,
    /// Noise scale `1/‖w‖` (strictly positive).
    pub scale: f64,
    /// Unit direction; for 1-D this is the sign of `w`.
    pub direction: Vec<f64>,
}

/// Convert `(t, w)` to canonical form.
pub fn to_canonical(threshold: f64, direction: &[f64]) -> Result<CanonicalWorker> {
    let w = DVector::from_column_slice(direction);
    let norm = w.norm();
    if !threshold.is_finite() || !norm.is_finite() {
        return Err(CubamError::InvalidParameter(
            "worker parameters must be finite".to_string(),
        ));
    }
    if norm == 0.0 {
        return Err(CubamError::InvalidParameter(
            "worker direction must be non-zero".to_string(),
        ));
    }
    let scale = 1.0 / norm;
    Ok(CanonicalWorker {
        threshold: threshold * scale,
        scale,
        direction: (w * scale).as_slice().to_vec(),
    })
}

/// Convert canonical form back to `(t, w)`.
pub fn from_canonical(canonical: &CanonicalWorker) -> Result<(f64, Vec<f64>)> {
    let s = canonical.scale;
    if !(s.is_finite() && s > 0.0) {
        return Err(CubamError::InvalidParameter(format!(
            "canonical scale must be positive, got {}",
            s
        )));
    }
    let w = DVector::from_column_slice(&canonical.direction) / s;
    Ok((canonical.threshold / s, w.as_slice().to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::prelude::*;

    #[test]
    fn one_dimensional_direction_is_sign() {
        let c = to_canonical(1.5, &[-0.5]).unwrap();
        assert_relative_eq!(c.scale, 2.0);
        assert_relative_eq!(c.threshold, 3.0);
        assert_eq!(c.direction, vec![-1.0]);
    }

    #[test]
    fn round_trip_random_vectors() {
        let mut rng = StdRng::seed_from_u64(17);
        for dim in 1..=5 {
            for _ in 0..50 {
                let w: Vec<f64> = (0..dim).map(|_| rng.gen_range(-3.0..3.0)).collect();
                if w.iter().all(|v| v.abs() < 1e-6) {
                    continue;
                }
                let t = rng.gen_range(-4.0..4.0);
                let c = to_canonical(t, &w).unwrap();
                assert_relative_eq!(
                    DVector::from_column_slice(&c.direction).norm(),
                    1.0,
                    epsilon = 1e-12
                );
                let (t2, w2) = from_canonical(&c).unwrap();
                assert_relative_eq!(t2, t, epsilon = 1e-10, max_relative = 1e-12);
                for (a, b) in w.iter().zip(&w2) {
                    assert_relative_eq!(*a, *b, epsilon = 1e-12, max_relative = 1e-12);
                }
            }
        }
    }

    #[test]
    fn zero_direction_is_rejected() {
        assert!(to_canonical(0.3, &[0.0, 0.0]).is_err());
    }

    #[test]
    fn non_positive_scale_is_rejected() {
        let c = CanonicalWorker {
            threshold: 0.0,
            scale: 0.0,
            direction: vec![1.0],
        };
        assert!(from_canonical(&c).is_err());
    }
}
