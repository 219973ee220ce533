use statrs::function::erf::erfc;

const LN_2PI: f64 = 1.837_877_066_409_345_5;

/// `ln N(x; mu, sigma)`.
pub(crate) fn ln_normal_pdf(x: f64, mu: f64, sigma: f64) -> f64 {
    let z = (x - mu) / sigma;
    -0.5 * (LN_2PI + 2.0 * sigma.ln() + z * z)
}

/// `ln φ(a)` for the standard normal.
pub(crate) fn ln_std_normal_pdf(a: f64) -> f64 {
    -0.5 * (a * a + LN_2PI)
}

/// `ln Φ(a)`, accurate in both tails.
pub(crate) fn ln_ndtr(a: f64) -> f64 {
    if a.is_nan() {
        return f64::NAN;
    }
    if a > 5.0 {
        let upper = 0.5 * erfc(a / std::f64::consts::SQRT_2);
        (-upper).ln_1p()
    } else if a >= -30.0 {
        (0.5 * erfc(-a / std::f64::consts::SQRT_2)).ln()
    } else {
        // Asymptotic series of the Mills ratio.
        let a2 = a * a;
        let series = 1.0 - 1.0 / a2 + 3.0 / (a2 * a2) - 15.0 / (a2 * a2 * a2);
        ln_std_normal_pdf(a) - (-a).ln() + series.ln()
    }
}

/// `φ(a) / Φ(a)`, the derivative of `ln Φ(a)`.
pub(crate) fn inverse_mills(a: f64) -> f64 {
    (ln_std_normal_pdf(a) - ln_ndtr(a)).exp()
}

/// Log-likelihood of one vote given the projection `a = x·w - t`.
pub(crate) fn ln_vote_likelihood(a: f64, label: bool) -> f64 {
    if label {
        ln_ndtr(a)
    } else {
        ln_ndtr(-a)
    }
}

/// Derivative of [`ln_vote_likelihood`] with respect to `a`.
pub(crate) fn d_ln_vote_likelihood(a: f64, label: bool) -> f64 {
    if label {
        inverse_mills(a)
    } else {
        -inverse_mills(-a)
    }
}

/// Stable `ln(e^a + e^b)`.
pub(crate) fn ln_add_exp(a: f64, b: f64) -> f64 {
    if a == f64::NEG_INFINITY {
        return b;
    }
    if b == f64::NEG_INFINITY {
        return a;
    }
    let m = a.max(b);
    m + ((a - m).exp() + (b - m).exp()).ln()
}

/// `n` evenly spaced points from `lo` to `hi` inclusive.
pub(crate) fn linspace(lo: f64, hi: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![0.5 * (lo + hi)],
        _ => {
            let step = (hi - lo) / (n - 1) as f64;
            (0..n).map(|k| lo + step * k as f64).collect()
        }
    }
}
