//! Differential-privacy noise
//!
//! A single Laplace draw per call. There is no cumulative privacy-budget
//! accounting across repeated releases; each call spends a fixed epsilon.

use rand::Rng;

/// Scale of the jitter applied to confidences at the strictest anonymization levels
pub const CONFIDENCE_JITTER_SCALE: f64 = 0.05;

/// Draw from Laplace(0, scale) by inverse transform sampling.
pub fn laplace<R: Rng + ?Sized>(rng: &mut R, scale: f64) -> f64 {
    if scale <= 0.0 {
        return 0.0;
    }
    // u in (-0.5, 0.5), excluding the endpoint that would produce ln(0)
    let mut u: f64 = rng.gen::<f64>() - 0.5;
    while u.abs() >= 0.5 {
        u = rng.gen::<f64>() - 0.5;
    }
    -scale * u.signum() * (1.0 - 2.0 * u.abs()).ln()
}

/// Add Laplace noise to a unit-interval value and clamp the result back into [0, 1]
pub fn jitter_unit<R: Rng + ?Sized>(rng: &mut R, value: f64, scale: f64) -> f64 {
    (value + laplace(rng, scale)).clamp(0.0, 1.0)
}
