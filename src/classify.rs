//! Forward-pass classification and probability mapping

use crate::error::Result;
use crate::model::ClassifierHandle;
use log::debug;
use ndarray::Array4;
use rand::Rng;

/// Fallback probabilities are sampled from [0.1, 0.9], deliberately avoiding
/// extreme confidence.
pub const FALLBACK_PROBABILITY_RANGE: (f32, f32) = (0.1, 0.9);

/// Logistic transform of a logit
#[must_use]
pub fn sigmoid(logit: f32) -> f32 {
    1.0 / (1.0 + (-logit).exp())
}

/// Produce the malignancy probability for a preprocessed input
///
/// An authoritative handle runs one forward pass (no gradient bookkeeping)
/// and squashes the single logit through a sigmoid. A fallback handle
/// samples uniformly from [0.1, 0.9] instead; the sample is a placeholder,
/// not a calibrated distribution.
///
/// # Errors
///
/// Returns `MammoscanError::Inference` on numeric failures during the
/// forward pass. No retry is attempted.
pub fn predict_probability(handle: &ClassifierHandle, input: &Array4<f32>) -> Result<f32> {
    if !handle.is_authoritative() {
        let (lo, hi) = FALLBACK_PROBABILITY_RANGE;
        let probability = rand::thread_rng().gen_range(lo..=hi);
        debug!("fallback classifier active, sampled probability {probability:.4}");
        return Ok(probability);
    }

    let logit = handle.network().forward_logit(input)?;
    let probability = sigmoid(logit);
    debug!("forward pass produced logit {logit:.4}, probability {probability:.4}");
    Ok(probability)
}

/// Probability as a percentage with two-decimal precision
#[must_use]
pub fn confidence_percent(probability: f32) -> f32 {
    ((f64::from(probability) * 100.0 * 100.0).round() / 100.0) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sigmoid() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-6);
        assert!(sigmoid(10.0) > 0.999);
        assert!(sigmoid(-10.0) < 0.001);
        // symmetric around zero
        assert!((sigmoid(2.0) + sigmoid(-2.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_confidence_percent_rounding() {
        assert!((confidence_percent(0.5) - 50.0).abs() < 1e-4);
        assert!((confidence_percent(0.125) - 12.5).abs() < 1e-4);
        assert!((confidence_percent(0.333_333) - 33.33).abs() < 1e-4);
        assert!((confidence_percent(0.666_666) - 66.67).abs() < 1e-4);
    }

    #[test]
    fn test_fallback_probability_within_range() {
        let provider = crate::model::ClassifierProvider::new(None);
        let handle = provider.get();
        let input = Array4::<f32>::zeros((1, 1, 224, 224));

        for _ in 0..32 {
            let probability = predict_probability(&handle, &input).unwrap();
            assert!((0.1..=0.9).contains(&probability));
        }
    }

    #[test]
    fn test_confidence_percent_bounds() {
        assert!((confidence_percent(0.0) - 0.0).abs() < f32::EPSILON);
        assert!((confidence_percent(1.0) - 100.0).abs() < 1e-4);
        for step in 0..=100 {
            let confidence = confidence_percent(step as f32 / 100.0);
            assert!((0.0..=100.0).contains(&confidence));
        }
    }
}
