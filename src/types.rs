//! Core types for risk classification results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Probabilities below this threshold are classified as low risk
pub const LOW_RISK_THRESHOLD: f32 = 0.40;

/// Probabilities at or above this threshold are classified as high risk
pub const HIGH_RISK_THRESHOLD: f32 = 0.70;

/// Discrete risk category derived from the classifier probability
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Probability in [0, 0.40)
    Low,
    /// Probability in [0.40, 0.70)
    Medium,
    /// Probability in [0.70, 1.0]
    High,
}

impl RiskLevel {
    /// Map a classifier probability onto a risk category using the fixed
    /// thresholds (inclusive lower bounds).
    #[must_use]
    pub fn from_probability(probability: f32) -> Self {
        if probability < LOW_RISK_THRESHOLD {
            Self::Low
        } else if probability < HIGH_RISK_THRESHOLD {
            Self::Medium
        } else {
            Self::High
        }
    }

    /// Lowercase identifier, matching the stored representation
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Capitalized label for human-readable output
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
        }
    }

    /// Short human-readable findings string for this category
    #[must_use]
    pub fn findings(self) -> String {
        format!("Risk level: {}", self.label())
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Minimal contract for an uploaded report handed to the pipeline
///
/// The caller owns storage of the report itself; the pipeline only needs a
/// stable identifier (used to name the heatmap file) and the stored image
/// path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRecord {
    /// Caller-side identifier of the uploaded report
    pub id: u64,
    /// Path of the stored image to classify
    pub image_path: PathBuf,
}

impl ReportRecord {
    /// Create a new report record
    pub fn new<P: Into<PathBuf>>(id: u64, image_path: P) -> Self {
        Self {
            id,
            image_path: image_path.into(),
        }
    }
}

/// Per-stage wall-clock timings in milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingTimings {
    /// Image decode and preprocessing time
    pub decode_ms: u64,
    /// Forward pass (or fallback sampling) time
    pub inference_ms: u64,
    /// Heatmap generation time, when attempted and successful
    pub heatmap_ms: Option<u64>,
}

/// Result of classifying one uploaded report
///
/// Constructed once per report and immutable thereafter. Persisting it (and
/// associating `heatmap_path` back onto the uploaded report) is the caller's
/// responsibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Discrete risk category
    pub risk_level: RiskLevel,
    /// Probability as a percentage in [0, 100], two-decimal precision
    pub confidence: f32,
    /// Human-readable findings derived from the risk level
    pub findings: String,
    /// Saved heatmap file, present only when CAM generation succeeded on an
    /// authoritative model
    pub heatmap_path: Option<PathBuf>,
    /// False when the prediction came from fallback weights; callers should
    /// warn the end user that such results are not meaningful
    pub authoritative: bool,
    /// When the prediction was produced
    pub processed_at: DateTime<Utc>,
    /// Per-stage timings
    pub timings: ProcessingTimings,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_boundaries() {
        assert_eq!(RiskLevel::from_probability(0.0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_probability(0.39999), RiskLevel::Low);
        assert_eq!(RiskLevel::from_probability(0.4), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_probability(0.69999), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_probability(0.7), RiskLevel::High);
        assert_eq!(RiskLevel::from_probability(1.0), RiskLevel::High);
    }

    #[test]
    fn test_risk_level_monotonic() {
        // Walking the probability range never steps down a category
        let mut previous = RiskLevel::Low;
        for step in 0..=1000 {
            let level = RiskLevel::from_probability(step as f32 / 1000.0);
            assert!(level >= previous, "risk level regressed at step {step}");
            previous = level;
        }
    }

    #[test]
    fn test_labels_and_findings() {
        assert_eq!(RiskLevel::Low.as_str(), "low");
        assert_eq!(RiskLevel::Medium.label(), "Medium");
        assert_eq!(RiskLevel::High.findings(), "Risk level: High");
        assert_eq!(RiskLevel::Medium.to_string(), "medium");
    }

    #[test]
    fn test_risk_level_serde_representation() {
        let json = serde_json::to_string(&RiskLevel::High).unwrap();
        assert_eq!(json, "\"high\"");
        let parsed: RiskLevel = serde_json::from_str("\"low\"").unwrap();
        assert_eq!(parsed, RiskLevel::Low);
    }

    #[test]
    fn test_prediction_result_roundtrip() {
        let result = PredictionResult {
            risk_level: RiskLevel::Medium,
            confidence: 55.25,
            findings: RiskLevel::Medium.findings(),
            heatmap_path: Some(PathBuf::from("grad_cam_images/grad_cam_7.png")),
            authoritative: true,
            processed_at: Utc::now(),
            timings: ProcessingTimings {
                decode_ms: 12,
                inference_ms: 80,
                heatmap_ms: Some(95),
            },
        };

        let json = serde_json::to_string(&result).unwrap();
        let parsed: PredictionResult = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.risk_level, RiskLevel::Medium);
        assert!((parsed.confidence - 55.25).abs() < f32::EPSILON);
        assert_eq!(parsed.findings, "Risk level: Medium");
        assert!(parsed.authoritative);
        assert_eq!(parsed.timings.heatmap_ms, Some(95));
    }
}
