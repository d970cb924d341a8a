//! Pipeline orchestration
//!
//! Ties provisioning, preprocessing, classification, and explainability
//! together for one uploaded report. This layer has no algorithmic content
//! of its own; it sequences the stages, contains heatmap failures, and
//! assembles the result the caller persists.

use crate::cam::{self, CamTarget};
use crate::classify;
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::model::{ClassifierHandle, ClassifierProvider};
use crate::preprocess;
use crate::types::{PredictionResult, ProcessingTimings, ReportRecord, RiskLevel};
use chrono::Utc;
use instant::Instant;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The classification pipeline
///
/// Owns the classifier provider, so the (possibly expensive) model load
/// happens once per pipeline instance and is shared across reports. Hold one
/// pipeline for the process lifetime; `process_report` is safe to call from
/// concurrent request handlers.
pub struct Pipeline {
    config: PipelineConfig,
    provider: ClassifierProvider,
}

impl Pipeline {
    /// Create a pipeline for the given configuration
    ///
    /// # Errors
    ///
    /// Returns `MammoscanError::InvalidConfig` when the configuration fails
    /// validation.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let provider = ClassifierProvider::new(config.model_path.clone());
        Ok(Self { config, provider })
    }

    /// The active configuration
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The cached classifier handle, provisioning it on first use
    ///
    /// Exposed so callers can inspect `is_authoritative` up front and warn
    /// end users before the first upload is processed.
    #[must_use]
    pub fn classifier(&self) -> Arc<ClassifierHandle> {
        self.provider.get()
    }

    /// Classify one uploaded report
    ///
    /// # Errors
    ///
    /// - `MammoscanError::Image` when the stored file is not a readable
    ///   image; the caller should reject the upload.
    /// - `MammoscanError::Inference` on numeric failures during the forward
    ///   pass.
    ///
    /// Provisioning and heatmap failures never surface here; they degrade to
    /// a non-authoritative result or a missing heatmap respectively.
    pub fn process_report(&self, report: &ReportRecord) -> Result<PredictionResult> {
        let handle = self.provider.get();
        if !handle.is_authoritative() {
            debug!(
                report_id = report.id,
                "classifier in fallback mode, results will not be meaningful"
            );
        }

        let decode_start = Instant::now();
        let tensor = preprocess::load_and_preprocess(&report.image_path)?;
        let decode_ms = decode_start.elapsed().as_millis() as u64;

        let inference_start = Instant::now();
        let probability = classify::predict_probability(&handle, &tensor)?;
        let inference_ms = inference_start.elapsed().as_millis() as u64;

        let risk_level = RiskLevel::from_probability(probability);
        let confidence = classify::confidence_percent(probability);

        let mut heatmap_path = None;
        let mut heatmap_ms = None;
        if handle.is_authoritative() && self.config.generate_heatmaps {
            let heatmap_start = Instant::now();
            match cam::generate_and_store(
                handle.network(),
                &tensor,
                CamTarget::from_risk(risk_level),
                &self.config.heatmap_dir,
                report.id,
            ) {
                Ok(path) => {
                    heatmap_ms = Some(heatmap_start.elapsed().as_millis() as u64);
                    heatmap_path = Some(path);
                },
                Err(e) => {
                    warn!(report_id = report.id, "heatmap generation failed: {e}");
                },
            }
        }

        info!(
            report_id = report.id,
            risk = %risk_level,
            confidence,
            authoritative = handle.is_authoritative(),
            "report classified"
        );

        Ok(PredictionResult {
            risk_level,
            confidence,
            findings: risk_level.findings(),
            heatmap_path,
            authoritative: handle.is_authoritative(),
            processed_at: Utc::now(),
            timings: ProcessingTimings {
                decode_ms,
                inference_ms,
                heatmap_ms,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelWeights;
    use image::{GrayImage, Luma};
    use tempfile::TempDir;

    fn write_test_image(dir: &TempDir, name: &str, value: u8) -> std::path::PathBuf {
        let path = dir.path().join(name);
        GrayImage::from_pixel(64, 64, Luma([value])).save(&path).unwrap();
        path
    }

    #[test]
    fn test_fallback_pipeline_never_writes_heatmaps() {
        let dir = TempDir::new().unwrap();
        let image_path = write_test_image(&dir, "scan.png", 128);
        let heatmap_dir = dir.path().join("heatmaps");

        let config = PipelineConfig::builder()
            .heatmap_dir(&heatmap_dir)
            .build()
            .unwrap();
        let pipeline = Pipeline::new(config).unwrap();

        let result = pipeline
            .process_report(&ReportRecord::new(1, image_path))
            .unwrap();

        assert!(!result.authoritative);
        assert!(result.heatmap_path.is_none());
        assert!(result.timings.heatmap_ms.is_none());
        assert!(!heatmap_dir.exists());
    }

    #[test]
    fn test_authoritative_pipeline_produces_heatmap() {
        let dir = TempDir::new().unwrap();
        let image_path = write_test_image(&dir, "scan.png", 128);
        let weights_path = dir.path().join("weights.bin");
        ModelWeights::constant(0.01, 0.1).save(&weights_path).unwrap();

        let config = PipelineConfig::builder()
            .model_path(&weights_path)
            .heatmap_dir(dir.path().join("heatmaps"))
            .build()
            .unwrap();
        let pipeline = Pipeline::new(config).unwrap();

        let result = pipeline
            .process_report(&ReportRecord::new(9, image_path))
            .unwrap();

        assert!(result.authoritative);
        let heatmap = result.heatmap_path.expect("heatmap should be generated");
        assert!(heatmap.exists());
        assert_eq!(heatmap.file_name().unwrap(), "grad_cam_9.png");
    }

    #[test]
    fn test_heatmaps_can_be_disabled() {
        let dir = TempDir::new().unwrap();
        let image_path = write_test_image(&dir, "scan.png", 90);
        let weights_path = dir.path().join("weights.bin");
        ModelWeights::constant(0.01, 0.1).save(&weights_path).unwrap();

        let config = PipelineConfig::builder()
            .model_path(&weights_path)
            .heatmap_dir(dir.path().join("heatmaps"))
            .generate_heatmaps(false)
            .build()
            .unwrap();
        let pipeline = Pipeline::new(config).unwrap();

        let result = pipeline
            .process_report(&ReportRecord::new(2, image_path))
            .unwrap();

        assert!(result.authoritative);
        assert!(result.heatmap_path.is_none());
    }

    #[test]
    fn test_degenerate_cam_is_contained() {
        // all-zero weights make the activation map degenerate; the
        // prediction must still succeed, just without a heatmap
        let dir = TempDir::new().unwrap();
        let image_path = write_test_image(&dir, "scan.png", 128);
        let weights_path = dir.path().join("weights.bin");
        ModelWeights::constant(0.0, 0.0).save(&weights_path).unwrap();

        let config = PipelineConfig::builder()
            .model_path(&weights_path)
            .heatmap_dir(dir.path().join("heatmaps"))
            .build()
            .unwrap();
        let pipeline = Pipeline::new(config).unwrap();

        let result = pipeline
            .process_report(&ReportRecord::new(3, image_path))
            .unwrap();

        assert!(result.authoritative);
        assert!(result.heatmap_path.is_none());
    }

    #[test]
    fn test_unreadable_upload_is_rejected() {
        let dir = TempDir::new().unwrap();
        let bogus = dir.path().join("not_an_image.png");
        std::fs::write(&bogus, b"zero bytes of image data").unwrap();

        let pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
        let err = pipeline
            .process_report(&ReportRecord::new(4, bogus))
            .unwrap_err();
        assert!(matches!(err, crate::error::MammoscanError::Image(_)));
    }
}
