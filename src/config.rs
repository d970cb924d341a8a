//! Pipeline configuration
//!
//! Configuration is a plain value object with a builder; the web layer can
//! construct it programmatically or pull it from process environment
//! variables at startup.

use crate::error::{MammoscanError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Environment variable naming the trained weights file
pub const MODEL_PATH_ENV: &str = "MAMMOSCAN_MODEL_PATH";

/// Environment variable naming the heatmap output directory
pub const HEATMAP_DIR_ENV: &str = "MAMMOSCAN_HEATMAP_DIR";

/// Environment variable toggling heatmap generation ("0"/"false" disable it)
pub const HEATMAPS_ENV: &str = "MAMMOSCAN_HEATMAPS";

const DEFAULT_HEATMAP_DIR: &str = "grad_cam_images";

/// Configuration for the classification pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Absolute path to the serialized classifier weights. `None` puts the
    /// pipeline in fallback mode; predictions are produced but flagged as
    /// non-authoritative.
    pub model_path: Option<PathBuf>,
    /// Directory where generated heatmaps are written (created on demand)
    pub heatmap_dir: PathBuf,
    /// Whether to attempt heatmap generation for authoritative predictions
    pub generate_heatmaps: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            heatmap_dir: PathBuf::from(DEFAULT_HEATMAP_DIR),
            generate_heatmaps: true,
        }
    }
}

impl PipelineConfig {
    /// Create a new pipeline configuration builder
    #[must_use]
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::new()
    }

    /// Read configuration from process environment variables
    ///
    /// Absent variables fall back to defaults; an unset model path is not an
    /// error here, it only means predictions will be non-authoritative.
    #[must_use]
    pub fn from_env() -> Self {
        let model_path = env::var(MODEL_PATH_ENV).ok().map(PathBuf::from);

        let heatmap_dir = env::var(HEATMAP_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_HEATMAP_DIR));

        let generate_heatmaps = env::var(HEATMAPS_ENV)
            .map(|value| !matches!(value.trim(), "0" | "false" | "no" | "off"))
            .unwrap_or(true);

        Self {
            model_path,
            heatmap_dir,
            generate_heatmaps,
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `MammoscanError::InvalidConfig` when the heatmap directory is
    /// empty or a configured model path is empty.
    pub fn validate(&self) -> Result<()> {
        if self.heatmap_dir.as_os_str().is_empty() {
            return Err(MammoscanError::invalid_config(
                "Heatmap directory must not be empty",
            ));
        }
        if let Some(ref path) = self.model_path {
            if path.as_os_str().is_empty() {
                return Err(MammoscanError::invalid_config(
                    "Model path must not be empty when set",
                ));
            }
        }
        Ok(())
    }
}

/// Builder for `PipelineConfig`
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: PipelineConfig::default(),
        }
    }

    #[must_use]
    pub fn model_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.model_path = Some(path.into());
        self
    }

    /// Explicitly run without trained weights (fallback mode)
    #[must_use]
    pub fn without_model(mut self) -> Self {
        self.config.model_path = None;
        self
    }

    #[must_use]
    pub fn heatmap_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.heatmap_dir = dir.into();
        self
    }

    #[must_use]
    pub fn generate_heatmaps(mut self, enabled: bool) -> Self {
        self.config.generate_heatmaps = enabled;
        self
    }

    /// Build the pipeline configuration
    ///
    /// # Errors
    ///
    /// Returns `MammoscanError::InvalidConfig` on validation failures.
    pub fn build(self) -> Result<PipelineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for PipelineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert!(config.model_path.is_none());
        assert_eq!(config.heatmap_dir, PathBuf::from("grad_cam_images"));
        assert!(config.generate_heatmaps);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = PipelineConfig::builder()
            .model_path("/models/classifier.bin")
            .heatmap_dir("/var/heatmaps")
            .generate_heatmaps(false)
            .build()
            .unwrap();

        assert_eq!(
            config.model_path.as_deref(),
            Some(std::path::Path::new("/models/classifier.bin"))
        );
        assert_eq!(config.heatmap_dir, PathBuf::from("/var/heatmaps"));
        assert!(!config.generate_heatmaps);
    }

    #[test]
    fn test_builder_without_model() {
        let config = PipelineConfig::builder()
            .model_path("/models/classifier.bin")
            .without_model()
            .build()
            .unwrap();
        assert!(config.model_path.is_none());
    }

    #[test]
    fn test_validation_rejects_empty_paths() {
        let config = PipelineConfig {
            heatmap_dir: PathBuf::new(),
            ..PipelineConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Heatmap directory"));

        let config = PipelineConfig {
            model_path: Some(PathBuf::new()),
            ..PipelineConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Model path"));
    }
}
