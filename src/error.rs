//! Error types for classification pipeline operations

use thiserror::Error;

/// Result type alias for classification pipeline operations
pub type Result<T> = std::result::Result<T, MammoscanError>;

/// Comprehensive error types for classification pipeline operations
#[derive(Error, Debug)]
pub enum MammoscanError {
    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding or encoding errors
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Model loading or deserialization errors
    #[error("Model error: {0}")]
    Model(String),

    /// Numeric failures during a forward or backward pass
    #[error("Inference error: {0}")]
    Inference(String),

    /// Model structure does not support the requested operation
    #[error("Architecture error: {0}")]
    Architecture(String),
}

impl MammoscanError {
    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new model error
    pub fn model<S: Into<String>>(msg: S) -> Self {
        Self::Model(msg.into())
    }

    /// Create a new inference error
    pub fn inference<S: Into<String>>(msg: S) -> Self {
        Self::Inference(msg.into())
    }

    /// Create a new architecture error
    pub fn architecture<S: Into<String>>(msg: S) -> Self {
        Self::Architecture(msg.into())
    }

    /// Create image loading error with format context
    pub fn image_load_error<P: AsRef<std::path::Path>>(path: P, error: image::ImageError) -> Self {
        let path_display = path.as_ref().display();
        let extension = path
            .as_ref()
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown");

        Self::Image(image::ImageError::IoError(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!(
                "Failed to load image '{}' (format: {}): {}. Supported formats: PNG, JPEG, TIFF",
                path_display, extension, error
            ),
        )))
    }

    /// Create model error with troubleshooting context
    pub fn model_error_with_context<P: AsRef<std::path::Path>>(
        operation: &str,
        model_path: P,
        error: &str,
    ) -> Self {
        let path_display = model_path.as_ref().display();
        Self::Model(format!(
            "Failed to {} model '{}': {}",
            operation, path_display, error
        ))
    }
}
