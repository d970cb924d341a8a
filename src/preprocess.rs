//! Image decoding and tensor preprocessing
//!
//! The classifier's first convolution takes a single channel, so inputs are
//! reduced to grayscale and resized to exactly 224x224 before being scaled
//! into [0, 1]. No mean/std normalization is applied; the weights are
//! trained against raw [0, 1] grayscale intensities.

use crate::error::{MammoscanError, Result};
use crate::model::INPUT_SIZE;
use image::imageops::FilterType;
use image::DynamicImage;
use ndarray::Array4;
use std::path::Path;

/// Decode an image file and preprocess it for inference
///
/// # Errors
///
/// Returns `MammoscanError::Image` when the file is not a readable image;
/// the error is propagated untouched, with no retry.
pub fn load_and_preprocess<P: AsRef<Path>>(path: P) -> Result<Array4<f32>> {
    let image = image::open(path.as_ref())
        .map_err(|e| MammoscanError::image_load_error(path.as_ref(), e))?;
    Ok(preprocess_image(&image))
}

/// Decode an in-memory image and preprocess it for inference
///
/// # Errors
///
/// Returns `MammoscanError::Image` when the bytes do not decode as an image.
pub fn preprocess_bytes(bytes: &[u8]) -> Result<Array4<f32>> {
    let image = image::load_from_memory(bytes)?;
    Ok(preprocess_image(&image))
}

/// Convert a decoded image into the `(1, 1, 224, 224)` input tensor
#[must_use]
#[allow(clippy::indexing_slicing)] // tensor pre-allocated to the resized extent
pub fn preprocess_image(image: &DynamicImage) -> Array4<f32> {
    let gray = image.to_luma8();
    let resized = image::imageops::resize(
        &gray,
        INPUT_SIZE as u32,
        INPUT_SIZE as u32,
        FilterType::Triangle,
    );

    let mut tensor = Array4::<f32>::zeros((1, 1, INPUT_SIZE, INPUT_SIZE));
    for (x, y, pixel) in resized.enumerate_pixels() {
        tensor[[0, 0, y as usize, x as usize]] = f32::from(pixel[0]) / 255.0;
    }
    tensor
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, RgbImage};

    #[test]
    fn test_preprocess_shape_and_range() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(640, 480, Rgb([200, 40, 90])));
        let tensor = preprocess_image(&img);

        assert_eq!(tensor.shape(), &[1, 1, INPUT_SIZE, INPUT_SIZE]);
        assert!(tensor.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn test_uniform_gray_maps_to_uniform_tensor() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(224, 224, Luma([128])));
        let tensor = preprocess_image(&img);

        let expected = 128.0 / 255.0;
        assert!(tensor.iter().all(|&v| (v - expected).abs() < 1e-6));
    }

    #[test]
    fn test_small_image_is_upscaled() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(10, 7, Luma([255])));
        let tensor = preprocess_image(&img);
        assert_eq!(tensor.shape(), &[1, 1, INPUT_SIZE, INPUT_SIZE]);
        assert!(tensor.iter().all(|&v| v > 0.99));
    }

    #[test]
    fn test_non_image_bytes_are_rejected() {
        let err = preprocess_bytes(b"this is not an image").unwrap_err();
        assert!(matches!(err, MammoscanError::Image(_)));
    }

    #[test]
    fn test_missing_file_is_rejected() {
        let err = load_and_preprocess("/nonexistent/upload.png").unwrap_err();
        assert!(matches!(err, MammoscanError::Image(_)));
    }
}
