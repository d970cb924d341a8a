//! Gradient-weighted class activation mapping
//!
//! Attributes a prediction back onto the input by capturing the last
//! convolution's activations and the gradient flowing into them, then
//! combining the activation channels weighted by the spatial mean of the
//! gradient. Capture uses the call-local forward trace of
//! [`Network`](crate::network::Network); no state survives between
//! invocations.

use crate::error::{MammoscanError, Result};
use crate::model::INPUT_SIZE;
use crate::network::Network;
use crate::types::RiskLevel;
use image::imageops::FilterType;
use image::{GrayImage, Luma};
use ndarray::{s, Array2, Array4};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Direction the attribution is computed for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CamTarget {
    /// Evidence lowering the malignancy logit
    Benign,
    /// Evidence raising the malignancy logit
    Malignant,
}

impl CamTarget {
    /// Target matching a predicted risk category
    #[must_use]
    pub fn from_risk(level: RiskLevel) -> Self {
        match level {
            RiskLevel::Low => Self::Benign,
            RiskLevel::Medium | RiskLevel::High => Self::Malignant,
        }
    }

    /// Seed applied to the single logit for the backward walk. The head has
    /// one output, so the class choice becomes a gradient direction.
    #[must_use]
    pub fn seed(self) -> f32 {
        match self {
            Self::Benign => -1.0,
            Self::Malignant => 1.0,
        }
    }
}

/// Compute the normalized activation map for one input
///
/// The returned map has the spatial extent of the last convolution's output
/// and values in [0, 1].
///
/// # Errors
///
/// - `MammoscanError::Architecture` when the network has no convolution
///   layer.
/// - `MammoscanError::Inference` when the forward or backward pass fails or
///   the rectified map is degenerate (all zero), which cannot be normalized.
#[allow(clippy::indexing_slicing)] // activation/gradient shapes match by construction
pub fn compute_cam(network: &Network, input: &Array4<f32>, target: CamTarget) -> Result<Array2<f32>> {
    let capture_index = network.last_conv_index().ok_or_else(|| {
        MammoscanError::architecture("model has no convolution layer to attribute against")
    })?;

    let trace = network.forward_trace(input)?;
    let activations = trace.layer_output(capture_index);
    let gradients = network.backward_to(&trace, capture_index, target.seed())?;

    let shape = activations.shape();
    let (channels, height, width) = (shape[1], shape[2], shape[3]);

    // weighted sum of activation channels, one weight per channel: the
    // spatial mean of the gradient
    let mut map = Array2::<f32>::zeros((height, width));
    for c in 0..channels {
        let weight = gradients
            .slice(s![0, c, .., ..])
            .mean()
            .unwrap_or(0.0);
        map.scaled_add(weight, &activations.slice(s![0, c, .., ..]));
    }

    // keep positive contributions only, then normalize over the map's own extent
    map.mapv_inplace(|v| v.max(0.0));
    normalize_in_place(&mut map)?;

    debug!(
        channels,
        height, width, "computed activation map at the last convolution"
    );
    Ok(map)
}

/// Min-max normalize the map into [0, 1]
fn normalize_in_place(map: &mut Array2<f32>) -> Result<()> {
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for &value in map.iter() {
        min = min.min(value);
        max = max.max(value);
    }

    let range = max - min;
    if !range.is_finite() || range <= f32::EPSILON {
        return Err(MammoscanError::inference(
            "degenerate activation map: no contribution spread to normalize",
        ));
    }

    map.mapv_inplace(|v| (v - min) / range);
    Ok(())
}

/// Render a normalized map as an 8-bit grayscale heatmap and save it
///
/// The file is written as `grad_cam_{report_id}.png` under `output_dir`,
/// which is created if absent.
///
/// # Errors
///
/// Returns `MammoscanError::Io` when the directory cannot be created and
/// `MammoscanError::Image` when encoding fails.
#[allow(clippy::indexing_slicing)] // image pre-allocated to the map extent
pub fn render_heatmap(map: &Array2<f32>, output_dir: &Path, report_id: u64) -> Result<PathBuf> {
    std::fs::create_dir_all(output_dir)?;

    let (height, width) = map.dim();
    let mut heatmap = GrayImage::new(width as u32, height as u32);
    for ((y, x), value) in map.indexed_iter() {
        let level = (value.clamp(0.0, 1.0) * 255.0).round() as u8;
        heatmap.put_pixel(x as u32, y as u32, Luma([level]));
    }

    let resized = image::imageops::resize(
        &heatmap,
        INPUT_SIZE as u32,
        INPUT_SIZE as u32,
        FilterType::Triangle,
    );

    let path = output_dir.join(format!("grad_cam_{report_id}.png"));
    resized.save_with_format(&path, image::ImageFormat::Png)?;
    debug!(path = %path.display(), "saved heatmap");
    Ok(path)
}

/// Compute and persist the heatmap for one report
///
/// # Errors
///
/// Propagates any [`compute_cam`] or [`render_heatmap`] failure; the
/// orchestrator contains these and records "no heatmap".
pub fn generate_and_store(
    network: &Network,
    input: &Array4<f32>,
    target: CamTarget,
    output_dir: &Path,
    report_id: u64,
) -> Result<PathBuf> {
    let map = compute_cam(network, input, target)?;
    render_heatmap(&map, output_dir, report_id)
}
