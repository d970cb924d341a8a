//! Classifier weights, architecture, and provisioning
//!
//! The classifier is a compact convolutional network with a 1-channel
//! 224x224 input and a single output logit. Weights live in a
//! bincode-serialized, format-versioned file; provisioning loads them once
//! per process and degrades to randomly initialized fallback weights when the
//! file is missing or unusable, so an upload never hard-fails for a missing
//! artifact.

use crate::error::{MammoscanError, Result};
use crate::network::{Conv2d, Dense, Layer, Network};
use log::{info, warn};
use ndarray::{Array1, Array2, Array4};
use once_cell::sync::OnceCell;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Expected spatial extent of the preprocessed input
pub const INPUT_SIZE: usize = 224;

/// On-disk weights format version
pub const WEIGHTS_FORMAT_VERSION: u32 = 1;

/// Mean of the fallback weight initialization
pub const FALLBACK_INIT_MEAN: f32 = 0.0;

/// Standard deviation of the fallback weight initialization
pub const FALLBACK_INIT_STD: f32 = 0.01;

/// Fixed shape of one convolution block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ConvSpec {
    out_channels: usize,
    in_channels: usize,
    kernel: usize,
    stride: usize,
    padding: usize,
}

impl ConvSpec {
    const fn weight_len(self) -> usize {
        self.out_channels * self.in_channels * self.kernel * self.kernel
    }
}

// 224 -> conv1(s2) 112 -> pool 56 -> conv2 56 -> pool 28 -> conv3 28
const CONV1_SPEC: ConvSpec = ConvSpec {
    out_channels: 8,
    in_channels: 1,
    kernel: 7,
    stride: 2,
    padding: 3,
};
const CONV2_SPEC: ConvSpec = ConvSpec {
    out_channels: 16,
    in_channels: 8,
    kernel: 3,
    stride: 1,
    padding: 1,
};
const CONV3_SPEC: ConvSpec = ConvSpec {
    out_channels: 32,
    in_channels: 16,
    kernel: 3,
    stride: 1,
    padding: 1,
};
const HEAD_OUT_FEATURES: usize = 1;
const HEAD_IN_FEATURES: usize = CONV3_SPEC.out_channels;

/// Parameters of one convolution layer as stored on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvParams {
    pub out_channels: usize,
    pub in_channels: usize,
    pub kernel: usize,
    pub stride: usize,
    pub padding: usize,
    pub weight: Vec<f32>,
    pub bias: Vec<f32>,
}

/// Parameters of the fully connected head as stored on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenseParams {
    pub out_features: usize,
    pub in_features: usize,
    pub weight: Vec<f32>,
    pub bias: Vec<f32>,
}

/// Complete serialized parameter set of the classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelWeights {
    pub format_version: u32,
    pub conv1: ConvParams,
    pub conv2: ConvParams,
    pub conv3: ConvParams,
    pub head: DenseParams,
}

impl ModelWeights {
    /// Weights drawn from a Normal(0, 0.01) distribution
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let normal = Normal::new(FALLBACK_INIT_MEAN, FALLBACK_INIT_STD)
            .expect("fixed init distribution parameters are valid");
        let mut draw = |len: usize| {
            let mut values = Vec::with_capacity(len);
            for _ in 0..len {
                values.push(normal.sample(&mut *rng));
            }
            values
        };

        Self {
            format_version: WEIGHTS_FORMAT_VERSION,
            conv1: conv_params(CONV1_SPEC, draw(CONV1_SPEC.weight_len()), draw(CONV1_SPEC.out_channels)),
            conv2: conv_params(CONV2_SPEC, draw(CONV2_SPEC.weight_len()), draw(CONV2_SPEC.out_channels)),
            conv3: conv_params(CONV3_SPEC, draw(CONV3_SPEC.weight_len()), draw(CONV3_SPEC.out_channels)),
            head: DenseParams {
                out_features: HEAD_OUT_FEATURES,
                in_features: HEAD_IN_FEATURES,
                weight: draw(HEAD_OUT_FEATURES * HEAD_IN_FEATURES),
                bias: draw(HEAD_OUT_FEATURES),
            },
        }
    }

    /// Reproducible random weights from a seed
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        Self::random(&mut rng)
    }

    /// Well-formed weights with every kernel value and bias set to constants.
    /// Useful for deterministic tests and demos; not a trained model.
    #[must_use]
    pub fn constant(weight_value: f32, bias_value: f32) -> Self {
        Self {
            format_version: WEIGHTS_FORMAT_VERSION,
            conv1: conv_params(
                CONV1_SPEC,
                vec![weight_value; CONV1_SPEC.weight_len()],
                vec![bias_value; CONV1_SPEC.out_channels],
            ),
            conv2: conv_params(
                CONV2_SPEC,
                vec![weight_value; CONV2_SPEC.weight_len()],
                vec![bias_value; CONV2_SPEC.out_channels],
            ),
            conv3: conv_params(
                CONV3_SPEC,
                vec![weight_value; CONV3_SPEC.weight_len()],
                vec![bias_value; CONV3_SPEC.out_channels],
            ),
            head: DenseParams {
                out_features: HEAD_OUT_FEATURES,
                in_features: HEAD_IN_FEATURES,
                weight: vec![weight_value; HEAD_OUT_FEATURES * HEAD_IN_FEATURES],
                bias: vec![bias_value; HEAD_OUT_FEATURES],
            },
        }
    }

    /// Deserialize and validate weights from raw bytes
    ///
    /// # Errors
    ///
    /// Returns `MammoscanError::Model` when the bytes do not decode, the
    /// format version is unknown, or the shapes do not match the fixed
    /// architecture.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let weights: Self = bincode::deserialize(bytes)
            .map_err(|e| MammoscanError::model(format!("failed to decode weights: {e}")))?;
        if weights.format_version != WEIGHTS_FORMAT_VERSION {
            return Err(MammoscanError::model(format!(
                "unsupported weights format version {} (expected {})",
                weights.format_version, WEIGHTS_FORMAT_VERSION
            )));
        }
        weights.validate()?;
        Ok(weights)
    }

    /// Load and validate weights from a file
    ///
    /// # Errors
    ///
    /// Returns `MammoscanError::Model` when the file cannot be read or does
    /// not hold a valid parameter set.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref()).map_err(|e| {
            MammoscanError::model_error_with_context("read", path.as_ref(), &e.to_string())
        })?;
        Self::from_bytes(&bytes)
    }

    /// Serialize the weights to a file
    ///
    /// # Errors
    ///
    /// Returns `MammoscanError::Model` on serialization failures and
    /// `MammoscanError::Io` on write failures.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let bytes = bincode::serialize(self)
            .map_err(|e| MammoscanError::model(format!("failed to encode weights: {e}")))?;
        std::fs::write(path.as_ref(), bytes)?;
        Ok(())
    }

    /// Check every shape against the fixed architecture
    ///
    /// # Errors
    ///
    /// Returns `MammoscanError::Model` on any mismatch or non-finite
    /// parameter.
    pub fn validate(&self) -> Result<()> {
        validate_conv("conv1", &self.conv1, CONV1_SPEC)?;
        validate_conv("conv2", &self.conv2, CONV2_SPEC)?;
        validate_conv("conv3", &self.conv3, CONV3_SPEC)?;

        if self.head.out_features != HEAD_OUT_FEATURES || self.head.in_features != HEAD_IN_FEATURES
        {
            return Err(MammoscanError::model(format!(
                "head declares {}x{} features, expected {}x{}",
                self.head.out_features, self.head.in_features, HEAD_OUT_FEATURES, HEAD_IN_FEATURES
            )));
        }
        if self.head.weight.len() != HEAD_OUT_FEATURES * HEAD_IN_FEATURES
            || self.head.bias.len() != HEAD_OUT_FEATURES
        {
            return Err(MammoscanError::model("head parameter lengths do not match"));
        }
        let finite = self
            .head
            .weight
            .iter()
            .chain(self.head.bias.iter())
            .all(|v| v.is_finite());
        if !finite {
            return Err(MammoscanError::model("head holds non-finite parameters"));
        }
        Ok(())
    }

    /// Total number of parameters
    #[must_use]
    pub fn parameter_count(&self) -> usize {
        self.conv1.weight.len()
            + self.conv1.bias.len()
            + self.conv2.weight.len()
            + self.conv2.bias.len()
            + self.conv3.weight.len()
            + self.conv3.bias.len()
            + self.head.weight.len()
            + self.head.bias.len()
    }

    /// Materialize the runnable network for these weights
    ///
    /// # Errors
    ///
    /// Returns `MammoscanError::Model` when the parameter shapes are invalid.
    pub fn build_network(&self) -> Result<Network> {
        self.validate()?;
        Ok(Network::new(vec![
            conv_layer(&self.conv1)?,
            Layer::Relu,
            Layer::MaxPool2,
            conv_layer(&self.conv2)?,
            Layer::Relu,
            Layer::MaxPool2,
            conv_layer(&self.conv3)?,
            Layer::Relu,
            Layer::GlobalAvgPool,
            dense_layer(&self.head)?,
        ]))
    }
}

fn conv_params(spec: ConvSpec, weight: Vec<f32>, bias: Vec<f32>) -> ConvParams {
    ConvParams {
        out_channels: spec.out_channels,
        in_channels: spec.in_channels,
        kernel: spec.kernel,
        stride: spec.stride,
        padding: spec.padding,
        weight,
        bias,
    }
}

fn validate_conv(name: &str, params: &ConvParams, spec: ConvSpec) -> Result<()> {
    let declared = ConvSpec {
        out_channels: params.out_channels,
        in_channels: params.in_channels,
        kernel: params.kernel,
        stride: params.stride,
        padding: params.padding,
    };
    if declared != spec {
        return Err(MammoscanError::model(format!(
            "{name} declares an unexpected shape ({}x{} k{} s{} p{})",
            params.out_channels, params.in_channels, params.kernel, params.stride, params.padding
        )));
    }
    if params.weight.len() != spec.weight_len() || params.bias.len() != spec.out_channels {
        return Err(MammoscanError::model(format!(
            "{name} parameter lengths do not match its declared shape"
        )));
    }
    if !params
        .weight
        .iter()
        .chain(params.bias.iter())
        .all(|v| v.is_finite())
    {
        return Err(MammoscanError::model(format!(
            "{name} holds non-finite parameters"
        )));
    }
    Ok(())
}

fn conv_layer(params: &ConvParams) -> Result<Layer> {
    let weight = Array4::from_shape_vec(
        (
            params.out_channels,
            params.in_channels,
            params.kernel,
            params.kernel,
        ),
        params.weight.clone(),
    )
    .map_err(|e| MammoscanError::model(format!("convolution weight shape mismatch: {e}")))?;
    let bias = Array1::from_vec(params.bias.clone());
    Ok(Layer::Conv2d(Conv2d::new(
        weight,
        bias,
        params.stride,
        params.padding,
    )?))
}

fn dense_layer(params: &DenseParams) -> Result<Layer> {
    let weight = Array2::from_shape_vec(
        (params.out_features, params.in_features),
        params.weight.clone(),
    )
    .map_err(|e| MammoscanError::model(format!("dense weight shape mismatch: {e}")))?;
    let bias = Array1::from_vec(params.bias.clone());
    Ok(Layer::Dense(Dense::new(weight, bias)?))
}

/// Where a classifier's weights came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelOrigin {
    /// Loaded from a trained weights file
    Trained(PathBuf),
    /// Randomly initialized stand-in
    Fallback,
}

/// A loaded classifier
///
/// Constructed at most once per provider; shared immutably. Forward and
/// backward passes never write to the parameters.
#[derive(Debug)]
pub struct ClassifierHandle {
    network: Network,
    authoritative: bool,
    origin: ModelOrigin,
}

impl ClassifierHandle {
    /// The runnable network
    #[must_use]
    pub fn network(&self) -> &Network {
        &self.network
    }

    /// False when the handle holds fallback weights; such predictions are
    /// not meaningful and callers should say so to the end user.
    #[must_use]
    pub fn is_authoritative(&self) -> bool {
        self.authoritative
    }

    /// Where the weights came from
    #[must_use]
    pub fn origin(&self) -> &ModelOrigin {
        &self.origin
    }
}

/// Lazily provisions and caches the process classifier
///
/// The first call to [`get`](Self::get) performs the load (or fallback
/// construction) exactly once, guarded by a single-initialization cell;
/// every later call returns the same shared handle.
#[derive(Debug)]
pub struct ClassifierProvider {
    model_path: Option<PathBuf>,
    handle: OnceCell<Arc<ClassifierHandle>>,
}

impl ClassifierProvider {
    /// Create a provider for the given weights path (`None` means fallback)
    #[must_use]
    pub fn new(model_path: Option<PathBuf>) -> Self {
        Self {
            model_path,
            handle: OnceCell::new(),
        }
    }

    /// The classifier handle, provisioning it on first use
    ///
    /// This never fails: a missing or unusable weights file degrades to
    /// randomly initialized fallback weights flagged as non-authoritative.
    #[must_use]
    pub fn get(&self) -> Arc<ClassifierHandle> {
        self.handle
            .get_or_init(|| Arc::new(provision(self.model_path.as_deref())))
            .clone()
    }
}

fn provision(model_path: Option<&Path>) -> ClassifierHandle {
    match model_path {
        None => {
            warn!("model path not configured; using fallback weights");
            fallback_handle()
        },
        Some(path) => match load_trained(path) {
            Ok(handle) => handle,
            Err(e) => {
                warn!("failed to load model from {}: {e}; using fallback weights", path.display());
                fallback_handle()
            },
        },
    }
}

fn load_trained(path: &Path) -> Result<ClassifierHandle> {
    let bytes = std::fs::read(path)
        .map_err(|e| MammoscanError::model_error_with_context("read", path, &e.to_string()))?;

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    info!(
        "loading classifier from {} ({} bytes, sha256 {:x})",
        path.display(),
        bytes.len(),
        hasher.finalize()
    );

    let weights = ModelWeights::from_bytes(&bytes)?;
    let network = weights.build_network()?;
    info!("classifier loaded ({} parameters)", weights.parameter_count());

    Ok(ClassifierHandle {
        network,
        authoritative: true,
        origin: ModelOrigin::Trained(path.to_path_buf()),
    })
}

fn fallback_handle() -> ClassifierHandle {
    let mut rng = rand::thread_rng();
    let weights = ModelWeights::random(&mut rng);
    let network = weights
        .build_network()
        .expect("generated weights always match the fixed architecture");
    ClassifierHandle {
        network,
        authoritative: false,
        origin: ModelOrigin::Fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_random_weights_are_valid() {
        let weights = ModelWeights::seeded(7);
        assert!(weights.validate().is_ok());
        assert_eq!(weights.parameter_count(), 6241);
        assert!(weights.build_network().is_ok());
    }

    #[test]
    fn test_seeded_weights_are_reproducible() {
        let a = ModelWeights::seeded(42);
        let b = ModelWeights::seeded(42);
        assert_eq!(a.conv1.weight, b.conv1.weight);
        assert_eq!(a.head.weight, b.head.weight);
    }

    #[test]
    fn test_weights_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("weights.bin");

        let weights = ModelWeights::seeded(11);
        weights.save(&path).unwrap();
        let loaded = ModelWeights::load(&path).unwrap();

        assert_eq!(loaded.format_version, WEIGHTS_FORMAT_VERSION);
        assert_eq!(loaded.conv3.weight, weights.conv3.weight);
    }

    #[test]
    fn test_validate_rejects_wrong_shapes() {
        let mut weights = ModelWeights::seeded(3);
        weights.conv2.out_channels = 99;
        assert!(weights.validate().is_err());

        let mut weights = ModelWeights::seeded(3);
        weights.head.weight.pop();
        assert!(weights.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_non_finite() {
        let mut weights = ModelWeights::seeded(3);
        weights.conv1.weight[0] = f32::NAN;
        assert!(weights.validate().is_err());
    }

    #[test]
    fn test_from_bytes_rejects_garbage_and_version_skew() {
        assert!(ModelWeights::from_bytes(&[0x00, 0x01, 0x02]).is_err());

        let mut weights = ModelWeights::seeded(3);
        weights.format_version = 99;
        let bytes = bincode::serialize(&weights).unwrap();
        let err = ModelWeights::from_bytes(&bytes).unwrap_err();
        assert!(err.to_string().contains("format version"));
    }

    #[test]
    fn test_provider_without_path_degrades() {
        let provider = ClassifierProvider::new(None);
        let handle = provider.get();
        assert!(!handle.is_authoritative());
        assert_eq!(handle.origin(), &ModelOrigin::Fallback);
    }

    #[test]
    fn test_provider_caches_handle() {
        let provider = ClassifierProvider::new(None);
        let first = provider.get();
        let second = provider.get();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_provider_missing_file_degrades() {
        let provider = ClassifierProvider::new(Some(PathBuf::from("/nonexistent/weights.bin")));
        let handle = provider.get();
        assert!(!handle.is_authoritative());
    }

    #[test]
    fn test_provider_corrupt_file_degrades() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("weights.bin");
        std::fs::write(&path, b"definitely not a weights file").unwrap();

        let provider = ClassifierProvider::new(Some(path));
        let handle = provider.get();
        assert!(!handle.is_authoritative());
    }

    #[test]
    fn test_provider_valid_file_is_authoritative() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("weights.bin");
        ModelWeights::seeded(5).save(&path).unwrap();

        let provider = ClassifierProvider::new(Some(path.clone()));
        let handle = provider.get();
        assert!(handle.is_authoritative());
        assert_eq!(handle.origin(), &ModelOrigin::Trained(path));
    }

    #[test]
    fn test_constant_weights_build() {
        let weights = ModelWeights::constant(0.01, 0.1);
        assert!(weights.validate().is_ok());
        assert!(weights.build_network().is_ok());
    }
}
