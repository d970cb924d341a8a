//! Minimal convolutional network over NCHW tensors
//!
//! The classifier is expressed as an explicit layer list rather than a
//! serialized graph: explainability needs the gradient flowing into the last
//! convolution, and the forward-only ONNX runtimes cannot produce one. All
//! tensors are `ndarray::Array4<f32>` in NCHW layout with batch size 1;
//! forward and backward passes only read the parameters and write to
//! call-local buffers, so a network shared behind an `Arc` supports
//! concurrent passes.

use crate::error::{MammoscanError, Result};
use ndarray::{Array1, Array2, Array4};

/// 2D convolution with square kernel, zero padding
#[derive(Debug, Clone)]
pub struct Conv2d {
    /// Kernel weights, shape `(out_channels, in_channels, kernel, kernel)`
    weight: Array4<f32>,
    /// Per-output-channel bias
    bias: Array1<f32>,
    stride: usize,
    padding: usize,
}

impl Conv2d {
    /// Create a convolution layer
    ///
    /// # Errors
    ///
    /// Returns `MammoscanError::Architecture` when the weight/bias shapes
    /// disagree or the stride is zero.
    pub fn new(weight: Array4<f32>, bias: Array1<f32>, stride: usize, padding: usize) -> Result<Self> {
        if stride == 0 {
            return Err(MammoscanError::architecture("convolution stride must be non-zero"));
        }
        if weight.shape()[2] != weight.shape()[3] {
            return Err(MammoscanError::architecture(
                "convolution kernel must be square",
            ));
        }
        if bias.len() != weight.shape()[0] {
            return Err(MammoscanError::architecture(format!(
                "convolution bias length {} does not match {} output channels",
                bias.len(),
                weight.shape()[0]
            )));
        }
        Ok(Self {
            weight,
            bias,
            stride,
            padding,
        })
    }

    fn out_channels(&self) -> usize {
        self.weight.shape()[0]
    }

    fn in_channels(&self) -> usize {
        self.weight.shape()[1]
    }

    fn kernel(&self) -> usize {
        self.weight.shape()[2]
    }

    fn output_extent(&self, input: usize) -> usize {
        (input + 2 * self.padding - self.kernel()) / self.stride + 1
    }

    #[allow(clippy::indexing_slicing)] // dimensions validated before the loops
    fn forward(&self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let (_, in_c, in_h, in_w) = dims(input);
        if in_c != self.in_channels() {
            return Err(MammoscanError::inference(format!(
                "convolution expected {} input channels, got {}",
                self.in_channels(),
                in_c
            )));
        }
        if in_h + 2 * self.padding < self.kernel() || in_w + 2 * self.padding < self.kernel() {
            return Err(MammoscanError::inference(format!(
                "input {}x{} too small for {}x{} kernel",
                in_h,
                in_w,
                self.kernel(),
                self.kernel()
            )));
        }

        let kernel = self.kernel();
        let out_h = self.output_extent(in_h);
        let out_w = self.output_extent(in_w);
        let mut output = Array4::<f32>::zeros((1, self.out_channels(), out_h, out_w));

        for oc in 0..self.out_channels() {
            for oy in 0..out_h {
                for ox in 0..out_w {
                    let mut acc = self.bias[oc];
                    for ic in 0..in_c {
                        for ky in 0..kernel {
                            let iy = (oy * self.stride + ky) as isize - self.padding as isize;
                            if iy < 0 || iy >= in_h as isize {
                                continue;
                            }
                            for kx in 0..kernel {
                                let ix = (ox * self.stride + kx) as isize - self.padding as isize;
                                if ix < 0 || ix >= in_w as isize {
                                    continue;
                                }
                                acc += self.weight[[oc, ic, ky, kx]]
                                    * input[[0, ic, iy as usize, ix as usize]];
                            }
                        }
                    }
                    output[[0, oc, oy, ox]] = acc;
                }
            }
        }

        Ok(output)
    }
}

/// Fully connected layer over a `(1, in_features, 1, 1)` tensor
#[derive(Debug, Clone)]
pub struct Dense {
    /// Weights, shape `(out_features, in_features)`
    weight: Array2<f32>,
    bias: Array1<f32>,
}

impl Dense {
    /// Create a dense layer
    ///
    /// # Errors
    ///
    /// Returns `MammoscanError::Architecture` when the bias length does not
    /// match the output features.
    pub fn new(weight: Array2<f32>, bias: Array1<f32>) -> Result<Self> {
        if bias.len() != weight.shape()[0] {
            return Err(MammoscanError::architecture(format!(
                "dense bias length {} does not match {} output features",
                bias.len(),
                weight.shape()[0]
            )));
        }
        Ok(Self { weight, bias })
    }

    fn in_features(&self) -> usize {
        self.weight.shape()[1]
    }

    fn out_features(&self) -> usize {
        self.weight.shape()[0]
    }

    #[allow(clippy::indexing_slicing)] // dimensions validated before the loops
    fn forward(&self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let (_, in_c, in_h, in_w) = dims(input);
        if in_c != self.in_features() || in_h != 1 || in_w != 1 {
            return Err(MammoscanError::inference(format!(
                "dense layer expected (1, {}, 1, 1) input, got (1, {in_c}, {in_h}, {in_w})",
                self.in_features()
            )));
        }

        let mut output = Array4::<f32>::zeros((1, self.out_features(), 1, 1));
        for o in 0..self.out_features() {
            let mut acc = self.bias[o];
            for c in 0..self.in_features() {
                acc += self.weight[[o, c]] * input[[0, c, 0, 0]];
            }
            output[[0, o, 0, 0]] = acc;
        }
        Ok(output)
    }

    #[allow(clippy::indexing_slicing)] // shapes fixed by the forward pass
    fn backward(&self, grad_output: &Array4<f32>) -> Array4<f32> {
        let mut grad_input = Array4::<f32>::zeros((1, self.in_features(), 1, 1));
        for c in 0..self.in_features() {
            let mut acc = 0.0;
            for o in 0..self.out_features() {
                acc += self.weight[[o, c]] * grad_output[[0, o, 0, 0]];
            }
            grad_input[[0, c, 0, 0]] = acc;
        }
        grad_input
    }
}

/// One network layer
#[derive(Debug, Clone)]
pub enum Layer {
    /// 2D convolution
    Conv2d(Conv2d),
    /// Rectified linear activation
    Relu,
    /// Non-overlapping 2x2 max pooling
    MaxPool2,
    /// Spatial mean over each channel, producing `(1, C, 1, 1)`
    GlobalAvgPool,
    /// Fully connected head
    Dense(Dense),
}

impl Layer {
    /// Whether this layer is a convolution
    #[must_use]
    pub fn is_conv(&self) -> bool {
        matches!(self, Self::Conv2d(_))
    }

    #[allow(clippy::indexing_slicing)] // pooling windows stay inside validated bounds
    fn forward(&self, input: &Array4<f32>) -> Result<Array4<f32>> {
        match self {
            Self::Conv2d(conv) => conv.forward(input),
            Self::Relu => Ok(input.mapv(|v| v.max(0.0))),
            Self::MaxPool2 => {
                let (_, channels, in_h, in_w) = dims(input);
                if in_h < 2 || in_w < 2 {
                    return Err(MammoscanError::inference(format!(
                        "input {in_h}x{in_w} too small for 2x2 max pooling"
                    )));
                }
                let out_h = in_h / 2;
                let out_w = in_w / 2;
                let mut output = Array4::<f32>::zeros((1, channels, out_h, out_w));
                for c in 0..channels {
                    for oy in 0..out_h {
                        for ox in 0..out_w {
                            let mut best = f32::NEG_INFINITY;
                            for wy in 0..2 {
                                for wx in 0..2 {
                                    best = best.max(input[[0, c, oy * 2 + wy, ox * 2 + wx]]);
                                }
                            }
                            output[[0, c, oy, ox]] = best;
                        }
                    }
                }
                Ok(output)
            },
            Self::GlobalAvgPool => {
                let (_, channels, in_h, in_w) = dims(input);
                let area = (in_h * in_w) as f32;
                let mut output = Array4::<f32>::zeros((1, channels, 1, 1));
                for c in 0..channels {
                    let mut acc = 0.0;
                    for y in 0..in_h {
                        for x in 0..in_w {
                            acc += input[[0, c, y, x]];
                        }
                    }
                    output[[0, c, 0, 0]] = acc / area;
                }
                Ok(output)
            },
            Self::Dense(dense) => dense.forward(input),
        }
    }

    /// Gradient of the scalar objective with respect to this layer's input,
    /// given the gradient with respect to its output and the input the layer
    /// saw during the forward pass.
    #[allow(clippy::indexing_slicing)] // shapes fixed by the recorded forward pass
    fn backward(&self, input: &Array4<f32>, grad_output: &Array4<f32>) -> Result<Array4<f32>> {
        match self {
            Self::Conv2d(_) => Err(MammoscanError::architecture(
                "gradient propagation through a convolution is not supported; \
                 the capture point must be the last convolution",
            )),
            Self::Relu => {
                let mut grad_input = grad_output.clone();
                grad_input.zip_mut_with(input, |g, &v| {
                    if v <= 0.0 {
                        *g = 0.0;
                    }
                });
                Ok(grad_input)
            },
            Self::MaxPool2 => {
                let (_, channels, in_h, in_w) = dims(input);
                let out_h = in_h / 2;
                let out_w = in_w / 2;
                let mut grad_input = Array4::<f32>::zeros((1, channels, in_h, in_w));
                for c in 0..channels {
                    for oy in 0..out_h {
                        for ox in 0..out_w {
                            // route the gradient to the window maximum
                            let mut best = f32::NEG_INFINITY;
                            let mut best_at = (0, 0);
                            for wy in 0..2 {
                                for wx in 0..2 {
                                    let value = input[[0, c, oy * 2 + wy, ox * 2 + wx]];
                                    if value > best {
                                        best = value;
                                        best_at = (oy * 2 + wy, ox * 2 + wx);
                                    }
                                }
                            }
                            grad_input[[0, c, best_at.0, best_at.1]] +=
                                grad_output[[0, c, oy, ox]];
                        }
                    }
                }
                Ok(grad_input)
            },
            Self::GlobalAvgPool => {
                let (_, channels, in_h, in_w) = dims(input);
                let area = (in_h * in_w) as f32;
                let mut grad_input = Array4::<f32>::zeros((1, channels, in_h, in_w));
                for c in 0..channels {
                    let spread = grad_output[[0, c, 0, 0]] / area;
                    for y in 0..in_h {
                        for x in 0..in_w {
                            grad_input[[0, c, y, x]] = spread;
                        }
                    }
                }
                Ok(grad_input)
            },
            Self::Dense(dense) => Ok(dense.backward(grad_output)),
        }
    }
}

/// Call-local record of every intermediate tensor of one forward pass
///
/// `values[0]` is the network input; `values[i + 1]` is the output of layer
/// `i`. The trace is owned by a single invocation and dropped with it, so
/// nothing accumulates across calls.
#[derive(Debug)]
pub struct ForwardTrace {
    values: Vec<Array4<f32>>,
}

impl ForwardTrace {
    /// Final network output
    #[must_use]
    pub fn output(&self) -> &Array4<f32> {
        // values always holds at least the input
        self.values.last().expect("trace holds the network input")
    }

    /// Output of layer `index`
    ///
    /// # Panics
    ///
    /// Panics when `index` is out of range for the traced network.
    #[must_use]
    #[allow(clippy::indexing_slicing)]
    pub fn layer_output(&self, index: usize) -> &Array4<f32> {
        &self.values[index + 1]
    }

    /// Input that layer `index` saw
    ///
    /// # Panics
    ///
    /// Panics when `index` is out of range for the traced network.
    #[must_use]
    #[allow(clippy::indexing_slicing)]
    pub fn layer_input(&self, index: usize) -> &Array4<f32> {
        &self.values[index]
    }
}

/// An immutable feed-forward network
#[derive(Debug, Clone)]
pub struct Network {
    layers: Vec<Layer>,
}

impl Network {
    /// Create a network from a layer list (definition order)
    #[must_use]
    pub fn new(layers: Vec<Layer>) -> Self {
        Self { layers }
    }

    /// The layer list in definition order
    #[must_use]
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Index of the last convolution layer in definition order, if any
    #[must_use]
    pub fn last_conv_index(&self) -> Option<usize> {
        self.layers.iter().rposition(Layer::is_conv)
    }

    /// Run a forward pass
    ///
    /// # Errors
    ///
    /// Returns `MammoscanError::Inference` on shape mismatches.
    pub fn forward(&self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let mut value = input.clone();
        for layer in &self.layers {
            value = layer.forward(&value)?;
        }
        Ok(value)
    }

    /// Run a forward pass and reduce the output to the single logit
    ///
    /// # Errors
    ///
    /// Returns `MammoscanError::Inference` when the network output is not a
    /// single finite scalar.
    pub fn forward_logit(&self, input: &Array4<f32>) -> Result<f32> {
        let output = self.forward(input)?;
        scalar_logit(&output)
    }

    /// Run a forward pass recording every intermediate tensor
    ///
    /// # Errors
    ///
    /// Returns `MammoscanError::Inference` on shape mismatches.
    pub fn forward_trace(&self, input: &Array4<f32>) -> Result<ForwardTrace> {
        let mut values = Vec::with_capacity(self.layers.len() + 1);
        values.push(input.clone());
        for layer in &self.layers {
            let next = {
                let current = values.last().expect("trace holds the network input");
                layer.forward(current)?
            };
            values.push(next);
        }
        Ok(ForwardTrace { values })
    }

    /// Gradient of the (seeded) scalar output with respect to the output of
    /// `layers[capture_index]`, walking the layers after the capture point in
    /// reverse.
    ///
    /// # Errors
    ///
    /// Returns `MammoscanError::Architecture` when `capture_index` is out of
    /// range or a convolution sits above the capture point, and
    /// `MammoscanError::Inference` when the traced output is not a single
    /// scalar.
    pub fn backward_to(
        &self,
        trace: &ForwardTrace,
        capture_index: usize,
        seed: f32,
    ) -> Result<Array4<f32>> {
        if capture_index >= self.layers.len() {
            return Err(MammoscanError::architecture(format!(
                "capture index {} out of range for {} layers",
                capture_index,
                self.layers.len()
            )));
        }
        if trace.values.len() != self.layers.len() + 1 {
            return Err(MammoscanError::inference(
                "forward trace does not match network depth",
            ));
        }

        // seed at the scalar output, then walk back to the capture layer
        scalar_logit(trace.output())?;
        let mut gradient = Array4::<f32>::from_elem((1, 1, 1, 1), seed);
        for index in ((capture_index + 1)..self.layers.len()).rev() {
            let layer = self
                .layers
                .get(index)
                .ok_or_else(|| MammoscanError::inference("layer index out of range"))?;
            gradient = layer.backward(trace.layer_input(index), &gradient)?;
        }
        Ok(gradient)
    }
}

#[allow(clippy::indexing_slicing)] // Array4 always has four axes
fn dims(tensor: &Array4<f32>) -> (usize, usize, usize, usize) {
    let shape = tensor.shape();
    (shape[0], shape[1], shape[2], shape[3])
}

#[allow(clippy::indexing_slicing)]
fn scalar_logit(output: &Array4<f32>) -> Result<f32> {
    if output.len() != 1 {
        return Err(MammoscanError::inference(format!(
            "expected a single output logit, got {} values",
            output.len()
        )));
    }
    let logit = output[[0, 0, 0, 0]];
    if !logit.is_finite() {
        return Err(MammoscanError::inference("non-finite output logit"));
    }
    Ok(logit)
}
