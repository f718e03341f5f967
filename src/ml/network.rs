//! Feed-forward binary classifier
//!
//! Dense layers with a configurable hidden activation and a single sigmoid
//! output unit. Architecture for the default configuration:
//!
//! ```text
//! Input (N) -> 128 -> 128 -> 128 -> 1 (sigmoid)
//! ```

use std::fmt;
use std::str::FromStr;

use burn::module::{Ignored, Param};
use burn::nn::Linear;
use burn::prelude::*;
use burn::record::{BinBytesRecorder, FullPrecisionSettings, Recorder};
use burn::tensor::activation;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::features::FeatureVector;
use crate::error::{IdsError, Result};

/// CPU backend used for prediction
pub type InferenceBackend = burn::backend::NdArray<f32>;

/// [`InferenceBackend`] with gradient tracking, used for fitting
pub type TrainingBackend = burn::backend::Autodiff<InferenceBackend>;

/// Hidden-layer activation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    #[default]
    Relu,
    Tanh,
    Sigmoid,
}

impl Activation {
    pub fn forward<B: Backend, const D: usize>(self, x: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Activation::Relu => activation::relu(x),
            Activation::Tanh => x.tanh(),
            Activation::Sigmoid => activation::sigmoid(x),
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Activation::Relu => write!(f, "relu"),
            Activation::Tanh => write!(f, "tanh"),
            Activation::Sigmoid => write!(f, "sigmoid"),
        }
    }
}

impl FromStr for Activation {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "relu" => Ok(Activation::Relu),
            "tanh" => Ok(Activation::Tanh),
            "sigmoid" => Ok(Activation::Sigmoid),
            other => Err(format!("unknown activation '{}'", other)),
        }
    }
}

/// Network shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Units per hidden layer
    pub hidden_width: usize,
    /// Hidden-layer activation
    pub activation: Activation,
    /// Number of hidden layers (at least 1)
    pub hidden_layers: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            hidden_width: 128,
            activation: Activation::Relu,
            hidden_layers: 3,
        }
    }
}

impl ModelConfig {
    pub fn validate(&self, input_dim: usize) -> Result<()> {
        if input_dim == 0 {
            return Err(IdsError::InvalidConfig("model input width must be positive".to_string()));
        }
        if self.hidden_width == 0 {
            return Err(IdsError::InvalidConfig("hidden_width must be positive".to_string()));
        }
        if self.hidden_layers == 0 {
            return Err(IdsError::InvalidConfig("hidden_layers must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Dense layer with Glorot-uniform weights drawn from `rng` and zero bias
fn glorot_linear<B: Backend, R: Rng>(
    inputs: usize,
    outputs: usize,
    rng: &mut R,
    device: &B::Device,
) -> Linear<B> {
    let limit = (6.0 / (inputs + outputs) as f32).sqrt();
    let weights: Vec<f32> = (0..inputs * outputs)
        .map(|_| rng.random_range(-limit..limit))
        .collect();

    Linear {
        weight: Param::from_tensor(Tensor::from_data(
            TensorData::new(weights, [inputs, outputs]),
            device,
        )),
        bias: Some(Param::from_tensor(Tensor::zeros([outputs], device))),
    }
}

/// Feed-forward network producing an anomaly probability
#[derive(Module, Debug)]
pub struct FeedForward<B: Backend> {
    hidden: Vec<Linear<B>>,
    output: Linear<B>,
    activation: Ignored<Activation>,
}

impl<B: Backend> FeedForward<B> {
    /// Build an untrained network for `input_dim` features
    ///
    /// Weights come from `rng`, so equal seeds give equal networks.
    pub fn new<R: Rng>(
        input_dim: usize,
        config: &ModelConfig,
        rng: &mut R,
        device: &B::Device,
    ) -> Result<Self> {
        config.validate(input_dim)?;

        let mut hidden = Vec::with_capacity(config.hidden_layers);
        hidden.push(glorot_linear(input_dim, config.hidden_width, rng, device));
        for _ in 1..config.hidden_layers {
            hidden.push(glorot_linear(config.hidden_width, config.hidden_width, rng, device));
        }
        let output = glorot_linear(config.hidden_width, 1, rng, device);

        Ok(Self {
            hidden,
            output,
            activation: Ignored(config.activation),
        })
    }

    /// Expected feature vector width
    pub fn input_width(&self) -> usize {
        self.hidden
            .first()
            .map(|l| l.weight.val().dims()[0])
            .unwrap_or(0)
    }

    /// `(inputs, outputs)` of every layer, output layer last
    pub fn layer_shapes(&self) -> Vec<(usize, usize)> {
        self.hidden
            .iter()
            .chain(std::iter::once(&self.output))
            .map(|l| {
                let [inputs, outputs] = l.weight.val().dims();
                (inputs, outputs)
            })
            .collect()
    }

    pub fn activation(&self) -> Activation {
        self.activation.0
    }

    pub fn parameter_count(&self) -> usize {
        self.num_params()
    }

    pub fn device(&self) -> B::Device {
        self.output.weight.val().device()
    }

    /// Output before the sigmoid, `[rows, 1]`
    pub fn logits(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let mut x = input;
        for layer in &self.hidden {
            x = self.activation.0.forward(layer.forward(x));
        }
        self.output.forward(x)
    }

    /// Anomaly probabilities, `[rows, 1]`
    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        activation::sigmoid(self.logits(input))
    }

    /// Anomaly probability for one feature vector
    pub fn predict(&self, input: &FeatureVector) -> Result<f32> {
        if input.len() != self.input_width() {
            return Err(IdsError::SchemaMismatch {
                expected: self.input_width(),
                found: input.len(),
            });
        }
        let x = Tensor::<B, 2>::from_data(
            TensorData::new(input.as_slice().to_vec(), [1, input.len()]),
            &self.device(),
        );
        Ok(self.forward(x).into_scalar().elem::<f32>())
    }

    /// Serialized weights
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        BinBytesRecorder::<FullPrecisionSettings>::default()
            .record(self.clone().into_record(), ())
            .map_err(|e| IdsError::Model(format!("cannot serialize weights: {:?}", e)))
    }

    /// Replace the weights with ones written by [`FeedForward::to_bytes`]
    pub fn load_bytes(self, bytes: &[u8]) -> Result<Self> {
        let device = self.device();
        let record: FeedForwardRecord<B> = BinBytesRecorder::<FullPrecisionSettings>::default()
            .load(bytes.to_vec(), &device)
            .map_err(|e| IdsError::Model(format!("cannot deserialize weights: {:?}", e)))?;
        Ok(self.load_record(record))
    }
}
