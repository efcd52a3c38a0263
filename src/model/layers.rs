//! Position-wise neural network layers
//!
//! Every layer here acts on the last (channel) axis of an array of any rank,
//! so the same code serves `[batch, depth, height, width, channels]` volumes
//! and plain `[rows, features]` matrices.

use ndarray::{Array, Array1, Array2, Axis, Dimension, IxDyn};
use ndarray_rand::RandomExt;
use rand::Rng;
use rand_distr::Normal;
use serde::{Deserialize, Serialize};

use super::params::{NamedParameter, NamedParameterMut, Parameters};
use crate::error::{AfnoError, Result};

/// Activation functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    /// Gaussian Error Linear Unit (tanh approximation)
    #[default]
    Gelu,
    /// Rectified Linear Unit: max(0, x)
    Relu,
    /// No activation
    Identity,
}

impl Activation {
    /// Apply activation function element-wise
    pub fn apply(&self, x: f64) -> f64 {
        match self {
            Activation::Gelu => gelu(x),
            Activation::Relu => x.max(0.0),
            Activation::Identity => x,
        }
    }
}

/// GELU activation function, tanh approximation.
///
/// This is not the exact `x * Phi(x)` form; the two differ by less than
/// `1e-3` over the real line.
pub fn gelu(x: f64) -> f64 {
    0.5 * x * (1.0 + ((2.0 / std::f64::consts::PI).sqrt() * (x + 0.044715 * x.powi(3))).tanh())
}

/// Linear (fully connected) layer over the last axis
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Linear {
    /// Weight matrix [out_features, in_features]
    pub weight: Array2<f64>,
    /// Bias vector [out_features]
    pub bias: Array1<f64>,
}

impl Linear {
    /// Create a new Linear layer
    pub fn new(in_features: usize, out_features: usize) -> Self {
        Self::with_rng(in_features, out_features, &mut rand::thread_rng())
    }

    /// Create a new Linear layer drawing its weights from `rng`
    pub fn with_rng<R: Rng + ?Sized>(in_features: usize, out_features: usize, rng: &mut R) -> Self {
        let std = (2.0 / in_features.max(1) as f64).sqrt();
        let weight = match Normal::new(0.0, std) {
            Ok(normal) => Array2::random_using((out_features, in_features), normal, rng),
            Err(_) => Array2::zeros((out_features, in_features)),
        };
        let bias = Array1::zeros(out_features);

        Self { weight, bias }
    }

    pub fn in_features(&self) -> usize {
        self.weight.ncols()
    }

    pub fn out_features(&self) -> usize {
        self.weight.nrows()
    }

    /// Forward pass
    /// Input shape: [..., in_features]
    /// Output shape: [..., out_features]
    pub fn forward<D: Dimension>(&self, input: &Array<f64, D>) -> Result<Array<f64, D>> {
        let in_features = self.in_features();
        check_last_axis(input.shape(), in_features)?;

        let rows = input.len() / in_features.max(1);
        let flat = input
            .as_standard_layout()
            .into_owned()
            .into_shape((rows, in_features))?;
        let out = flat.dot(&self.weight.t()) + &self.bias;

        let mut shape = input.shape().to_vec();
        if let Some(last) = shape.last_mut() {
            *last = self.out_features();
        }
        Ok(out.into_shape(IxDyn(&shape))?.into_dimensionality::<D>()?)
    }
}

impl Parameters for Linear {
    fn named_parameters(&self) -> Vec<NamedParameter<'_>> {
        vec![
            ("weight".to_string(), self.weight.view().into_dyn()),
            ("bias".to_string(), self.bias.view().into_dyn()),
        ]
    }

    fn named_parameters_mut(&mut self) -> Vec<NamedParameterMut<'_>> {
        vec![
            ("weight".to_string(), self.weight.view_mut().into_dyn()),
            ("bias".to_string(), self.bias.view_mut().into_dyn()),
        ]
    }
}

/// Layer Normalization over the last axis
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LayerNorm {
    /// Normalized shape (number of features)
    pub normalized_shape: usize,
    /// Learnable scale parameter
    pub gamma: Array1<f64>,
    /// Learnable shift parameter
    pub beta: Array1<f64>,
    /// Epsilon for numerical stability
    pub eps: f64,
}

impl LayerNorm {
    /// Create a new LayerNorm layer
    pub fn new(normalized_shape: usize) -> Self {
        Self {
            normalized_shape,
            gamma: Array1::ones(normalized_shape),
            beta: Array1::zeros(normalized_shape),
            eps: 1e-5,
        }
    }

    /// Forward pass, normalizing every lane of the last axis
    pub fn forward<D: Dimension>(&self, input: &Array<f64, D>) -> Result<Array<f64, D>> {
        check_last_axis(input.shape(), self.normalized_shape)?;
        let mut output = input.to_owned();
        let last = Axis(input.ndim().saturating_sub(1));

        for mut lane in output.lanes_mut(last) {
            let n = lane.len() as f64;
            let mean = lane.sum() / n;
            let variance = lane.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
            let std = (variance + self.eps).sqrt();

            for (j, val) in lane.iter_mut().enumerate() {
                *val = (*val - mean) / std * self.gamma[j] + self.beta[j];
            }
        }

        Ok(output)
    }
}

impl Parameters for LayerNorm {
    fn named_parameters(&self) -> Vec<NamedParameter<'_>> {
        vec![
            ("weight".to_string(), self.gamma.view().into_dyn()),
            ("bias".to_string(), self.beta.view().into_dyn()),
        ]
    }

    fn named_parameters_mut(&mut self) -> Vec<NamedParameterMut<'_>> {
        vec![
            ("weight".to_string(), self.gamma.view_mut().into_dyn()),
            ("bias".to_string(), self.beta.view_mut().into_dyn()),
        ]
    }
}

/// Normalization used by the filter blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NormKind {
    #[default]
    LayerNorm,
    Identity,
}

/// Normalization layer selected by [`NormKind`]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Norm {
    LayerNorm(LayerNorm),
    Identity,
}

impl Norm {
    pub fn new(kind: NormKind, dim: usize) -> Self {
        match kind {
            NormKind::LayerNorm => Norm::LayerNorm(LayerNorm::new(dim)),
            NormKind::Identity => Norm::Identity,
        }
    }

    pub fn forward<D: Dimension>(&self, input: &Array<f64, D>) -> Result<Array<f64, D>> {
        match self {
            Norm::LayerNorm(norm) => norm.forward(input),
            Norm::Identity => Ok(input.to_owned()),
        }
    }
}

impl Parameters for Norm {
    fn named_parameters(&self) -> Vec<NamedParameter<'_>> {
        match self {
            Norm::LayerNorm(norm) => norm.named_parameters(),
            Norm::Identity => Vec::new(),
        }
    }

    fn named_parameters_mut(&mut self) -> Vec<NamedParameterMut<'_>> {
        match self {
            Norm::LayerNorm(norm) => norm.named_parameters_mut(),
            Norm::Identity => Vec::new(),
        }
    }
}

/// Apply inverted dropout in place.
pub fn dropout<D: Dimension>(x: &mut Array<f64, D>, p: f64) {
    // Guard against p >= 1.0 to avoid NaN/inf from 1/(1-p)
    if p <= 0.0 {
        return;
    }
    if p >= 1.0 {
        x.fill(0.0);
        return;
    }

    let mut rng = rand::thread_rng();
    let scale = 1.0 / (1.0 - p);

    for val in x.iter_mut() {
        if rng.gen::<f64>() < p {
            *val = 0.0;
        } else {
            *val *= scale;
        }
    }
}

fn check_last_axis(shape: &[usize], expected: usize) -> Result<()> {
    match shape.last() {
        Some(&last) if last == expected => Ok(()),
        _ => Err(AfnoError::shape(
            format!("[..., {}]", expected),
            format!("{:?}", shape),
        )),
    }
}
