//! Position-wise feed-forward network shared by both filter blocks

use ndarray::{Array, Dimension};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::layers::{dropout, Activation, Linear};
use super::params::{with_prefix, NamedParameter, NamedParameterMut, Parameters};
use crate::error::{AfnoError, Result};

/// Two-layer feed-forward network.
///
/// Structure: Linear -> activation -> Dropout -> Linear -> Dropout
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockMlp {
    pub fc1: Linear,
    pub fc2: Linear,
    activation: Activation,
    /// Dropout probability, only applied in training mode
    drop: f64,
}

impl BlockMlp {
    /// Create a new feed-forward network.
    ///
    /// # Arguments
    /// * `in_features` - Width of the input's last axis
    /// * `hidden_features` - Hidden width, `in_features` when `None`
    /// * `out_features` - Output width, `in_features` when `None`
    /// * `activation` - Activation between the two projections
    /// * `drop` - Dropout probability in [0, 1)
    pub fn new(
        in_features: usize,
        hidden_features: Option<usize>,
        out_features: Option<usize>,
        activation: Activation,
        drop: f64,
    ) -> Result<Self> {
        Self::with_rng(
            in_features,
            hidden_features,
            out_features,
            activation,
            drop,
            &mut rand::thread_rng(),
        )
    }

    pub fn with_rng<R: Rng + ?Sized>(
        in_features: usize,
        hidden_features: Option<usize>,
        out_features: Option<usize>,
        activation: Activation,
        drop: f64,
        rng: &mut R,
    ) -> Result<Self> {
        if in_features == 0 {
            return Err(AfnoError::config("in_features must be positive"));
        }
        if !(0.0..1.0).contains(&drop) {
            return Err(AfnoError::config(format!("drop must lie in [0, 1), got {}", drop)));
        }

        let hidden_features = hidden_features.unwrap_or(in_features);
        let out_features = out_features.unwrap_or(in_features);
        debug!(in_features, hidden_features, out_features, drop, "built block MLP");

        Ok(Self {
            fc1: Linear::with_rng(in_features, hidden_features, rng),
            fc2: Linear::with_rng(hidden_features, out_features, rng),
            activation,
            drop,
        })
    }

    pub fn in_features(&self) -> usize {
        self.fc1.in_features()
    }

    pub fn hidden_features(&self) -> usize {
        self.fc1.out_features()
    }

    pub fn out_features(&self) -> usize {
        self.fc2.out_features()
    }

    /// Forward pass over the last axis.
    ///
    /// Dropout is active only when `training` is true.
    pub fn forward<D: Dimension>(&self, x: &Array<f64, D>, training: bool) -> Result<Array<f64, D>> {
        let mut hidden = self.fc1.forward(x)?;
        let activation = self.activation;
        hidden.mapv_inplace(|v| activation.apply(v));
        if training {
            dropout(&mut hidden, self.drop);
        }

        let mut output = self.fc2.forward(&hidden)?;
        if training {
            dropout(&mut output, self.drop);
        }

        Ok(output)
    }
}

impl Parameters for BlockMlp {
    fn named_parameters(&self) -> Vec<NamedParameter<'_>> {
        let mut params = with_prefix("fc1", self.fc1.named_parameters());
        params.extend(with_prefix("fc2", self.fc2.named_parameters()));
        params
    }

    fn named_parameters_mut(&mut self) -> Vec<NamedParameterMut<'_>> {
        let mut params = with_prefix("fc1", self.fc1.named_parameters_mut());
        params.extend(with_prefix("fc2", self.fc2.named_parameters_mut()));
        params
    }
}
