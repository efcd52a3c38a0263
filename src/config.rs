//! Configuration records for the filter blocks.
//!
//! Every record deserializes from JSON with the documented defaults filling
//! in missing fields, and is checked once by `validate()` when a layer is
//! built.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AfnoError, Result};
use crate::model::layers::{Activation, NormKind};

/// Tensor axis order of the volumes handed to a filter block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DataFormat {
    /// (batch, depth, height, width, channels)
    #[default]
    ChannelsLast,
    /// (batch, channels, depth, height, width)
    ChannelsFirst,
}

fn default_num_blocks() -> usize {
    8
}

fn default_sparsity_threshold() -> f64 {
    0.01
}

fn default_hard_thresholding_fraction() -> f64 {
    1.0
}

fn default_one() -> usize {
    1
}

fn default_true() -> bool {
    true
}

fn default_block_mlp_ratio() -> f64 {
    4.0
}

fn default_cross_mlp_ratio() -> f64 {
    2.0
}

fn default_cross_norm() -> NormKind {
    NormKind::Identity
}

/// Configuration of the AFNO3D spectral mixing core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AfnoConfig {
    /// Channel count of the volumes the core mixes
    pub hidden_size: usize,
    /// Number of diagonal blocks the channels are split into
    #[serde(default = "default_num_blocks")]
    pub num_blocks: usize,
    /// Soft-shrinkage threshold applied to the mixed spectrum
    #[serde(default = "default_sparsity_threshold")]
    pub sparsity_threshold: f64,
    /// Fraction of frequency modes routed through the complex MLP
    #[serde(default = "default_hard_thresholding_fraction")]
    pub hard_thresholding_fraction: f64,
    /// Expansion factor of the hidden stage inside each block
    #[serde(default = "default_one")]
    pub hidden_size_factor: usize,
    /// Height/width upsampling applied by the inverse transform
    #[serde(default = "default_one")]
    pub res_mult: usize,
}

impl AfnoConfig {
    /// Config with default settings for the given channel count
    pub fn new(hidden_size: usize) -> Self {
        Self {
            hidden_size,
            num_blocks: default_num_blocks(),
            sparsity_threshold: default_sparsity_threshold(),
            hard_thresholding_fraction: default_hard_thresholding_fraction(),
            hidden_size_factor: default_one(),
            res_mult: default_one(),
        }
    }

    pub fn with_num_blocks(mut self, num_blocks: usize) -> Self {
        self.num_blocks = num_blocks;
        self
    }

    pub fn with_sparsity_threshold(mut self, threshold: f64) -> Self {
        self.sparsity_threshold = threshold;
        self
    }

    pub fn with_hard_thresholding_fraction(mut self, fraction: f64) -> Self {
        self.hard_thresholding_fraction = fraction;
        self
    }

    pub fn with_hidden_size_factor(mut self, factor: usize) -> Self {
        self.hidden_size_factor = factor;
        self
    }

    pub fn with_res_mult(mut self, res_mult: usize) -> Self {
        self.res_mult = res_mult;
        self
    }

    /// Channels per diagonal block
    pub fn block_size(&self) -> usize {
        self.hidden_size / self.num_blocks.max(1)
    }

    /// Check every construction-time invariant
    pub fn validate(&self) -> Result<()> {
        if self.hidden_size == 0 {
            return Err(AfnoError::config("hidden_size must be positive"));
        }
        if self.num_blocks == 0 {
            return Err(AfnoError::config("num_blocks must be positive"));
        }
        if self.hidden_size % self.num_blocks != 0 {
            return Err(AfnoError::config(format!(
                "hidden_size {} should be divisible by num_blocks {}",
                self.hidden_size, self.num_blocks
            )));
        }
        if !self.sparsity_threshold.is_finite() || self.sparsity_threshold < 0.0 {
            return Err(AfnoError::config(format!(
                "sparsity_threshold must be finite and non-negative, got {}",
                self.sparsity_threshold
            )));
        }
        if !(self.hard_thresholding_fraction > 0.0 && self.hard_thresholding_fraction <= 1.0) {
            return Err(AfnoError::config(format!(
                "hard_thresholding_fraction must lie in (0, 1], got {}",
                self.hard_thresholding_fraction
            )));
        }
        if self.hidden_size_factor == 0 {
            return Err(AfnoError::config("hidden_size_factor must be positive"));
        }
        if self.res_mult == 0 {
            return Err(AfnoError::config("res_mult must be at least 1"));
        }
        Ok(())
    }
}

/// Configuration of [`AfnoBlock3d`](crate::AfnoBlock3d)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterBlockConfig {
    /// Channel count of the block input
    pub dim: usize,
    /// Hidden width of the feed-forward stage relative to `dim`
    #[serde(default = "default_block_mlp_ratio")]
    pub mlp_ratio: f64,
    /// Dropout probability inside the feed-forward stage
    #[serde(default)]
    pub drop: f64,
    #[serde(default)]
    pub activation: Activation,
    #[serde(default)]
    pub norm: NormKind,
    /// Add the filter output to the residual before the feed-forward stage
    #[serde(default = "default_true")]
    pub double_skip: bool,
    #[serde(default = "default_num_blocks")]
    pub num_blocks: usize,
    #[serde(default = "default_sparsity_threshold")]
    pub sparsity_threshold: f64,
    #[serde(default = "default_hard_thresholding_fraction")]
    pub hard_thresholding_fraction: f64,
    #[serde(default)]
    pub data_format: DataFormat,
    /// Output width of the feed-forward stage, `dim` when unset
    #[serde(default)]
    pub mlp_out_features: Option<usize>,
    /// Spatial upsampling factor of the filter
    #[serde(default = "default_one")]
    pub afno_res_mult: usize,
}

impl FilterBlockConfig {
    /// Config with default settings for the given channel count
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            mlp_ratio: default_block_mlp_ratio(),
            drop: 0.0,
            activation: Activation::default(),
            norm: NormKind::default(),
            double_skip: true,
            num_blocks: default_num_blocks(),
            sparsity_threshold: default_sparsity_threshold(),
            hard_thresholding_fraction: default_hard_thresholding_fraction(),
            data_format: DataFormat::default(),
            mlp_out_features: None,
            afno_res_mult: 1,
        }
    }

    /// Parse a config from a JSON string
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Hidden width of the feed-forward stage
    pub fn mlp_hidden_dim(&self) -> usize {
        (self.dim as f64 * self.mlp_ratio) as usize
    }

    /// Spectral core settings derived from this block config
    pub fn filter_config(&self) -> AfnoConfig {
        AfnoConfig::new(self.dim)
            .with_num_blocks(self.num_blocks)
            .with_sparsity_threshold(self.sparsity_threshold)
            .with_hard_thresholding_fraction(self.hard_thresholding_fraction)
            .with_res_mult(self.afno_res_mult)
    }

    pub fn validate(&self) -> Result<()> {
        self.filter_config().validate()?;
        validate_mlp(self.dim, self.mlp_ratio, self.drop)?;
        if let Some(out) = self.mlp_out_features {
            // The feed-forward output is added back onto a `dim`-channel residual.
            if out != self.dim {
                return Err(AfnoError::config(format!(
                    "mlp_out_features {} must equal dim {} for the residual add",
                    out, self.dim
                )));
            }
        }
        Ok(())
    }
}

/// Configuration of [`AfnoCrossAttentionBlock3d`](crate::AfnoCrossAttentionBlock3d)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossFilterBlockConfig {
    /// Channel count of the primary input
    pub dim: usize,
    /// Channel count of the context input
    pub context_dim: usize,
    #[serde(default = "default_cross_mlp_ratio")]
    pub mlp_ratio: f64,
    #[serde(default)]
    pub drop: f64,
    #[serde(default)]
    pub activation: Activation,
    #[serde(default = "default_cross_norm")]
    pub norm: NormKind,
    /// Accepted for config compatibility, the fused block always skips once
    #[serde(default = "default_true")]
    pub double_skip: bool,
    #[serde(default = "default_num_blocks")]
    pub num_blocks: usize,
    #[serde(default = "default_sparsity_threshold")]
    pub sparsity_threshold: f64,
    #[serde(default = "default_hard_thresholding_fraction")]
    pub hard_thresholding_fraction: f64,
    #[serde(default)]
    pub data_format: DataFormat,
    /// Accepted for config compatibility, unused
    #[serde(default)]
    pub timesteps: Option<usize>,
}

impl CrossFilterBlockConfig {
    pub fn new(dim: usize, context_dim: usize) -> Self {
        Self {
            dim,
            context_dim,
            mlp_ratio: default_cross_mlp_ratio(),
            drop: 0.0,
            activation: Activation::default(),
            norm: default_cross_norm(),
            double_skip: true,
            num_blocks: default_num_blocks(),
            sparsity_threshold: default_sparsity_threshold(),
            hard_thresholding_fraction: default_hard_thresholding_fraction(),
            data_format: DataFormat::default(),
            timesteps: None,
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Channel count of the fused (primary + context) volume
    pub fn fused_dim(&self) -> usize {
        self.dim + self.context_dim
    }

    pub fn mlp_hidden_dim(&self) -> usize {
        (self.fused_dim() as f64 * self.mlp_ratio) as usize
    }

    /// Spectral core settings for the fused channel count
    pub fn filter_config(&self) -> AfnoConfig {
        AfnoConfig::new(self.fused_dim())
            .with_num_blocks(self.num_blocks)
            .with_sparsity_threshold(self.sparsity_threshold)
            .with_hard_thresholding_fraction(self.hard_thresholding_fraction)
    }

    pub fn validate(&self) -> Result<()> {
        if self.dim == 0 {
            return Err(AfnoError::config("dim must be positive"));
        }
        self.filter_config().validate()?;
        validate_mlp(self.fused_dim(), self.mlp_ratio, self.drop)
    }
}

fn validate_mlp(dim: usize, mlp_ratio: f64, drop: f64) -> Result<()> {
    if !(mlp_ratio.is_finite() && mlp_ratio > 0.0) || (dim as f64 * mlp_ratio) < 1.0 {
        return Err(AfnoError::config(format!(
            "mlp_ratio {} gives an empty hidden layer for dim {}",
            mlp_ratio, dim
        )));
    }
    if !(0.0..1.0).contains(&drop) {
        return Err(AfnoError::config(format!(
            "drop must lie in [0, 1), got {}",
            drop
        )));
    }
    Ok(())
}
