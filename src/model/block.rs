//! AFNO filter block with residual connections

use ndarray::Array5;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::afno::SpectralMixingCore;
use super::layers::Norm;
use super::layout::{normalize_layout, restore_layout, upsample_nearest};
use super::mlp::BlockMlp;
use super::params::{with_prefix, NamedParameter, NamedParameterMut, Parameters};
use crate::config::FilterBlockConfig;
use crate::error::Result;

/// AFNO 3D block.
///
/// Structure:
/// 1. LayerNorm -> AFNO3D filter (+ residual when `double_skip`)
/// 2. LayerNorm -> feed-forward + residual
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AfnoBlock3d {
    config: FilterBlockConfig,
    norm1: Norm,
    filter: SpectralMixingCore,
    norm2: Norm,
    mlp: BlockMlp,
}

impl AfnoBlock3d {
    /// Create a new filter block.
    pub fn new(config: FilterBlockConfig) -> Result<Self> {
        Self::with_rng(config, &mut rand::thread_rng())
    }

    /// Create a new filter block drawing its weights from `rng`.
    pub fn with_rng<R: Rng + ?Sized>(config: FilterBlockConfig, rng: &mut R) -> Result<Self> {
        config.validate()?;

        let filter = SpectralMixingCore::with_rng(config.filter_config(), rng)?;
        let mlp = BlockMlp::with_rng(
            config.dim,
            Some(config.mlp_hidden_dim()),
            config.mlp_out_features,
            config.activation,
            config.drop,
            rng,
        )?;

        let block = Self {
            norm1: Norm::new(config.norm, config.dim),
            norm2: Norm::new(config.norm, config.dim),
            filter,
            mlp,
            config,
        };
        debug!(
            dim = block.config.dim,
            double_skip = block.config.double_skip,
            format = ?block.config.data_format,
            params = block.num_parameters(),
            "built AFNO block"
        );

        Ok(block)
    }

    pub fn config(&self) -> &FilterBlockConfig {
        &self.config
    }

    pub fn filter(&self) -> &SpectralMixingCore {
        &self.filter
    }

    pub fn mlp(&self) -> &BlockMlp {
        &self.mlp
    }

    /// Forward pass.
    ///
    /// Input shape follows `data_format`: `[B, D, H, W, C]` or `[B, C, D, H, W]`.
    /// With `afno_res_mult = r`, height and width of the output are scaled by `r`.
    pub fn forward(&self, x: &Array5<f64>, training: bool) -> Result<Array5<f64>> {
        let format = self.config.data_format;
        let x = normalize_layout(x, format);

        let mut residual = x.clone();
        let mut x = self.filter.forward(&self.norm1.forward(&x)?)?;

        if self.config.afno_res_mult > 1 {
            let (_, _, h, w, _) = x.dim();
            residual = upsample_nearest(&residual, h, w);
        }
        if self.config.double_skip {
            x = x + &residual;
            residual = x.clone();
        }

        let x = self.mlp.forward(&self.norm2.forward(&x)?, training)? + &residual;
        trace!(output = ?x.dim(), "AFNO block forward");

        Ok(restore_layout(x, format))
    }
}

impl Parameters for AfnoBlock3d {
    fn named_parameters(&self) -> Vec<NamedParameter<'_>> {
        let mut params = with_prefix("norm1", self.norm1.named_parameters());
        params.extend(with_prefix("filter", self.filter.named_parameters()));
        params.extend(with_prefix("norm2", self.norm2.named_parameters()));
        params.extend(with_prefix("mlp", self.mlp.named_parameters()));
        params
    }

    fn named_parameters_mut(&mut self) -> Vec<NamedParameterMut<'_>> {
        let mut params = with_prefix("norm1", self.norm1.named_parameters_mut());
        params.extend(with_prefix("filter", self.filter.named_parameters_mut()));
        params.extend(with_prefix("norm2", self.norm2.named_parameters_mut()));
        params.extend(with_prefix("mlp", self.mlp.named_parameters_mut()));
        params
    }
}
