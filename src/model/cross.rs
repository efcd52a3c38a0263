//! AFNO block mixing channels from a primary and a context volume

use ndarray::Array5;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::afno::SpectralMixingCore;
use super::layers::{Linear, Norm};
use super::layout::{concat_channels, normalize_layout, restore_layout};
use super::mlp::BlockMlp;
use super::params::{with_prefix, NamedParameter, NamedParameterMut, Parameters};
use crate::config::CrossFilterBlockConfig;
use crate::error::{AfnoError, Result};

/// AFNO 3D block with channel mixing from two sources.
///
/// The primary volume `x` (`dim` channels) and the context `y`
/// (`context_dim` channels) are fused, filtered in the frequency domain at
/// the fused width and projected back down to `dim` channels.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AfnoCrossAttentionBlock3d {
    config: CrossFilterBlockConfig,
    norm1: Norm,
    norm2: Norm,
    pre_proj: Linear,
    filter: SpectralMixingCore,
    mlp: BlockMlp,
}

impl AfnoCrossAttentionBlock3d {
    pub fn new(config: CrossFilterBlockConfig) -> Result<Self> {
        Self::with_rng(config, &mut rand::thread_rng())
    }

    pub fn with_rng<R: Rng + ?Sized>(config: CrossFilterBlockConfig, rng: &mut R) -> Result<Self> {
        config.validate()?;
        let fused = config.fused_dim();

        let pre_proj = Linear::with_rng(fused, fused, rng);
        let filter = SpectralMixingCore::with_rng(config.filter_config(), rng)?;
        let mlp = BlockMlp::with_rng(
            fused,
            Some(config.mlp_hidden_dim()),
            Some(config.dim),
            config.activation,
            config.drop,
            rng,
        )?;

        let block = Self {
            norm1: Norm::new(config.norm, config.dim),
            norm2: Norm::new(config.norm, fused),
            pre_proj,
            filter,
            mlp,
            config,
        };
        debug!(
            dim = block.config.dim,
            context_dim = block.config.context_dim,
            params = block.num_parameters(),
            "built AFNO cross-attention block"
        );

        Ok(block)
    }

    pub fn config(&self) -> &CrossFilterBlockConfig {
        &self.config
    }

    pub fn filter(&self) -> &SpectralMixingCore {
        &self.filter
    }

    /// Forward pass.
    ///
    /// # Arguments
    /// * `x` - Primary volume with `dim` channels
    /// * `y` - Context volume with `context_dim` channels and the same batch/spatial axes
    /// * `training` - Whether dropout is active
    ///
    /// # Returns
    /// Volume shaped like `x`
    pub fn forward(&self, x: &Array5<f64>, y: &Array5<f64>, training: bool) -> Result<Array5<f64>> {
        let format = self.config.data_format;
        let x = normalize_layout(x, format);
        let y = normalize_layout(y, format);

        if y.dim().4 != self.config.context_dim {
            return Err(AfnoError::shape(
                format!("context with {} channels", self.config.context_dim),
                format!("{:?}", y.dim()),
            ));
        }

        let xy = concat_channels(&self.norm1.forward(&x)?, &y)?;
        let xy = self.pre_proj.forward(&xy)? + &xy;
        let xy = self.filter.forward(&self.norm2.forward(&xy)?)? + &xy;
        let out = self.mlp.forward(&xy, training)? + &x;
        trace!(output = ?out.dim(), "AFNO cross-attention block forward");

        Ok(restore_layout(out, format))
    }
}

impl Parameters for AfnoCrossAttentionBlock3d {
    fn named_parameters(&self) -> Vec<NamedParameter<'_>> {
        let mut params = with_prefix("norm1", self.norm1.named_parameters());
        params.extend(with_prefix("norm2", self.norm2.named_parameters()));
        params.extend(with_prefix("pre_proj", self.pre_proj.named_parameters()));
        params.extend(with_prefix("filter", self.filter.named_parameters()));
        params.extend(with_prefix("mlp", self.mlp.named_parameters()));
        params
    }

    fn named_parameters_mut(&mut self) -> Vec<NamedParameterMut<'_>> {
        let mut params = with_prefix("norm1", self.norm1.named_parameters_mut());
        params.extend(with_prefix("norm2", self.norm2.named_parameters_mut()));
        params.extend(with_prefix("pre_proj", self.pre_proj.named_parameters_mut()));
        params.extend(with_prefix("filter", self.filter.named_parameters_mut()));
        params.extend(with_prefix("mlp", self.mlp.named_parameters_mut()));
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DataFormat;
    use crate::model::layers::NormKind;
    use crate::model::layout::to_channels_first;
    use approx::assert_relative_eq;
    use ndarray_rand::RandomExt;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::StandardNormal;

    fn config() -> CrossFilterBlockConfig {
        let mut config = CrossFilterBlockConfig::new(12, 4);
        config.num_blocks = 4;
        config
    }

    fn input(shape: (usize, usize, usize, usize, usize), seed: u64) -> Array5<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        Array5::random_using(shape, StandardNormal, &mut rng)
    }

    #[test]
    fn test_cross_forward_shape() {
        let block = AfnoCrossAttentionBlock3d::new(config()).unwrap();
        let x = input((2, 3, 4, 4, 12), 1);
        let y = input((2, 3, 4, 4, 4), 2);
        let out = block.forward(&x, &y, false).unwrap();
        assert_eq!(out.dim(), x.dim());
        assert!(out.iter().all(|v| v.is_finite()));
        assert_eq!(block.filter().hidden_size(), 16);
    }

    #[test]
    fn test_cross_composition() {
        let mut block = AfnoCrossAttentionBlock3d::new(config()).unwrap();
        for (name, mut p) in block.named_parameters_mut() {
            if name.starts_with("pre_proj.") || name.starts_with("filter.") {
                p.fill(0.0);
            }
        }
        let x = input((1, 2, 4, 4, 12), 8);
        let y = input((1, 2, 4, 4, 4), 9);

        // Zero projection keeps xy; the zeroed filter returns xy and the skip adds it again.
        let xy = concat_channels(&x, &y).unwrap();
        let expected = block.mlp.forward(&(&xy * 2.0), false).unwrap() + &x;

        let out = block.forward(&x, &y, false).unwrap();
        assert_eq!(out.dim(), expected.dim());
        for (a, b) in out.iter().zip(expected.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_cross_channels_first() {
        let mut cfg = config();
        cfg.data_format = DataFormat::ChannelsFirst;
        cfg.norm = NormKind::LayerNorm;
        let block = AfnoCrossAttentionBlock3d::new(cfg).unwrap();

        let x = to_channels_first(&input((1, 2, 4, 4, 12), 3));
        let y = to_channels_first(&input((1, 2, 4, 4, 4), 4));
        let out = block.forward(&x, &y, false).unwrap();
        assert_eq!(out.dim(), (1, 12, 2, 4, 4));
    }

    #[test]
    fn test_cross_rejects_mismatched_context() {
        let block = AfnoCrossAttentionBlock3d::new(config()).unwrap();
        let x = input((1, 2, 4, 4, 12), 5);

        let wrong_spatial = input((1, 2, 4, 2, 4), 6);
        assert!(block.forward(&x, &wrong_spatial, false).unwrap_err().is_shape_mismatch());

        let wrong_channels = input((1, 2, 4, 4, 5), 7);
        assert!(block.forward(&x, &wrong_channels, false).unwrap_err().is_shape_mismatch());
    }

    #[test]
    fn test_fused_width_must_divide() {
        let mut cfg = CrossFilterBlockConfig::new(10, 3);
        cfg.num_blocks = 4;
        let err = AfnoCrossAttentionBlock3d::new(cfg).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_parameter_count() {
        let block = AfnoCrossAttentionBlock3d::new(config()).unwrap();
        let fused = 16;
        let hidden = 32;
        let expected = (fused * fused + fused)
            + block.filter().num_parameters()
            + (fused * hidden + hidden)
            + (hidden * 12 + 12);
        assert_eq!(block.num_parameters(), expected);
    }
}
