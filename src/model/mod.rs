//! AFNO model components
//!
//! This module contains the spectral filter architecture:
//! - 3-D real Fourier transforms
//! - AFNO3D spectral mixing core
//! - Feed-forward and normalization layers
//! - Residual and cross-attention filter blocks

pub mod afno;
pub mod block;
pub mod cross;
pub mod fourier;
pub mod layers;
pub mod layout;
pub mod mlp;
pub mod params;
pub mod spectral;

pub use afno::{KeptWindow, SpectralMixingCore};
pub use block::AfnoBlock3d;
pub use cross::AfnoCrossAttentionBlock3d;
pub use fourier::SpectralTransform;
pub use layers::{Activation, LayerNorm, Linear, Norm, NormKind};
pub use mlp::BlockMlp;
pub use params::Parameters;
pub use spectral::SpectralVolume;
