//! # AFNO Nowcast
//!
//! Adaptive Fourier Neural Operator (AFNO) filter blocks for spatio-temporal
//! forecasting models such as precipitation nowcasting.
//!
//! ## Features
//!
//! - **AFNO3D spectral mixing**: block-diagonal complex MLP over the 3-D real
//!   spectrum of a (time, height, width) volume, with hard mode truncation
//!   and soft-shrinkage
//! - **Free upsampling**: the inverse transform can return a volume with
//!   height and width scaled by an integer factor
//! - **Filter blocks**: residual block and a two-source cross-attention block
//!   built around the spectral core
//!
//! ## Example
//!
//! ```rust
//! use afno_nowcast::{AfnoConfig, SpectralMixingCore};
//! use ndarray::Array5;
//!
//! let core = SpectralMixingCore::new(AfnoConfig::new(16).with_num_blocks(4))?;
//! let x = Array5::<f32>::zeros((2, 4, 8, 8, 16));
//! let y = core.forward(&x)?;
//! assert_eq!(y.dim(), (2, 4, 8, 8, 16));
//! # Ok::<(), afno_nowcast::AfnoError>(())
//! ```

pub mod config;
pub mod error;
pub mod model;

// Re-export main types
pub use config::{AfnoConfig, CrossFilterBlockConfig, DataFormat, FilterBlockConfig};
pub use error::{AfnoError, Result};
pub use model::afno::{KeptWindow, SpectralMixingCore};
pub use model::block::AfnoBlock3d;
pub use model::cross::AfnoCrossAttentionBlock3d;
pub use model::layers::{Activation, NormKind};
pub use model::mlp::BlockMlp;
pub use model::params::Parameters;
pub use model::spectral::SpectralVolume;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::*;
    pub use crate::error::{AfnoError, Result};
    pub use crate::model::*;
}
