//! AFNO3D spectral mixing layer
//!
//! Token mixing in the frequency domain of a (depth, height, width) volume:
//! a 3-D real FFT, a block-diagonal complex two-layer perceptron over the
//! kept modes, soft-shrinkage of the result and an inverse real FFT that can
//! also upsample height and width.

use std::ops::Range;

use ndarray::{s, Array2, Array3, Array4, Array5, ArrayView2, ArrayView6, Ix6};
use ndarray_rand::RandomExt;
use num_traits::Float;
use rand::Rng;
use rand_distr::StandardNormal;
use rustfft::num_complex::Complex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use super::fourier::with_thread_transform;
use super::params::{NamedParameter, NamedParameterMut, Parameters};
use super::spectral::SpectralVolume;
use crate::config::AfnoConfig;
use crate::error::{AfnoError, Result};

/// Standard deviation of the initial complex MLP weights and biases
pub const INIT_SCALE: f64 = 0.02;

/// Frequency window routed through the complex MLP.
///
/// `rows` indexes the height axis of the half spectrum, `cols` its
/// compressed width axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeptWindow {
    pub rows: Range<usize>,
    pub cols: Range<usize>,
}

impl KeptWindow {
    /// True when no mode is routed through the MLP.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() || self.cols.is_empty()
    }

    pub fn contains(&self, row: usize, col: usize) -> bool {
        self.rows.contains(&row) && self.cols.contains(&col)
    }
}

/// Adaptive Fourier Neural Operator over channels-last 3-D volumes.
///
/// Channels are split into `num_blocks` groups of `block_size`; each group is
/// mixed by its own small complex MLP, shared across every batch entry and
/// every kept frequency.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SpectralMixingCore {
    config: AfnoConfig,
    /// Stage-1 weights [2, num_blocks, block_size, block_size * hidden_size_factor]
    pub w1: Array4<f64>,
    /// Stage-1 bias [2, num_blocks, block_size * hidden_size_factor]
    pub b1: Array3<f64>,
    /// Stage-2 weights [2, num_blocks, block_size * hidden_size_factor, block_size]
    pub w2: Array4<f64>,
    /// Stage-2 bias [2, num_blocks, block_size]
    pub b2: Array3<f64>,
}

impl SpectralMixingCore {
    /// Create a new spectral mixing layer with randomly initialized weights.
    pub fn new(config: AfnoConfig) -> Result<Self> {
        Self::with_rng(config, &mut rand::thread_rng())
    }

    /// Create a new spectral mixing layer drawing its weights from `rng`.
    pub fn with_rng<R: Rng + ?Sized>(config: AfnoConfig, rng: &mut R) -> Result<Self> {
        config.validate()?;

        let nb = config.num_blocks;
        let bs = config.block_size();
        let hidden = bs * config.hidden_size_factor;

        let w1 = Array4::<f64>::random_using((2, nb, bs, hidden), StandardNormal, rng) * INIT_SCALE;
        let b1 = Array3::<f64>::random_using((2, nb, hidden), StandardNormal, rng) * INIT_SCALE;
        let w2 = Array4::<f64>::random_using((2, nb, hidden, bs), StandardNormal, rng) * INIT_SCALE;
        let b2 = Array3::<f64>::random_using((2, nb, bs), StandardNormal, rng) * INIT_SCALE;

        let core = Self { config, w1, b1, w2, b2 };
        debug!(
            hidden_size = core.config.hidden_size,
            num_blocks = nb,
            block_size = bs,
            res_mult = core.config.res_mult,
            params = core.num_parameters(),
            "built AFNO3D spectral mixing core"
        );

        Ok(core)
    }

    pub fn config(&self) -> &AfnoConfig {
        &self.config
    }

    pub fn hidden_size(&self) -> usize {
        self.config.hidden_size
    }

    pub fn num_blocks(&self) -> usize {
        self.config.num_blocks
    }

    pub fn block_size(&self) -> usize {
        self.config.block_size()
    }

    pub fn res_mult(&self) -> usize {
        self.config.res_mult
    }

    /// Modes of a `height x width` volume that pass through the complex MLP.
    pub fn kept_window(&self, height: usize, width: usize) -> KeptWindow {
        let total_modes = height / 2 + 1;
        let kept_modes = (total_modes as f64 * self.config.hard_thresholding_fraction).floor() as usize;
        let freq_width = width / 2 + 1;

        // Height is centered on total_modes while width starts at column 0:
        // the half-spectrum width axis is already zero-frequency-first. Keep
        // this asymmetry; both bounds clamp like slice indices.
        let row_end = (total_modes + kept_modes).min(height);
        let row_start = (total_modes - kept_modes).min(row_end);
        let col_end = kept_modes.min(freq_width);

        KeptWindow {
            rows: row_start..row_end,
            cols: 0..col_end,
        }
    }

    /// Shape returned by [`forward`](Self::forward) for an input of shape `dim`.
    pub fn output_dim(
        &self,
        dim: (usize, usize, usize, usize, usize),
    ) -> (usize, usize, usize, usize, usize) {
        let (b, d, h, w, c) = dim;
        let r = self.config.res_mult;
        (b, d, h * r, w * r, c)
    }

    /// Forward pass.
    ///
    /// # Arguments
    /// * `x` - Input volume [batch, depth, height, width, hidden_size]
    ///
    /// # Returns
    /// `x + filtered(x)` with the input shape when `res_mult == 1`, otherwise
    /// the filtered volume alone at [batch, depth, height * res_mult, width * res_mult, hidden_size].
    /// The element type of the input is preserved; the transform itself runs in `f64`.
    pub fn forward<A: Float>(&self, x: &Array5<A>) -> Result<Array5<A>> {
        let (_, depth, height, width, _) = self.check_input(x.dim())?;
        let r = self.config.res_mult;

        let wide = x.mapv(upcast);
        let spectrum = with_thread_transform(|t| t.rfft3(&wide));
        let mixed = self.mix(&spectrum, width)?.to_complex();

        let filtered = with_thread_transform(|t| t.irfft3(&mixed, (depth, height * r, width * r)));
        let filtered = filtered.mapv(downcast::<A>);

        trace!(input = ?x.dim(), output = ?filtered.dim(), "AFNO3D forward");

        if r > 1 {
            Ok(filtered)
        } else {
            Ok(filtered + x)
        }
    }

    /// Soft-thresholded spectrum handed to the inverse transform.
    ///
    /// Shape [batch, depth, height, width/2 + 1, num_blocks, block_size].
    pub fn spectrum<A: Float>(&self, x: &Array5<A>) -> Result<SpectralVolume> {
        let (_, _, _, width, _) = self.check_input(x.dim())?;
        let wide = x.mapv(upcast);
        let spectrum = with_thread_transform(|t| t.rfft3(&wide));
        self.mix(&spectrum, width)
    }

    /// Complex MLP over the kept window followed by soft-shrinkage.
    fn mix(&self, spectrum: &Array5<Complex<f64>>, width: usize) -> Result<SpectralVolume> {
        let x = SpectralVolume::from_complex(spectrum, self.config.num_blocks)?;
        let (b, d, h, wf, nb, bs) = x.dim();
        let window = self.kept_window(h, width);

        let mut out = SpectralVolume::zeros(Ix6(b, d, h, wf, nb, bs));
        if window.is_empty() {
            warn!(height = h, width, "hard thresholding keeps no frequency modes");
            return Ok(out);
        }

        let (rows, cols) = (window.rows.clone(), window.cols.clone());
        let kept_shape = (b, d, rows.len(), cols.len());
        let n = b * d * rows.len() * cols.len();

        for block in 0..nb {
            let x_real = block_rows(x.real.view(), &window, block, n)?;
            let x_imag = block_rows(x.imag.view(), &window, block, n)?;

            let (o1_real, o1_imag) = complex_linear(&x_real, &x_imag, &self.w1, &self.b1, block);
            let o1_real = o1_real.mapv(relu);
            let o1_imag = o1_imag.mapv(relu);

            let (o2_real, o2_imag) = complex_linear(&o1_real, &o1_imag, &self.w2, &self.b2, block);

            let shape = (kept_shape.0, kept_shape.1, kept_shape.2, kept_shape.3, bs);
            out.real
                .slice_mut(s![.., .., rows.clone(), cols.clone(), block, ..])
                .assign(&o2_real.into_shape(shape)?);
            out.imag
                .slice_mut(s![.., .., rows.clone(), cols.clone(), block, ..])
                .assign(&o2_imag.into_shape(shape)?);
        }

        out.soft_shrink(self.config.sparsity_threshold);
        Ok(out)
    }

    fn check_input(
        &self,
        dim: (usize, usize, usize, usize, usize),
    ) -> Result<(usize, usize, usize, usize, usize)> {
        let (b, d, h, w, c) = dim;
        if c != self.config.hidden_size {
            return Err(AfnoError::shape(
                format!("[B, D, H, W, {}]", self.config.hidden_size),
                format!("{:?}", dim),
            ));
        }
        if b == 0 || d == 0 || h == 0 || w == 0 {
            return Err(AfnoError::shape("non-empty batch and spatial axes", format!("{:?}", dim)));
        }
        Ok(dim)
    }
}

impl Parameters for SpectralMixingCore {
    fn named_parameters(&self) -> Vec<NamedParameter<'_>> {
        vec![
            ("w1".to_string(), self.w1.view().into_dyn()),
            ("b1".to_string(), self.b1.view().into_dyn()),
            ("w2".to_string(), self.w2.view().into_dyn()),
            ("b2".to_string(), self.b2.view().into_dyn()),
        ]
    }

    fn named_parameters_mut(&mut self) -> Vec<NamedParameterMut<'_>> {
        vec![
            ("w1".to_string(), self.w1.view_mut().into_dyn()),
            ("b1".to_string(), self.b1.view_mut().into_dyn()),
            ("w2".to_string(), self.w2.view_mut().into_dyn()),
            ("b2".to_string(), self.b2.view_mut().into_dyn()),
        ]
    }
}

/// Gather one block of the kept window as `[n, block_size]` rows.
fn block_rows(
    part: ArrayView6<f64>,
    window: &KeptWindow,
    block: usize,
    n: usize,
) -> Result<Array2<f64>> {
    let view = part.slice(s![.., .., window.rows.clone(), window.cols.clone(), block, ..]);
    let bs = view.len_of(ndarray::Axis(4));
    Ok(view.as_standard_layout().into_owned().into_shape((n, bs))?)
}

/// `(x_real + i x_imag) (w_real + i w_imag) + (b_real + i b_imag)` for one block,
/// as four real matrix products.
fn complex_linear(
    x_real: &Array2<f64>,
    x_imag: &Array2<f64>,
    weight: &Array4<f64>,
    bias: &Array3<f64>,
    block: usize,
) -> (Array2<f64>, Array2<f64>) {
    let w_real: ArrayView2<f64> = weight.slice(s![0, block, .., ..]);
    let w_imag: ArrayView2<f64> = weight.slice(s![1, block, .., ..]);
    let b_real = bias.slice(s![0, block, ..]);
    let b_imag = bias.slice(s![1, block, ..]);

    let real = x_real.dot(&w_real) - x_imag.dot(&w_imag) + &b_real;
    let imag = x_imag.dot(&w_real) + x_real.dot(&w_imag) + &b_imag;

    (real, imag)
}

/// Applied to real and imaginary parts separately, not to the complex magnitude.
fn relu(x: f64) -> f64 {
    x.max(0.0)
}

fn upcast<A: Float>(v: A) -> f64 {
    v.to_f64().unwrap_or(f64::NAN)
}

fn downcast<A: Float>(v: f64) -> A {
    A::from(v).unwrap_or_else(A::nan)
}
