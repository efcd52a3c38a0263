//! Orthonormal 3-D real Fourier transforms
//!
//! Forward and inverse real FFTs over the (depth, height, width) axes of a
//! channels-last volume `[batch, depth, height, width, channels]`, built from
//! separable 1-D transforms along each axis.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::sync::Arc;

use ndarray::{s, Array5, ArrayView1, ArrayViewMut1, Axis};
use rustfft::{num_complex::Complex, Fft, FftPlanner};

/// Spatial axes transformed by [`SpectralTransform`]
const DEPTH: usize = 1;
const HEIGHT: usize = 2;
const WIDTH: usize = 3;

/// Orthonormal 3-D real-to-complex / complex-to-real transform.
///
/// Both directions scale every axis by `1/sqrt(n)`, so a forward transform
/// followed by an inverse with the original sizes reproduces the input.
pub struct SpectralTransform {
    planner: FftPlanner<f64>,
    /// (length, inverse) of every plan built so far
    planned: BTreeSet<(usize, bool)>,
}

thread_local! {
    static TRANSFORM: RefCell<SpectralTransform> = RefCell::new(SpectralTransform::new());
}

/// Run `f` with this thread's shared transform, whose plans persist across calls.
///
/// `f` must not call `with_thread_transform` again.
pub fn with_thread_transform<T>(f: impl FnOnce(&mut SpectralTransform) -> T) -> T {
    TRANSFORM.with(|transform| f(&mut transform.borrow_mut()))
}

impl SpectralTransform {
    /// Create a new transform with an empty plan cache.
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
            planned: BTreeSet::new(),
        }
    }

    /// Number of distinct 1-D plans this transform has built.
    pub fn num_plans(&self) -> usize {
        self.planned.len()
    }

    fn plan(&mut self, len: usize, inverse: bool) -> Arc<dyn Fft<f64>> {
        self.planned.insert((len, inverse));
        if inverse {
            self.planner.plan_fft_inverse(len)
        } else {
            self.planner.plan_fft_forward(len)
        }
    }

    /// Real FFT over (depth, height, width).
    ///
    /// # Arguments
    /// * `x` - Real volume [batch, depth, height, width, channels]
    ///
    /// # Returns
    /// Half spectrum [batch, depth, height, width/2 + 1, channels]
    pub fn rfft3(&mut self, x: &Array5<f64>) -> Array5<Complex<f64>> {
        let width = x.dim().3;
        let mut full = x.mapv(|v| Complex::new(v, 0.0));

        self.fft_axis(&mut full, WIDTH, false);

        // Hermitian symmetry: the negative-frequency half of the width axis is redundant.
        let mut spectrum = full.slice(s![.., .., .., ..width / 2 + 1, ..]).to_owned();

        self.fft_axis(&mut spectrum, HEIGHT, false);
        self.fft_axis(&mut spectrum, DEPTH, false);

        spectrum
    }

    /// Inverse real FFT over (depth, height, width) with explicit output sizes.
    ///
    /// Depth and height are truncated or zero-padded at the end to the
    /// requested length before the inverse transform. The width half spectrum
    /// is truncated or zero-padded to `width/2 + 1` coefficients; the imaginary
    /// parts of its DC and (even length) Nyquist bins are ignored.
    ///
    /// # Arguments
    /// * `spectrum` - Half spectrum [batch, depth', height', width', channels]
    /// * `size` - Output (depth, height, width)
    pub fn irfft3(
        &mut self,
        spectrum: &Array5<Complex<f64>>,
        size: (usize, usize, usize),
    ) -> Array5<f64> {
        let (depth, height, width) = size;

        let mut freq = resize_axis(spectrum, DEPTH, depth);
        self.fft_axis(&mut freq, DEPTH, true);

        let mut freq = resize_axis(&freq, HEIGHT, height);
        self.fft_axis(&mut freq, HEIGHT, true);

        let (batch, _, _, _, channels) = freq.dim();
        let mut output = Array5::<f64>::zeros((batch, depth, height, width, channels));
        if width == 0 {
            return output;
        }

        let inverse = self.plan(width, true);
        let scale = 1.0 / (width as f64).sqrt();
        let mut buffer = vec![Complex::new(0.0, 0.0); width];

        for (half, mut out) in freq
            .lanes(Axis(WIDTH))
            .into_iter()
            .zip(output.lanes_mut(Axis(WIDTH)))
        {
            hermitian_extend(&half, &mut buffer);
            inverse.process(&mut buffer);
            for (o, c) in out.iter_mut().zip(buffer.iter()) {
                *o = c.re * scale;
            }
        }

        output
    }

    /// In-place orthonormal complex FFT along one axis.
    fn fft_axis(&mut self, data: &mut Array5<Complex<f64>>, axis: usize, inverse: bool) {
        let n = data.len_of(Axis(axis));
        if n == 0 {
            return;
        }

        let fft = self.plan(n, inverse);
        let scale = 1.0 / (n as f64).sqrt();
        let mut buffer = vec![Complex::new(0.0, 0.0); n];

        for mut lane in data.lanes_mut(Axis(axis)) {
            for (b, v) in buffer.iter_mut().zip(lane.iter()) {
                *b = *v;
            }
            fft.process(&mut buffer);
            write_scaled(&mut lane, &buffer, scale);
        }
    }
}

impl Default for SpectralTransform {
    fn default() -> Self {
        Self::new()
    }
}

fn write_scaled(lane: &mut ArrayViewMut1<Complex<f64>>, buffer: &[Complex<f64>], scale: f64) {
    for (v, b) in lane.iter_mut().zip(buffer.iter()) {
        *v = *b * scale;
    }
}

/// Copy `data` into a new array whose `axis` has length `len`, truncating or
/// zero-padding at the end.
fn resize_axis(data: &Array5<Complex<f64>>, axis: usize, len: usize) -> Array5<Complex<f64>> {
    let current = data.len_of(Axis(axis));
    if current == len {
        return data.clone();
    }

    let mut shape = data.raw_dim();
    shape[axis] = len;
    let mut resized = Array5::<Complex<f64>>::zeros(shape);

    let keep = current.min(len);
    resized
        .slice_axis_mut(Axis(axis), (0..keep).into())
        .assign(&data.slice_axis(Axis(axis), (0..keep).into()));

    resized
}

/// Rebuild a full length-`buffer.len()` spectrum from a half spectrum.
fn hermitian_extend(half: &ArrayView1<Complex<f64>>, buffer: &mut [Complex<f64>]) {
    let n = buffer.len();
    let zero = Complex::new(0.0, 0.0);
    let coeff = |k: usize| if k < half.len() { half[k] } else { zero };

    for k in 0..=n / 2 {
        buffer[k] = coeff(k);
    }
    buffer[0].im = 0.0;
    if n % 2 == 0 {
        buffer[n / 2].im = 0.0;
    }
    for k in n / 2 + 1..n {
        buffer[k] = buffer[n - k].conj();
    }
}
