//! Block-structured complex spectrum stored as paired real tensors

use ndarray::{s, Array5, Array6, Axis, Ix6};
use rustfft::num_complex::Complex;

use crate::error::{AfnoError, Result};

/// Half spectrum of a channels-last volume with the channel axis split into
/// diagonal blocks.
///
/// Both parts have shape `[batch, depth, height, width/2 + 1, num_blocks, block_size]`
/// and are co-indexed: `real[i] + j * imag[i]` is one complex coefficient.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectralVolume {
    pub real: Array6<f64>,
    pub imag: Array6<f64>,
}

impl SpectralVolume {
    /// All-zero spectrum of the given shape.
    pub fn zeros(shape: Ix6) -> Self {
        Self {
            real: Array6::zeros(shape),
            imag: Array6::zeros(shape),
        }
    }

    /// Split a complex spectrum `[.., channels]` into `num_blocks` blocks.
    pub fn from_complex(spectrum: &Array5<Complex<f64>>, num_blocks: usize) -> Result<Self> {
        let (b, d, h, w, c) = spectrum.dim();
        if num_blocks == 0 || c % num_blocks != 0 {
            return Err(AfnoError::shape(
                format!("channels divisible by {}", num_blocks),
                format!("{} channels", c),
            ));
        }
        let shape = (b, d, h, w, num_blocks, c / num_blocks);

        let real = spectrum
            .mapv(|z| z.re)
            .into_shape(shape)
            .map_err(|e| AfnoError::shape(format!("{:?}", shape), e.to_string()))?;
        let imag = spectrum
            .mapv(|z| z.im)
            .into_shape(shape)
            .map_err(|e| AfnoError::shape(format!("{:?}", shape), e.to_string()))?;

        Ok(Self { real, imag })
    }

    /// Merge the blocks back into a flat channel axis.
    pub fn to_complex(&self) -> Array5<Complex<f64>> {
        let (b, d, h, w, nb, bs) = self.real.dim();
        Array5::from_shape_fn((b, d, h, w, nb * bs), |(bi, di, hi, wi, ci)| {
            let idx = [bi, di, hi, wi, ci / bs, ci % bs];
            Complex::new(self.real[idx], self.imag[idx])
        })
    }

    pub fn dim(&self) -> (usize, usize, usize, usize, usize, usize) {
        self.real.dim()
    }

    pub fn num_blocks(&self) -> usize {
        self.real.len_of(Axis(4))
    }

    /// Soft-shrink real and imaginary parts independently.
    pub fn soft_shrink(&mut self, threshold: f64) {
        if threshold == 0.0 {
            return;
        }
        self.real.mapv_inplace(|v| soft_shrink(v, threshold));
        self.imag.mapv_inplace(|v| soft_shrink(v, threshold));
    }

    /// Number of coefficients whose real or imaginary part is non-zero.
    pub fn count_nonzero(&self) -> usize {
        self.real
            .iter()
            .zip(self.imag.iter())
            .filter(|(re, im)| **re != 0.0 || **im != 0.0)
            .count()
    }

    /// Largest coefficient magnitude in one block.
    pub fn block_max_norm(&self, block: usize) -> f64 {
        let re = self.real.slice(s![.., .., .., .., block, ..]);
        let im = self.imag.slice(s![.., .., .., .., block, ..]);
        re.iter()
            .zip(im.iter())
            .map(|(r, i)| r.hypot(*i))
            .fold(0.0, f64::max)
    }
}

/// Zero inside `[-threshold, threshold]`, shrink towards zero by `threshold` outside.
pub fn soft_shrink(x: f64, threshold: f64) -> f64 {
    if x > threshold {
        x - threshold
    } else if x < -threshold {
        x + threshold
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_soft_shrink_scalar() {
        assert_relative_eq!(soft_shrink(0.5, 0.1), 0.4, epsilon = 1e-12);
        assert_relative_eq!(soft_shrink(-0.5, 0.1), -0.4, epsilon = 1e-12);
        assert_eq!(soft_shrink(0.05, 0.1), 0.0);
        assert_eq!(soft_shrink(-0.1, 0.1), 0.0);
        assert_eq!(soft_shrink(0.3, 0.0), 0.3);
    }

    #[test]
    fn test_split_and_merge_blocks() {
        let spectrum = Array5::from_shape_fn((1, 2, 3, 2, 6), |(_, d, h, w, c)| {
            Complex::new((d * 100 + h * 10 + w) as f64, c as f64)
        });
        let volume = SpectralVolume::from_complex(&spectrum, 3).unwrap();
        assert_eq!(volume.dim(), (1, 2, 3, 2, 3, 2));
        assert_eq!(volume.num_blocks(), 3);

        // Channel 5 is block 2, offset 1
        assert_eq!(volume.imag[[0, 1, 2, 1, 2, 1]], 5.0);
        assert_eq!(volume.real[[0, 1, 2, 1, 2, 1]], 121.0);

        assert_eq!(volume.to_complex(), spectrum);
    }

    #[test]
    fn test_split_rejects_indivisible_channels() {
        let spectrum = Array5::<Complex<f64>>::zeros((1, 1, 1, 1, 5));
        assert!(SpectralVolume::from_complex(&spectrum, 2).is_err());
    }

    #[test]
    fn test_volume_soft_shrink() {
        let mut volume = SpectralVolume::zeros(Ix6(1, 1, 1, 1, 1, 3));
        volume.real.assign(&Array6::from_shape_vec((1, 1, 1, 1, 1, 3), vec![0.005, -0.5, 0.02]).unwrap());
        volume.imag.fill(-0.011);
        volume.soft_shrink(0.01);

        assert_eq!(volume.real[[0, 0, 0, 0, 0, 0]], 0.0);
        assert_relative_eq!(volume.real[[0, 0, 0, 0, 0, 1]], -0.49, epsilon = 1e-12);
        assert_relative_eq!(volume.real[[0, 0, 0, 0, 0, 2]], 0.01, epsilon = 1e-12);
        assert_relative_eq!(volume.imag[[0, 0, 0, 0, 0, 0]], -0.001, epsilon = 1e-12);
        assert_eq!(volume.count_nonzero(), 3);
    }
}
