//! Axis-order conversion and resampling of 5-D volumes

use ndarray::{concatenate, Array5, Axis};

use crate::config::DataFormat;
use crate::error::{AfnoError, Result};

/// `[B, C, D, H, W]` to `[B, D, H, W, C]`
pub fn to_channels_last(x: &Array5<f64>) -> Array5<f64> {
    x.view()
        .permuted_axes([0, 2, 3, 4, 1])
        .as_standard_layout()
        .into_owned()
}

/// `[B, D, H, W, C]` to `[B, C, D, H, W]`
pub fn to_channels_first(x: &Array5<f64>) -> Array5<f64> {
    x.view()
        .permuted_axes([0, 4, 1, 2, 3])
        .as_standard_layout()
        .into_owned()
}

/// Bring a volume in `format` to channels-last.
pub fn normalize_layout(x: &Array5<f64>, format: DataFormat) -> Array5<f64> {
    match format {
        DataFormat::ChannelsLast => x.to_owned(),
        DataFormat::ChannelsFirst => to_channels_last(x),
    }
}

/// Return a channels-last volume to `format`.
pub fn restore_layout(x: Array5<f64>, format: DataFormat) -> Array5<f64> {
    match format {
        DataFormat::ChannelsLast => x,
        DataFormat::ChannelsFirst => to_channels_first(&x),
    }
}

/// Nearest-neighbour resize of the height and width axes of a channels-last volume.
///
/// Source index is `floor(dst * in / out)`.
pub fn upsample_nearest(x: &Array5<f64>, height: usize, width: usize) -> Array5<f64> {
    let (b, d, h, w, c) = x.dim();
    if (h, w) == (height, width) {
        return x.to_owned();
    }

    Array5::from_shape_fn((b, d, height, width, c), |(bi, di, hi, wi, ci)| {
        x[[bi, di, hi * h / height, wi * w / width, ci]]
    })
}

/// Concatenate two channels-last volumes along channels.
///
/// Batch and spatial axes must agree.
pub fn concat_channels(x: &Array5<f64>, y: &Array5<f64>) -> Result<Array5<f64>> {
    let (xb, xd, xh, xw, _) = x.dim();
    let (yb, yd, yh, yw, _) = y.dim();
    if (xb, xd, xh, xw) != (yb, yd, yh, yw) {
        return Err(AfnoError::shape(
            format!("context with batch/spatial axes {:?}", (xb, xd, xh, xw)),
            format!("{:?}", y.dim()),
        ));
    }
    Ok(concatenate(Axis(4), &[x.view(), y.view()])?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(shape: (usize, usize, usize, usize, usize)) -> Array5<f64> {
        let n = shape.0 * shape.1 * shape.2 * shape.3 * shape.4;
        Array5::from_shape_vec(shape, (0..n).map(|v| v as f64).collect()).unwrap()
    }

    #[test]
    fn test_permute_roundtrip() {
        let x = ramp((2, 3, 4, 5, 6));
        let last = to_channels_last(&x);
        assert_eq!(last.dim(), (2, 4, 5, 6, 3));
        assert_eq!(last[[1, 2, 3, 4, 2]], x[[1, 2, 2, 3, 4]]);
        assert!(last.is_standard_layout());
        assert_eq!(to_channels_first(&last), x);
    }

    #[test]
    fn test_layout_helpers() {
        let x = ramp((1, 2, 3, 3, 4));
        assert_eq!(normalize_layout(&x, DataFormat::ChannelsLast), x);
        let y = normalize_layout(&x, DataFormat::ChannelsFirst);
        assert_eq!(restore_layout(y, DataFormat::ChannelsFirst), x);
    }

    #[test]
    fn test_upsample_nearest() {
        let x = ramp((1, 1, 2, 2, 1));
        let up = upsample_nearest(&x, 4, 4);
        assert_eq!(up.dim(), (1, 1, 4, 4, 1));
        assert_eq!(up[[0, 0, 0, 0, 0]], 0.0);
        assert_eq!(up[[0, 0, 1, 1, 0]], 0.0);
        assert_eq!(up[[0, 0, 0, 3, 0]], 1.0);
        assert_eq!(up[[0, 0, 3, 0, 0]], 2.0);
        assert_eq!(up[[0, 0, 3, 3, 0]], 3.0);
    }

    #[test]
    fn test_concat_channels() {
        let x = ramp((1, 2, 2, 2, 3));
        let y = Array5::from_elem((1, 2, 2, 2, 2), -1.0);
        let xy = concat_channels(&x, &y).unwrap();
        assert_eq!(xy.dim(), (1, 2, 2, 2, 5));
        assert_eq!(xy[[0, 1, 1, 1, 2]], x[[0, 1, 1, 1, 2]]);
        assert_eq!(xy[[0, 1, 1, 1, 4]], -1.0);

        let bad = Array5::zeros((1, 2, 3, 2, 2));
        assert!(concat_channels(&x, &bad).unwrap_err().is_shape_mismatch());
    }
}
