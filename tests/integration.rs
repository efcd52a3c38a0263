//! Integration tests for the AFNO filter blocks

use afno_nowcast::model::layout::upsample_nearest;
use afno_nowcast::model::spectral::soft_shrink;
use afno_nowcast::prelude::*;
use approx::assert_relative_eq;
use ndarray::{s, Array5};
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::StandardNormal;
use std::io::Write;

fn seeded_core(config: AfnoConfig, seed: u64) -> SpectralMixingCore {
    let mut rng = StdRng::seed_from_u64(seed);
    SpectralMixingCore::with_rng(config, &mut rng).unwrap()
}

fn random_volume(shape: (usize, usize, usize, usize, usize), seed: u64) -> Array5<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array5::random_using(shape, StandardNormal, &mut rng)
}

#[test]
fn test_shape_invariance() {
    for (shape, blocks) in [
        ((2, 4, 8, 8, 16), 4),
        ((1, 3, 5, 7, 8), 8),
        ((3, 1, 6, 4, 6), 3),
        ((1, 2, 1, 1, 4), 2),
    ] {
        let core = seeded_core(AfnoConfig::new(shape.4).with_num_blocks(blocks), 1);
        let out = core.forward(&random_volume(shape, 2)).unwrap();
        assert_eq!(out.dim(), shape);
    }
}

#[test]
fn test_resize_correctness() {
    for r in [2, 3] {
        let core = seeded_core(AfnoConfig::new(8).with_num_blocks(4).with_res_mult(r), 3);
        let out = core.forward(&random_volume((2, 3, 4, 6, 8), 4)).unwrap();
        assert_eq!(out.dim(), (2, 3, 4 * r, 6 * r, 8));
    }
}

#[test]
fn test_zero_threshold_keeps_every_coefficient() {
    let config = AfnoConfig::new(8).with_num_blocks(2).with_sparsity_threshold(0.0);
    let raw = seeded_core(config.clone(), 5);
    let shrunk = seeded_core(config.with_sparsity_threshold(0.01), 5);
    let x = random_volume((1, 2, 4, 4, 8), 6);

    let raw_spectrum = raw.spectrum(&x).unwrap();
    let total = raw_spectrum.real.len();
    assert_eq!(raw_spectrum.count_nonzero(), total);

    // The shrunk spectrum is exactly the raw one passed through soft-shrinkage.
    let shrunk_spectrum = shrunk.spectrum(&x).unwrap();
    for (a, b) in raw_spectrum.real.iter().zip(shrunk_spectrum.real.iter()) {
        assert_relative_eq!(soft_shrink(*a, 0.01), *b, epsilon = 1e-15);
    }
    for (a, b) in raw_spectrum.imag.iter().zip(shrunk_spectrum.imag.iter()) {
        assert_relative_eq!(soft_shrink(*a, 0.01), *b, epsilon = 1e-15);
    }
}

#[test]
fn test_mode_truncation() {
    let core = seeded_core(
        AfnoConfig::new(8)
            .with_num_blocks(2)
            .with_sparsity_threshold(0.0)
            .with_hard_thresholding_fraction(0.5),
        7,
    );
    let x = random_volume((2, 3, 8, 8, 8), 8);
    let spectrum = core.spectrum(&x).unwrap();
    let window = core.kept_window(8, 8);
    assert_eq!(window.rows, 3..7);
    assert_eq!(window.cols, 0..2);

    let (b, d, h, wf, nb, bs) = spectrum.dim();
    assert_eq!((h, wf), (8, 5));

    let mut inside = 0;
    for bi in 0..b {
        for di in 0..d {
            for hi in 0..h {
                for wi in 0..wf {
                    for blk in 0..nb {
                        for c in 0..bs {
                            let idx = [bi, di, hi, wi, blk, c];
                            let (re, im) = (spectrum.real[idx], spectrum.imag[idx]);
                            if window.contains(hi, wi) {
                                if re != 0.0 || im != 0.0 {
                                    inside += 1;
                                }
                            } else {
                                assert_eq!(re, 0.0, "mode ({}, {}) leaked", hi, wi);
                                assert_eq!(im, 0.0, "mode ({}, {}) leaked", hi, wi);
                            }
                        }
                    }
                }
            }
        }
    }
    assert!(inside > 0);
}

#[test]
fn test_block_isolation() {
    let core = seeded_core(AfnoConfig::new(16).with_num_blocks(4), 9);
    let x = random_volume((1, 2, 4, 4, 16), 10);

    let mut perturbed = x.clone();
    perturbed
        .slice_mut(s![.., .., .., .., 4..8])
        .mapv_inplace(|v| v * 3.0 + 1.0);

    let a = core.forward(&x).unwrap();
    let b = core.forward(&perturbed).unwrap();

    for c in 0..16 {
        let changed = a
            .slice(s![.., .., .., .., c])
            .iter()
            .zip(b.slice(s![.., .., .., .., c]).iter())
            .any(|(p, q)| (p - q).abs() > 1e-12);
        assert_eq!(changed, (4..8).contains(&c), "channel {}", c);
    }
}

#[test]
fn test_divisibility_enforcement() {
    let err = SpectralMixingCore::new(AfnoConfig::new(10).with_num_blocks(3)).unwrap_err();
    assert!(matches!(err, AfnoError::Configuration(_)));
}

#[test]
fn test_end_to_end_f32() {
    let core = seeded_core(AfnoConfig::new(16).with_num_blocks(4), 11);
    let x = random_volume((2, 4, 8, 8, 16), 12).mapv(|v| v as f32);
    let out: Array5<f32> = core.forward(&x).unwrap();
    assert_eq!(out.dim(), (2, 4, 8, 8, 16));
    assert!(out.iter().all(|v| v.is_finite()));
}

#[test]
fn test_residual_free_resize() {
    let mut identity = seeded_core(AfnoConfig::new(16).with_num_blocks(4), 13);
    let mut resize = seeded_core(AfnoConfig::new(16).with_num_blocks(4).with_res_mult(2), 13);
    for (_, mut p) in identity.named_parameters_mut() {
        p.fill(0.0);
    }
    for (_, mut p) in resize.named_parameters_mut() {
        p.fill(0.0);
    }

    let x = random_volume((2, 4, 8, 8, 16), 14);

    // Zero weights: the filter contributes nothing, so only the residual remains.
    let same = identity.forward(&x).unwrap();
    for (a, b) in same.iter().zip(x.iter()) {
        assert_relative_eq!(a, b, epsilon = 1e-12);
    }

    let up = resize.forward(&x).unwrap();
    assert_eq!(up.dim(), (2, 4, 16, 16, 16));
    assert!(up.iter().all(|v| v.abs() < 1e-12));
}

#[test]
fn test_hidden_size_factor_widens_hidden_stage_only() {
    let core = seeded_core(
        AfnoConfig::new(8).with_num_blocks(2).with_hidden_size_factor(3),
        15,
    );
    assert_eq!(core.block_size(), 4);
    assert_eq!(core.w1.dim(), (2, 2, 4, 12));
    let out = core.forward(&random_volume((1, 2, 4, 4, 8), 16)).unwrap();
    assert_eq!(out.dim(), (1, 2, 4, 4, 8));
}

#[test]
fn test_filter_block_pipeline() {
    let mut rng = StdRng::seed_from_u64(17);
    let mut config = FilterBlockConfig::new(16);
    config.num_blocks = 4;
    config.drop = 0.1;
    let block = AfnoBlock3d::with_rng(config, &mut rng).unwrap();

    let x = random_volume((2, 3, 8, 8, 16), 18);
    let eval_a = block.forward(&x, false).unwrap();
    let eval_b = block.forward(&x, false).unwrap();
    assert_eq!(eval_a, eval_b);

    let train = block.forward(&x, true).unwrap();
    assert_eq!(train.dim(), x.dim());
}

#[test]
fn test_upsampling_block_passes_resized_skip() {
    let mut config = FilterBlockConfig::new(8);
    config.num_blocks = 2;
    config.afno_res_mult = 2;
    let mut block = AfnoBlock3d::new(config).unwrap();
    for (name, mut p) in block.named_parameters_mut() {
        if name.starts_with("filter.") || name.starts_with("mlp.") {
            p.fill(0.0);
        }
    }

    let x = random_volume((2, 3, 4, 6, 8), 26);
    let out = block.forward(&x, false).unwrap();
    assert_eq!(out, upsample_nearest(&x, 8, 12));
}

#[test]
fn test_cross_block_pipeline() {
    let mut config = CrossFilterBlockConfig::new(8, 8);
    config.num_blocks = 4;
    let block = AfnoCrossAttentionBlock3d::new(config).unwrap();

    let x = random_volume((1, 4, 8, 8, 8), 19);
    let y = random_volume((1, 4, 8, 8, 8), 20);
    let out = block.forward(&x, &y, false).unwrap();
    assert_eq!(out.dim(), x.dim());

    // The context actually reaches the output.
    let other = random_volume((1, 4, 8, 8, 8), 21);
    let out_other = block.forward(&x, &other, false).unwrap();
    assert!(out.iter().zip(out_other.iter()).any(|(a, b)| (a - b).abs() > 1e-9));
}

#[test]
fn test_block_from_json_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{"dim": 8, "num_blocks": 2, "mlp_ratio": 2.0, "afno_res_mult": 2, "data_format": "channels_first"}}"#
    )
    .unwrap();

    let config = FilterBlockConfig::from_json_file(file.path()).unwrap();
    let block = AfnoBlock3d::new(config).unwrap();
    let out = block.forward(&random_volume((1, 8, 2, 4, 4), 22), false).unwrap();
    assert_eq!(out.dim(), (1, 8, 2, 8, 8));
}

#[test]
fn test_serialized_block_reproduces_output() {
    let mut config = FilterBlockConfig::new(8);
    config.num_blocks = 2;
    let block = AfnoBlock3d::new(config).unwrap();

    let json = serde_json::to_string(&block).unwrap();
    let restored: AfnoBlock3d = serde_json::from_str(&json).unwrap();

    let x = random_volume((1, 2, 4, 4, 8), 23);
    let a = block.forward(&x, false).unwrap();
    let b = restored.forward(&x, false).unwrap();
    for (p, q) in a.iter().zip(b.iter()) {
        assert_relative_eq!(p, q, epsilon = 1e-12);
    }
}

#[test]
fn test_concurrent_forwards() {
    let core = std::sync::Arc::new(seeded_core(AfnoConfig::new(8).with_num_blocks(2), 24));
    let x = random_volume((1, 2, 4, 4, 8), 25);
    let expected = core.forward(&x).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let core = std::sync::Arc::clone(&core);
            let x = x.clone();
            std::thread::spawn(move || core.forward(&x).unwrap())
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), expected);
    }
}
