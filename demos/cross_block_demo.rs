//! Example: fuse a radar sequence with a context field through the
//! cross-attention filter block, then refine it with a residual block.
//!
//! Usage:
//!   cargo run --example cross_block_demo

use anyhow::Result;
use ndarray::Array5;

use afno_nowcast::{
    AfnoBlock3d, AfnoCrossAttentionBlock3d, CrossFilterBlockConfig, DataFormat, FilterBlockConfig,
    Parameters,
};

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    println!("AFNO Nowcast - Cross-Attention Block Demo");
    println!("=========================================");
    println!();

    let (batch, dim, context_dim, depth, height, width) = (1, 24, 8, 4, 16, 16);

    // Channels-first inputs, as produced by a convolutional encoder
    let radar = Array5::from_shape_fn((batch, dim, depth, height, width), |(_, c, t, h, w)| {
        ((h + t) as f64 * 0.3).sin() * ((w + c) as f64 * 0.2).cos()
    });
    let context = Array5::from_shape_fn((batch, context_dim, depth, height, width), |(_, c, _, h, _)| {
        (h as f64 / height as f64) * (c + 1) as f64 * 0.1
    });

    let mut cross_config = CrossFilterBlockConfig::new(dim, context_dim);
    cross_config.data_format = DataFormat::ChannelsFirst;
    let cross = AfnoCrossAttentionBlock3d::new(cross_config)?;

    let mut block_config = FilterBlockConfig::new(dim);
    block_config.data_format = DataFormat::ChannelsFirst;
    block_config.afno_res_mult = 2;
    let block = AfnoBlock3d::new(block_config)?;

    println!("Cross block parameters: {}", cross.num_parameters());
    println!("Residual block parameters: {}", block.num_parameters());
    println!();

    let fused = cross.forward(&radar, &context, false)?;
    println!("Fused shape:     {:?}", fused.dim());

    let refined = block.forward(&fused, false)?;
    println!("Refined shape:   {:?}", refined.dim());

    let mean = refined.sum() / refined.len() as f64;
    println!("Refined mean:    {:.6}", mean);

    Ok(())
}
